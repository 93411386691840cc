use std::sync::Arc;

use mockable::DefaultClock;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::{EngineSettings, LifecycleEngine, SharedClock};
use crate::models::event::LifecycleEvent;
use crate::observability::metrics::Metrics;
use crate::store::directory::Directory;

pub struct AppState {
    pub directory: Arc<Directory>,
    pub engine: LifecycleEngine,
    pub events_tx: broadcast::Sender<LifecycleEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(DefaultClock))
    }

    pub fn with_clock(config: &Config, clock: SharedClock) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let directory = Arc::new(Directory::new());
        let metrics = Metrics::new();

        let engine = LifecycleEngine::new(
            directory.clone(),
            EngineSettings {
                offer_window: config.offer_window(),
                courier_capacity: config.courier_capacity,
            },
            clock,
            events_tx.clone(),
            metrics.clone(),
        );

        Self {
            directory,
            engine,
            events_tx,
            metrics,
        }
    }
}
