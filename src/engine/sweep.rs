use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::state::AppState;

/// Periodically expires courier offers nobody answered. Read paths expire
/// offers too, so this only bounds how long a stale offer can linger.
pub async fn run_expiry_sweep(state: Arc<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "expiry sweep started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let expired = state.engine.expire_due_offers().await;
        if expired > 0 {
            info!(expired, "expired stale courier offers");
        } else {
            debug!("no stale courier offers");
        }
    }
}
