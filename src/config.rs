use std::env;
use std::str::FromStr;

use chrono::TimeDelta;

use crate::error::AppError;

/// Offers longer than a day are a misconfiguration.
pub const MAX_OFFER_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}, expected compact or json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub offer_window_secs: u64,
    pub courier_capacity: usize,
    pub expiry_sweep_interval_secs: u64,
    pub event_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            offer_window_secs: 180,
            courier_capacity: 3,
            expiry_sweep_interval_secs: 30,
            event_buffer_size: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or_default("LOG_FORMAT", defaults.log_format)?,
            offer_window_secs: parse_or_default("OFFER_WINDOW_SECS", defaults.offer_window_secs)?,
            courier_capacity: parse_or_default("COURIER_CAPACITY", defaults.courier_capacity)?,
            expiry_sweep_interval_secs: parse_or_default(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval_secs,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn offer_window(&self) -> TimeDelta {
        let secs = self.offer_window_secs.min(MAX_OFFER_WINDOW_SECS);
        TimeDelta::seconds(i64::try_from(secs).unwrap_or(0))
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.offer_window_secs == 0 || self.offer_window_secs > MAX_OFFER_WINDOW_SECS {
            return Err(AppError::Internal(format!(
                "OFFER_WINDOW_SECS must be between 1 and {MAX_OFFER_WINDOW_SECS}"
            )));
        }
        if self.courier_capacity == 0 {
            return Err(AppError::Internal("COURIER_CAPACITY must be > 0".to_string()));
        }
        if self.expiry_sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "EXPIRY_SWEEP_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal("EVENT_BUFFER_SIZE must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, LogFormat};

    #[test]
    fn defaults_follow_the_courier_cap_and_offer_window() {
        let config = Config::default();

        assert_eq!(config.courier_capacity, 3);
        assert_eq!(config.offer_window_secs, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn offer_window_is_bounded() {
        let config = Config {
            offer_window_secs: 7 * 86_400,
            ..Config::default()
        };

        assert!(config.validate().is_err());
        assert_eq!(config.offer_window(), chrono::TimeDelta::days(1));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = Config {
            courier_capacity: 0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
