//! Tracing subscriber setup and action timing.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Returns false if
/// a global subscriber was already installed, which is not an error.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_filter(filter())
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter())
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => {
            ::tracing::debug!(?format, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}

/// Timing helper for one action invocation.
#[derive(Debug)]
pub struct ActionTimer {
    start: Instant,
    action: String,
}

impl ActionTimer {
    /// Starts a timer for the named action.
    #[must_use]
    pub fn start(action: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            action: action.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Stops the timer and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_timer() {
        let timer = ActionTimer::start("save_note");
        std::thread::sleep(std::time::Duration::from_millis(10));

        assert_eq!(timer.action(), "save_note");
        assert!(timer.finish() >= 10.0);
    }

    #[test]
    fn test_init_tracing_twice() {
        let _ = init_tracing(LogFormat::Text);
        assert!(!init_tracing(LogFormat::Json));
    }
}
