//! User-visible notifications ("toasts") raised by the session controllers.

use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

/// Sink for short user-facing messages.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, level: Level, title: &str, message: &str);
}

/// Default notifier: forwards every message to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: Level, title: &str, message: &str) {
        match level {
            Level::Success | Level::Info => info!(title, message, "notify"),
            Level::Warning => warn!(title, message, "notify"),
            Level::Error => error!(title, message, "notify"),
        }
    }
}
