//! Logging setup for the resource group manager.
//!
//! Every group transition is logged with before/after state and reason.
//! This crate owns the `tracing`
//! subscriber wiring so every binary and test initializes logging the same
//! way, with a builder/guard pair (`LoggerBuilder` / `LoggerGuard`)
//! trimmed to the pieces this system actually needs (no file rotation,
//! Sentry, or OpenTelemetry export).

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Builder for the process-wide tracing subscriber.
#[derive(Debug, Default)]
pub struct LoggerBuilder {
    ansi: bool,
    env_filter: Option<String>,
}

/// RAII guard returned by [`LoggerBuilder::init`].
///
/// Holding this keeps the subscriber alive; dropping it does not tear down
/// `tracing`'s global dispatcher (there is none to restore), but callers in
/// tests hold it to make the lifetime explicit.
#[derive(Debug)]
pub struct LoggerGuard {
    _private: (),
}

impl LoggerBuilder {
    /// Start building a logger configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ansi: true,
            env_filter: None,
        }
    }

    /// Disable ANSI color codes (for non-tty output, e.g. systemd journal).
    #[must_use]
    pub fn ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Override the `RUST_LOG`-style filter directive.
    #[must_use]
    pub fn env_filter(mut self, directive: impl Into<String>) -> Self {
        self.env_filter = Some(directive.into());
        self
    }

    /// Install the subscriber as the global default.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been installed — this is
    /// meant to be called once, at process startup.
    pub fn init(self) -> LoggerGuard {
        let filter = self
            .env_filter
            .map(EnvFilter::new)
            .unwrap_or_else(|| EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(self.ansi)
            .with_target(true);

        Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .expect("logger already initialized");

        LoggerGuard { _private: () }
    }
}

/// Log a `rg_state` transition with before/after state and reason.
#[macro_export]
macro_rules! log_transition {
    ($group:expr, $from:expr, $to:expr, $reason:expr) => {
        tracing::info!(
            group = %$group,
            from = %$from,
            to = %$to,
            reason = %$reason,
            "resource group transition"
        );
    };
}
