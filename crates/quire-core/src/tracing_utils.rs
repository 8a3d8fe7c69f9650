//! Logging setup and log capture for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_core::tracing_utils::{create_test_subscriber, init_tracing};
//!
//! // In a binary
//! init_tracing(&config.logging)?;
//!
//! // In tests, capture logs
//! let (subscriber, logs) = create_test_subscriber();
//! let _guard = tracing::subscriber::set_default(subscriber);
//! // ... run test code ...
//! assert!(logs.contains_at_level("WARN", "Autosave failed"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use quire_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

// ============================================================================
// Test Utilities
// ============================================================================

/// Thread-safe storage for captured log events
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

/// A single captured log entry
#[derive(Debug, Clone)]
pub struct CapturedLog {
    /// Level name, e.g. `WARN`
    pub level: String,
    pub message: String,
    /// Module path
    pub target: String,
    pub fields: HashMap<String, String>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, log: CapturedLog) {
        self.logs.lock().push(log);
    }

    pub fn logs(&self) -> Vec<CapturedLog> {
        self.logs.lock().clone()
    }

    pub fn contains(&self, substring: &str) -> bool {
        self.logs.lock().iter().any(|log| log.message.contains(substring))
    }

    pub fn contains_at_level(&self, level: &str, substring: &str) -> bool {
        self.logs
            .lock()
            .iter()
            .any(|log| log.level == level && log.message.contains(substring))
    }

    pub fn find<F>(&self, predicate: F) -> Vec<CapturedLog>
    where
        F: Fn(&CapturedLog) -> bool,
    {
        self.logs().into_iter().filter(predicate).collect()
    }

    /// Logs carrying `field = value`
    pub fn with_field(&self, field: &str, value: &str) -> Vec<CapturedLog> {
        self.find(|log| log.fields.get(field).is_some_and(|v| v == value))
    }

    pub fn clear(&self) {
        self.logs.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub mod test_subscriber {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    /// Layer that records every event into a [`LogCapture`]
    pub struct LogCaptureLayer {
        capture: LogCapture,
    }

    impl LogCaptureLayer {
        pub fn new(capture: LogCapture) -> Self {
            Self { capture }
        }
    }

    impl<S> Layer<S> for LogCaptureLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = FieldVisitor::default();
            event.record(&mut visitor);

            self.capture.push(CapturedLog {
                level: event.metadata().level().to_string(),
                message: visitor.message,
                target: event.metadata().target().to_string(),
                fields: visitor.fields,
            });
        }
    }

    #[derive(Default)]
    struct FieldVisitor {
        message: String,
        fields: HashMap<String, String>,
    }

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            let value = format!("{:?}", value);
            if field.name() == "message" {
                self.message = value;
            } else {
                self.fields.insert(field.name().to_string(), value);
            }
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "message" {
                self.message = value.to_string();
            } else {
                self.fields.insert(field.name().to_string(), value.to_string());
            }
        }
    }

    /// Subscriber plus capture, for `tracing::subscriber::set_default`
    pub fn create_test_subscriber() -> (impl tracing::Subscriber + Send + Sync, LogCapture) {
        let capture = LogCapture::new();
        let subscriber =
            tracing_subscriber::registry().with(LogCaptureLayer::new(capture.clone()));
        (subscriber, capture)
    }
}

pub use test_subscriber::{create_test_subscriber, LogCaptureLayer};
