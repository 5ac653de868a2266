use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter directive used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Filter directive applied to test output when `RUST_LOG` is not set.
const DEFAULT_TEST_LOG_FILTER: &str = "debug";

static TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingInitError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),

    /// The `log`-to-`tracing` bridge could not be installed.
    #[error("failed to install log bridge: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
}

/// Keeps the non-blocking log writer alive.
///
/// Dropping the flusher flushes buffered log lines; hold it for the lifetime
/// of the process.
#[must_use = "dropping the flusher stops log delivery"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber for a binary.
///
/// Log lines go to stdout through a non-blocking writer; the returned
/// [`LogFlusher`] must be kept alive until shutdown. The filter is taken
/// from `RUST_LOG`, defaulting to `info`. Records emitted through the `log`
/// facade are bridged into tracing.
pub fn init_tracing(service_name: &str) -> Result<LogFlusher, TracingInitError> {
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    ::tracing::info!(service = service_name, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test subscriber writing to the captured test output.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_LOG_FILTER));

        let _ = fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}
