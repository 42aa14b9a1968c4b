use std::path::Path;

use time::macros::format_description;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "nowplaying=info";
const LOG_FILE_PREFIX: &str = "nowplaying.log";

/// Installs the global subscriber: stderr always, plus a daily rolling file
/// when `log_dir` is given. Keep the returned guard alive or buffered file
/// output is lost on exit.
///
/// Call this before spawning threads; the local UTC offset can't be read
/// reliably once the process is multi-threaded.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, format_description!("[hour]:[minute]:[second]"));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stderr_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(timer)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if result.is_err() {
        // Someone (a test harness, an embedding app) got there first
        tracing::debug!("[Logging] Subscriber already installed");
    }
    guard
}
