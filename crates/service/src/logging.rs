//! Tracing bootstrap for the engine and its tools.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for a console-only process.
///
/// - Reads filter from `RUST_LOG` (default `info`).
/// - Formats logs with target and thread ids.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(Into::into)
}

/// Initialize tracing with an additional timestamped log file under the
/// case's artifacts directory. The returned guard must be held for the
/// lifetime of the process or buffered lines are lost.
pub fn init_tracing_with_case(artifacts_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(artifacts_dir)?;
    let file_name = format!(
        "crow_eye_{}.log",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    let appender = tracing_appender::rolling::never(artifacts_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}
