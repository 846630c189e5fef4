//! Engine orchestration: volume passes, discovery, and the search
//! worker, wired together over the process configuration.

mod logging;
mod passes;
mod search_session;

pub use logging::{init_tracing, init_tracing_with_case};
pub use passes::{
    correlation_report, open_stores, run_correlation, run_mft_pass, run_usn_pass,
    CorrelationReport, CorrelationStats, MftPassStats, UsnPassStats,
};
pub use search_session::{SearchSession, SearchSignal};

#[cfg(windows)]
pub use passes::{parse_volume, run_usn, stream_usn};

use anyhow::Result;
use core_types::config::AppConfig;
use discovery::EnhancedDatabaseInfo;
use timestamp_engine::DetectorConfig;

/// Detector knobs from the engine configuration.
pub fn detector_config(config: &AppConfig) -> DetectorConfig {
    DetectorConfig {
        sample_size: config.timestamps.sample_size,
        success_threshold: config.timestamps.success_threshold,
    }
}

/// Discover the case's artifact stores with timestamp metadata.
pub fn discover(
    config: &AppConfig,
    force_refresh: bool,
) -> Result<Vec<EnhancedDatabaseInfo>> {
    let databases = discovery::discover_with_metadata(
        &config.artifacts_dir(),
        force_refresh,
        &detector_config(config),
    )?;
    Ok(databases)
}

/// Build a search session for the case described by the configuration:
/// stores are searched under `Target_Artifacts/`, history JSON lives at
/// the case root.
pub fn search_session(config: &AppConfig) -> SearchSession {
    SearchSession::new(
        config.artifacts_dir(),
        std::path::Path::new(&config.case_dir),
        detector_config(config),
    )
}
