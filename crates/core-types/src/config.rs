//! Engine configuration loaded from `.env` + `crow_eye.toml`.
//!
//! Every knob has a serde default so a missing or partial file always
//! yields a runnable configuration. A process-wide snapshot sits behind a
//! lock; callers get clones, never references into the lock.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Subdirectory of the case that holds the artifact stores and logs.
pub const TARGET_ARTIFACTS_DIR: &str = "Target_Artifacts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Case root; artifact stores land under `<case>/Target_Artifacts/`.
    #[serde(default)]
    pub case_dir: String,
    /// Artifact-store directory; `{case_dir}` expands to the case root.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub usn: UsnSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub timestamps: TimestampSection,
}

#[allow(clippy::derivable_impls)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            case_dir: String::new(),
            artifacts_dir: default_artifacts_dir(),
            store: StoreSection::default(),
            usn: UsnSection::default(),
            search: SearchSection::default(),
            timestamps: TimestampSection::default(),
        }
    }
}

fn default_artifacts_dir() -> String {
    format!("{{case_dir}}/{TARGET_ARTIFACTS_DIR}")
}

/// Store-side batching and SQLite tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_resident_file_size")]
    pub max_resident_file_size: u64,
    #[serde(default = "default_database_cache_size")]
    pub database_cache_size: u64,
    #[serde(default = "default_enable_wal_mode")]
    pub enable_wal_mode: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_resident_file_size: default_max_resident_file_size(),
            database_cache_size: default_database_cache_size(),
            enable_wal_mode: default_enable_wal_mode(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_max_resident_file_size() -> u64 {
    1024 * 1024
}
fn default_database_cache_size() -> u64 {
    64 * 1024 * 1024
}
fn default_enable_wal_mode() -> bool {
    true
}

/// USN journal read-loop guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsnSection {
    #[serde(default = "default_usn_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_usn_max_processing_time_s")]
    pub max_processing_time_s: u64,
    #[serde(default = "default_usn_stall_detection_s")]
    pub stall_detection_s: u64,
}

impl Default for UsnSection {
    fn default() -> Self {
        Self {
            read_buffer_size: default_usn_read_buffer_size(),
            max_processing_time_s: default_usn_max_processing_time_s(),
            stall_detection_s: default_usn_stall_detection_s(),
        }
    }
}

fn default_usn_read_buffer_size() -> usize {
    1024 * 1024
}
fn default_usn_max_processing_time_s() -> u64 {
    3600
}
fn default_usn_stall_detection_s() -> u64 {
    300
}

/// Unified search limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_search_result_cap_per_table")]
    pub result_cap_per_table: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_s: default_search_timeout_s(),
            result_cap_per_table: default_search_result_cap_per_table(),
        }
    }
}

fn default_search_timeout_s() -> u64 {
    60
}
fn default_search_result_cap_per_table() -> usize {
    1000
}

/// Timestamp-column detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampSection {
    #[serde(default = "default_timestamp_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_timestamp_success_threshold")]
    pub success_threshold: f32,
}

impl Default for TimestampSection {
    fn default() -> Self {
        Self {
            sample_size: default_timestamp_sample_size(),
            success_threshold: default_timestamp_success_threshold(),
        }
    }
}

fn default_timestamp_sample_size() -> usize {
    100
}
fn default_timestamp_success_threshold() -> f32 {
    0.80
}

impl AppConfig {
    /// Validate configuration constraints.
    pub fn validate(&self) -> Result<()> {
        if self.store.batch_size == 0 {
            return Err(anyhow::anyhow!("store.batch_size must be positive"));
        }
        if self.usn.read_buffer_size < 4096 {
            return Err(anyhow::anyhow!("usn.read_buffer_size must be >= 4096"));
        }
        if self.search.result_cap_per_table == 0 {
            return Err(anyhow::anyhow!(
                "search.result_cap_per_table must be positive"
            ));
        }
        let threshold = self.timestamps.success_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow::anyhow!(
                "timestamps.success_threshold must be in (0, 1]"
            ));
        }
        Ok(())
    }

    /// Absolute path of the artifact-store directory for this case.
    ///
    /// Configs assembled in code set `case_dir` after construction, so
    /// the `{case_dir}` token is expanded here as well as at load time.
    pub fn artifacts_dir(&self) -> PathBuf {
        PathBuf::from(expand_case_dir(&self.artifacts_dir, &self.case_dir))
    }
}

/// Replace `{case_dir}` placeholder tokens with the resolved case root.
fn expand_case_dir(value: &str, case_dir: &str) -> String {
    value.replace("{case_dir}", case_dir)
}

/// Expand placeholders across every path-valued field.
fn apply_placeholders(cfg: &mut AppConfig) {
    let case = cfg.case_dir.clone();
    cfg.artifacts_dir = expand_case_dir(&cfg.artifacts_dir, &case);
}

static CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| RwLock::new(AppConfig::default()));

/// Get a clone of the currently loaded configuration.
pub fn get_current_config() -> AppConfig {
    CONFIG.read().expect("config lock poisoned").clone()
}

/// Load configuration from `.env` and a TOML file (default:
/// `<case>/crow_eye.toml` resolved from the CROW_EYE_CASE_DIR variable or
/// the working directory).
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let _ = dotenvy::dotenv();
    reload_config(path)
}

/// Force reload configuration from disk.
pub fn reload_config(path: Option<&Path>) -> Result<AppConfig> {
    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut lock = CONFIG
        .write()
        .map_err(|_| anyhow::anyhow!("config lock poisoned"))?;

    if target.exists() {
        let raw = fs::read_to_string(&target)?;
        let mut file_cfg: AppConfig = toml::from_str(&raw)?;
        if file_cfg.case_dir.is_empty() {
            if let Some(parent) = target.parent() {
                file_cfg.case_dir = parent.display().to_string();
            }
        }
        apply_placeholders(&mut file_cfg);
        file_cfg.validate()?;
        *lock = file_cfg.clone();
        Ok(file_cfg)
    } else {
        Ok(lock.clone())
    }
}

/// Replace the process-wide snapshot; used by hosts that assemble the
/// configuration themselves (tests, the GUI shell).
pub fn set_config(cfg: AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut lock = CONFIG
        .write()
        .map_err(|_| anyhow::anyhow!("config lock poisoned"))?;
    *lock = cfg;
    Ok(())
}

/// Default configuration path: `$CROW_EYE_CASE_DIR/crow_eye.toml`, falling
/// back to the working directory for developer runs.
pub fn default_config_path() -> PathBuf {
    std::env::var("CROW_EYE_CASE_DIR")
        .map(|case| PathBuf::from(case).join("crow_eye.toml"))
        .unwrap_or_else(|_| PathBuf::from("crow_eye.toml"))
}
