//! Discovery, introspection, and the process-wide metadata cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use artifact_store::open_read_only;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use timestamp_engine::{detect_table_columns, DetectorConfig, TimestampColumnInfo};
use tracing::{debug, info, warn};

use crate::catalog::{tables_match_signature, CATALOG};
use crate::{DiscoveryError, DiscoveryResult};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Schema and timestamp metadata for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub timestamp_columns: Vec<TimestampColumnInfo>,
    pub row_count: Option<u64>,
    /// True iff at least one timestamp column was detected.
    pub supports_time_filtering: bool,
}

/// One discovered store with everything the search layer needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedDatabaseInfo {
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub gui_tab_name: String,
    pub path: PathBuf,
    pub exists: bool,
    pub accessible: bool,
    pub tables: BTreeMap<String, TableInfo>,
    pub error: Option<String>,
}

impl EnhancedDatabaseInfo {
    pub fn supports_time_filtering(&self) -> bool {
        self.tables.values().any(|t| t.supports_time_filtering)
    }
}

struct CacheState {
    case_dir: PathBuf,
    databases: Vec<EnhancedDatabaseInfo>,
}

static CACHE: Lazy<Mutex<Option<CacheState>>> = Lazy::new(|| Mutex::new(None));

/// Drop all cached metadata.
pub fn clear_cache() {
    *CACHE.lock() = None;
}

/// Discover every store for a case, with per-table timestamp metadata.
/// Cached per case directory; `force_refresh` bypasses and repopulates.
pub fn discover_with_metadata(
    case_dir: &Path,
    force_refresh: bool,
    detector: &DetectorConfig,
) -> DiscoveryResult<Vec<EnhancedDatabaseInfo>> {
    if !case_dir.exists() {
        return Err(DiscoveryError::MissingCaseDirectory(
            case_dir.display().to_string(),
        ));
    }

    {
        let cache = CACHE.lock();
        if !force_refresh {
            if let Some(state) = cache.as_ref() {
                if state.case_dir == case_dir {
                    debug!("returning cached discovery metadata");
                    return Ok(state.databases.clone());
                }
            }
        }
    }

    let databases = discover_uncached(case_dir, detector);

    let accessible = databases.iter().filter(|d| d.accessible).count();
    let time_filterable = databases
        .iter()
        .filter(|d| d.supports_time_filtering())
        .count();
    info!(
        total = databases.len(),
        accessible, time_filterable, "store discovery complete"
    );

    *CACHE.lock() = Some(CacheState {
        case_dir: case_dir.to_path_buf(),
        databases: databases.clone(),
    });
    Ok(databases)
}

fn discover_uncached(case_dir: &Path, detector: &DetectorConfig) -> Vec<EnhancedDatabaseInfo> {
    // Shallow pre-scan for candidate SQLite files, for signature-based
    // resolution of consolidated stores.
    let candidates: Vec<PathBuf> = std::fs::read_dir(case_dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "db"))
                .collect()
        })
        .unwrap_or_default();

    CATALOG
        .iter()
        .map(|spec| {
            let mut info = EnhancedDatabaseInfo {
                name: spec.name.to_string(),
                display_name: spec.display_name.to_string(),
                category: spec.category.to_string(),
                gui_tab_name: spec.gui_tab.to_string(),
                path: case_dir.join(spec.name),
                exists: false,
                accessible: false,
                tables: BTreeMap::new(),
                error: None,
            };

            let resolved = resolve_store_path(case_dir, spec, &candidates);
            let Some(path) = resolved else {
                return info;
            };
            info.exists = true;
            info.path = path;

            match introspect_database(&info.path, detector) {
                Ok(tables) => {
                    info.accessible = true;
                    info.tables = tables;
                }
                Err(err) => {
                    warn!(store = spec.name, error = %err, "store not accessible");
                    info.error = Some(err.to_string());
                }
            }
            info
        })
        .collect()
}

/// Canonical name, then alternates, then the signature scan.
fn resolve_store_path(
    case_dir: &Path,
    spec: &crate::StoreSpec,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    let canonical = case_dir.join(spec.name);
    if canonical.exists() {
        return Some(canonical);
    }
    for alt in spec.alt_names {
        let alt_path = case_dir.join(alt);
        if alt_path.exists() {
            return Some(alt_path);
        }
    }
    for candidate in candidates {
        let Ok(conn) = open_read_only(candidate, READ_TIMEOUT) else {
            continue;
        };
        let Ok(tables) = list_tables(&conn) else {
            continue;
        };
        let lowered: Vec<String> = tables.iter().map(|t| t.to_ascii_lowercase()).collect();
        if tables_match_signature(spec, &lowered) {
            debug!(
                store = spec.name,
                resolved = %candidate.display(),
                "resolved store by table signature"
            );
            return Some(candidate.clone());
        }
    }
    None
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tables)
}

fn list_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA table_info(\"{}\")",
        table.replace('"', "\"\"")
    ))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

/// Open a store read-only and build its per-table metadata.
pub fn introspect_database(
    path: &Path,
    detector: &DetectorConfig,
) -> DiscoveryResult<BTreeMap<String, TableInfo>> {
    let conn = open_read_only(path, READ_TIMEOUT)
        .map_err(|err| DiscoveryError::NotAccessible(err.to_string()))?;
    let mut tables = BTreeMap::new();
    for table in list_tables(&conn)? {
        let columns = list_columns(&conn, &table)?;
        let timestamp_columns = detect_table_columns(&conn, &table, &columns, detector);
        let row_count: Option<u64> = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\"")),
                [],
                |row| row.get::<_, i64>(0),
            )
            .ok()
            .map(|c| c as u64);
        let supports = !timestamp_columns.is_empty();
        tables.insert(
            table.clone(),
            TableInfo {
                name: table,
                columns,
                timestamp_columns,
                row_count,
                supports_time_filtering: supports,
            },
        );
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as RawConnection;
    use tempfile::tempdir;

    // The discovery cache is process-wide; serialize the tests that
    // touch it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn make_usn_store(dir: &Path) {
        let conn = RawConnection::open(dir.join("USN_journal.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE journal_events (
                 usn INTEGER, filename TEXT, timestamp TEXT);
             INSERT INTO journal_events VALUES
                 (1, 'a.txt', '2024-06-01 10:00:00'),
                 (2, 'b.txt', '2024-06-02 10:00:00');",
        )
        .unwrap();
    }

    fn make_consolidated_store(dir: &Path) {
        let conn = RawConnection::open(dir.join("Consolidated_Claw.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE amcache_entries (
                 program TEXT, install_time TEXT);
             INSERT INTO amcache_entries VALUES ('x', '2024-05-01 00:00:00');",
        )
        .unwrap();
    }

    #[test]
    fn resolves_alternate_name_and_detects_timestamps() {
        let _guard = TEST_LOCK.lock();
        let dir = tempdir().unwrap();
        make_usn_store(dir.path());
        clear_cache();

        let dbs =
            discover_with_metadata(dir.path(), true, &DetectorConfig::default()).unwrap();
        let usn = dbs.iter().find(|d| d.name == "usn_data.db").unwrap();
        assert!(usn.exists);
        assert!(usn.accessible);
        assert_eq!(usn.gui_tab_name, "USN Journal");
        let table = &usn.tables["journal_events"];
        assert_eq!(table.row_count, Some(2));
        assert!(table.supports_time_filtering);
        assert_eq!(table.timestamp_columns.len(), 1);
        assert_eq!(table.timestamp_columns[0].name, "timestamp");
    }

    #[test]
    fn resolves_consolidated_store_by_signature() {
        let _guard = TEST_LOCK.lock();
        let dir = tempdir().unwrap();
        make_consolidated_store(dir.path());
        clear_cache();

        let dbs =
            discover_with_metadata(dir.path(), true, &DetectorConfig::default()).unwrap();
        let amcache = dbs.iter().find(|d| d.name == "amcache_data.db").unwrap();
        assert!(amcache.exists);
        assert!(amcache
            .path
            .file_name()
            .is_some_and(|f| f == "Consolidated_Claw.db"));
    }

    #[test]
    fn missing_stores_reported_not_errors() {
        let _guard = TEST_LOCK.lock();
        let dir = tempdir().unwrap();
        clear_cache();
        let dbs =
            discover_with_metadata(dir.path(), true, &DetectorConfig::default()).unwrap();
        assert_eq!(dbs.len(), CATALOG.len());
        assert!(dbs.iter().all(|d| !d.exists));
    }

    #[test]
    fn cache_hits_until_forced_or_case_changes() {
        let _guard = TEST_LOCK.lock();
        let dir = tempdir().unwrap();
        make_usn_store(dir.path());
        clear_cache();

        let first =
            discover_with_metadata(dir.path(), false, &DetectorConfig::default()).unwrap();
        // Add a store after the first discovery: the cache hides it.
        make_consolidated_store(dir.path());
        let cached =
            discover_with_metadata(dir.path(), false, &DetectorConfig::default()).unwrap();
        assert_eq!(
            first.iter().filter(|d| d.exists).count(),
            cached.iter().filter(|d| d.exists).count()
        );

        // Force refresh sees it.
        let fresh =
            discover_with_metadata(dir.path(), true, &DetectorConfig::default()).unwrap();
        assert!(
            fresh.iter().filter(|d| d.exists).count()
                > cached.iter().filter(|d| d.exists).count()
        );
    }

    #[test]
    fn missing_case_directory_is_an_error() {
        let _guard = TEST_LOCK.lock();
        clear_cache();
        let result = discover_with_metadata(
            Path::new("/definitely/not/a/case"),
            true,
            &DetectorConfig::default(),
        );
        assert!(matches!(
            result,
            Err(DiscoveryError::MissingCaseDirectory(_))
        ));
    }
}
