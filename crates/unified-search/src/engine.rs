//! Search execution across stores and tables.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use core_types::filetime::EPOCH_DELTA_SECS;
use discovery::{discover_with_metadata, EnhancedDatabaseInfo, TableInfo};
use rusqlite::types::Value;
use rusqlite::Connection;
use timestamp_engine::{
    parse_value, DetectorConfig, SqlValue, TimestampColumnInfo, TimestampFormat,
};
use tracing::{debug, info, warn};

use crate::params::{SearchParameters, TermMatcher};
use crate::SearchError;

/// Pre-filter queries over-fetch by this factor; the in-memory filters
/// make the final call.
const PREFILTER_FACTOR: usize = 10;
/// Read-side busy timeout for store connections.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation flag shared between the search worker and
/// its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reset before a new run; only the controller clears.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Lifecycle of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Validating,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl SearchState {
    /// Legal transitions of the per-search state machine.
    pub fn can_transition(self, next: SearchState) -> bool {
        use SearchState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Running)
                | (Validating, Error)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Error)
                | (Completed | Cancelled | Error, Idle)
        )
    }
}

/// Progress report emitted between tables.
#[derive(Debug, Clone)]
pub struct SearchProgress {
    pub database: String,
    pub tables_done: usize,
    pub tables_total: usize,
    pub databases_done: usize,
    pub databases_total: usize,
}

/// One timestamp column that placed a row inside the search window.
#[derive(Debug, Clone)]
pub struct TimestampMatch {
    pub column_name: String,
    pub original_value: String,
    pub parsed_value: DateTime<Utc>,
    pub formatted: String,
    pub format_type: TimestampFormat,
}

/// One matching row.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub database: String,
    pub table: String,
    pub row_id: Option<i64>,
    pub matched_columns: Vec<String>,
    pub row_data: BTreeMap<String, String>,
    pub matched_timestamps: Vec<TimestampMatch>,
}

/// All matches for one store, grouped by table in iteration order.
#[derive(Debug, Clone)]
pub struct DatabaseSearchResults {
    pub database: String,
    pub gui_tab_name: String,
    pub results: BTreeMap<String, Vec<SearchResult>>,
    pub total_matches: usize,
    /// Set when any table hit its per-table result cap.
    pub truncated: bool,
    pub search_time: Duration,
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub databases: Vec<DatabaseSearchResults>,
    pub total_matches: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub timed_out: bool,
}

/// Execute a search over the case directory's stores.
///
/// Databases run sequentially in the caller's selection order; the
/// cancel flag is polled between databases and between tables. All term
/// and timestamp values travel as bound parameters; nothing from the
/// request is ever spliced into SQL text.
pub fn run_search(
    case_dir: &Path,
    params: &SearchParameters,
    detector: &DetectorConfig,
    cancel: &CancelToken,
    mut progress: impl FnMut(SearchProgress),
) -> Result<SearchReport, SearchError> {
    let matcher = params.validate()?;
    let started = Instant::now();
    let timeout = Duration::from_secs(params.timeout_s);

    let mut report = SearchReport {
        databases: Vec::new(),
        total_matches: 0,
        elapsed: Duration::ZERO,
        cancelled: false,
        timed_out: false,
    };

    // An empty selection is a complete, empty result - not an error.
    if params.databases.is_empty() {
        report.elapsed = started.elapsed();
        return Ok(report);
    }

    // Metadata must be current: stale timestamp-column info would build
    // filters against columns that no longer exist.
    let discovered = discover_with_metadata(case_dir, true, detector)?;

    let databases_total = params.databases.len();
    for (db_index, db_name) in params.databases.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if started.elapsed() > timeout {
            report.timed_out = true;
            break;
        }

        let Some(info) = discovered
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(db_name) || d.display_name == *db_name)
        else {
            debug!(database = %db_name, "selected store is unknown; skipped");
            continue;
        };
        if !info.accessible {
            debug!(database = %db_name, "selected store not accessible; skipped");
            continue;
        }

        match search_database(
            info, params, &matcher, cancel, started, timeout,
            db_index, databases_total, &mut progress,
        ) {
            Ok(Some(db_results)) => {
                report.total_matches += db_results.total_matches;
                report.databases.push(db_results);
            }
            Ok(None) => {}
            Err(err) => {
                // One broken store must not poison its siblings.
                warn!(database = %db_name, error = %err, "store search failed; continuing");
            }
        }
    }

    if cancel.is_cancelled() {
        report.cancelled = true;
    }
    report.elapsed = started.elapsed();
    info!(
        matches = report.total_matches,
        databases = report.databases.len(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "search finished"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn search_database(
    info: &EnhancedDatabaseInfo,
    params: &SearchParameters,
    matcher: &TermMatcher,
    cancel: &CancelToken,
    started: Instant,
    timeout: Duration,
    db_index: usize,
    databases_total: usize,
    progress: &mut impl FnMut(SearchProgress),
) -> Result<Option<DatabaseSearchResults>, SearchError> {
    let db_started = Instant::now();
    let conn = artifact_store::open_read_only(&info.path, READ_TIMEOUT)
        .map_err(|err| SearchError::Io(std::io::Error::other(err.to_string())))?;

    // Tables in deterministic iteration order: explicit selection order,
    // else the discovered (sorted) order.
    let selected: Vec<&TableInfo> = match params.tables.get(&info.name) {
        Some(names) => names
            .iter()
            .filter_map(|name| info.tables.get(name))
            .collect(),
        None => info.tables.values().collect(),
    };
    if selected.is_empty() {
        return Ok(None);
    }

    let mut results: BTreeMap<String, Vec<SearchResult>> = BTreeMap::new();
    let mut total = 0usize;
    let mut truncated = false;
    let tables_total = selected.len();

    for (table_index, table) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if started.elapsed() > timeout {
            warn!(
                database = %info.name,
                table = %table.name,
                "search timeout reached; returning partial results"
            );
            break;
        }

        let matches = search_table(&conn, info, table, params, matcher)?;
        if !matches.is_empty() {
            total += matches.len();
            if matches.len() >= params.max_results_per_table {
                truncated = true;
            }
            results.insert(table.name.clone(), matches);
        }

        progress(SearchProgress {
            database: info.name.clone(),
            tables_done: table_index + 1,
            tables_total,
            databases_done: db_index,
            databases_total,
        });
    }

    if results.is_empty() {
        return Ok(None);
    }
    Ok(Some(DatabaseSearchResults {
        database: info.name.clone(),
        gui_tab_name: info.gui_tab_name.clone(),
        results,
        total_matches: total,
        truncated,
        search_time: db_started.elapsed(),
    }))
}

fn search_table(
    conn: &Connection,
    info: &EnhancedDatabaseInfo,
    table: &TableInfo,
    params: &SearchParameters,
    matcher: &TermMatcher,
) -> Result<Vec<SearchResult>, SearchError> {
    // Tables without detected timestamp columns fall back to the
    // unconstrained path: still searched, not time-filtered.
    let time_filtered = params.time_filtering_active() && table.supports_time_filtering;

    let (where_clause, bound) = if time_filtered {
        build_time_filter(
            &table.timestamp_columns,
            params.start_time,
            params.end_time,
        )
    } else {
        ("1=1".to_string(), Vec::new())
    };

    let sql = format!(
        "SELECT * FROM {table} WHERE ({where_clause}) LIMIT {limit}",
        table = quote_ident(&table.name),
        limit = params.max_results_per_table * PREFILTER_FACTOR,
    );
    debug!(table = %table.name, time_filtered, "table pre-filter query");

    let mut stmt = conn.prepare(&sql)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(bound.iter()))?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut values: Vec<Value> = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            values.push(row.get::<_, Value>(i)?);
        }

        let Some(result) = filter_row(info, table, params, matcher, &column_names, &values)
        else {
            continue;
        };
        out.push(result);
        if out.len() >= params.max_results_per_table {
            break;
        }
    }
    Ok(out)
}

/// In-memory post-filter: term matching over every column's rendering,
/// then the authoritative timestamp re-parse against the window.
fn filter_row(
    info: &EnhancedDatabaseInfo,
    table: &TableInfo,
    params: &SearchParameters,
    matcher: &TermMatcher,
    column_names: &[String],
    values: &[Value],
) -> Option<SearchResult> {
    let mut matched_columns = Vec::new();
    for (name, value) in column_names.iter().zip(values) {
        let rendered = render_value(value);
        if !rendered.is_empty() && matcher.matches(&rendered) {
            matched_columns.push(name.clone());
        }
    }
    if matched_columns.is_empty() {
        return None;
    }

    let mut matched_timestamps = Vec::new();
    if params.time_filtering_active() && table.supports_time_filtering {
        for ts_col in &table.timestamp_columns {
            let Some(index) = column_names.iter().position(|c| c == &ts_col.name) else {
                continue;
            };
            let value = &values[index];
            let Some(parsed) = parse_value(&as_sql_value(value)) else {
                continue;
            };
            if let Some(start) = params.start_time {
                if parsed < start {
                    continue;
                }
            }
            if let Some(end) = params.end_time {
                if parsed > end {
                    continue;
                }
            }
            matched_timestamps.push(TimestampMatch {
                column_name: ts_col.name.clone(),
                original_value: render_value(value),
                parsed_value: parsed,
                formatted: parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
                format_type: ts_col.format,
            });
        }
        // String-level SQL comparison can pass rows the window excludes;
        // the re-parse is the filter of record.
        if matched_timestamps.is_empty() {
            return None;
        }
    }

    let mut row_data = BTreeMap::new();
    for (name, value) in column_names.iter().zip(values) {
        row_data.insert(name.clone(), render_value(value));
    }
    let row_id = row_id_of(column_names, values);

    Some(SearchResult {
        database: info.name.clone(),
        table: table.name.clone(),
        row_id,
        matched_columns,
        row_data,
        matched_timestamps,
    })
}

/// Time pre-filter: per column, AND-combined bounds; columns OR-combined.
/// Comparison values are bound parameters typed per the detected format.
fn build_time_filter(
    columns: &[TimestampColumnInfo],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut bound = Vec::new();

    for column in columns {
        let Some(render) = bound_value_renderer(column.format) else {
            // SYSTEMTIME blobs cannot be range-compared in SQL; the
            // post-filter still applies the window.
            continue;
        };
        let mut parts = Vec::new();
        if let Some(start) = start {
            parts.push(format!("{} >= ?", quote_ident(&column.name)));
            bound.push(render(start));
        }
        if let Some(end) = end {
            parts.push(format!("{} <= ?", quote_ident(&column.name)));
            bound.push(render(end));
        }
        if !parts.is_empty() {
            clauses.push(format!("({})", parts.join(" AND ")));
        }
    }

    if clauses.is_empty() {
        ("1=1".to_string(), Vec::new())
    } else {
        (clauses.join(" OR "), bound)
    }
}

fn bound_value_renderer(format: TimestampFormat) -> Option<fn(DateTime<Utc>) -> Value> {
    match format {
        TimestampFormat::Iso8601
        | TimestampFormat::StandardDateTime
        | TimestampFormat::Mixed
        | TimestampFormat::Unknown => {
            Some(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
        }
        TimestampFormat::Unix => Some(|dt| Value::Integer(dt.timestamp())),
        TimestampFormat::UnixMillis => Some(|dt| Value::Integer(dt.timestamp_millis())),
        TimestampFormat::FileTime => {
            Some(|dt| Value::Integer((dt.timestamp() + EPOCH_DELTA_SECS) * 10_000_000))
        }
        TimestampFormat::SystemTime => None,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

fn as_sql_value(value: &Value) -> SqlValue<'_> {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(t) => SqlValue::Text(t),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}

fn row_id_of(column_names: &[String], values: &[Value]) -> Option<i64> {
    for candidate in ["id", "rowid", "ID", "ROWID", "_rowid_"] {
        if let Some(index) = column_names.iter().position(|c| c == candidate) {
            if let Value::Integer(i) = values[index] {
                return Some(i);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as RawConnection;
    use tempfile::tempdir;

    /// Case with a USN store (`logs`-like journal_events table) and a
    /// prefetch store without timestamp columns.
    fn build_case() -> tempfile::TempDir {
        let dir = tempdir().unwrap();

        let usn = RawConnection::open(dir.path().join("USN_journal.db")).unwrap();
        usn.execute_batch(
            "CREATE TABLE journal_events (
                 id INTEGER PRIMARY KEY,
                 filename TEXT,
                 reason TEXT,
                 timestamp TEXT
             );
             INSERT INTO journal_events (filename, reason, timestamp) VALUES
                 ('a.txt', 'FILE_CREATE | CLOSE',  '2024-01-15 08:00:00'),
                 ('b.txt', 'DATA_EXTEND',          '2024-03-15 09:30:00'),
                 ('c.txt', 'FILE_CREATE',          '2024-04-01 10:00:00'),
                 ('d.txt', 'FILE_CREATE',          '2024-06-20 11:00:00'),
                 ('e.txt', 'FILE_DELETE',          '2024-04-20 12:00:00');",
        )
        .unwrap();

        let pf = RawConnection::open(dir.path().join("prefetch_data.db")).unwrap();
        pf.execute_batch(
            "CREATE TABLE prefetch_files (
                 id INTEGER PRIMARY KEY,
                 executable TEXT,
                 run_count INTEGER
             );
             INSERT INTO prefetch_files (executable, run_count) VALUES
                 ('FILE_CREATE_TOOL.EXE', 3),
                 ('OTHER.EXE', 9);",
        )
        .unwrap();

        dir
    }

    fn window(start: &str, end: &str) -> (DateTime<Utc>, DateTime<Utc>) {
        let parse = |s: &str| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        };
        (parse(start), parse(end))
    }

    fn run(params: &SearchParameters, dir: &Path) -> SearchReport {
        run_search(
            dir,
            params,
            &DetectorConfig::default(),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap()
    }

    #[test]
    fn time_filtered_term_search_returns_exact_rows() {
        let case = build_case();
        let mut params =
            SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        let (start, end) = window("2024-03-01", "2024-05-01");
        params.start_time = Some(start);
        params.end_time = Some(end);

        let report = run(&params, case.path());
        assert_eq!(report.total_matches, 1);
        let db = &report.databases[0];
        let rows = &db.results["journal_events"];
        assert_eq!(rows.len(), 1);

        let result = &rows[0];
        // Only c.txt matches both the term and the window.
        assert_eq!(result.row_data["filename"], "c.txt");
        assert!(result.matched_columns.contains(&"reason".to_string()));
        assert_eq!(result.matched_timestamps.len(), 1);
        let ts = &result.matched_timestamps[0];
        assert_eq!(ts.column_name, "timestamp");
        assert_eq!(ts.format_type.name(), "StandardDateTime");
        assert!(ts.parsed_value >= start && ts.parsed_value <= end);
    }

    #[test]
    fn term_only_search_spans_all_rows() {
        let case = build_case();
        let params = SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        let report = run(&params, case.path());
        assert_eq!(report.total_matches, 3);
    }

    #[test]
    fn search_result_containment_invariant() {
        let case = build_case();
        let params = SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        let report = run(&params, case.path());
        for db in &report.databases {
            for rows in db.results.values() {
                for result in rows {
                    for column in &result.matched_columns {
                        let value = &result.row_data[column];
                        assert!(
                            value.to_lowercase().contains("file_create"),
                            "column {column} does not contain the term: {value}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn tables_without_timestamps_are_searched_unconstrained() {
        let case = build_case();
        let mut params = SearchParameters::new(
            "FILE_CREATE",
            vec!["usn_data.db".to_string(), "prefetch_data.db".to_string()],
        );
        let (start, end) = window("2024-03-01", "2024-05-01");
        params.start_time = Some(start);
        params.end_time = Some(end);

        let report = run(&params, case.path());
        // prefetch has no timestamp columns: its match is kept without
        // window constraints and without timestamp metadata.
        let prefetch = report
            .databases
            .iter()
            .find(|d| d.database == "prefetch_data.db")
            .expect("prefetch results present");
        let rows = &prefetch.results["prefetch_files"];
        assert_eq!(rows.len(), 1);
        assert!(rows[0].matched_timestamps.is_empty());
        assert_eq!(rows[0].row_id, Some(1));
    }

    #[test]
    fn empty_database_selection_is_empty_success() {
        let case = build_case();
        let params = SearchParameters::new("anything", Vec::new());
        let report = run(&params, case.path());
        assert_eq!(report.total_matches, 0);
        assert!(report.databases.is_empty());
        assert!(!report.cancelled);
    }

    #[test]
    fn cancelled_before_start_returns_cancelled_report() {
        let case = build_case();
        let params = SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = run_search(
            case.path(),
            &params,
            &DetectorConfig::default(),
            &cancel,
            |_| {},
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.total_matches, 0);
    }

    #[test]
    fn per_table_cap_sets_truncation() {
        let case = build_case();
        let mut params = SearchParameters::new("txt", vec!["usn_data.db".to_string()]);
        params.max_results_per_table = 2;
        let report = run(&params, case.path());
        let db = &report.databases[0];
        assert!(db.truncated);
        assert_eq!(db.results["journal_events"].len(), 2);
    }

    #[test]
    fn regex_search_matches_alternation() {
        let case = build_case();
        let mut params = SearchParameters::new(
            r"FILE_(CREATE|DELETE)",
            vec!["usn_data.db".to_string()],
        );
        params.use_regex = true;
        let report = run(&params, case.path());
        assert_eq!(report.total_matches, 4);
    }

    #[test]
    fn explicit_table_selection_limits_scope() {
        let case = build_case();
        let mut params = SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        params
            .tables
            .insert("usn_data.db".to_string(), vec!["missing_table".to_string()]);
        let report = run(&params, case.path());
        assert_eq!(report.total_matches, 0);
    }

    #[test]
    fn progress_reports_between_tables() {
        let case = build_case();
        let params = SearchParameters::new("FILE_CREATE", vec!["usn_data.db".to_string()]);
        let mut seen = Vec::new();
        run_search(
            case.path(),
            &params,
            &DetectorConfig::default(),
            &CancelToken::new(),
            |p| seen.push((p.database.clone(), p.tables_done, p.tables_total)),
        )
        .unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(db, _, _)| db == "usn_data.db"));
    }

    #[test]
    fn state_machine_transitions() {
        use SearchState::*;
        assert!(Idle.can_transition(Validating));
        assert!(Validating.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Cancelled));
        assert!(!Idle.can_transition(Completed));
        assert!(!Completed.can_transition(Running));
    }
}
