//! Timestamp-column detection over live store tables.
//!
//! Column names are screened first (include patterns minus an exclude
//! list of duration/counter shapes), then up to N non-null values are
//! sampled: a column qualifies when at least the threshold share parses
//! and resolves to a plausible year. The column's format is the dominant
//! parse format, or `Mixed` when no format reaches an 80% share.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::RegexSet;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parser::{detect_format, parse_value, SqlValue, TimestampFormat};

/// Years outside this window mean the parse was a coincidence, not a
/// timestamp.
const MIN_PLAUSIBLE_YEAR: i32 = 1990;
const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// Share a single format must reach before it is declared dominant.
const DOMINANT_FORMAT_SHARE: f32 = 0.80;

/// Sample values retained on the column info for display.
const SAMPLE_KEEP: usize = 10;

static INCLUDE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^.*timestamp.*$",
        r"(?i)^.*_time$",
        r"(?i)^.*_date$",
        r"(?i)^time_.*$",
        r"(?i)^date_.*$",
        r"(?i)^.*created.*$",
        r"(?i)^.*modified.*$",
        r"(?i)^.*accessed.*$",
        r"(?i)^.*updated.*$",
        r"(?i)^last_.*$",
        r"(?i)^first_.*$",
        r"(?i)^.*_when$",
        r"(?i)^when_.*$",
        r"(?i)^.*expire.*$",
        r"(?i)^.*birth.*$",
        r"(?i)^.*write_time.*$",
        r"(?i)^.*read_time.*$",
        r"(?i)^.*change_time.*$",
    ])
    .expect("static regex set")
});

static EXCLUDE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i).*cycle_time.*",
        r"(?i).*execution_time.*",
        r"(?i).*duration.*",
        r"(?i).*elapsed.*",
        r"(?i).*timeout.*",
        r"(?i).*lifetime.*",
        r"(?i).*uptime.*",
        r"(?i).*bytes.*",
        r"(?i).*num_.*",
        r"(?i).*count.*",
        r"(?i).*operations.*",
    ])
    .expect("static regex set")
});

/// Per-column detection result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampColumnInfo {
    pub name: String,
    pub format: TimestampFormat,
    pub parse_success_rate: f32,
    pub sample_values: Vec<String>,
}

/// Sampling knobs, drawn from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub sample_size: usize,
    pub success_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            success_threshold: 0.80,
        }
    }
}

/// Name-level screen: include patterns minus the exclude list.
pub fn column_name_looks_temporal(name: &str) -> bool {
    if EXCLUDE_PATTERNS.is_match(name) {
        return false;
    }
    INCLUDE_PATTERNS.is_match(name)
}

/// Double-quote an identifier for direct inclusion in SQL. Identifiers
/// cannot be bound as parameters; values always are.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Sample a column and decide whether it holds timestamps.
pub fn analyze_column(
    conn: &Connection,
    table: &str,
    column: &str,
    config: &DetectorConfig,
) -> Option<TimestampColumnInfo> {
    let sql = format!(
        "SELECT {col} FROM {table} WHERE {col} IS NOT NULL LIMIT {limit}",
        col = quote_ident(column),
        table = quote_ident(table),
        limit = config.sample_size,
    );
    let mut stmt = conn.prepare(&sql).ok()?;
    let mut rows = stmt.query([]).ok()?;

    let mut total = 0usize;
    let mut parsed = 0usize;
    let mut samples: Vec<String> = Vec::new();
    let mut format_counts: Vec<(TimestampFormat, usize)> = Vec::new();

    while let Ok(Some(row)) = rows.next() {
        let value_ref = row.get_ref(0).ok()?;
        let value = SqlValue::from(value_ref);
        total += 1;
        if samples.len() < SAMPLE_KEEP {
            samples.push(render_sample(&value));
        }
        if let Some(dt) = parse_value(&value) {
            let year = dt.year();
            if (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(&year) {
                parsed += 1;
                if let Some(format) = detect_format(&value) {
                    match format_counts.iter_mut().find(|(f, _)| *f == format) {
                        Some((_, count)) => *count += 1,
                        None => format_counts.push((format, 1)),
                    }
                }
            }
        }
    }

    if total == 0 {
        return None;
    }
    let success_rate = parsed as f32 / total as f32;
    if success_rate < config.success_threshold {
        debug!(
            table,
            column,
            success_rate,
            "column failed the timestamp sampling gate"
        );
        return None;
    }

    let format = elect_format(&format_counts, parsed);
    Some(TimestampColumnInfo {
        name: column.to_string(),
        format,
        parse_success_rate: success_rate,
        sample_values: samples,
    })
}

fn elect_format(counts: &[(TimestampFormat, usize)], parsed: usize) -> TimestampFormat {
    if parsed == 0 || counts.is_empty() {
        return TimestampFormat::Unknown;
    }
    let (dominant, dominant_count) = counts
        .iter()
        .max_by_key(|(_, count)| *count)
        .copied()
        .expect("non-empty counts");
    if counts.len() == 1 {
        return dominant;
    }
    if dominant_count as f32 / parsed as f32 >= DOMINANT_FORMAT_SHARE {
        dominant
    } else {
        TimestampFormat::Mixed
    }
}

fn render_sample(value: &SqlValue<'_>) -> String {
    let rendered = match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(t) => (*t).to_string(),
        SqlValue::Blob(b) => format!("<blob {} bytes>", b.len()),
    };
    rendered.chars().take(100).collect()
}

/// Detect every timestamp column of a table. Name screening gates which
/// columns get sampled; sampling makes the final call.
pub fn detect_table_columns(
    conn: &Connection,
    table: &str,
    columns: &[String],
    config: &DetectorConfig,
) -> Vec<TimestampColumnInfo> {
    columns
        .iter()
        .filter(|name| column_name_looks_temporal(name))
        .filter_map(|name| analyze_column(conn, table, name, config))
        .collect()
}
