//! Self-name exclusion for journal events.
//!
//! The engine's own store writes show up in the journal it is reading;
//! without this filter every pass would record its own database traffic
//! as host activity. Matching is case-insensitive substring plus the
//! SQLite sidecar suffixes.

/// Substring patterns always excluded, regardless of configuration.
const BUILTIN_PATTERNS: &[&str] = &[
    "usn_journal.db",
    "usn_journal.db-journal",
    "usn_journal.db-wal",
    "usn_journal.db-shm",
    "mft_claw_analysis.db",
    "mft_usn_correlated_analysis.db",
    ".db-journal",
    ".db-wal",
    ".db-shm",
];

const SIDECAR_SUFFIXES: &[&str] = &[".db-journal", ".db-wal", ".db-shm"];

/// Filter over journal file names, with a counter for reporting.
#[derive(Debug, Default)]
pub struct ExclusionFilter {
    extra_patterns: Vec<String>,
    excluded: u64,
}

impl ExclusionFilter {
    pub fn new(extra_patterns: impl IntoIterator<Item = String>) -> Self {
        ExclusionFilter {
            extra_patterns: extra_patterns
                .into_iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            excluded: 0,
        }
    }

    /// True when this event should be dropped; bumps the counter.
    pub fn check(&mut self, file_name: &str) -> bool {
        if self.matches(file_name) {
            self.excluded += 1;
            true
        } else {
            false
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        if file_name.is_empty() {
            return false;
        }
        let lower = file_name.to_ascii_lowercase();
        if BUILTIN_PATTERNS.iter().any(|p| lower.contains(p)) {
            return true;
        }
        if SIDECAR_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            return true;
        }
        self.extra_patterns.iter().any(|p| lower.contains(p))
    }

    pub fn excluded_count(&self) -> u64 {
        self.excluded
    }
}
