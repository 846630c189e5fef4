//! Search parameters, validation, and term matching.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::SearchError;

/// Longest accepted search term.
pub const MAX_TERM_LENGTH: usize = 1000;

/// Everything that defines one search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameters {
    pub term: String,
    /// Store names in the user's selection order; empty means nothing
    /// is searched.
    pub databases: Vec<String>,
    /// Optional per-store table selection; stores absent from the map
    /// search all tables.
    #[serde(default)]
    pub tables: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub exact_match: bool,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default = "default_result_cap")]
    pub max_results_per_table: usize,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

fn default_result_cap() -> usize {
    1000
}
fn default_timeout_s() -> u64 {
    60
}

impl SearchParameters {
    pub fn new(term: impl Into<String>, databases: Vec<String>) -> Self {
        SearchParameters {
            term: term.into(),
            databases,
            tables: HashMap::new(),
            case_sensitive: false,
            exact_match: false,
            use_regex: false,
            max_results_per_table: default_result_cap(),
            timeout_s: default_timeout_s(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn time_filtering_active(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    /// Validate and build the term matcher. Rejects empty and overlong
    /// terms, uncompilable regexes, and inverted time windows.
    pub fn validate(&self) -> Result<TermMatcher, SearchError> {
        if self.term.is_empty() {
            return Err(SearchError::EmptyTerm);
        }
        if self.term.chars().count() > MAX_TERM_LENGTH {
            return Err(SearchError::TermTooLong(MAX_TERM_LENGTH));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(SearchError::InvertedTimeWindow);
            }
        }
        TermMatcher::build(self)
    }
}

/// Compiled matcher for one search run.
#[derive(Debug, Clone)]
pub enum TermMatcher {
    Literal {
        term: String,
        case_sensitive: bool,
        exact: bool,
    },
    Pattern(Regex),
}

impl TermMatcher {
    fn build(params: &SearchParameters) -> Result<Self, SearchError> {
        if params.use_regex {
            let regex = RegexBuilder::new(&params.term)
                .case_insensitive(!params.case_sensitive)
                .build()
                .map_err(|err| SearchError::InvalidRegex(err.to_string()))?;
            Ok(TermMatcher::Pattern(regex))
        } else {
            Ok(TermMatcher::Literal {
                term: params.term.clone(),
                case_sensitive: params.case_sensitive,
                exact: params.exact_match,
            })
        }
    }

    /// Does this column value match the search term?
    pub fn matches(&self, value: &str) -> bool {
        match self {
            TermMatcher::Pattern(regex) => regex.is_match(value),
            TermMatcher::Literal {
                term,
                case_sensitive,
                exact,
            } => {
                if *case_sensitive {
                    if *exact {
                        value == term
                    } else {
                        value.contains(term.as_str())
                    }
                } else {
                    let value = value.to_lowercase();
                    let term = term.to_lowercase();
                    if *exact {
                        value == term
                    } else {
                        value.contains(&term)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> SearchParameters {
        SearchParameters::new("FILE_CREATE", vec!["usn_data.db".into()])
    }

    #[test]
    fn accepts_plain_term() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_empty_term() {
        let mut p = base();
        p.term = String::new();
        assert!(matches!(p.validate(), Err(SearchError::EmptyTerm)));
    }

    #[test]
    fn rejects_overlong_term() {
        let mut p = base();
        p.term = "x".repeat(1001);
        assert!(matches!(p.validate(), Err(SearchError::TermTooLong(_))));
    }

    #[test]
    fn rejects_bad_regex() {
        let mut p = base();
        p.use_regex = true;
        p.term = "[unclosed".into();
        assert!(matches!(p.validate(), Err(SearchError::InvalidRegex(_))));
    }

    #[test]
    fn rejects_inverted_window() {
        let mut p = base();
        p.start_time = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        p.end_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(matches!(p.validate(), Err(SearchError::InvertedTimeWindow)));
    }

    #[test]
    fn literal_matching_respects_flags() {
        let mut p = base();
        p.term = "Create".into();
        let m = p.validate().unwrap();
        assert!(m.matches("file_create event"));
        assert!(m.matches("Create"));

        p.case_sensitive = true;
        let m = p.validate().unwrap();
        assert!(!m.matches("file_create event"));
        assert!(m.matches("did Create file"));

        p.exact_match = true;
        let m = p.validate().unwrap();
        assert!(!m.matches("did Create file"));
        assert!(m.matches("Create"));
    }

    #[test]
    fn regex_matching() {
        let mut p = base();
        p.use_regex = true;
        p.term = r"FILE_(CREATE|DELETE)".into();
        let m = p.validate().unwrap();
        assert!(m.matches("reason: file_create"));

        p.case_sensitive = true;
        let m = p.validate().unwrap();
        assert!(!m.matches("reason: file_create"));
        assert!(m.matches("reason: FILE_DELETE"));
    }

    #[test]
    fn parameters_round_trip_as_json() {
        let mut p = base();
        p.start_time = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let json = serde_json::to_string(&p).unwrap();
        let back: SearchParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back.term, p.term);
        assert_eq!(back.start_time, p.start_time);
        assert_eq!(back.max_results_per_table, 1000);
    }
}
