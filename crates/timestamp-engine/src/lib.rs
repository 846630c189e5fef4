//! Timestamp parsing and column detection.
//!
//! The parser is format-detecting and idempotent: any cell value a store
//! can hold (text, integer, real, blob) either resolves to a UTC
//! datetime or to "no time" (`None`), never to an error. The detector
//! layers column-name heuristics and data sampling on top to decide
//! which columns of a table carry timestamps and in which format.

mod detector;
mod parser;

pub use detector::{
    analyze_column, column_name_looks_temporal, detect_table_columns, DetectorConfig,
    TimestampColumnInfo,
};
pub use parser::{detect_format, parse_value, SqlValue, TimestampFormat};
