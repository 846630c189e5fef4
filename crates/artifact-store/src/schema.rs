//! DDL for every artifact store.

use rusqlite::Connection;
use rusqlite::Result;

pub const MFT_DB: &str = "mft_claw_analysis.db";
pub const USN_DB: &str = "USN_journal.db";
pub const CORRELATED_DB: &str = "mft_usn_correlated_analysis.db";

/// MFT store: the main records table plus one child table per attribute
/// family, all keyed by `(record_number, volume_letter)`.
pub fn create_mft_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS mft_records (
            record_number INTEGER,
            file_name TEXT,
            volume_letter TEXT,
            extension TEXT,
            file_size INTEGER,
            in_use INTEGER,
            is_directory INTEGER,
            flags INTEGER,
            mft_sequence_number INTEGER,
            has_ads INTEGER DEFAULT 0,
            ads_count INTEGER DEFAULT 0,
            created_time TIMESTAMP,
            modified_time TIMESTAMP,
            accessed_time TIMESTAMP,
            mft_modified_time TIMESTAMP,
            file_attributes INTEGER,
            PRIMARY KEY (record_number, volume_letter)
        );

        CREATE TABLE IF NOT EXISTS mft_standard_info (
            record_number INTEGER,
            file_name TEXT,
            volume_letter TEXT,
            created TIMESTAMP,
            modified TIMESTAMP,
            accessed TIMESTAMP,
            mft_modified TIMESTAMP,
            flags INTEGER,
            max_versions INTEGER,
            version_number INTEGER,
            class_id INTEGER,
            owner_id INTEGER,
            security_id INTEGER,
            quota_charged INTEGER,
            usn INTEGER,
            FOREIGN KEY(record_number, volume_letter)
                REFERENCES mft_records(record_number, volume_letter)
        );

        CREATE TABLE IF NOT EXISTS mft_file_names (
            record_number INTEGER,
            file_name TEXT,
            volume_letter TEXT,
            parent_record INTEGER,
            parent_sequence INTEGER,
            parent_sequence_raw INTEGER,
            namespace INTEGER,
            created TIMESTAMP,
            modified TIMESTAMP,
            accessed TIMESTAMP,
            mft_modified TIMESTAMP,
            allocated_size INTEGER,
            real_size INTEGER,
            flags INTEGER,
            FOREIGN KEY(record_number, volume_letter)
                REFERENCES mft_records(record_number, volume_letter)
        );

        CREATE TABLE IF NOT EXISTS mft_data_attributes (
            record_number INTEGER,
            file_name TEXT,
            volume_letter TEXT,
            attribute_name TEXT,
            resident INTEGER,
            size INTEGER,
            FOREIGN KEY (record_number, volume_letter)
                REFERENCES mft_records(record_number, volume_letter)
        );

        CREATE TABLE IF NOT EXISTS filename_changes (
            record_number INTEGER,
            old_filename TEXT,
            new_filename TEXT,
            change_timestamp TEXT,
            namespace INTEGER,
            volume_letter TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_mft_records_filename
            ON mft_records(file_name);
        CREATE INDEX IF NOT EXISTS idx_mft_records_extension
            ON mft_records(extension);
        CREATE INDEX IF NOT EXISTS idx_mft_filenames_parent
            ON mft_file_names(parent_record);
        "#,
    )
}

/// USN store: journal events keyed by `(volume_letter, usn)` plus the
/// wrap-gap table.
pub fn create_usn_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS journal_events (
            volume_letter TEXT,
            filename TEXT,
            usn INTEGER,
            major_version INTEGER,
            frn TEXT,
            parent_frn TEXT,
            timestamp TEXT,
            reason TEXT,
            source_info TEXT,
            security_id INTEGER,
            file_attributes TEXT,
            record_length INTEGER,
            inserted_at TEXT,
            PRIMARY KEY (volume_letter, usn)
        );

        CREATE TABLE IF NOT EXISTS deleted_entries (
            volume_letter TEXT,
            gap_start_usn INTEGER,
            gap_end_usn INTEGER,
            gap_size INTEGER,
            detection_timestamp TEXT,
            last_known_usn INTEGER,
            next_valid_usn INTEGER,
            forensic_significance TEXT,
            potential_activity TEXT,
            inserted_at TEXT,
            PRIMARY KEY (volume_letter, gap_start_usn)
        );

        CREATE INDEX IF NOT EXISTS idx_journal_volume
            ON journal_events (volume_letter, usn);
        CREATE INDEX IF NOT EXISTS idx_journal_frn
            ON journal_events (volume_letter, frn);
        CREATE INDEX IF NOT EXISTS idx_journal_timestamp
            ON journal_events (timestamp);
        CREATE INDEX IF NOT EXISTS idx_deleted_volume
            ON deleted_entries (volume_letter, gap_start_usn);
        CREATE INDEX IF NOT EXISTS idx_deleted_timestamp
            ON deleted_entries (detection_timestamp);
        CREATE INDEX IF NOT EXISTS idx_deleted_gap_size
            ON deleted_entries (gap_size);
        "#,
    )
}

/// Correlated store: the MFT↔USN join target.
pub fn create_correlated_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS mft_usn_correlated (
            mft_record_number INTEGER,
            fn_filename TEXT,
            mft_sequence_number INTEGER,
            mft_flags TEXT,
            is_directory INTEGER,
            is_deleted INTEGER,

            si_creation_time TEXT,
            si_modification_time TEXT,
            si_access_time TEXT,
            si_mft_entry_change_time TEXT,
            si_file_attributes TEXT,

            fn_parent_record_number INTEGER,
            fn_parent_sequence_number INTEGER,
            fn_namespace TEXT,
            fn_creation_time TEXT,
            fn_modification_time TEXT,
            fn_access_time TEXT,
            fn_mft_entry_change_time TEXT,
            fn_allocated_size INTEGER,
            fn_real_size INTEGER,
            fn_file_attributes TEXT,

            reconstructed_path TEXT,

            usn_event_id INTEGER,
            usn_timestamp TEXT,
            usn_reason TEXT,
            usn_source_info TEXT,
            usn_file_attributes TEXT,

            has_mft_record INTEGER,
            has_usn_event INTEGER,
            correlation_confidence TEXT,

            filename_change_timeline TEXT,
            namespace_evolution TEXT,

            created_at TEXT DEFAULT CURRENT_TIMESTAMP,

            UNIQUE(mft_record_number, fn_filename, usn_event_id, usn_timestamp)
        );

        CREATE INDEX IF NOT EXISTS idx_corr_mft_record
            ON mft_usn_correlated(mft_record_number);
        CREATE INDEX IF NOT EXISTS idx_corr_filename
            ON mft_usn_correlated(fn_filename);
        CREATE INDEX IF NOT EXISTS idx_corr_path
            ON mft_usn_correlated(reconstructed_path);
        "#,
    )
}
