//! The catalog of artifact stores the engine knows how to find.
//!
//! Each logical store has a canonical filename, alternative filenames
//! produced by older collectors, and table-name signatures used to spot
//! the artifact inside a consolidated database.

/// One logical artifact store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSpec {
    /// Canonical filename, e.g. `mft_data.db`.
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    /// Presentation tab the GUI shell maps this store onto.
    pub gui_tab: &'static str,
    /// Alternative filenames that carry the same artifact.
    pub alt_names: &'static [&'static str],
    /// Table-name prefixes/substrings that identify the artifact inside
    /// a consolidated database.
    pub table_signatures: &'static [&'static str],
}

pub const CATALOG: &[StoreSpec] = &[
    StoreSpec {
        name: "mft_data.db",
        display_name: "MFT Records",
        category: "File System Evidence",
        gui_tab: "MFT",
        alt_names: &["mft_claw_analysis.db"],
        table_signatures: &["mft_", "mft_records"],
    },
    StoreSpec {
        name: "usn_data.db",
        display_name: "USN Journal",
        category: "File System Evidence",
        gui_tab: "USN Journal",
        alt_names: &["USN_journal.db"],
        table_signatures: &["usn_", "usn_journal", "journal_events"],
    },
    StoreSpec {
        name: "correlated_data.db",
        display_name: "MFT/USN Correlation",
        category: "File System Evidence",
        gui_tab: "MFT",
        alt_names: &["mft_usn_correlated_analysis.db"],
        table_signatures: &["mft_usn_correlated"],
    },
    StoreSpec {
        name: "prefetch_data.db",
        display_name: "Prefetch Files",
        category: "Execution Evidence",
        gui_tab: "Prefetch",
        alt_names: &[],
        table_signatures: &["prefetch", "prefetch_files"],
    },
    StoreSpec {
        name: "amcache_data.db",
        display_name: "AmCache",
        category: "Execution Evidence",
        gui_tab: "Amcache",
        alt_names: &["amcache.db", "Log_Claw.db"],
        table_signatures: &["amcache", "amcache_entries", "amcache_programs"],
    },
    StoreSpec {
        name: "shimcache_data.db",
        display_name: "ShimCache",
        category: "Execution Evidence",
        gui_tab: "ShimCache",
        alt_names: &["shimcache.db", "Log_Claw.db"],
        table_signatures: &["shimcache", "shim_cache", "appcompat"],
    },
    StoreSpec {
        name: "lnk_data.db",
        display_name: "LNK Files",
        category: "File System Evidence",
        gui_tab: "LNK/JL",
        alt_names: &["LnkDB.db", "Log_Claw.db"],
        table_signatures: &["lnk", "shortcut", "lnk_entries"],
    },
    StoreSpec {
        name: "jumplist_data.db",
        display_name: "Jump Lists",
        category: "Execution Evidence",
        gui_tab: "LNK/JL",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["jumplist", "jump_list", "dest_list"],
    },
    StoreSpec {
        name: "eventlog_data.db",
        display_name: "Event Logs",
        category: "System Information",
        gui_tab: "Event Logs",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["eventlog", "event_log", "windows_event"],
    },
    StoreSpec {
        name: "registry_data.db",
        display_name: "Registry Data",
        category: "Registry Evidence",
        gui_tab: "Registry",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["registry_", "reg_", "hive_"],
    },
    StoreSpec {
        name: "shellbags_data.db",
        display_name: "ShellBags",
        category: "Registry Evidence",
        gui_tab: "ShellBags",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["shellbags", "shell_bags"],
    },
    StoreSpec {
        name: "userassist_data.db",
        display_name: "UserAssist",
        category: "Registry Evidence",
        gui_tab: "UserAssist",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["userassist", "user_assist"],
    },
    StoreSpec {
        name: "muicache_data.db",
        display_name: "MUICache",
        category: "Registry Evidence",
        gui_tab: "MUICache",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["muicache"],
    },
    StoreSpec {
        name: "bam_dam_data.db",
        display_name: "BAM/DAM",
        category: "Execution Evidence",
        gui_tab: "BAM/DAM",
        alt_names: &["Log_Claw.db"],
        table_signatures: &["bam", "dam", "background_activity"],
    },
    StoreSpec {
        name: "recyclebin_data.db",
        display_name: "Recycle Bin",
        category: "File System Evidence",
        gui_tab: "Recycle Bin",
        alt_names: &["recyclebin_analysis.db"],
        table_signatures: &["recyclebin", "recycle_bin", "$recycle"],
    },
    StoreSpec {
        name: "srum_data.db",
        display_name: "SRUM Data",
        category: "System Resource Usage",
        gui_tab: "SRUM",
        alt_names: &["srum_dump.db"],
        table_signatures: &["srum_", "srum_application", "srum_network"],
    },
];

/// Resolve a store filename (canonical or alternative) to its GUI tab.
pub fn gui_tab_for(file_name: &str) -> Option<&'static str> {
    CATALOG
        .iter()
        .find(|spec| {
            spec.name.eq_ignore_ascii_case(file_name)
                || spec
                    .alt_names
                    .iter()
                    .any(|alt| alt.eq_ignore_ascii_case(file_name))
        })
        .map(|spec| spec.gui_tab)
}

/// Does any table name match this spec's signatures?
pub fn tables_match_signature(spec: &StoreSpec, table_names: &[String]) -> bool {
    spec.table_signatures.iter().any(|sig| {
        table_names
            .iter()
            .any(|name| name.starts_with(sig) || name.contains(sig))
    })
}
