use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use console::style;
use core_types::config::{load_config, AppConfig};
use core_types::VolumeId;
use service::SearchSignal;
use unified_search::SearchParameters;

/// Crow Eye command-line client: volume passes and store search for
/// scripted and interactive use.
#[derive(Parser, Debug)]
#[command(name = "crow-eye", version, about = "Crow Eye artifact engine")]
struct Cli {
    /// Case directory (defaults to CROW_EYE_CASE_DIR or the working
    /// directory's crow_eye.toml).
    #[arg(long)]
    case: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a volume's MFT into the case stores.
    Mft {
        /// Drive letter, e.g. C or C:.
        volume: String,
    },

    /// Drain a volume's USN change journal into the case stores.
    Usn {
        /// Drive letter, e.g. C or C:.
        volume: String,
    },

    /// Correlate a volume's MFT and USN stores.
    Correlate {
        /// Drive letter, e.g. C or C:.
        volume: String,
    },

    /// Summarize the correlated store.
    Report {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Discover artifact stores and their timestamp metadata.
    Discover {
        /// Re-analyze instead of using cached metadata.
        #[arg(long)]
        force_refresh: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search across the case's artifact stores.
    Search {
        /// Search term (literal, or regex with --regex).
        term: String,
        /// Store names to search; all accessible stores when omitted.
        #[arg(long, num_args = 0..)]
        database: Vec<String>,
        /// Case-sensitive matching.
        #[arg(long)]
        case_sensitive: bool,
        /// Whole-value matches only.
        #[arg(long)]
        exact: bool,
        /// Interpret the term as a regular expression.
        #[arg(long)]
        regex: bool,
        /// Window start, YYYY-MM-DD.
        #[arg(long)]
        start: Option<String>,
        /// Window end, YYYY-MM-DD.
        #[arg(long)]
        end: Option<String>,
        /// Per-table result cap.
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.case.as_ref().map(|case| case.join("crow_eye.toml"));
    let mut config = load_config(config_path.as_deref())?;
    if let Some(case) = &cli.case {
        config.case_dir = case.display().to_string();
    }

    let _log_guard = service::init_tracing_with_case(&config.artifacts_dir())?;

    match cli.command {
        Commands::Mft { volume } => run_mft(&config, &volume),
        Commands::Usn { volume } => run_usn(&config, &volume),
        Commands::Correlate { volume } => {
            let volume: VolumeId = volume.parse().map_err(anyhow::Error::msg)?;
            let stats = service::run_correlation(volume, &config)?;
            println!("{}", style("Correlation finished:").green());
            println!("  MFT rows:          {}", stats.mft_rows);
            println!("  Correlated rows:   {}", stats.correlated_rows);
            println!("  Rows with USN:     {}", stats.rows_with_usn);
            println!("  Filename changes:  {}", stats.filename_changes);
            Ok(())
        }
        Commands::Report { json } => {
            let report = service::correlation_report(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("{}", style("Correlation summary:").green());
            println!("  Correlated rows:      {}", report.total_rows);
            println!("  Unique records:       {}", report.unique_records);
            println!("  Deleted records:      {}", report.deleted_records);
            println!("  Rows with USN event:  {}", report.rows_with_usn);
            println!("  Unknown-parent rows:  {}", report.unknown_parent_rows);
            println!("  Filename changes:     {}", report.filename_changes);
            println!("  Multi-name records:   {}", report.multi_name_records);
            if !report.hot_files.is_empty() {
                println!("{}", style("Most touched files:").yellow());
                for hot in &report.hot_files {
                    println!("  {} ({}): {} rows", hot.filename, hot.path, hot.row_count);
                }
            }
            if !report.rename_hotspots.is_empty() {
                println!("{}", style("Most renamed records:").yellow());
                for spot in &report.rename_hotspots {
                    println!(
                        "  MFT record {}: {} name changes",
                        spot.record_number, spot.rename_count
                    );
                }
            }
            Ok(())
        }
        Commands::Discover { force_refresh, json } => {
            let databases = service::discover(&config, force_refresh)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&databases)?);
                return Ok(());
            }
            println!("{}", style("Discovered stores:").green());
            for db in &databases {
                let status = if db.accessible {
                    style("ok").green()
                } else if db.exists {
                    style("unreadable").red()
                } else {
                    style("missing").dim()
                };
                println!(
                    "  {:<22} [{:>10}] {} tables, time-filterable: {}",
                    db.name,
                    status,
                    db.tables.len(),
                    db.supports_time_filtering()
                );
            }
            Ok(())
        }
        Commands::Search {
            term,
            database,
            case_sensitive,
            exact,
            regex,
            start,
            end,
            limit,
            json,
        } => {
            let databases = if database.is_empty() {
                service::discover(&config, false)?
                    .into_iter()
                    .filter(|d| d.accessible)
                    .map(|d| d.name)
                    .collect()
            } else {
                database
            };

            let mut params = SearchParameters::new(term, databases);
            params.case_sensitive = case_sensitive;
            params.exact_match = exact;
            params.use_regex = regex;
            params.max_results_per_table = limit;
            params.timeout_s = config.search.timeout_s;
            params.start_time = start.as_deref().map(parse_day).transpose()?;
            params.end_time = end.as_deref().map(parse_day_end).transpose()?;

            let mut session = service::search_session(&config);
            let rx = session.start(params)?;

            let spinner = indicatif::ProgressBar::new_spinner();
            spinner.set_message("searching...");

            let mut reports = Vec::new();
            for signal in rx {
                match signal {
                    SearchSignal::Progress(p) => {
                        spinner.set_message(format!(
                            "{} ({}/{} tables)",
                            p.database, p.tables_done, p.tables_total
                        ));
                        spinner.tick();
                    }
                    SearchSignal::Completed(report) => reports.push(report),
                    SearchSignal::Cancelled(report) => {
                        spinner.finish_and_clear();
                        eprintln!("{}", style("Search cancelled; partial results.").yellow());
                        reports.push(report);
                    }
                    SearchSignal::Error(message) => {
                        spinner.finish_and_clear();
                        anyhow::bail!("search failed: {message}");
                    }
                }
            }
            spinner.finish_and_clear();

            let Some(report) = reports.pop() else {
                anyhow::bail!("search worker ended without a result");
            };
            print_report(&report, json)
        }
    }
}

#[cfg(windows)]
fn run_mft(config: &AppConfig, volume: &str) -> Result<()> {
    use std::sync::atomic::AtomicBool;

    let volume: VolumeId = volume.parse().map_err(anyhow::Error::msg)?;
    let bar = indicatif::ProgressBar::new_spinner();
    let stats = service::parse_volume(volume, config, &AtomicBool::new(false), |n| {
        bar.set_message(format!("{n} records"));
        bar.tick();
    })?;
    bar.finish_and_clear();
    println!("{}", style("MFT pass finished:").green());
    println!("  Parsed:    {}", stats.records_parsed);
    println!("  Skipped:   {}", stats.records_skipped);
    println!("  Inserted:  {}", stats.records_inserted);
    println!("  Slack:     {}", stats.slack_candidates);
    Ok(())
}

#[cfg(windows)]
fn run_usn(config: &AppConfig, volume: &str) -> Result<()> {
    let volume: VolumeId = volume.parse().map_err(anyhow::Error::msg)?;
    let stats = service::run_usn(volume, config)?;
    println!("{}", style("USN pass finished:").green());
    println!("  Inserted:    {}", stats.events_inserted);
    println!("  Duplicates:  {}", stats.duplicates_dropped);
    println!("  Excluded:    {}", stats.events_excluded);
    println!("  Gaps:        {}", stats.gaps_recorded);
    Ok(())
}

#[cfg(not(windows))]
fn run_mft(_config: &AppConfig, _volume: &str) -> Result<()> {
    anyhow::bail!("raw volume access requires Windows; parse and search existing stores instead")
}

#[cfg(not(windows))]
fn run_usn(_config: &AppConfig, _volume: &str) -> Result<()> {
    anyhow::bail!("the USN change journal requires Windows")
}

fn parse_day(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    Ok(date.and_hms_opt(0, 0, 0).expect("midnight").and_utc())
}

fn parse_day_end(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    Ok(date.and_hms_opt(23, 59, 59).expect("end of day").and_utc())
}

fn print_report(report: &unified_search::SearchReport, json: bool) -> Result<()> {
    if json {
        // Rows render as plain maps; the report structs themselves stay
        // serialization-free.
        let value = serde_json::json!({
            "total_matches": report.total_matches,
            "elapsed_ms": report.elapsed.as_millis() as u64,
            "cancelled": report.cancelled,
            "databases": report.databases.iter().map(|db| {
                serde_json::json!({
                    "database": db.database,
                    "gui_tab": db.gui_tab_name,
                    "total_matches": db.total_matches,
                    "truncated": db.truncated,
                    "tables": db.results.iter().map(|(table, rows)| {
                        serde_json::json!({
                            "table": table,
                            "rows": rows.iter().map(|r| serde_json::json!({
                                "row_id": r.row_id,
                                "matched_columns": r.matched_columns,
                                "data": r.row_data,
                            })).collect::<Vec<_>>(),
                        })
                    }).collect::<Vec<_>>(),
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for db in &report.databases {
        println!(
            "{}",
            style(format!(
                "{}: {} matches{}",
                db.database,
                db.total_matches,
                if db.truncated { " (truncated)" } else { "" }
            ))
            .green()
        );
        for (table, rows) in &db.results {
            println!("  {}", style(table).yellow());
            for row in rows {
                let columns = row.matched_columns.join(", ");
                let preview: Vec<String> = row
                    .matched_columns
                    .iter()
                    .filter_map(|c| row.row_data.get(c))
                    .map(|v| v.chars().take(60).collect())
                    .collect();
                println!("    [{columns}] {}", preview.join(" | "));
                for ts in &row.matched_timestamps {
                    println!(
                        "      {} = {} ({})",
                        ts.column_name,
                        ts.formatted,
                        ts.format_type.name()
                    );
                }
            }
        }
    }
    println!(
        "{}",
        style(format!(
            "Total {} matches in {} stores, took {}ms",
            report.total_matches,
            report.databases.len(),
            report.elapsed.as_millis()
        ))
        .dim()
    );
    Ok(())
}
