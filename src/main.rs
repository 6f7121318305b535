use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use hrrs::batch::{BatchConfig, BatchProcessor};
use hrrs::config::DetectionConfig;
use hrrs::detector;
use hrrs::export;
use hrrs::import::CsvImporter;
use hrrs::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use hrrs::models::{QualityStatus, RecoveryInterval};

/// hrrs - Heart Rate Recovery Analysis CLI
///
/// Detects and grades heart-rate-recovery intervals in recorded workout
/// sessions: peak finding, descent tracking, exponential decay fitting and
/// quality gating.
#[derive(Parser)]
#[command(name = "hrrs")]
#[command(version = "0.1.0")]
#[command(about = "Heart Rate Recovery Analysis CLI", long_about = None)]
struct Cli {
    /// Sets a custom detection config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format (pretty, json, compact)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect recovery intervals in a single session file
    Analyze {
        /// Input session file (CSV)
        file: PathBuf,

        /// Write detected intervals to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (json, csv)
        #[arg(short = 'f', long, default_value = "json")]
        format: String,

        /// Include displayed rejections in the output file
        #[arg(long)]
        include_rejected: bool,
    },

    /// Run detection over every CSV file in a directory
    Batch {
        /// Directory holding session files
        dir: PathBuf,

        /// Write all detected intervals to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (json, csv)
        #[arg(short = 'f', long, default_value = "json")]
        format: String,

        /// Number of worker threads (default: all cores)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Manage detection configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,

        /// Print the active configuration
        #[arg(long)]
        show: bool,
    },
}

/// One terminal-table row per interval
#[derive(Tabled)]
struct IntervalRow {
    #[tabled(rename = "Start (s)")]
    start: String,
    #[tabled(rename = "Duration (s)")]
    duration: String,
    #[tabled(rename = "Peak")]
    peak: String,
    #[tabled(rename = "Nadir")]
    nadir: String,
    #[tabled(rename = "HRR60")]
    hrr60: String,
    #[tabled(rename = "Tau")]
    tau: String,
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

impl From<&RecoveryInterval> for IntervalRow {
    fn from(interval: &RecoveryInterval) -> Self {
        let status = match interval.quality_status {
            QualityStatus::Pass => "pass".green().to_string(),
            QualityStatus::Flagged => "flagged".yellow().to_string(),
            QualityStatus::Rejected => "rejected".red().to_string(),
        };
        let notes = interval
            .auto_reject_reason
            .clone()
            .unwrap_or_else(|| interval.flags.join("; "));

        IntervalRow {
            start: format!("{:.0}", interval.start_seconds),
            duration: format!("{:.0}", interval.duration_seconds),
            peak: format!("{:.0}", interval.peak_hr),
            nadir: format!("{:.0}", interval.nadir_hr),
            hrr60: interval
                .hrr_at_horizon
                .get(&60)
                .map_or_else(|| "-".to_string(), |v| format!("{:.0}", v)),
            tau: interval
                .tau
                .map_or_else(|| "-".to_string(), |t| format!("{:.1}", t)),
            horizon: interval
                .accepted_horizon
                .map_or_else(|| "-".to_string(), |h| h.to_string()),
            status,
            notes,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LogLevel::Warn,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&LogConfig {
        level: log_level,
        format: cli.log_format,
        ..Default::default()
    })?;

    let detection_config = load_detection_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            file,
            output,
            format,
            include_rejected,
        } => {
            let session = CsvImporter::new().import_file(&file)?;
            let intervals = detector::detect_session(&session, &detection_config)
                .with_context(|| format!("Detection failed for {}", session.id))?;

            display_intervals(&session.id, &intervals);

            if let Some(path) = output {
                let selected: Vec<RecoveryInterval> = intervals
                    .into_iter()
                    .filter(|i| include_rejected || i.quality_status != QualityStatus::Rejected)
                    .collect();
                write_output(&selected, &path, &format)?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
        }

        Commands::Batch {
            dir,
            output,
            format,
            jobs,
            no_progress,
        } => {
            let files = collect_csv_files(&dir)?;
            if files.is_empty() {
                anyhow::bail!("No CSV files found in {}", dir.display());
            }

            let processor = BatchProcessor::with_config(
                detection_config,
                BatchConfig {
                    num_threads: jobs,
                    show_progress: !no_progress,
                    continue_on_error: true,
                },
            );
            let summary = processor.process_files(&files)?;
            println!("{}", summary.to_string_pretty());

            for (path, error) in &summary.errors {
                println!("  {} {}: {}", "✗".red(), path.display(), error);
            }

            if let Some(path) = output {
                let all: Vec<RecoveryInterval> = summary
                    .results
                    .iter()
                    .flat_map(|r| r.intervals.iter().cloned())
                    .collect();
                write_output(&all, &path, &format)?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
        }

        Commands::Config { init, show } => {
            let path = DetectionConfig::default_config_path();
            if init {
                DetectionConfig::default().save_to_file(&path)?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
            if show || !init {
                println!("Config path: {}", path.display());
                println!("{}", toml::to_string_pretty(&detection_config)?);
            }
        }
    }

    Ok(())
}

fn load_detection_config(path: Option<&std::path::Path>) -> Result<DetectionConfig> {
    match path {
        Some(path) => DetectionConfig::load_from_file(path),
        None => Ok(DetectionConfig::load_or_default()),
    }
}

fn display_intervals(session_id: &str, intervals: &[RecoveryInterval]) {
    if intervals.is_empty() {
        println!(
            "{}",
            format!("No recovery intervals detected in {}", session_id).dimmed()
        );
        return;
    }

    println!(
        "{}",
        format!("Recovery intervals in {}", session_id).bold()
    );
    let rows: Vec<IntervalRow> = intervals.iter().map(IntervalRow::from).collect();
    println!("{}", Table::new(rows));
}

fn write_output(intervals: &[RecoveryInterval], path: &std::path::Path, format: &str) -> Result<()> {
    match format {
        "json" => export::export_json(intervals, path),
        "csv" => export::export_csv(intervals, path),
        other => anyhow::bail!("Unknown output format: {} (expected json or csv)", other),
    }
}

fn collect_csv_files(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();
    Ok(files)
}
