//! Command-line interface module for dirward.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing with clap
//! - Building the engine for the requested root
//! - Running batches in the background while rendering their progress
//! - Interactive confirmation of destructive steps

use crate::batch::{BatchControls, BatchSummary, ConfirmGate, ConfirmRequest, ProgressEvent};
use crate::config::AppConfig;
use crate::engine::{LifecycleEngine, Selection};
use crate::error::LifecycleResult;
use crate::history::HistoryView;
use crate::output::OutputFormatter;
use crate::runner::{BatchHandle, BatchRunner};
use crate::scanner::ScanPredicate;
use crate::sidecar::ReconstructionMode;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

/// Reversible file lifecycle management with a verified history.
#[derive(Debug, Parser)]
#[command(name = "dirward", version, about)]
pub struct Cli {
    /// Configuration file (defaults to .dirwardrc.toml, then ~/.config/dirward/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List files whose name ends with a suffix
    Scan {
        root: PathBuf,
        /// Suffix to match, e.g. ".tmp"; every file when omitted
        #[arg(long)]
        ext: Option<String>,
    },
    /// Rename files ending with one suffix so they end with another
    Rename {
        root: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Undo a rename for files the history vouches for
    Revert {
        root: PathBuf,
        /// Suffix the files had before the rename
        #[arg(long)]
        from: String,
        /// Suffix the files have now
        #[arg(long)]
        to: String,
    },
    /// Move files into the quarantine area
    Quarantine {
        root: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(short, long)]
        yes: bool,
    },
    /// Permanently delete active files
    Delete {
        root: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(short, long)]
        yes: bool,
    },
    /// List quarantined files and where they came from
    ListQuarantine { root: PathBuf },
    /// Move quarantined files back to their original location
    Restore {
        root: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(short, long)]
        yes: bool,
    },
    /// Permanently delete quarantined files
    Purge {
        root: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(short, long)]
        yes: bool,
    },
    /// Rebuild missing metadata sidecars for media files
    Sidecars {
        root: PathBuf,
        /// Write the sidecars instead of simulating
        #[arg(long)]
        apply: bool,
    },
    /// Count media files that have no sidecar
    Orphans {
        root: PathBuf,
        /// Save the list to orphan_report_<timestamp>.txt in the root
        #[arg(long)]
        write_report: bool,
    },
    /// Copy sidecar timestamps onto file dates with exiftool
    Datestamp { root: PathBuf },
    /// Show the history ledger
    History {
        root: PathBuf,
        /// Only entries containing this text
        #[arg(long, default_value = "")]
        filter: String,
        /// Write the shown entries to a file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

/// Which files a quarantine, delete, restore or purge acts on.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct SelectionArgs {
    /// Every file whose name ends with this suffix
    #[arg(long)]
    pub ext: Option<String>,
    /// Explicit files, repeatable. Relative paths start at the root, or at
    /// the quarantine area for restore and purge
    #[arg(long = "path")]
    pub paths: Vec<PathBuf>,
    /// Every file
    #[arg(long)]
    pub all: bool,
}

impl SelectionArgs {
    /// Converts the arguments. Relative paths are passed through: the engine
    /// resolves them against the root for quarantine and delete, and
    /// against the quarantine area for restore and purge.
    pub fn into_selection(self) -> Selection {
        if let Some(ext) = self.ext {
            Selection::suffix(ext)
        } else if self.all {
            Selection::all()
        } else {
            Selection::Paths(self.paths)
        }
    }
}

/// Asks on stdin unless `--yes` was given. Anything but `y`/`yes` declines,
/// including a closed stdin.
#[derive(Debug, Clone, Copy)]
pub struct StdinConfirm {
    assume_yes: bool,
}

impl StdinConfirm {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ConfirmGate for StdinConfirm {
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("{} [y/N] ", request.prompt());
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        }
    }
}

/// Runs the parsed command.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use dirward::cli::{Cli, run};
///
/// let cli = Cli::parse_from(["dirward", "rename", "/photos", "--from", ".jpeg", "--to", ".jpg"]);
/// if let Err(e) = run(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
///
/// # Errors
///
/// Returns a printable message when the configuration cannot be loaded,
/// the root is invalid or busy, or a batch fails before processing items.
pub fn run(cli: Cli) -> Result<(), String> {
    let config = AppConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;
    let show_lines = cli.verbose > 0;

    match cli.command {
        Commands::Scan { root, ext } => {
            let engine = build_engine(&root, config)?;
            let predicate = ext.map(ScanPredicate::suffix).unwrap_or(ScanPredicate::Any);
            let candidates = engine.scan(&predicate).map_err(|e| e.to_string())?;
            OutputFormatter::header(&format!("{} file(s) matching {}", candidates.len(), predicate.describe()));
            for path in candidates.iter() {
                OutputFormatter::plain(&format!(" - {}", path.display()));
            }
            Ok(())
        }
        Commands::Rename { root, from, to } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            batch(show_lines, false, |controls| runner.start_rename(from, to, controls))
        }
        Commands::Revert { root, from, to } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            batch(show_lines, false, |controls| runner.start_revert(from, to, controls))
        }
        Commands::Quarantine { root, selection, yes } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let selection = selection.into_selection();
            batch(show_lines, yes, |controls| runner.start_quarantine(selection, controls))
        }
        Commands::Delete { root, selection, yes } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let selection = selection.into_selection();
            batch(show_lines, yes, |controls| runner.start_delete(selection, controls))
        }
        Commands::ListQuarantine { root } => {
            let engine = build_engine(&root, config)?;
            let quarantined = engine.list_quarantine().map_err(|e| e.to_string())?;
            if quarantined.is_empty() {
                OutputFormatter::info("The quarantine area is empty.");
                return Ok(());
            }
            OutputFormatter::header(&format!("{} quarantined file(s)", quarantined.len()));
            for path in quarantined.iter() {
                OutputFormatter::plain(&format!(
                    " - {}\n   from {}",
                    path.display(),
                    engine.reconstructed_origin(path).display()
                ));
            }
            Ok(())
        }
        Commands::Restore { root, selection, yes } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let selection = selection.into_selection();
            batch(show_lines, yes, |controls| runner.start_restore(selection, controls))
        }
        Commands::Purge { root, selection, yes } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let selection = selection.into_selection();
            batch(show_lines, yes, |controls| runner.start_purge(selection, controls))
        }
        Commands::Sidecars { root, apply } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let mode = if apply {
                ReconstructionMode::Apply
            } else {
                ReconstructionMode::Simulate
            };
            let (controls, events) = channel_controls(true);
            let handle = runner
                .start_reconstruction(mode, controls)
                .map_err(|e| e.to_string())?;
            let report = follow(handle, events, show_lines);
            OutputFormatter::reconstruction_summary(&report);
            Ok(())
        }
        Commands::Orphans { root, write_report } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let (controls, events) = channel_controls(true);
            let handle = runner
                .start_orphan_report(write_report, controls)
                .map_err(|e| e.to_string())?;
            let report = follow(handle, events, show_lines).map_err(|e| e.to_string())?;
            OutputFormatter::orphan_summary(&report);
            Ok(())
        }
        Commands::Datestamp { root } => {
            let runner = BatchRunner::new(build_engine(&root, config)?);
            let (controls, events) = channel_controls(true);
            let handle = runner.start_datestamp(controls).map_err(|e| e.to_string())?;
            // Tool output is always shown.
            let outcome = follow(handle, events, true).map_err(|e| e.to_string())?;
            OutputFormatter::datestamp_summary(&outcome);
            Ok(())
        }
        Commands::History {
            root,
            filter,
            export,
        } => {
            let engine = build_engine(&root, config)?;
            show_history(&HistoryView::load(engine.ledger()), &filter, export.as_deref())
        }
    }
}

fn build_engine(root: &Path, config: AppConfig) -> Result<LifecycleEngine, String> {
    LifecycleEngine::new(root, config).map_err(|e| e.to_string())
}

fn channel_controls(assume_yes: bool) -> (BatchControls, Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel();
    let controls = BatchControls::default()
        .with_sink(Arc::new(tx))
        .with_confirm(Arc::new(StdinConfirm::new(assume_yes)));
    (controls, rx)
}

/// Renders events until the batch thread drops its sink, then joins it.
fn follow<T>(handle: BatchHandle<T>, events: Receiver<ProgressEvent>, show_lines: bool) -> T {
    OutputFormatter::follow(events, show_lines);
    handle.join()
}

/// Starts a ledger-recorded batch and prints its summary table.
fn batch<F>(show_lines: bool, assume_yes: bool, start: F) -> Result<(), String>
where
    F: FnOnce(BatchControls) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>>,
{
    let (controls, events) = channel_controls(assume_yes);
    let handle = start(controls).map_err(|e| e.to_string())?;
    let summary = follow(handle, events, show_lines).map_err(|e| e.to_string())?;
    OutputFormatter::summary_table(&summary);
    if summary.ledger_appended > 0 {
        OutputFormatter::success(&format!("{} history entr(ies) recorded.", summary.ledger_appended));
    }
    Ok(())
}

fn show_history(view: &HistoryView, filter: &str, export: Option<&Path>) -> Result<(), String> {
    if let Some(reason) = view.unavailable() {
        OutputFormatter::warning(&format!("History unavailable: {}", reason));
    }
    if view.skipped_records() > 0 {
        OutputFormatter::warning(&format!("{} unreadable record(s) skipped.", view.skipped_records()));
    }
    if let Some(path) = export {
        let written = view.export(filter, path).map_err(|e| e.to_string())?;
        OutputFormatter::success(&format!("{} entr(ies) exported to {}", written, path.display()));
        return Ok(());
    }
    let lines = view.render(filter);
    if lines.is_empty() {
        OutputFormatter::info("No history entries.");
    }
    for line in lines {
        OutputFormatter::plain(&line);
    }
    Ok(())
}
