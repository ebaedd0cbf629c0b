//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking from batch events, and formatted summary tables.

use crate::batch::{BatchSummary, ItemOutcome, ProgressEvent, format_elapsed};
use crate::datestamp::DatestampOutcome;
use crate::sidecar::{OrphanReport, ReconstructionMode, ReconstructionReport};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc::Receiver;

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dirward::output::OutputFormatter;
    /// OutputFormatter::success("3 files quarantined");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates and returns a progress bar for batch operations.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of items to process
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Renders batch events until the sending side hangs up.
    ///
    /// The bar appears with the first processed item, so a confirmation
    /// prompt issued after `Started` is not drawn over. Log lines go above
    /// the bar when `show_lines` is set.
    pub fn follow(events: Receiver<ProgressEvent>, show_lines: bool) {
        let mut bar: Option<ProgressBar> = None;
        for event in events {
            match event {
                ProgressEvent::Started { operation, total } => {
                    Self::info(&format!("{}: {} candidate(s)", operation, total));
                }
                ProgressEvent::Advanced {
                    processed,
                    total,
                    elapsed,
                } => {
                    let pb = bar.get_or_insert_with(|| Self::create_progress_bar(total as u64));
                    pb.set_position(processed as u64);
                    pb.set_message(format_elapsed(elapsed));
                }
                ProgressEvent::Line(line) => {
                    if !show_lines {
                        continue;
                    }
                    match &bar {
                        Some(pb) => pb.println(line),
                        None => Self::plain(&line),
                    }
                }
                ProgressEvent::Finished { .. } => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                }
            }
        }
        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    }

    /// Prints the counters of a batch, then every item that did not
    /// succeed and every warning.
    pub fn summary_table(summary: &BatchSummary) {
        Self::header(&format!("SUMMARY: {}", summary.operation).to_uppercase());

        if summary.declined {
            Self::warning("Declined, nothing was changed.");
            return;
        }

        let totals = summary.totals();
        let rows = [
            ("Total", totals.total.to_string().normal()),
            ("Succeeded", totals.succeeded.to_string().green()),
            ("Skipped", totals.skipped.to_string().yellow()),
            ("Errored", totals.errored.to_string().red()),
            ("Duration", format_elapsed(totals.duration).normal()),
        ];
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(8);
        println!("{}", "-".repeat(width + 10));
        for (label, value) in rows {
            println!("{} | {}", format!("{:<width$}", label, width = width).bold(), value);
        }
        println!("{}", "-".repeat(width + 10));

        if summary.cancelled {
            Self::warning(&format!(
                "Cancelled after {} of {} item(s).",
                summary.processed(),
                summary.total
            ));
        }

        for item in &summary.items {
            match &item.outcome {
                ItemOutcome::Succeeded => {}
                ItemOutcome::Skipped(reason) => {
                    println!("  {} {}: {}", "skipped".yellow(), item.source.display(), reason)
                }
                ItemOutcome::Errored(error) => {
                    eprintln!("  {} {}: {}", "error".red(), item.source.display(), error)
                }
            }
        }
        for warning in summary.warnings() {
            Self::warning(&warning.to_string());
        }
        for issue in &summary.ledger_issues {
            Self::warning(&issue.to_string());
        }
    }

    pub fn reconstruction_summary(report: &ReconstructionReport) {
        Self::header("SIDECAR RECONSTRUCTION");
        if report.mode == ReconstructionMode::Simulate {
            Self::simulation_notice("No sidecar was written. Re-run with --apply to write them.");
        }
        println!("Orphaned media files:     {}", report.orphans());
        println!("Timestamp found in name:  {}", report.from_name());
        println!("Similar sidecar found:    {}", report.from_similar());
        println!("No match:                 {}", report.unmatched());
        println!(
            "Sidecars written:         {}",
            report.written().to_string().green()
        );
        println!("  - from name:            {}", report.written_from_name());
        println!(
            "  - from similar:         {}",
            report.written() - report.written_from_name()
        );
        println!(
            "Duration:                 {}",
            format_elapsed(report.summary.duration)
        );
        if report.summary.cancelled {
            Self::warning("Cancelled before every orphan was processed.");
        }
    }

    pub fn orphan_summary(report: &OrphanReport) {
        Self::header("ORPHAN REPORT");
        println!("Media files:      {}", report.media_count);
        println!("Without sidecar:  {}", report.orphans.len().to_string().yellow());
        match &report.report_file {
            Some(path) => Self::success(&format!("Report saved to {}", path.display())),
            None if report.orphans.is_empty() => {
                Self::success("Every media file has a sidecar.")
            }
            None => {}
        }
    }

    pub fn datestamp_summary(outcome: &DatestampOutcome) {
        Self::header("DATE STAMPING");
        println!("Program:   {}", outcome.program.display());
        println!("Duration:  {}", format_elapsed(outcome.duration));
        match outcome.exit_code {
            Some(0) => Self::success("exiftool updated the file dates from the sidecars."),
            Some(code) => Self::error(&format!("exiftool exited with code {}. Check its output.", code)),
            None if outcome.cancelled => Self::warning("Cancelled."),
            None => Self::error("exiftool was terminated by a signal."),
        }
    }

    /// Prints a simulation notice message.
    pub fn simulation_notice(message: &str) {
        println!("{}", format!("[SIMULATION] {}", message).yellow());
    }
}
