//! The control shape every multi-file operation shares.
//!
//! A batch enumerates candidates, optionally asks a [`ConfirmGate`] before
//! irreversible work, processes each item strictly in order, and reports
//! through a [`ProgressSink`]. Cancellation is cooperative through a
//! [`CancelToken`] checked between items. Only one batch may run per
//! processing root at a time; [`RootGuard`] enforces that.

use crate::error::{LifecycleError, LifecycleResult};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Every long-running unit of work the crate can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Scan,
    Rename,
    Revert,
    Quarantine,
    Delete,
    ListQuarantine,
    Restore,
    Purge,
    ReconstructSidecars,
    OrphanReport,
    Datestamp,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Scan => "scan",
            Operation::Rename => "rename",
            Operation::Revert => "revert",
            Operation::Quarantine => "quarantine",
            Operation::Delete => "delete",
            Operation::ListQuarantine => "list quarantine",
            Operation::Restore => "restore",
            Operation::Purge => "purge",
            Operation::ReconstructSidecars => "reconstruct sidecars",
            Operation::OrphanReport => "orphan report",
            Operation::Datestamp => "datestamp",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Final counters of a batch, as handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTotals {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration: Duration,
}

/// Events a batch emits while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { operation: Operation, total: usize },
    Advanced {
        processed: usize,
        total: usize,
        elapsed: Duration,
    },
    /// One line of human-readable progress log.
    Line(String),
    Finished {
        operation: Operation,
        totals: BatchTotals,
    },
}

/// Receives progress events. Implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A receiver that hung up no longer cares about progress.
        let _ = self.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Line(line) => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// What a batch is about to do, shown to whoever confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub operation: Operation,
    pub count: usize,
    /// The filter or selection the candidates came from.
    pub selection: String,
    /// True when the step cannot be undone (delete, purge).
    pub irreversible: bool,
}

impl ConfirmRequest {
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "{} {} file(s) matching {}?",
            capitalize(self.operation.label()),
            self.count,
            self.selection
        );
        if self.irreversible {
            prompt.push_str(" This cannot be undone.");
        }
        prompt
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Decides whether a destructive batch may proceed.
pub trait ConfirmGate: Send + Sync {
    fn confirm(&self, request: &ConfirmRequest) -> bool;
}

impl<F> ConfirmGate for F
where
    F: Fn(&ConfirmRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &ConfirmRequest) -> bool {
        self(request)
    }
}

/// Approves every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl ConfirmGate for AutoConfirm {
    fn confirm(&self, _request: &ConfirmRequest) -> bool {
        true
    }
}

/// Cooperative stop signal, observed between items.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The caller-supplied hooks of a batch.
#[derive(Clone)]
pub struct BatchControls {
    pub sink: Arc<dyn ProgressSink>,
    pub confirm: Arc<dyn ConfirmGate>,
    pub cancel: CancelToken,
}

impl Default for BatchControls {
    fn default() -> Self {
        Self {
            sink: Arc::new(NoopSink),
            confirm: Arc::new(AutoConfirm),
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for BatchControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchControls")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BatchControls {
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmGate>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn line(&self, line: impl Into<String>) {
        self.sink.emit(ProgressEvent::Line(line.into()));
    }
}

/// How one candidate ended.
#[derive(Debug)]
pub enum ItemOutcome {
    Succeeded,
    Skipped(LifecycleError),
    Errored(LifecycleError),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&LifecycleError> {
        match self {
            ItemOutcome::Succeeded => None,
            ItemOutcome::Skipped(e) | ItemOutcome::Errored(e) => Some(e),
        }
    }
}

/// The result of processing one candidate.
#[derive(Debug)]
pub struct ItemReport {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub outcome: ItemOutcome,
    /// Non-blocking problems, such as a restore hash mismatch.
    pub warnings: Vec<LifecycleError>,
}

impl ItemReport {
    pub fn succeeded(source: impl Into<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination,
            outcome: ItemOutcome::Succeeded,
            warnings: Vec::new(),
        }
    }

    pub fn skipped(source: impl Into<PathBuf>, reason: LifecycleError) -> Self {
        Self {
            source: source.into(),
            destination: None,
            outcome: ItemOutcome::Skipped(reason),
            warnings: Vec::new(),
        }
    }

    pub fn errored(source: impl Into<PathBuf>, error: LifecycleError) -> Self {
        Self {
            source: source.into(),
            destination: None,
            outcome: ItemOutcome::Errored(error),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: LifecycleError) -> Self {
        self.warnings.push(warning);
        self
    }

    fn log_line(&self) -> String {
        let mut line = match (&self.outcome, &self.destination) {
            (ItemOutcome::Succeeded, Some(dest)) => {
                format!("ok: {} -> {}", self.source.display(), dest.display())
            }
            (ItemOutcome::Succeeded, None) => format!("ok: {}", self.source.display()),
            (ItemOutcome::Skipped(reason), _) => {
                format!("skipped: {} ({})", self.source.display(), reason)
            }
            (ItemOutcome::Errored(error), _) => {
                format!("error: {} ({})", self.source.display(), error)
            }
        };
        for warning in &self.warnings {
            line.push_str(&format!(" [warning: {}]", warning));
        }
        line
    }
}

/// Everything a batch did, always produced even when every item failed.
#[derive(Debug)]
pub struct BatchSummary {
    pub operation: Operation,
    /// Number of candidates the batch set out to process.
    pub total: usize,
    pub items: Vec<ItemReport>,
    pub duration: Duration,
    /// The caller stopped the batch before every candidate was processed.
    pub cancelled: bool,
    /// The confirmation gate refused; nothing was touched.
    pub declined: bool,
    /// Entries written to the ledger at the end of the batch.
    pub ledger_appended: usize,
    /// Ledger problems: unavailable history or a failed final append.
    pub ledger_issues: Vec<LifecycleError>,
}

impl BatchSummary {
    pub(crate) fn empty(operation: Operation) -> Self {
        Self {
            operation,
            total: 0,
            items: Vec::new(),
            duration: Duration::ZERO,
            cancelled: false,
            declined: false,
            ledger_appended: 0,
            ledger_issues: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped(_)))
            .count()
    }

    pub fn errored(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Errored(_)))
            .count()
    }

    pub fn processed(&self) -> usize {
        self.items.len()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LifecycleError> {
        self.items.iter().flat_map(|i| i.warnings.iter())
    }

    pub fn totals(&self) -> BatchTotals {
        BatchTotals {
            total: self.total,
            succeeded: self.succeeded(),
            skipped: self.skipped(),
            errored: self.errored(),
            duration: self.duration,
        }
    }

    /// Looks up the report for a source path.
    pub fn item(&self, source: &Path) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.source == source)
    }
}

/// Drives progress reporting for one batch.
pub(crate) struct BatchTracker<'a> {
    controls: &'a BatchControls,
    summary: BatchSummary,
    started: Instant,
}

impl<'a> BatchTracker<'a> {
    pub(crate) fn start(operation: Operation, total: usize, controls: &'a BatchControls) -> Self {
        controls.sink.emit(ProgressEvent::Started { operation, total });
        let mut summary = BatchSummary::empty(operation);
        summary.total = total;
        Self {
            controls,
            summary,
            started: Instant::now(),
        }
    }

    /// True when the caller asked to stop; checked before each item.
    pub(crate) fn should_stop(&mut self) -> bool {
        if self.controls.cancel.is_cancelled() {
            self.summary.cancelled = true;
        }
        self.summary.cancelled
    }

    pub(crate) fn record(&mut self, report: ItemReport) {
        self.controls.line(report.log_line());
        self.summary.items.push(report);
        self.controls.sink.emit(ProgressEvent::Advanced {
            processed: self.summary.items.len(),
            total: self.summary.total,
            elapsed: self.started.elapsed(),
        });
    }

    pub(crate) fn decline(&mut self) {
        self.controls.line(format!("{} declined, nothing was touched", self.summary.operation));
        self.summary.declined = true;
    }

    pub(crate) fn ledger_issue(&mut self, issue: LifecycleError) {
        self.controls.line(format!("ledger: {}", issue));
        self.summary.ledger_issues.push(issue);
    }

    pub(crate) fn set_ledger_appended(&mut self, count: usize) {
        self.summary.ledger_appended = count;
    }

    pub(crate) fn finish(mut self) -> BatchSummary {
        self.summary.duration = self.started.elapsed();
        let totals = self.summary.totals();
        self.controls.line(format!(
            "{}: {} total, {} succeeded, {} skipped, {} errored in {}",
            self.summary.operation,
            totals.total,
            totals.succeeded,
            totals.skipped,
            totals.errored,
            format_elapsed(totals.duration)
        ));
        self.controls.sink.emit(ProgressEvent::Finished {
            operation: self.summary.operation,
            totals,
        });
        self.summary
    }
}

/// Formats a duration as `mm:ss`.
pub fn format_elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn busy_roots() -> &'static Mutex<HashSet<PathBuf>> {
    static BUSY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    BUSY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Admission guard: at most one batch per processing root.
///
/// The root is released when the guard is dropped.
#[derive(Debug)]
pub struct RootGuard {
    root: PathBuf,
}

impl RootGuard {
    /// Claims `root`, failing with [`LifecycleError::Busy`] when another
    /// batch holds it.
    pub fn acquire(root: &Path) -> LifecycleResult<Self> {
        let mut busy = busy_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !busy.insert(root.to_path_buf()) {
            return Err(LifecycleError::Busy {
                root: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// True while some batch holds `root`.
    pub fn is_busy(root: &Path) -> bool {
        busy_roots()
            .lock()
            .map(|busy| busy.contains(root))
            .unwrap_or(false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        let mut busy = busy_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        busy.remove(&self.root);
    }
}
