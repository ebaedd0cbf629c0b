/// The reversible file-lifecycle engine.
///
/// A file is either active at its original location, quarantined under
/// `<root>/__dirward_quarantine__/<relative path>`, or gone for good.
/// Transitions:
///
/// ```text
///   Active(A) --rename--> Active(B) --revert--> Active(A)
///   Active(P) --quarantine--> Quarantined(Q) --restore--> Active(P)
///                                            --purge----> Purged
///   Active(P) --delete--> Purged
/// ```
///
/// Each public operation is a batch: candidates are enumerated, confirmed
/// when the operation is destructive, processed one by one, and the
/// successful transitions are appended to the ledger in a single write at
/// the end. A failing item never stops the batch.
use crate::batch::{
    BatchControls, BatchSummary, BatchTracker, ConfirmRequest, ItemReport, Operation, RootGuard,
};
use crate::config::AppConfig;
use crate::datestamp::{DatestampOutcome, Datestamper};
use crate::error::{LifecycleError, LifecycleResult};
use crate::hasher::{ContentHash, hash_file};
use crate::ledger::{Action, Ledger, LedgerState, PendingEntry};
use crate::scanner::{CandidateSet, ScanPredicate, Scanner};
use crate::sidecar::{OrphanReport, ReconstructionMode, ReconstructionReport, Reconstructor};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Which files a batch acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every file matching the predicate (in the active tree, or in the
    /// quarantine area for restore and purge).
    Matching(ScanPredicate),
    /// An explicit list. Relative paths resolve against the root for
    /// quarantine and delete, and against the quarantine area for restore
    /// and purge.
    Paths(Vec<PathBuf>),
}

impl Selection {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Selection::Matching(ScanPredicate::suffix(suffix))
    }

    pub fn all() -> Self {
        Selection::Matching(ScanPredicate::Any)
    }

    fn describe(&self) -> String {
        match self {
            Selection::Matching(predicate) => predicate.describe(),
            Selection::Paths(paths) => format!("{} selected path(s)", paths.len()),
        }
    }
}

enum Candidate {
    Ready(PathBuf),
    Rejected(PathBuf, LifecycleError),
}

/// A completed filesystem step, waiting for the ledger flush.
struct Transition {
    destination: Option<PathBuf>,
    entry: PendingEntry,
    warnings: Vec<LifecycleError>,
}

enum StepError {
    Skip(LifecycleError),
    Fail(LifecycleError),
}

type Step = Result<Transition, StepError>;

struct BatchPlan {
    operation: Operation,
    candidates: Vec<Candidate>,
    selection: String,
    /// `Some(irreversible)` when the batch must be confirmed first.
    confirm: Option<bool>,
    ledger_issue: Option<LifecycleError>,
}

/// Runs lifecycle transitions under one processing root.
#[derive(Debug, Clone)]
pub struct LifecycleEngine {
    root: PathBuf,
    config: AppConfig,
    ledger: Ledger,
    scanner: Scanner,
}

impl LifecycleEngine {
    /// Creates an engine for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidRoot`] when `root` is not an existing
    /// directory and [`LifecycleError::InvalidFilter`] when the configured
    /// filter patterns do not compile.
    pub fn new(root: impl AsRef<Path>, config: AppConfig) -> LifecycleResult<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(|_| LifecycleError::InvalidRoot {
            path: root.as_ref().to_path_buf(),
        })?;
        if !root.is_dir() {
            return Err(LifecycleError::InvalidRoot { path: root });
        }

        let filters = config
            .compile_filters()
            .map_err(|e| LifecycleError::InvalidFilter {
                reason: e.to_string(),
            })?;
        let ledger = Ledger::new(config.ledger.path_for(&root));
        let scanner = Scanner::new(&root, filters)
            .exclude_file(ledger.path())
            .exclude_file(ledger.temp_path());

        Ok(Self {
            root,
            config,
            ledger,
            scanner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// True while a batch holds this engine's root.
    pub fn is_busy(&self) -> bool {
        RootGuard::is_busy(&self.root)
    }

    /// Lists files of the active tree matching `predicate`.
    pub fn scan(&self, predicate: &ScanPredicate) -> LifecycleResult<CandidateSet> {
        self.check_root()?;
        validate_predicate(predicate)?;
        Ok(self.scanner.scan(predicate))
    }

    /// Lists every file currently quarantined.
    pub fn list_quarantine(&self) -> LifecycleResult<CandidateSet> {
        self.check_root()?;
        Ok(self.scanner.scan_quarantine())
    }

    /// Where `path` lands when quarantined: its path relative to the root,
    /// re-rooted under the quarantine area.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::OutsideRoot`] when `path` is not under the
    /// root.
    pub fn quarantine_path_for(&self, path: &Path) -> LifecycleResult<PathBuf> {
        match path.strip_prefix(&self.root) {
            Ok(relative) if self.is_within_root(path) => Ok(self.scanner.quarantine_root().join(relative)),
            _ => Err(LifecycleError::OutsideRoot {
                path: path.to_path_buf(),
            }),
        }
    }

    /// True when `path` lies under the root without climbing out through `..`.
    fn is_within_root(&self, path: &Path) -> bool {
        path.starts_with(&self.root) && !path.components().any(|c| c == Component::ParentDir)
    }

    /// Reconstructs the original location of a quarantined file from its
    /// position inside the quarantine area.
    pub fn reconstructed_origin(&self, quarantined: &Path) -> PathBuf {
        match quarantined.strip_prefix(self.scanner.quarantine_root()) {
            Ok(relative) => self.root.join(relative),
            Err(_) => self
                .root
                .join(quarantined.file_name().unwrap_or(quarantined.as_os_str())),
        }
    }

    /// Renames every file whose name ends with `from` so that it ends with
    /// `to` instead. Existing destinations are never overwritten.
    pub fn rename(&self, from: &str, to: &str, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_rename(from, to, controls)
    }

    /// Undoes a rename: files ending with `to` get `from` back, but only
    /// when the ledger vouches for their current content.
    pub fn revert(&self, from: &str, to: &str, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_revert(from, to, controls)
    }

    pub fn quarantine(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_quarantine(selection, controls)
    }

    /// Permanently removes active files.
    pub fn delete(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_delete(selection, controls)
    }

    pub fn restore(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_restore(selection, controls)
    }

    /// Permanently removes quarantined files.
    pub fn purge(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.run_purge(selection, controls)
    }

    /// Builds the sidecar reconstruction pass for this root.
    pub fn reconstructor(&self) -> Reconstructor {
        Reconstructor::new(self.scanner.clone(), &self.config.sidecars)
    }

    pub fn reconstruct_sidecars(
        &self,
        mode: ReconstructionMode,
        controls: &BatchControls,
    ) -> LifecycleResult<ReconstructionReport> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.check_root()?;
        Ok(self.reconstructor().run(mode, controls))
    }

    pub fn orphan_report(&self, write_report: bool, controls: &BatchControls) -> LifecycleResult<OrphanReport> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.check_root()?;
        self.reconstructor().orphan_report(write_report, controls)
    }

    /// Builds the external date-stamping step for this root.
    pub fn datestamper(&self) -> Datestamper {
        Datestamper::new(&self.root, self.config.datestamp.exiftool_path.clone())
    }

    pub fn apply_datestamps(&self, controls: &BatchControls) -> LifecycleResult<DatestampOutcome> {
        let _guard = RootGuard::acquire(&self.root)?;
        self.check_root()?;
        self.datestamper().run(controls)
    }

    pub(crate) fn run_rename(&self, from: &str, to: &str, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        validate_suffixes(from, to)?;
        let candidates = self.scanner.scan(&ScanPredicate::suffix(from));

        let plan = BatchPlan {
            operation: Operation::Rename,
            selection: format!("*{}", from),
            candidates: ready(candidates),
            confirm: None,
            ledger_issue: None,
        };
        Ok(self.run_batch(plan, controls, |path| {
            let destination = swap_suffix(path, from, to)?;
            if exists(&destination) {
                return Err(StepError::Skip(LifecycleError::DestinationExists { path: destination }));
            }
            let hash = hash_file(path).map_err(StepError::Skip)?;
            move_file(path, &destination).map_err(StepError::Fail)?;
            Ok(Transition {
                entry: PendingEntry::new(Action::Renamed, hash)
                    .source(path)
                    .dest(&destination),
                destination: Some(destination),
                warnings: Vec::new(),
            })
        }))
    }

    pub(crate) fn run_revert(&self, from: &str, to: &str, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        validate_suffixes(to, from)?;
        let candidates = self.scanner.scan(&ScanPredicate::suffix(to));
        let state = self.ledger.load();

        let plan = BatchPlan {
            operation: Operation::Revert,
            selection: format!("*{}", to),
            candidates: ready(candidates),
            confirm: None,
            ledger_issue: state.unavailable_error(self.ledger.path()),
        };
        Ok(self.run_batch(plan, controls, |path| {
            let hash = hash_file(path).map_err(StepError::Skip)?;
            if !vouches_for(&state, path, &hash) {
                return Err(StepError::Skip(LifecycleError::NoLedgerRecord {
                    path: path.to_path_buf(),
                }));
            }
            let destination = swap_suffix(path, to, from)?;
            if exists(&destination) {
                return Err(StepError::Skip(LifecycleError::DestinationExists { path: destination }));
            }
            move_file(path, &destination).map_err(StepError::Fail)?;
            Ok(Transition {
                entry: PendingEntry::new(Action::Reverted, hash)
                    .source(path)
                    .dest(&destination),
                destination: Some(destination),
                warnings: Vec::new(),
            })
        }))
    }

    pub(crate) fn run_quarantine(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        let plan = BatchPlan {
            operation: Operation::Quarantine,
            candidates: self.active_candidates(selection)?,
            selection: selection.describe(),
            confirm: Some(false),
            ledger_issue: None,
        };
        Ok(self.run_batch(plan, controls, |path| {
            let destination = self.quarantine_path_for(path).map_err(StepError::Skip)?;
            if exists(&destination) {
                return Err(StepError::Skip(LifecycleError::DestinationExists { path: destination }));
            }
            let hash = hash_file(path).map_err(StepError::Skip)?;
            create_parent(&destination).map_err(StepError::Fail)?;
            move_file(path, &destination).map_err(StepError::Fail)?;
            Ok(Transition {
                entry: PendingEntry::new(Action::Quarantined, hash)
                    .source(path)
                    .quarantine(&destination),
                destination: Some(destination),
                warnings: Vec::new(),
            })
        }))
    }

    pub(crate) fn run_delete(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        let plan = BatchPlan {
            operation: Operation::Delete,
            candidates: self.active_candidates(selection)?,
            selection: selection.describe(),
            confirm: Some(true),
            ledger_issue: None,
        };
        Ok(self.run_batch(plan, controls, |path| {
            let hash = hash_file(path).map_err(StepError::Skip)?;
            fs::remove_file(path).map_err(|source| {
                StepError::Fail(LifecycleError::Delete {
                    path: path.to_path_buf(),
                    source,
                })
            })?;
            Ok(Transition {
                entry: PendingEntry::new(Action::Deleted, hash).source(path),
                destination: None,
                warnings: Vec::new(),
            })
        }))
    }

    pub(crate) fn run_restore(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        let state = self.ledger.load();
        let plan = BatchPlan {
            operation: Operation::Restore,
            candidates: self.quarantined_candidates(selection)?,
            selection: selection.describe(),
            confirm: Some(false),
            ledger_issue: state.unavailable_error(self.ledger.path()),
        };
        Ok(self.run_batch(plan, controls, |path| {
            let (origin, recorded) = latest_quarantine_record(&state, path).unwrap_or((None, None));
            let destination = origin.unwrap_or_else(|| self.reconstructed_origin(path));
            if exists(&destination) {
                return Err(StepError::Skip(LifecycleError::DestinationExists { path: destination }));
            }

            let actual = hash_file(path).map_err(StepError::Skip)?;
            let mut warnings = Vec::new();
            if let Some(recorded) = recorded
                && recorded != actual
            {
                warn!(path = %path.display(), %recorded, %actual, "restoring despite hash mismatch");
                warnings.push(LifecycleError::HashMismatch {
                    path: path.to_path_buf(),
                    recorded,
                    actual,
                });
            }

            create_parent(&destination).map_err(StepError::Fail)?;
            move_file(path, &destination).map_err(StepError::Fail)?;
            Ok(Transition {
                entry: PendingEntry::new(Action::Restored, actual)
                    .source(&destination)
                    .quarantine(path),
                destination: Some(destination),
                warnings,
            })
        }))
    }

    pub(crate) fn run_purge(&self, selection: &Selection, controls: &BatchControls) -> LifecycleResult<BatchSummary> {
        self.check_root()?;
        let state = self.ledger.load();
        let plan = BatchPlan {
            operation: Operation::Purge,
            candidates: self.quarantined_candidates(selection)?,
            selection: selection.describe(),
            confirm: Some(true),
            ledger_issue: state.unavailable_error(self.ledger.path()),
        };
        Ok(self.run_batch(plan, controls, |path| {
            let hash = hash_file(path).map_err(StepError::Skip)?;
            fs::remove_file(path).map_err(|source| {
                StepError::Fail(LifecycleError::Delete {
                    path: path.to_path_buf(),
                    source,
                })
            })?;
            let mut entry = PendingEntry::new(Action::Purged, hash).quarantine(path);
            if let Some((Some(origin), _)) = latest_quarantine_record(&state, path) {
                entry = entry.source(origin);
            }
            Ok(Transition {
                entry,
                destination: None,
                warnings: Vec::new(),
            })
        }))
    }

    fn check_root(&self) -> LifecycleResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(LifecycleError::InvalidRoot {
                path: self.root.clone(),
            })
        }
    }

    /// Resolves a selection against the active tree.
    fn active_candidates(&self, selection: &Selection) -> LifecycleResult<Vec<Candidate>> {
        match selection {
            Selection::Matching(predicate) => {
                validate_predicate(predicate)?;
                Ok(ready(self.scanner.scan(predicate)))
            }
            Selection::Paths(paths) => Ok(paths
                .iter()
                .map(|p| {
                    let path = resolve(&self.root, p);
                    if !self.is_within_root(&path) {
                        Candidate::Rejected(path.clone(), LifecycleError::OutsideRoot { path })
                    } else if self.scanner.is_quarantined_path(&path) {
                        Candidate::Rejected(path.clone(), LifecycleError::InsideQuarantine { path })
                    } else if path == self.ledger.path() || path == self.ledger.temp_path() {
                        Candidate::Rejected(
                            path,
                            LifecycleError::InvalidFilter {
                                reason: "the ledger file cannot be selected".to_string(),
                            },
                        )
                    } else if !path.is_file() {
                        Candidate::Rejected(path.clone(), LifecycleError::NotFound { path })
                    } else {
                        Candidate::Ready(path)
                    }
                })
                .collect()),
        }
    }

    /// Resolves a selection against the quarantine area.
    fn quarantined_candidates(&self, selection: &Selection) -> LifecycleResult<Vec<Candidate>> {
        match selection {
            Selection::Matching(predicate) => {
                validate_predicate(predicate)?;
                let listed = self.scanner.scan_quarantine();
                Ok(listed
                    .into_paths()
                    .into_iter()
                    .filter(|p| {
                        p.file_name()
                            .is_some_and(|name| predicate.matches(&name.to_string_lossy()))
                    })
                    .map(Candidate::Ready)
                    .collect())
            }
            Selection::Paths(paths) => Ok(paths
                .iter()
                .map(|p| {
                    let path = resolve(self.scanner.quarantine_root(), p);
                    if self.scanner.is_quarantined_path(&path) && path.is_file() {
                        Candidate::Ready(path)
                    } else {
                        Candidate::Rejected(path.clone(), LifecycleError::NotFound { path })
                    }
                })
                .collect()),
        }
    }

    /// The shared batch loop: confirm, process in order, flush once.
    fn run_batch<F>(&self, plan: BatchPlan, controls: &BatchControls, mut step: F) -> BatchSummary
    where
        F: FnMut(&Path) -> Step,
    {
        let operation = plan.operation;
        info!(
            %operation,
            root = %self.root.display(),
            selection = %plan.selection,
            candidates = plan.candidates.len(),
            "batch started"
        );
        let mut tracker = BatchTracker::start(operation, plan.candidates.len(), controls);
        if let Some(issue) = plan.ledger_issue {
            warn!(%issue, "continuing without ledger history");
            tracker.ledger_issue(issue);
        }

        if let Some(irreversible) = plan.confirm
            && !plan.candidates.is_empty()
        {
            let request = ConfirmRequest {
                operation,
                count: plan.candidates.len(),
                selection: plan.selection.clone(),
                irreversible,
            };
            if !controls.confirm.confirm(&request) {
                info!(%operation, "batch declined");
                tracker.decline();
                return tracker.finish();
            }
        }

        let mut pending = Vec::new();
        for candidate in plan.candidates {
            if tracker.should_stop() {
                info!(%operation, "batch cancelled");
                break;
            }
            let report = match candidate {
                Candidate::Rejected(path, reason) => {
                    warn!(path = %path.display(), %reason, "skipped");
                    ItemReport::skipped(path, reason)
                }
                Candidate::Ready(path) => match step(&path) {
                    Ok(transition) => {
                        debug!(path = %path.display(), action = transition.entry.action.label(), "done");
                        pending.push(transition.entry);
                        transition
                            .warnings
                            .into_iter()
                            .fold(ItemReport::succeeded(path, transition.destination), ItemReport::with_warning)
                    }
                    Err(StepError::Skip(reason)) => {
                        warn!(path = %path.display(), %reason, "skipped");
                        ItemReport::skipped(path, reason)
                    }
                    Err(StepError::Fail(e)) => {
                        error!(path = %path.display(), error = %e, "failed");
                        ItemReport::errored(path, e)
                    }
                },
            };
            tracker.record(report);
        }

        if !pending.is_empty() {
            match self.ledger.append(pending) {
                Ok(written) => tracker.set_ledger_appended(written.len()),
                Err(e) => {
                    error!(error = %e, "transitions were applied but could not be recorded");
                    tracker.ledger_issue(e);
                }
            }
        }

        let summary = tracker.finish();
        info!(
            %operation,
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            errored = summary.errored(),
            cancelled = summary.cancelled,
            "batch finished"
        );
        summary
    }
}

fn ready(candidates: CandidateSet) -> Vec<Candidate> {
    candidates.into_paths().into_iter().map(Candidate::Ready).collect()
}

fn validate_predicate(predicate: &ScanPredicate) -> LifecycleResult<()> {
    match predicate {
        ScanPredicate::Suffix(suffix) => validate_suffix(suffix, "suffix"),
        ScanPredicate::Any => Ok(()),
    }
}

/// `source` selects files and must not be empty; `replacement` may be.
fn validate_suffixes(source: &str, replacement: &str) -> LifecycleResult<()> {
    validate_suffix(source, "source suffix")?;
    if replacement.contains(['/', '\\']) {
        return Err(LifecycleError::InvalidFilter {
            reason: format!("replacement suffix {:?} contains a path separator", replacement),
        });
    }
    Ok(())
}

fn validate_suffix(suffix: &str, what: &str) -> LifecycleResult<()> {
    if suffix.is_empty() {
        return Err(LifecycleError::InvalidFilter {
            reason: format!("{} must not be empty", what),
        });
    }
    if suffix.contains(['/', '\\']) {
        return Err(LifecycleError::InvalidFilter {
            reason: format!("{} {:?} contains a path separator", what, suffix),
        });
    }
    Ok(())
}

/// Replaces the trailing `from` of the file name with `to`.
fn swap_suffix(path: &Path, from: &str, to: &str) -> Result<PathBuf, StepError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(from).unwrap_or(name.as_str());
    let new_name = format!("{}{}", stem, to);
    if new_name.is_empty() {
        return Err(StepError::Skip(LifecycleError::InvalidFilter {
            reason: format!("renaming {} would leave an empty file name", path.display()),
        }));
    }
    Ok(path.with_file_name(new_name))
}

/// True when the ledger holds a rename or revert that produced `path` with
/// exactly this content.
fn vouches_for(state: &LedgerState, path: &Path, hash: &ContentHash) -> bool {
    state.entries().iter().any(|entry| {
        matches!(entry.action, Action::Renamed | Action::Reverted)
            && entry.dest_path.as_deref() == Some(path)
            && entry.content_hash.as_ref() == Some(hash)
    })
}

/// Original path and recorded hash of the newest quarantine of `quarantined`.
fn latest_quarantine_record(
    state: &LedgerState,
    quarantined: &Path,
) -> Option<(Option<PathBuf>, Option<ContentHash>)> {
    state
        .find_latest(|entry| {
            entry.action == Action::Quarantined && entry.quarantine_path.as_deref() == Some(quarantined)
        })
        .map(|entry| (entry.source_path.clone(), entry.content_hash))
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn create_parent(path: &Path) -> LifecycleResult<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|source| LifecycleError::CreateDir {
            path: parent.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}

/// Moves a file, falling back to copy and remove across filesystems.
fn move_file(from: &Path, to: &Path) -> LifecycleResult<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to).map_err(|source| LifecycleError::Copy {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
            fs::remove_file(from).map_err(|source| LifecycleError::Delete {
                path: from.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(LifecycleError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{CancelToken, CollectingSink, ItemOutcome};
    use crate::hasher::hash_reader;
    use crate::scanner::QUARANTINE_DIR_NAME;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LifecycleEngine) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let engine = LifecycleEngine::new(temp_dir.path(), AppConfig::default()).unwrap();
        (temp_dir, engine)
    }

    fn write(engine: &LifecycleEngine, rel: &str, content: &str) -> PathBuf {
        let path = engine.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn controls() -> BatchControls {
        BatchControls::default()
    }

    #[test]
    fn test_invalid_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            LifecycleEngine::new(&missing, AppConfig::default()),
            Err(LifecycleError::InvalidRoot { .. })
        ));

        let file = temp_dir.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            LifecycleEngine::new(&file, AppConfig::default()),
            Err(LifecycleError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_empty_source_suffix_is_rejected() {
        let (_temp, engine) = setup();
        assert!(matches!(
            engine.rename("", ".bak", &controls()),
            Err(LifecycleError::InvalidFilter { .. })
        ));
        assert!(matches!(
            engine.quarantine(&Selection::suffix(""), &controls()),
            Err(LifecycleError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_rename_then_revert_restores_names() {
        let (_temp, engine) = setup();
        let a = write(&engine, "docs/a.txt", "alpha");
        let b = write(&engine, "b.txt", "beta");

        let summary = engine.rename(".txt", ".bak", &controls()).unwrap();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.ledger_appended, 2);
        assert!(!a.exists());
        assert!(engine.root().join("docs/a.bak").exists());

        let summary = engine.revert(".txt", ".bak", &controls()).unwrap();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(fs::read_to_string(&a).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(&b).unwrap(), "beta");

        let actions: Vec<Action> = engine.ledger().read_all().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![Action::Renamed, Action::Renamed, Action::Reverted, Action::Reverted]
        );
    }

    #[test]
    fn test_rename_never_overwrites() {
        let (_temp, engine) = setup();
        write(&engine, "a.txt", "new");
        let existing = write(&engine, "a.bak", "old");

        let summary = engine.rename(".txt", ".bak", &controls()).unwrap();
        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.skipped(), 1);
        assert!(matches!(
            summary.items[0].outcome,
            ItemOutcome::Skipped(LifecycleError::DestinationExists { .. })
        ));
        assert_eq!(fs::read_to_string(existing).unwrap(), "old");
        assert!(engine.ledger().read_all().is_empty());
    }

    #[test]
    fn test_revert_refuses_modified_content() {
        let (_temp, engine) = setup();
        write(&engine, "a.txt", "original");
        engine.rename(".txt", ".bak", &controls()).unwrap();
        let renamed = engine.root().join("a.bak");
        fs::write(&renamed, "tampered").unwrap();

        let summary = engine.revert(".txt", ".bak", &controls()).unwrap();
        assert_eq!(summary.succeeded(), 0);
        assert!(matches!(
            summary.items[0].outcome,
            ItemOutcome::Skipped(LifecycleError::NoLedgerRecord { .. })
        ));
        assert!(renamed.exists());
    }

    #[test]
    fn test_revert_without_history_is_skipped() {
        let (_temp, engine) = setup();
        let stray = write(&engine, "stray.bak", "never renamed");

        let summary = engine.revert(".txt", ".bak", &controls()).unwrap();
        assert_eq!(summary.skipped(), 1);
        assert!(stray.exists());
    }

    #[test]
    fn test_quarantine_restore_round_trip() {
        let (_temp, engine) = setup();
        let photo = write(&engine, "album/2024/photo.jpg", "pixels");
        let before = hash_file(&photo).unwrap();

        let summary = engine.quarantine(&Selection::suffix(".jpg"), &controls()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        let quarantined = engine
            .root()
            .join(QUARANTINE_DIR_NAME)
            .join("album/2024/photo.jpg");
        assert!(quarantined.exists());
        assert!(!photo.exists());
        assert_eq!(engine.list_quarantine().unwrap().paths(), &[quarantined.clone()]);

        let summary = engine.restore(&Selection::all(), &controls()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.warnings().count(), 0);
        assert!(!quarantined.exists());
        assert_eq!(hash_file(&photo).unwrap(), before);

        let entries = engine.ledger().read_all();
        assert_eq!(entries[0].action, Action::Quarantined);
        assert_eq!(entries[0].quarantine_path.as_deref(), Some(quarantined.as_path()));
        assert_eq!(entries[1].action, Action::Restored);
        assert_eq!(entries[1].source_path.as_deref(), Some(photo.as_path()));
    }

    #[test]
    fn test_quarantine_skips_its_own_area() {
        let (_temp, engine) = setup();
        write(&engine, "a.jpg", "a");
        engine.quarantine(&Selection::suffix(".jpg"), &controls()).unwrap();

        let again = engine.quarantine(&Selection::suffix(".jpg"), &controls()).unwrap();
        assert_eq!(again.total, 0);

        let inside = engine.root().join(QUARANTINE_DIR_NAME).join("a.jpg");
        let explicit = engine
            .quarantine(&Selection::Paths(vec![inside]), &controls())
            .unwrap();
        assert!(matches!(
            explicit.items[0].outcome,
            ItemOutcome::Skipped(LifecycleError::InsideQuarantine { .. })
        ));
    }

    #[test]
    fn test_explicit_paths_outside_root_are_refused() {
        let (_temp, engine) = setup();
        let elsewhere = TempDir::new().expect("Failed to create temp directory");
        let precious = elsewhere.path().join("precious.txt");
        fs::write(&precious, "keep").unwrap();
        let sneaky = engine.root().join("..").join(elsewhere.path().file_name().unwrap()).join("precious.txt");

        let deleted = engine
            .delete(&Selection::Paths(vec![precious.clone(), sneaky.clone()]), &controls())
            .unwrap();
        assert_eq!(deleted.succeeded(), 0);
        assert!(deleted.items.iter().all(|item| matches!(
            item.outcome,
            ItemOutcome::Skipped(LifecycleError::OutsideRoot { .. })
        )));

        let quarantined = engine
            .quarantine(&Selection::Paths(vec![precious.clone(), sneaky]), &controls())
            .unwrap();
        assert_eq!(quarantined.succeeded(), 0);
        assert_eq!(quarantined.skipped(), 2);

        assert_eq!(fs::read_to_string(&precious).unwrap(), "keep");
        assert!(engine.list_quarantine().unwrap().is_empty());
        assert!(engine.ledger().read_all().is_empty());
        assert!(matches!(
            engine.quarantine_path_for(&precious),
            Err(LifecycleError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_ledger_files_cannot_be_selected() {
        let (_temp, engine) = setup();
        write(&engine, "a.txt", "a");
        engine.rename(".txt", ".md", &controls()).unwrap();
        fs::write(engine.ledger().temp_path(), "[]").unwrap();

        let summary = engine
            .delete(
                &Selection::Paths(vec![engine.ledger().path().to_path_buf(), engine.ledger().temp_path()]),
                &controls(),
            )
            .unwrap();
        assert_eq!(summary.skipped(), 2);
        assert!(engine.ledger().path().exists());
        assert!(engine.ledger().temp_path().exists());
    }

    #[test]
    fn test_restore_refuses_paths_escaping_quarantine() {
        let (_temp, engine) = setup();
        let active = write(&engine, "active.txt", "still here");

        let summary = engine
            .purge(&Selection::Paths(vec![PathBuf::from("../active.txt")]), &controls())
            .unwrap();
        assert!(matches!(
            summary.items[0].outcome,
            ItemOutcome::Skipped(LifecycleError::NotFound { .. })
        ));
        assert!(active.exists());
    }

    #[test]
    fn test_restore_warns_on_hash_mismatch_but_proceeds() {
        let (_temp, engine) = setup();
        let doc = write(&engine, "doc.txt", "v1");
        engine.quarantine(&Selection::suffix(".txt"), &controls()).unwrap();
        fs::write(engine.quarantine_path_for(&doc).unwrap(), "v2").unwrap();

        let summary = engine.restore(&Selection::all(), &controls()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert!(matches!(
            summary.warnings().next(),
            Some(LifecycleError::HashMismatch { .. })
        ));
        assert_eq!(fs::read_to_string(&doc).unwrap(), "v2");
    }

    #[test]
    fn test_restore_falls_back_to_path_without_ledger() {
        let (_temp, engine) = setup();
        let loose = write(&engine, &format!("{}/x/loose.txt", QUARANTINE_DIR_NAME), "l");
        fs::write(engine.ledger().path(), "corrupt{").unwrap();

        let summary = engine.restore(&Selection::all(), &controls()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert!(matches!(
            summary.ledger_issues.first(),
            Some(LifecycleError::LedgerUnavailable { .. })
        ));
        assert!(!loose.exists());
        assert!(engine.root().join("x/loose.txt").exists());
    }

    #[test]
    fn test_restore_does_not_overwrite() {
        let (_temp, engine) = setup();
        let a = write(&engine, "a.txt", "first");
        engine.quarantine(&Selection::suffix(".txt"), &controls()).unwrap();
        fs::write(&a, "replacement").unwrap();

        let summary = engine.restore(&Selection::all(), &controls()).unwrap();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(fs::read_to_string(&a).unwrap(), "replacement");
        assert!(engine.quarantine_path_for(&a).unwrap().exists());
    }

    #[test]
    fn test_purge_is_terminal() {
        let (_temp, engine) = setup();
        let a = write(&engine, "a.txt", "gone soon");
        engine.quarantine(&Selection::suffix(".txt"), &controls()).unwrap();
        let quarantined = engine.quarantine_path_for(&a).unwrap();

        let summary = engine
            .purge(&Selection::Paths(vec![quarantined.clone()]), &controls())
            .unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert!(!quarantined.exists());

        let purged = engine.ledger().read_all().pop().unwrap();
        assert_eq!(purged.action, Action::Purged);
        assert_eq!(purged.source_path.as_deref(), Some(a.as_path()));

        let summary = engine
            .restore(&Selection::Paths(vec![quarantined]), &controls())
            .unwrap();
        assert_eq!(summary.succeeded(), 0);
        assert!(matches!(
            summary.items[0].outcome,
            ItemOutcome::Skipped(LifecycleError::NotFound { .. })
        ));
        assert!(!a.exists());
    }

    #[test]
    fn test_delete_records_hash() {
        let (_temp, engine) = setup();
        let tmp = write(&engine, "cache/x.tmp", "scratch");

        let summary = engine.delete(&Selection::suffix(".tmp"), &controls()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert!(!tmp.exists());

        let entry = &engine.ledger().read_all()[0];
        assert_eq!(entry.action, Action::Deleted);
        assert_eq!(entry.content_hash, Some(hash_reader("scratch".as_bytes()).unwrap()));
    }

    #[test]
    fn test_declined_confirmation_touches_nothing() {
        let (_temp, engine) = setup();
        let a = write(&engine, "a.log", "keep");
        let controls = controls().with_confirm(Arc::new(|_: &ConfirmRequest| false));

        let summary = engine.delete(&Selection::suffix(".log"), &controls).unwrap();
        assert!(summary.declined);
        assert_eq!(summary.processed(), 0);
        assert!(a.exists());
        assert!(!engine.ledger().path().exists());
    }

    #[test]
    fn test_cancel_before_first_item_flushes_nothing() {
        let (_temp, engine) = setup();
        write(&engine, "a.txt", "a");
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = engine
            .rename(".txt", ".md", &controls().with_cancel(cancel))
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.processed(), 0);
        assert!(engine.ledger().read_all().is_empty());
    }

    #[test]
    fn test_cancel_mid_batch_keeps_finished_transitions() {
        let (_temp, engine) = setup();
        write(&engine, "1.txt", "1");
        write(&engine, "2.txt", "2");
        write(&engine, "3.txt", "3");

        // Cancels as soon as the first item is reported.
        struct CancelAfterFirst(CancelToken);
        impl crate::batch::ProgressSink for CancelAfterFirst {
            fn emit(&self, event: crate::batch::ProgressEvent) {
                if matches!(event, crate::batch::ProgressEvent::Advanced { processed: 1, .. }) {
                    self.0.cancel();
                }
            }
        }
        let cancel = CancelToken::new();
        let controls = controls()
            .with_cancel(cancel.clone())
            .with_sink(Arc::new(CancelAfterFirst(cancel)));

        let summary = engine.quarantine(&Selection::suffix(".txt"), &controls).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(engine.ledger().read_all().len(), 1);
    }

    #[test]
    fn test_busy_root_is_rejected() {
        let (_temp, engine) = setup();
        let _held = RootGuard::acquire(engine.root()).unwrap();
        assert!(engine.is_busy());
        assert!(matches!(
            engine.rename(".a", ".b", &controls()),
            Err(LifecycleError::Busy { .. })
        ));
    }

    #[test]
    fn test_ledger_file_is_never_a_candidate() {
        let (_temp, engine) = setup();
        write(&engine, "a.json", "{}");
        engine.rename(".json", ".old", &controls()).unwrap();

        let config = AppConfig {
            filters: crate::config::FilterRules {
                enable_hidden_files: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let engine = LifecycleEngine::new(engine.root(), config).unwrap();
        let found = engine.scan(&ScanPredicate::suffix(".json")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_progress_lines_are_emitted() {
        let (_temp, engine) = setup();
        write(&engine, "a.txt", "a");
        let sink = Arc::new(CollectingSink::default());

        engine
            .rename(".txt", ".md", &controls().with_sink(sink.clone()))
            .unwrap();
        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.starts_with("ok: ")));
        assert!(lines.last().unwrap().contains("1 succeeded"));
    }
}
