//! Sidecar metadata reconstruction.
//!
//! A media file's sidecar is the JSON document at `<media path>.json`
//! holding, among other things, the time the photo was taken. Exports often
//! lose sidecars for edited copies or renamed files; this pass recreates
//! them for every orphaned media file in two steps:
//!
//! 1. derive a timestamp from the file name and write a minimal sidecar;
//! 2. failing that, copy the sidecar of the most similarly named sibling,
//!    provided the similarity reaches the configured threshold.
//!
//! Existing sidecars are never overwritten and the quarantine area is never
//! visited. In simulation mode the pass decides everything but writes
//! nothing.

use crate::batch::{
    BatchControls, BatchSummary, BatchTotals, BatchTracker, ItemReport, Operation, ProgressEvent,
};
use crate::config::SidecarSettings;
use crate::error::{LifecycleError, LifecycleResult};
use crate::media::MediaClassifier;
use crate::scanner::Scanner;
use crate::similarity;
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extension appended to a media path to form its sidecar path.
pub const SIDECAR_EXTENSION: &str = ".json";

/// 2000-01-01T00:00:00Z
const EPOCH_MIN: i64 = 946_684_800;
/// 2035-12-31T00:00:00Z
const EPOCH_MAX: i64 = 2_082_672_000;

static EPOCH_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{10,13}").expect("epoch pattern is valid"));
static DATE_TIME_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(20[0-9]{2})([01][0-9])([0-3][0-9])[ _-]?([0-2][0-9])([0-5][0-9])([0-5][0-9])")
        .expect("date-time pattern is valid")
});
static DATE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(20[0-9]{2})([01][0-9])([0-3][0-9])").expect("date pattern is valid")
});
static COPY_COUNTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([0-9]+\)").expect("copy counter pattern is valid"));

/// Whether a pass may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionMode {
    Simulate,
    Apply,
}

/// The minimal sidecar document written for a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarDocument {
    pub title: String,
    #[serde(rename = "photoTakenTime")]
    pub photo_taken_time: PhotoTakenTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoTakenTime {
    /// Seconds since the Unix epoch, as a decimal string.
    pub timestamp: String,
    /// The same instant in UTC, `YYYY-MM-DD HH:MM:SS`.
    pub formatted: String,
}

impl SidecarDocument {
    pub fn from_timestamp(title: impl Into<String>, timestamp: i64) -> Self {
        let formatted = DateTime::from_timestamp(timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        Self {
            title: title.into(),
            photo_taken_time: PhotoTakenTime {
                timestamp: timestamp.to_string(),
                formatted,
            },
        }
    }
}

/// Returns `<media>.json`.
pub fn sidecar_path(media: &Path) -> PathBuf {
    let mut name = media.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(SIDECAR_EXTENSION);
    media.with_file_name(name)
}

/// Derives a Unix timestamp from a file name, trying in order:
///
/// 1. each run of 10 to 13 digits, read as seconds (13 digits as
///    milliseconds);
/// 2. the first `YYYYMMDD[ _-]HHMMSS` run, in UTC;
/// 3. the first `YYYYMMDD` run, at noon UTC.
///
/// Only instants between 2000-01-01 and 2035-12-31 are accepted.
///
/// # Examples
///
/// ```
/// use dirward::sidecar::extract_timestamp;
/// use std::path::Path;
///
/// assert_eq!(extract_timestamp(Path::new("IMG_20240115_134522.jpg")), Some(1_705_326_322));
/// assert_eq!(extract_timestamp(Path::new("photo_1700000000.jpg")), Some(1_700_000_000));
/// assert_eq!(extract_timestamp(Path::new("vacation.jpg")), None);
/// ```
pub fn extract_timestamp(path: &Path) -> Option<i64> {
    let file_name = path.file_name()?.to_string_lossy();
    let name = strip_extension(&file_name);

    for run in EPOCH_RUN.find_iter(name) {
        let digits = run.as_str();
        let Ok(mut value) = digits.parse::<i64>() else {
            continue;
        };
        if digits.len() == 13 {
            value /= 1000;
        }
        if in_range(value) {
            return Some(value);
        }
    }

    if let Some(caps) = DATE_TIME_RUN.captures(name) {
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        if let (Some(y), Some(mo), Some(d), Some(h), Some(mi), Some(s)) =
            (field(1), field(2), field(3), field(4), field(5), field(6))
            && let Some(ts) = utc_timestamp(y, mo, d, h, mi, s)
        {
            return Some(ts);
        }
    }

    if let Some(caps) = DATE_RUN.captures(name) {
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        if let (Some(y), Some(mo), Some(d)) = (field(1), field(2), field(3))
            && let Some(ts) = utc_timestamp(y, mo, d, 12, 0, 0)
        {
            return Some(ts);
        }
    }

    None
}

fn utc_timestamp(year: u32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<i64> {
    let ts = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?
        .and_hms_opt(hour, min, sec)?
        .and_utc()
        .timestamp();
    in_range(ts).then_some(ts)
}

fn in_range(ts: i64) -> bool {
    (EPOCH_MIN..=EPOCH_MAX).contains(&ts)
}

/// Drops the last extension, keeping names like `.hidden` whole.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => &name[..idx],
        _ => name,
    }
}

/// Reduces a file name to the part worth comparing: lower-cased, without
/// extension, noise words, `(n)` copy counters, spaces, hyphens or
/// underscores.
///
/// ```
/// use dirward::sidecar::normalize_name;
///
/// let noise = vec!["edited".to_string()];
/// assert_eq!(normalize_name("IMG_1234-edited(1).JPG", &noise), "img1234");
/// ```
pub fn normalize_name(file_name: &str, noise_words: &[String]) -> String {
    let lowered = file_name.to_lowercase();
    let mut name = strip_extension(&lowered).to_string();
    for word in noise_words {
        if !word.is_empty() {
            name = name.replace(&word.to_lowercase(), "");
        }
    }
    let name = COPY_COUNTER.replace_all(&name, "");
    name.chars().filter(|c| !matches!(c, ' ' | '-' | '_')).collect()
}

/// The best-scoring sibling sidecar for a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarMatch {
    pub sidecar: PathBuf,
    pub score: f64,
}

/// Where a reconstructed sidecar comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SidecarSource {
    FileName { timestamp: i64 },
    Similar(SidecarMatch),
}

/// What happened to one orphan.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructionOutcome {
    /// Simulation: the sidecar would have been written.
    Planned(SidecarSource),
    Written(SidecarSource),
    /// A sidecar appeared before this pass could write one.
    AlreadyPresent(SidecarSource),
    Failed { source: SidecarSource, reason: String },
    /// No usable timestamp and no sibling scored high enough.
    Unmatched { best: Option<SidecarMatch> },
}

impl ReconstructionOutcome {
    pub fn source(&self) -> Option<&SidecarSource> {
        match self {
            ReconstructionOutcome::Planned(source)
            | ReconstructionOutcome::Written(source)
            | ReconstructionOutcome::AlreadyPresent(source)
            | ReconstructionOutcome::Failed { source, .. } => Some(source),
            ReconstructionOutcome::Unmatched { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionItem {
    pub media: PathBuf,
    pub sidecar: PathBuf,
    pub outcome: ReconstructionOutcome,
}

/// Result of a reconstruction pass.
#[derive(Debug)]
pub struct ReconstructionReport {
    pub mode: ReconstructionMode,
    pub summary: BatchSummary,
    pub items: Vec<ReconstructionItem>,
}

impl ReconstructionReport {
    /// Orphans found before any processing.
    pub fn orphans(&self) -> usize {
        self.summary.total
    }

    /// Orphans with a usable timestamp in their name.
    pub fn from_name(&self) -> usize {
        self.count(|source| matches!(source, SidecarSource::FileName { .. }))
    }

    /// Orphans matched to a similar sibling sidecar.
    pub fn from_similar(&self) -> usize {
        self.count(|source| matches!(source, SidecarSource::Similar(_)))
    }

    pub fn unmatched(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ReconstructionOutcome::Unmatched { .. }))
            .count()
    }

    pub fn written(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ReconstructionOutcome::Written(_)))
            .count()
    }

    pub fn written_from_name(&self) -> usize {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.outcome,
                    ReconstructionOutcome::Written(SidecarSource::FileName { .. })
                )
            })
            .count()
    }

    fn count<P: Fn(&SidecarSource) -> bool>(&self, predicate: P) -> usize {
        self.items
            .iter()
            .filter_map(|i| i.outcome.source())
            .filter(|source| predicate(source))
            .count()
    }
}

/// Media files without a sidecar.
#[derive(Debug, Clone)]
pub struct OrphanReport {
    pub root: PathBuf,
    pub media_count: usize,
    pub orphans: Vec<PathBuf>,
    /// The text report, when one was requested and there was something to
    /// report.
    pub report_file: Option<PathBuf>,
    pub cancelled: bool,
}

/// Media files and sidecars found in one directory.
#[derive(Debug, Default)]
struct DirectoryListing {
    media: Vec<PathBuf>,
    sidecars: Vec<PathBuf>,
}

/// Finds orphaned media and recreates their sidecars.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    scanner: Scanner,
    classifier: MediaClassifier,
    threshold: f64,
    noise_words: Vec<String>,
}

impl Reconstructor {
    pub fn new(scanner: Scanner, settings: &SidecarSettings) -> Self {
        Self {
            scanner,
            classifier: MediaClassifier::from_settings(settings),
            threshold: settings.similarity_threshold,
            noise_words: settings.noise_words.clone(),
        }
    }

    /// Groups media files and sidecars by directory.
    fn list_directories(&self) -> BTreeMap<PathBuf, DirectoryListing> {
        let mut listings: BTreeMap<PathBuf, DirectoryListing> = BTreeMap::new();
        for entry in self.scanner.walk_active_tree() {
            let path = entry.into_path();
            let Some(dir) = path.parent().map(Path::to_path_buf) else {
                continue;
            };
            let is_sidecar = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase().ends_with(SIDECAR_EXTENSION));
            if is_sidecar {
                listings.entry(dir).or_default().sidecars.push(path);
            } else if self.classifier.is_media(&path) {
                listings.entry(dir).or_default().media.push(path);
            }
        }
        for listing in listings.values_mut() {
            listing.media.sort();
            listing.sidecars.sort();
        }
        listings
    }

    /// Scores `media` against each sidecar and returns the best, whatever
    /// its score. Ties keep the first sidecar seen.
    pub fn best_match(&self, media: &Path, sidecars: &[PathBuf]) -> Option<SidecarMatch> {
        let media_name = media.file_name()?.to_string_lossy().into_owned();
        let normalized_media = normalize_name(&media_name, &self.noise_words);
        if normalized_media.is_empty() {
            return None;
        }

        let mut best: Option<SidecarMatch> = None;
        for sidecar in sidecars {
            let Some(name) = sidecar.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let base = strip_sidecar_extension(&name);
            let normalized = normalize_name(base, &self.noise_words);
            if normalized.is_empty() {
                continue;
            }
            let score = similarity::ratio(&normalized_media, &normalized);
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(SidecarMatch {
                    sidecar: sidecar.clone(),
                    score,
                });
            }
        }
        best.filter(|b| b.score > 0.0)
    }

    /// Runs both passes over every orphan under the root.
    pub fn run(&self, mode: ReconstructionMode, controls: &BatchControls) -> ReconstructionReport {
        let listings = self.list_directories();
        let orphans: Vec<(PathBuf, &[PathBuf])> = listings
            .values()
            .flat_map(|listing| {
                listing
                    .media
                    .iter()
                    .filter(|media| !sidecar_path(media).exists())
                    .map(|media| (media.clone(), listing.sidecars.as_slice()))
            })
            .collect();

        info!(root = %self.scanner.root().display(), orphans = orphans.len(), ?mode, "sidecar reconstruction started");
        let mut tracker = BatchTracker::start(Operation::ReconstructSidecars, orphans.len(), controls);
        let mut items = Vec::with_capacity(orphans.len());

        for (media, siblings) in orphans {
            if tracker.should_stop() {
                break;
            }
            let sidecar = sidecar_path(&media);
            let outcome = self.reconstruct_one(&media, &sidecar, siblings, mode);
            controls.line(describe(&media, &outcome));

            let report = match &outcome {
                ReconstructionOutcome::Planned(_) | ReconstructionOutcome::Written(_) => {
                    ItemReport::succeeded(&media, Some(sidecar.clone()))
                }
                ReconstructionOutcome::AlreadyPresent(_) => ItemReport::skipped(
                    &media,
                    LifecycleError::DestinationExists {
                        path: sidecar.clone(),
                    },
                ),
                ReconstructionOutcome::Failed { reason, .. } => ItemReport::errored(
                    &media,
                    LifecycleError::SidecarWrite {
                        path: sidecar.clone(),
                        reason: reason.clone(),
                    },
                ),
                ReconstructionOutcome::Unmatched { .. } => ItemReport::skipped(
                    &media,
                    LifecycleError::NoSidecarMatch {
                        path: media.clone(),
                    },
                ),
            };
            tracker.record(report);
            items.push(ReconstructionItem {
                media,
                sidecar,
                outcome,
            });
        }

        let report = ReconstructionReport {
            mode,
            summary: tracker.finish(),
            items,
        };
        info!(
            from_name = report.from_name(),
            from_similar = report.from_similar(),
            unmatched = report.unmatched(),
            written = report.written(),
            "sidecar reconstruction finished"
        );
        report
    }

    fn reconstruct_one(
        &self,
        media: &Path,
        sidecar: &Path,
        siblings: &[PathBuf],
        mode: ReconstructionMode,
    ) -> ReconstructionOutcome {
        let source = if let Some(timestamp) = extract_timestamp(media) {
            SidecarSource::FileName { timestamp }
        } else {
            match self.best_match(media, siblings) {
                Some(found) if found.score >= self.threshold => SidecarSource::Similar(found),
                best => return ReconstructionOutcome::Unmatched { best },
            }
        };

        if mode == ReconstructionMode::Simulate {
            return ReconstructionOutcome::Planned(source);
        }

        let content = match &source {
            SidecarSource::FileName { timestamp } => {
                let title = media
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                serde_json::to_string_pretty(&SidecarDocument::from_timestamp(title, *timestamp))
                    .map(String::into_bytes)
                    .map_err(io::Error::other)
            }
            SidecarSource::Similar(found) => fs::read(&found.sidecar),
        };

        match content.and_then(|bytes| write_new(sidecar, &bytes)) {
            Ok(()) => {
                debug!(sidecar = %sidecar.display(), "sidecar written");
                ReconstructionOutcome::Written(source)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                ReconstructionOutcome::AlreadyPresent(source)
            }
            Err(e) => {
                warn!(sidecar = %sidecar.display(), error = %e, "failed to write sidecar");
                ReconstructionOutcome::Failed {
                    source,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Lists media files lacking a sidecar, optionally saving the list as
    /// `orphan_report_<YYYYmmdd_HHMMSS>.txt` in the root.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ReportWrite`] when the report file cannot
    /// be written.
    pub fn orphan_report(&self, write_report: bool, controls: &BatchControls) -> LifecycleResult<OrphanReport> {
        let started = Instant::now();
        let media: Vec<PathBuf> = self
            .list_directories()
            .into_values()
            .flat_map(|listing| listing.media)
            .collect();
        let total = media.len();
        controls.sink.emit(ProgressEvent::Started {
            operation: Operation::OrphanReport,
            total,
        });

        let mut orphans = Vec::new();
        let mut cancelled = false;
        for (index, path) in media.iter().enumerate() {
            if controls.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if !sidecar_path(path).exists() {
                controls.line(format!("no sidecar: {}", path.display()));
                orphans.push(path.clone());
            }
            controls.sink.emit(ProgressEvent::Advanced {
                processed: index + 1,
                total,
                elapsed: started.elapsed(),
            });
        }

        let root = self.scanner.root().to_path_buf();
        let report_file = if write_report && !cancelled && !orphans.is_empty() {
            let path = root.join(format!(
                "orphan_report_{}.txt",
                Local::now().format("%Y%m%d_%H%M%S")
            ));
            write_orphan_file(&path, &root, total, &orphans)
                .map_err(|source| LifecycleError::ReportWrite {
                    path: path.clone(),
                    source,
                })?;
            controls.line(format!("report saved to {}", path.display()));
            Some(path)
        } else {
            None
        };

        controls.sink.emit(ProgressEvent::Finished {
            operation: Operation::OrphanReport,
            totals: BatchTotals {
                total,
                succeeded: total - orphans.len(),
                skipped: orphans.len(),
                errored: 0,
                duration: started.elapsed(),
            },
        });
        info!(media = total, orphans = orphans.len(), "orphan report finished");

        Ok(OrphanReport {
            root,
            media_count: total,
            orphans,
            report_file,
            cancelled,
        })
    }
}

fn strip_sidecar_extension(name: &str) -> &str {
    let cut = name.len().saturating_sub(SIDECAR_EXTENSION.len());
    match name.get(cut..) {
        Some(tail) if tail.eq_ignore_ascii_case(SIDECAR_EXTENSION) => &name[..cut],
        _ => name,
    }
}

/// Creates `path` with `bytes`, refusing to replace an existing file.
fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)
}

fn write_orphan_file(path: &Path, root: &Path, media_count: usize, orphans: &[PathBuf]) -> io::Result<()> {
    let mut text = format!(
        "ORPHAN MEDIA REPORT\nRoot: {}\nMedia files: {}\nWithout sidecar: {}\n\n",
        root.display(),
        media_count,
        orphans.len()
    );
    for orphan in orphans {
        text.push_str(&orphan.display().to_string());
        text.push('\n');
    }
    fs::write(path, text)
}

fn describe(media: &Path, outcome: &ReconstructionOutcome) -> String {
    let media = media.display();
    let origin = |source: &SidecarSource| match source {
        SidecarSource::FileName { timestamp } => format!("timestamp {} from name", timestamp),
        SidecarSource::Similar(found) => {
            format!("copy of {} ({:.2})", found.sidecar.display(), found.score)
        }
    };
    match outcome {
        ReconstructionOutcome::Planned(source) => format!("would create: {} <- {}", media, origin(source)),
        ReconstructionOutcome::Written(source) => format!("created: {} <- {}", media, origin(source)),
        ReconstructionOutcome::AlreadyPresent(_) => format!("sidecar already present: {}", media),
        ReconstructionOutcome::Failed { source, reason } => {
            format!("failed: {} <- {} ({})", media, origin(source), reason)
        }
        ReconstructionOutcome::Unmatched { best: Some(best) } => format!(
            "no match: {} (best {} at {:.2})",
            media,
            best.sidecar.display(),
            best.score
        ),
        ReconstructionOutcome::Unmatched { best: None } => format!("no match: {}", media),
    }
}
