//! Error kinds shared by the lifecycle engine, the ledger and the sidecar
//! reconstruction pass.
//!
//! Only [`LifecycleError::InvalidRoot`], [`LifecycleError::InvalidFilter`] and
//! [`LifecycleError::Busy`] abort a batch. Every other kind is recorded as a
//! per-item outcome or warning inside a [`crate::batch::BatchSummary`].

use crate::hasher::ContentHash;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while running a batch or a single transition.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The processing root is missing or is not a directory.
    #[error("invalid root {}: not an existing directory", path.display())]
    InvalidRoot { path: PathBuf },

    /// The suffix or filter supplied for a batch cannot be used.
    #[error("invalid filter: {reason}")]
    InvalidFilter { reason: String },

    /// Another batch is already running against the same root.
    #[error("a batch is already running for {}", root.display())]
    Busy { root: PathBuf },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file vanished or could not be read while computing its hash.
    #[error("cannot hash {}: {source}", path.display())]
    HashUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The ledger backing store is missing or corrupt. Never fatal.
    #[error("ledger unavailable at {}: {reason}", path.display())]
    LedgerUnavailable { path: PathBuf, reason: String },

    /// Appending to the ledger failed after the filesystem work was done.
    #[error("failed to write ledger {}: {reason}", path.display())]
    LedgerWrite { path: PathBuf, reason: String },

    /// Revert refused: no ledger entry vouches for the file's current content.
    #[error("no ledger record matches {} with its current content", path.display())]
    NoLedgerRecord { path: PathBuf },

    /// Restore proceeded although the content differs from the recorded hash.
    #[error("hash of {} is {actual}, ledger recorded {recorded}", path.display())]
    HashMismatch {
        path: PathBuf,
        recorded: ContentHash,
        actual: ContentHash,
    },

    /// The computed destination already exists; nothing is overwritten.
    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// An explicit selection pointed inside the quarantine area.
    #[error("{} is inside the quarantine area", path.display())]
    InsideQuarantine { path: PathBuf },

    #[error("{} is outside the processing root", path.display())]
    OutsideRoot { path: PathBuf },

    #[error("date-stamping tool not found: {program}")]
    ToolNotFound { program: String },

    #[error("date-stamping tool failed: {reason}")]
    Subprocess { reason: String },

    #[error("failed to write sidecar {}: {reason}", path.display())]
    SidecarWrite { path: PathBuf, reason: String },

    /// Neither the file name nor any sibling sidecar yielded metadata.
    #[error("no timestamp in name and no similar sidecar for {}", path.display())]
    NoSidecarMatch { path: PathBuf },

    #[error("failed to write report {}: {source}", path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    /// Returns the path this error is about, when it has one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::InvalidRoot { path }
            | Self::Delete { path, .. }
            | Self::CreateDir { path, .. }
            | Self::HashUnreadable { path, .. }
            | Self::LedgerUnavailable { path, .. }
            | Self::LedgerWrite { path, .. }
            | Self::NoLedgerRecord { path }
            | Self::HashMismatch { path, .. }
            | Self::DestinationExists { path }
            | Self::NotFound { path }
            | Self::InsideQuarantine { path }
            | Self::OutsideRoot { path }
            | Self::SidecarWrite { path, .. }
            | Self::NoSidecarMatch { path }
            | Self::ReportWrite { path, .. } => Some(path),
            Self::Move { from, .. } | Self::Copy { from, .. } => Some(from),
            Self::Busy { root } => Some(root),
            Self::InvalidFilter { .. } | Self::ToolNotFound { .. } | Self::Subprocess { .. } => {
                None
            }
        }
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
