//! dirward - reversible file lifecycle management for directory trees
//!
//! This library renames files by suffix, moves them into and out of a
//! quarantine area, and deletes them, recording every step in an append-only
//! ledger keyed by SHA-256 content hashes so that reverts and restores only
//! touch files whose content is still the one recorded. It also rebuilds
//! missing metadata sidecars for media files and hands their timestamps to
//! exiftool.

pub mod batch;
pub mod cli;
pub mod config;
pub mod datestamp;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod history;
pub mod ledger;
pub mod logging;
pub mod media;
pub mod output;
pub mod runner;
pub mod scanner;
pub mod sidecar;
pub mod similarity;

pub use batch::{
    BatchControls, BatchSummary, CancelToken, ConfirmGate, ConfirmRequest, ItemOutcome, ItemReport, Operation,
    ProgressEvent, ProgressSink,
};
pub use config::{AppConfig, CompiledFilters, ConfigError};
pub use engine::{LifecycleEngine, Selection};
pub use error::{LifecycleError, LifecycleResult};
pub use hasher::ContentHash;
pub use ledger::{Action, Ledger, LedgerEntry};
pub use runner::{BatchHandle, BatchRunner};
pub use scanner::ScanPredicate;
pub use sidecar::{ReconstructionMode, ReconstructionReport, Reconstructor};

pub use cli::{Cli, run};
