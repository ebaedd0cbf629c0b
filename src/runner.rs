//! Background execution of batches.
//!
//! [`BatchRunner`] claims the root, then runs the batch on its own thread
//! and hands back a [`BatchHandle`]. The caller keeps consuming progress
//! events on its side and joins the handle for the final result. The root
//! is released when the batch thread finishes.

use crate::batch::{BatchControls, BatchSummary, CancelToken, Operation, RootGuard};
use crate::datestamp::DatestampOutcome;
use crate::engine::{LifecycleEngine, Selection};
use crate::error::LifecycleResult;
use crate::sidecar::{OrphanReport, ReconstructionMode, ReconstructionReport};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A batch running in the background.
#[derive(Debug)]
pub struct BatchHandle<T> {
    operation: Operation,
    cancel: CancelToken,
    thread: JoinHandle<T>,
}

impl<T> BatchHandle<T> {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Asks the batch to stop before its next item.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the batch and returns its result.
    ///
    /// A panic on the batch thread is resumed on the caller's thread.
    pub fn join(self) -> T {
        match self.thread.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// Starts engine operations on background threads, one batch per root at a
/// time.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    engine: Arc<LifecycleEngine>,
}

impl BatchRunner {
    pub fn new(engine: LifecycleEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// True while any batch holds the engine's root.
    pub fn is_busy(&self) -> bool {
        self.engine.is_busy()
    }

    pub fn start_rename(
        &self,
        from: String,
        to: String,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Rename, controls, move |engine, controls| {
            engine.run_rename(&from, &to, controls)
        })
    }

    pub fn start_revert(
        &self,
        from: String,
        to: String,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Revert, controls, move |engine, controls| {
            engine.run_revert(&from, &to, controls)
        })
    }

    pub fn start_quarantine(
        &self,
        selection: Selection,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Quarantine, controls, move |engine, controls| {
            engine.run_quarantine(&selection, controls)
        })
    }

    pub fn start_delete(
        &self,
        selection: Selection,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Delete, controls, move |engine, controls| {
            engine.run_delete(&selection, controls)
        })
    }

    pub fn start_restore(
        &self,
        selection: Selection,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Restore, controls, move |engine, controls| {
            engine.run_restore(&selection, controls)
        })
    }

    pub fn start_purge(
        &self,
        selection: Selection,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<BatchSummary>>> {
        self.spawn(Operation::Purge, controls, move |engine, controls| {
            engine.run_purge(&selection, controls)
        })
    }

    pub fn start_reconstruction(
        &self,
        mode: ReconstructionMode,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<ReconstructionReport>> {
        self.spawn(
            Operation::ReconstructSidecars,
            controls,
            move |engine, controls| engine.reconstructor().run(mode, controls),
        )
    }

    pub fn start_orphan_report(
        &self,
        write_report: bool,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<OrphanReport>>> {
        self.spawn(Operation::OrphanReport, controls, move |engine, controls| {
            engine.reconstructor().orphan_report(write_report, controls)
        })
    }

    pub fn start_datestamp(
        &self,
        controls: BatchControls,
    ) -> LifecycleResult<BatchHandle<LifecycleResult<DatestampOutcome>>> {
        self.spawn(Operation::Datestamp, controls, move |engine, controls| {
            engine.datestamper().run(controls)
        })
    }

    /// Claims the root on the calling thread, so a busy root fails fast,
    /// then moves the claim into the batch thread.
    fn spawn<T, F>(&self, operation: Operation, controls: BatchControls, work: F) -> LifecycleResult<BatchHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&LifecycleEngine, &BatchControls) -> T + Send + 'static,
    {
        let guard = RootGuard::acquire(self.engine.root())?;
        let engine = Arc::clone(&self.engine);
        let cancel = controls.cancel.clone();
        let thread = thread::spawn(move || {
            let _guard = guard;
            work(&engine, &controls)
        });
        Ok(BatchHandle {
            operation,
            cancel,
            thread,
        })
    }
}
