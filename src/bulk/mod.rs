//! # Bulk Mutation Engine
//!
//! Walks a population of entities in consecutive fixed-size batches, one
//! read-write transaction per batch, applying a [`BulkStep`] to each entity.
//!
//! Failure isolation:
//!
//! | Failure | Effect |
//! |---------|--------|
//! | `StepFailure::Entity` | entity skipped, batch continues |
//! | `StepFailure::Batch` | batch rolled back, job continues |
//! | commit error | batch discarded, job continues |
//! | `begin_tx` error | job aborted with `Err` |
//!
//! Batches run strictly in sequence. A [`CancellationFlag`] is checked
//! before each batch starts, never inside one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::Entity;
use crate::security::SecurityContext;
use crate::services::DEFAULT_BATCH_SIZE;
use crate::storage::StorageBackend;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

// ============================================================================
// Step outcome
// ============================================================================

/// Why a step could not complete.
#[derive(Debug)]
pub enum StepFailure {
    /// Skip this entity; the rest of the batch proceeds.
    Entity(Error),
    /// Abandon the whole batch; it is rolled back.
    Batch(Error),
}

impl StepFailure {
    pub fn error(&self) -> &Error {
        match self {
            StepFailure::Entity(e) | StepFailure::Batch(e) => e,
        }
    }
}

pub type StepResult = std::result::Result<(), StepFailure>;

/// Cumulative progress, reported after every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkProgress {
    /// One-based index of the batch just finished.
    pub batch: u64,
    /// Entities taken from the input so far. A failed batch counts in full,
    /// including the entities discarded after the failing one.
    pub processed: u64,
    /// Entities whose step succeeded in a committed batch.
    pub succeeded: u64,
}

/// Cooperative cancellation shared between a job and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// BulkStep
// ============================================================================

/// Per-entity work plus lifecycle hooks.
pub trait BulkStep<B: StorageBackend> {
    /// Apply the mutation to one entity inside the batch transaction.
    fn handle(&mut self, backend: &B, tx: &mut B::Tx, ctx: &SecurityContext, entity: &Entity) -> StepResult;

    /// Called after an entity-level failure has been logged.
    fn on_entity_failure(&mut self, _ctx: &SecurityContext, _entity: &Entity, _error: &Error) {}

    /// Called when a batch is rolled back or its commit fails.
    fn on_transaction_failure(&mut self, _ctx: &SecurityContext, _error: &Error) {}

    /// Called after a batch commits.
    fn on_batch_committed(&mut self) {}

    fn on_progress(&mut self, _progress: &BulkProgress) {}
}

impl<B, F> BulkStep<B> for F
where
    B: StorageBackend,
    F: FnMut(&B, &mut B::Tx, &SecurityContext, &Entity) -> StepResult,
{
    fn handle(&mut self, backend: &B, tx: &mut B::Tx, ctx: &SecurityContext, entity: &Entity) -> StepResult {
        self(backend, tx, ctx, entity)
    }
}

// ============================================================================
// BulkMutation
// ============================================================================

/// A configured bulk job.
///
/// ```
/// use trellis::{BulkMutation, Entity, MemoryBackend, SecurityContext, StepResult};
/// use trellis::storage::MemoryTx;
///
/// let backend = MemoryBackend::new();
/// let mut step = |_: &MemoryBackend, _: &mut MemoryTx, _: &SecurityContext, _: &Entity| -> StepResult { Ok(()) };
/// let done = BulkMutation::new("noop")
///     .batch_size(10)
///     .run(&backend, &SecurityContext::super_user(), Vec::new(), &mut step)
///     .unwrap();
/// assert_eq!(done, 0);
/// ```
#[derive(Debug, Clone)]
pub struct BulkMutation {
    label: String,
    batch_size: usize,
    cancel: Option<CancellationFlag>,
}

impl BulkMutation {
    /// `label` names the job in log output.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn cancel_on(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `step` over `entities` and return the number of entities that
    /// succeeded in committed batches.
    pub fn run<B, S>(
        &self,
        backend: &B,
        ctx: &SecurityContext,
        entities: impl IntoIterator<Item = Entity>,
        step: &mut S,
    ) -> Result<u64>
    where
        B: StorageBackend,
        S: BulkStep<B> + ?Sized,
    {
        if self.batch_size == 0 {
            return Err(Error::Config(format!("bulk job '{}': batch size must be at least 1", self.label)));
        }
        let batch_size = match backend.capabilities().max_batch_size {
            Some(max) if max > 0 && max < self.batch_size => max,
            _ => self.batch_size,
        };

        info!(target: "trellis::bulk", job = %self.label, batch_size, %ctx, "Starting bulk job");

        let mut entities = entities.into_iter();
        let mut progress = BulkProgress::default();

        loop {
            let batch: Vec<Entity> = entities.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled) {
                info!(target: "trellis::bulk", job = %self.label, succeeded = progress.succeeded, "Bulk job cancelled");
                break;
            }
            progress.batch += 1;

            let mut tx = backend.begin_tx(TxMode::ReadWrite)?;
            let tx_id = tx.id();
            let mut batch_succeeded = 0u64;
            let mut batch_failure = None;
            progress.processed += batch.len() as u64;

            for entity in &batch {
                match step.handle(backend, &mut tx, ctx, entity) {
                    Ok(()) => batch_succeeded += 1,
                    Err(StepFailure::Entity(err)) => {
                        warn!(target: "trellis::bulk", job = %self.label, entity = %entity.id(), error = %err, "Entity skipped");
                        step.on_entity_failure(ctx, entity, &err);
                    }
                    Err(StepFailure::Batch(err)) => {
                        batch_failure = Some(err);
                        break;
                    }
                }
            }

            match batch_failure {
                Some(err) => {
                    warn!(target: "trellis::bulk", job = %self.label, tx = %tx_id, error = %err, "Batch failed, rolling back");
                    if let Err(rollback_err) = backend.rollback_tx(tx) {
                        warn!(target: "trellis::bulk", job = %self.label, tx = %tx_id, error = %rollback_err, "Rollback failed");
                    }
                    step.on_transaction_failure(ctx, &err);
                }
                None => match backend.commit_tx(tx) {
                    Ok(()) => {
                        progress.succeeded += batch_succeeded;
                        step.on_batch_committed();
                    }
                    Err(err) => {
                        warn!(target: "trellis::bulk", job = %self.label, tx = %tx_id, error = %err, "Commit failed, batch discarded");
                        step.on_transaction_failure(ctx, &err);
                    }
                },
            }

            debug!(
                target: "trellis::bulk",
                job = %self.label,
                batch = progress.batch,
                processed = progress.processed,
                succeeded = progress.succeeded,
                "Batch finished"
            );
            step.on_progress(&progress);
        }

        info!(
            target: "trellis::bulk",
            job = %self.label,
            batches = progress.batch,
            processed = progress.processed,
            succeeded = progress.succeeded,
            "Bulk job finished"
        );
        Ok(progress.succeeded)
    }
}
