// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Durable rows the scheduler reads and writes.
//!
//! The partition-task table is the sole synchronization point between the
//! chain-head watcher and the worker processes; uniqueness of the logical
//! identity tuple is enforced by the database. Access goes through
//! [`WdPostStore`] so the scheduling logic stays independent of the
//! concrete database; [`postgres`] provides the production implementation.

pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::ActorID;

use crate::harmony::TaskId;

/// Logical identity of a partition-proving task. At most one live task row
/// exists per identity; duplicate proposals are discarded on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionTaskIdentity {
    pub sp_id: ActorID,
    pub proving_period_start: ChainEpoch,
    pub deadline_index: u64,
    pub partition_index: u64,
}

/// A hydrated partition-task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTask {
    pub task_id: TaskId,
    pub identity: PartitionTaskIdentity,
}

/// One recorded proof, ready for the downstream on-chain submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRecord {
    pub sp_id: ActorID,
    pub proving_period_start: ChainEpoch,
    pub deadline: u64,
    pub partition: u64,
    pub submit_at_epoch: ChainEpoch,
    pub submit_by_epoch: ChainEpoch,
    /// Canonical binary encoding of the proof message parameters.
    pub proof_params: Vec<u8>,
}

/// The relational rows this system touches. The `harmony_*` tables are
/// owned by the task runtime; this system only reads attempt history and
/// test markers from them, and writes test results.
#[async_trait]
pub trait WdPostStore: Send + Sync {
    /// The identity row for one task, if present.
    async fn partition_task(&self, id: TaskId) -> Result<Option<PartitionTask>>;

    /// Batch-hydrates identity rows. Ids without a row are silently
    /// dropped from the result.
    async fn partition_tasks(&self, ids: &[TaskId]) -> Result<Vec<PartitionTask>>;

    /// Number of recorded failed attempts for a task.
    async fn failed_attempts(&self, id: TaskId) -> Result<u64>;

    /// Whether a test-results row exists for this task, diverting its proof
    /// away from on-chain submission.
    async fn is_test_task(&self, id: TaskId) -> Result<bool>;

    /// Stores the rendered result of a test task. Returns rows affected.
    async fn set_test_result(&self, id: TaskId, result: &str) -> Result<u64>;

    /// Inserts one proof record. Returns rows affected.
    async fn insert_proof(&self, record: &ProofRecord) -> Result<u64>;
}
