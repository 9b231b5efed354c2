// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Interfaces consumed from the external durable task runtime.
//!
//! The runtime owns the task lifecycle: it persists task rows, offers
//! batches of task ids to competing workers, collects bids, guarantees
//! at-most-one concurrent execution per task across the cluster, retries
//! failures up to [`TaskTypeDetails::max_failures`] and deletes rows once a
//! task reports success. This crate only implements the runtime-facing
//! surface ([`BidTask`]) and calls back into the runtime through
//! [`TaskFactory`].

pub mod resources;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::store::PartitionTaskIdentity;

pub use resources::{DynamicRam, RamClaim, RamReservation, Resources};

/// Identifier the runtime assigns to a persisted task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The slice of the runtime's task-creation transaction this crate uses.
///
/// Implementations run the insert inside the same database transaction that
/// persists the runtime's own task row, so a discarded verdict rolls both
/// back together.
#[async_trait]
pub trait TaskTx: Send {
    /// Inserts the partition-task identity row for a newly allocated task.
    /// Returns `false` when the logical key already exists and the insert
    /// was discarded.
    async fn insert_partition_task(
        &mut self,
        id: TaskId,
        identity: &PartitionTaskIdentity,
    ) -> Result<bool>;
}

/// Callback run by the task factory inside its insert transaction. The
/// task row is committed only when the callback resolves to `Ok(true)`.
pub type TaskCreator =
    Box<dyn for<'a> FnOnce(TaskId, &'a mut dyn TaskTx) -> BoxFuture<'a, Result<bool>> + Send>;

/// Task factory supplied by the runtime: allocates a task id and runs the
/// creator callback transactionally.
#[async_trait]
pub trait TaskFactory: Send + Sync {
    async fn add_task(&self, create: TaskCreator) -> Result<()>;
}

/// Context the runtime passes along with a bidding round. The current
/// bidding policy does not consult it.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct SchedulingInfo;

/// A bid on an offered task. Higher bids win; negative bids are allowed
/// and preserve relative ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAndBid {
    pub task_id: TaskId,
    pub bid: i64,
}

/// Static description of a task type, registered with the runtime once at
/// startup.
pub struct TaskTypeDetails {
    pub name: &'static str,
    /// Maximum concurrent executions per process (0 = runtime default).
    pub max: usize,
    /// Failures after which the runtime gives a task up and deletes it.
    pub max_failures: u32,
    pub cost: Resources,
}

/// Whether the executing worker still owns the task. The runtime may revoke
/// ownership mid-execution; long stages should consult this before starting.
pub type StillOwned = Arc<dyn Fn() -> bool + Send + Sync>;

/// The runtime-facing surface of a bidding task implementation.
#[async_trait]
pub trait BidTask: Send + Sync {
    fn type_details(&self) -> TaskTypeDetails;

    /// Bids on a batch of offered task ids. Tasks absent from the result
    /// are declined for this round.
    async fn can_accept(&self, ids: &[TaskId], info: &SchedulingInfo) -> Result<Vec<TaskAndBid>>;

    /// Executes a task the bid won. `Ok(())` lets the runtime delete the
    /// row; `Err` counts as a non-terminal failure and is retried up to
    /// [`TaskTypeDetails::max_failures`] times.
    async fn do_task(&self, id: TaskId, still_owned: StillOwned) -> Result<()>;

    /// Receives the runtime's task factory once at startup.
    fn register_adder(&self, factory: Arc<dyn TaskFactory>);
}
