// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The WindowPoSt partition scheduler.
//!
//! One task proves one partition of one proving deadline. The chain-head
//! watcher proposes tasks as deadlines come due, the bidding logic in
//! [`BidTask::can_accept`] arbitrates which worker runs them, and
//! [`BidTask::do_task`] generates and records the proof.

mod compute;


pub use compute::{PoStPartition, SubmitWindowedPoStParams};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use fvm_ipld_encoding::to_vec;
use fvm_shared::address::Address;
use fvm_shared::sector::SectorNumber;
use itertools::Itertools as _;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::api::{Tipset, WdPostApi};
use crate::chain_sched::HeadChangeHandler;
use crate::deadlines::new_deadline_info;
use crate::harmony::{
    resources, BidTask, DynamicRam, RamClaim, RamReservation, Resources, SchedulingInfo, StillOwned,
    TaskAndBid, TaskFactory, TaskId, TaskTypeDetails,
};
use crate::policy;
use crate::store::{PartitionTaskIdentity, ProofRecord, WdPostStore};
use crate::prover::{FaultTracker, ProverPoSt, Verifier};

/// Bid placed on tasks whose proving period has elapsed; far above any
/// urgency bid so stale rows are reaped before live work is scheduled.
const STALE_BID: i64 = 1000;

/// Retries after which persistently skipped sectors fail the task. Each
/// round shrinks the challenge set by the declared sectors, so a handful of
/// rounds is enough for any realistic fault cascade to settle.
const MAX_SKIP_RETRIES: usize = 5;

/// Readiness predicate for the proof parameter files.
pub type ParamsReady = Box<dyn Fn() -> Result<bool> + Send + Sync>;

/// Startup-only configuration.
pub struct WdPostConfig {
    /// Miner actors to prove for. Must be ID addresses.
    pub tracked_miners: Vec<Address>,
    /// Maximum concurrent proving tasks per process (0 = unbounded).
    pub max_tasks: usize,
    /// In-process proof parallelism (0 = unbounded).
    pub parallel: usize,
    /// Hard upper bound on a single proving attempt.
    pub challenge_read_timeout: Duration,
    /// Skip verifying generated proofs before recording them.
    pub disable_local_verification: bool,
}

impl Default for WdPostConfig {
    fn default() -> Self {
        Self {
            tracked_miners: Vec::new(),
            max_tasks: 0,
            parallel: 0,
            challenge_read_timeout: Duration::from_secs(10 * 60),
            disable_local_verification: false,
        }
    }
}

/// Failures with a structural cause; retried like any other failure but
/// kept distinct for diagnosis.
#[derive(Debug, Error)]
pub enum WdPostError {
    #[error("no partition task row for task {0}")]
    MissingTaskRow(TaskId),
    #[error("proof record insert affected no rows for task {0}")]
    ProofNotRecorded(TaskId),
    #[error("sectors still skipped after {retries} recovery rounds: {skipped:?}")]
    PersistentSkips {
        retries: usize,
        skipped: Vec<SectorNumber>,
    },
    #[error("generated proof failed local verification")]
    VerificationFailed,
}

pub struct WdPostTask<Api> {
    api: Arc<Api>,
    store: Arc<dyn WdPostStore>,
    prover: Arc<dyn ProverPoSt>,
    fault_tracker: Arc<dyn FaultTracker>,
    verifier: Arc<dyn Verifier>,
    params_ready: ParamsReady,

    task_factory: OnceCell<Arc<dyn TaskFactory>>,

    tracked_miners: Vec<Address>,
    max_tasks: usize,
    parallel: Option<Arc<Semaphore>>,
    challenge_read_timeout: Duration,
    disable_local_verification: bool,
}

impl<Api: WdPostApi + 'static> WdPostTask<Api> {
    pub fn new(
        api: Arc<Api>,
        store: Arc<dyn WdPostStore>,
        prover: Arc<dyn ProverPoSt>,
        fault_tracker: Arc<dyn FaultTracker>,
        verifier: Arc<dyn Verifier>,
        params_ready: ParamsReady,
        config: WdPostConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            store,
            prover,
            fault_tracker,
            verifier,
            params_ready,
            task_factory: OnceCell::new(),
            tracked_miners: config.tracked_miners,
            max_tasks: config.max_tasks,
            parallel: (config.parallel > 0).then(|| Arc::new(Semaphore::new(config.parallel))),
            challenge_read_timeout: config.challenge_read_timeout,
            disable_local_verification: config.disable_local_verification,
        })
    }

    /// Proposes one task per partition of the current proving deadline of
    /// every tracked miner. Safe to call repeatedly for the same tipset:
    /// the identity insert discards duplicates, so re-proposals and fork
    /// switches are no-ops.
    pub async fn process_head_change(&self, apply: &Tipset) -> Result<()> {
        for miner in &self.tracked_miners {
            let sp_id = miner
                .id()
                .map_err(|e| anyhow!("tracked miner {miner} is not an ID address: {e}"))?;

            let di = self
                .api
                .state_miner_proving_deadline(miner, apply.key())
                .await
                .with_context(|| format!("getting proving deadline for {miner}"))?;

            if !di.period_started() {
                // Not proving anything yet.
                debug!(%miner, "proving period not started");
                continue;
            }

            let partitions = self
                .api
                .state_miner_partitions(miner, di.index, apply.key())
                .await
                .with_context(|| format!("getting partitions for {miner}"))?;

            for partition_index in 0..partitions.len() as u64 {
                let identity = PartitionTaskIdentity {
                    sp_id,
                    proving_period_start: di.period_start,
                    deadline_index: di.index,
                    partition_index,
                };

                let factory = self
                    .task_factory
                    .get()
                    .ok_or_else(|| anyhow!("no task factory registered"))?;

                debug!(
                    sp_id,
                    deadline = di.index,
                    partition = partition_index,
                    "proposing window post task"
                );
                factory
                    .add_task(Box::new(move |id, tx| {
                        Box::pin(async move {
                            let inserted = tx.insert_partition_task(id, &identity).await?;
                            if !inserted {
                                debug!(task = %id, "window post task already scheduled");
                            }
                            Ok(inserted)
                        })
                    }))
                    .await?;
            }
        }
        Ok(())
    }

    /// Whether this task's proof is diverted into the test-results table.
    /// The answer is queried once per execution; `cache` memoizes it.
    async fn check_test_task(&self, id: TaskId, cache: &mut Option<bool>) -> bool {
        if let Some(known) = *cache {
            return known;
        }
        let is_test = match self.store.is_test_task(id).await {
            Ok(v) => v,
            Err(err) => {
                error!(task = %id, %err, "failed to query test-task marker");
                false
            }
        };
        *cache = Some(is_test);
        is_test
    }
}

#[async_trait]
impl<Api: WdPostApi + 'static> HeadChangeHandler for WdPostTask<Api> {
    async fn head_change(&self, _revert: Option<&Tipset>, apply: &Tipset) -> Result<()> {
        // Reverts need no action: outstanding tasks reference immutable
        // identity tuples, and the challenge tipset is resolved at prove
        // time against the then-current head.
        self.process_head_change(apply).await
    }
}

#[async_trait]
impl<Api: WdPostApi + 'static> BidTask for WdPostTask<Api> {
    fn type_details(&self) -> TaskTypeDetails {
        TaskTypeDetails {
            name: "WdPost",
            max: self.max_tasks,
            max_failures: 5,
            cost: Resources {
                cpu: 1,
                gpu: 0,
                ram: RamClaim::Dynamic {
                    fallback: resources::min_window_post_memory(),
                    claim: Arc::new(WdPostRam {
                        api: self.api.clone(),
                        store: self.store.clone(),
                    }),
                },
            },
        }
    }

    async fn can_accept(&self, ids: &[TaskId], _info: &SchedulingInfo) -> Result<Vec<TaskAndBid>> {
        let ready = (self.params_ready)().context("checking proof parameters")?;
        if !ready {
            info!("proof parameters not ready, not bidding on window post tasks");
            return Ok(Vec::new());
        }

        let head = self.api.chain_head().await?;
        let tasks = self.store.partition_tasks(ids).await?;

        let deadlines: Vec<_> = tasks
            .iter()
            .map(|t| {
                new_deadline_info(
                    t.identity.proving_period_start,
                    t.identity.deadline_index,
                    head.epoch(),
                )
            })
            .collect();

        // Accept tasks past their deadline unconditionally, to be deleted
        // in do_task. While any exist they crowd out urgency bidding so a
        // stale row can never starve the queue.
        let stale: Vec<TaskAndBid> = tasks
            .iter()
            .zip(&deadlines)
            .filter(|(_, dl)| dl.period_elapsed())
            .map(|(t, _)| TaskAndBid {
                task_id: t.task_id,
                bid: STALE_BID,
            })
            .collect();
        if !stale.is_empty() {
            info!(count = stale.len(), "window post tasks past deadline, accepting for removal");
            return Ok(stale);
        }

        // The sooner a task's window opens, the higher it bids; recorded
        // failures pull a task's bid back down.
        let mut rank = vec![0i64; tasks.len()];
        for (r, i) in (0..tasks.len()).sorted_by_key(|&i| deadlines[i].open).enumerate() {
            rank[i] = r as i64;
        }

        let n = tasks.len() as i64;
        let mut bids = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            let mut bid = n + 10 - rank[i];
            match self.store.failed_attempts(task.task_id).await {
                Ok(failures) => bid -= failures as i64,
                Err(err) => {
                    warn!(task = %task.task_id, %err, "failed to query task failure history");
                }
            }
            bids.push(TaskAndBid {
                task_id: task.task_id,
                bid,
            });
        }
        Ok(bids)
    }

    async fn do_task(&self, task_id: TaskId, still_owned: StillOwned) -> Result<()> {
        debug!(task = %task_id, "window post task start");

        let task = self
            .store
            .partition_task(task_id)
            .await
            .context("loading partition task")?
            .ok_or(WdPostError::MissingTaskRow(task_id))?;
        let identity = task.identity;

        let head = self.api.chain_head().await.context("getting chain head")?;

        let mut test_cache = None;
        let mut deadline = new_deadline_info(
            identity.proving_period_start,
            identity.deadline_index,
            head.epoch(),
        );

        if deadline.period_elapsed() && !self.check_test_task(task_id, &mut test_cache).await {
            warn!(
                task = %task_id,
                sp_id = identity.sp_id,
                deadline = identity.deadline_index,
                "removing stale window post task"
            );
            return Ok(());
        }

        if deadline.challenge > head.epoch() && self.check_test_task(task_id, &mut test_cache).await
        {
            // A test task may be created ahead of its window; prove against
            // the previous instance of the deadline instead.
            let period = deadline.proving_period();
            deadline = new_deadline_info(
                identity.proving_period_start - period,
                identity.deadline_index,
                head.epoch() - period,
            );
            warn!(task = %task_id, challenge = deadline.challenge, "test task challenge in the future, proving previous period");
        }

        let miner = Address::new_id(identity.sp_id);
        let challenge_ts = self
            .api
            .chain_get_tipset_after_height(deadline.challenge, head.key())
            .await
            .context("looking up challenge tipset")?;

        let post_out = self
            .do_partition(
                &challenge_ts,
                miner,
                &deadline,
                identity.partition_index,
                &still_owned,
            )
            .await
            .context("proving partition")?;

        let proof_params = to_vec(&post_out).context("marshaling post params")?;

        if self.check_test_task(task_id, &mut test_cache).await {
            // Divert the proof away from the chain, into the test-results
            // table.
            let doc = serde_json::to_string_pretty(&serde_json::json!({
                "sp_id": identity.sp_id,
                "proving_period_start": identity.proving_period_start,
                "deadline": deadline.index,
                "partition": identity.partition_index,
                "submit_at_epoch": deadline.open,
                "submit_by_epoch": deadline.close,
                "post_out": post_out,
                "proof_params": proof_params,
            }))
            .context("rendering test result")?;

            let n = self
                .store
                .set_test_result(task_id, &doc)
                .await
                .context("storing test result")?;
            if n != 1 {
                bail!("test result update affected {n} rows for task {task_id}");
            }
            info!(task = %task_id, "test task complete, result diverted to test table");
            return Ok(());
        }

        let record = ProofRecord {
            sp_id: identity.sp_id,
            proving_period_start: identity.proving_period_start,
            deadline: deadline.index,
            partition: identity.partition_index,
            submit_at_epoch: deadline.open,
            submit_by_epoch: deadline.close,
            proof_params,
        };
        let n = self
            .store
            .insert_proof(&record)
            .await
            .context("inserting proof record")?;
        if n != 1 {
            error!(task = %task_id, rows = n, "proof record insert affected unexpected row count");
            return Err(WdPostError::ProofNotRecorded(task_id).into());
        }

        info!(
            task = %task_id,
            sp_id = identity.sp_id,
            deadline = deadline.index,
            partition = identity.partition_index,
            "window post proof recorded"
        );
        Ok(())
    }

    fn register_adder(&self, factory: Arc<dyn TaskFactory>) {
        if self.task_factory.set(factory).is_err() {
            warn!("window post task factory already registered");
        }
    }
}

/// Sizes a task's memory reservation by the proof type of its miner's
/// sectors.
struct WdPostRam<Api> {
    api: Arc<Api>,
    store: Arc<dyn WdPostStore>,
}

#[async_trait]
impl<Api: WdPostApi + 'static> DynamicRam for WdPostRam<Api> {
    async fn claim(&self, id: TaskId) -> Result<RamReservation> {
        let task = self
            .store
            .partition_task(id)
            .await?
            .ok_or(WdPostError::MissingTaskRow(id))?;
        let miner = Address::new_id(task.identity.sp_id);

        let head = self.api.chain_head().await.context("getting chain head")?;
        let info = self
            .api
            .state_miner_info(&miner, head.key())
            .await
            .context("getting miner info")?;

        let seal_proof = policy::seal_proof_from_post_proof(info.window_post_proof_type)?;
        Ok(RamReservation {
            bytes: resources::window_post_max_memory(seal_proof),
        })
    }
}
