// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory doubles for the scheduler's external collaborators.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{PoStProof, RegisteredPoStProof, SectorNumber, SectorSize};
use fvm_shared::version::NetworkVersion;
use fvm_shared::ActorID;
use parking_lot::Mutex;

use crate::api::{
    DomainSeparationTag, MinerInfo, Partition, SectorOnChainInfo, Tipset, TipsetKey, WdPostApi,
};
use crate::deadlines::{new_deadline_info, DeadlineInfo};
use crate::harmony::{TaskCreator, TaskFactory, TaskId, TaskTx};
use crate::policy::{WPOST_CHALLENGE_WINDOW, WPOST_PROVING_PERIOD};
use crate::prover::{
    FaultTracker, PostSectorChallenge, ProverPoSt, Verifier, WindowPoStResult,
    WindowPoStVerifyInfo,
};
use crate::store::{PartitionTask, PartitionTaskIdentity, ProofRecord, WdPostStore};

pub fn test_cid(seed: u64) -> Cid {
    let mh = cid::multihash::Multihash::wrap(0x0, &seed.to_le_bytes()).unwrap();
    Cid::new_v1(0x55, mh)
}

pub fn tipset_at(epoch: ChainEpoch) -> Tipset {
    Tipset::new(TipsetKey::new(vec![test_cid(epoch as u64)]), epoch)
}

pub fn sector_info(number: SectorNumber) -> SectorOnChainInfo {
    SectorOnChainInfo {
        sector_number: number,
        seal_proof: fvm_shared::sector::RegisteredSealProof::StackedDRG2KiBV1P1,
        sealed_cid: test_cid(number),
    }
}

pub fn bitfield(bits: &[u64]) -> BitField {
    BitField::try_from_bits(bits.iter().copied()).unwrap()
}

// ---------------------------------------------------------------------------
// Store

#[derive(Default)]
struct MemStoreInner {
    next_id: i64,
    tasks: BTreeMap<i64, PartitionTaskIdentity>,
    failures: BTreeMap<i64, u64>,
    test_rows: BTreeMap<i64, Option<String>>,
    proofs: Vec<ProofRecord>,
}

/// In-memory stand-in for the shared task tables, including the slice of
/// the runtime's factory behavior the watcher exercises.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

impl MemStore {
    /// Inserts a task row directly, bypassing the factory.
    pub fn seed_task(&self, identity: PartitionTaskIdentity) -> TaskId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.tasks.insert(id, identity);
        TaskId(id)
    }

    pub fn set_failures(&self, id: TaskId, failures: u64) {
        self.inner.lock().failures.insert(id.0, failures);
    }

    pub fn add_test_row(&self, id: TaskId) {
        self.inner.lock().test_rows.insert(id.0, None);
    }

    pub fn test_result(&self, id: TaskId) -> Option<String> {
        self.inner.lock().test_rows.get(&id.0).cloned().flatten()
    }

    pub fn task_identities(&self) -> Vec<PartitionTaskIdentity> {
        self.inner.lock().tasks.values().copied().collect()
    }

    pub fn proofs(&self) -> Vec<ProofRecord> {
        self.inner.lock().proofs.clone()
    }
}

#[async_trait]
impl WdPostStore for MemStore {
    async fn partition_task(&self, id: TaskId) -> Result<Option<PartitionTask>> {
        Ok(self.inner.lock().tasks.get(&id.0).map(|identity| PartitionTask {
            task_id: id,
            identity: *identity,
        }))
    }

    async fn partition_tasks(&self, ids: &[TaskId]) -> Result<Vec<PartitionTask>> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.tasks.get(&id.0).map(|identity| PartitionTask {
                    task_id: *id,
                    identity: *identity,
                })
            })
            .collect())
    }

    async fn failed_attempts(&self, id: TaskId) -> Result<u64> {
        Ok(self.inner.lock().failures.get(&id.0).copied().unwrap_or(0))
    }

    async fn is_test_task(&self, id: TaskId) -> Result<bool> {
        Ok(self.inner.lock().test_rows.contains_key(&id.0))
    }

    async fn set_test_result(&self, id: TaskId, result: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        match inner.test_rows.get_mut(&id.0) {
            Some(slot) => {
                *slot = Some(result.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_proof(&self, record: &ProofRecord) -> Result<u64> {
        self.inner.lock().proofs.push(record.clone());
        Ok(1)
    }
}

struct MemTx<'a> {
    store: &'a MemStore,
    staged: Option<(i64, PartitionTaskIdentity)>,
}

#[async_trait]
impl<'a> TaskTx for MemTx<'a> {
    async fn insert_partition_task(
        &mut self,
        id: TaskId,
        identity: &PartitionTaskIdentity,
    ) -> Result<bool> {
        if self.store.inner.lock().tasks.values().any(|t| t == identity) {
            return Ok(false);
        }
        self.staged = Some((id.0, *identity));
        Ok(true)
    }
}

#[async_trait]
impl TaskFactory for MemStore {
    async fn add_task(&self, create: TaskCreator) -> Result<()> {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            TaskId(inner.next_id)
        };
        let mut tx = MemTx {
            store: self,
            staged: None,
        };
        let commit = create(id, &mut tx).await?;
        if commit {
            if let Some((id, identity)) = tx.staged {
                self.inner.lock().tasks.insert(id, identity);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chain

#[derive(Default)]
struct MockChainInner {
    head_epoch: ChainEpoch,
    miners: BTreeMap<ActorID, ChainEpoch>,
    miner_infos: BTreeMap<ActorID, MinerInfo>,
    partitions: BTreeMap<(ActorID, u64), Vec<Partition>>,
    sectors: BTreeMap<ActorID, Vec<SectorOnChainInfo>>,
    after_height_calls: Vec<ChainEpoch>,
}

pub struct MockChain {
    inner: Mutex<MockChainInner>,
    pub network_version: NetworkVersion,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            inner: Mutex::default(),
            network_version: NetworkVersion::V21,
        }
    }
}

impl MockChain {
    pub fn set_head(&self, epoch: ChainEpoch) {
        self.inner.lock().head_epoch = epoch;
    }

    pub fn head(&self) -> Tipset {
        tipset_at(self.inner.lock().head_epoch)
    }

    /// Registers a miner with its proving-period start.
    pub fn register_miner(&self, id: ActorID, period_start: ChainEpoch) {
        let mut inner = self.inner.lock();
        inner.miners.insert(id, period_start);
        inner.miner_infos.insert(
            id,
            MinerInfo {
                window_post_proof_type: RegisteredPoStProof::StackedDRGWindow2KiBV1P1,
                sector_size: SectorSize::_2KiB,
            },
        );
    }

    pub fn set_partitions(&self, id: ActorID, deadline_idx: u64, partitions: Vec<Partition>) {
        self.inner.lock().partitions.insert((id, deadline_idx), partitions);
    }

    pub fn set_sectors(&self, id: ActorID, sectors: Vec<SectorOnChainInfo>) {
        self.inner.lock().sectors.insert(id, sectors);
    }

    pub fn after_height_calls(&self) -> Vec<ChainEpoch> {
        self.inner.lock().after_height_calls.clone()
    }
}

#[async_trait]
impl WdPostApi for MockChain {
    async fn chain_head(&self) -> Result<Tipset> {
        Ok(self.head())
    }

    async fn chain_get_tipset(&self, _key: &TipsetKey) -> Result<Tipset> {
        Ok(self.head())
    }

    async fn chain_get_tipset_after_height(
        &self,
        height: ChainEpoch,
        _key: &TipsetKey,
    ) -> Result<Tipset> {
        self.inner.lock().after_height_calls.push(height);
        Ok(tipset_at(height))
    }

    async fn state_miner_proving_deadline(
        &self,
        miner: &Address,
        _key: &TipsetKey,
    ) -> Result<DeadlineInfo> {
        let inner = self.inner.lock();
        let id = miner.id().map_err(|e| anyhow!("not an id address: {e}"))?;
        let period_start = *inner
            .miners
            .get(&id)
            .ok_or_else(|| anyhow!("unknown miner {miner}"))?;
        let epoch = inner.head_epoch;
        if epoch < period_start {
            return Ok(new_deadline_info(period_start, 0, epoch));
        }
        let periods = (epoch - period_start) / WPOST_PROVING_PERIOD;
        let current_start = period_start + periods * WPOST_PROVING_PERIOD;
        let index = ((epoch - current_start) / WPOST_CHALLENGE_WINDOW) as u64;
        Ok(new_deadline_info(current_start, index, epoch))
    }

    async fn state_miner_info(&self, miner: &Address, _key: &TipsetKey) -> Result<MinerInfo> {
        let inner = self.inner.lock();
        let id = miner.id().map_err(|e| anyhow!("not an id address: {e}"))?;
        inner
            .miner_infos
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown miner {miner}"))
    }

    async fn state_miner_partitions(
        &self,
        miner: &Address,
        deadline_idx: u64,
        _key: &TipsetKey,
    ) -> Result<Vec<Partition>> {
        let inner = self.inner.lock();
        let id = miner.id().map_err(|e| anyhow!("not an id address: {e}"))?;
        Ok(inner
            .partitions
            .get(&(id, deadline_idx))
            .cloned()
            .unwrap_or_default())
    }

    async fn state_miner_sectors(
        &self,
        miner: &Address,
        sectors: Option<&BitField>,
        _key: &TipsetKey,
    ) -> Result<Vec<SectorOnChainInfo>> {
        let inner = self.inner.lock();
        let id = miner.id().map_err(|e| anyhow!("not an id address: {e}"))?;
        let all = inner.sectors.get(&id).cloned().unwrap_or_default();
        Ok(match sectors {
            Some(filter) => all
                .into_iter()
                .filter(|s| filter.get(s.sector_number))
                .collect(),
            None => all,
        })
    }

    async fn state_get_randomness_from_beacon(
        &self,
        _personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        _entropy: &[u8],
        _key: &TipsetKey,
    ) -> Result<Randomness> {
        Ok(Randomness(vec![rand_epoch as u8; 32]))
    }

    async fn state_network_version(&self, _key: &TipsetKey) -> Result<NetworkVersion> {
        Ok(self.network_version)
    }
}

// ---------------------------------------------------------------------------
// Prover, fault tracker, verifier

/// Prover double. Each queued entry is the skip list for one call; calls
/// beyond the queue succeed with no skips.
#[derive(Default)]
pub struct MockProver {
    pub skip_rounds: Mutex<VecDeque<Vec<SectorNumber>>>,
    pub challenge_sets: Mutex<Vec<Vec<SectorNumber>>>,
    pub delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl ProverPoSt for MockProver {
    async fn generate_window_post_adv(
        &self,
        post_proof: RegisteredPoStProof,
        _miner: ActorID,
        sectors: &[PostSectorChallenge],
        _partition_idx: u64,
        _randomness: &Randomness,
        _allow_skip: bool,
    ) -> Result<WindowPoStResult> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.challenge_sets
            .lock()
            .push(sectors.iter().map(|s| s.sector_number).collect());
        let skipped = self.skip_rounds.lock().pop_front().unwrap_or_default();
        if !skipped.is_empty() {
            return Ok(WindowPoStResult {
                proofs: Vec::new(),
                skipped,
            });
        }
        Ok(WindowPoStResult {
            proofs: vec![PoStProof {
                post_proof,
                proof_bytes: b"window post proof".to_vec(),
            }],
            skipped: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct MockFaultTracker {
    pub declarations: Mutex<Vec<(ActorID, u64, Vec<u64>)>>,
}

#[async_trait]
impl FaultTracker for MockFaultTracker {
    async fn mark_faulty(
        &self,
        miner: ActorID,
        deadline_idx: u64,
        sectors: &BitField,
    ) -> Result<()> {
        self.declarations
            .lock()
            .push((miner, deadline_idx, sectors.iter().collect()));
        Ok(())
    }
}

pub struct MockVerifier {
    pub ok: bool,
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify_window_post(&self, _info: &WindowPoStVerifyInfo) -> Result<bool> {
        Ok(self.ok)
    }
}
