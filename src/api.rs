// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The read-only chain RPC surface the scheduler consumes, and the
//! client-side chain types it traffics in.
//!
//! The concrete JSON-RPC transport lives in the hosting binary; the
//! scheduler only depends on [`WdPostApi`].

use anyhow::Result;
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{RegisteredPoStProof, RegisteredSealProof, SectorNumber, SectorSize};
use fvm_shared::version::NetworkVersion;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::deadlines::DeadlineInfo;

/// A set of CIDs forming a unique key for a tipset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsetKey {
    cids: Vec<Cid>,
}

impl TipsetKey {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }
}

/// The scheduler's view of a tipset: its key and its height. Block headers
/// never cross the API boundary here; everything the proving pipeline needs
/// is anchored by `(key, epoch)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tipset {
    key: TipsetKey,
    epoch: ChainEpoch,
}

impl Tipset {
    pub fn new(key: TipsetKey, epoch: ChainEpoch) -> Self {
        Self { key, epoch }
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }
}

/// The slice of on-chain miner info the proving pipeline reads.
#[derive(Clone, Debug)]
pub struct MinerInfo {
    pub window_post_proof_type: RegisteredPoStProof,
    pub sector_size: SectorSize,
}

/// Sector-number bitfields describing one partition of a deadline,
/// reduced to the sets the proving pipeline reads.
#[derive(Clone, Debug, Default)]
pub struct Partition {
    /// All sector numbers in this partition, including faulty and
    /// terminated ones.
    pub all_sectors: BitField,
    /// Sectors currently marked faulty.
    pub faulty_sectors: BitField,
    /// Faulty sectors expected to recover on the next PoSt submission.
    pub recovering_sectors: BitField,
    /// Sectors that are not terminated.
    pub live_sectors: BitField,
}

/// The slice of on-chain sector info needed to build and verify challenges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    pub sealed_cid: Cid,
}

/// Specifies a domain for randomness generation.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i64)]
pub enum DomainSeparationTag {
    TicketProduction = 1,
    ElectionProofProduction = 2,
    WinningPoStChallengeSeed = 3,
    WindowedPoStChallengeSeed = 4,
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
    WindowPoStDeadlineAssignment = 7,
    MarketDealCronSeed = 8,
    PoStChainCommit = 9,
}

/// Read-only chain RPCs consumed by the scheduler. All lookups are anchored
/// at an explicit tipset key so that proving always reads a consistent
/// chain view.
#[async_trait]
pub trait WdPostApi: Send + Sync {
    async fn chain_head(&self) -> Result<Tipset>;

    async fn chain_get_tipset(&self, key: &TipsetKey) -> Result<Tipset>;

    /// The first tipset at or after `height` on the chain identified by
    /// `key`. Anchoring at a known key makes the lookup stable under
    /// reorgs of the head.
    async fn chain_get_tipset_after_height(
        &self,
        height: ChainEpoch,
        key: &TipsetKey,
    ) -> Result<Tipset>;

    async fn state_miner_proving_deadline(
        &self,
        miner: &Address,
        key: &TipsetKey,
    ) -> Result<DeadlineInfo>;

    async fn state_miner_info(&self, miner: &Address, key: &TipsetKey) -> Result<MinerInfo>;

    async fn state_miner_partitions(
        &self,
        miner: &Address,
        deadline_idx: u64,
        key: &TipsetKey,
    ) -> Result<Vec<Partition>>;

    /// Info for the miner's sectors, restricted to `sectors` when given.
    async fn state_miner_sectors(
        &self,
        miner: &Address,
        sectors: Option<&BitField>,
        key: &TipsetKey,
    ) -> Result<Vec<SectorOnChainInfo>>;

    async fn state_get_randomness_from_beacon(
        &self,
        personalization: DomainSeparationTag,
        rand_epoch: ChainEpoch,
        entropy: &[u8],
        key: &TipsetKey,
    ) -> Result<Randomness>;

    async fn state_network_version(&self, key: &TipsetKey) -> Result<NetworkVersion>;
}
