// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Seams to the proving-side collaborators: the cryptographic prover, the
//! sealer's fault tracker and the proof verifier.

use anyhow::Result;
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{PoStProof, RegisteredPoStProof, RegisteredSealProof, SectorNumber};
use fvm_shared::ActorID;

pub use fvm_shared::sector::{SectorInfo, WindowPoStVerifyInfo};

/// Challenges for a single sector within a windowed PoSt partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSectorChallenge {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    pub sealed_cid: Cid,
    /// Leaf indices to open within the sector, fixed by protocol.
    pub challenges: Vec<u64>,
}

/// Outcome of a proving attempt. With skipping allowed, sectors whose
/// challenges could not be read are reported rather than failing the whole
/// partition.
#[derive(Debug, Clone, Default)]
pub struct WindowPoStResult {
    pub proofs: Vec<PoStProof>,
    pub skipped: Vec<SectorNumber>,
}

/// The external windowed PoSt prover.
#[async_trait]
pub trait ProverPoSt: Send + Sync {
    async fn generate_window_post_adv(
        &self,
        post_proof: RegisteredPoStProof,
        miner: ActorID,
        sectors: &[PostSectorChallenge],
        partition_idx: u64,
        randomness: &Randomness,
        allow_skip: bool,
    ) -> Result<WindowPoStResult>;
}

/// Declares sectors unprovable. The sealer updates on-chain fault
/// declarations out-of-band.
#[async_trait]
pub trait FaultTracker: Send + Sync {
    async fn mark_faulty(
        &self,
        miner: ActorID,
        deadline_idx: u64,
        sectors: &BitField,
    ) -> Result<()>;
}

/// Local verification of a generated proof before it is recorded.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify_window_post(&self, info: &WindowPoStVerifyInfo) -> Result<bool>;
}
