// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! WindowPoSt protocol parameters and proof-type mappings.

use anyhow::{anyhow, Result};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::{RegisteredPoStProof, RegisteredSealProof};
use fvm_shared::version::NetworkVersion;

/// Duration of each chain epoch.
pub const EPOCH_DURATION_SECONDS: i64 = 30;

pub const EPOCHS_IN_HOUR: ChainEpoch = 60 * 60 / EPOCH_DURATION_SECONDS;
pub const EPOCHS_IN_DAY: ChainEpoch = 24 * EPOCHS_IN_HOUR;

/// The period over which all of a miner's active sectors are challenged.
pub const WPOST_PROVING_PERIOD: ChainEpoch = EPOCHS_IN_DAY;

/// The duration of a deadline's challenge window, the period before a
/// deadline when the challenge is available.
pub const WPOST_CHALLENGE_WINDOW: ChainEpoch = 30 * 60 / EPOCH_DURATION_SECONDS;

/// The number of non-overlapping PoSt deadlines in each proving period.
pub const WPOST_PERIOD_DEADLINES: u64 = 48;

/// Lookback from the deadline's challenge window opening from which to
/// sample chain randomness for the challenge seed.
pub const WPOST_CHALLENGE_LOOKBACK: ChainEpoch = 20;

/// Minimum period before a deadline's challenge window opens that a fault
/// must be declared for that deadline.
pub const FAULT_DECLARATION_CUTOFF: ChainEpoch = WPOST_CHALLENGE_LOOKBACK + 50;

/// Number of leaf challenges drawn per sector in a windowed PoSt.
pub const WINDOW_POST_CHALLENGE_COUNT: usize = 10;

/// Size of a merkle tree node, and thus the granularity of leaf challenges.
pub const NODE_SIZE: u64 = 32;

/// Maps a windowed PoSt proof type back to the seal proof type of the
/// sectors it covers.
pub fn seal_proof_from_post_proof(post_proof: RegisteredPoStProof) -> Result<RegisteredSealProof> {
    use RegisteredPoStProof::*;
    let seal = match post_proof {
        StackedDRGWindow2KiBV1P1 => RegisteredSealProof::StackedDRG2KiBV1P1,
        StackedDRGWindow8MiBV1P1 => RegisteredSealProof::StackedDRG8MiBV1P1,
        StackedDRGWindow512MiBV1P1 => RegisteredSealProof::StackedDRG512MiBV1P1,
        StackedDRGWindow32GiBV1P1 => RegisteredSealProof::StackedDRG32GiBV1P1,
        StackedDRGWindow64GiBV1P1 => RegisteredSealProof::StackedDRG64GiBV1P1,
        other => return Err(anyhow!("unsupported window post proof type {other:?}")),
    };
    Ok(seal)
}

/// Selects the windowed PoSt proof version valid for the given network
/// version. Network version 19 switched proving to the V1P1 proof family;
/// miner info recorded before the upgrade may still carry the V1 types.
pub fn post_proof_for_network(
    post_proof: RegisteredPoStProof,
    network_version: NetworkVersion,
) -> Result<RegisteredPoStProof> {
    use RegisteredPoStProof::*;
    if network_version < NetworkVersion::V19 {
        return Ok(post_proof);
    }
    let upgraded = match post_proof {
        StackedDRGWindow2KiBV1P1 => StackedDRGWindow2KiBV1P1,
        StackedDRGWindow8MiBV1P1 => StackedDRGWindow8MiBV1P1,
        StackedDRGWindow512MiBV1P1 => StackedDRGWindow512MiBV1P1,
        StackedDRGWindow32GiBV1P1 => StackedDRGWindow32GiBV1P1,
        StackedDRGWindow64GiBV1P1 => StackedDRGWindow64GiBV1P1,
        other => return Err(anyhow!("unsupported window post proof type {other:?}")),
    };
    Ok(upgraded)
}
