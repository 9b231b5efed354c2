// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Proof generation for a single partition.

use anyhow::{anyhow, bail, ensure, Context as _, Result};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::to_vec;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::randomness::Randomness;
use fvm_shared::sector::{PoStProof, SectorNumber};
use itertools::Itertools as _;
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use super::{WdPostError, WdPostTask, MAX_SKIP_RETRIES};
use crate::api::{DomainSeparationTag, SectorOnChainInfo, Tipset, WdPostApi};
use crate::deadlines::DeadlineInfo;
use crate::harmony::StillOwned;
use crate::policy;
use crate::prover::{PostSectorChallenge, SectorInfo, WindowPoStVerifyInfo};

/// Proof and skipped-sector declaration for one proven partition.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct PoStPartition {
    pub index: u64,
    pub skipped: BitField,
}

/// The message parameters recorded for the downstream submitter. The chain
/// commit fields are filled in at submission time.
#[derive(Debug, Clone, PartialEq, Serialize_tuple, Deserialize_tuple)]
pub struct SubmitWindowedPoStParams {
    pub deadline: u64,
    pub partitions: Vec<PoStPartition>,
    pub proofs: Vec<PoStProof>,
    pub chain_commit_epoch: ChainEpoch,
    pub chain_commit_rand: Randomness,
}

impl<Api: WdPostApi + 'static> WdPostTask<Api> {
    /// Generates the windowed PoSt for one partition against the given
    /// challenge tipset.
    pub(crate) async fn do_partition(
        &self,
        ts: &Tipset,
        miner: Address,
        deadline: &DeadlineInfo,
        partition_idx: u64,
        still_owned: &StillOwned,
    ) -> Result<SubmitWindowedPoStParams> {
        let miner_id = miner
            .id()
            .map_err(|e| anyhow!("miner {miner} is not an ID address: {e}"))?;

        let info = self
            .api
            .state_miner_info(&miner, ts.key())
            .await
            .context("getting miner info")?;

        let partitions = self
            .api
            .state_miner_partitions(&miner, deadline.index, ts.key())
            .await
            .context("getting partitions")?;
        let partition = partitions.get(partition_idx as usize).ok_or_else(|| {
            anyhow!(
                "partition {partition_idx} not found in deadline {}",
                deadline.index
            )
        })?;

        // Sectors we can expect to prove: everything in the partition that
        // is still live, minus declared faults and sectors only expected
        // back after recovery.
        let not_recovering = &partition.all_sectors - &partition.recovering_sectors;
        let live = &not_recovering & &partition.live_sectors;
        let to_prove = &live - &partition.faulty_sectors;
        if to_prove.is_empty() {
            bail!("no provable sectors in partition {partition_idx} of deadline {}", deadline.index);
        }

        let mut sectors = self
            .api
            .state_miner_sectors(&miner, Some(&to_prove), ts.key())
            .await
            .context("getting sector infos")?;

        let network_version = self
            .api
            .state_network_version(ts.key())
            .await
            .context("getting network version")?;
        let post_proof = policy::post_proof_for_network(info.window_post_proof_type, network_version)?;

        let entropy = to_vec(&miner).context("serializing miner address")?;
        let mut randomness = self
            .api
            .state_get_randomness_from_beacon(
                DomainSeparationTag::WindowedPoStChallengeSeed,
                deadline.challenge,
                &entropy,
                ts.key(),
            )
            .await
            .context("getting challenge randomness")?;
        // The proof interprets the seed as a field element; the top two
        // bits of the trailing byte must be clear.
        if let Some(last) = randomness.0.last_mut() {
            *last &= 0x3f;
        }

        let _permit = match &self.parallel {
            Some(sem) => Some(sem.acquire().await.context("proof slot semaphore closed")?),
            None => None,
        };

        let mut skipped_all = BitField::new();
        let mut attempt = 0usize;
        let proofs = loop {
            attempt += 1;
            if !still_owned() {
                bail!("window post task no longer owned, aborting");
            }

            let challenges = generate_sector_challenges(
                &randomness,
                partition_idx,
                &sectors,
                info.sector_size as u64,
            )?;

            debug!(
                miner = miner_id,
                partition = partition_idx,
                attempt,
                sectors = challenges.len(),
                "running window post"
            );
            let result = tokio::time::timeout(
                self.challenge_read_timeout,
                self.prover.generate_window_post_adv(
                    post_proof,
                    miner_id,
                    &challenges,
                    partition_idx,
                    &randomness,
                    true,
                ),
            )
            .await
            .map_err(|_| {
                anyhow!(
                    "window post attempt timed out after {:?}",
                    self.challenge_read_timeout
                )
            })?
            .context("generating window post")?;

            if result.skipped.is_empty() {
                if result.proofs.is_empty() {
                    bail!("prover returned no proofs for partition {partition_idx}");
                }
                break result.proofs;
            }

            warn!(
                miner = miner_id,
                partition = partition_idx,
                attempt,
                skipped = %result.skipped.iter().join(", "),
                "prover skipped sectors, declaring faults and retrying"
            );
            let skipped = BitField::try_from_bits(result.skipped.iter().copied())
                .map_err(|e| anyhow!("building skipped bitfield: {e}"))?;
            self.fault_tracker
                .mark_faulty(miner_id, deadline.index, &skipped)
                .await
                .context("declaring skipped sectors faulty")?;

            skipped_all |= &skipped;
            sectors.retain(|s| !skipped.get(s.sector_number));
            if sectors.is_empty() {
                bail!("every sector in partition {partition_idx} was skipped");
            }
            if attempt >= MAX_SKIP_RETRIES {
                return Err(WdPostError::PersistentSkips {
                    retries: attempt,
                    skipped: result.skipped,
                }
                .into());
            }
        };

        if !self.disable_local_verification {
            let verify_info = WindowPoStVerifyInfo {
                randomness: randomness.clone(),
                proofs: proofs.clone(),
                challenged_sectors: sectors
                    .iter()
                    .map(|s| SectorInfo {
                        proof: s.seal_proof,
                        sector_number: s.sector_number,
                        sealed_cid: s.sealed_cid,
                    })
                    .collect(),
                prover: miner_id,
            };
            let ok = self
                .verifier
                .verify_window_post(&verify_info)
                .await
                .context("verifying window post")?;
            if !ok {
                tracing::error!(
                    miner = miner_id,
                    deadline = deadline.index,
                    partition = partition_idx,
                    "generated window post failed local verification"
                );
                return Err(WdPostError::VerificationFailed.into());
            }
        }

        Ok(SubmitWindowedPoStParams {
            deadline: deadline.index,
            partitions: vec![PoStPartition {
                index: partition_idx,
                skipped: skipped_all,
            }],
            proofs,
            chain_commit_epoch: 0,
            chain_commit_rand: Randomness(Vec::new()),
        })
    }
}

/// Expands sector infos into per-sector challenge descriptors. Leaf indices
/// are drawn deterministically from the randomness, the sector's position
/// within the partition and the partition's position within the deadline.
pub(crate) fn generate_sector_challenges(
    randomness: &Randomness,
    partition_idx: u64,
    sectors: &[SectorOnChainInfo],
    sector_size: u64,
) -> Result<Vec<PostSectorChallenge>> {
    let leaves = sector_size / policy::NODE_SIZE;
    ensure!(leaves > 0, "sector size {sector_size} smaller than one tree node");

    let count = policy::WINDOW_POST_CHALLENGE_COUNT as u64;
    sectors
        .iter()
        .enumerate()
        .map(|(i, sector)| {
            let base = (partition_idx * sectors.len() as u64 + i as u64) * count;
            let challenges = (0..count)
                .map(|j| leaf_challenge(randomness, sector.sector_number, base + j, leaves))
                .collect();
            Ok(PostSectorChallenge {
                seal_proof: sector.seal_proof,
                sector_number: sector.sector_number,
                sealed_cid: sector.sealed_cid,
                challenges,
            })
        })
        .collect()
}

fn leaf_challenge(randomness: &Randomness, sector: SectorNumber, index: u64, leaves: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(&randomness.0);
    hasher.update(sector.to_le_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word) % leaves
}
