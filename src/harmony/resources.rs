// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Resource claims advertised to the task runtime.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use fvm_shared::sector::RegisteredSealProof;

use super::TaskId;

/// Resource cost of one task execution, used by the runtime for placement.
pub struct Resources {
    pub cpu: u32,
    /// Windowed PoSt is happy on a CPU but will use a GPU when one is
    /// available, so no GPU is claimed.
    pub gpu: u32,
    pub ram: RamClaim,
}

/// Memory reservation token handed back to the runtime; the runtime
/// releases the reservation when it drops the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamReservation {
    pub bytes: u64,
}

/// A task's memory requirement: either known up front, or computed per task
/// at claim time.
pub enum RamClaim {
    Static(u64),
    Dynamic {
        /// Lower bound used for capacity checks before a task id is known.
        fallback: u64,
        claim: Arc<dyn DynamicRam>,
    },
}

/// Per-task memory sizing.
#[async_trait]
pub trait DynamicRam: Send + Sync {
    async fn claim(&self, id: TaskId) -> Result<RamReservation>;
}

/// Peak memory of a windowed PoSt over sectors sealed with the given proof
/// type.
pub fn window_post_max_memory(seal_proof: RegisteredSealProof) -> u64 {
    use RegisteredSealProof::*;
    match seal_proof {
        StackedDRG64GiBV1 | StackedDRG64GiBV1P1 => 120 << 30,
        StackedDRG32GiBV1 | StackedDRG32GiBV1P1 => 96 << 30,
        StackedDRG512MiBV1 | StackedDRG512MiBV1P1 => 1 << 30,
        StackedDRG8MiBV1 | StackedDRG8MiBV1P1 => 8 << 20,
        StackedDRG2KiBV1 | StackedDRG2KiBV1P1 => 2 << 20,
        // Feature variants prove over the same tree shapes; size by the
        // conservative upper bound.
        _ => 120 << 30,
    }
}

/// The smallest entry of the memory table, used as the static capacity
/// fallback before a concrete task is known.
pub fn min_window_post_memory() -> u64 {
    2 << 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_table_is_monotone_in_sector_size() {
        let sizes = [
            RegisteredSealProof::StackedDRG2KiBV1P1,
            RegisteredSealProof::StackedDRG8MiBV1P1,
            RegisteredSealProof::StackedDRG512MiBV1P1,
            RegisteredSealProof::StackedDRG32GiBV1P1,
            RegisteredSealProof::StackedDRG64GiBV1P1,
        ];
        let mut last = 0;
        for spt in sizes {
            let mem = window_post_max_memory(spt);
            assert!(mem > last);
            last = mem;
        }
        assert_eq!(
            min_window_post_memory(),
            window_post_max_memory(RegisteredSealProof::StackedDRG2KiBV1P1)
        );
    }
}
