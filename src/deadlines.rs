// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deadline calculations with respect to a current epoch.
//!
//! "Deadline" refers to the window during which proofs may be submitted.
//! Windows are non-overlapping ranges `[open, close)`, but the challenge
//! epoch for a window occurs before the window opens.

use fvm_shared::clock::ChainEpoch;
use serde::{Deserialize, Serialize};

use crate::policy::{
    FAULT_DECLARATION_CUTOFF, WPOST_CHALLENGE_LOOKBACK, WPOST_CHALLENGE_WINDOW,
    WPOST_PERIOD_DEADLINES, WPOST_PROVING_PERIOD,
};

#[derive(Default, Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DeadlineInfo {
    /// Epoch at which this info was calculated.
    pub current_epoch: ChainEpoch,
    /// First epoch of the proving period (<= current_epoch).
    pub period_start: ChainEpoch,
    /// Current deadline index, in [0..WPOST_PERIOD_DEADLINES).
    pub index: u64,
    /// First epoch from which a proof may be submitted (>= current_epoch).
    pub open: ChainEpoch,
    /// First epoch from which a proof may no longer be submitted (>= open).
    pub close: ChainEpoch,
    /// Epoch at which to sample the chain for challenge (< open).
    pub challenge: ChainEpoch,
    /// First epoch at which a fault declaration is rejected (< open).
    pub fault_cutoff: ChainEpoch,

    // Protocol parameters (included in the JSON representation the chain
    // RPC returns for proving deadlines).
    #[serde(rename = "WPoStPeriodDeadlines")]
    w_post_period_deadlines: u64,
    #[serde(rename = "WPoStProvingPeriod")]
    w_post_proving_period: ChainEpoch,
    #[serde(rename = "WPoStChallengeWindow")]
    w_post_challenge_window: ChainEpoch,
    #[serde(rename = "WPoStChallengeLookback")]
    w_post_challenge_lookback: ChainEpoch,
    fault_declaration_cutoff: ChainEpoch,
}

/// Builds the [`DeadlineInfo`] for one deadline of a proving period, seen
/// from `current_epoch`, with the mainnet protocol parameters.
pub fn new_deadline_info(
    period_start: ChainEpoch,
    deadline_idx: u64,
    current_epoch: ChainEpoch,
) -> DeadlineInfo {
    DeadlineInfo::new(
        period_start,
        deadline_idx,
        current_epoch,
        WPOST_PERIOD_DEADLINES,
        WPOST_PROVING_PERIOD,
        WPOST_CHALLENGE_WINDOW,
        WPOST_CHALLENGE_LOOKBACK,
        FAULT_DECLARATION_CUTOFF,
    )
}

impl DeadlineInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        period_start: ChainEpoch,
        deadline_idx: u64,
        current_epoch: ChainEpoch,
        w_post_period_deadlines: u64,
        w_post_proving_period: ChainEpoch,
        w_post_challenge_window: ChainEpoch,
        w_post_challenge_lookback: ChainEpoch,
        fault_declaration_cutoff: ChainEpoch,
    ) -> Self {
        if deadline_idx < w_post_period_deadlines {
            let deadline_open = period_start + (deadline_idx as i64 * w_post_challenge_window);
            Self {
                current_epoch,
                period_start,
                index: deadline_idx,
                open: deadline_open,
                close: deadline_open + w_post_challenge_window,
                challenge: deadline_open - w_post_challenge_lookback,
                fault_cutoff: deadline_open - fault_declaration_cutoff,
                w_post_period_deadlines,
                w_post_proving_period,
                w_post_challenge_window,
                w_post_challenge_lookback,
                fault_declaration_cutoff,
            }
        } else {
            // Return an info for a no-duration deadline immediately after the
            // last real one.
            let after_last_deadline = period_start + w_post_proving_period;
            Self {
                current_epoch,
                period_start,
                index: deadline_idx,
                open: after_last_deadline,
                close: after_last_deadline,
                challenge: after_last_deadline,
                fault_cutoff: 0,
                w_post_period_deadlines,
                w_post_proving_period,
                w_post_challenge_window,
                w_post_challenge_lookback,
                fault_declaration_cutoff,
            }
        }
    }

    /// Whether the proving period has begun.
    pub fn period_started(&self) -> bool {
        self.current_epoch >= self.period_start
    }

    /// Whether the proving period has elapsed.
    pub fn period_elapsed(&self) -> bool {
        self.current_epoch >= self.next_period_start()
    }

    /// The first epoch in the next proving period.
    pub fn next_period_start(&self) -> ChainEpoch {
        self.period_start + self.w_post_proving_period
    }

    /// Duration of the proving period this deadline belongs to.
    pub fn proving_period(&self) -> ChainEpoch {
        self.w_post_proving_period
    }
}
