// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Window Proof-of-Spacetime partition scheduler for Filecoin storage
//! providers.
//!
//! Driven by chain-head advancement, the scheduler enumerates the partitions
//! due in the current proving deadline, durably enqueues one task per
//! partition into a shared work table, bids on offered tasks according to
//! their urgency, generates the proof for accepted tasks (delegating the
//! cryptographic work to an external prover) and records the resulting proof
//! message for the downstream on-chain submitter.
//!
//! The crate is a library meant to be embedded in a provider binary. The
//! chain RPC surface, the durable task runtime, the prover, the fault
//! tracker and the relational store are consumed through the traits in
//! [`api`], [`harmony`], [`prover`] and [`store`].

pub mod api;
pub mod chain_sched;
pub mod deadlines;
pub mod harmony;
pub mod policy;
pub mod prover;
pub mod store;
pub mod window_post;

#[cfg(test)]
mod test_utils;
