// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Serial dispatch of chain-head changes to registered handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{Tipset, WdPostApi};

/// Head-change observer. `apply` is the new head; `revert` carries the
/// previous head when the chain did not advance past it (a reorg), and
/// handlers that key their work off immutable identities may ignore it.
#[async_trait]
pub trait HeadChangeHandler: Send + Sync {
    async fn head_change(&self, revert: Option<&Tipset>, apply: &Tipset) -> Result<()>;
}

/// Polls the chain head and invokes every registered handler serially for
/// each observed change. Handlers run on the scheduler's single polling
/// loop, so no handler is ever re-entered.
pub struct ChainScheduler<Api> {
    api: Arc<Api>,
    handlers: Vec<Arc<dyn HeadChangeHandler>>,
    poll_interval: Duration,
}

impl<Api: WdPostApi> ChainScheduler<Api> {
    pub fn new(api: Arc<Api>) -> Self {
        Self {
            api,
            handlers: Vec::new(),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Registers a handler. All handlers must be registered before
    /// [`ChainScheduler::run`] starts.
    pub fn add_handler(&mut self, handler: Arc<dyn HeadChangeHandler>) {
        self.handlers.push(handler);
    }

    /// Runs until `cancel` fires. A handler error is logged and does not
    /// stop the loop or the remaining handlers.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut last: Option<Tipset> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("chain scheduler shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            let head = match self.api.chain_head().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(%err, "failed to fetch chain head");
                    continue;
                }
            };
            if last.as_ref().map(Tipset::key) == Some(head.key()) {
                continue;
            }

            // The poller cannot see intermediate tipsets; a head whose
            // height did not advance means the previous head was reverted.
            let revert = last
                .as_ref()
                .filter(|prev| head.epoch() <= prev.epoch())
                .cloned();

            debug!(epoch = head.epoch(), reorg = revert.is_some(), "chain head change");
            for handler in &self.handlers {
                if let Err(err) = handler.head_change(revert.as_ref(), &head).await {
                    warn!(%err, epoch = head.epoch(), "head change handler failed");
                }
            }
            last = Some(head);
        }
    }
}
