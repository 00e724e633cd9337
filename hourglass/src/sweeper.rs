//! Periodic reclaim of expired, unclaimed legs.
//!
//! The sweeper scans for swaps in the refund window on a fixed cadence and
//! asks the orchestrator to attempt a refund for each expired leg. It never
//! commits anything itself: all mutations go through the orchestrator's
//! per-record lock. Urgency is expressed through fee escalation, never
//! through a tighter scan cadence; polling faster does not change chain
//! truth, only API load.

use crate::{
    config::SweepSettings,
    database::Store,
    orchestrator::Orchestrator,
    record::{SwapState, SweepOutcome},
    Side, SwapId, Timestamp,
};
use anyhow::Result;
use std::sync::Arc;
use tracing::Instrument;

pub struct Sweeper {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn Store>,
    settings: SweepSettings,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Sweeper {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn Store>,
        settings: SweepSettings,
    ) -> Self {
        Sweeper {
            orchestrator,
            store,
            settings,
        }
    }

    /// Runs the scan loop until the task is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(self.settings.tick_interval());

                loop {
                    interval.tick().await;
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!("sweep pass failed: {:#}", e);
                    }
                }
            }
            .instrument(tracing::error_span!("sweeper")),
        )
    }

    /// A single scan over all swaps in the refund window.
    pub async fn sweep_once(&self) -> Result<()> {
        let now = Timestamp::now();

        for record in self.store.all()? {
            if record.state != SwapState::RefundPending {
                continue;
            }

            for side in Side::both().iter().copied() {
                let leg = record.leg(side);

                // Each leg refunds only after its own timelock; the
                // counterparty leg, carrying the shorter one, goes first.
                if !leg.is_funded()
                    || leg.claim_tx.is_some()
                    || !leg.params.expiry().has_elapsed_by(now)
                {
                    continue;
                }

                self.sweep(record.swap_id, side).await;
            }
        }

        Ok(())
    }

    async fn sweep(&self, swap_id: SwapId, side: Side) {
        match self.orchestrator.sweep_leg(swap_id, side).await {
            Ok(SweepOutcome::Broadcast)
            | Ok(SweepOutcome::RateLimited)
            | Ok(SweepOutcome::LegSettled) => {}
            Ok(SweepOutcome::AbortedClaimed) => {
                tracing::info!(%swap_id, %side, "refund aborted, leg was claimed");
            }
            Ok(SweepOutcome::Exhausted) | Ok(SweepOutcome::FeeCeilingReached) => {
                tracing::error!(%swap_id, %side, "refund retries exhausted, operator attention required");
            }
            Ok(SweepOutcome::TransientFailure(reason)) => {
                tracing::warn!(%swap_id, %side, %reason, "refund attempt hit a transient failure");
            }
            Err(e) => {
                tracing::warn!(%swap_id, %side, "refund attempt failed: {:#}", e);
            }
        }
    }
}
