//! The swap lifecycle state machine.
//!
//! The orchestrator owns the in-memory index of swap records and is the only
//! component that commits a state transition. Transitions are serialized per
//! record through a per-record lock; the verifier and the sweeper merely
//! propose. Every committed transition is persisted before it is announced,
//! so a restart resumes from the stored state plus whatever the chains
//! themselves remember.

use crate::{
    chain::{ActionKind, ChainClients, FeeOracle, IdempotencyKey, Signer, SpendRequest, TxRef},
    config::Settings,
    database::Store,
    fee::{Fee, FeeSnapshot},
    htlc::{self, ValidationError},
    notify::{NotificationSink, SwapEvent},
    record::{
        Leg, SwapRecord, SwapState, SweepAttempt, SweepExhausted, SweepOutcome, TimelockPolicy,
    },
    verifier::{Confirmation, SpendOutcome, Verifier},
    Secret, SecretHash, Side, SwapId, Timestamp,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::{collections::HashMap, convert::TryFrom, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::Instrument;

/// The agreed terms of one leg, as supplied by the caller.
#[derive(Clone, Copy, Debug)]
pub struct LegRequest {
    pub params: htlc::LegParams,
    /// Overrides the chain-family default confirmation depth.
    pub min_confirmations: Option<u32>,
}

/// The agreed terms of a swap, as supplied by the caller after off-band
/// negotiation.
#[derive(Clone, Copy, Debug)]
pub struct CreateSwap {
    pub secret_hash: SecretHash,
    pub initiator: LegRequest,
    pub counterparty: LegRequest,
    pub timelock_policy: Option<TimelockPolicy>,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateSwapError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not persist the swap record")]
    Storage(#[source] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error(
    "swap {swap_id} is in state {state}; cancellation is only possible before \
     any funding confirmation"
)]
pub struct CancellationImpossible {
    pub swap_id: SwapId,
    pub state: SwapState,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    clients: ChainClients,
    verifier: Verifier,
    signer: Arc<dyn Signer>,
    oracle: Arc<dyn FeeOracle>,
    sink: Arc<dyn NotificationSink>,
    settings: Settings,
    records: Mutex<HashMap<SwapId, Arc<Mutex<SwapRecord>>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        clients: ChainClients,
        signer: Arc<dyn Signer>,
        oracle: Arc<dyn FeeOracle>,
        sink: Arc<dyn NotificationSink>,
        settings: Settings,
    ) -> Self {
        Orchestrator {
            store,
            verifier: Verifier::new(clients.clone()),
            clients,
            signer,
            oracle,
            sink,
            settings,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates the agreed terms and creates the record.
    ///
    /// All validation failures surface here, synchronously, before anything
    /// touches a network.
    pub async fn create_swap(&self, create: CreateSwap) -> Result<SwapId, CreateSwapError> {
        let now = Timestamp::now();

        if let Some(owner) = self
            .store
            .secret_hash_owner(&create.secret_hash)
            .map_err(CreateSwapError::Storage)?
        {
            return Err(ValidationError::SecretHashReuse(owner).into());
        }

        let leg_initiator = Leg::new(
            create.initiator.params,
            create.initiator.min_confirmations.unwrap_or_else(|| {
                self.settings
                    .default_confirmations(create.initiator.params.chain_family())
            }),
        );
        let leg_counterparty = Leg::new(
            create.counterparty.params,
            create.counterparty.min_confirmations.unwrap_or_else(|| {
                self.settings
                    .default_confirmations(create.counterparty.params.chain_family())
            }),
        );

        let record = SwapRecord::new(
            SwapId::default(),
            create.secret_hash,
            leg_initiator,
            leg_counterparty,
            create
                .timelock_policy
                .unwrap_or(self.settings.timelock_policy),
            now,
        )?;
        let swap_id = record.swap_id;

        self.store
            .insert(record.clone())
            .await
            .map_err(CreateSwapError::Storage)?;
        self.index(record).await;

        self.emit(swap_id, SwapState::Created, None).await;
        tracing::info!(%swap_id, "swap created");

        Ok(swap_id)
    }

    /// Reloads every non-terminal record from the store after a restart.
    pub async fn resume(&self) -> Result<usize> {
        let mut resumed = 0;
        for record in self.store.all()? {
            if !record.state.is_terminal() {
                tracing::info!(swap_id = %record.swap_id, state = %record.state, "resuming swap");
                self.index(record).await;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Spawns the polling driver for one swap, running until the record
    /// reaches a terminal state.
    pub fn drive(self: &Arc<Self>, swap_id: SwapId) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);

        tokio::spawn(
            async move {
                let poll = orchestrator.settings.poll_interval();
                let mut backoff = poll;

                loop {
                    match orchestrator.tick(swap_id).await {
                        Ok(state) if state.is_terminal() => {
                            tracing::info!(%state, "swap reached a terminal state");
                            break;
                        }
                        Ok(_) => backoff = poll,
                        Err(e) => {
                            tracing::warn!("verification tick failed: {:#}", e);
                            let cap = orchestrator.backoff_cap(swap_id).await;
                            backoff = (backoff * 2).min(cap);
                        }
                    }

                    tokio::time::sleep(backoff).await;
                }
            }
            .instrument(tracing::error_span!("swap", %swap_id)),
        )
    }

    pub async fn status(&self, swap_id: SwapId) -> Result<Option<SwapState>> {
        if let Some(handle) = self.records.lock().await.get(&swap_id) {
            return Ok(Some(handle.lock().await.state));
        }
        if let Some(record) = self.store.load(swap_id)? {
            return Ok(Some(record.state));
        }
        Ok(self.store.archived(swap_id)?.map(|record| record.state))
    }

    /// Cancels a swap on which nothing has been locked yet.
    ///
    /// Once a funding confirmation has been observed the only way out is a
    /// claim or a timeout refund; that is the on-chain reality, not a policy.
    pub async fn cancel(&self, swap_id: SwapId) -> Result<()> {
        let handle = self.record_handle(swap_id).await?;
        {
            let record = handle.lock().await;
            if record.state != SwapState::Created {
                return Err(CancellationImpossible {
                    swap_id,
                    state: record.state,
                }
                .into());
            }
        }

        self.store.archive(swap_id).await?;
        self.records.lock().await.remove(&swap_id);

        self.emit(
            swap_id,
            SwapState::Created,
            Some("cancelled before any funding was observed".to_string()),
        )
        .await;

        Ok(())
    }

    /// First claim of the swap, driven by the party holding the secret.
    ///
    /// The secret is used for this one claim construction and dropped; it is
    /// never stored. The symmetric claim on the other leg is later fed by
    /// re-extracting the then-public secret from the chain.
    pub async fn claim_with_secret(&self, swap_id: SwapId, secret: Secret) -> Result<()> {
        let handle = self.record_handle(swap_id).await?;
        let mut record = handle.lock().await;

        if SecretHash::new(secret) != record.secret_hash {
            return Err(ValidationError::WrongSecret.into());
        }
        if record.state != SwapState::FundedBoth {
            return Err(anyhow!(
                "swap {} is in state {}, claiming requires both legs funded",
                swap_id,
                record.state
            ));
        }

        self.broadcast_claim(&mut record, Side::Counterparty, secret)
            .await?;
        record.transition_to(SwapState::ClaimPending)?;
        self.commit(&record, None).await?;

        Ok(())
    }

    /// One verification pass over a swap, applying at most one transition.
    ///
    /// `Pending` and `NotFound` verifier results never change the state.
    pub async fn tick(&self, swap_id: SwapId) -> Result<SwapState> {
        let handle = self.record_handle(swap_id).await?;
        let mut record = handle.lock().await;

        match record.state {
            SwapState::Created => {
                self.check_funding(&mut record, Side::Initiator, SwapState::FundedInitiator)
                    .await?;
            }
            SwapState::FundedInitiator => {
                self.check_funding(&mut record, Side::Counterparty, SwapState::FundedBoth)
                    .await?;
                if record.state == SwapState::FundedInitiator {
                    self.check_expiries(&mut record).await?;
                }
            }
            SwapState::FundedBoth => {
                self.check_for_claim(&mut record).await?;
                if record.state == SwapState::FundedBoth {
                    self.check_expiries(&mut record).await?;
                }
            }
            SwapState::ClaimPending => self.check_claims_final(&mut record).await?,
            SwapState::RefundPending => self.check_refund_progress(&mut record).await?,
            SwapState::Claimed | SwapState::Refunded | SwapState::Failed => {}
        }

        Ok(record.state)
    }

    /// Refund attempt for one leg, called by the sweeper. Commits under the
    /// same per-record lock as every other transition.
    pub async fn sweep_leg(&self, swap_id: SwapId, side: Side) -> Result<SweepOutcome> {
        let handle = self.record_handle(swap_id).await?;
        let mut record = handle.lock().await;

        if record.state != SwapState::RefundPending {
            return Ok(SweepOutcome::LegSettled);
        }

        let leg = record.leg(side);
        let params = leg.params;
        let min_confirmations = leg.min_confirmations;
        let refund_tx = leg.refund_tx;
        if !leg.is_funded() || leg.claim_tx.is_some() {
            return Ok(SweepOutcome::LegSettled);
        }

        let family = params.chain_family();

        // An already-confirmed refund needs no further broadcasts.
        if let Some(tx) = refund_tx {
            let confirmations = self
                .verifier
                .confirmations(family, &tx)
                .await?
                .unwrap_or(0);
            if confirmations >= min_confirmations {
                return Ok(SweepOutcome::LegSettled);
            }
        }

        let attempts = self.store.sweep_attempts(swap_id, side)?;

        if let Some(last) = attempts.last() {
            let min_gap = chrono::Duration::seconds(
                i64::try_from(self.settings.sweep.min_retry_interval_secs).unwrap_or(i64::MAX),
            );
            if Utc::now().signed_duration_since(last.observed_at) < min_gap {
                return Ok(SweepOutcome::RateLimited);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let attempt_number = attempts.len() as u32 + 1;

        // Guard the race against a late, legitimate claim: re-check right
        // before constructing the refund.
        if let Some(spend) = self.verifier.observe_spend(&params).await? {
            if let SpendOutcome::Claimed { secret } = spend.outcome {
                tracing::info!(%swap_id, %side, "claim landed before the sweep, aborting refund");
                self.append_attempt(
                    swap_id,
                    side,
                    attempt_number,
                    None,
                    Some(spend.tx),
                    SweepOutcome::AbortedClaimed,
                )
                .await?;
                self.apply_claim(&mut record, side, spend.tx, secret).await?;
                return Ok(SweepOutcome::AbortedClaimed);
            }
        }

        if attempt_number > self.settings.sweep.max_attempts {
            self.append_attempt(swap_id, side, attempt_number, None, None, SweepOutcome::Exhausted)
                .await?;
            let exhausted = SweepExhausted {
                swap_id,
                side,
                attempts: attempt_number - 1,
            };
            self.fail(&mut record, exhausted.to_string()).await?;
            return Ok(SweepOutcome::Exhausted);
        }

        let rate = match self.oracle.current_fee_rate(family).await {
            Ok(rate) => rate,
            Err(e) => {
                let reason = format!("fee oracle unavailable: {:#}", e);
                self.append_attempt(
                    swap_id,
                    side,
                    attempt_number,
                    None,
                    None,
                    SweepOutcome::TransientFailure(reason.clone()),
                )
                .await?;
                tracing::warn!(%swap_id, %side, "{}", reason);
                return Ok(SweepOutcome::TransientFailure(reason));
            }
        };

        let policy = self.settings.fee_policy(family);
        let escalated = policy.escalate(rate, attempt_number, self.settings.sweep.fee_escalation_percent);
        let fee = policy.estimate(escalated, params.spend_weight_estimate())?;

        let previous_at_ceiling = attempts
            .iter()
            .rev()
            .find_map(|attempt| attempt.fee_level_used)
            .map_or(false, |level| level >= policy.max_fee);
        if fee == policy.max_fee && previous_at_ceiling {
            self.append_attempt(
                swap_id,
                side,
                attempt_number,
                Some(fee),
                None,
                SweepOutcome::FeeCeilingReached,
            )
            .await?;
            let exhausted = SweepExhausted {
                swap_id,
                side,
                attempts: attempt_number,
            };
            self.fail(
                &mut record,
                format!("fee ceiling reached without a confirmation: {}", exhausted),
            )
            .await?;
            return Ok(SweepOutcome::FeeCeilingReached);
        }

        let construct = htlc::build(&params)?;
        let location = record.leg(side).funding_location.ok_or_else(|| {
            anyhow!("no funding location recorded for {} leg of swap {}", side, swap_id)
        })?;

        let request = SpendRequest::refund(construct, location, params.quantity(), fee);
        let raw = self
            .signer
            .sign_and_serialize(request)
            .await
            .context("signer rejected the refund")?;

        let key = IdempotencyKey {
            swap_id,
            side,
            action: ActionKind::Refund,
            attempt: attempt_number,
        };
        let tx = self
            .clients
            .for_family(family)
            .broadcast(raw, key)
            .await
            .context("refund broadcast failed")?;

        record.leg_mut(side).record_refund(tx)?;
        self.store.update(&record).await?;
        self.append_attempt(swap_id, side, attempt_number, Some(fee), Some(tx), SweepOutcome::Broadcast)
            .await?;

        tracing::info!(%swap_id, %side, %tx, attempt = attempt_number, %fee, "refund broadcast");

        Ok(SweepOutcome::Broadcast)
    }

    async fn check_funding(
        &self,
        record: &mut SwapRecord,
        side: Side,
        next: SwapState,
    ) -> Result<()> {
        let leg = record.leg(side);
        let params = leg.params;
        let min_confirmations = leg.min_confirmations;

        match self
            .verifier
            .confirm_funding(&params, min_confirmations)
            .await?
        {
            Confirmation::Confirmed(sighting) => {
                let family = params.chain_family();
                let weight = params.spend_weight_estimate();
                let rate = self.oracle.current_fee_rate(family).await?;
                let policy = self.settings.fee_policy(family);
                let fee = policy.estimate(rate, weight)?;

                let leg = record.leg_mut(side);
                leg.funding_tx = Some(sighting.tx);
                leg.funding_location = Some(sighting.location);
                leg.fee = Some(FeeSnapshot::record(policy, rate, weight, fee));

                record.transition_to(next)?;
                self.commit(record, None).await?;
            }
            Confirmation::Pending(_) | Confirmation::NotFound => {}
            Confirmation::Mismatch {
                tx,
                expected,
                observed,
            } => {
                self.fail(
                    record,
                    format!(
                        "funding of the {} leg disagrees with the agreed terms: \
                         expected {}, observed {} in {}",
                        side, expected, observed, tx
                    ),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Moves any leg whose timelock elapsed unclaimed into the refund path.
    async fn check_expiries(&self, record: &mut SwapRecord) -> Result<()> {
        let now = Timestamp::now();
        let expired = Side::both().iter().copied().any(|side| {
            let leg = record.leg(side);
            leg.is_funded() && !leg.is_settled() && leg.params.expiry().has_elapsed_by(now)
        });

        if expired {
            record.transition_to(SwapState::RefundPending)?;
            self.commit(
                record,
                Some("timelock elapsed with no claim observed".to_string()),
            )
            .await?;
        }

        Ok(())
    }

    async fn check_for_claim(&self, record: &mut SwapRecord) -> Result<()> {
        let counterparty_params = record.leg(Side::Counterparty).params;
        let initiator_params = record.leg(Side::Initiator).params;

        let (counterparty_spend, initiator_spend) = futures::future::try_join(
            self.verifier.observe_spend(&counterparty_params),
            self.verifier.observe_spend(&initiator_params),
        )
        .await?;

        // The counterparty leg expires first; its spend is inspected first
        // so a late claim is caught before the window closes.
        let observed = vec![
            (Side::Counterparty, counterparty_spend),
            (Side::Initiator, initiator_spend),
        ];

        for (side, spend) in observed {
            let spend = match spend {
                Some(spend) => spend,
                None => continue,
            };

            match spend.outcome {
                SpendOutcome::Claimed { secret } => {
                    self.apply_claim(record, side, spend.tx, secret).await?;
                    return Ok(());
                }
                SpendOutcome::Refunded => {
                    record.leg_mut(side).record_refund(spend.tx)?;
                    record.transition_to(SwapState::RefundPending)?;
                    self.commit(record, Some(format!("refund observed on the {} leg", side)))
                        .await?;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Records an observed claim and fires the symmetric claim on the other
    /// leg: the reveal on one chain is public and usable on the other. This
    /// is the atomicity guarantee of the whole construction.
    async fn apply_claim(
        &self,
        record: &mut SwapRecord,
        side: Side,
        tx: TxRef,
        secret: Secret,
    ) -> Result<()> {
        record.leg_mut(side).record_claim(tx)?;

        let other = side.other();
        if record.leg(other).is_funded() && !record.leg(other).is_settled() {
            self.broadcast_claim(record, other, secret).await?;
        }

        if record.state != SwapState::ClaimPending {
            record.transition_to(SwapState::ClaimPending)?;
        }
        self.commit(
            record,
            Some(format!("claim observed on the {} leg, secret is public", side)),
        )
        .await?;

        Ok(())
    }

    async fn broadcast_claim(
        &self,
        record: &mut SwapRecord,
        side: Side,
        secret: Secret,
    ) -> Result<()> {
        let leg = record.leg(side);
        if leg.is_settled() {
            return Ok(());
        }

        let params = leg.params;
        let location = leg.funding_location.ok_or_else(|| {
            anyhow!(
                "no funding location recorded for {} leg of swap {}",
                side,
                record.swap_id
            )
        })?;

        let family = params.chain_family();
        let rate = self.oracle.current_fee_rate(family).await?;
        let policy = self.settings.fee_policy(family);
        let fee = policy.estimate(rate, params.spend_weight_estimate())?;

        let construct = htlc::build(&params)?;
        let request = SpendRequest::claim(construct, location, params.quantity(), fee, secret);
        let raw = self
            .signer
            .sign_and_serialize(request)
            .await
            .context("signer rejected the claim")?;

        let key = IdempotencyKey {
            swap_id: record.swap_id,
            side,
            action: ActionKind::Claim,
            attempt: 1,
        };
        let tx = self
            .clients
            .for_family(family)
            .broadcast(raw, key)
            .await
            .context("claim broadcast failed")?;

        record.leg_mut(side).record_claim(tx)?;
        tracing::info!(swap_id = %record.swap_id, %side, %tx, "claim broadcast");

        Ok(())
    }

    async fn check_claims_final(&self, record: &mut SwapRecord) -> Result<()> {
        let now = Timestamp::now();
        let mut all_final = true;

        for side in Side::both().iter().copied() {
            let leg = record.leg(side);
            if !leg.is_funded() {
                continue;
            }
            let params = leg.params;
            let min_confirmations = leg.min_confirmations;

            match leg.claim_tx {
                Some(tx) => {
                    let confirmations = self
                        .verifier
                        .confirmations(params.chain_family(), &tx)
                        .await?
                        .unwrap_or(0);

                    if confirmations < min_confirmations {
                        all_final = false;

                        // A claim that is still unseen past the timelock has
                        // lost its window; fall back to the refund path.
                        if confirmations == 0 && params.expiry().has_elapsed_by(now) {
                            record.leg_mut(side).claim_tx = None;
                            record.transition_to(SwapState::RefundPending)?;
                            self.commit(
                                record,
                                Some(format!(
                                    "claim on the {} leg unseen past the timelock",
                                    side
                                )),
                            )
                            .await?;
                            return Ok(());
                        }
                    }
                }
                None => {
                    all_final = false;

                    // A restart may have lost the in-flight symmetric claim;
                    // the secret is public on the settled leg, recover it.
                    let other_params = record.leg(side.other()).params;
                    if let Some(spend) = self.verifier.observe_spend(&other_params).await? {
                        if let SpendOutcome::Claimed { secret } = spend.outcome {
                            self.broadcast_claim(record, side, secret).await?;
                            self.store.update(record).await?;
                        }
                    }
                }
            }
        }

        if all_final {
            record.transition_to(SwapState::Claimed)?;
            self.commit(record, None).await?;
        }

        Ok(())
    }

    async fn check_refund_progress(&self, record: &mut SwapRecord) -> Result<()> {
        // A late claim always wins over a pending refund.
        for side in Side::both().iter().copied() {
            let leg = record.leg(side);
            let params = leg.params;
            if !leg.is_funded() || leg.is_settled() {
                continue;
            }
            if let Some(spend) = self.verifier.observe_spend(&params).await? {
                if let SpendOutcome::Claimed { secret } = spend.outcome {
                    self.apply_claim(record, side, spend.tx, secret).await?;
                    return Ok(());
                }
            }
        }

        let mut all_settled = true;
        let mut any_refund = false;

        for side in Side::both().iter().copied() {
            let leg = record.leg(side);
            if !leg.is_funded() {
                continue;
            }
            let family = leg.params.chain_family();
            let min_confirmations = leg.min_confirmations;

            let settled_tx = match (leg.claim_tx, leg.refund_tx) {
                (Some(tx), _) => Some(tx),
                (None, Some(tx)) => {
                    any_refund = true;
                    Some(tx)
                }
                (None, None) => None,
            };

            match settled_tx {
                Some(tx) => {
                    let confirmations = self
                        .verifier
                        .confirmations(family, &tx)
                        .await?
                        .unwrap_or(0);
                    if confirmations < min_confirmations {
                        all_settled = false;
                    }
                }
                None => all_settled = false,
            }
        }

        if all_settled && any_refund {
            record.transition_to(SwapState::Refunded)?;
            self.commit(record, None).await?;
        }

        Ok(())
    }

    async fn fail(&self, record: &mut SwapRecord, reason: String) -> Result<()> {
        tracing::error!(swap_id = %record.swap_id, %reason, "swap failed");

        record.failure = Some(reason.clone());
        record.transition_to(SwapState::Failed)?;
        self.commit(record, Some(reason)).await
    }

    /// Persist first, then announce. The stored record is the source of
    /// truth; the sink is fire-and-forget.
    async fn commit(&self, record: &SwapRecord, detail: Option<String>) -> Result<()> {
        self.store.update(record).await?;
        self.sink
            .swap_transitioned(SwapEvent {
                swap_id: record.swap_id,
                state: record.state,
                detail,
            })
            .await;
        Ok(())
    }

    async fn emit(&self, swap_id: SwapId, state: SwapState, detail: Option<String>) {
        self.sink
            .swap_transitioned(SwapEvent {
                swap_id,
                state,
                detail,
            })
            .await;
    }

    async fn append_attempt(
        &self,
        swap_id: SwapId,
        side: Side,
        attempt_number: u32,
        fee: Option<Fee>,
        tx: Option<TxRef>,
        outcome: SweepOutcome,
    ) -> Result<()> {
        self.store
            .append_sweep_attempt(&SweepAttempt {
                swap_id,
                side,
                attempt_number,
                fee_level_used: fee,
                broadcast_reference: tx,
                outcome,
                observed_at: Utc::now(),
            })
            .await
    }

    async fn record_handle(&self, swap_id: SwapId) -> Result<Arc<Mutex<SwapRecord>>> {
        let mut records = self.records.lock().await;

        if let Some(handle) = records.get(&swap_id) {
            return Ok(handle.clone());
        }

        let record = self
            .store
            .load(swap_id)?
            .ok_or_else(|| anyhow!("unknown swap {}", swap_id))?;
        let handle = Arc::new(Mutex::new(record));
        records.insert(swap_id, handle.clone());

        Ok(handle)
    }

    async fn index(&self, record: SwapRecord) {
        self.records
            .lock()
            .await
            .insert(record.swap_id, Arc::new(Mutex::new(record)));
    }

    /// The poll backoff never exceeds the time left until the nearest
    /// timelock; sleeping past a deadline would hand the race to the other
    /// side for free.
    async fn backoff_cap(&self, swap_id: SwapId) -> Duration {
        let cap = self.settings.max_poll_backoff();

        match self.record_handle(swap_id).await {
            Ok(handle) => {
                let record = handle.lock().await;
                let now = Timestamp::now();
                let nearest = Side::both()
                    .iter()
                    .copied()
                    .map(|side| record.leg(side).params.expiry().seconds_until(now))
                    .min()
                    .unwrap_or(0);
                cap.min(Duration::from_secs(u64::from(nearest.max(1))))
            }
            Err(_) => cap,
        }
    }
}
