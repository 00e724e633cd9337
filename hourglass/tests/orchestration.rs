//! Drives the orchestrator and sweeper through full swap lifecycles against
//! in-memory chain fakes.

use async_trait::async_trait;
use hourglass::{
    account, asset,
    chain::{
        ActionKind, ChainClient, ChainClients, FeeOracle, FundingSighting, HtlcLocation,
        IdempotencyKey, Signer, SpendRequest, SpendSighting, TxRef,
    },
    config::{Settings, SweepSettings},
    database::{Database, Store},
    fee::FeeRate,
    htlc::LegParams,
    notify::{NotificationSink, SwapEvent},
    orchestrator::{CreateSwap, LegRequest, Orchestrator},
    record::{SwapState, SweepOutcome},
    sweeper::Sweeper,
    utxo, ChainFamily, Secret, SecretHash, Side, SwapId, Timestamp,
};
use primitive_types::U256;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

struct FakeChain {
    family: ChainFamily,
    funding: Mutex<Option<FundingSighting>>,
    spend: Mutex<Option<SpendSighting>>,
    confirmations: Mutex<HashMap<TxRef, u32>>,
    broadcasts: Mutex<Vec<(IdempotencyKey, TxRef)>>,
}

impl FakeChain {
    fn new(family: ChainFamily) -> Arc<Self> {
        Arc::new(FakeChain {
            family,
            funding: Mutex::new(None),
            spend: Mutex::new(None),
            confirmations: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
        })
    }

    fn set_funding(&self, sighting: FundingSighting) {
        *self.funding.lock().unwrap() = Some(sighting);
    }

    fn set_spend(&self, sighting: SpendSighting) {
        *self.spend.lock().unwrap() = Some(sighting);
    }

    fn set_confirmations(&self, tx: TxRef, confirmations: u32) {
        self.confirmations.lock().unwrap().insert(tx, confirmations);
    }

    fn broadcasts(&self) -> Vec<(IdempotencyKey, TxRef)> {
        self.broadcasts.lock().unwrap().clone()
    }

    fn broadcast_of(&self, action: ActionKind) -> Option<TxRef> {
        self.broadcasts()
            .into_iter()
            .find(|(key, _)| key.action == action)
            .map(|(_, tx)| tx)
    }

    fn tx_for(&self, key: &IdempotencyKey) -> TxRef {
        use bitcoin::hashes::{sha256d, Hash};

        let digest = sha256d::Hash::hash(key.to_string().as_bytes());
        match self.family {
            ChainFamily::UtxoScript => TxRef::UtxoScript(utxo::Txid::from_hash(digest)),
            ChainFamily::AccountContract => {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&digest[..]);
                TxRef::AccountContract(account::Hash::from(bytes))
            }
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn broadcast(&self, _raw: Vec<u8>, key: IdempotencyKey) -> anyhow::Result<TxRef> {
        let mut broadcasts = self.broadcasts.lock().unwrap();

        // Idempotence: a repeated key returns the original reference.
        if let Some((_, tx)) = broadcasts.iter().find(|(seen, _)| *seen == key) {
            return Ok(*tx);
        }

        let tx = self.tx_for(&key);
        broadcasts.push((key, tx));
        Ok(tx)
    }

    async fn confirmations(&self, tx: &TxRef) -> anyhow::Result<Option<u32>> {
        Ok(self.confirmations.lock().unwrap().get(tx).copied())
    }

    async fn funding_at(
        &self,
        _construct: &hourglass::htlc::LockingConstruct,
    ) -> anyhow::Result<Option<FundingSighting>> {
        Ok(self.funding.lock().unwrap().clone())
    }

    async fn spend_of(
        &self,
        _construct: &hourglass::htlc::LockingConstruct,
    ) -> anyhow::Result<Option<SpendSighting>> {
        Ok(self.spend.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct FakeSigner {
    requests: Mutex<Vec<(ActionKind, bool)>>,
}

impl FakeSigner {
    fn requests(&self) -> Vec<(ActionKind, bool)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign_and_serialize(&self, request: SpendRequest) -> anyhow::Result<Vec<u8>> {
        self.requests
            .lock()
            .unwrap()
            .push((request.kind, request.secret.is_some()));
        Ok(vec![0u8; 64])
    }
}

struct FixedOracle(u64);

#[async_trait]
impl FeeOracle for FixedOracle {
    async fn current_fee_rate(&self, _family: ChainFamily) -> anyhow::Result<FeeRate> {
        Ok(FeeRate::new(self.0))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SwapEvent>>,
}

impl RecordingSink {
    fn states(&self) -> Vec<SwapState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.state)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn swap_transitioned(&self, event: SwapEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<Database>,
    utxo_chain: Arc<FakeChain>,
    account_chain: Arc<FakeChain>,
    signer: Arc<FakeSigner>,
    sink: Arc<RecordingSink>,
    _tmp_dir: tempfile::TempDir,
}

fn harness(settings: Settings) -> Harness {
    let tmp_dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(Database::new(tmp_dir.path()).unwrap());
    let utxo_chain = FakeChain::new(ChainFamily::UtxoScript);
    let account_chain = FakeChain::new(ChainFamily::AccountContract);
    let signer = Arc::new(FakeSigner::default());
    let sink = Arc::new(RecordingSink::default());

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        ChainClients {
            utxo: utxo_chain.clone(),
            account: account_chain.clone(),
        },
        signer.clone(),
        Arc::new(FixedOracle(10)),
        sink.clone(),
        settings,
    ));

    Harness {
        orchestrator,
        store,
        utxo_chain,
        account_chain,
        signer,
        sink,
        _tmp_dir: tmp_dir,
    }
}

fn secret() -> Secret {
    Secret::from(*b"hello world, you are beautiful!!")
}

fn secret_hash() -> SecretHash {
    SecretHash::new(secret())
}

fn initiator_params(expiry: Timestamp) -> LegParams {
    LegParams::UtxoScript(utxo::Params {
        network: utxo::Network::Regtest,
        asset: asset::Coin::from_sat(100_000_000),
        redeem_identity: "0298e113cc06bc862ac205f2c0f27ee8c0de98d0716537bbf74e2ea6f38a84d5dc"
            .parse()
            .unwrap(),
        refund_identity: "020c04eb8cb87485501e30b656f37439ea7866d7c58b3c38161e5793b68e712356"
            .parse()
            .unwrap(),
        expiry,
        secret_hash: secret_hash(),
    })
}

fn counterparty_params(expiry: Timestamp) -> LegParams {
    LegParams::AccountContract(account::Params {
        asset: asset::Token::new(account::Address::from([3u8; 20]), U256::from(4_000u64)),
        redeem_identity: account::Address::from([1u8; 20]),
        refund_identity: account::Address::from([2u8; 20]),
        expiry,
        secret_hash: secret_hash(),
        chain_id: account::ChainId::DEV,
    })
}

fn create_request(counterparty_expires_in: u32, initiator_expires_in: u32) -> CreateSwap {
    let now = Timestamp::now();

    CreateSwap {
        secret_hash: secret_hash(),
        initiator: LegRequest {
            params: initiator_params(now.plus(initiator_expires_in)),
            min_confirmations: Some(1),
        },
        counterparty: LegRequest {
            params: counterparty_params(now.plus(counterparty_expires_in)),
            min_confirmations: Some(1),
        },
        timelock_policy: None,
    }
}

fn seed_txid(n: u8) -> utxo::Txid {
    use bitcoin::hashes::{sha256d, Hash};

    utxo::Txid::from_hash(sha256d::Hash::hash(&[n]))
}

fn utxo_funding(confirmations: u32) -> FundingSighting {
    FundingSighting {
        tx: TxRef::UtxoScript(seed_txid(1)),
        location: HtlcLocation::UtxoScript(utxo::OutPoint {
            txid: seed_txid(1),
            vout: 0,
        }),
        quantity: asset::Coin::from_sat(100_000_000).into(),
        confirmations,
    }
}

fn account_funding(confirmations: u32) -> FundingSighting {
    FundingSighting {
        tx: TxRef::AccountContract(account::Hash::from([5u8; 32])),
        location: HtlcLocation::AccountContract(account::Address::from([6u8; 20])),
        quantity: asset::Token::new(account::Address::from([3u8; 20]), U256::from(4_000u64))
            .into(),
        confirmations,
    }
}

fn account_claim_spend() -> SpendSighting {
    SpendSighting {
        tx: TxRef::AccountContract(account::Hash::from([7u8; 32])),
        unlock_data: vec![secret().as_raw_secret().to_vec()],
        confirmations: 0,
    }
}

async fn fund_both(harness: &Harness, swap_id: SwapId) {
    harness.utxo_chain.set_funding(utxo_funding(1));
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::FundedInitiator
    );

    harness.account_chain.set_funding(account_funding(1));
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::FundedBoth
    );
}

#[tokio::test]
async fn happy_path_claim_propagates_the_secret_across_legs() {
    let harness = harness(Settings::default());
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    // Nothing on either chain yet: no transition.
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::Created
    );

    fund_both(&harness, swap_id).await;

    // The funding-time fee regime is snapshotted for auditability.
    let record = harness.store.load(swap_id).unwrap().unwrap();
    let snapshot = record.leg(Side::Initiator).fee.unwrap();
    assert_eq!(snapshot.fee.as_u64(), 3_850); // 10 sat/vB * 350 vB * 1.10

    // The counterparty-leg claim reveals the secret on-chain.
    harness.account_chain.set_spend(account_claim_spend());
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::ClaimPending
    );

    // The engine immediately fired the symmetric claim on the other leg.
    let claim_tx = harness
        .utxo_chain
        .broadcast_of(ActionKind::Claim)
        .expect("symmetric claim must have been broadcast");
    assert_eq!(harness.signer.requests(), vec![(ActionKind::Claim, true)]);

    // Both claims reach finality.
    harness.utxo_chain.set_confirmations(claim_tx, 1);
    harness
        .account_chain
        .set_confirmations(account_claim_spend().tx, 1);

    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::Claimed
    );
    assert_eq!(
        harness.orchestrator.status(swap_id).await.unwrap(),
        Some(SwapState::Claimed)
    );

    assert_eq!(
        harness.sink.states(),
        vec![
            SwapState::Created,
            SwapState::FundedInitiator,
            SwapState::FundedBoth,
            SwapState::ClaimPending,
            SwapState::Claimed,
        ]
    );
}

#[tokio::test]
async fn initiator_claims_with_the_secret_capability() {
    let harness = harness(Settings::default());
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    fund_both(&harness, swap_id).await;

    let wrong = Secret::from(*b"This is our favourite passphrase");
    assert!(harness
        .orchestrator
        .claim_with_secret(swap_id, wrong)
        .await
        .is_err());

    harness
        .orchestrator
        .claim_with_secret(swap_id, secret())
        .await
        .unwrap();

    assert_eq!(
        harness.orchestrator.status(swap_id).await.unwrap(),
        Some(SwapState::ClaimPending)
    );
    // The claim went to the counterparty leg, i.e. the account chain.
    assert!(harness.account_chain.broadcast_of(ActionKind::Claim).is_some());
    assert!(harness.utxo_chain.broadcast_of(ActionKind::Claim).is_none());
}

#[tokio::test]
async fn shallow_confirmations_never_advance_the_state() {
    let harness = harness(Settings::default());
    let now = Timestamp::now();

    let swap_id = harness
        .orchestrator
        .create_swap(CreateSwap {
            secret_hash: secret_hash(),
            initiator: LegRequest {
                params: initiator_params(now.plus(48 * 60 * 60)),
                min_confirmations: Some(2),
            },
            counterparty: LegRequest {
                params: counterparty_params(now.plus(24 * 60 * 60)),
                min_confirmations: Some(1),
            },
            timelock_policy: None,
        })
        .await
        .unwrap();

    harness.utxo_chain.set_funding(utxo_funding(1));
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::Created
    );

    harness.utxo_chain.set_funding(utxo_funding(2));
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::FundedInitiator
    );
}

#[tokio::test]
async fn funding_amount_mismatch_fails_the_swap() {
    let harness = harness(Settings::default());
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    let mut short_funding = utxo_funding(1);
    short_funding.quantity = asset::Coin::from_sat(99_000_000).into();
    harness.utxo_chain.set_funding(short_funding);

    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::Failed
    );

    let record = harness.store.load(swap_id).unwrap().unwrap();
    assert!(record.failure.unwrap().contains("disagrees"));
}

#[tokio::test]
async fn an_unfunded_swap_is_cancellable_a_funded_one_is_not() {
    let harness = harness(Settings::default());

    let swap_id = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    harness.orchestrator.cancel(swap_id).await.unwrap();
    assert!(harness.store.load(swap_id).unwrap().is_none());
    assert_eq!(
        harness.orchestrator.status(swap_id).await.unwrap(),
        Some(SwapState::Created)
    );

    // A second swap that is already funded refuses cancellation.
    let secret = Secret::from(*b"another secret, equally pretty!!");
    let now = Timestamp::now();
    let mut request = create_request(24 * 60 * 60, 48 * 60 * 60);
    request.secret_hash = SecretHash::new(secret);
    request.initiator.params = LegParams::UtxoScript(utxo::Params {
        network: utxo::Network::Regtest,
        asset: asset::Coin::from_sat(100_000_000),
        redeem_identity: "0298e113cc06bc862ac205f2c0f27ee8c0de98d0716537bbf74e2ea6f38a84d5dc"
            .parse()
            .unwrap(),
        refund_identity: "020c04eb8cb87485501e30b656f37439ea7866d7c58b3c38161e5793b68e712356"
            .parse()
            .unwrap(),
        expiry: now.plus(48 * 60 * 60),
        secret_hash: SecretHash::new(secret),
    });
    request.counterparty.params = LegParams::AccountContract(account::Params {
        asset: asset::Token::new(account::Address::from([3u8; 20]), U256::from(4_000u64)),
        redeem_identity: account::Address::from([1u8; 20]),
        refund_identity: account::Address::from([2u8; 20]),
        expiry: now.plus(24 * 60 * 60),
        secret_hash: SecretHash::new(secret),
        chain_id: account::ChainId::DEV,
    });

    let funded_swap = harness.orchestrator.create_swap(request).await.unwrap();
    harness.utxo_chain.set_funding(utxo_funding(1));
    harness.orchestrator.tick(funded_swap).await.unwrap();

    assert!(harness.orchestrator.cancel(funded_swap).await.is_err());
}

#[tokio::test]
async fn reusing_a_secret_hash_is_rejected() {
    let harness = harness(Settings::default());

    harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    let result = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn expired_legs_are_refunded_by_the_sweeper() {
    let mut settings = Settings::default();
    settings.sweep = SweepSettings {
        tick_interval_secs: 1,
        max_attempts: 8,
        fee_escalation_percent: 100,
        min_retry_interval_secs: 300,
    };

    let harness = harness(settings);
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(2, 3))
        .await
        .unwrap();

    fund_both(&harness, swap_id).await;

    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::RefundPending
    );

    let sweeper = Sweeper::new(
        harness.orchestrator.clone(),
        harness.store.clone(),
        settings.sweep,
    );
    sweeper.sweep_once().await.unwrap();

    // Both legs were past their own timelocks: one refund per leg, none of
    // which ever saw the secret.
    let utxo_refund = harness
        .utxo_chain
        .broadcast_of(ActionKind::Refund)
        .expect("initiator leg refund");
    let account_refund = harness
        .account_chain
        .broadcast_of(ActionKind::Refund)
        .expect("counterparty leg refund");
    assert_eq!(
        harness.signer.requests(),
        vec![(ActionKind::Refund, false), (ActionKind::Refund, false)]
    );

    // A second pass inside the retry interval is rate limited.
    sweeper.sweep_once().await.unwrap();
    assert_eq!(
        harness
            .store
            .sweep_attempts(swap_id, Side::Initiator)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        harness
            .store
            .sweep_attempts(swap_id, Side::Counterparty)
            .unwrap()
            .len(),
        1
    );

    harness.utxo_chain.set_confirmations(utxo_refund, 1);
    harness.account_chain.set_confirmations(account_refund, 1);

    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::Refunded
    );

    let attempts = harness
        .store
        .sweep_attempts(swap_id, Side::Counterparty)
        .unwrap();
    assert_eq!(attempts[0].outcome, SweepOutcome::Broadcast);
    assert!(attempts[0].fee_level_used.is_some());
}

#[tokio::test]
async fn a_late_claim_aborts_the_refund_sweep() {
    let mut settings = Settings::default();
    settings.sweep.min_retry_interval_secs = 0;

    let harness = harness(settings);
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(2, 600))
        .await
        .unwrap();

    fund_both(&harness, swap_id).await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::RefundPending
    );

    // The legitimate claim lands between the expiry and the sweep.
    harness.account_chain.set_spend(account_claim_spend());

    let sweeper = Sweeper::new(
        harness.orchestrator.clone(),
        harness.store.clone(),
        settings.sweep,
    );
    sweeper.sweep_once().await.unwrap();

    // No refund was broadcast for the claimed leg; the claim won.
    assert!(harness
        .account_chain
        .broadcast_of(ActionKind::Refund)
        .is_none());
    assert_eq!(
        harness.orchestrator.status(swap_id).await.unwrap(),
        Some(SwapState::ClaimPending)
    );

    let attempts = harness
        .store
        .sweep_attempts(swap_id, Side::Counterparty)
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, SweepOutcome::AbortedClaimed);
}

#[tokio::test]
async fn sweep_exhaustion_escalates_to_failed() {
    let mut settings = Settings::default();
    settings.sweep = SweepSettings {
        tick_interval_secs: 1,
        max_attempts: 1,
        fee_escalation_percent: 100,
        min_retry_interval_secs: 0,
    };

    let harness = harness(settings);
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(2, 600))
        .await
        .unwrap();

    fund_both(&harness, swap_id).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.orchestrator.tick(swap_id).await.unwrap();

    let sweeper = Sweeper::new(
        harness.orchestrator.clone(),
        harness.store.clone(),
        settings.sweep,
    );

    // First pass broadcasts, the refund never confirms, the second pass
    // exceeds the attempt cap.
    sweeper.sweep_once().await.unwrap();
    sweeper.sweep_once().await.unwrap();

    assert_eq!(
        harness.orchestrator.status(swap_id).await.unwrap(),
        Some(SwapState::Failed)
    );

    let attempts = harness
        .store
        .sweep_attempts(swap_id, Side::Counterparty)
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].outcome, SweepOutcome::Broadcast);
    assert_eq!(attempts[1].outcome, SweepOutcome::Exhausted);

    let record = harness.store.load(swap_id).unwrap().unwrap();
    assert!(record.failure.unwrap().contains("manual recovery"));
}

#[tokio::test]
async fn a_restarted_orchestrator_resumes_from_the_store() {
    let harness = harness(Settings::default());
    let swap_id = harness
        .orchestrator
        .create_swap(create_request(24 * 60 * 60, 48 * 60 * 60))
        .await
        .unwrap();

    harness.utxo_chain.set_funding(utxo_funding(1));
    assert_eq!(
        harness.orchestrator.tick(swap_id).await.unwrap(),
        SwapState::FundedInitiator
    );

    // A new orchestrator over the same store and chains: the restart.
    let restarted = Arc::new(Orchestrator::new(
        harness.store.clone(),
        ChainClients {
            utxo: harness.utxo_chain.clone(),
            account: harness.account_chain.clone(),
        },
        harness.signer.clone(),
        Arc::new(FixedOracle(10)),
        Arc::new(RecordingSink::default()),
        Settings::default(),
    ));

    assert_eq!(restarted.resume().await.unwrap(), 1);

    harness.account_chain.set_funding(account_funding(1));
    assert_eq!(
        restarted.tick(swap_id).await.unwrap(),
        SwapState::FundedBoth
    );
}
