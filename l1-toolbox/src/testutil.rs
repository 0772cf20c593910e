//! In-memory clients for unit tests.
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use ethers_core::{
    abi::{self, Token},
    types::{Bytes, Log, TransactionReceipt, U64},
};
use primitive_types::{H160, H256, U256};
use tokio::time::Duration;

use crate::{
    aggregator::{AggregateRequest, SignatureAggregator, SignatureArtifact},
    candidate::ValidatorCandidate,
    confirm::Backoff,
    contracts::{self, Method},
    errors::{classify_wallet_error, Error, Result, USER_REJECTED_CODE},
    evm::{EvmClient, TxRequest},
    manager::{ManagerContext, ManagerKind, OwnerType},
    pchain::{PChainClient, PChainTx, PChainWallet, SubnetInfo, TxStatus},
    phases::Settings,
    warp::{
        logs::testdata,
        message::{
            validation_id, AddressedCall, L1ValidatorWeight, PChainOwner, Payload,
            RegisterL1Validator, SignedMessage, SubnetToL1ConversionData, UnsignedMessage,
            BLS_SIGNATURE_LEN,
        },
    },
};

pub const TEST_NETWORK_ID: u32 = 1;

pub fn fast_backoff() -> Backoff {
    Backoff {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(2),
        multiplier: 2,
        max_attempts: 3,
    }
}

pub fn fast_settings() -> Settings {
    Settings {
        network_id: TEST_NETWORK_ID,
        receipt_backoff: fast_backoff(),
        pchain_backoff: fast_backoff(),
        ..Settings::default()
    }
}

pub fn receipt_with_status(status: u64, logs: Vec<Log>) -> TransactionReceipt {
    TransactionReceipt {
        status: Some(U64::from(status)),
        logs,
        ..Default::default()
    }
}

pub fn poa_context() -> ManagerContext {
    let manager = H160::repeat_byte(0x01);
    let poa_manager = H160::repeat_byte(0x02);
    ManagerContext {
        subnet_id: H256::repeat_byte(0x0a),
        blockchain_id: H256::repeat_byte(0x0b),
        manager_address: manager,
        owner_address: poa_manager,
        owner_type: OwnerType::PoAManager,
        kind: ManagerKind::PoA {
            manager,
            poa_manager,
        },
    }
}

pub fn staking_context(token: Option<H160>) -> ManagerContext {
    let manager = H160::repeat_byte(0x01);
    let staking_manager = H160::repeat_byte(0x02);
    let kind = match token {
        Some(token) => ManagerKind::StakingErc20 {
            manager,
            staking_manager,
            token,
        },
        None => ManagerKind::StakingNative {
            manager,
            staking_manager,
        },
    };
    ManagerContext {
        owner_address: staking_manager,
        owner_type: OwnerType::StakingManager,
        kind,
        ..poa_context()
    }
}

/// Output of "getStakingManagerSettings()" with the given stake bounds.
pub fn staking_settings_output(manager: H160, min: u64, max: u64) -> Vec<Token> {
    vec![Token::Tuple(vec![
        Token::Address(manager),
        Token::Uint(U256::from(min)),
        Token::Uint(U256::from(max)),
        Token::Uint(U256::from(3600u64)),
        Token::Uint(U256::from(100u64)),
        Token::Uint(U256::from(4u64)),
        Token::Uint(U256::from(1u64)),
        Token::Address(H160::repeat_byte(0x0c)),
        Token::FixedBytes(vec![0x0d; 32]),
    ])]
}

fn manager_message(payload: &Payload) -> Vec<u8> {
    let ctx = poa_context();
    let call = AddressedCall::new(
        ctx.manager_address.as_bytes().to_vec(),
        payload.to_bytes().unwrap(),
    );
    UnsignedMessage::new(TEST_NETWORK_ID, ctx.blockchain_id, call.to_bytes().unwrap())
        .to_bytes()
        .unwrap()
}

/// Unsigned RegisterL1Validator message the manager emits for "candidate",
/// with its validation ID.
pub fn register_message(candidate: &ValidatorCandidate, subnet_id: H256) -> (Vec<u8>, H256) {
    let owner = |o: &crate::candidate::PChainOwner| PChainOwner {
        threshold: o.threshold,
        addresses: o.parsed_addresses().unwrap(),
    };
    let payload = Payload::RegisterL1Validator(RegisterL1Validator {
        subnet_id,
        node_id: candidate.node_id_bytes().unwrap(),
        bls_public_key: candidate.bls_public_key_bytes().unwrap(),
        expiry: 1_700_000_000,
        remaining_balance_owner: owner(&candidate.remaining_balance_owner),
        disable_owner: owner(&candidate.disable_owner),
        weight: candidate.validator_weight,
    });
    let vid = validation_id(&payload.to_bytes().unwrap());
    (manager_message(&payload), vid)
}

/// Receipt of a successful registration initiation.
pub fn register_receipt(candidate: &ValidatorCandidate, subnet_id: H256) -> (TransactionReceipt, H256) {
    let (message, vid) = register_message(candidate, subnet_id);
    let mut node_topic = [0u8; 32];
    node_topic[..20].copy_from_slice(&candidate.node_id_bytes().unwrap());
    let event = testdata::event_log(
        poa_context().manager_address,
        vec![
            contracts::INITIATED_VALIDATOR_REGISTRATION.topic(),
            vid,
            H256::from(node_topic),
        ],
        vec![
            Token::FixedBytes(vec![0x01; 32]),
            Token::Uint(U256::from(1_700_000_000u64)),
            Token::Uint(U256::from(candidate.validator_weight)),
        ],
    );
    let receipt = receipt_with_status(1, vec![testdata::warp_log(&message, true), event]);
    (receipt, vid)
}

pub fn weight_message(validation_id: H256, nonce: u64, weight: u64) -> Vec<u8> {
    manager_message(&Payload::L1ValidatorWeight(L1ValidatorWeight {
        validation_id,
        nonce,
        weight,
    }))
}

/// Receipt of a successful removal or weight change initiation.
pub fn weight_receipt(validation_id: H256, nonce: u64, weight: u64) -> TransactionReceipt {
    let message = weight_message(validation_id, nonce, weight);
    receipt_with_status(1, vec![testdata::warp_log(&message, true)])
}

/// Receipt of a successful delegator removal initiation on the staking manager.
pub fn delegator_removal_receipt(
    delegation_id: H256,
    validation_id: H256,
    nonce: u64,
    weight: u64,
) -> TransactionReceipt {
    let message = weight_message(validation_id, nonce, weight);
    let event = testdata::event_log(
        H160::repeat_byte(0x02),
        vec![
            contracts::INITIATED_DELEGATOR_REMOVAL.topic(),
            delegation_id,
            validation_id,
        ],
        vec![],
    );
    receipt_with_status(1, vec![event, testdata::warp_log(&message, true)])
}

/// Wraps an unsigned message with a placeholder signature.
pub fn signed(unsigned_message: &[u8]) -> Vec<u8> {
    SignedMessage {
        unsigned: UnsignedMessage::from_bytes(unsigned_message).unwrap(),
        signers: vec![0x01],
        signature: vec![0xaa; BLS_SIGNATURE_LEN],
    }
    .to_bytes()
    .unwrap()
}

#[derive(Default)]
struct EvmState {
    pending: VecDeque<TransactionReceipt>,
    receipts: HashMap<H256, TransactionReceipt>,
    sent: Vec<TxRequest>,
    calls: HashMap<(H160, [u8; 4]), Bytes>,
    code: HashMap<H160, Bytes>,
    logs: Vec<Log>,
    trace: Option<Vec<u8>>,
    fail_next: Option<(i64, String)>,
    nonce: u64,
}

impl EvmState {
    /// Stores the next queued receipt (success when none is queued) under a new hash.
    fn mine(&mut self) -> H256 {
        self.nonce += 1;
        let tx_hash = H256::from_low_u64_be(self.nonce);
        let mut receipt = self
            .pending
            .pop_front()
            .unwrap_or_else(|| receipt_with_status(1, vec![]));
        receipt.transaction_hash = tx_hash;
        self.receipts.insert(tx_hash, receipt);
        tx_hash
    }
}

/// EVM whose writes mine queued receipts and whose reads answer from fixtures.
#[derive(Default)]
pub struct FakeEvm {
    state: Mutex<EvmState>,
}

impl FakeEvm {
    pub fn push_receipt(&self, receipt: TransactionReceipt) {
        self.state.lock().unwrap().pending.push_back(receipt);
    }

    /// Mines the next queued receipt without a write, as if sent earlier.
    pub fn mine_next(&self) -> H256 {
        self.state.lock().unwrap().mine()
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn set_call(&self, to: H160, method: &Method, output: Vec<Token>) {
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((to, method.selector()), Bytes::from(abi::encode(&output)));
    }

    pub fn set_code(&self, address: H160) {
        self.state
            .lock()
            .unwrap()
            .code
            .insert(address, Bytes::from(vec![0x60, 0x80]));
    }

    pub fn set_trace(&self, output: Option<Vec<u8>>) {
        self.state.lock().unwrap().trace = output;
    }

    pub fn fail_next_send(&self, code: i64, message: &str) {
        self.state.lock().unwrap().fail_next = Some((code, message.to_string()));
    }

    /// Records an InitiatedValidatorRegistration log emitted by "tx_hash".
    pub fn add_registration_log(&self, manager: H160, validation_id: H256, tx_hash: H256) {
        let log = Log {
            address: manager,
            topics: vec![contracts::INITIATED_VALIDATOR_REGISTRATION.topic(), validation_id],
            transaction_hash: Some(tx_hash),
            ..Default::default()
        };
        self.state.lock().unwrap().logs.push(log);
    }
}

#[async_trait]
impl EvmClient for FakeEvm {
    async fn chain_id(&self) -> Result<u64> {
        Ok(43114)
    }

    fn sender(&self) -> H160 {
        H160::repeat_byte(0x5e)
    }

    async fn send_transaction(&self, req: &TxRequest) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        if let Some((code, message)) = state.fail_next.take() {
            return Err(classify_wallet_error(Some(code), &message));
        }
        state.sent.push(req.clone());
        Ok(state.mine())
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, to: H160, data: Bytes) -> Result<Bytes> {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| Error::api("failed eth_call (-32000: execution reverted)", false))
    }

    async fn get_code(&self, address: H160) -> Result<Bytes> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_logs(&self, address: H160, topic0: H256, topic1: H256) -> Result<Vec<Log>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| {
                l.address == address
                    && l.topics.first() == Some(&topic0)
                    && l.topics.get(1) == Some(&topic1)
            })
            .cloned()
            .collect())
    }

    async fn trace_transaction(&self, _tx_hash: H256) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().trace.clone())
    }
}

#[derive(Default)]
struct PChainState {
    subnets: HashMap<H256, SubnetInfo>,
    txs: HashMap<String, PChainTx>,
    statuses: HashMap<String, VecDeque<TxStatus>>,
    status_failures: HashMap<String, usize>,
}

/// P-Chain whose tx statuses advance one per poll; the last one sticks.
#[derive(Default)]
pub struct FakePChain {
    state: Mutex<PChainState>,
}

impl FakePChain {
    pub fn add_l1(&self, subnet_id: H256, manager_chain_id: H256, manager_address: H160) {
        self.state.lock().unwrap().subnets.insert(
            subnet_id,
            SubnetInfo {
                subnet_id,
                is_permissioned: false,
                conversion_id: Some(H256::repeat_byte(0xc0)),
                manager_chain_id: Some(manager_chain_id),
                manager_address: Some(manager_address),
            },
        );
    }

    pub fn add_permissioned(&self, subnet_id: H256) {
        self.state.lock().unwrap().subnets.insert(
            subnet_id,
            SubnetInfo {
                subnet_id,
                is_permissioned: true,
                conversion_id: None,
                manager_chain_id: None,
                manager_address: None,
            },
        );
    }

    pub fn push_status(&self, tx_id: &str, status: TxStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(tx_id.to_string())
            .or_default()
            .push_back(status);
    }

    /// Fails the next "n" status reads of "tx_id" as the node would.
    pub fn fail_status(&self, tx_id: &str, n: usize) {
        self.state
            .lock()
            .unwrap()
            .status_failures
            .insert(tx_id.to_string(), n);
    }

    pub fn add_message_tx(&self, tx_id: &str, signed_message: Vec<u8>) {
        self.state.lock().unwrap().txs.insert(
            tx_id.to_string(),
            PChainTx {
                tx_id: tx_id.to_string(),
                message: Some(signed_message),
                conversion: None,
            },
        );
    }

    pub fn add_conversion_tx(&self, tx_id: &str, conversion: SubnetToL1ConversionData) {
        self.state.lock().unwrap().txs.insert(
            tx_id.to_string(),
            PChainTx {
                tx_id: tx_id.to_string(),
                message: None,
                conversion: Some(conversion),
            },
        );
    }

    fn next_status(&self, tx_id: &str) -> Result<TxStatus> {
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.status_failures.get_mut(tx_id) {
            if *n > 0 {
                *n -= 1;
                return Err(Error::api(
                    "platform.getTxStatus failed (-32000: database closed)",
                    false,
                ));
            }
        }
        Ok(match state.statuses.get_mut(tx_id) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or(TxStatus::Unknown),
            Some(q) => q.front().cloned().unwrap_or(TxStatus::Unknown),
            None => TxStatus::Unknown,
        })
    }
}

#[async_trait]
impl PChainClient for FakePChain {
    async fn get_subnet(&self, subnet_id: &H256) -> Result<SubnetInfo> {
        self.state
            .lock()
            .unwrap()
            .subnets
            .get(subnet_id)
            .cloned()
            .ok_or_else(|| Error::api("failed platform.getSubnet (subnet not found)", false))
    }

    async fn get_tx(&self, tx_id: &str) -> Result<PChainTx> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(tx_id)
            .cloned()
            .ok_or_else(|| Error::api("failed platform.getTx (not found)", false))
    }

    async fn get_tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        self.next_status(tx_id)
    }

    async fn get_atomic_tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        self.next_status(tx_id)
    }
}

/// Wallet issuing sequential tx IDs per method ("register-1", "weight-1", ...).
#[derive(Default)]
pub struct FakeWallet {
    calls: Mutex<Vec<String>>,
    reject_next: Mutex<bool>,
}

impl FakeWallet {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reject_next(&self) {
        *self.reject_next.lock().unwrap() = true;
    }

    fn issue(&self, method: &str, prefix: &str) -> Result<String> {
        let mut reject = self.reject_next.lock().unwrap();
        if *reject {
            *reject = false;
            return Err(classify_wallet_error(
                Some(USER_REJECTED_CODE),
                "User rejected the request.",
            ));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(method.to_string());
        let n = calls.iter().filter(|c| c.as_str() == method).count();
        Ok(format!("{prefix}-{n}"))
    }
}

#[async_trait]
impl PChainWallet for FakeWallet {
    async fn register_l1_validator(
        &self,
        _balance_navax: u64,
        _proof_of_possession: &[u8],
        _signed_message: &[u8],
    ) -> Result<String> {
        self.issue("registerL1Validator", "register")
    }

    async fn set_l1_validator_weight(&self, _signed_message: &[u8]) -> Result<String> {
        self.issue("setL1ValidatorWeight", "weight")
    }

    async fn export_c_to_p(&self, _amount_navax: u64) -> Result<String> {
        self.issue("exportCToP", "export")
    }

    async fn import_to_p(&self) -> Result<String> {
        self.issue("importToP", "import")
    }
}

/// Aggregator that signs everything with a placeholder signature.
#[derive(Default)]
pub struct FakeAggregator {
    requests: Mutex<Vec<AggregateRequest>>,
}

impl FakeAggregator {
    pub fn requests(&self) -> Vec<AggregateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignatureAggregator for FakeAggregator {
    async fn aggregate(&self, req: &AggregateRequest) -> Result<SignatureArtifact> {
        self.requests.lock().unwrap().push(req.clone());
        Ok(SignatureArtifact {
            unsigned_message: req.unsigned_message.clone(),
            signed_message: signed(&req.unsigned_message),
            quorum_percentage: req.quorum_percentage,
        })
    }
}
