//! EVM JSON-RPC access of the L1 that hosts the validator manager.
use std::sync::Arc;

use async_trait::async_trait;
use avalanche_types::key::secp256k1::private_key;
use ethers::middleware::SignerMiddleware;
use ethers_core::types::{
    transaction::eip2930::{AccessList, AccessListItem},
    Bytes, Eip1559TransactionRequest, Filter, Log, TransactionReceipt, U64,
};
use ethers_providers::{Http, Middleware, MiddlewareError, Provider};
use ethers_signers::{LocalWallet, Signer};
use primitive_types::{H160, H256, U256};
use serde_json::Value;

use crate::{
    confirm::{self, Backoff},
    contracts::revert::decode_revert,
    errors::{classify_wallet_error, Error, Result},
};

/// One write transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
    /// Contract function name, for logs only.
    pub label: String,
    pub to: H160,
    pub data: Bytes,
    pub value: U256,
    pub access_list: Vec<(H160, Vec<H256>)>,
}

impl TxRequest {
    pub fn new(label: &str, to: H160, data: Bytes) -> Self {
        Self {
            label: label.to_string(),
            to,
            data,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_access_list(mut self, address: H160, storage_keys: Vec<H256>) -> Self {
        self.access_list.push((address, storage_keys));
        self
    }
}

#[async_trait]
pub trait EvmClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Address that signs write transactions.
    fn sender(&self) -> H160;

    async fn send_transaction(&self, req: &TxRequest) -> Result<H256>;

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    /// Read-only "eth_call".
    async fn call(&self, to: H160, data: Bytes) -> Result<Bytes>;

    async fn get_code(&self, address: H160) -> Result<Bytes>;

    /// Logs of "address" matching event "topic0" and first indexed "topic1",
    /// across the whole chain history.
    async fn get_logs(&self, address: H160, topic0: H256, topic1: H256) -> Result<Vec<Log>>;

    /// Returns the revert output of a failed transaction, if the node can trace it.
    async fn trace_transaction(&self, tx_hash: H256) -> Result<Option<Vec<u8>>>;

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        backoff: &Backoff,
    ) -> Result<TransactionReceipt> {
        let what = format!("receipt of 0x{:x}", tx_hash);
        confirm::poll(&what, backoff, || self.get_receipt(tx_hash)).await
    }
}

/// Maps an ethers middleware failure through the wallet error classifier.
pub fn classify_middleware_error<E: MiddlewareError>(e: E) -> Error {
    if let Some(resp) = e.as_error_response() {
        return classify_wallet_error(Some(resp.code), &resp.message);
    }
    classify_wallet_error(None, &e.to_string())
}

fn read_error<E: MiddlewareError>(what: &str, e: E) -> Error {
    if let Some(resp) = e.as_error_response() {
        return Error::api(
            format!("failed {what} ({}: {})", resp.code, resp.message),
            false,
        );
    }
    Error::api(format!("failed {what} ({e})"), true)
}

pub struct EthersEvmClient {
    chain_id: u64,
    sender: H160,
    provider: Provider<Http>,
    middleware: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl EthersEvmClient {
    /// Connects to the RPC and loads the signing key; the chain ID is read
    /// from the RPC unless given.
    pub async fn new(rpc_url: &str, private_key_hex: &str, chain_id: Option<u64>) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| Error::Validation(format!("invalid RPC URL '{rpc_url}' ({e})")))?;
        let chain_id = match chain_id {
            Some(c) => c,
            None => provider
                .get_chainid()
                .await
                .map_err(|e| read_error("eth_chainId", e))?
                .as_u64(),
        };

        let key = private_key::Key::from_hex(private_key_hex)
            .map_err(|e| Error::Validation(format!("invalid EVM private key ({e})")))?;
        let wallet: LocalWallet = key.to_ethers_core_signing_key().into();
        let wallet = wallet.with_chain_id(chain_id);
        let sender = wallet.address();
        log::info!("EVM client for chain {chain_id} at {rpc_url} with sender 0x{sender:x}");

        let middleware = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        Ok(Self {
            chain_id,
            sender,
            provider,
            middleware,
        })
    }
}

#[async_trait]
impl EvmClient for EthersEvmClient {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    fn sender(&self) -> H160 {
        self.sender
    }

    async fn send_transaction(&self, req: &TxRequest) -> Result<H256> {
        let mut tx = Eip1559TransactionRequest::new()
            .from(self.sender)
            .to(req.to)
            .data(req.data.clone())
            .value(req.value)
            .chain_id(self.chain_id);
        if !req.access_list.is_empty() {
            let items: Vec<AccessListItem> = req
                .access_list
                .iter()
                .map(|(address, storage_keys)| AccessListItem {
                    address: *address,
                    storage_keys: storage_keys.clone(),
                })
                .collect();
            tx = tx.access_list(AccessList(items));
        }

        log::info!("sending {} to 0x{:x}", req.label, req.to);
        let pending = self
            .middleware
            .send_transaction(tx, None)
            .await
            .map_err(classify_middleware_error)?;
        let tx_hash = pending.tx_hash();
        log::info!("sent {} (tx 0x{:x})", req.label, tx_hash);
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| read_error("eth_getTransactionReceipt", e))
    }

    async fn call(&self, to: H160, data: Bytes) -> Result<Bytes> {
        let tx = Eip1559TransactionRequest::new()
            .from(self.sender)
            .to(to)
            .data(data);
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| read_error("eth_call", e))
    }

    async fn get_code(&self, address: H160) -> Result<Bytes> {
        self.provider
            .get_code(address, None)
            .await
            .map_err(|e| read_error("eth_getCode", e))
    }

    async fn get_logs(&self, address: H160, topic0: H256, topic1: H256) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(address)
            .topic0(topic0)
            .topic1(topic1)
            .from_block(0u64);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| read_error("eth_getLogs", e))
    }

    async fn trace_transaction(&self, tx_hash: H256) -> Result<Option<Vec<u8>>> {
        let trace: Value = self
            .provider
            .request(
                "debug_traceTransaction",
                (tx_hash, serde_json::json!({ "tracer": "callTracer" })),
            )
            .await
            .map_err(|e| read_error("debug_traceTransaction", e))?;
        Ok(revert_output(&trace))
    }
}

/// Finds the revert output in a "callTracer" frame: the top-level output,
/// else the first failing nested call.
pub fn revert_output(frame: &Value) -> Option<Vec<u8>> {
    let decode = |v: &Value| -> Option<Vec<u8>> {
        let s = v.as_str()?;
        let b = hex::decode(s.trim_start_matches("0x")).ok()?;
        if b.is_empty() {
            None
        } else {
            Some(b)
        }
    };

    if frame.get("error").is_some() {
        if let Some(b) = frame.get("output").and_then(decode) {
            return Some(b);
        }
    }
    frame
        .get("calls")
        .and_then(|c| c.as_array())
        .and_then(|calls| calls.iter().find_map(revert_output))
}

/// Submits a write, waits for its receipt, and decodes the revert reason
/// of a failed transaction.
pub async fn execute_write<E: EvmClient + ?Sized>(
    evm: &E,
    req: &TxRequest,
    backoff: &Backoff,
) -> Result<TransactionReceipt> {
    let tx_hash = evm.send_transaction(req).await?;
    let receipt = evm.wait_for_receipt(tx_hash, backoff).await?;
    if receipt.status == Some(U64::from(1)) {
        log::info!("{} succeeded (tx 0x{:x})", req.label, tx_hash);
        return Ok(receipt);
    }

    log::warn!("{} failed (tx 0x{:x}), tracing revert", req.label, tx_hash);
    let reason = match evm.trace_transaction(tx_hash).await {
        Ok(Some(output)) => decode_revert(&output),
        Ok(None) => None,
        Err(e) => {
            log::warn!("failed to trace 0x{:x} ({e})", tx_hash);
            None
        }
    };
    match reason {
        Some(reason) => Err(Error::Reverted { tx_hash, reason }),
        None => Err(Error::other(format!("{} transaction failed", req.label))),
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- evm::test_revert_output --exact --show-output
#[test]
fn test_revert_output() {
    let frame = serde_json::json!({
        "type": "CALL",
        "error": "execution reverted",
        "output": "0x08c379a0",
    });
    assert_eq!(revert_output(&frame).unwrap(), vec![0x08, 0xc3, 0x79, 0xa0]);

    let nested = serde_json::json!({
        "type": "CALL",
        "output": "0x",
        "calls": [
            { "type": "STATICCALL", "output": "0x01" },
            { "type": "CALL", "error": "execution reverted", "output": "0xdeadbeef" },
        ],
    });
    assert_eq!(revert_output(&nested).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);

    let ok = serde_json::json!({ "type": "CALL", "output": "0x01" });
    assert!(revert_output(&ok).is_none());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- evm::test_execute_write --exact --show-output
#[tokio::test]
async fn test_execute_write() {
    use crate::testutil::FakeEvm;
    use ethers_core::{
        abi::{self, Token},
        utils::id,
    };

    let _ = env_logger::builder().is_test(true).try_init();
    let backoff = crate::testutil::fast_backoff();
    let req = TxRequest::new("owner", H160::repeat_byte(0x01), Bytes::from(vec![0x01]));

    let evm = FakeEvm::default();
    evm.push_receipt(crate::testutil::receipt_with_status(1, vec![]));
    assert!(execute_write(&evm, &req, &backoff).await.is_ok());
    assert_eq!(evm.sent().len(), 1);

    // reverted with a decodable custom error
    let mut out = id("InvalidNodeID(bytes)").to_vec();
    out.extend(abi::encode(&[Token::Bytes(vec![0x01, 0x02])]));
    evm.push_receipt(crate::testutil::receipt_with_status(0, vec![]));
    evm.set_trace(Some(out));
    let e = execute_write(&evm, &req, &backoff).await.unwrap_err();
    assert_eq!(e.user_message(), "Transaction reverted: InvalidNodeID(0x0102)");

    // reverted without trace
    evm.push_receipt(crate::testutil::receipt_with_status(0, vec![]));
    evm.set_trace(None);
    let e = execute_write(&evm, &req, &backoff).await.unwrap_err();
    assert_eq!(e.user_message(), "Transaction failed: owner transaction failed");

    // wallet rejection surfaces before any receipt
    evm.fail_next_send(4001, "User denied transaction signature");
    let e = execute_write(&evm, &req, &backoff).await.unwrap_err();
    assert_eq!(e.user_message(), "Transaction rejected by user");
}
