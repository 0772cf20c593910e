//! P-Chain reads over JSON-RPC and P-Chain writes through an external wallet.
use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use avalanche_types::ids;
use primitive_types::{H160, H256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    candidate::{parse_h160, parse_hex_exact, parse_node_id, BLS_PUBLIC_KEY_LEN},
    confirm::{self, Backoff},
    errors::{classify_wallet_error, Error, Result},
    warp::message::{ConversionValidator, SubnetToL1ConversionData},
};

pub const P_CHAIN_PATH: &str = "/ext/bc/P";
pub const C_CHAIN_AVAX_PATH: &str = "/ext/bc/C/avax";

/// Parses a cb58 ID (e.g., subnet, chain, or tx ID) into its raw bytes.
pub fn parse_id(s: &str) -> Result<H256> {
    let id = ids::Id::from_str(s)
        .map_err(|e| Error::Validation(format!("invalid ID '{s}' ({e})")))?;
    Ok(H256::from_slice(&id.to_vec()))
}

pub fn format_id(id: &H256) -> String {
    ids::Id::from_slice(id.as_bytes()).to_string()
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

async fn rpc_call<P: Serialize, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: P,
) -> Result<std::result::Result<R, RpcError>> {
    let req = RpcRequest {
        jsonrpc: "2.0",
        id: 1,
        method,
        params,
    };
    let resp = client.post(url).json(&req).send().await?;
    let status = resp.status();
    if status.is_server_error() {
        return Err(Error::api(format!("{method} returned {status}"), true));
    }
    let body: RpcResponse<R> = resp.json().await?;
    match (body.result, body.error) {
        (_, Some(e)) => Ok(Err(e)),
        (Some(r), None) => Ok(Ok(r)),
        (None, None) => Err(Error::decode(method, "response has neither result nor error")),
    }
}

/// Subnet as reported by "platform.getSubnet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub subnet_id: H256,
    /// False once the subnet has been converted to an L1.
    pub is_permissioned: bool,
    pub conversion_id: Option<H256>,
    pub manager_chain_id: Option<H256>,
    pub manager_address: Option<H160>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubnet {
    is_permissioned: bool,
    #[serde(default, rename = "conversionID")]
    conversion_id: Option<String>,
    #[serde(default, rename = "managerChainID")]
    manager_chain_id: Option<String>,
    #[serde(default)]
    manager_address: Option<String>,
}

const EMPTY_ID: &str = "11111111111111111111111111111111LpoYY";

fn non_empty_id(s: &Option<String>) -> Result<Option<H256>> {
    match s.as_deref() {
        None | Some("") | Some(EMPTY_ID) => Ok(None),
        Some(v) => parse_id(v).map(Some),
    }
}

impl RawSubnet {
    fn convert(self, subnet_id: H256) -> Result<SubnetInfo> {
        let manager_address = match self.manager_address.as_deref() {
            None | Some("") | Some("0x") => None,
            Some(a) => Some(parse_h160(a)?),
        };
        Ok(SubnetInfo {
            subnet_id,
            is_permissioned: self.is_permissioned,
            conversion_id: non_empty_id(&self.conversion_id)?,
            manager_chain_id: non_empty_id(&self.manager_chain_id)?,
            manager_address,
        })
    }
}

/// The parts of a P-Chain transaction the lifecycle reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PChainTx {
    pub tx_id: String,
    /// Signed warp message of a RegisterL1ValidatorTx or SetL1ValidatorWeightTx.
    pub message: Option<Vec<u8>>,
    /// Conversion data of a ConvertSubnetToL1Tx.
    pub conversion: Option<SubnetToL1ConversionData>,
}

fn json_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_str<'a>(v: &'a Value, field: &str) -> Result<&'a str> {
    v.get(field)
        .and_then(|f| f.as_str())
        .ok_or_else(|| Error::decode("P-Chain tx", format!("missing field '{field}'")))
}

/// Extracts the message or the conversion data from a "json"-encoded
/// "platform.getTx" result.
pub fn parse_tx(tx_id: &str, result: &Value) -> Result<PChainTx> {
    let unsigned = result
        .get("tx")
        .and_then(|t| t.get("unsignedTx"))
        .ok_or_else(|| Error::decode("P-Chain tx", "missing 'tx.unsignedTx'"))?;

    let mut parsed = PChainTx {
        tx_id: tx_id.to_string(),
        ..Default::default()
    };

    if let Some(m) = unsigned.get("message").and_then(|m| m.as_str()) {
        let b = hex::decode(m.trim_start_matches("0x"))
            .map_err(|e| Error::decode("P-Chain tx message", e.to_string()))?;
        parsed.message = Some(b);
    }

    if let Some(validators) = unsigned.get("validators").and_then(|v| v.as_array()) {
        let subnet_id = parse_id(json_str(unsigned, "subnetID")?)?;
        let manager_chain_id = parse_id(json_str(unsigned, "chainID")?)?;
        let address = json_str(unsigned, "address")?;
        let manager_address = hex::decode(address.trim_start_matches("0x"))
            .map_err(|e| Error::decode("conversion address", e.to_string()))?;

        let mut vs = Vec::with_capacity(validators.len());
        for v in validators {
            let node = json_str(v, "nodeID")?;
            let node_id = if node.starts_with("NodeID-") {
                parse_node_id(node)?
            } else {
                hex::decode(node.trim_start_matches("0x"))
                    .map_err(|e| Error::decode("conversion node ID", e.to_string()))?
            };
            let signer = v
                .get("signer")
                .ok_or_else(|| Error::decode("P-Chain tx", "validator without signer"))?;
            let bls_public_key = parse_hex_exact(
                "BLS public key",
                json_str(signer, "publicKey")?,
                BLS_PUBLIC_KEY_LEN,
            )?;
            let weight = v
                .get("weight")
                .and_then(json_u64)
                .ok_or_else(|| Error::decode("P-Chain tx", "validator without weight"))?;
            vs.push(ConversionValidator {
                node_id,
                bls_public_key,
                weight,
            });
        }
        parsed.conversion = Some(SubnetToL1ConversionData {
            subnet_id,
            manager_chain_id,
            manager_address,
            validators: vs,
        });
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// P-Chain decision.
    Committed,
    /// C-Chain atomic tx decision.
    Accepted,
    Processing,
    Dropped(String),
    Unknown,
}

impl TxStatus {
    fn parse(status: &str, reason: Option<String>) -> Self {
        match status {
            "Committed" => TxStatus::Committed,
            "Accepted" => TxStatus::Accepted,
            "Processing" => TxStatus::Processing,
            "Dropped" | "Rejected" => TxStatus::Dropped(reason.unwrap_or_default()),
            _ => TxStatus::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTxStatus {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
pub trait PChainClient: Send + Sync {
    async fn get_subnet(&self, subnet_id: &H256) -> Result<SubnetInfo>;

    async fn get_tx(&self, tx_id: &str) -> Result<PChainTx>;

    async fn get_tx_status(&self, tx_id: &str) -> Result<TxStatus>;

    /// Status of a C-Chain atomic (export/import) transaction.
    async fn get_atomic_tx_status(&self, tx_id: &str) -> Result<TxStatus>;
}

/// "platform.*" JSON-RPC on "http://[ADDR]:9650/ext/bc/P".
pub struct JsonRpcPChainClient {
    client: reqwest::Client,
    p_url: String,
    c_avax_url: String,
}

impl JsonRpcPChainClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = rpc_url.trim_end_matches('/');
        Ok(Self {
            client,
            p_url: format!("{base}{P_CHAIN_PATH}"),
            c_avax_url: format!("{base}{C_CHAIN_AVAX_PATH}"),
        })
    }

    async fn call<P: Serialize + Send, R: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: P,
    ) -> Result<R> {
        log::info!("calling {method} via {url}");
        rpc_call(&self.client, url, method, params)
            .await?
            .map_err(|e| Error::api(format!("{method} failed ({}: {})", e.code, e.message), false))
    }
}

#[async_trait]
impl PChainClient for JsonRpcPChainClient {
    async fn get_subnet(&self, subnet_id: &H256) -> Result<SubnetInfo> {
        let raw: RawSubnet = self
            .call(
                &self.p_url,
                "platform.getSubnet",
                serde_json::json!({ "subnetID": format_id(subnet_id) }),
            )
            .await?;
        raw.convert(*subnet_id)
    }

    async fn get_tx(&self, tx_id: &str) -> Result<PChainTx> {
        let result: Value = self
            .call(
                &self.p_url,
                "platform.getTx",
                serde_json::json!({ "txID": tx_id, "encoding": "json" }),
            )
            .await?;
        parse_tx(tx_id, &result)
    }

    async fn get_tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        let raw: RawTxStatus = self
            .call(
                &self.p_url,
                "platform.getTxStatus",
                serde_json::json!({ "txID": tx_id }),
            )
            .await?;
        Ok(TxStatus::parse(&raw.status, raw.reason))
    }

    async fn get_atomic_tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        let raw: RawTxStatus = self
            .call(
                &self.c_avax_url,
                "avax.getAtomicTxStatus",
                serde_json::json!({ "txID": tx_id }),
            )
            .await?;
        Ok(TxStatus::parse(&raw.status, raw.reason))
    }
}

/// Polls until the P-Chain commits "tx_id".
pub async fn wait_for_commit<P: PChainClient + ?Sized>(
    pchain: &P,
    tx_id: &str,
    backoff: &Backoff,
) -> Result<()> {
    let what = format!("P-Chain tx {tx_id}");
    confirm::poll(&what, backoff, || async {
        // a failed status read is a missed attempt
        let status = pchain
            .get_tx_status(tx_id)
            .await
            .map_err(Error::into_retryable_api)?;
        match status {
            TxStatus::Committed | TxStatus::Accepted => Ok(Some(())),
            TxStatus::Dropped(reason) => Err(Error::other(format!(
                "P-Chain tx {tx_id} was dropped ({reason})"
            ))),
            _ => Ok(None),
        }
    })
    .await
}

/// Signs and issues P-Chain (and atomic) transactions.
/// Key material never enters this process.
#[async_trait]
pub trait PChainWallet: Send + Sync {
    async fn register_l1_validator(
        &self,
        balance_navax: u64,
        bls_proof_of_possession: &[u8],
        signed_message: &[u8],
    ) -> Result<String>;

    async fn set_l1_validator_weight(&self, signed_message: &[u8]) -> Result<String>;

    /// Exports from the C-Chain to the P-Chain; returns the export tx ID.
    async fn export_c_to_p(&self, amount_navax: u64) -> Result<String>;

    /// Imports pending atomic UTXOs into the P-Chain; returns the import tx ID.
    async fn import_to_p(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTx {
    #[serde(rename = "txID")]
    tx_id: String,
}

/// Forwards P-Chain writes to a wallet service speaking JSON-RPC.
pub struct RemoteWallet {
    client: reqwest::Client,
    url: String,
}

impl RemoteWallet {
    pub fn new(url: &str) -> Result<Self> {
        // wallets wait for operator approval
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn issue(&self, method: &str, params: Value) -> Result<String> {
        log::info!("requesting {method} from wallet {}", self.url);
        let issued: IssuedTx = rpc_call(&self.client, &self.url, method, params)
            .await?
            .map_err(|e| classify_wallet_error(Some(e.code), &e.message))?;
        log::info!("wallet issued {method} tx {}", issued.tx_id);
        Ok(issued.tx_id)
    }
}

#[async_trait]
impl PChainWallet for RemoteWallet {
    async fn register_l1_validator(
        &self,
        balance_navax: u64,
        bls_proof_of_possession: &[u8],
        signed_message: &[u8],
    ) -> Result<String> {
        self.issue(
            "avalanche_registerL1Validator",
            serde_json::json!({
                "balance": balance_navax.to_string(),
                "blsProofOfPossession": format!("0x{}", hex::encode(bls_proof_of_possession)),
                "message": format!("0x{}", hex::encode(signed_message)),
            }),
        )
        .await
    }

    async fn set_l1_validator_weight(&self, signed_message: &[u8]) -> Result<String> {
        self.issue(
            "avalanche_setL1ValidatorWeight",
            serde_json::json!({
                "message": format!("0x{}", hex::encode(signed_message)),
            }),
        )
        .await
    }

    async fn export_c_to_p(&self, amount_navax: u64) -> Result<String> {
        self.issue(
            "avalanche_exportCToP",
            serde_json::json!({ "amount": amount_navax.to_string() }),
        )
        .await
    }

    async fn import_to_p(&self) -> Result<String> {
        self.issue("avalanche_importToP", serde_json::json!({})).await
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- pchain::test_ids --exact --show-output
#[test]
fn test_ids() {
    let id = parse_id(EMPTY_ID).unwrap();
    assert_eq!(id, H256::zero());
    assert_eq!(format_id(&H256::zero()), EMPTY_ID);

    let h = H256::repeat_byte(0x07);
    assert_eq!(parse_id(&format_id(&h)).unwrap(), h);
    assert!(parse_id("not-an-id").is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- pchain::test_parse_subnet --exact --show-output
#[test]
fn test_parse_subnet() {
    let chain = H256::repeat_byte(0x02);
    let raw: RawSubnet = serde_json::from_value(serde_json::json!({
        "isPermissioned": false,
        "controlKeys": [],
        "threshold": "0",
        "locktime": "0",
        "subnetTransformationTxID": EMPTY_ID,
        "conversionID": format_id(&H256::repeat_byte(0x03)),
        "managerChainID": format_id(&chain),
        "managerAddress": "0x0feedc0de0000000000000000000000000000000",
    }))
    .unwrap();
    let info = raw.convert(H256::repeat_byte(0x01)).unwrap();
    assert!(!info.is_permissioned);
    assert_eq!(info.manager_chain_id, Some(chain));
    assert_eq!(
        info.manager_address,
        Some(parse_h160("0x0feedc0de0000000000000000000000000000000").unwrap())
    );

    let raw: RawSubnet = serde_json::from_value(serde_json::json!({
        "isPermissioned": true,
        "conversionID": EMPTY_ID,
        "managerChainID": EMPTY_ID,
        "managerAddress": null,
    }))
    .unwrap();
    let info = raw.convert(H256::repeat_byte(0x01)).unwrap();
    assert!(info.is_permissioned);
    assert!(info.manager_address.is_none());
    assert!(info.conversion_id.is_none());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- pchain::test_parse_tx --exact --show-output
#[test]
fn test_parse_tx() {
    let register = serde_json::json!({
        "tx": { "unsignedTx": { "balance": 100, "message": "0x0102ff" } },
        "encoding": "json",
    });
    let tx = parse_tx("tx1", &register).unwrap();
    assert_eq!(tx.message, Some(vec![0x01, 0x02, 0xff]));
    assert!(tx.conversion.is_none());

    let subnet = H256::repeat_byte(0x01);
    let chain = H256::repeat_byte(0x02);
    let convert = serde_json::json!({
        "tx": { "unsignedTx": {
            "subnetID": format_id(&subnet),
            "chainID": format_id(&chain),
            "address": "0x0feedc0de0000000000000000000000000000000",
            "validators": [{
                "nodeID": format!("0x{}", "22".repeat(20)),
                "weight": 100,
                "balance": "1000000000",
                "signer": {
                    "publicKey": format!("0x{}", "33".repeat(48)),
                    "proofOfPossession": format!("0x{}", "44".repeat(96)),
                },
            }],
        }},
        "encoding": "json",
    });
    let tx = parse_tx("tx2", &convert).unwrap();
    let conv = tx.conversion.unwrap();
    assert_eq!(conv.subnet_id, subnet);
    assert_eq!(conv.manager_chain_id, chain);
    assert_eq!(conv.manager_address.len(), 20);
    assert_eq!(conv.validators.len(), 1);
    assert_eq!(conv.validators[0].node_id, vec![0x22; 20]);
    assert_eq!(conv.validators[0].weight, 100);

    assert!(parse_tx("tx3", &serde_json::json!({})).is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- pchain::test_wait_for_commit --exact --show-output
#[tokio::test]
async fn test_wait_for_commit() {
    use crate::testutil::{fast_backoff, FakePChain};

    let _ = env_logger::builder().is_test(true).try_init();

    let pchain = FakePChain::default();
    pchain.push_status("tx1", TxStatus::Processing);
    pchain.push_status("tx1", TxStatus::Committed);
    wait_for_commit(&pchain, "tx1", &fast_backoff()).await.unwrap();

    pchain.push_status("tx2", TxStatus::Dropped(String::from("insufficient balance")));
    let e = wait_for_commit(&pchain, "tx2", &fast_backoff()).await.unwrap_err();
    assert!(e.message().contains("insufficient balance"));

    // transient read failures are retried
    pchain.fail_status("tx4", 2);
    pchain.push_status("tx4", TxStatus::Committed);
    wait_for_commit(&pchain, "tx4", &fast_backoff()).await.unwrap();

    // never decided
    pchain.push_status("tx3", TxStatus::Processing);
    assert!(matches!(
        wait_for_commit(&pchain, "tx3", &fast_backoff()).await,
        Err(Error::Timeout { .. })
    ));
}
