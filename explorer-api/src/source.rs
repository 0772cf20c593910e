//! Upstream reads of one address: chain RPC for the code check, the
//! Avalanche Data API (Glacier) for everything indexed.
use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use ethers_providers::{Http, Middleware, Provider};
use primitive_types::H160;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::registry::Chain;

pub const DEFAULT_DATA_API_URL: &str = "https://glacier-api.avax.network";

/// Transactions per page.
pub const PAGE_SIZE: u32 = 25;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Failed Data API read; callers degrade to defaults.
    #[error("failed Data API request: {0}")]
    Upstream(String),
    /// Failed chain RPC read.
    #[error("failed RPC request: {0}")]
    Rpc(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub erc_type: Option<String>,
    pub logo_uri: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NativeBalance {
    pub symbol: String,
    pub decimals: u8,
    /// Smallest-unit amount in decimal.
    pub balance: String,
    pub value_usd: f64,
}

impl Default for NativeBalance {
    fn default() -> Self {
        Self {
            symbol: String::from("AVAX"),
            decimals: 18,
            balance: String::from("0"),
            value_usd: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Balance {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub balance: String,
    pub value_usd: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: String,
    pub timestamp: u64,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas_used: String,
    pub status: String,
    pub method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Transfer {
    pub tx_hash: String,
    pub timestamp: u64,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NftTransfer {
    pub tx_hash: String,
    pub timestamp: u64,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub token_symbol: String,
    pub token_id: String,
    /// "ERC-721" or "ERC-1155".
    pub standard: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InternalTransaction {
    pub tx_hash: String,
    pub timestamp: u64,
    pub from: String,
    pub to: String,
    pub value: String,
    pub tx_type: String,
    pub is_reverted: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddressChain {
    pub chain_id: String,
    pub chain_name: String,
}

/// One page of activity; the transfer lists are flattened from the page's transactions.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub erc20_transfers: Vec<Erc20Transfer>,
    pub nft_transfers: Vec<NftTransfer>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait AddressDataSource: Send + Sync {
    async fn is_contract(&self, chain: &Chain, address: &str) -> Result<bool>;

    async fn contract_metadata(&self, chain: &Chain, address: &str)
        -> Result<Option<ContractMetadata>>;

    async fn native_balance(&self, chain: &Chain, address: &str) -> Result<NativeBalance>;

    async fn erc20_balances(&self, chain: &Chain, address: &str) -> Result<Vec<Erc20Balance>>;

    async fn transactions(
        &self,
        chain: &Chain,
        address: &str,
        page_token: Option<&str>,
    ) -> Result<TransactionPage>;

    /// Chains on which the address has activity.
    async fn address_chains(&self, address: &str) -> Result<Vec<AddressChain>>;
}

// Data API wire types
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawValue {
    value: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawAddress {
    address: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawToken {
    address: String,
    name: String,
    symbol: String,
    decimals: u8,
    balance: String,
    balance_value: Option<RawValue>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawNativeBalanceResponse {
    native_token_balance: RawToken,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawErc20BalancesResponse {
    erc20_token_balances: Vec<RawToken>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawLogoAsset {
    image_uri: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawContractMetadata {
    name: Option<String>,
    symbol: Option<String>,
    erc_type: Option<String>,
    logo_asset: Option<RawLogoAsset>,
    description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawMethod {
    method_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawNativeTransaction {
    block_number: String,
    block_timestamp: u64,
    tx_hash: String,
    tx_status: String,
    from: RawAddress,
    to: Option<RawAddress>,
    value: String,
    gas_used: String,
    method: Option<RawMethod>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawTransfer {
    from: RawAddress,
    to: RawAddress,
    value: String,
    token_id: String,
    erc20_token: Option<RawToken>,
    erc721_token: Option<RawToken>,
    erc1155_token: Option<RawToken>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawInternalTransaction {
    from: RawAddress,
    to: RawAddress,
    value: String,
    internal_tx_type: String,
    is_reverted: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawTransactionDetails {
    native_transaction: RawNativeTransaction,
    erc20_transfers: Vec<RawTransfer>,
    erc721_transfers: Vec<RawTransfer>,
    erc1155_transfers: Vec<RawTransfer>,
    internal_transactions: Vec<RawInternalTransaction>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawTransactionsResponse {
    transactions: Vec<RawTransactionDetails>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawChain {
    chain_id: String,
    chain_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawAddressChainsResponse {
    indexed_chains: Vec<RawChain>,
}

fn value_usd(v: &Option<RawValue>) -> f64 {
    v.as_ref().map(|v| v.value).unwrap_or(0.0)
}

fn nft_transfer(tx: &RawNativeTransaction, t: RawTransfer, standard: &str) -> NftTransfer {
    let token = t.erc721_token.or(t.erc1155_token).unwrap_or_default();
    NftTransfer {
        tx_hash: tx.tx_hash.clone(),
        timestamp: tx.block_timestamp,
        from: t.from.address,
        to: t.to.address,
        token_address: token.address,
        token_symbol: token.symbol,
        token_id: t.token_id,
        standard: standard.to_string(),
        value: t.value,
    }
}

impl RawTransactionsResponse {
    fn into_page(self) -> TransactionPage {
        let mut page = TransactionPage {
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
            ..Default::default()
        };
        for d in self.transactions {
            let tx = d.native_transaction;
            for t in d.erc20_transfers {
                let token = t.erc20_token.unwrap_or_default();
                page.erc20_transfers.push(Erc20Transfer {
                    tx_hash: tx.tx_hash.clone(),
                    timestamp: tx.block_timestamp,
                    from: t.from.address,
                    to: t.to.address,
                    token_address: token.address,
                    token_symbol: token.symbol,
                    token_decimals: token.decimals,
                    value: t.value,
                });
            }
            for t in d.erc721_transfers {
                page.nft_transfers.push(nft_transfer(&tx, t, "ERC-721"));
            }
            for t in d.erc1155_transfers {
                page.nft_transfers.push(nft_transfer(&tx, t, "ERC-1155"));
            }
            for t in d.internal_transactions {
                page.internal_transactions.push(InternalTransaction {
                    tx_hash: tx.tx_hash.clone(),
                    timestamp: tx.block_timestamp,
                    from: t.from.address,
                    to: t.to.address,
                    value: t.value,
                    tx_type: t.internal_tx_type,
                    is_reverted: t.is_reverted,
                });
            }
            page.transactions.push(Transaction {
                hash: tx.tx_hash,
                block_number: tx.block_number,
                timestamp: tx.block_timestamp,
                from: tx.from.address,
                to: tx.to.map(|a| a.address),
                value: tx.value,
                gas_used: tx.gas_used,
                status: tx.tx_status,
                method: tx.method.and_then(|m| m.method_name),
            });
        }
        page
    }
}

/// Reads from the Avalanche Data API, with "eth_getCode" on the chain RPC.
pub struct GlacierSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GlacierSource {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// GETs "path"; a 404 is "None".
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {url}");
        let mut req = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("x-glacier-api-key", key);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!("{url} returned {}", resp.status())));
        }
        Ok(Some(resp.json::<T>().await?))
    }
}

#[async_trait]
impl AddressDataSource for GlacierSource {
    async fn is_contract(&self, chain: &Chain, address: &str) -> Result<bool> {
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
            .map_err(|e| Error::Rpc(format!("invalid RPC URL '{}' ({e})", chain.rpc_url)))?;
        let addr = H160::from_str(address.trim_start_matches("0x"))
            .map_err(|e| Error::Rpc(format!("invalid address {address} ({e})")))?;
        let code = provider
            .get_code(addr, None)
            .await
            .map_err(|e| Error::Rpc(format!("failed eth_getCode ({e})")))?;
        Ok(!code.is_empty())
    }

    async fn contract_metadata(
        &self,
        chain: &Chain,
        address: &str,
    ) -> Result<Option<ContractMetadata>> {
        let path = format!("/v1/chains/{}/addresses/{}", chain.chain_id, address);
        let raw: Option<RawContractMetadata> = self.get(&path, &[]).await?;
        Ok(raw.map(|m| ContractMetadata {
            name: m.name,
            symbol: m.symbol,
            erc_type: m.erc_type,
            logo_uri: m.logo_asset.and_then(|l| l.image_uri),
            description: m.description,
        }))
    }

    async fn native_balance(&self, chain: &Chain, address: &str) -> Result<NativeBalance> {
        let path = format!(
            "/v1/chains/{}/addresses/{}/balances:getNative",
            chain.chain_id, address
        );
        let raw: Option<RawNativeBalanceResponse> =
            self.get(&path, &[("currency", String::from("usd"))]).await?;
        Ok(match raw {
            Some(r) => {
                let t = r.native_token_balance;
                NativeBalance {
                    value_usd: value_usd(&t.balance_value),
                    symbol: t.symbol,
                    decimals: t.decimals,
                    balance: if t.balance.is_empty() {
                        String::from("0")
                    } else {
                        t.balance
                    },
                }
            }
            None => NativeBalance::default(),
        })
    }

    async fn erc20_balances(&self, chain: &Chain, address: &str) -> Result<Vec<Erc20Balance>> {
        let path = format!(
            "/v1/chains/{}/addresses/{}/balances:listErc20",
            chain.chain_id, address
        );
        let raw: Option<RawErc20BalancesResponse> = self
            .get(
                &path,
                &[
                    ("currency", String::from("usd")),
                    ("filterSpamTokens", String::from("true")),
                ],
            )
            .await?;
        Ok(raw
            .map(|r| r.erc20_token_balances)
            .unwrap_or_default()
            .into_iter()
            .map(|t| Erc20Balance {
                value_usd: value_usd(&t.balance_value),
                address: t.address,
                name: t.name,
                symbol: t.symbol,
                decimals: t.decimals,
                balance: t.balance,
            })
            .collect())
    }

    async fn transactions(
        &self,
        chain: &Chain,
        address: &str,
        page_token: Option<&str>,
    ) -> Result<TransactionPage> {
        let path = format!(
            "/v1/chains/{}/addresses/{}/transactions",
            chain.chain_id, address
        );
        let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(t) = page_token {
            query.push(("pageToken", t.to_string()));
        }
        let raw: Option<RawTransactionsResponse> = self.get(&path, &query).await?;
        Ok(raw.map(|r| r.into_page()).unwrap_or_default())
    }

    async fn address_chains(&self, address: &str) -> Result<Vec<AddressChain>> {
        let path = format!("/v1/address/{address}/chains");
        let raw: Option<RawAddressChainsResponse> = self.get(&path, &[]).await?;
        Ok(raw
            .map(|r| r.indexed_chains)
            .unwrap_or_default()
            .into_iter()
            .map(|c| AddressChain {
                chain_id: c.chain_id,
                chain_name: c.chain_name,
            })
            .collect())
    }
}

/// RUST_LOG=debug cargo test --package explorer-api --bin explorer-api -- source::test_transactions_page --exact --show-output
#[test]
fn test_transactions_page() {
    let _ = env_logger::builder().is_test(true).try_init();

    let raw: RawTransactionsResponse = serde_json::from_value(serde_json::json!({
        "transactions": [{
            "nativeTransaction": {
                "blockNumber": "100",
                "blockTimestamp": 1700000000u64,
                "txHash": "0xaa",
                "txStatus": "1",
                "from": { "address": "0x01" },
                "to": { "address": "0x02" },
                "value": "5",
                "gasUsed": "21000",
                "method": { "methodName": "transfer(address,uint256)" }
            },
            "erc20Transfers": [{
                "from": { "address": "0x01" },
                "to": { "address": "0x03" },
                "value": "7",
                "erc20Token": { "address": "0xt0", "symbol": "USDC", "decimals": 6 }
            }],
            "erc721Transfers": [{
                "from": { "address": "0x01" },
                "to": { "address": "0x04" },
                "tokenId": "9",
                "erc721Token": { "address": "0xn0", "symbol": "NFT" }
            }],
            "internalTransactions": [{
                "from": { "address": "0x02" },
                "to": { "address": "0x05" },
                "value": "1",
                "internalTxType": "CALL",
                "isReverted": false
            }]
        }],
        "nextPageToken": "next"
    }))
    .unwrap();

    let page = raw.into_page();
    assert_eq!(page.transactions.len(), 1);
    assert_eq!(page.transactions[0].hash, "0xaa");
    assert_eq!(
        page.transactions[0].method.as_deref(),
        Some("transfer(address,uint256)")
    );
    assert_eq!(page.erc20_transfers[0].token_symbol, "USDC");
    assert_eq!(page.erc20_transfers[0].tx_hash, "0xaa");
    assert_eq!(page.nft_transfers[0].standard, "ERC-721");
    assert_eq!(page.nft_transfers[0].token_id, "9");
    assert_eq!(page.internal_transactions[0].to, "0x05");
    assert_eq!(page.next_page_token.as_deref(), Some("next"));

    // empty token means last page
    let raw: RawTransactionsResponse =
        serde_json::from_value(serde_json::json!({ "transactions": [], "nextPageToken": "" }))
            .unwrap();
    assert!(raw.into_page().next_page_token.is_none());
}
