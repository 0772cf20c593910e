use std::{convert::Infallible, sync::Arc};

use serde::{Deserialize, Serialize};
use warp::{http::StatusCode, Filter, Reply};

use crate::{
    registry::ChainRegistry,
    source::{
        AddressChain, AddressDataSource, ContractMetadata, Erc20Balance, Erc20Transfer,
        InternalTransaction, NativeBalance, NftTransfer, Transaction, TransactionPage,
    },
};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddressResponse {
    pub address: String,
    pub is_contract: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_metadata: Option<ContractMetadata>,
    pub native_balance: NativeBalance,
    pub erc20_balances: Vec<Erc20Balance>,
    pub transactions: Vec<Transaction>,
    pub erc20_transfers: Vec<Erc20Transfer>,
    pub nft_transfers: Vec<NftTransfer>,
    pub internal_transactions: Vec<InternalTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    pub total_value_usd: f64,
    pub address_chains: Vec<AddressChain>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressQuery {
    pub page_token: Option<String>,
}

/// Returns true for "0x" followed by 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn error_reply(code: StatusCode, msg: &str) -> warp::reply::Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: msg.to_string(),
        }),
        code,
    )
    .into_response()
}

/// GET /health, GET /api/explorer/{chainId}/address/{address}
pub fn routes(
    registry: Arc<ChainRegistry>,
    source: Arc<dyn AddressDataSource>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let registry = warp::any().map(move || registry.clone());
    let source = warp::any().map(move || source.clone());

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "ok");

    let address = warp::path!("api" / "explorer" / String / "address" / String)
        .and(warp::get())
        .and(warp::query::<AddressQuery>())
        .and(registry)
        .and(source)
        .and_then(handle_address);

    health.or(address)
}

pub async fn handle_address(
    chain_id: String,
    address: String,
    query: AddressQuery,
    registry: Arc<ChainRegistry>,
    source: Arc<dyn AddressDataSource>,
) -> Result<warp::reply::Response, Infallible> {
    if !is_valid_address(&address) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Invalid address format",
        ));
    }
    let chain = match registry.get(&chain_id) {
        Some(c) => c.clone(),
        None => {
            return Ok(error_reply(
                StatusCode::NOT_FOUND,
                "Chain not found or RPC URL missing",
            ))
        }
    };
    log::info!("reading address {address} on chain {chain_id}");

    let (is_contract, metadata, native, erc20, page, chains) = tokio::join!(
        source.is_contract(&chain, &address),
        source.contract_metadata(&chain, &address),
        source.native_balance(&chain, &address),
        source.erc20_balances(&chain, &address),
        source.transactions(&chain, &address, query.page_token.as_deref()),
        source.address_chains(&address),
    );

    // the chain's own RPC is the one read that must succeed
    let is_contract = match is_contract {
        Ok(v) => v,
        Err(e) => {
            log::error!("failed to read code of {address} on {chain_id} ({e})");
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
            ));
        }
    };
    let contract_metadata = if is_contract {
        metadata.unwrap_or_else(|e| {
            log::warn!("failed to read contract metadata ({e})");
            None
        })
    } else {
        None
    };
    let native_balance = native.unwrap_or_else(|e| {
        log::warn!("failed to read native balance ({e})");
        NativeBalance::default()
    });
    let erc20_balances = erc20.unwrap_or_else(|e| {
        log::warn!("failed to read ERC-20 balances ({e})");
        Vec::new()
    });
    let page = page.unwrap_or_else(|e| {
        log::warn!("failed to read transactions ({e})");
        TransactionPage::default()
    });
    let address_chains = chains.unwrap_or_else(|e| {
        log::warn!("failed to read address chains ({e})");
        Vec::new()
    });

    let total_value_usd = native_balance.value_usd
        + erc20_balances.iter().map(|b| b.value_usd).sum::<f64>();

    let resp = AddressResponse {
        address,
        is_contract,
        contract_metadata,
        native_balance,
        erc20_balances,
        transactions: page.transactions,
        erc20_transfers: page.erc20_transfers,
        nft_transfers: page.nft_transfers,
        internal_transactions: page.internal_transactions,
        next_page_token: page.next_page_token,
        total_value_usd,
        address_chains,
    };
    Ok(warp::reply::json(&resp).into_response())
}

#[cfg(test)]
mod fake {
    use async_trait::async_trait;

    use crate::{
        registry::Chain,
        source::{
            AddressChain, AddressDataSource, ContractMetadata, Erc20Balance, Error, NativeBalance,
            Result, Transaction, TransactionPage,
        },
    };

    #[derive(Default)]
    pub struct FakeSource {
        pub contract: bool,
        pub fail_rpc: bool,
        pub fail_upstream: bool,
    }

    impl FakeSource {
        fn upstream<T>(&self, v: T) -> Result<T> {
            if self.fail_upstream {
                return Err(Error::Upstream(String::from("503 Service Unavailable")));
            }
            Ok(v)
        }
    }

    #[async_trait]
    impl AddressDataSource for FakeSource {
        async fn is_contract(&self, _chain: &Chain, _address: &str) -> Result<bool> {
            if self.fail_rpc {
                return Err(Error::Rpc(String::from("connection refused")));
            }
            Ok(self.contract)
        }

        async fn contract_metadata(
            &self,
            _chain: &Chain,
            _address: &str,
        ) -> Result<Option<ContractMetadata>> {
            self.upstream(Some(ContractMetadata {
                name: Some(String::from("Token")),
                ..Default::default()
            }))
        }

        async fn native_balance(&self, _chain: &Chain, _address: &str) -> Result<NativeBalance> {
            self.upstream(NativeBalance {
                balance: String::from("2000000000000000000"),
                value_usd: 50.0,
                ..Default::default()
            })
        }

        async fn erc20_balances(&self, _chain: &Chain, _address: &str) -> Result<Vec<Erc20Balance>> {
            self.upstream(vec![
                Erc20Balance {
                    symbol: String::from("USDC"),
                    value_usd: 10.5,
                    ..Default::default()
                },
                Erc20Balance {
                    symbol: String::from("JOE"),
                    value_usd: 1.5,
                    ..Default::default()
                },
            ])
        }

        async fn transactions(
            &self,
            _chain: &Chain,
            _address: &str,
            page_token: Option<&str>,
        ) -> Result<TransactionPage> {
            let next = match page_token {
                None => Some(String::from("page-2")),
                Some(_) => None,
            };
            self.upstream(TransactionPage {
                transactions: vec![Transaction {
                    hash: String::from("0xaa"),
                    ..Default::default()
                }],
                next_page_token: next,
                ..Default::default()
            })
        }

        async fn address_chains(&self, _address: &str) -> Result<Vec<AddressChain>> {
            self.upstream(vec![AddressChain {
                chain_id: String::from("43114"),
                chain_name: String::from("Avalanche C-Chain"),
            }])
        }
    }
}

#[cfg(test)]
const TEST_ADDRESS: &str = "0x8db97c7cece249c2b98bdc0226cc4c2a57bf52fc";

#[cfg(test)]
fn test_routes(
    source: fake::FakeSource,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    routes(Arc::new(ChainRegistry::default()), Arc::new(source))
}

/// RUST_LOG=debug cargo test --package explorer-api --bin explorer-api -- handler::test_invalid_requests --exact --show-output
#[tokio::test]
async fn test_invalid_requests() {
    let _ = env_logger::builder().is_test(true).try_init();

    let api = test_routes(fake::FakeSource::default());

    let resp = warp::test::request()
        .path("/api/explorer/43114/address/0x1234")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body.error, "Invalid address format");

    // address is checked before the chain
    let resp = warp::test::request()
        .path("/api/explorer/137/address/not-an-address")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request()
        .path(&format!("/api/explorer/137/address/{TEST_ADDRESS}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body.error, "Chain not found or RPC URL missing");

    let resp = warp::test::request().path("/health").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body().as_ref(), b"ok");

    assert!(is_valid_address(TEST_ADDRESS));
    assert!(!is_valid_address("8db97c7cece249c2b98bdc0226cc4c2a57bf52fc"));
    assert!(!is_valid_address("0x8db97c7cece249c2b98bdc0226cc4c2a57bf52fz"));
}

/// RUST_LOG=debug cargo test --package explorer-api --bin explorer-api -- handler::test_address --exact --show-output
#[tokio::test]
async fn test_address() {
    let _ = env_logger::builder().is_test(true).try_init();

    let api = test_routes(fake::FakeSource {
        contract: true,
        ..Default::default()
    });
    let resp = warp::test::request()
        .path(&format!("/api/explorer/43114/address/{TEST_ADDRESS}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AddressResponse = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body.address, TEST_ADDRESS);
    assert!(body.is_contract);
    assert_eq!(
        body.contract_metadata.unwrap().name.as_deref(),
        Some("Token")
    );
    assert_eq!(body.erc20_balances.len(), 2);
    assert_eq!(body.transactions[0].hash, "0xaa");
    assert_eq!(body.next_page_token.as_deref(), Some("page-2"));
    assert!((body.total_value_usd - 62.0).abs() < f64::EPSILON);
    assert_eq!(body.address_chains[0].chain_id, "43114");

    let raw: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert!(raw.get("nativeBalance").is_some());
    assert!(raw.get("internalTransactions").is_some());

    // last page carries no token
    let resp = warp::test::request()
        .path(&format!(
            "/api/explorer/43114/address/{TEST_ADDRESS}?pageToken=page-2"
        ))
        .reply(&api)
        .await;
    let raw: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert!(raw.get("nextPageToken").is_none());
}

/// RUST_LOG=debug cargo test --package explorer-api --bin explorer-api -- handler::test_upstream_failures --exact --show-output
#[tokio::test]
async fn test_upstream_failures() {
    let _ = env_logger::builder().is_test(true).try_init();

    let api = test_routes(fake::FakeSource {
        contract: true,
        fail_upstream: true,
        ..Default::default()
    });
    let resp = warp::test::request()
        .path(&format!("/api/explorer/43113/address/{TEST_ADDRESS}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AddressResponse = serde_json::from_slice(resp.body()).unwrap();
    assert!(body.is_contract);
    assert!(body.contract_metadata.is_none());
    assert_eq!(body.native_balance, NativeBalance::default());
    assert!(body.erc20_balances.is_empty());
    assert!(body.transactions.is_empty());
    assert!(body.address_chains.is_empty());
    assert_eq!(body.total_value_usd, 0.0);

    let api = test_routes(fake::FakeSource {
        fail_rpc: true,
        ..Default::default()
    });
    let resp = warp::test::request()
        .path(&format!("/api/explorer/43114/address/{TEST_ADDRESS}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = serde_json::from_slice(resp.body()).unwrap();
    assert!(body.error.contains("connection refused"));
}
