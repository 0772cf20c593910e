//! One function per on-chain phase of the validator lifecycle.
//!
//! Each phase performs exactly one external call chain and returns the
//! artifacts the next phase consumes.
pub mod complete;
pub mod init_validator_set;
pub mod initiate;
pub mod submit;

use ethers_core::abi::Token;
use primitive_types::H256;

use crate::{
    aggregator::{AggregateRequest, SignatureAggregator, SignatureArtifact, DEFAULT_QUORUM_PERCENTAGE},
    confirm::Backoff,
    contracts,
    errors::Result,
    evm::{execute_write, EvmClient, TxRequest},
    manager::{ManagerContext, Target},
    warp::{message::predicate_storage_keys, Payload},
};

/// Network and polling parameters shared by every phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub network_id: u32,
    pub quorum_percentage: u8,
    pub receipt_backoff: Backoff,
    pub pchain_backoff: Backoff,
}

impl Default for Settings {
    fn default() -> Self {
        Self::default()
    }
}

impl Settings {
    pub fn default() -> Self {
        Self {
            network_id: 1,
            quorum_percentage: DEFAULT_QUORUM_PERCENTAGE,
            receipt_backoff: Backoff::default(),
            pchain_backoff: Backoff::default(),
        }
    }
}

/// Wraps "payload" as a P-Chain message and has the L1's validators sign it.
pub(crate) async fn sign_pchain_message(
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    payload: &Payload,
    justification: Vec<u8>,
    settings: &Settings,
) -> Result<SignatureArtifact> {
    let unsigned_message = payload.to_pchain_message(settings.network_id)?.to_bytes()?;
    aggregator
        .aggregate(&AggregateRequest {
            unsigned_message,
            justification,
            signing_subnet_id: ctx.subnet_id,
            quorum_percentage: settings.quorum_percentage,
        })
        .await
}

/// Calls "target" with the signed message in the warp precompile access list.
pub(crate) async fn send_with_predicate(
    evm: &dyn EvmClient,
    target: Target,
    args: &[Token],
    signed_message: &[u8],
    backoff: &Backoff,
) -> Result<H256> {
    let req = TxRequest::new(target.method.name, target.address, target.method.encode(args))
        .with_access_list(
            contracts::warp_precompile_address(),
            predicate_storage_keys(signed_message),
        );
    let receipt = execute_write(evm, &req, backoff).await?;
    Ok(receipt.transaction_hash)
}
