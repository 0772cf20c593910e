use ethers_core::types::U64;
use primitive_types::H256;

use super::Settings;
use crate::{
    aggregator::{AggregateRequest, SignatureAggregator, SignatureArtifact},
    candidate::ValidatorCandidate,
    errors::{Error, Result},
    evm::EvmClient,
    manager::ManagerContext,
    pchain::{wait_for_commit, PChainClient, PChainWallet},
    warp::{logs::extract_warp_message, message::validation_id, Payload, UnsignedMessage},
};

/// Artifacts of a P-Chain submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutput {
    pub pchain_tx_id: String,
    pub signature: SignatureArtifact,
    pub validation_id: H256,
    pub nonce: Option<u64>,
    pub weight: Option<u64>,
}

/// Reads the warp message emitted by "evm_tx_hash" and aggregates
/// the L1's signatures over it.
async fn sign_evm_message(
    evm: &dyn EvmClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    evm_tx_hash: &H256,
    settings: &Settings,
) -> Result<(Vec<u8>, Payload, SignatureArtifact)> {
    let receipt = evm.get_receipt(*evm_tx_hash).await?.ok_or_else(|| {
        Error::Validation(format!("transaction 0x{:x} not found", evm_tx_hash))
    })?;
    if receipt.status != Some(U64::from(1)) {
        return Err(Error::Validation(format!(
            "transaction 0x{:x} did not succeed",
            evm_tx_hash
        )));
    }

    let unsigned_message = extract_warp_message(&receipt)?;
    let call = UnsignedMessage::from_bytes(&unsigned_message)?.addressed_call()?;
    let payload = Payload::from_bytes(&call.payload)?;

    let signature = aggregator
        .aggregate(&AggregateRequest {
            unsigned_message,
            justification: Vec::new(),
            signing_subnet_id: ctx.subnet_id,
            quorum_percentage: settings.quorum_percentage,
        })
        .await?;
    Ok((call.payload, payload, signature))
}

/// Registers the validator initiated by "evm_tx_hash" on the P-Chain.
#[allow(clippy::too_many_arguments)]
pub async fn submit_register_l1_validator(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    wallet: &dyn PChainWallet,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    candidate: &ValidatorCandidate,
    evm_tx_hash: &H256,
    settings: &Settings,
) -> Result<SubmitOutput> {
    let (raw, payload, signature) =
        sign_evm_message(evm, aggregator, ctx, evm_tx_hash, settings).await?;
    let m = match payload {
        Payload::RegisterL1Validator(m) => m,
        other => {
            return Err(Error::Validation(format!(
                "transaction 0x{:x} did not initiate a registration ({other:?})",
                evm_tx_hash
            )))
        }
    };
    if m.node_id != candidate.node_id_bytes()? {
        return Err(Error::Validation(format!(
            "transaction 0x{:x} registers a different node than {}",
            evm_tx_hash, candidate.node_id
        )));
    }

    let pop = candidate.bls_proof_of_possession_bytes()?;
    let pchain_tx_id = wallet
        .register_l1_validator(candidate.validator_balance, &pop, &signature.signed_message)
        .await?;
    wait_for_commit(pchain, &pchain_tx_id, &settings.pchain_backoff).await?;
    log::info!("RegisterL1ValidatorTx {pchain_tx_id} committed");

    Ok(SubmitOutput {
        pchain_tx_id,
        signature,
        validation_id: validation_id(&raw),
        nonce: None,
        weight: Some(m.weight),
    })
}

/// Applies the weight change (or removal) initiated by "evm_tx_hash" on the P-Chain.
pub async fn submit_set_l1_validator_weight(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    wallet: &dyn PChainWallet,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    evm_tx_hash: &H256,
    settings: &Settings,
) -> Result<SubmitOutput> {
    let (_, payload, signature) =
        sign_evm_message(evm, aggregator, ctx, evm_tx_hash, settings).await?;
    let m = match payload {
        Payload::L1ValidatorWeight(m) => m,
        other => {
            return Err(Error::Validation(format!(
                "transaction 0x{:x} did not initiate a weight change ({other:?})",
                evm_tx_hash
            )))
        }
    };

    let pchain_tx_id = wallet
        .set_l1_validator_weight(&signature.signed_message)
        .await?;
    wait_for_commit(pchain, &pchain_tx_id, &settings.pchain_backoff).await?;
    log::info!("SetL1ValidatorWeightTx {pchain_tx_id} committed");

    Ok(SubmitOutput {
        pchain_tx_id,
        signature,
        validation_id: m.validation_id,
        nonce: Some(m.nonce),
        weight: Some(m.weight),
    })
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::submit::test_submit_register --exact --show-output
#[tokio::test]
async fn test_submit_register() {
    use crate::{
        candidate::sample_candidate,
        pchain::TxStatus,
        testutil::{
            fast_settings, poa_context, register_receipt, FakeAggregator, FakeEvm, FakePChain,
            FakeWallet,
        },
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = poa_context();
    let candidate = sample_candidate();
    let (receipt, expected_id) = register_receipt(&candidate, ctx.subnet_id);

    let evm = FakeEvm::default();
    evm.push_receipt(receipt);
    let tx_hash = evm.mine_next();

    let pchain = FakePChain::default();
    pchain.push_status("register-1", TxStatus::Committed);
    let wallet = FakeWallet::default();
    let aggregator = FakeAggregator::default();

    let out = submit_register_l1_validator(
        &evm,
        &pchain,
        &wallet,
        &aggregator,
        &ctx,
        &candidate,
        &tx_hash,
        &fast_settings(),
    )
    .await
    .unwrap();
    assert_eq!(out.pchain_tx_id, "register-1");
    assert_eq!(out.validation_id, expected_id);
    assert_eq!(out.signature.quorum_percentage, 67);

    let reqs = aggregator.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].signing_subnet_id, ctx.subnet_id);
    assert!(reqs[0].justification.is_empty());
    assert_eq!(wallet.calls(), vec![String::from("registerL1Validator")]);

    // unknown transaction
    let e = submit_register_l1_validator(
        &evm,
        &pchain,
        &wallet,
        &aggregator,
        &ctx,
        &candidate,
        &H256::repeat_byte(0x99),
        &fast_settings(),
    )
    .await
    .unwrap_err();
    assert!(e.message().contains("not found"));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::submit::test_submit_weight --exact --show-output
#[tokio::test]
async fn test_submit_weight() {
    use crate::{
        pchain::TxStatus,
        testutil::{
            fast_settings, poa_context, weight_receipt, FakeAggregator, FakeEvm, FakePChain,
            FakeWallet,
        },
    };

    let ctx = poa_context();
    let vid = H256::repeat_byte(0x0f);
    let evm = FakeEvm::default();
    evm.push_receipt(weight_receipt(vid, 2, 0));
    let tx_hash = evm.mine_next();

    let pchain = FakePChain::default();
    pchain.push_status("weight-1", TxStatus::Processing);
    pchain.push_status("weight-1", TxStatus::Committed);
    let wallet = FakeWallet::default();
    let aggregator = FakeAggregator::default();

    let out = submit_set_l1_validator_weight(
        &evm,
        &pchain,
        &wallet,
        &aggregator,
        &ctx,
        &tx_hash,
        &fast_settings(),
    )
    .await
    .unwrap();
    assert_eq!(out.pchain_tx_id, "weight-1");
    assert_eq!(out.validation_id, vid);
    assert_eq!(out.nonce, Some(2));
    assert_eq!(out.weight, Some(0));

    // wallet rejection
    wallet.reject_next();
    evm.push_receipt(weight_receipt(vid, 3, 0));
    let tx_hash = evm.mine_next();
    let e = submit_set_l1_validator_weight(
        &evm,
        &pchain,
        &wallet,
        &aggregator,
        &ctx,
        &tx_hash,
        &fast_settings(),
    )
    .await
    .unwrap_err();
    assert_eq!(e.user_message(), "Transaction rejected by user");
}
