use ethers_core::abi::Token;
use primitive_types::{H256, U256};

use super::{send_with_predicate, sign_pchain_message, Settings};
use crate::{
    aggregator::{SignatureAggregator, SignatureArtifact},
    contracts,
    errors::{Error, Result},
    evm::EvmClient,
    manager::{ManagerContext, Operation},
    pchain::PChainClient,
    warp::{
        logs::extract_warp_message,
        message::{
            conversion_justification, initial_validation_id, registration_justification,
            validation_id,
        },
        L1ValidatorRegistration, L1ValidatorWeight, Payload, SignedMessage, UnsignedMessage,
    },
};

/// Upper bound on initial validators searched when matching a validation ID.
pub const MAX_INITIAL_VALIDATORS: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteOutput {
    pub completion_tx_hash: H256,
    pub validation_id: H256,
    pub delegation_id: Option<H256>,
    pub signature: SignatureArtifact,
}

/// Reads the warp message carried by a P-Chain tx; returns the raw
/// addressed-call payload and its typed form.
async fn read_pchain_message(pchain: &dyn PChainClient, tx_id: &str) -> Result<(Vec<u8>, Payload)> {
    let tx = pchain.get_tx(tx_id).await?;
    let message = tx.message.ok_or_else(|| {
        Error::Validation(format!("P-Chain tx {tx_id} carries no warp message"))
    })?;
    let signed = SignedMessage::from_bytes(&message)?;
    let call = signed.unsigned.addressed_call()?;
    let payload = Payload::from_bytes(&call.payload)?;
    log::debug!("P-Chain tx {tx_id} carries {:?}", payload);
    Ok((call.payload, payload))
}

fn expect_weight_message(tx_id: &str, payload: Payload) -> Result<L1ValidatorWeight> {
    match payload {
        Payload::L1ValidatorWeight(m) => Ok(m),
        other => Err(Error::Validation(format!(
            "P-Chain tx {tx_id} is not a weight change ({other:?})"
        ))),
    }
}

/// Finds the justification proving "validation_id" was registered:
/// its RegisterL1Validator message from the manager logs, or its
/// position among the initial validators of the conversion.
pub async fn registration_justification_for(
    evm: &dyn EvmClient,
    ctx: &ManagerContext,
    validation_id_to_find: &H256,
) -> Result<Vec<u8>> {
    let logs = evm
        .get_logs(
            ctx.manager_address,
            contracts::INITIATED_VALIDATOR_REGISTRATION.topic(),
            *validation_id_to_find,
        )
        .await?;
    for l in logs.iter() {
        let tx_hash = match l.transaction_hash {
            Some(h) => h,
            None => continue,
        };
        let receipt = match evm.get_receipt(tx_hash).await? {
            Some(r) => r,
            None => continue,
        };
        let unsigned = match extract_warp_message(&receipt) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("registration tx 0x{:x} has no warp message ({e})", tx_hash);
                continue;
            }
        };
        let call = UnsignedMessage::from_bytes(&unsigned)?.addressed_call()?;
        if validation_id(&call.payload) == *validation_id_to_find {
            log::info!("found registration of 0x{:x} in tx 0x{:x}", validation_id_to_find, tx_hash);
            return Ok(registration_justification(&call.payload));
        }
    }

    for index in 0..MAX_INITIAL_VALIDATORS {
        if initial_validation_id(&ctx.subnet_id, index) == *validation_id_to_find {
            log::info!("0x{:x} is initial validator {index}", validation_id_to_find);
            return Ok(conversion_justification(&ctx.subnet_id, index));
        }
    }

    Err(Error::Validation(format!(
        "no registration found for validation 0x{:x}",
        validation_id_to_find
    )))
}

/// Completes a registration once the P-Chain has accepted the RegisterL1ValidatorTx.
pub async fn complete_registration(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    let (raw, payload) = read_pchain_message(pchain, pchain_tx_id).await?;
    if !matches!(payload, Payload::RegisterL1Validator(_)) {
        return Err(Error::Validation(format!(
            "P-Chain tx {pchain_tx_id} is not a validator registration"
        )));
    }
    let vid = validation_id(&raw);

    // a registered validator needs no justification
    let message = Payload::L1ValidatorRegistration(L1ValidatorRegistration {
        validation_id: vid,
        registered: true,
    });
    let signature = sign_pchain_message(aggregator, ctx, &message, Vec::new(), settings).await?;

    let target = ctx.kind.resolve(Operation::CompleteRegistration)?;
    let completion_tx_hash = send_with_predicate(
        evm,
        target,
        &[Token::Uint(U256::zero())],
        &signature.signed_message,
        &settings.receipt_backoff,
    )
    .await?;
    Ok(CompleteOutput {
        completion_tx_hash,
        validation_id: vid,
        delegation_id: None,
        signature,
    })
}

/// Completes a removal once the P-Chain has set the validator weight to zero.
pub async fn complete_removal(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    let (_, payload) = read_pchain_message(pchain, pchain_tx_id).await?;
    let m = expect_weight_message(pchain_tx_id, payload)?;
    if m.weight != 0 {
        return Err(Error::Validation(format!(
            "P-Chain tx {pchain_tx_id} sets weight {} instead of removing",
            m.weight
        )));
    }

    let justification = registration_justification_for(evm, ctx, &m.validation_id).await?;
    let message = Payload::L1ValidatorRegistration(L1ValidatorRegistration {
        validation_id: m.validation_id,
        registered: false,
    });
    let signature = sign_pchain_message(aggregator, ctx, &message, justification, settings).await?;

    let target = ctx.kind.resolve(Operation::CompleteRemoval)?;
    let completion_tx_hash = send_with_predicate(
        evm,
        target,
        &[Token::Uint(U256::zero())],
        &signature.signed_message,
        &settings.receipt_backoff,
    )
    .await?;
    Ok(CompleteOutput {
        completion_tx_hash,
        validation_id: m.validation_id,
        delegation_id: None,
        signature,
    })
}

/// Signs the P-Chain's acknowledgement of a weight change.
async fn sign_weight_ack(
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<(L1ValidatorWeight, SignatureArtifact)> {
    let (_, payload) = read_pchain_message(pchain, pchain_tx_id).await?;
    let m = expect_weight_message(pchain_tx_id, payload)?;
    let ack = Payload::L1ValidatorWeight(m.clone());
    let signature = sign_pchain_message(aggregator, ctx, &ack, Vec::new(), settings).await?;
    Ok((m, signature))
}

pub async fn complete_weight_update(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    let (m, signature) = sign_weight_ack(pchain, aggregator, ctx, pchain_tx_id, settings).await?;
    let target = ctx.kind.resolve(Operation::CompleteWeightUpdate)?;
    let completion_tx_hash = send_with_predicate(
        evm,
        target,
        &[Token::Uint(U256::zero())],
        &signature.signed_message,
        &settings.receipt_backoff,
    )
    .await?;
    Ok(CompleteOutput {
        completion_tx_hash,
        validation_id: m.validation_id,
        delegation_id: None,
        signature,
    })
}

async fn complete_delegator_op(
    op: Operation,
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    delegation_id: &H256,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    let target = ctx.kind.resolve(op)?;
    let (m, signature) = sign_weight_ack(pchain, aggregator, ctx, pchain_tx_id, settings).await?;
    let completion_tx_hash = send_with_predicate(
        evm,
        target,
        &[
            Token::FixedBytes(delegation_id.as_bytes().to_vec()),
            Token::Uint(U256::zero()),
        ],
        &signature.signed_message,
        &settings.receipt_backoff,
    )
    .await?;
    Ok(CompleteOutput {
        completion_tx_hash,
        validation_id: m.validation_id,
        delegation_id: Some(*delegation_id),
        signature,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn complete_delegator_registration(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    delegation_id: &H256,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    complete_delegator_op(
        Operation::CompleteDelegatorRegistration,
        evm,
        pchain,
        aggregator,
        ctx,
        delegation_id,
        pchain_tx_id,
        settings,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn complete_delegator_removal(
    evm: &dyn EvmClient,
    pchain: &dyn PChainClient,
    aggregator: &dyn SignatureAggregator,
    ctx: &ManagerContext,
    delegation_id: &H256,
    pchain_tx_id: &str,
    settings: &Settings,
) -> Result<CompleteOutput> {
    complete_delegator_op(
        Operation::CompleteDelegatorRemoval,
        evm,
        pchain,
        aggregator,
        ctx,
        delegation_id,
        pchain_tx_id,
        settings,
    )
    .await
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::complete::test_complete_registration --exact --show-output
#[tokio::test]
async fn test_complete_registration() {
    use crate::{
        candidate::sample_candidate,
        testutil::{
            fast_settings, poa_context, register_message, signed, FakeAggregator, FakeEvm,
            FakePChain,
        },
        warp::message::predicate_storage_keys,
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = poa_context();
    let (unsigned, expected_id) = register_message(&sample_candidate(), ctx.subnet_id);
    let pchain = FakePChain::default();
    pchain.add_message_tx("register-1", signed(&unsigned));

    let evm = FakeEvm::default();
    let aggregator = FakeAggregator::default();
    let out = complete_registration(&evm, &pchain, &aggregator, &ctx, "register-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(out.validation_id, expected_id);

    // P-Chain sourced, registered = true, no justification
    let reqs = aggregator.requests();
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].justification.is_empty());
    let (msg, payload) = crate::warp::parse_payload(&reqs[0].unsigned_message).unwrap();
    assert_eq!(msg.source_chain_id, H256::zero());
    assert_eq!(
        payload,
        Payload::L1ValidatorRegistration(L1ValidatorRegistration {
            validation_id: expected_id,
            registered: true,
        })
    );

    let sent = evm.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0].data[..4], &contracts::COMPLETE_VALIDATOR_REGISTRATION.selector());
    assert_eq!(sent[0].access_list.len(), 1);
    assert_eq!(sent[0].access_list[0].0, contracts::warp_precompile_address());
    assert_eq!(
        sent[0].access_list[0].1,
        predicate_storage_keys(&out.signature.signed_message)
    );

    // weight tx is not a registration
    pchain.add_message_tx(
        "weight-1",
        signed(&crate::testutil::weight_message(expected_id, 1, 0)),
    );
    assert!(matches!(
        complete_registration(&evm, &pchain, &aggregator, &ctx, "weight-1", &fast_settings()).await,
        Err(Error::Validation(_))
    ));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::complete::test_complete_removal --exact --show-output
#[tokio::test]
async fn test_complete_removal() {
    use crate::{
        candidate::sample_candidate,
        testutil::{
            fast_settings, poa_context, register_receipt, signed, weight_message,
            FakeAggregator, FakeEvm, FakePChain,
        },
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = poa_context();
    let (receipt, vid) = register_receipt(&sample_candidate(), ctx.subnet_id);

    let evm = FakeEvm::default();
    evm.push_receipt(receipt);
    let registration_tx = evm.mine_next();
    evm.add_registration_log(ctx.manager_address, vid, registration_tx);

    let pchain = FakePChain::default();
    pchain.add_message_tx("removal-1", signed(&weight_message(vid, 3, 0)));

    let aggregator = FakeAggregator::default();
    let out = complete_removal(&evm, &pchain, &aggregator, &ctx, "removal-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(out.validation_id, vid);

    let reqs = aggregator.requests();
    let (_, payload) = crate::warp::parse_payload(&reqs[0].unsigned_message).unwrap();
    assert_eq!(
        payload,
        Payload::L1ValidatorRegistration(L1ValidatorRegistration {
            validation_id: vid,
            registered: false,
        })
    );
    // justification carries the original register message
    assert_eq!(reqs[0].justification[0], 0x12);

    // initial validators are justified by the conversion
    let initial = initial_validation_id(&ctx.subnet_id, 2);
    pchain.add_message_tx("removal-2", signed(&weight_message(initial, 1, 0)));
    complete_removal(&evm, &pchain, &aggregator, &ctx, "removal-2", &fast_settings())
        .await
        .unwrap();
    let reqs = aggregator.requests();
    assert_eq!(reqs[1].justification, conversion_justification(&ctx.subnet_id, 2));

    // non-zero weight is a weight change, not a removal
    pchain.add_message_tx("weight-1", signed(&weight_message(vid, 4, 10)));
    assert!(complete_removal(&evm, &pchain, &aggregator, &ctx, "weight-1", &fast_settings())
        .await
        .is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::complete::test_complete_weight_update --exact --show-output
#[tokio::test]
async fn test_complete_weight_update() {
    use crate::{
        testutil::{
            fast_settings, poa_context, signed, staking_context, weight_message, FakeAggregator,
            FakeEvm, FakePChain,
        },
        warp::message::predicate_storage_keys,
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let vid = H256::repeat_byte(0x0f);
    let pchain = FakePChain::default();
    pchain.add_message_tx("weight-1", signed(&weight_message(vid, 5, 40)));
    let evm = FakeEvm::default();
    let aggregator = FakeAggregator::default();

    let ctx = poa_context();
    let out = complete_weight_update(&evm, &pchain, &aggregator, &ctx, "weight-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(out.validation_id, vid);
    assert_eq!(out.delegation_id, None);

    // acknowledgement echoes the P-Chain weight message without justification
    let reqs = aggregator.requests();
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].justification.is_empty());
    let (msg, payload) = crate::warp::parse_payload(&reqs[0].unsigned_message).unwrap();
    assert_eq!(msg.source_chain_id, H256::zero());
    assert_eq!(
        payload,
        Payload::L1ValidatorWeight(L1ValidatorWeight {
            validation_id: vid,
            nonce: 5,
            weight: 40,
        })
    );

    let sent = evm.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ctx.kind.resolve(Operation::CompleteWeightUpdate).unwrap().address);
    assert_eq!(&sent[0].data[..4], &contracts::COMPLETE_VALIDATOR_WEIGHT_UPDATE.selector());
    assert_eq!(sent[0].access_list.len(), 1);
    assert_eq!(sent[0].access_list[0].0, contracts::warp_precompile_address());
    assert_eq!(
        sent[0].access_list[0].1,
        predicate_storage_keys(&out.signature.signed_message)
    );

    // staking managers complete weight updates on the manager itself
    let staking = staking_context(None);
    complete_weight_update(&evm, &pchain, &aggregator, &staking, "weight-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(evm.sent()[1].to, staking.manager_address);

    // a registration tx is not a weight change
    let (unsigned, _) = crate::testutil::register_message(
        &crate::candidate::sample_candidate(),
        ctx.subnet_id,
    );
    pchain.add_message_tx("register-1", signed(&unsigned));
    assert!(matches!(
        complete_weight_update(&evm, &pchain, &aggregator, &ctx, "register-1", &fast_settings())
            .await,
        Err(Error::Validation(_))
    ));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::complete::test_complete_delegator --exact --show-output
#[tokio::test]
async fn test_complete_delegator() {
    use crate::testutil::{
        fast_settings, poa_context, signed, staking_context, weight_message, FakeAggregator,
        FakeEvm, FakePChain,
    };

    let vid = H256::repeat_byte(0x0f);
    let did = H256::repeat_byte(0x0d);
    let pchain = FakePChain::default();
    pchain.add_message_tx("weight-1", signed(&weight_message(vid, 7, 30)));
    let evm = FakeEvm::default();
    let aggregator = FakeAggregator::default();

    let ctx = staking_context(None);
    let out = complete_delegator_removal(&evm, &pchain, &aggregator, &ctx, &did, "weight-1", &fast_settings())
        .await
        .unwrap();
    assert_eq!(out.delegation_id, Some(did));
    let sent = evm.sent();
    assert_eq!(sent[0].to, ctx.kind.staking_manager().unwrap());
    assert_eq!(&sent[0].data[..4], &contracts::COMPLETE_DELEGATOR_REMOVAL.selector());

    // PoA managers have no delegators
    assert!(matches!(
        complete_delegator_registration(
            &evm,
            &pchain,
            &aggregator,
            &poa_context(),
            &did,
            "weight-1",
            &fast_settings()
        )
        .await,
        Err(Error::Validation(_))
    ));
}
