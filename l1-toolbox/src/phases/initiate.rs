use ethers_core::{abi::Token, types::TransactionReceipt};
use primitive_types::{H160, H256, U256};

use crate::{
    candidate::{parse_h160, ValidatorCandidate},
    confirm::Backoff,
    contracts,
    errors::{Error, Result},
    evm::{execute_write, EvmClient, TxRequest},
    manager::{ManagerContext, ManagerKind, Operation},
    staking::{self, validate_stake_amount},
    warp::{
        logs::{
            decode_initiated_delegator_registration, decode_initiated_delegator_removal,
            decode_initiated_registration, decode_initiated_removal,
            decode_initiated_weight_update, extract_warp_message,
        },
        message::validation_id,
        Payload, UnsignedMessage,
    },
};

/// Artifacts of an initiate transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateOutput {
    pub evm_tx_hash: H256,
    pub unsigned_message: Vec<u8>,
    pub validation_id: H256,
    pub nonce: Option<u64>,
    pub weight: Option<u64>,
    pub delegation_id: Option<H256>,
}

/// Manager event of an initiate receipt, reduced to what the warp message
/// must agree with.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InitiatedEvent {
    name: &'static str,
    validation_id: H256,
    nonce: Option<u64>,
    delegation_id: Option<H256>,
}

fn initiated_event(receipt: &TransactionReceipt) -> Option<InitiatedEvent> {
    if let Ok(ev) = decode_initiated_delegator_removal(receipt) {
        return Some(InitiatedEvent {
            name: contracts::INITIATED_DELEGATOR_REMOVAL.name,
            validation_id: ev.validation_id,
            nonce: None,
            delegation_id: Some(ev.delegation_id),
        });
    }
    if let Ok(ev) = decode_initiated_delegator_registration(receipt) {
        return Some(InitiatedEvent {
            name: contracts::INITIATED_DELEGATOR_REGISTRATION.name,
            validation_id: ev.validation_id,
            nonce: Some(ev.nonce),
            delegation_id: Some(ev.delegation_id),
        });
    }
    if let Ok(ev) = decode_initiated_weight_update(receipt) {
        return Some(InitiatedEvent {
            name: contracts::INITIATED_VALIDATOR_WEIGHT_UPDATE.name,
            validation_id: ev.validation_id,
            nonce: Some(ev.nonce),
            delegation_id: None,
        });
    }
    if let Ok(ev) = decode_initiated_removal(receipt) {
        return Some(InitiatedEvent {
            name: contracts::INITIATED_VALIDATOR_REMOVAL.name,
            validation_id: ev.validation_id,
            nonce: None,
            delegation_id: None,
        });
    }
    if let Ok(ev) = decode_initiated_registration(receipt) {
        return Some(InitiatedEvent {
            name: contracts::INITIATED_VALIDATOR_REGISTRATION.name,
            validation_id: ev.validation_id,
            nonce: None,
            delegation_id: None,
        });
    }
    None
}

fn output_from_receipt(receipt: &TransactionReceipt) -> Result<InitiateOutput> {
    let unsigned_message = extract_warp_message(receipt)?;
    let call = UnsignedMessage::from_bytes(&unsigned_message)?.addressed_call()?;
    let payload = Payload::from_bytes(&call.payload)?;
    log::debug!("initiate tx emitted {:?}", payload);

    let (validation_id, nonce, weight) = match payload {
        Payload::RegisterL1Validator(m) => (validation_id(&call.payload), None, Some(m.weight)),
        Payload::L1ValidatorWeight(m) => (m.validation_id, Some(m.nonce), Some(m.weight)),
        other => {
            return Err(Error::decode(
                "warp payload",
                format!("unexpected payload {other:?} from an initiate tx"),
            ))
        }
    };

    // the warp message is authoritative, the event only cross-checks it
    let mut delegation_id = None;
    match initiated_event(receipt) {
        Some(ev) => {
            if ev.validation_id != validation_id {
                log::warn!(
                    "{} event has validation 0x{:x}, message has 0x{:x}",
                    ev.name,
                    ev.validation_id,
                    validation_id
                );
            }
            if let (Some(a), Some(b)) = (ev.nonce, nonce) {
                if a != b {
                    log::warn!("{} event has nonce {a}, message has {b}", ev.name);
                }
            }
            delegation_id = ev.delegation_id;
        }
        None => log::debug!("no manager event in receipt 0x{:x}", receipt.transaction_hash),
    }

    Ok(InitiateOutput {
        evm_tx_hash: receipt.transaction_hash,
        unsigned_message,
        validation_id,
        nonce,
        weight,
        delegation_id,
    })
}

fn expect_validation_id(out: &InitiateOutput, expected: &H256) -> Result<()> {
    if out.validation_id != *expected {
        return Err(Error::decode(
            "warp payload",
            format!(
                "message is for validation 0x{:x}, expected 0x{:x}",
                out.validation_id, expected
            ),
        ));
    }
    Ok(())
}

async fn approve(
    evm: &dyn EvmClient,
    token: H160,
    spender: H160,
    amount: U256,
    backoff: &Backoff,
) -> Result<()> {
    log::info!("approving {amount} of token 0x{:x} for 0x{:x}", token, spender);
    let data = contracts::ERC20_APPROVE.encode(&[Token::Address(spender), Token::Uint(amount)]);
    execute_write(evm, &TxRequest::new("approve", token, data), backoff).await?;
    Ok(())
}

/// Starts the registration of "candidate" on the manager.
pub async fn initiate_registration(
    evm: &dyn EvmClient,
    ctx: &ManagerContext,
    candidate: &ValidatorCandidate,
    backoff: &Backoff,
) -> Result<InitiateOutput> {
    candidate.validate()?;
    let target = ctx.kind.resolve(Operation::InitiateRegistration)?;

    let mut args = vec![
        Token::Bytes(candidate.node_id_bytes()?),
        Token::Bytes(candidate.bls_public_key_bytes()?),
        candidate.remaining_balance_owner.to_token()?,
        candidate.disable_owner.to_token()?,
    ];
    let mut value = U256::zero();

    match ctx.kind {
        ManagerKind::Eoa { .. } | ManagerKind::PoA { .. } => {
            args.push(Token::Uint(U256::from(candidate.validator_weight)));
        }
        ManagerKind::StakingNative {
            staking_manager, ..
        }
        | ManagerKind::StakingErc20 {
            staking_manager, ..
        } => {
            let settings = staking::check_status(evm, staking_manager).await?;
            let amount = candidate.stake_amount.map(U256::from).ok_or_else(|| {
                Error::Validation(String::from(
                    "stake amount is required for a staking manager",
                ))
            })?;
            validate_stake_amount(amount, &settings)?;

            let fee = candidate
                .delegation_fee_bips
                .unwrap_or(settings.minimum_delegation_fee_bips);
            let duration = candidate
                .min_stake_duration
                .unwrap_or(settings.minimum_stake_duration);
            let recipient = match &candidate.reward_recipient {
                Some(r) => parse_h160(r)?,
                None => evm.sender(),
            };
            args.push(Token::Uint(U256::from(fee)));
            args.push(Token::Uint(U256::from(duration)));

            if let ManagerKind::StakingErc20 { token, .. } = ctx.kind {
                approve(evm, token, staking_manager, amount, backoff).await?;
                args.push(Token::Uint(amount));
            } else {
                value = amount;
            }
            args.push(Token::Address(recipient));
        }
    }

    let req = TxRequest::new(target.method.name, target.address, target.method.encode(&args))
        .with_value(value);
    let receipt = execute_write(evm, &req, backoff).await?;
    let out = output_from_receipt(&receipt)?;
    log::info!("initiated registration of {} (validation 0x{:x})", candidate.node_id, out.validation_id);
    Ok(out)
}

pub async fn initiate_removal(
    evm: &dyn EvmClient,
    ctx: &ManagerContext,
    validation_id: &H256,
    backoff: &Backoff,
) -> Result<InitiateOutput> {
    let target = ctx.kind.resolve(Operation::InitiateRemoval)?;
    let mut args = vec![Token::FixedBytes(validation_id.as_bytes().to_vec())];
    if ctx.kind.staking_manager().is_some() {
        // includeUptimeProof, messageIndex
        args.push(Token::Bool(false));
        args.push(Token::Uint(U256::zero()));
    }

    let req = TxRequest::new(target.method.name, target.address, target.method.encode(&args));
    let receipt = execute_write(evm, &req, backoff).await?;
    let out = output_from_receipt(&receipt)?;
    expect_validation_id(&out, validation_id)?;
    if out.weight != Some(0) {
        return Err(Error::decode(
            "warp payload",
            format!("removal message has weight {:?}", out.weight),
        ));
    }
    Ok(out)
}

pub async fn initiate_weight_update(
    evm: &dyn EvmClient,
    ctx: &ManagerContext,
    validation_id: &H256,
    weight: u64,
    backoff: &Backoff,
) -> Result<InitiateOutput> {
    if weight == 0 {
        return Err(Error::Validation(String::from(
            "weight must be positive (remove the validator instead)",
        )));
    }
    let target = ctx.kind.resolve(Operation::InitiateWeightUpdate)?;
    let args = vec![
        Token::FixedBytes(validation_id.as_bytes().to_vec()),
        Token::Uint(U256::from(weight)),
    ];

    let req = TxRequest::new(target.method.name, target.address, target.method.encode(&args));
    let receipt = execute_write(evm, &req, backoff).await?;
    let out = output_from_receipt(&receipt)?;
    expect_validation_id(&out, validation_id)?;
    Ok(out)
}

pub async fn initiate_delegator_removal(
    evm: &dyn EvmClient,
    ctx: &ManagerContext,
    delegation_id: &H256,
    backoff: &Backoff,
) -> Result<InitiateOutput> {
    let target = ctx.kind.resolve(Operation::InitiateDelegatorRemoval)?;
    let args = vec![
        Token::FixedBytes(delegation_id.as_bytes().to_vec()),
        Token::Bool(false),
        Token::Uint(U256::zero()),
    ];

    let req = TxRequest::new(target.method.name, target.address, target.method.encode(&args));
    let receipt = execute_write(evm, &req, backoff).await?;
    let mut out = output_from_receipt(&receipt)?;
    match out.delegation_id {
        Some(did) if did != *delegation_id => {
            return Err(Error::decode(
                contracts::INITIATED_DELEGATOR_REMOVAL.name,
                format!(
                    "event removes delegation 0x{:x}, expected 0x{:x}",
                    did, delegation_id
                ),
            ))
        }
        _ => out.delegation_id = Some(*delegation_id),
    }
    Ok(out)
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::initiate::test_initiate_registration --exact --show-output
#[tokio::test]
async fn test_initiate_registration() {
    use crate::{
        candidate::sample_candidate,
        testutil::{fast_backoff, poa_context, register_receipt, FakeEvm},
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = poa_context();
    let candidate = sample_candidate();
    let (receipt, expected_id) = register_receipt(&candidate, ctx.subnet_id);

    let evm = FakeEvm::default();
    evm.push_receipt(receipt);
    let out = initiate_registration(&evm, &ctx, &candidate, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(out.validation_id, expected_id);
    assert_eq!(out.weight, Some(candidate.validator_weight));
    assert!(out.nonce.is_none());

    let sent = evm.sent();
    assert_eq!(sent.len(), 1);
    // PoA manager proxy receives the call
    assert_eq!(sent[0].to, ctx.kind.resolve(Operation::InitiateRegistration).unwrap().address);
    assert_eq!(
        &sent[0].data[..4],
        &contracts::INITIATE_VALIDATOR_REGISTRATION.selector()
    );
    assert!(sent[0].value.is_zero());

    // incomplete candidates never reach the wallet
    let mut bad = sample_candidate();
    bad.node_id = String::from("7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg");
    assert!(matches!(
        initiate_registration(&evm, &ctx, &bad, &fast_backoff()).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(evm.sent().len(), 1);
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::initiate::test_initiate_staked_registration --exact --show-output
#[tokio::test]
async fn test_initiate_staked_registration() {
    use crate::{
        candidate::sample_candidate,
        testutil::{fast_backoff, register_receipt, staking_context, staking_settings_output, FakeEvm},
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let token = H160::repeat_byte(0x0e);
    let ctx = staking_context(Some(token));
    let staking_manager = ctx.kind.staking_manager().unwrap();

    let evm = FakeEvm::default();
    evm.set_call(
        staking_manager,
        &contracts::GET_STAKING_MANAGER_SETTINGS,
        staking_settings_output(ctx.manager_address, 1_000, 5_000),
    );

    // below the minimum is rejected before any write
    let mut candidate = sample_candidate();
    candidate.stake_amount = Some(999);
    let e = initiate_registration(&evm, &ctx, &candidate, &fast_backoff())
        .await
        .unwrap_err();
    assert!(e.user_message().contains("minimum"));
    assert!(evm.sent().is_empty());

    candidate.stake_amount = Some(1_000);
    let (receipt, expected_id) = register_receipt(&candidate, ctx.subnet_id);
    evm.push_receipt(crate::testutil::receipt_with_status(1, vec![]));
    evm.push_receipt(receipt);
    let out = initiate_registration(&evm, &ctx, &candidate, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(out.validation_id, expected_id);

    // approve, then register on the staking manager
    let sent = evm.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, token);
    assert_eq!(&sent[0].data[..4], &contracts::ERC20_APPROVE.selector());
    assert_eq!(sent[1].to, staking_manager);
    assert_eq!(
        &sent[1].data[..4],
        &contracts::INITIATE_ERC20_STAKED_REGISTRATION.selector()
    );
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::initiate::test_initiate_weight_messages --exact --show-output
#[tokio::test]
async fn test_initiate_weight_messages() {
    use crate::testutil::{fast_backoff, poa_context, weight_receipt, FakeEvm};

    let ctx = poa_context();
    let vid = H256::repeat_byte(0x0f);
    let evm = FakeEvm::default();

    evm.push_receipt(weight_receipt(vid, 4, 0));
    let out = initiate_removal(&evm, &ctx, &vid, &fast_backoff()).await.unwrap();
    assert_eq!(out.nonce, Some(4));
    assert_eq!(out.weight, Some(0));

    evm.push_receipt(weight_receipt(vid, 5, 40));
    let out = initiate_weight_update(&evm, &ctx, &vid, 40, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(out.nonce, Some(5));
    assert_eq!(out.weight, Some(40));

    // message for another validator
    evm.push_receipt(weight_receipt(H256::repeat_byte(0x01), 6, 40));
    assert!(initiate_weight_update(&evm, &ctx, &vid, 40, &fast_backoff())
        .await
        .is_err());

    assert!(matches!(
        initiate_weight_update(&evm, &ctx, &vid, 0, &fast_backoff()).await,
        Err(Error::Validation(_))
    ));
    // delegations need a staking manager
    assert!(matches!(
        initiate_delegator_removal(&evm, &ctx, &vid, &fast_backoff()).await,
        Err(Error::Validation(_))
    ));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- phases::initiate::test_initiate_delegator_removal --exact --show-output
#[tokio::test]
async fn test_initiate_delegator_removal() {
    use crate::testutil::{
        delegator_removal_receipt, fast_backoff, staking_context, weight_receipt, FakeEvm,
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let ctx = staking_context(None);
    let vid = H256::repeat_byte(0x0f);
    let did = H256::repeat_byte(0x0d);
    let evm = FakeEvm::default();

    evm.push_receipt(delegator_removal_receipt(did, vid, 8, 20));
    let out = initiate_delegator_removal(&evm, &ctx, &did, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(out.delegation_id, Some(did));
    assert_eq!(out.validation_id, vid);
    assert_eq!(out.nonce, Some(8));
    assert_eq!(out.weight, Some(20));
    let sent = evm.sent();
    assert_eq!(sent[0].to, ctx.kind.staking_manager().unwrap());
    assert_eq!(&sent[0].data[..4], &contracts::INITIATE_DELEGATOR_REMOVAL.selector());

    // event for another delegation
    evm.push_receipt(delegator_removal_receipt(H256::repeat_byte(0x01), vid, 9, 10));
    assert!(matches!(
        initiate_delegator_removal(&evm, &ctx, &did, &fast_backoff()).await,
        Err(Error::Decode { .. })
    ));

    // without the event the requested delegation is kept
    evm.push_receipt(weight_receipt(vid, 10, 10));
    let out = initiate_delegator_removal(&evm, &ctx, &did, &fast_backoff())
        .await
        .unwrap();
    assert_eq!(out.delegation_id, Some(did));
}
