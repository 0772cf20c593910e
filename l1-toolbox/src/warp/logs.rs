//! Decoding of validator manager receipts.
//!
//! Every decoder matches logs by event topic first. Only the warp message
//! extraction keeps a positional fallback, and that fallback must still
//! yield bytes that parse as an unsigned warp message.
use ethers_core::{
    abi::Token,
    types::{Log, TransactionReceipt},
};
use primitive_types::{H160, H256, U256};

use super::message::UnsignedMessage;
use crate::{
    contracts::{self, token_to_h256, token_to_u64, EventSig},
    errors::{Error, Result},
};

/// Log positions tried, in order, when no log matches the warp topic.
const POSITIONAL_FALLBACK: [usize; 2] = [1, 0];

fn find_log<'a>(receipt: &'a TransactionReceipt, event: &EventSig) -> Option<&'a Log> {
    let topic = event.topic();
    receipt
        .logs
        .iter()
        .find(|l| l.topics.first() == Some(&topic))
}

fn require_log<'a>(receipt: &'a TransactionReceipt, event: &EventSig) -> Result<&'a Log> {
    find_log(receipt, event).ok_or_else(|| {
        Error::decode(
            event.name,
            format!(
                "no {} log in receipt 0x{:x}",
                event.name, receipt.transaction_hash
            ),
        )
    })
}

fn topic_at(log: &Log, idx: usize, event: &EventSig) -> Result<H256> {
    log.topics.get(idx).copied().ok_or_else(|| {
        Error::decode(event.name, format!("missing indexed topic {idx}"))
    })
}

fn decode_warp_bytes(log: &Log) -> Option<Vec<u8>> {
    let tokens = contracts::SEND_WARP_MESSAGE.decode_data(&log.data).ok()?;
    match tokens.into_iter().next() {
        Some(Token::Bytes(b)) if UnsignedMessage::from_bytes(&b).is_ok() => Some(b),
        _ => None,
    }
}

/// Extracts the unsigned warp message emitted by the warp precompile.
pub fn extract_warp_message(receipt: &TransactionReceipt) -> Result<Vec<u8>> {
    let precompile = contracts::warp_precompile_address();
    let topic = contracts::SEND_WARP_MESSAGE.topic();

    if let Some(log) = receipt
        .logs
        .iter()
        .find(|l| l.address == precompile && l.topics.first() == Some(&topic))
    {
        return decode_warp_bytes(log).ok_or_else(|| {
            Error::decode("SendWarpMessage", "matched log data is not a warp message")
        });
    }

    if let Some(b) = receipt
        .logs
        .iter()
        .filter(|l| l.address == precompile)
        .find_map(decode_warp_bytes)
    {
        log::warn!("SendWarpMessage topic not found, used the first warp precompile log");
        return Ok(b);
    }

    for idx in POSITIONAL_FALLBACK {
        if let Some(b) = receipt.logs.get(idx).and_then(decode_warp_bytes) {
            log::warn!("SendWarpMessage topic not found, fell back to log index {idx}");
            return Ok(b);
        }
    }

    Err(Error::decode(
        "SendWarpMessage",
        format!(
            "no warp message in {} log(s) of receipt 0x{:x}",
            receipt.logs.len(),
            receipt.transaction_hash
        ),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedRegistration {
    pub validation_id: H256,
    pub node_id: H160,
    pub registration_message_id: H256,
    pub registration_expiry: u64,
    pub weight: u64,
}

pub fn decode_initiated_registration(
    receipt: &TransactionReceipt,
) -> Result<InitiatedRegistration> {
    let ev = &*contracts::INITIATED_VALIDATOR_REGISTRATION;
    let log = require_log(receipt, ev)?;
    let node_topic = topic_at(log, 2, ev)?;
    let fields = ev.decode_data(&log.data)?;
    Ok(InitiatedRegistration {
        validation_id: topic_at(log, 1, ev)?,
        // "bytes20 indexed" is left-aligned in its topic
        node_id: H160::from_slice(&node_topic.as_bytes()[..20]),
        registration_message_id: token_to_h256(&fields[0])?,
        registration_expiry: token_to_u64(&fields[1])?,
        weight: token_to_u64(&fields[2])?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedRemoval {
    pub validation_id: H256,
    pub weight_message_id: H256,
    pub weight: u64,
    pub end_time: u64,
}

pub fn decode_initiated_removal(receipt: &TransactionReceipt) -> Result<InitiatedRemoval> {
    let ev = &*contracts::INITIATED_VALIDATOR_REMOVAL;
    let log = require_log(receipt, ev)?;
    let fields = ev.decode_data(&log.data)?;
    Ok(InitiatedRemoval {
        validation_id: topic_at(log, 1, ev)?,
        weight_message_id: token_to_h256(&fields[0])?,
        weight: token_to_u64(&fields[1])?,
        end_time: token_to_u64(&fields[2])?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedWeightUpdate {
    pub validation_id: H256,
    pub nonce: u64,
    pub weight_update_message_id: H256,
    pub weight: u64,
}

pub fn decode_initiated_weight_update(
    receipt: &TransactionReceipt,
) -> Result<InitiatedWeightUpdate> {
    let ev = &*contracts::INITIATED_VALIDATOR_WEIGHT_UPDATE;
    let log = require_log(receipt, ev)?;
    let fields = ev.decode_data(&log.data)?;
    Ok(InitiatedWeightUpdate {
        validation_id: topic_at(log, 1, ev)?,
        nonce: token_to_u64(&fields[0])?,
        weight_update_message_id: token_to_h256(&fields[1])?,
        weight: token_to_u64(&fields[2])?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedDelegatorRegistration {
    pub delegation_id: H256,
    pub validation_id: H256,
    pub delegator: H160,
    pub nonce: u64,
    pub validator_weight: u64,
    pub delegator_weight: u64,
    pub set_weight_message_id: H256,
    pub stake_amount: U256,
}

pub fn decode_initiated_delegator_registration(
    receipt: &TransactionReceipt,
) -> Result<InitiatedDelegatorRegistration> {
    let ev = &*contracts::INITIATED_DELEGATOR_REGISTRATION;
    let log = require_log(receipt, ev)?;
    let fields = ev.decode_data(&log.data)?;
    let delegator_topic = topic_at(log, 3, ev)?;
    let stake_amount = match &fields[4] {
        Token::Uint(v) => *v,
        other => {
            return Err(Error::decode(
                ev.name,
                format!("unexpected stake amount token {other:?}"),
            ))
        }
    };
    Ok(InitiatedDelegatorRegistration {
        delegation_id: topic_at(log, 1, ev)?,
        validation_id: topic_at(log, 2, ev)?,
        // "address indexed" is right-aligned in its topic
        delegator: H160::from_slice(&delegator_topic.as_bytes()[12..]),
        nonce: token_to_u64(&fields[0])?,
        validator_weight: token_to_u64(&fields[1])?,
        delegator_weight: token_to_u64(&fields[2])?,
        set_weight_message_id: token_to_h256(&fields[3])?,
        stake_amount,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedDelegatorRemoval {
    pub delegation_id: H256,
    pub validation_id: H256,
}

pub fn decode_initiated_delegator_removal(
    receipt: &TransactionReceipt,
) -> Result<InitiatedDelegatorRemoval> {
    let ev = &*contracts::INITIATED_DELEGATOR_REMOVAL;
    let log = require_log(receipt, ev)?;
    Ok(InitiatedDelegatorRemoval {
        delegation_id: topic_at(log, 1, ev)?,
        validation_id: topic_at(log, 2, ev)?,
    })
}

#[cfg(test)]
pub(crate) mod testdata {
    use ethers_core::{
        abi::{self, Token},
        types::{Bytes, Log, TransactionReceipt, U64},
    };
    use primitive_types::{H160, H256};

    use crate::contracts;

    pub fn warp_log(message: &[u8], with_topic: bool) -> Log {
        let mut topics = Vec::new();
        if with_topic {
            topics.push(contracts::SEND_WARP_MESSAGE.topic());
            topics.push(H256::from(H160::repeat_byte(0x0c)));
            topics.push(H256::repeat_byte(0x0d));
        }
        Log {
            address: contracts::warp_precompile_address(),
            topics,
            data: Bytes::from(abi::encode(&[Token::Bytes(message.to_vec())])),
            ..Default::default()
        }
    }

    pub fn event_log(address: H160, topics: Vec<H256>, data: Vec<Token>) -> Log {
        Log {
            address,
            topics,
            data: Bytes::from(abi::encode(&data)),
            ..Default::default()
        }
    }

    pub fn receipt(logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xee),
            status: Some(U64::from(1)),
            logs,
            ..Default::default()
        }
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::logs::test_extract_warp_message --exact --show-output
#[test]
fn test_extract_warp_message() {
    use testdata::*;

    let _ = env_logger::builder().is_test(true).try_init();

    let msg = UnsignedMessage::new(5, H256::repeat_byte(0x01), vec![0x01, 0x02])
        .to_bytes()
        .unwrap();
    let other = event_log(
        H160::repeat_byte(0x99),
        vec![H256::repeat_byte(0x98)],
        vec![Token::Uint(1u64.into())],
    );

    // topic match anywhere in the receipt
    let r = receipt(vec![other.clone(), other.clone(), warp_log(&msg, true)]);
    assert_eq!(extract_warp_message(&r).unwrap(), msg);

    // precompile address without topic
    let r = receipt(vec![other.clone(), other.clone(), warp_log(&msg, false)]);
    assert_eq!(extract_warp_message(&r).unwrap(), msg);

    // positional fallback at index 1
    let mut moved = warp_log(&msg, false);
    moved.address = H160::repeat_byte(0x77);
    let r = receipt(vec![other.clone(), moved]);
    assert_eq!(extract_warp_message(&r).unwrap(), msg);

    // nothing decodes as a warp message
    let r = receipt(vec![other.clone(), other]);
    assert!(matches!(
        extract_warp_message(&r),
        Err(Error::Decode { .. })
    ));
    assert!(extract_warp_message(&receipt(vec![])).is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::logs::test_decode_events --exact --show-output
#[test]
fn test_decode_events() {
    use testdata::*;

    let manager = H160::repeat_byte(0x42);
    let validation_id = H256::repeat_byte(0x0a);

    let mut node_topic = [0u8; 32];
    node_topic[..20].copy_from_slice(&[0x22; 20]);
    let reg = event_log(
        manager,
        vec![
            contracts::INITIATED_VALIDATOR_REGISTRATION.topic(),
            validation_id,
            H256::from(node_topic),
        ],
        vec![
            Token::FixedBytes(vec![0x0b; 32]),
            Token::Uint(1_700_000_000u64.into()),
            Token::Uint(20u64.into()),
        ],
    );
    let weight = event_log(
        manager,
        vec![
            contracts::INITIATED_VALIDATOR_WEIGHT_UPDATE.topic(),
            validation_id,
        ],
        vec![
            Token::Uint(3u64.into()),
            Token::FixedBytes(vec![0x0c; 32]),
            Token::Uint(0u64.into()),
        ],
    );
    let r = receipt(vec![reg, weight]);

    let ev = decode_initiated_registration(&r).unwrap();
    assert_eq!(ev.validation_id, validation_id);
    assert_eq!(ev.node_id, H160::repeat_byte(0x22));
    assert_eq!(ev.registration_expiry, 1_700_000_000);
    assert_eq!(ev.weight, 20);

    let ev = decode_initiated_weight_update(&r).unwrap();
    assert_eq!(ev.validation_id, validation_id);
    assert_eq!(ev.nonce, 3);
    assert_eq!(ev.weight, 0);

    assert!(decode_initiated_removal(&r).is_err());

    let delegation_id = H256::repeat_byte(0x0d);
    let delegator = H160::repeat_byte(0x33);
    let reg = event_log(
        manager,
        vec![
            contracts::INITIATED_DELEGATOR_REGISTRATION.topic(),
            delegation_id,
            validation_id,
            H256::from(delegator),
        ],
        vec![
            Token::Uint(4u64.into()),
            Token::Uint(120u64.into()),
            Token::Uint(20u64.into()),
            Token::FixedBytes(vec![0x0e; 32]),
            Token::Uint(U256::exp10(18)),
        ],
    );
    let removal = event_log(
        manager,
        vec![
            contracts::INITIATED_DELEGATOR_REMOVAL.topic(),
            delegation_id,
            validation_id,
        ],
        vec![],
    );
    let r = receipt(vec![reg, removal]);

    let ev = decode_initiated_delegator_registration(&r).unwrap();
    assert_eq!(ev.delegation_id, delegation_id);
    assert_eq!(ev.validation_id, validation_id);
    assert_eq!(ev.delegator, delegator);
    assert_eq!(ev.nonce, 4);
    assert_eq!(ev.validator_weight, 120);
    assert_eq!(ev.stake_amount, U256::exp10(18));

    let ev = decode_initiated_delegator_removal(&r).unwrap();
    assert_eq!(ev.delegation_id, delegation_id);
    assert_eq!(ev.validation_id, validation_id);
}
