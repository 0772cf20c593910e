//! Known ABIs of the validator manager contract family and the warp precompile.
pub mod revert;

use std::str::FromStr;

use ethers_core::{
    abi::{self, ParamType, Token},
    types::Bytes,
    utils::{id, keccak256},
};
use lazy_static::lazy_static;
use primitive_types::{H160, H256};

use crate::errors::{Error, Result};

/// Warp messenger precompile.
pub const WARP_PRECOMPILE_ADDRESS: &str = "0x0200000000000000000000000000000000000005";

pub fn warp_precompile_address() -> H160 {
    H160::from_str(WARP_PRECOMPILE_ADDRESS.trim_start_matches("0x"))
        .expect("unexpected invalid warp precompile address")
}

/// One contract function, identified by its canonical signature.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: &'static str,
    pub signature: &'static str,
    pub outputs: Vec<ParamType>,
}

impl Method {
    fn new(signature: &'static str, outputs: Vec<ParamType>) -> Self {
        let name = signature.split('(').next().unwrap_or(signature);
        Self {
            name,
            signature,
            outputs,
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        id(self.signature)
    }

    /// Returns the call data: selector followed by the ABI-encoded arguments.
    pub fn encode(&self, args: &[Token]) -> Bytes {
        let mut b = self.selector().to_vec();
        b.extend(abi::encode(args));
        Bytes::from(b)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>> {
        abi::decode(&self.outputs, data)
            .map_err(|e| Error::decode(self.name, format!("failed to decode output ({e})")))
    }
}

/// One contract event: topic0 is the hash of its signature,
/// the non-indexed fields are ABI-encoded in the log data.
#[derive(Debug, Clone)]
pub struct EventSig {
    pub name: &'static str,
    pub signature: &'static str,
    pub data: Vec<ParamType>,
}

impl EventSig {
    fn new(signature: &'static str, data: Vec<ParamType>) -> Self {
        let name = signature.split('(').next().unwrap_or(signature);
        Self {
            name,
            signature,
            data,
        }
    }

    pub fn topic(&self) -> H256 {
        H256::from(keccak256(self.signature.as_bytes()))
    }

    pub fn decode_data(&self, data: &[u8]) -> Result<Vec<Token>> {
        abi::decode(&self.data, data)
            .map_err(|e| Error::decode(self.name, format!("failed to decode log data ({e})")))
    }
}

lazy_static! {
    // validator manager (ACP-99), also exposed with the same
    // signatures by the PoA manager that owns it
    pub static ref INITIATE_VALIDATOR_REGISTRATION: Method = Method::new(
        "initiateValidatorRegistration(bytes,bytes,(uint32,address[]),(uint32,address[]),uint64)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref COMPLETE_VALIDATOR_REGISTRATION: Method = Method::new(
        "completeValidatorRegistration(uint32)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref INITIATE_VALIDATOR_REMOVAL: Method =
        Method::new("initiateValidatorRemoval(bytes32)", vec![]);
    pub static ref COMPLETE_VALIDATOR_REMOVAL: Method = Method::new(
        "completeValidatorRemoval(uint32)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref INITIATE_VALIDATOR_WEIGHT_UPDATE: Method = Method::new(
        "initiateValidatorWeightUpdate(bytes32,uint64)",
        vec![ParamType::Uint(64), ParamType::FixedBytes(32)],
    );
    pub static ref COMPLETE_VALIDATOR_WEIGHT_UPDATE: Method = Method::new(
        "completeValidatorWeightUpdate(uint32)",
        vec![ParamType::FixedBytes(32), ParamType::Uint(64)],
    );
    pub static ref REGISTERED_VALIDATORS: Method = Method::new(
        "registeredValidators(bytes)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref OWNER: Method = Method::new("owner()", vec![ParamType::Address]);
    pub static ref INITIALIZE_VALIDATOR_SET: Method = Method::new(
        "initializeValidatorSet((bytes32,bytes32,address,(bytes,bytes,uint64)[]),uint32)",
        vec![],
    );

    // staking manager
    pub static ref INITIATE_NATIVE_STAKED_REGISTRATION: Method = Method::new(
        "initiateValidatorRegistration(bytes,bytes,(uint32,address[]),(uint32,address[]),uint16,uint64,address)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref INITIATE_ERC20_STAKED_REGISTRATION: Method = Method::new(
        "initiateValidatorRegistration(bytes,bytes,(uint32,address[]),(uint32,address[]),uint16,uint64,uint256,address)",
        vec![ParamType::FixedBytes(32)],
    );
    pub static ref INITIATE_STAKED_VALIDATOR_REMOVAL: Method = Method::new(
        "initiateValidatorRemoval(bytes32,bool,uint32)",
        vec![],
    );
    pub static ref COMPLETE_DELEGATOR_REGISTRATION: Method = Method::new(
        "completeDelegatorRegistration(bytes32,uint32)",
        vec![],
    );
    pub static ref INITIATE_DELEGATOR_REMOVAL: Method = Method::new(
        "initiateDelegatorRemoval(bytes32,bool,uint32)",
        vec![],
    );
    pub static ref COMPLETE_DELEGATOR_REMOVAL: Method = Method::new(
        "completeDelegatorRemoval(bytes32,uint32)",
        vec![],
    );
    pub static ref GET_STAKING_MANAGER_SETTINGS: Method = Method::new(
        "getStakingManagerSettings()",
        vec![ParamType::Tuple(vec![
            ParamType::Address,      // manager
            ParamType::Uint(256),    // minimumStakeAmount
            ParamType::Uint(256),    // maximumStakeAmount
            ParamType::Uint(64),     // minimumStakeDuration
            ParamType::Uint(16),     // minimumDelegationFeeBips
            ParamType::Uint(8),      // maximumStakeMultiplier
            ParamType::Uint(256),    // weightToValueFactor
            ParamType::Address,      // rewardCalculator
            ParamType::FixedBytes(32), // uptimeBlockchainID
        ])],
    );
    pub static ref ERC20: Method = Method::new("erc20()", vec![ParamType::Address]);
    pub static ref ERC20_APPROVE: Method =
        Method::new("approve(address,uint256)", vec![ParamType::Bool]);

    pub static ref SEND_WARP_MESSAGE: EventSig = EventSig::new(
        "SendWarpMessage(address,bytes32,bytes)",
        vec![ParamType::Bytes],
    );
    pub static ref INITIATED_VALIDATOR_REGISTRATION: EventSig = EventSig::new(
        "InitiatedValidatorRegistration(bytes32,bytes20,bytes32,uint64,uint64)",
        vec![ParamType::FixedBytes(32), ParamType::Uint(64), ParamType::Uint(64)],
    );
    pub static ref INITIATED_VALIDATOR_REMOVAL: EventSig = EventSig::new(
        "InitiatedValidatorRemoval(bytes32,bytes32,uint64,uint64)",
        vec![ParamType::FixedBytes(32), ParamType::Uint(64), ParamType::Uint(64)],
    );
    pub static ref INITIATED_VALIDATOR_WEIGHT_UPDATE: EventSig = EventSig::new(
        "InitiatedValidatorWeightUpdate(bytes32,uint64,bytes32,uint64)",
        vec![ParamType::Uint(64), ParamType::FixedBytes(32), ParamType::Uint(64)],
    );
    pub static ref INITIATED_DELEGATOR_REGISTRATION: EventSig = EventSig::new(
        "InitiatedDelegatorRegistration(bytes32,bytes32,address,uint64,uint64,uint64,bytes32,uint256)",
        vec![
            ParamType::Uint(64),
            ParamType::Uint(64),
            ParamType::Uint(64),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
        ],
    );
    pub static ref INITIATED_DELEGATOR_REMOVAL: EventSig = EventSig::new(
        "InitiatedDelegatorRemoval(bytes32,bytes32)",
        vec![],
    );
}

/// Flattens owners into the "(uint32,address[])" tuple token.
pub fn owner_token(threshold: u32, addresses: &[H160]) -> Token {
    Token::Tuple(vec![
        Token::Uint(threshold.into()),
        Token::Array(addresses.iter().copied().map(Token::Address).collect()),
    ])
}

pub fn token_to_h256(t: &Token) -> Result<H256> {
    match t {
        Token::FixedBytes(b) if b.len() == 32 => Ok(H256::from_slice(b)),
        other => Err(Error::decode("bytes32", format!("unexpected token {other:?}"))),
    }
}

pub fn token_to_u64(t: &Token) -> Result<u64> {
    match t {
        Token::Uint(v) if v.bits() <= 64 => Ok(v.as_u64()),
        other => Err(Error::decode("uint64", format!("unexpected token {other:?}"))),
    }
}

pub fn token_to_address(t: &Token) -> Result<H160> {
    match t {
        Token::Address(a) => Ok(*a),
        other => Err(Error::decode("address", format!("unexpected token {other:?}"))),
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- contracts::test_selectors --exact --show-output
#[test]
fn test_selectors() {
    // well-known selectors
    assert_eq!(OWNER.selector(), [0x8d, 0xa5, 0xcb, 0x5b]);
    assert_eq!(ERC20_APPROVE.selector(), [0x09, 0x5e, 0xa7, 0xb3]);
    assert_eq!(OWNER.name, "owner");
    assert_eq!(
        INITIATE_VALIDATOR_REGISTRATION.name,
        "initiateValidatorRegistration"
    );

    let data = COMPLETE_VALIDATOR_REGISTRATION.encode(&[Token::Uint(0u32.into())]);
    assert_eq!(data.len(), 4 + 32);
    assert_eq!(&data[..4], &COMPLETE_VALIDATOR_REGISTRATION.selector());

    assert_eq!(
        SEND_WARP_MESSAGE.topic(),
        H256::from(keccak256(b"SendWarpMessage(address,bytes32,bytes)"))
    );
    assert_eq!(
        warp_precompile_address(),
        H160::from_str("0200000000000000000000000000000000000005").unwrap()
    );
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- contracts::test_decode_output --exact --show-output
#[test]
fn test_decode_output() {
    let encoded = abi::encode(&[Token::Uint(7u64.into()), Token::FixedBytes(vec![0x01; 32])]);
    let out = INITIATE_VALIDATOR_WEIGHT_UPDATE.decode_output(&encoded).unwrap();
    assert_eq!(token_to_u64(&out[0]).unwrap(), 7);
    assert_eq!(token_to_h256(&out[1]).unwrap(), H256::repeat_byte(0x01));

    assert!(OWNER.decode_output(&[0x01]).is_err());
}
