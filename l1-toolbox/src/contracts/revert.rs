use ethers_core::{
    abi::{self, ParamType, Token},
    utils::id,
};
use lazy_static::lazy_static;

/// A Solidity custom error (or the built-in "Error"/"Panic").
struct CustomError {
    name: &'static str,
    inputs: Vec<ParamType>,
}

impl CustomError {
    fn new(name: &'static str, inputs: Vec<ParamType>) -> Self {
        Self { name, inputs }
    }

    fn signature(&self) -> String {
        let params: Vec<String> = self.inputs.iter().map(|p| p.to_string()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    fn selector(&self) -> [u8; 4] {
        id(self.signature())
    }
}

lazy_static! {
    static ref KNOWN_ERRORS: Vec<CustomError> = vec![
        CustomError::new("Error", vec![ParamType::String]),
        CustomError::new("Panic", vec![ParamType::Uint(256)]),
        CustomError::new("InvalidNodeID", vec![ParamType::Bytes]),
        CustomError::new("NodeAlreadyRegistered", vec![ParamType::Bytes]),
        CustomError::new("InvalidBLSKeyLength", vec![ParamType::Uint(256)]),
        CustomError::new(
            "InvalidPChainOwnerThreshold",
            vec![ParamType::Uint(256), ParamType::Uint(256)],
        ),
        CustomError::new("PChainOwnerAddressesNotSorted", vec![]),
        CustomError::new("InvalidValidationID", vec![ParamType::FixedBytes(32)]),
        CustomError::new("InvalidValidatorStatus", vec![ParamType::Uint(8)]),
        CustomError::new("InvalidValidatorManagerAddress", vec![ParamType::Address]),
        CustomError::new("InvalidValidatorManagerBlockchainID", vec![ParamType::FixedBytes(32)]),
        CustomError::new("InvalidWarpMessage", vec![]),
        CustomError::new("InvalidWarpSourceChainID", vec![ParamType::FixedBytes(32)]),
        CustomError::new("InvalidWarpOriginSenderAddress", vec![ParamType::Address]),
        CustomError::new("InvalidNonce", vec![ParamType::Uint(64)]),
        CustomError::new("InvalidRegistrationExpiry", vec![ParamType::Uint(64)]),
        CustomError::new("InvalidInitializationStatus", vec![]),
        CustomError::new("InvalidConversionID", vec![ParamType::FixedBytes(32), ParamType::FixedBytes(32)]),
        CustomError::new("InvalidTotalWeight", vec![ParamType::Uint(64)]),
        CustomError::new("MaxChurnRateExceeded", vec![ParamType::Uint(64)]),
        CustomError::new("UnexpectedRegistrationStatus", vec![ParamType::Bool]),
        CustomError::new("ZeroWeightToValueFactor", vec![]),
        CustomError::new("InvalidStakeAmount", vec![ParamType::Uint(256)]),
        CustomError::new("InvalidDelegationFee", vec![ParamType::Uint(16)]),
        CustomError::new("InvalidMinStakeDuration", vec![ParamType::Uint(64)]),
        CustomError::new("InvalidStakeMultiplier", vec![ParamType::Uint(8)]),
        CustomError::new("InvalidDelegationID", vec![ParamType::FixedBytes(32)]),
        CustomError::new("InvalidDelegatorStatus", vec![ParamType::Uint(8)]),
        CustomError::new("MaxWeightExceeded", vec![ParamType::Uint(64)]),
        CustomError::new("MinStakeDurationNotPassed", vec![ParamType::Uint(64)]),
        CustomError::new("UnauthorizedOwner", vec![ParamType::Address]),
        CustomError::new("ValidatorNotPoS", vec![ParamType::FixedBytes(32)]),
        CustomError::new("ValidatorIneligibleForRewards", vec![ParamType::FixedBytes(32)]),
        CustomError::new("OwnableUnauthorizedAccount", vec![ParamType::Address]),
        CustomError::new("OwnableInvalidOwner", vec![ParamType::Address]),
        CustomError::new(
            "ERC20InsufficientAllowance",
            vec![ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)],
        ),
        CustomError::new(
            "ERC20InsufficientBalance",
            vec![ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)],
        ),
    ];
}

fn format_token(t: &Token) -> String {
    match t {
        Token::Address(a) => format!("0x{:x}", a),
        Token::FixedBytes(b) | Token::Bytes(b) => format!("0x{}", hex::encode(b)),
        Token::Uint(v) | Token::Int(v) => v.to_string(),
        Token::Bool(b) => b.to_string(),
        Token::String(s) => format!("\"{s}\""),
        Token::Array(ts) | Token::FixedArray(ts) | Token::Tuple(ts) => {
            let inner: Vec<String> = ts.iter().map(format_token).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

/// Decodes revert data into "Name(arg, ...)" when the selector is known.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, args) = data.split_at(4);
    for err in KNOWN_ERRORS.iter() {
        if err.selector() != selector {
            continue;
        }
        let tokens = match abi::decode(&err.inputs, args) {
            Ok(ts) => ts,
            Err(e) => {
                log::warn!("selector matched {} but args failed to decode ({e})", err.name);
                return Some(format!("{}(?)", err.name));
            }
        };
        let formatted: Vec<String> = tokens.iter().map(format_token).collect();
        return Some(format!("{}({})", err.name, formatted.join(", ")));
    }
    None
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- contracts::revert::test_decode_revert --exact --show-output
#[test]
fn test_decode_revert() {
    // Error(string) selector is 0x08c379a0
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
    data.extend(abi::encode(&[Token::String(String::from("not owner"))]));
    assert_eq!(decode_revert(&data).unwrap(), "Error(\"not owner\")");

    let mut data = id("InvalidStakeAmount(uint256)").to_vec();
    data.extend(abi::encode(&[Token::Uint(5u64.into())]));
    assert_eq!(decode_revert(&data).unwrap(), "InvalidStakeAmount(5)");

    let data = id("InvalidWarpMessage()").to_vec();
    assert_eq!(decode_revert(&data).unwrap(), "InvalidWarpMessage()");

    assert!(decode_revert(&[0xde, 0xad, 0xbe, 0xef]).is_none());
    assert!(decode_revert(&[0x01]).is_none());
}
