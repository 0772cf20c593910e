//! Validator candidates entered by the operator.
use std::str::FromStr;

use avalanche_types::ids::node;
use ethers_core::abi::Token;
use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::errors::{Error, Result};

pub const NODE_ID_PREFIX: &str = "NodeID-";
pub const BLS_PUBLIC_KEY_LEN: usize = 48;
pub const BLS_PROOF_OF_POSSESSION_LEN: usize = 96;

/// P-Chain owner of the remaining balance or of the disable right.
/// Addresses are the 20-byte short IDs rendered as "0x" hex.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PChainOwner {
    pub threshold: u32,
    pub addresses: Vec<String>,
}

impl PChainOwner {
    pub fn single(address: &str) -> Self {
        Self {
            threshold: 1,
            addresses: vec![address.to_string()],
        }
    }

    pub fn parsed_addresses(&self) -> Result<Vec<H160>> {
        let mut addrs = Vec::with_capacity(self.addresses.len());
        for a in self.addresses.iter() {
            addrs.push(parse_h160(a)?);
        }
        Ok(addrs)
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(Error::Validation(format!("{field} needs at least one address")));
        }
        if self.threshold == 0 || self.threshold as usize > self.addresses.len() {
            return Err(Error::Validation(format!(
                "{field} threshold {} must be between 1 and {}",
                self.threshold,
                self.addresses.len()
            )));
        }
        self.parsed_addresses().map(|_| ())
    }

    /// ABI tuple "(uint32 threshold, address[] addresses)".
    pub fn to_token(&self) -> Result<Token> {
        let addrs = self
            .parsed_addresses()?
            .into_iter()
            .map(Token::Address)
            .collect();
        Ok(Token::Tuple(vec![
            Token::Uint(U256::from(self.threshold)),
            Token::Array(addrs),
        ]))
    }
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProofOfPossession {
    pub public_key: String,
    pub proof_of_possession: String,
}

/// Inputs of one validator registration.
/// Stored with the big-integer fields as decimal strings.
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorCandidate {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(rename = "nodePOP")]
    pub node_pop: ProofOfPossession,
    #[serde_as(as = "DisplayFromStr")]
    pub validator_weight: u64,
    /// In nAVAX, paid to the P-Chain for continuous validation fees.
    #[serde_as(as = "DisplayFromStr")]
    pub validator_balance: u64,
    pub remaining_balance_owner: PChainOwner,
    #[serde(rename = "deactivationOwner")]
    pub disable_owner: PChainOwner,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_fee_bips: Option<u16>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_stake_duration: Option<u64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake_amount: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_recipient: Option<String>,
}

impl ValidatorCandidate {
    /// Whether every field the initiate step needs has been entered.
    pub fn is_complete(&self) -> bool {
        !self.node_id.is_empty()
            && !self.node_pop.public_key.is_empty()
            && !self.node_pop.proof_of_possession.is_empty()
            && self.validator_weight > 0
            && self.validator_balance > 0
            && !self.remaining_balance_owner.addresses.is_empty()
            && !self.disable_owner.addresses.is_empty()
    }

    /// Returns every field-level error, empty when the candidate is valid.
    pub fn field_errors(&self) -> Vec<(&'static str, String)> {
        let mut errs = Vec::new();
        if let Err(e) = parse_node_id(&self.node_id) {
            errs.push(("nodeID", e.message()));
        }
        if let Err(e) = parse_hex_exact(
            "BLS public key",
            &self.node_pop.public_key,
            BLS_PUBLIC_KEY_LEN,
        ) {
            errs.push(("publicKey", e.message()));
        }
        if let Err(e) = parse_hex_exact(
            "BLS proof of possession",
            &self.node_pop.proof_of_possession,
            BLS_PROOF_OF_POSSESSION_LEN,
        ) {
            errs.push(("proofOfPossession", e.message()));
        }
        if self.validator_weight == 0 {
            errs.push(("validatorWeight", String::from("weight must be positive")));
        }
        if self.validator_balance == 0 {
            errs.push(("validatorBalance", String::from("balance must be positive")));
        }
        if let Err(e) = self.remaining_balance_owner.validate("remaining balance owner") {
            errs.push(("remainingBalanceOwner", e.message()));
        }
        if let Err(e) = self.disable_owner.validate("disable owner") {
            errs.push(("deactivationOwner", e.message()));
        }
        if let Some(r) = &self.reward_recipient {
            if parse_h160(r).is_err() {
                errs.push(("rewardRecipient", format!("invalid address '{r}'")));
            }
        }
        errs
    }

    pub fn validate(&self) -> Result<()> {
        let errs = self.field_errors();
        if errs.is_empty() {
            return Ok(());
        }
        let joined: Vec<String> = errs.iter().map(|(f, m)| format!("{f}: {m}")).collect();
        Err(Error::Validation(joined.join("; ")))
    }

    pub fn node_id_bytes(&self) -> Result<Vec<u8>> {
        parse_node_id(&self.node_id)
    }

    pub fn bls_public_key_bytes(&self) -> Result<Vec<u8>> {
        parse_hex_exact(
            "BLS public key",
            &self.node_pop.public_key,
            BLS_PUBLIC_KEY_LEN,
        )
    }

    pub fn bls_proof_of_possession_bytes(&self) -> Result<Vec<u8>> {
        parse_hex_exact(
            "BLS proof of possession",
            &self.node_pop.proof_of_possession,
            BLS_PROOF_OF_POSSESSION_LEN,
        )
    }
}

/// Parses "NodeID-..." into its 20 raw bytes.
pub fn parse_node_id(s: &str) -> Result<Vec<u8>> {
    if !s.starts_with(NODE_ID_PREFIX) {
        return Err(Error::Validation(format!(
            "node ID '{s}' must start with '{NODE_ID_PREFIX}'"
        )));
    }
    let id = node::Id::from_str(s)
        .map_err(|e| Error::Validation(format!("invalid node ID '{s}' ({e})")))?;
    Ok(id.to_vec())
}

/// Decodes a "0x"-prefixed hex string of exactly "len" bytes.
pub fn parse_hex_exact(what: &str, s: &str, len: usize) -> Result<Vec<u8>> {
    let stripped = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::Validation(format!("{what} must be 0x-prefixed hex")))?;
    let b = hex::decode(stripped)
        .map_err(|e| Error::Validation(format!("{what} is not valid hex ({e})")))?;
    if b.len() != len {
        return Err(Error::Validation(format!(
            "{what} must be {len} bytes (got {})",
            b.len()
        )));
    }
    Ok(b)
}

pub fn parse_h160(s: &str) -> Result<H160> {
    let b = parse_hex_exact("address", s, 20)?;
    Ok(H160::from_slice(&b))
}

#[cfg(test)]
pub(crate) fn sample_candidate() -> ValidatorCandidate {
    ValidatorCandidate {
        node_id: String::from("NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg"),
        node_pop: ProofOfPossession {
            public_key: format!("0x{}", "a1".repeat(BLS_PUBLIC_KEY_LEN)),
            proof_of_possession: format!("0x{}", "b2".repeat(BLS_PROOF_OF_POSSESSION_LEN)),
        },
        validator_weight: 20,
        validator_balance: 100_000_000,
        remaining_balance_owner: PChainOwner::single("0x8db97c7cece249c2b98bdc0226cc4c2a57bf52fc"),
        disable_owner: PChainOwner::single("0x8db97c7cece249c2b98bdc0226cc4c2a57bf52fc"),
        ..Default::default()
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- candidate::test_validate --exact --show-output
#[test]
fn test_validate() {
    let c = sample_candidate();
    assert!(c.is_complete());
    assert!(c.validate().is_ok());
    assert_eq!(c.node_id_bytes().unwrap().len(), 20);

    let mut bad = c.clone();
    bad.node_id = String::from("7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg");
    bad.node_pop.public_key = String::from("a1a1");
    let errs = bad.field_errors();
    assert_eq!(errs.len(), 2);
    assert_eq!(errs[0].0, "nodeID");
    assert_eq!(errs[1].0, "publicKey");

    let mut incomplete = c.clone();
    incomplete.node_pop.proof_of_possession = String::new();
    assert!(!incomplete.is_complete());

    let mut zero = c;
    zero.validator_weight = 0;
    assert!(!zero.is_complete());
    assert!(zero.validate().is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- candidate::test_owner --exact --show-output
#[test]
fn test_owner() {
    let mut o = PChainOwner::single("0x8db97c7cece249c2b98bdc0226cc4c2a57bf52fc");
    assert!(o.validate("owner").is_ok());
    o.threshold = 2;
    assert!(o.validate("owner").is_err());
    o.threshold = 1;
    o.addresses.push(String::from("not-hex"));
    assert!(o.validate("owner").is_err());
}
