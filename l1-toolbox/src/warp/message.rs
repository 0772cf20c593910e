use primitive_types::{H160, H256};
use ring::digest::{digest, SHA256};

use super::packer::{Packer, MAX_MESSAGE_SIZE};
use crate::errors::{Error, Result};

pub const CODEC_VERSION: u16 = 0;

/// P-Chain ID, used as the source chain of P-Chain-signed messages.
pub const P_CHAIN_ID: [u8; 32] = [0; 32];

pub const ADDRESSED_CALL_TYPE_ID: u32 = 1;
pub const BIT_SET_SIGNATURE_TYPE_ID: u32 = 0;
pub const BLS_SIGNATURE_LEN: usize = 96;
pub const BLS_PUBLIC_KEY_LEN: usize = 48;

pub const SUBNET_TO_L1_CONVERSION_TYPE_ID: u32 = 0;
pub const REGISTER_L1_VALIDATOR_TYPE_ID: u32 = 1;
pub const L1_VALIDATOR_REGISTRATION_TYPE_ID: u32 = 2;
pub const L1_VALIDATOR_WEIGHT_TYPE_ID: u32 = 3;

pub fn compute_sha256(input: &[u8]) -> H256 {
    H256::from_slice(digest(&SHA256, input).as_ref())
}

fn unpack_h256(packer: &Packer) -> H256 {
    let b = packer.unpack_fixed_bytes(32);
    if b.len() != 32 {
        return H256::zero();
    }
    H256::from_slice(&b)
}

/// ref. "avalanchego/vms/platformvm/warp.UnsignedMessage"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedMessage {
    pub network_id: u32,
    pub source_chain_id: H256,
    pub payload: Vec<u8>,
}

impl UnsignedMessage {
    pub fn new(network_id: u32, source_chain_id: H256, payload: Vec<u8>) -> Self {
        Self {
            network_id,
            source_chain_id,
            payload,
        }
    }

    fn pack_into(&self, packer: &Packer) {
        packer.pack_u16(CODEC_VERSION);
        packer.pack_u32(self.network_id);
        packer.pack_fixed_bytes(self.source_chain_id.as_bytes());
        packer.pack_bytes_with_header(&self.payload);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packer = Packer::new(MAX_MESSAGE_SIZE, 64 + self.payload.len());
        self.pack_into(&packer);
        Ok(packer.take_bytes()?.to_vec())
    }

    fn unpack_from(packer: &Packer) -> Result<Self> {
        let version = packer.unpack_u16();
        if version != CODEC_VERSION && !packer.errored() {
            return Err(Error::decode(
                "unsigned message",
                format!("unknown codec version {version}"),
            ));
        }
        let network_id = packer.unpack_u32();
        let source_chain_id = unpack_h256(packer);
        let payload = packer.unpack_bytes_with_header();
        if let Some(e) = packer.take_error() {
            return Err(e);
        }
        Ok(Self {
            network_id,
            source_chain_id,
            payload,
        })
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let packer = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, b);
        let msg = Self::unpack_from(&packer)?;
        packer.finish_unpack()?;
        Ok(msg)
    }

    /// Message ID is the SHA-256 of the packed message.
    pub fn id(&self) -> Result<H256> {
        Ok(compute_sha256(&self.to_bytes()?))
    }

    pub fn addressed_call(&self) -> Result<AddressedCall> {
        AddressedCall::from_bytes(&self.payload)
    }
}

/// Unsigned message followed by a bit-set BLS signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub unsigned: UnsignedMessage,
    pub signers: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let packer = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, b);
        let unsigned = UnsignedMessage::unpack_from(&packer)?;
        let type_id = packer.unpack_u32();
        if type_id != BIT_SET_SIGNATURE_TYPE_ID && !packer.errored() {
            return Err(Error::decode(
                "signed message",
                format!("unknown signature type {type_id}"),
            ));
        }
        let signers = packer.unpack_bytes_with_header();
        let signature = packer.unpack_fixed_bytes(BLS_SIGNATURE_LEN);
        packer.finish_unpack()?;
        Ok(Self {
            unsigned,
            signers,
            signature,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packer = Packer::new(MAX_MESSAGE_SIZE, 256 + self.unsigned.payload.len());
        self.unsigned.pack_into(&packer);
        packer.pack_u32(BIT_SET_SIGNATURE_TYPE_ID);
        packer.pack_bytes_with_header(&self.signers);
        packer.pack_fixed_bytes(&self.signature);
        Ok(packer.take_bytes()?.to_vec())
    }
}

/// ref. "avalanchego/vms/platformvm/warp/payload.AddressedCall"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedCall {
    pub source_address: Vec<u8>,
    pub payload: Vec<u8>,
}

impl AddressedCall {
    pub fn new(source_address: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            source_address,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packer = Packer::new(MAX_MESSAGE_SIZE, 64 + self.payload.len());
        packer.pack_u16(CODEC_VERSION);
        packer.pack_u32(ADDRESSED_CALL_TYPE_ID);
        packer.pack_bytes_with_header(&self.source_address);
        packer.pack_bytes_with_header(&self.payload);
        Ok(packer.take_bytes()?.to_vec())
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let packer = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, b);
        let version = packer.unpack_u16();
        let type_id = packer.unpack_u32();
        if !packer.errored() && (version != CODEC_VERSION || type_id != ADDRESSED_CALL_TYPE_ID) {
            return Err(Error::decode(
                "addressed call",
                format!("unexpected codec version {version} / type {type_id}"),
            ));
        }
        let source_address = packer.unpack_bytes_with_header();
        let payload = packer.unpack_bytes_with_header();
        packer.finish_unpack()?;
        Ok(Self {
            source_address,
            payload,
        })
    }
}

/// P-Chain owner as packed in warp payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PChainOwner {
    pub threshold: u32,
    pub addresses: Vec<H160>,
}

impl PChainOwner {
    fn pack_into(&self, packer: &Packer) {
        packer.pack_u32(self.threshold);
        packer.pack_u32(self.addresses.len() as u32);
        for a in self.addresses.iter() {
            packer.pack_fixed_bytes(a.as_bytes());
        }
    }

    fn unpack_from(packer: &Packer) -> Self {
        let threshold = packer.unpack_u32();
        let n = packer.unpack_u32() as usize;
        let mut addresses = Vec::new();
        for _ in 0..n {
            if packer.errored() {
                break;
            }
            let b = packer.unpack_fixed_bytes(20);
            if b.len() == 20 {
                addresses.push(H160::from_slice(&b));
            }
        }
        Self {
            threshold,
            addresses,
        }
    }
}

/// ref. "avalanchego/vms/platformvm/warp/message.RegisterL1Validator"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterL1Validator {
    pub subnet_id: H256,
    pub node_id: Vec<u8>,
    pub bls_public_key: Vec<u8>,
    pub expiry: u64,
    pub remaining_balance_owner: PChainOwner,
    pub disable_owner: PChainOwner,
    pub weight: u64,
}

/// ref. "avalanchego/vms/platformvm/warp/message.L1ValidatorWeight"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1ValidatorWeight {
    pub validation_id: H256,
    pub nonce: u64,
    pub weight: u64,
}

/// ref. "avalanchego/vms/platformvm/warp/message.L1ValidatorRegistration"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1ValidatorRegistration {
    pub validation_id: H256,
    pub registered: bool,
}

/// Typed payloads carried inside an addressed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    SubnetToL1Conversion { conversion_id: H256 },
    RegisterL1Validator(RegisterL1Validator),
    L1ValidatorRegistration(L1ValidatorRegistration),
    L1ValidatorWeight(L1ValidatorWeight),
}

impl Payload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packer = Packer::new(MAX_MESSAGE_SIZE, 256);
        packer.pack_u16(CODEC_VERSION);
        match self {
            Payload::SubnetToL1Conversion { conversion_id } => {
                packer.pack_u32(SUBNET_TO_L1_CONVERSION_TYPE_ID);
                packer.pack_fixed_bytes(conversion_id.as_bytes());
            }
            Payload::RegisterL1Validator(m) => {
                packer.pack_u32(REGISTER_L1_VALIDATOR_TYPE_ID);
                packer.pack_fixed_bytes(m.subnet_id.as_bytes());
                packer.pack_bytes_with_header(&m.node_id);
                packer.pack_fixed_bytes(&m.bls_public_key);
                packer.pack_u64(m.expiry);
                m.remaining_balance_owner.pack_into(&packer);
                m.disable_owner.pack_into(&packer);
                packer.pack_u64(m.weight);
            }
            Payload::L1ValidatorRegistration(m) => {
                packer.pack_u32(L1_VALIDATOR_REGISTRATION_TYPE_ID);
                packer.pack_fixed_bytes(m.validation_id.as_bytes());
                packer.pack_bool(m.registered);
            }
            Payload::L1ValidatorWeight(m) => {
                packer.pack_u32(L1_VALIDATOR_WEIGHT_TYPE_ID);
                packer.pack_fixed_bytes(m.validation_id.as_bytes());
                packer.pack_u64(m.nonce);
                packer.pack_u64(m.weight);
            }
        }
        Ok(packer.take_bytes()?.to_vec())
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let packer = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, b);
        let version = packer.unpack_u16();
        if version != CODEC_VERSION && !packer.errored() {
            return Err(Error::decode(
                "warp payload",
                format!("unknown codec version {version}"),
            ));
        }
        let type_id = packer.unpack_u32();
        let parsed = match type_id {
            SUBNET_TO_L1_CONVERSION_TYPE_ID => Payload::SubnetToL1Conversion {
                conversion_id: unpack_h256(&packer),
            },
            REGISTER_L1_VALIDATOR_TYPE_ID => {
                let subnet_id = unpack_h256(&packer);
                let node_id = packer.unpack_bytes_with_header();
                let bls_public_key = packer.unpack_fixed_bytes(BLS_PUBLIC_KEY_LEN);
                let expiry = packer.unpack_u64();
                let remaining_balance_owner = PChainOwner::unpack_from(&packer);
                let disable_owner = PChainOwner::unpack_from(&packer);
                let weight = packer.unpack_u64();
                Payload::RegisterL1Validator(RegisterL1Validator {
                    subnet_id,
                    node_id,
                    bls_public_key,
                    expiry,
                    remaining_balance_owner,
                    disable_owner,
                    weight,
                })
            }
            L1_VALIDATOR_REGISTRATION_TYPE_ID => {
                let validation_id = unpack_h256(&packer);
                let registered = packer.unpack_bool();
                Payload::L1ValidatorRegistration(L1ValidatorRegistration {
                    validation_id,
                    registered,
                })
            }
            L1_VALIDATOR_WEIGHT_TYPE_ID => {
                let validation_id = unpack_h256(&packer);
                let nonce = packer.unpack_u64();
                let weight = packer.unpack_u64();
                Payload::L1ValidatorWeight(L1ValidatorWeight {
                    validation_id,
                    nonce,
                    weight,
                })
            }
            other => {
                if let Some(e) = packer.take_error() {
                    return Err(e);
                }
                return Err(Error::decode(
                    "warp payload",
                    format!("unknown payload type {other}"),
                ));
            }
        };
        packer.finish_unpack()?;
        Ok(parsed)
    }

    /// Wraps this payload into a P-Chain-sourced unsigned message
    /// (empty source address, P-Chain as source chain).
    pub fn to_pchain_message(&self, network_id: u32) -> Result<UnsignedMessage> {
        let call = AddressedCall::new(Vec::new(), self.to_bytes()?);
        Ok(UnsignedMessage::new(
            network_id,
            H256::from(P_CHAIN_ID),
            call.to_bytes()?,
        ))
    }
}

/// Validation ID is the SHA-256 of the packed RegisterL1Validator payload.
pub fn validation_id(register_payload: &[u8]) -> H256 {
    compute_sha256(register_payload)
}

/// Validation ID of the "index"-th initial validator of a converted subnet:
/// SHA-256 of the subnet ID followed by the big-endian index.
pub fn initial_validation_id(subnet_id: &H256, index: u32) -> H256 {
    let mut b = Vec::with_capacity(36);
    b.extend_from_slice(subnet_id.as_bytes());
    b.extend_from_slice(&index.to_be_bytes());
    compute_sha256(&b)
}

/// Parses an unsigned warp message all the way down to its typed payload.
pub fn parse_payload(unsigned_message: &[u8]) -> Result<(UnsignedMessage, Payload)> {
    let msg = UnsignedMessage::from_bytes(unsigned_message)?;
    let call = msg.addressed_call()?;
    let payload = Payload::from_bytes(&call.payload)?;
    Ok((msg, payload))
}

/// One initial validator of a ConvertSubnetToL1Tx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionValidator {
    pub node_id: Vec<u8>,
    pub bls_public_key: Vec<u8>,
    pub weight: u64,
}

/// ref. "avalanchego/vms/platformvm/warp/message.SubnetToL1ConversionData"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetToL1ConversionData {
    pub subnet_id: H256,
    pub manager_chain_id: H256,
    pub manager_address: Vec<u8>,
    pub validators: Vec<ConversionValidator>,
}

impl SubnetToL1ConversionData {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packer = Packer::new(MAX_MESSAGE_SIZE, 256);
        packer.pack_u16(CODEC_VERSION);
        packer.pack_fixed_bytes(self.subnet_id.as_bytes());
        packer.pack_fixed_bytes(self.manager_chain_id.as_bytes());
        packer.pack_bytes_with_header(&self.manager_address);
        packer.pack_u32(self.validators.len() as u32);
        for v in self.validators.iter() {
            packer.pack_bytes_with_header(&v.node_id);
            packer.pack_fixed_bytes(&v.bls_public_key);
            packer.pack_u64(v.weight);
        }
        Ok(packer.take_bytes()?.to_vec())
    }

    pub fn conversion_id(&self) -> Result<H256> {
        Ok(compute_sha256(&self.to_bytes()?))
    }
}

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn put_len_delimited(out: &mut Vec<u8>, field: u32, b: &[u8]) {
    put_varint(out, u64::from(field << 3 | 2));
    put_varint(out, b.len() as u64);
    out.extend_from_slice(b);
}

/// Protobuf "L1ValidatorRegistrationJustification" with the
/// "register_l1_validator_message" preimage (field 2).
pub fn registration_justification(register_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(register_payload.len() + 8);
    put_len_delimited(&mut out, 2, register_payload);
    out
}

/// Protobuf "L1ValidatorRegistrationJustification" with the
/// "convert_subnet_to_l1_tx_data" preimage (field 1) for initial validators.
pub fn conversion_justification(subnet_id: &H256, index: u32) -> Vec<u8> {
    let mut inner = Vec::with_capacity(40);
    put_len_delimited(&mut inner, 1, subnet_id.as_bytes());
    if index != 0 {
        put_varint(&mut inner, 2 << 3);
        put_varint(&mut inner, u64::from(index));
    }
    let mut out = Vec::with_capacity(inner.len() + 2);
    put_len_delimited(&mut out, 1, &inner);
    out
}

/// Packs a signed message into warp precompile access-list storage keys:
/// the bytes followed by a 0xff delimiter, zero-padded to 32-byte words.
/// ref. "subnet-evm/predicate.PackPredicate"
pub fn predicate_storage_keys(signed_message: &[u8]) -> Vec<H256> {
    let mut b = Vec::with_capacity(signed_message.len() + 32);
    b.extend_from_slice(signed_message);
    b.push(0xff);
    let rem = b.len() % 32;
    if rem != 0 {
        b.resize(b.len() + 32 - rem, 0);
    }
    b.chunks(32).map(H256::from_slice).collect()
}

#[cfg(test)]
pub(crate) fn sample_register_payload() -> RegisterL1Validator {
    RegisterL1Validator {
        subnet_id: H256::repeat_byte(0x11),
        node_id: vec![0x22; 20],
        bls_public_key: vec![0x33; BLS_PUBLIC_KEY_LEN],
        expiry: 1_700_000_000,
        remaining_balance_owner: PChainOwner {
            threshold: 1,
            addresses: vec![H160::repeat_byte(0x44)],
        },
        disable_owner: PChainOwner {
            threshold: 1,
            addresses: vec![H160::repeat_byte(0x55)],
        },
        weight: 20,
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::message::test_weight_message_bytes --exact --show-output
#[test]
fn test_weight_message_bytes() {
    let payload = Payload::L1ValidatorWeight(L1ValidatorWeight {
        validation_id: H256::repeat_byte(0xab),
        nonce: 1,
        weight: 0,
    });
    let b = payload.to_bytes().unwrap();
    assert_eq!(b.len(), 2 + 4 + 32 + 8 + 8);
    assert_eq!(&b[..6], &[0x00, 0x00, 0x00, 0x00, 0x00, 0x03]);
    assert_eq!(&b[38..46], &[0, 0, 0, 0, 0, 0, 0, 1]);

    let msg = payload.to_pchain_message(5).unwrap();
    let raw = msg.to_bytes().unwrap();
    // codec version, network id 5, 32-byte P-Chain id, payload length
    assert_eq!(&raw[..6], &[0x00, 0x00, 0x00, 0x00, 0x00, 0x05]);
    assert_eq!(&raw[6..38], &[0u8; 32]);

    let (parsed_msg, parsed) = parse_payload(&raw).unwrap();
    assert_eq!(parsed_msg.network_id, 5);
    assert_eq!(parsed, payload);
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::message::test_register_message --exact --show-output
#[test]
fn test_register_message() {
    let m = sample_register_payload();
    let payload = Payload::RegisterL1Validator(m.clone());
    let b = payload.to_bytes().unwrap();
    // version + type + subnet + (len + node) + bls + expiry + 2 owners + weight
    assert_eq!(b.len(), 2 + 4 + 32 + 4 + 20 + 48 + 8 + (4 + 4 + 20) * 2 + 8);
    assert_eq!(Payload::from_bytes(&b).unwrap(), payload);
    assert_eq!(validation_id(&b), compute_sha256(&b));

    let truncated = &b[..b.len() - 1];
    assert!(Payload::from_bytes(truncated).is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::message::test_signed_message --exact --show-output
#[test]
fn test_signed_message() {
    let unsigned = UnsignedMessage::new(1, H256::repeat_byte(0x01), vec![0xde, 0xad]);
    let signed = SignedMessage {
        unsigned: unsigned.clone(),
        signers: vec![0b0000_0111],
        signature: vec![0x99; BLS_SIGNATURE_LEN],
    };
    let b = signed.to_bytes().unwrap();
    let parsed = SignedMessage::from_bytes(&b).unwrap();
    assert_eq!(parsed.unsigned, unsigned);
    assert_eq!(parsed.signers, vec![0b0000_0111]);
    assert!(UnsignedMessage::from_bytes(&b).is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::message::test_justification --exact --show-output
#[test]
fn test_justification() {
    let j = registration_justification(&[0x01, 0x02, 0x03]);
    assert_eq!(j, vec![0x12, 0x03, 0x01, 0x02, 0x03]);

    let subnet = H256::repeat_byte(0x07);
    let j = conversion_justification(&subnet, 0);
    assert_eq!(j[0], 0x0a);
    assert_eq!(j[1], 34);
    assert_eq!(j[2], 0x0a);
    assert_eq!(j[3], 32);
    assert_eq!(j.len(), 36);

    let j = conversion_justification(&subnet, 3);
    assert_eq!(j[1], 36);
    assert_eq!(&j[36..], &[0x10, 0x03]);

    let mut preimage = subnet.as_bytes().to_vec();
    preimage.extend_from_slice(&[0, 0, 0, 3]);
    assert_eq!(initial_validation_id(&subnet, 3), compute_sha256(&preimage));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::message::test_predicate_storage_keys --exact --show-output
#[test]
fn test_predicate_storage_keys() {
    let keys = predicate_storage_keys(&[0xaa; 31]);
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].as_bytes()[31], 0xff);

    let keys = predicate_storage_keys(&[0xaa; 32]);
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].as_bytes()[0], 0xff);
    assert_eq!(&keys[1].as_bytes()[1..], &[0u8; 31]);
}
