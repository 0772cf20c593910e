//! Avalanche warp message codec and receipt decoding.
pub mod logs;
pub mod message;
pub mod packer;

pub use message::{
    parse_payload, AddressedCall, L1ValidatorRegistration, L1ValidatorWeight, Payload,
    RegisterL1Validator, SignedMessage, UnsignedMessage,
};
