//! Avalanche L1 validator lifecycle: register, remove, reweigh and
//! undelegate validators through the validator manager contracts, with the
//! P-Chain leg signed by warp signature aggregation.
pub mod aggregator;
pub mod candidate;
pub mod confirm;
pub mod contracts;
pub mod errors;
pub mod evm;
pub mod manager;
pub mod orchestrator;
pub mod pchain;
pub mod phases;
pub mod staking;
pub mod store;
pub mod transfer;
pub mod units;
pub mod warp;
pub mod wizard;

#[cfg(test)]
mod testutil;
