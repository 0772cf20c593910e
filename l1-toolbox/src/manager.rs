//! Validator manager discovery and per-operation contract dispatch.
use std::fmt;

use ethers_core::abi::Token;
use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};

use crate::{
    contracts::{self, token_to_address, token_to_h256, Method},
    errors::{Error, Result},
    evm::EvmClient,
    pchain::{format_id, PChainClient},
};

/// Who owns the validator manager.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy)]
pub enum OwnerType {
    #[serde(rename = "PoAManager")]
    PoAManager,
    #[serde(rename = "StakingManager")]
    StakingManager,
    #[serde(rename = "EOA")]
    Eoa,
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerType::PoAManager => write!(f, "PoAManager"),
            OwnerType::StakingManager => write!(f, "StakingManager"),
            OwnerType::Eoa => write!(f, "EOA"),
        }
    }
}

/// The contracts behind one L1's validator set.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ManagerKind {
    /// Manager owned directly by an externally owned account.
    Eoa { manager: H160 },
    /// Manager owned by a PoA manager proxy (e.g., behind a multisig).
    PoA { manager: H160, poa_manager: H160 },
    StakingNative {
        manager: H160,
        staking_manager: H160,
    },
    StakingErc20 {
        manager: H160,
        staking_manager: H160,
        token: H160,
    },
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Operation {
    InitiateRegistration,
    CompleteRegistration,
    InitiateRemoval,
    CompleteRemoval,
    InitiateWeightUpdate,
    CompleteWeightUpdate,
    CompleteDelegatorRegistration,
    InitiateDelegatorRemoval,
    CompleteDelegatorRemoval,
}

/// Contract function and the address that receives it.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub method: &'static Method,
    pub address: H160,
}

impl ManagerKind {
    pub fn manager(&self) -> H160 {
        match self {
            ManagerKind::Eoa { manager }
            | ManagerKind::PoA { manager, .. }
            | ManagerKind::StakingNative { manager, .. }
            | ManagerKind::StakingErc20 { manager, .. } => *manager,
        }
    }

    pub fn owner_type(&self) -> OwnerType {
        match self {
            ManagerKind::Eoa { .. } => OwnerType::Eoa,
            ManagerKind::PoA { .. } => OwnerType::PoAManager,
            ManagerKind::StakingNative { .. } | ManagerKind::StakingErc20 { .. } => {
                OwnerType::StakingManager
            }
        }
    }

    pub fn staking_manager(&self) -> Option<H160> {
        match self {
            ManagerKind::StakingNative {
                staking_manager, ..
            }
            | ManagerKind::StakingErc20 {
                staking_manager, ..
            } => Some(*staking_manager),
            _ => None,
        }
    }

    /// Selects the function and contract that carry "op".
    pub fn resolve(&self, op: Operation) -> Result<Target> {
        use Operation::*;

        let unsupported = || {
            Err(Error::Validation(format!(
                "{op:?} is not supported by a {} validator manager",
                self.owner_type()
            )))
        };

        let (method, address): (&'static Method, H160) = match *self {
            ManagerKind::Eoa { manager: address }
            | ManagerKind::PoA {
                poa_manager: address,
                ..
            } => match op {
                InitiateRegistration => (&*contracts::INITIATE_VALIDATOR_REGISTRATION, address),
                CompleteRegistration => (&*contracts::COMPLETE_VALIDATOR_REGISTRATION, address),
                InitiateRemoval => (&*contracts::INITIATE_VALIDATOR_REMOVAL, address),
                CompleteRemoval => (&*contracts::COMPLETE_VALIDATOR_REMOVAL, address),
                InitiateWeightUpdate => (&*contracts::INITIATE_VALIDATOR_WEIGHT_UPDATE, address),
                CompleteWeightUpdate => (&*contracts::COMPLETE_VALIDATOR_WEIGHT_UPDATE, address),
                CompleteDelegatorRegistration
                | InitiateDelegatorRemoval
                | CompleteDelegatorRemoval => return unsupported(),
            },

            ManagerKind::StakingNative {
                manager,
                staking_manager,
            }
            | ManagerKind::StakingErc20 {
                manager,
                staking_manager,
                ..
            } => match op {
                InitiateRegistration => {
                    if matches!(self, ManagerKind::StakingErc20 { .. }) {
                        (&*contracts::INITIATE_ERC20_STAKED_REGISTRATION, staking_manager)
                    } else {
                        (&*contracts::INITIATE_NATIVE_STAKED_REGISTRATION, staking_manager)
                    }
                }
                CompleteRegistration => {
                    (&*contracts::COMPLETE_VALIDATOR_REGISTRATION, staking_manager)
                }
                InitiateRemoval => (&*contracts::INITIATE_STAKED_VALIDATOR_REMOVAL, staking_manager),
                CompleteRemoval => (&*contracts::COMPLETE_VALIDATOR_REMOVAL, staking_manager),
                // staked weight only changes through delegation
                InitiateWeightUpdate => return unsupported(),
                // permissionless on the manager itself
                CompleteWeightUpdate => (&*contracts::COMPLETE_VALIDATOR_WEIGHT_UPDATE, manager),
                CompleteDelegatorRegistration => {
                    (&*contracts::COMPLETE_DELEGATOR_REGISTRATION, staking_manager)
                }
                InitiateDelegatorRemoval => {
                    (&*contracts::INITIATE_DELEGATOR_REMOVAL, staking_manager)
                }
                CompleteDelegatorRemoval => {
                    (&*contracts::COMPLETE_DELEGATOR_REMOVAL, staking_manager)
                }
            },
        };
        log::debug!("{op:?} resolved to {} on 0x{:x}", method.name, address);
        Ok(Target { method, address })
    }
}

/// Manager of one L1, keyed by its subnet.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct ManagerContext {
    pub subnet_id: H256,
    /// Blockchain that hosts the manager contract.
    pub blockchain_id: H256,
    pub manager_address: H160,
    pub owner_address: H160,
    pub owner_type: OwnerType,
    pub kind: ManagerKind,
}

impl ManagerContext {
    /// Reads the manager of "subnet_id" from the P-Chain and detects its owner.
    pub async fn fetch<E, P>(evm: &E, pchain: &P, subnet_id: &H256) -> Result<Self>
    where
        E: EvmClient + ?Sized,
        P: PChainClient + ?Sized,
    {
        let subnet = pchain.get_subnet(subnet_id).await?;
        if subnet.is_permissioned {
            return Err(Error::Validation(format!(
                "subnet {} has not been converted to an L1",
                format_id(subnet_id)
            )));
        }
        let (blockchain_id, manager) = match (subnet.manager_chain_id, subnet.manager_address) {
            (Some(c), Some(a)) => (c, a),
            _ => {
                return Err(Error::Validation(format!(
                    "subnet {} has no validator manager",
                    format_id(subnet_id)
                )))
            }
        };

        let out = evm.call(manager, contracts::OWNER.encode(&[])).await?;
        let owner = token_to_address(&contracts::OWNER.decode_output(&out)?[0])?;
        let kind = detect_owner(evm, manager, owner).await?;
        log::info!(
            "subnet {} manager 0x{:x} owned by {} 0x{:x}",
            format_id(subnet_id),
            manager,
            kind.owner_type(),
            owner
        );

        Ok(Self {
            subnet_id: *subnet_id,
            blockchain_id,
            manager_address: manager,
            owner_address: owner,
            owner_type: kind.owner_type(),
            kind,
        })
    }

    /// Returns the validation ID the manager holds for "node_id".
    pub async fn validation_id_of<E: EvmClient + ?Sized>(
        &self,
        evm: &E,
        node_id: &[u8],
    ) -> Result<H256> {
        let data = contracts::REGISTERED_VALIDATORS.encode(&[Token::Bytes(node_id.to_vec())]);
        let out = evm.call(self.manager_address, data).await?;
        let id = token_to_h256(&contracts::REGISTERED_VALIDATORS.decode_output(&out)?[0])?;
        if id.is_zero() {
            return Err(Error::Validation(format!(
                "node 0x{} is not registered with manager 0x{:x}",
                hex::encode(node_id),
                self.manager_address
            )));
        }
        Ok(id)
    }
}

/// No code means an EOA; a contract answering the staking settings read is a
/// staking manager (ERC20 when it also answers "erc20()"); any other contract
/// is treated as a PoA manager.
async fn detect_owner<E: EvmClient + ?Sized>(evm: &E, manager: H160, owner: H160) -> Result<ManagerKind> {
    let code = evm.get_code(owner).await?;
    if code.is_empty() {
        return Ok(ManagerKind::Eoa { manager });
    }

    let settings = evm
        .call(owner, contracts::GET_STAKING_MANAGER_SETTINGS.encode(&[]))
        .await;
    let is_staking = match settings {
        Ok(out) => contracts::GET_STAKING_MANAGER_SETTINGS
            .decode_output(&out)
            .is_ok(),
        Err(e) if e.is_retryable() => return Err(e),
        Err(_) => false,
    };
    if !is_staking {
        return Ok(ManagerKind::PoA {
            manager,
            poa_manager: owner,
        });
    }

    let token = match evm.call(owner, contracts::ERC20.encode(&[])).await {
        Ok(out) => contracts::ERC20
            .decode_output(&out)
            .ok()
            .and_then(|t| token_to_address(&t[0]).ok())
            .filter(|a| !a.is_zero()),
        Err(e) if e.is_retryable() => return Err(e),
        Err(_) => None,
    };
    Ok(match token {
        Some(token) => ManagerKind::StakingErc20 {
            manager,
            staking_manager: owner,
            token,
        },
        None => ManagerKind::StakingNative {
            manager,
            staking_manager: owner,
        },
    })
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- manager::test_resolve --exact --show-output
#[test]
fn test_resolve() {
    let manager = H160::repeat_byte(0x01);
    let proxy = H160::repeat_byte(0x02);
    let token = H160::repeat_byte(0x03);

    let eoa = ManagerKind::Eoa { manager };
    let t = eoa.resolve(Operation::InitiateRegistration).unwrap();
    assert_eq!(t.address, manager);
    assert_eq!(t.method.name, "initiateValidatorRegistration");
    assert!(eoa.resolve(Operation::CompleteDelegatorRegistration).is_err());

    let poa = ManagerKind::PoA {
        manager,
        poa_manager: proxy,
    };
    assert_eq!(poa.owner_type(), OwnerType::PoAManager);
    for op in [
        Operation::InitiateRegistration,
        Operation::CompleteRegistration,
        Operation::InitiateRemoval,
        Operation::CompleteRemoval,
        Operation::InitiateWeightUpdate,
        Operation::CompleteWeightUpdate,
    ] {
        assert_eq!(poa.resolve(op).unwrap().address, proxy);
    }
    let e = poa.resolve(Operation::InitiateDelegatorRemoval).unwrap_err();
    assert!(e.message().contains("PoAManager"));

    let native = ManagerKind::StakingNative {
        manager,
        staking_manager: proxy,
    };
    let t = native.resolve(Operation::InitiateRegistration).unwrap();
    assert_eq!(t.address, proxy);
    assert_eq!(
        t.method.signature,
        contracts::INITIATE_NATIVE_STAKED_REGISTRATION.signature
    );
    assert!(native.resolve(Operation::InitiateWeightUpdate).is_err());
    assert_eq!(
        native.resolve(Operation::CompleteWeightUpdate).unwrap().address,
        manager
    );

    let erc20 = ManagerKind::StakingErc20 {
        manager,
        staking_manager: proxy,
        token,
    };
    let t = erc20.resolve(Operation::InitiateRegistration).unwrap();
    assert_eq!(
        t.method.signature,
        contracts::INITIATE_ERC20_STAKED_REGISTRATION.signature
    );
    let t = erc20.resolve(Operation::CompleteDelegatorRemoval).unwrap();
    assert_eq!(t.method.name, "completeDelegatorRemoval");
    assert_eq!(t.address, proxy);
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- manager::test_fetch --exact --show-output
#[tokio::test]
async fn test_fetch() {
    use crate::testutil::{staking_settings_output, FakeEvm, FakePChain};

    let _ = env_logger::builder().is_test(true).try_init();

    let subnet_id = H256::repeat_byte(0x0a);
    let manager = H160::repeat_byte(0x01);
    let owner = H160::repeat_byte(0x02);

    let pchain = FakePChain::default();
    pchain.add_l1(subnet_id, H256::repeat_byte(0x0b), manager);

    let evm = FakeEvm::default();
    evm.set_call(manager, &contracts::OWNER, vec![Token::Address(owner)]);

    // EOA owner
    let ctx = ManagerContext::fetch(&evm, &pchain, &subnet_id).await.unwrap();
    assert_eq!(ctx.owner_type, OwnerType::Eoa);
    assert_eq!(ctx.blockchain_id, H256::repeat_byte(0x0b));
    assert_eq!(ctx.kind, ManagerKind::Eoa { manager });

    // contract owner without staking settings
    evm.set_code(owner);
    let ctx = ManagerContext::fetch(&evm, &pchain, &subnet_id).await.unwrap();
    assert_eq!(ctx.owner_type, OwnerType::PoAManager);

    // staking manager, then with an ERC20 token
    evm.set_call(
        owner,
        &contracts::GET_STAKING_MANAGER_SETTINGS,
        staking_settings_output(manager, 1, 100),
    );
    let ctx = ManagerContext::fetch(&evm, &pchain, &subnet_id).await.unwrap();
    assert_eq!(ctx.owner_type, OwnerType::StakingManager);
    assert!(matches!(ctx.kind, ManagerKind::StakingNative { .. }));

    let token = H160::repeat_byte(0x03);
    evm.set_call(owner, &contracts::ERC20, vec![Token::Address(token)]);
    let ctx = ManagerContext::fetch(&evm, &pchain, &subnet_id).await.unwrap();
    assert_eq!(
        ctx.kind,
        ManagerKind::StakingErc20 {
            manager,
            staking_manager: owner,
            token
        }
    );

    // permissioned subnets have no manager
    let legacy = H256::repeat_byte(0x0c);
    pchain.add_permissioned(legacy);
    assert!(matches!(
        ManagerContext::fetch(&evm, &pchain, &legacy).await,
        Err(Error::Validation(_))
    ));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- manager::test_validation_id_of --exact --show-output
#[tokio::test]
async fn test_validation_id_of() {
    use crate::testutil::FakeEvm;

    let manager = H160::repeat_byte(0x01);
    let ctx = ManagerContext {
        subnet_id: H256::zero(),
        blockchain_id: H256::zero(),
        manager_address: manager,
        owner_address: H160::zero(),
        owner_type: OwnerType::Eoa,
        kind: ManagerKind::Eoa { manager },
    };

    let evm = FakeEvm::default();
    evm.set_call(
        manager,
        &contracts::REGISTERED_VALIDATORS,
        vec![Token::FixedBytes(vec![0x0f; 32])],
    );
    assert_eq!(
        ctx.validation_id_of(&evm, &[0x22; 20]).await.unwrap(),
        H256::repeat_byte(0x0f)
    );

    evm.set_call(
        manager,
        &contracts::REGISTERED_VALIDATORS,
        vec![Token::FixedBytes(vec![0; 32])],
    );
    assert!(ctx.validation_id_of(&evm, &[0x22; 20]).await.is_err());
}
