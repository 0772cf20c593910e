//! Staking manager settings and stake input checks.
use ethers_core::abi::Token;
use primitive_types::{H160, H256, U256};

use crate::{
    candidate::ValidatorCandidate,
    contracts::{self, token_to_address, token_to_h256, token_to_u64},
    errors::{Error, Result},
    evm::EvmClient,
    units,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StakingSettings {
    pub staking_manager: H160,
    /// Validator manager the staking manager drives; zero before initialization.
    pub manager: H160,
    pub minimum_stake_amount: U256,
    pub maximum_stake_amount: U256,
    pub minimum_stake_duration: u64,
    pub minimum_delegation_fee_bips: u16,
    pub maximum_stake_multiplier: u8,
    pub weight_to_value_factor: U256,
    pub reward_calculator: H160,
    pub uptime_blockchain_id: H256,
    /// Staking token of an ERC20 staking manager.
    pub erc20: Option<H160>,
}

impl StakingSettings {
    pub fn is_initialized(&self) -> bool {
        !self.manager.is_zero()
    }

    /// Converts a stake amount to validator weight.
    pub fn value_to_weight(&self, value: U256) -> Result<u64> {
        if self.weight_to_value_factor.is_zero() {
            return Err(Error::Validation(String::from(
                "staking manager has a zero weight to value factor",
            )));
        }
        let w = value / self.weight_to_value_factor;
        if w.bits() > 64 {
            return Err(Error::Validation(format!("stake amount {value} overflows weight")));
        }
        Ok(w.as_u64())
    }
}

fn uint(t: &Token) -> Result<U256> {
    match t {
        Token::Uint(v) => Ok(*v),
        other => Err(Error::decode("uint256", format!("unexpected token {other:?}"))),
    }
}

fn narrow<T: TryFrom<u64>>(t: &Token, what: &str) -> Result<T> {
    let v = token_to_u64(t)?;
    T::try_from(v).map_err(|_| Error::decode(what, format!("{v} is out of range")))
}

/// Reads the settings of "staking_manager". Only issues "eth_call"s.
pub async fn check_status<E: EvmClient + ?Sized>(
    evm: &E,
    staking_manager: H160,
) -> Result<StakingSettings> {
    log::info!("reading staking manager settings of 0x{:x}", staking_manager);
    let out = evm
        .call(
            staking_manager,
            contracts::GET_STAKING_MANAGER_SETTINGS.encode(&[]),
        )
        .await?;
    let tokens = contracts::GET_STAKING_MANAGER_SETTINGS.decode_output(&out)?;
    let fields = match tokens.into_iter().next() {
        Some(Token::Tuple(fields)) if fields.len() == 9 => fields,
        other => {
            return Err(Error::decode(
                "getStakingManagerSettings",
                format!("unexpected output {other:?}"),
            ))
        }
    };

    let erc20 = match evm.call(staking_manager, contracts::ERC20.encode(&[])).await {
        Ok(out) => contracts::ERC20
            .decode_output(&out)
            .ok()
            .and_then(|t| token_to_address(&t[0]).ok())
            .filter(|a| !a.is_zero()),
        Err(e) if e.is_retryable() => return Err(e),
        Err(_) => None,
    };

    let settings = StakingSettings {
        staking_manager,
        manager: token_to_address(&fields[0])?,
        minimum_stake_amount: uint(&fields[1])?,
        maximum_stake_amount: uint(&fields[2])?,
        minimum_stake_duration: token_to_u64(&fields[3])?,
        minimum_delegation_fee_bips: narrow(&fields[4], "minimumDelegationFeeBips")?,
        maximum_stake_multiplier: narrow(&fields[5], "maximumStakeMultiplier")?,
        weight_to_value_factor: uint(&fields[6])?,
        reward_calculator: token_to_address(&fields[7])?,
        uptime_blockchain_id: token_to_h256(&fields[8])?,
        erc20,
    };
    log::debug!("staking settings {:?}", settings);
    Ok(settings)
}

fn display_amount(v: U256) -> String {
    format!("{} ({} wei)", units::format_wei(v), v)
}

/// Accepts amounts within [minimum, maximum], both inclusive.
pub fn validate_stake_amount(amount: U256, settings: &StakingSettings) -> Result<()> {
    if amount < settings.minimum_stake_amount {
        return Err(Error::Validation(format!(
            "Stake amount {} is below the minimum stake amount {}",
            display_amount(amount),
            display_amount(settings.minimum_stake_amount)
        )));
    }
    if amount > settings.maximum_stake_amount {
        return Err(Error::Validation(format!(
            "Stake amount {} exceeds the maximum stake amount {}",
            display_amount(amount),
            display_amount(settings.maximum_stake_amount)
        )));
    }
    Ok(())
}

/// Stake inputs for a batch of validators, checked against the settings.
#[derive(Debug, Clone, Default)]
pub struct StakeForm {
    pub validators: Vec<ValidatorCandidate>,
    pub stake_amounts: Vec<U256>,
    pub error: Option<String>,
}

impl StakeForm {
    pub fn new(validators: Vec<ValidatorCandidate>) -> Self {
        let stake_amounts = validators
            .iter()
            .map(|v| U256::from(v.stake_amount.unwrap_or_default()))
            .collect();
        Self {
            validators,
            stake_amounts,
            error: None,
        }
    }

    /// Returns false and sets "error" on the first invalid input.
    pub fn validate_inputs(&mut self, settings: &StakingSettings) -> bool {
        self.error = self.first_error(settings);
        if let Some(e) = &self.error {
            log::warn!("invalid stake inputs: {e}");
        }
        self.error.is_none()
    }

    fn first_error(&self, settings: &StakingSettings) -> Option<String> {
        if self.validators.is_empty() {
            return Some(String::from("Add at least one validator"));
        }
        if self.stake_amounts.len() != self.validators.len() {
            return Some(format!(
                "Expected {} stake amount(s), got {}",
                self.validators.len(),
                self.stake_amounts.len()
            ));
        }
        for (i, (v, amount)) in self.validators.iter().zip(self.stake_amounts.iter()).enumerate() {
            let prefix = format!("Validator {} ({})", i + 1, v.node_id);
            if let Err(e) = v.validate() {
                return Some(format!("{prefix}: {}", e.message()));
            }
            if let Err(e) = validate_stake_amount(*amount, settings) {
                return Some(format!("{prefix}: {}", e.message()));
            }
            if let Some(fee) = v.delegation_fee_bips {
                if fee < settings.minimum_delegation_fee_bips || fee > 10_000 {
                    return Some(format!(
                        "{prefix}: delegation fee {fee} bips must be between {} and 10000",
                        settings.minimum_delegation_fee_bips
                    ));
                }
            }
            if let Some(d) = v.min_stake_duration {
                if d < settings.minimum_stake_duration {
                    return Some(format!(
                        "{prefix}: minimum stake duration {d}s is below the required {}s",
                        settings.minimum_stake_duration
                    ));
                }
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) fn sample_settings() -> StakingSettings {
    StakingSettings {
        staking_manager: H160::repeat_byte(0x02),
        manager: H160::repeat_byte(0x01),
        minimum_stake_amount: U256::from(1_000u64),
        maximum_stake_amount: U256::from(5_000u64),
        minimum_stake_duration: 3600,
        minimum_delegation_fee_bips: 100,
        maximum_stake_multiplier: 4,
        weight_to_value_factor: U256::from(10u64),
        ..Default::default()
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- staking::test_validate_stake_amount --exact --show-output
#[test]
fn test_validate_stake_amount() {
    let settings = sample_settings();

    assert!(validate_stake_amount(U256::from(1_000u64), &settings).is_ok());
    assert!(validate_stake_amount(U256::from(5_000u64), &settings).is_ok());

    let e = validate_stake_amount(U256::from(999u64), &settings).unwrap_err();
    let m = e.message();
    assert!(m.contains("minimum"));
    assert!(m.contains("(999 wei)"));
    assert!(m.contains("(1000 wei)"));

    let e = validate_stake_amount(U256::from(5_001u64), &settings).unwrap_err();
    let m = e.message();
    assert!(m.contains("maximum"));
    assert!(m.contains("(5001 wei)"));
    assert!(m.contains("(5000 wei)"));

    assert_eq!(settings.value_to_weight(U256::from(1_000u64)).unwrap(), 100);
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- staking::test_stake_form --exact --show-output
#[test]
fn test_stake_form() {
    let _ = env_logger::builder().is_test(true).try_init();

    let settings = sample_settings();
    let mut a = crate::candidate::sample_candidate();
    a.stake_amount = Some(500);
    let mut b = crate::candidate::sample_candidate();
    b.stake_amount = Some(2_000);

    let mut form = StakeForm::new(vec![a.clone(), b.clone()]);
    assert!(!form.validate_inputs(&settings));
    let e = form.error.clone().unwrap();
    assert!(e.starts_with("Validator 1"));
    assert!(e.contains("(1000 wei)"));
    assert!(e.contains("(500 wei)"));

    a.stake_amount = Some(1_000);
    let mut form = StakeForm::new(vec![a.clone(), b.clone()]);
    assert!(form.validate_inputs(&settings));
    assert!(form.error.is_none());

    b.delegation_fee_bips = Some(50);
    let mut form = StakeForm::new(vec![a, b]);
    assert!(!form.validate_inputs(&settings));
    assert!(form.error.unwrap().contains("delegation fee"));

    let mut form = StakeForm::new(vec![]);
    assert!(!form.validate_inputs(&settings));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- staking::test_check_status --exact --show-output
#[tokio::test]
async fn test_check_status() {
    use crate::testutil::{staking_settings_output, FakeEvm};

    let _ = env_logger::builder().is_test(true).try_init();

    let staking_manager = H160::repeat_byte(0x02);
    let token = H160::repeat_byte(0x03);
    let evm = FakeEvm::default();
    evm.set_call(
        staking_manager,
        &contracts::GET_STAKING_MANAGER_SETTINGS,
        staking_settings_output(H160::repeat_byte(0x01), 1_000, 5_000),
    );
    evm.set_call(staking_manager, &contracts::ERC20, vec![Token::Address(token)]);

    let first = check_status(&evm, staking_manager).await.unwrap();
    let second = check_status(&evm, staking_manager).await.unwrap();
    assert_eq!(first, second);
    assert!(first.is_initialized());
    assert_eq!(first.minimum_stake_amount, U256::from(1_000u64));
    assert_eq!(first.erc20, Some(token));

    // reads only
    assert!(evm.sent().is_empty());

    // fee bips wider than uint16 is a decode error, not a truncation
    let mut out = staking_settings_output(H160::repeat_byte(0x01), 1_000, 5_000);
    if let Token::Tuple(fields) = &mut out[0] {
        fields[4] = Token::Uint(U256::from(70_000u64));
    }
    evm.set_call(staking_manager, &contracts::GET_STAKING_MANAGER_SETTINGS, out);
    assert!(matches!(
        check_status(&evm, staking_manager).await,
        Err(Error::Decode { .. })
    ));
}
