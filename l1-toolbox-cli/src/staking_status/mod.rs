use std::io::{self, Error, ErrorKind};

use avalanche_types::key::secp256k1::private_key::Key;
use clap::{Arg, Command};
use crossterm::style::Color;
use l1_toolbox::{
    candidate::parse_h160,
    evm::EthersEvmClient,
    manager::ManagerContext,
    pchain::JsonRpcPChainClient,
    staking::{self, StakingSettings},
    units,
};
use primitive_types::U256;

use crate::{common, config::Config};

pub const NAME: &str = "staking-status";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Shows the settings of a staking manager (read-only)")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(
            Arg::new("SUBNET_ID")
                .long("subnet-id")
                .help("Sets the subnet ID of the L1 (CB58) to find its staking manager")
                .required(false)
                .num_args(1)
                .conflicts_with("STAKING_MANAGER"),
        )
        .arg(
            Arg::new("STAKING_MANAGER")
                .long("staking-manager")
                .help("Sets the staking manager address")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("STAKE_AMOUNT")
                .long("stake-amount")
                .help("Checks a stake amount (in wei) against the settings")
                .required(false)
                .num_args(1),
        )
}

/// Reads never spend, so a throwaway key signs nothing.
fn read_only_key(cfg: &Config) -> io::Result<String> {
    if let Some(k) = &cfg.evm_private_key {
        return Ok(k.clone());
    }
    let k = Key::generate().map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    Ok(k.to_hex())
}

pub fn print_settings(s: &StakingSettings) {
    println!("staking manager: 0x{:x}", s.staking_manager);
    if !s.is_initialized() {
        println!("status: NOT initialized");
        return;
    }
    println!("status: initialized");
    println!("validator manager: 0x{:x}", s.manager);
    match s.erc20 {
        Some(t) => println!("staking token: ERC20 0x{:x}", t),
        None => println!("staking token: native"),
    }
    println!(
        "stake amount: {} to {}",
        units::format_wei(s.minimum_stake_amount),
        units::format_wei(s.maximum_stake_amount)
    );
    println!("minimum stake duration: {}s", s.minimum_stake_duration);
    println!(
        "minimum delegation fee: {} bips",
        s.minimum_delegation_fee_bips
    );
    println!("maximum stake multiplier: {}", s.maximum_stake_multiplier);
    println!("weight to value factor: {}", s.weight_to_value_factor);
    println!("reward calculator: 0x{:x}", s.reward_calculator);
    println!("uptime blockchain: 0x{:x}", s.uptime_blockchain_id);
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    subnet_id: Option<&String>,
    staking_manager: Option<&String>,
    stake_amount: Option<&String>,
) -> io::Result<()> {
    common::init_logger(log_level);

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let evm = EthersEvmClient::new(&cfg.evm_rpc_url, &read_only_key(&cfg)?, cfg.evm_chain_id)
        .await
        .map_err(common::to_io_error)?;

    let staking_manager = match (subnet_id, staking_manager) {
        (None, Some(a)) => parse_h160(a).map_err(common::to_io_error)?,
        (Some(s), None) => {
            let subnet_id = common::parse_subnet_id(s)?;
            let pchain =
                JsonRpcPChainClient::new(&cfg.pchain_rpc_url).map_err(common::to_io_error)?;
            let ctx = ManagerContext::fetch(&evm, &pchain, &subnet_id)
                .await
                .map_err(common::to_io_error)?;
            ctx.kind.staking_manager().ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("L1 is not staking-managed (owner is {})", ctx.owner_type),
                )
            })?
        }
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "exactly one of --subnet-id and --staking-manager is required",
            ))
        }
    };

    let settings = staking::check_status(&evm, staking_manager)
        .await
        .map_err(common::to_io_error)?;
    print_settings(&settings);

    if let Some(amount) = stake_amount {
        let amount = U256::from_dec_str(amount).map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid stake amount '{amount}' ({e})"),
            )
        })?;
        match staking::validate_stake_amount(amount, &settings) {
            Ok(()) => {
                let weight = settings
                    .value_to_weight(amount)
                    .map_err(common::to_io_error)?;
                common::banner(
                    Color::Green,
                    &format!("stake amount is valid (weight {weight})"),
                )?;
            }
            Err(e) => common::banner(Color::Red, &e.message())?,
        }
    }
    Ok(())
}
