//! Flags and terminal helpers shared by the subcommands.
use std::io::{self, stdout, Error, ErrorKind};

use clap::Arg;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use l1_toolbox::{pchain, units};
use primitive_types::H256;

pub fn log_level_arg() -> Arg {
    Arg::new("LOG_LEVEL")
        .long("log-level")
        .short('l')
        .help("Sets the log level")
        .required(false)
        .num_args(1)
        .value_parser(["debug", "info"])
        .default_value("info")
}

pub fn config_file_arg() -> Arg {
    Arg::new("CONFIG_FILE")
        .long("config-file")
        .short('c')
        .help("Sets the YAML config file path (see 'default-config')")
        .required(false)
        .num_args(1)
}

pub fn skip_prompt_arg() -> Arg {
    Arg::new("SKIP_PROMPT")
        .long("skip-prompt")
        .short('s')
        .help("Skips prompt mode")
        .required(false)
        .num_args(0)
}

pub fn evm_private_key_arg() -> Arg {
    Arg::new("EVM_PRIVATE_KEY")
        .long("evm-private-key")
        .help("Sets the hex-encoded EVM sender key (overrides the config)")
        .required(false)
        .num_args(1)
}

pub fn subnet_id_arg() -> Arg {
    Arg::new("SUBNET_ID")
        .long("subnet-id")
        .help("Sets the subnet ID of the L1 (CB58)")
        .required(true)
        .num_args(1)
}

pub fn node_id_arg() -> Arg {
    Arg::new("NODE_ID")
        .long("node-id")
        .help("Sets the node ID of the validator (NodeID-...)")
        .required(false)
        .num_args(1)
        .conflicts_with("VALIDATION_ID")
}

pub fn validation_id_arg() -> Arg {
    Arg::new("VALIDATION_ID")
        .long("validation-id")
        .help("Sets the validation ID of the validator (0x-prefixed hex)")
        .required(false)
        .num_args(1)
}

// ref. <https://github.com/env-logger-rs/env_logger/issues/47>
pub fn init_logger(log_level: &str) {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );
}

pub fn to_io_error(e: l1_toolbox::errors::Error) -> Error {
    Error::new(ErrorKind::Other, e.user_message())
}

pub fn parse_subnet_id(s: &str) -> io::Result<H256> {
    pchain::parse_id(s).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid subnet ID '{s}' ({})", e.message()),
        )
    })
}

/// Parses "0x"-prefixed 32-byte hex (validation and delegation IDs).
pub fn parse_h256_hex(what: &str, s: &str) -> io::Result<H256> {
    match hex::decode(s.trim_start_matches("0x")) {
        Ok(b) if b.len() == 32 => Ok(H256::from_slice(&b)),
        _ => Err(Error::new(
            ErrorKind::InvalidInput,
            format!("invalid {what} '{s}'"),
        )),
    }
}

/// Picks exactly one of the nAVAX and AVAX amounts.
pub fn amount_navax(in_navax: u64, in_avax: u64) -> io::Result<u64> {
    match (in_navax, in_avax) {
        (0, 0) => Err(Error::new(
            ErrorKind::InvalidInput,
            "both AMOUNT_IN_NANO_AVAX and AMOUNT_IN_AVAX cannot be zero",
        )),
        (n, 0) => Ok(n),
        (0, a) => a.checked_mul(units::AVAX).ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput, format!("{a} AVAX overflows nAVAX"))
        }),
        _ => Err(Error::new(
            ErrorKind::InvalidInput,
            "both AMOUNT_IN_NANO_AVAX and AMOUNT_IN_AVAX cannot be non-zero",
        )),
    }
}

pub fn banner(color: Color, msg: &str) -> io::Result<()> {
    execute!(
        stdout(),
        SetForegroundColor(color),
        Print(format!("\n{msg}\n")),
        ResetColor
    )
}

/// Asks a yes/no question; "no" is the default.
pub fn confirm(question: &str, yes: &str, no: &str) -> io::Result<bool> {
    let options = &[format!("No, {no}"), format!("Yes, {yes}")];
    let selected = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(question)
        .items(&options[..])
        .default(0)
        .interact()?;
    Ok(selected == 1)
}

/// RUST_LOG=debug cargo test --package l1-toolbox-cli --bin l1-toolbox -- common::test_parse --exact --show-output
#[test]
fn test_parse() {
    let _ = env_logger::builder().is_test(true).try_init();

    assert_eq!(amount_navax(5, 0).unwrap(), 5);
    assert_eq!(amount_navax(0, 2).unwrap(), 2 * units::AVAX);
    assert!(amount_navax(0, 0).is_err());
    assert!(amount_navax(1, 1).is_err());
    assert!(amount_navax(0, u64::MAX).is_err());

    let id = parse_h256_hex(
        "validation ID",
        "0x00000000000000000000000000000000000000000000000000000000000000ff",
    )
    .unwrap();
    assert_eq!(id, H256::from_low_u64_be(255));
    assert!(parse_h256_hex("validation ID", "0x1234").is_err());
    assert!(parse_h256_hex(
        "validation ID",
        "zz000000000000000000000000000000000000000000000000000000000000ff"
    )
    .is_err());

    let subnet = H256::from_low_u64_be(10);
    assert_eq!(
        parse_subnet_id(&pchain::format_id(&subnet)).unwrap(),
        subnet
    );
    assert!(parse_subnet_id("not-cb58").is_err());
}
