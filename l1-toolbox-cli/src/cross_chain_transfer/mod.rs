use std::io;

use clap::{value_parser, Arg, Command};
use crossterm::style::Color;
use l1_toolbox::{
    pchain::{JsonRpcPChainClient, RemoteWallet},
    transfer, units,
};

use crate::{common, config::Config};

pub const NAME: &str = "cross-chain-transfer";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Moves AVAX from the C-Chain to the P-Chain (export then import)")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(
            Arg::new("AMOUNT_IN_NANO_AVAX")
                .long("amount-in-nano-avax")
                .help("Sets the amount in nAVAX (cannot be overlapped with --amount-in-avax)")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("AMOUNT_IN_AVAX")
                .long("amount-in-avax")
                .help("Sets the amount in AVAX (cannot be overlapped with --amount-in-nano-avax)")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(common::skip_prompt_arg())
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    amount_in_navax: u64,
    amount_in_avax: u64,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    let amount = common::amount_navax(amount_in_navax, amount_in_avax)?;
    let cfg = Config::load(config_file)?;
    cfg.validate()?;

    if !skip_prompt {
        let ok = common::confirm(
            "Select your 'cross-chain-transfer' option",
            &format!("let's transfer {} AVAX to the P-Chain.", units::format_navax(amount)),
            "I am not ready to transfer.",
        )?;
        if !ok {
            return Ok(());
        }
    } else {
        log::info!("skipping prompt...")
    }

    let wallet = RemoteWallet::new(&cfg.wallet_url).map_err(common::to_io_error)?;
    let pchain = JsonRpcPChainClient::new(&cfg.pchain_rpc_url).map_err(common::to_io_error)?;
    let out = transfer::cross_chain_transfer(&wallet, &pchain, amount, &cfg.pchain_poll)
        .await
        .map_err(common::to_io_error)?;

    common::banner(
        Color::Green,
        &format!(
            "transferred {} AVAX (export {}, import {})",
            units::format_navax(amount),
            out.export_tx_id,
            out.import_tx_id
        ),
    )
}
