use std::io::{self, Error, ErrorKind};

use clap::{Arg, Command};
use crossterm::style::Color;

use crate::{
    common,
    config::{self, Config},
};

pub const NAME: &str = "default-config";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Writes a default config file")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(
            Arg::new("NETWORK_ID")
                .long("network-id")
                .help("Sets the network ID (1 for mainnet, 5 for Fuji)")
                .required(false)
                .num_args(1)
                .value_parser(clap::value_parser!(u32))
                .default_value("5"),
        )
        .arg(
            Arg::new("FORCE")
                .long("force")
                .help("Overwrites an existing config file")
                .required(false)
                .num_args(0),
        )
}

pub fn execute(log_level: &str, config_file: &str, network_id: u32, force: bool) -> io::Result<()> {
    common::init_logger(log_level);

    if std::path::Path::new(config_file).exists() && !force {
        return Err(Error::new(
            ErrorKind::AlreadyExists,
            format!("{config_file} already exists (use --force to overwrite)"),
        ));
    }

    let mut cfg = Config::default();
    cfg.network_id = network_id;
    cfg.aggregator_url = config::default_aggregator_url(network_id);
    if network_id == 1 {
        cfg.pchain_rpc_url = String::from("https://api.avax.network");
        cfg.evm_rpc_url = String::from("https://api.avax.network/ext/bc/C/rpc");
    }
    cfg.validate()?;
    cfg.sync(config_file)?;

    common::banner(Color::Green, &format!("wrote config to {config_file}"))?;
    println!("{}", cfg.encode_yaml()?);
    Ok(())
}
