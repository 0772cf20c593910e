use std::io::{self, Error, ErrorKind};

use avalanche_types::key::secp256k1::private_key::Key;
use clap::Command;
use crossterm::style::Color;
use l1_toolbox::store::Store;

use crate::{common, config::Config};

pub const NAME: &str = "relayer-key";
pub const SHOW: &str = "show";
pub const ROTATE: &str = "rotate";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Shows or rotates the session key of the interchain relayer")
        .subcommand_required(true)
        .subcommands(vec![
            Command::new(SHOW)
                .about("Prints the relayer address (generates a key on first use)")
                .arg(common::log_level_arg())
                .arg(common::config_file_arg()),
            Command::new(ROTATE)
                .about("Replaces the relayer key with a fresh one")
                .arg(common::log_level_arg())
                .arg(common::config_file_arg())
                .arg(common::skip_prompt_arg()),
        ])
}

fn open_store(config_file: &str) -> io::Result<(Config, Store)> {
    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let store = Store::open(&cfg.store_dir).map_err(common::to_io_error)?;
    Ok((cfg, store))
}

fn print_address(cfg: &Config, store: &Store) -> io::Result<()> {
    let hex = store.relayer_private_key().map_err(common::to_io_error)?;
    let key = Key::from_hex(&hex).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    let info = key
        .to_info(cfg.network_id)
        .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    println!("relayer EVM address: {}", info.eth_address);
    Ok(())
}

pub fn show(log_level: &str, config_file: &str) -> io::Result<()> {
    common::init_logger(log_level);

    let (cfg, store) = open_store(config_file)?;
    print_address(&cfg, &store)
}

pub fn rotate(log_level: &str, config_file: &str, skip_prompt: bool) -> io::Result<()> {
    common::init_logger(log_level);

    let (cfg, store) = open_store(config_file)?;
    if !skip_prompt
        && !common::confirm(
            "Select your 'rotate' option",
            "replace the relayer key (fund the new address afterwards).",
            "keep the current key.",
        )?
    {
        return Ok(());
    }
    store
        .clear_relayer_private_key()
        .map_err(common::to_io_error)?;
    common::banner(Color::Green, "rotated relayer key")?;
    print_address(&cfg, &store)
}
