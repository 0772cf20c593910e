use std::io;

use clap::Command;
use crossterm::style::Color;
use l1_toolbox::store::Store;

use crate::{common, config::Config};

pub const NAME: &str = "validators";
pub const LIST: &str = "list";
pub const CLEAR: &str = "clear";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Lists or clears the saved add-validator inputs")
        .subcommand_required(true)
        .subcommands(vec![
            Command::new(LIST)
                .about("Prints the saved validators")
                .arg(common::log_level_arg())
                .arg(common::config_file_arg()),
            Command::new(CLEAR)
                .about("Forgets the saved validators")
                .arg(common::log_level_arg())
                .arg(common::config_file_arg())
                .arg(common::skip_prompt_arg()),
        ])
}

fn open_store(config_file: &str) -> io::Result<Store> {
    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    Store::open(&cfg.store_dir).map_err(common::to_io_error)
}

pub fn list(log_level: &str, config_file: &str) -> io::Result<()> {
    common::init_logger(log_level);

    let store = open_store(config_file)?;
    let validators = store.load_validators().map_err(common::to_io_error)?;
    if validators.is_empty() {
        println!("no saved validators");
        return Ok(());
    }
    let d = serde_yaml::to_string(&validators)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    println!("{d}");
    Ok(())
}

pub fn clear(log_level: &str, config_file: &str, skip_prompt: bool) -> io::Result<()> {
    common::init_logger(log_level);

    let store = open_store(config_file)?;
    if !skip_prompt
        && !common::confirm(
            "Select your 'clear' option",
            "forget the saved validators.",
            "keep them.",
        )?
    {
        return Ok(());
    }
    store.clear_validators().map_err(common::to_io_error)?;
    common::banner(Color::Green, "cleared saved validators")
}
