use std::io;

use clap::{Arg, Command};
use l1_toolbox::wizard::Flow;

use crate::{common, config::Config, flow};

pub const NAME: &str = "remove-delegation";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Ends a delegation on a staking L1")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(common::evm_private_key_arg())
        .arg(common::subnet_id_arg())
        .arg(
            Arg::new("DELEGATION_ID")
                .long("delegation-id")
                .help("Sets the delegation ID (0x-prefixed hex)")
                .required(true)
                .num_args(1),
        )
        .arg(common::validation_id_arg())
        .arg(common::skip_prompt_arg())
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    evm_private_key: Option<&String>,
    subnet_id: &str,
    delegation_id: &str,
    validation_id: Option<&String>,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let key = cfg.evm_private_key(evm_private_key)?;
    let subnet_id = common::parse_subnet_id(subnet_id)?;

    let mut wizard = flow::connect(&cfg, Flow::RemoveDelegation, &key).await?;
    wizard.state.select_subnet(subnet_id);
    wizard.state.inputs.delegation_id =
        Some(common::parse_h256_hex("delegation ID", delegation_id)?);
    if let Some(v) = validation_id {
        wizard.state.inputs.validation_id = Some(common::parse_h256_hex("validation ID", v)?);
    }

    flow::run(&mut wizard, skip_prompt).await
}
