use std::io::{self, Error, ErrorKind};

use clap::Command;
use l1_toolbox::wizard::Flow;

use crate::{common, config::Config, flow};

pub const NAME: &str = "remove-validator";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Removes a validator from an L1 (by node ID or validation ID)")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(common::evm_private_key_arg())
        .arg(common::subnet_id_arg())
        .arg(common::node_id_arg())
        .arg(common::validation_id_arg())
        .arg(common::skip_prompt_arg())
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    evm_private_key: Option<&String>,
    subnet_id: &str,
    node_id: Option<&String>,
    validation_id: Option<&String>,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let key = cfg.evm_private_key(evm_private_key)?;
    let subnet_id = common::parse_subnet_id(subnet_id)?;

    let mut wizard = flow::connect(&cfg, Flow::RemoveValidator, &key).await?;
    wizard.state.select_subnet(subnet_id);
    select_validator(&mut wizard, node_id, validation_id)?;

    flow::run(&mut wizard, skip_prompt).await
}

/// Sets the validator reference inputs; exactly one is required.
pub fn select_validator(
    wizard: &mut flow::Wizard,
    node_id: Option<&String>,
    validation_id: Option<&String>,
) -> io::Result<()> {
    match (node_id, validation_id) {
        (Some(n), None) => wizard.state.inputs.node_id = Some(n.clone()),
        (None, Some(v)) => {
            wizard.state.inputs.validation_id = Some(common::parse_h256_hex("validation ID", v)?)
        }
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "exactly one of --node-id and --validation-id is required",
            ))
        }
    }
    Ok(())
}
