use std::io::{self, Error, ErrorKind};

use clap::{value_parser, Arg, Command};
use l1_toolbox::wizard::Flow;

use crate::{common, config::Config, flow, remove_validator};

pub const NAME: &str = "change-weight";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Changes the weight of an L1 validator")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(common::evm_private_key_arg())
        .arg(common::subnet_id_arg())
        .arg(common::node_id_arg())
        .arg(common::validation_id_arg())
        .arg(
            Arg::new("WEIGHT")
                .long("weight")
                .help("Sets the new validator weight")
                .required(true)
                .num_args(1)
                .value_parser(value_parser!(u64)),
        )
        .arg(common::skip_prompt_arg())
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    log_level: &str,
    config_file: &str,
    evm_private_key: Option<&String>,
    subnet_id: &str,
    node_id: Option<&String>,
    validation_id: Option<&String>,
    weight: u64,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    // zero weight removes the validator
    if weight == 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "weight must be positive (use 'remove-validator' instead)",
        ));
    }

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let key = cfg.evm_private_key(evm_private_key)?;
    let subnet_id = common::parse_subnet_id(subnet_id)?;

    let mut wizard = flow::connect(&cfg, Flow::ChangeWeight, &key).await?;
    wizard.state.select_subnet(subnet_id);
    remove_validator::select_validator(&mut wizard, node_id, validation_id)?;
    wizard.state.inputs.weight = Some(weight);

    flow::run(&mut wizard, skip_prompt).await
}
