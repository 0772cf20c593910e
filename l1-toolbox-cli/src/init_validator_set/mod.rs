use std::io;

use clap::{Arg, Command};
use l1_toolbox::wizard::Flow;

use crate::{common, config::Config, flow};

pub const NAME: &str = "init-validator-set";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Initializes the validator manager from a subnet-to-L1 conversion")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(common::evm_private_key_arg())
        .arg(common::subnet_id_arg())
        .arg(
            Arg::new("CONVERSION_TX_ID")
                .long("conversion-tx-id")
                .help("Sets the P-Chain ConvertSubnetToL1Tx ID")
                .required(true)
                .num_args(1),
        )
        .arg(common::skip_prompt_arg())
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    evm_private_key: Option<&String>,
    subnet_id: &str,
    conversion_tx_id: &str,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let key = cfg.evm_private_key(evm_private_key)?;
    let subnet_id = common::parse_subnet_id(subnet_id)?;

    let mut wizard = flow::connect(&cfg, Flow::InitValidatorSet, &key).await?;
    wizard.state.select_subnet(subnet_id);
    wizard.state.inputs.conversion_tx_id = Some(conversion_tx_id.to_string());

    flow::run(&mut wizard, skip_prompt).await
}
