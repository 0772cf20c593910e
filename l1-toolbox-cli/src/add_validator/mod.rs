use std::{
    fs::File,
    io::{self, Error, ErrorKind},
};

use clap::{Arg, Command};
use crossterm::style::Color;
use l1_toolbox::{
    candidate::ValidatorCandidate,
    manager::ManagerContext,
    staking::{self, StakeForm},
    wizard::Flow,
};
use primitive_types::H256;

use crate::{common, config::Config, flow};

pub const NAME: &str = "add-validator";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Registers a new validator with an L1 validator manager")
        .arg(common::log_level_arg())
        .arg(common::config_file_arg())
        .arg(common::evm_private_key_arg())
        .arg(common::subnet_id_arg())
        .arg(
            Arg::new("CANDIDATE_FILE")
                .long("candidate-file")
                .help("Sets the YAML/JSON validator file (if empty, resumes the saved one)")
                .required(false)
                .num_args(1),
        )
        .arg(common::skip_prompt_arg())
}

fn load_candidate(file_path: &str) -> io::Result<ValidatorCandidate> {
    let f = File::open(file_path).map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("failed to open {file_path} ({e})"),
        )
    })?;
    serde_yaml::from_reader(f)
        .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid validator file: {e}")))
}

/// Checks the stake inputs against the staking manager of the L1, if any,
/// before anything is sent.
async fn check_stake(
    wizard: &flow::Wizard,
    subnet_id: &H256,
    candidate: &ValidatorCandidate,
) -> io::Result<()> {
    let ctx = ManagerContext::fetch(wizard.evm(), wizard.pchain(), subnet_id)
        .await
        .map_err(common::to_io_error)?;
    let staking_manager = match ctx.kind.staking_manager() {
        Some(a) => a,
        None => return Ok(()),
    };
    let settings = staking::check_status(wizard.evm(), staking_manager)
        .await
        .map_err(common::to_io_error)?;

    let mut form = StakeForm::new(vec![candidate.clone()]);
    if !form.validate_inputs(&settings) {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            form.error.unwrap_or_default(),
        ));
    }
    Ok(())
}

pub async fn execute(
    log_level: &str,
    config_file: &str,
    evm_private_key: Option<&String>,
    subnet_id: &str,
    candidate_file: Option<&String>,
    skip_prompt: bool,
) -> io::Result<()> {
    common::init_logger(log_level);

    let cfg = Config::load(config_file)?;
    cfg.validate()?;
    let key = cfg.evm_private_key(evm_private_key)?;
    let subnet_id = common::parse_subnet_id(subnet_id)?;

    let mut wizard = flow::connect(&cfg, Flow::AddValidator, &key).await?;
    wizard.state.select_subnet(subnet_id);

    let candidate = match candidate_file {
        Some(p) => load_candidate(p)?,
        None => wizard
            .restore_candidate()
            .map_err(common::to_io_error)?
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    "no --candidate-file given and no saved validator found",
                )
            })?,
    };
    for (field, e) in candidate.field_errors() {
        common::banner(Color::Red, &format!("{field}: {e}"))?;
    }
    candidate.validate().map_err(common::to_io_error)?;
    check_stake(&wizard, &subnet_id, &candidate).await?;
    println!(
        "validator {} with weight {} and balance {} nAVAX",
        candidate.node_id, candidate.validator_weight, candidate.validator_balance
    );
    wizard.state.inputs.candidate = Some(candidate);

    flow::run(&mut wizard, skip_prompt).await
}
