mod add_validator;
mod change_weight;
mod common;
mod config;
mod cross_chain_transfer;
mod default_config;
mod flow;
mod init_validator_set;
mod relayer_key;
mod remove_delegation;
mod remove_validator;
mod staking_status;
mod validators;

use std::io;

use clap::{crate_version, ArgMatches, Command};

const APP_NAME: &str = "l1-toolbox";

fn log_level(m: &ArgMatches) -> String {
    m.get_one::<String>("LOG_LEVEL")
        .unwrap_or(&String::from("info"))
        .clone()
}

fn config_file(m: &ArgMatches) -> String {
    m.get_one::<String>("CONFIG_FILE")
        .cloned()
        .unwrap_or_else(config::default_path)
}

fn required(m: &ArgMatches, id: &str) -> String {
    m.get_one::<String>(id).cloned().unwrap_or_default()
}

fn command() -> Command {
    Command::new(APP_NAME)
        .version(crate_version!())
        .about("Avalanche L1 validator lifecycle tools")
        .subcommand_required(true)
        .subcommands(vec![
            default_config::command(),
            add_validator::command(),
            remove_validator::command(),
            change_weight::command(),
            remove_delegation::command(),
            init_validator_set::command(),
            staking_status::command(),
            validators::command(),
            cross_chain_transfer::command(),
            relayer_key::command(),
        ])
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let matches = command().get_matches();

    println!("{} version: {}", APP_NAME, crate_version!());

    match matches.subcommand() {
        Some((default_config::NAME, m)) => default_config::execute(
            &log_level(m),
            &config_file(m),
            *m.get_one::<u32>("NETWORK_ID").unwrap_or(&5),
            m.get_flag("FORCE"),
        ),

        Some((add_validator::NAME, m)) => {
            add_validator::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("EVM_PRIVATE_KEY"),
                &required(m, "SUBNET_ID"),
                m.get_one::<String>("CANDIDATE_FILE"),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((remove_validator::NAME, m)) => {
            remove_validator::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("EVM_PRIVATE_KEY"),
                &required(m, "SUBNET_ID"),
                m.get_one::<String>("NODE_ID"),
                m.get_one::<String>("VALIDATION_ID"),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((change_weight::NAME, m)) => {
            change_weight::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("EVM_PRIVATE_KEY"),
                &required(m, "SUBNET_ID"),
                m.get_one::<String>("NODE_ID"),
                m.get_one::<String>("VALIDATION_ID"),
                *m.get_one::<u64>("WEIGHT").unwrap_or(&0),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((remove_delegation::NAME, m)) => {
            remove_delegation::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("EVM_PRIVATE_KEY"),
                &required(m, "SUBNET_ID"),
                &required(m, "DELEGATION_ID"),
                m.get_one::<String>("VALIDATION_ID"),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((init_validator_set::NAME, m)) => {
            init_validator_set::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("EVM_PRIVATE_KEY"),
                &required(m, "SUBNET_ID"),
                &required(m, "CONVERSION_TX_ID"),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((staking_status::NAME, m)) => {
            staking_status::execute(
                &log_level(m),
                &config_file(m),
                m.get_one::<String>("SUBNET_ID"),
                m.get_one::<String>("STAKING_MANAGER"),
                m.get_one::<String>("STAKE_AMOUNT"),
            )
            .await
        }

        Some((validators::NAME, sub)) => match sub.subcommand() {
            Some((validators::LIST, m)) => validators::list(&log_level(m), &config_file(m)),
            Some((validators::CLEAR, m)) => {
                validators::clear(&log_level(m), &config_file(m), m.get_flag("SKIP_PROMPT"))
            }
            _ => unreachable!("unknown validators subcommand"),
        },

        Some((cross_chain_transfer::NAME, m)) => {
            cross_chain_transfer::execute(
                &log_level(m),
                &config_file(m),
                *m.get_one::<u64>("AMOUNT_IN_NANO_AVAX").unwrap_or(&0),
                *m.get_one::<u64>("AMOUNT_IN_AVAX").unwrap_or(&0),
                m.get_flag("SKIP_PROMPT"),
            )
            .await
        }

        Some((relayer_key::NAME, sub)) => match sub.subcommand() {
            Some((relayer_key::SHOW, m)) => relayer_key::show(&log_level(m), &config_file(m)),
            Some((relayer_key::ROTATE, m)) => {
                relayer_key::rotate(&log_level(m), &config_file(m), m.get_flag("SKIP_PROMPT"))
            }
            _ => unreachable!("unknown relayer-key subcommand"),
        },

        _ => unreachable!("unknown subcommand"),
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox-cli --bin l1-toolbox -- test_command --exact --show-output
#[test]
fn test_command() {
    let _ = env_logger::builder().is_test(true).try_init();

    command().debug_assert();

    let m = command()
        .try_get_matches_from([
            APP_NAME,
            "change-weight",
            "--subnet-id",
            "2DeHa7Qb6sufPkmQcFWG2uCd4pBPv9WB6dkzroiMQhd1NSRtof",
            "--node-id",
            "NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg",
            "--weight",
            "20",
            "--skip-prompt",
        ])
        .unwrap();
    let (name, sub) = m.subcommand().unwrap();
    assert_eq!(name, change_weight::NAME);
    assert_eq!(*sub.get_one::<u64>("WEIGHT").unwrap(), 20);
    assert!(sub.get_flag("SKIP_PROMPT"));
    assert_eq!(log_level(sub), "info");
    assert_eq!(config_file(sub), config::default_path());

    // node ID and validation ID are exclusive
    assert!(command()
        .try_get_matches_from([
            APP_NAME,
            "remove-validator",
            "--subnet-id",
            "2DeHa7Qb6sufPkmQcFWG2uCd4pBPv9WB6dkzroiMQhd1NSRtof",
            "--node-id",
            "NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg",
            "--validation-id",
            "0x01",
        ])
        .is_err());

    let m = command()
        .try_get_matches_from([APP_NAME, "validators", "list", "-c", "/tmp/c.yaml"])
        .unwrap();
    let (_, sub) = m.subcommand().unwrap();
    let (name, list) = sub.subcommand().unwrap();
    assert_eq!(name, validators::LIST);
    assert_eq!(config_file(list), "/tmp/c.yaml");
}
