//! Runs one wizard flow step by step in the terminal.
use std::io::{self, Error, ErrorKind};

use crossterm::style::Color;
use dialoguer::{theme::ColorfulTheme, Select};
use l1_toolbox::{
    aggregator::HttpAggregator,
    evm::EthersEvmClient,
    orchestrator::Orchestrator,
    pchain::{format_id, JsonRpcPChainClient, RemoteWallet},
    store::Store,
    wizard::{Flow, Status, Step},
};

use crate::{common, config::Config};

pub type Wizard = Orchestrator<EthersEvmClient, JsonRpcPChainClient, RemoteWallet, HttpAggregator>;

/// Builds the clients named by "cfg" and a fresh wizard for "flow".
pub async fn connect(cfg: &Config, flow: Flow, evm_private_key: &str) -> io::Result<Wizard> {
    let evm = EthersEvmClient::new(&cfg.evm_rpc_url, evm_private_key, cfg.evm_chain_id)
        .await
        .map_err(common::to_io_error)?;
    let pchain = JsonRpcPChainClient::new(&cfg.pchain_rpc_url).map_err(common::to_io_error)?;
    let wallet = RemoteWallet::new(&cfg.wallet_url).map_err(common::to_io_error)?;
    let aggregator = HttpAggregator::new(&cfg.aggregator_url).map_err(common::to_io_error)?;
    let store = Store::open(&cfg.store_dir).map_err(common::to_io_error)?;

    Ok(Orchestrator::new(
        flow,
        evm,
        pchain,
        wallet,
        aggregator,
        Some(store),
        cfg.settings(),
    ))
}

enum OnFailure {
    Retry,
    Abort,
}

fn ask_on_failure(step: Step) -> io::Result<OnFailure> {
    let options = &[
        format!("Retry '{step}'"),
        String::from("Abort (artifacts so far are printed below)"),
    ];
    let selected = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Step failed")
        .items(&options[..])
        .default(0)
        .interact()?;
    Ok(if selected == 0 {
        OnFailure::Retry
    } else {
        OnFailure::Abort
    })
}

/// Walks the remaining steps. Before each one the operator confirms unless
/// "skip_prompt"; a failed step is retried or the flow aborted.
pub async fn run(wizard: &mut Wizard, skip_prompt: bool) -> io::Result<()> {
    let total = wizard.state.flow.steps().len();
    while !wizard.state.is_finished() {
        let step = wizard.state.step();
        common::banner(
            Color::Green,
            &format!("[{}/{total}] {step}", wizard.state.active_step + 1),
        )?;

        if !skip_prompt
            && !common::confirm(
                &format!("Run '{step}'?"),
                &format!("let's run '{step}'."),
                "I am not ready, abort.",
            )?
        {
            print_artifacts(wizard);
            return Ok(());
        }

        match wizard.run_step().await {
            Ok(done) => {
                common::banner(Color::Blue, &format!("'{done}' succeeded"))?;
                print_artifacts(wizard);
            }
            Err(msg) => {
                common::banner(Color::Red, &msg)?;
                // a disabled step cannot succeed on retry
                let failed = matches!(wizard.state.status, Status::Failed { step: s, .. } if s == step);
                if skip_prompt || !failed {
                    return Err(Error::new(ErrorKind::Other, msg));
                }
                match ask_on_failure(step)? {
                    OnFailure::Retry => continue,
                    OnFailure::Abort => {
                        print_artifacts(wizard);
                        return Err(Error::new(ErrorKind::Other, msg));
                    }
                }
            }
        }
    }

    common::banner(Color::Green, "flow completed")?;
    Ok(())
}

/// Prints every artifact collected so far.
pub fn print_artifacts(wizard: &Wizard) {
    let s = &wizard.state;
    if let Some(ctx) = &s.context {
        println!(
            "subnet: {}\nmanager: 0x{:x} ({} owner 0x{:x})",
            format_id(&ctx.subnet_id),
            ctx.manager_address,
            ctx.owner_type,
            ctx.owner_address
        );
    }
    let a = &s.artifacts;
    if let Some(v) = &a.validation_id {
        println!("validation ID: 0x{:x}", v);
    }
    if let Some(v) = &a.delegation_id {
        println!("delegation ID: 0x{:x}", v);
    }
    if let Some(v) = &a.evm_tx_hash {
        println!("EVM tx: 0x{:x}", v);
    }
    if let Some(v) = &a.nonce {
        println!("nonce: {v}");
    }
    if let Some(v) = &a.weight {
        println!("weight: {v}");
    }
    if let Some(v) = &a.pchain_tx_id {
        println!("P-Chain tx: {v}");
    }
    if let Some(v) = &a.completion_tx_hash {
        println!("completion tx: 0x{:x}", v);
    }
    if let Some(v) = &a.conversion_id {
        println!("conversion ID: 0x{:x}", v);
    }
    for v in a.initial_validation_ids.iter() {
        println!("initial validation ID: 0x{:x}", v);
    }
}
