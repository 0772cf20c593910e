use primitive_types::H256;

use crate::{
    aggregator::SignatureAggregator,
    candidate::{parse_node_id, ValidatorCandidate},
    errors::{Error, Result},
    evm::EvmClient,
    manager::ManagerContext,
    pchain::{PChainClient, PChainWallet},
    phases::{complete, init_validator_set::init_validator_set, initiate, submit, Settings},
    store::Store,
    wizard::{Flow, Step, StepOutput, WizardState},
};

/// Drives one wizard flow against its clients, one external call chain per step.
pub struct Orchestrator<E, P, W, A> {
    pub state: WizardState,
    evm: E,
    pchain: P,
    wallet: W,
    aggregator: A,
    store: Option<Store>,
    settings: Settings,
}

impl<E, P, W, A> Orchestrator<E, P, W, A>
where
    E: EvmClient,
    P: PChainClient,
    W: PChainWallet,
    A: SignatureAggregator,
{
    pub fn new(
        flow: Flow,
        evm: E,
        pchain: P,
        wallet: W,
        aggregator: A,
        store: Option<Store>,
        settings: Settings,
    ) -> Self {
        Self {
            state: WizardState::new(flow),
            evm,
            pchain,
            wallet,
            aggregator,
            store,
            settings,
        }
    }

    pub fn evm(&self) -> &E {
        &self.evm
    }

    pub fn pchain(&self) -> &P {
        &self.pchain
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Loads the candidate saved by an earlier session, if any.
    pub fn restore_candidate(&mut self) -> Result<Option<ValidatorCandidate>> {
        let store = match &self.store {
            Some(s) => s,
            None => return Ok(None),
        };
        let candidate = store.load_validators()?.into_iter().next();
        if let Some(c) = &candidate {
            log::info!("restored candidate {}", c.node_id);
            self.state.inputs.candidate = Some(c.clone());
        }
        Ok(candidate)
    }

    /// Starts over and forgets the saved candidates.
    pub fn reset(&mut self) -> Result<()> {
        self.state.reset();
        if let Some(store) = &self.store {
            store.clear_validators()?;
        }
        Ok(())
    }

    /// Runs the active step. Failures are recorded in the wizard state and
    /// returned as the operator-facing message.
    pub async fn run_step(&mut self) -> std::result::Result<Step, String> {
        let step = self.state.step();
        if self.state.is_finished() {
            return Err(String::from("flow already completed"));
        }
        if !self.state.is_step_enabled(step) {
            let e = Error::Validation(format!(
                "step '{step}' is missing {:?}",
                self.state.missing(step)
            ));
            return Err(e.user_message());
        }

        log::info!("running step '{step}' of {:?}", self.state.flow);
        let out = match self.execute(step).await {
            Ok(out) => out,
            Err(e) => {
                let message = e.user_message();
                self.state.on_error(step, message.clone());
                return Err(message);
            }
        };

        if let StepOutput::CandidateEntered(c) = &out {
            if let Some(store) = &self.store {
                if let Err(e) = store.save_validators(std::slice::from_ref(c)) {
                    log::warn!("failed to persist candidate ({e})");
                }
            }
        }
        self.state
            .on_success(step, out)
            .map_err(|e| e.user_message())?;
        Ok(step)
    }

    fn context(&self) -> Result<&ManagerContext> {
        self.state
            .context
            .as_ref()
            .ok_or_else(|| Error::Validation(String::from("no subnet selected")))
    }

    fn required<T: Clone>(v: &Option<T>, what: &str) -> Result<T> {
        v.clone()
            .ok_or_else(|| Error::Validation(format!("{what} is required")))
    }

    async fn execute(&self, step: Step) -> Result<StepOutput> {
        let s = &self.state;
        match step {
            Step::SelectSubnet => {
                let subnet_id = Self::required(&s.inputs.subnet_id, "subnet ID")?;
                let ctx = ManagerContext::fetch(&self.evm, &self.pchain, &subnet_id).await?;
                Ok(StepOutput::SubnetSelected(ctx))
            }
            Step::EnterCandidate => {
                let c = Self::required(&s.inputs.candidate, "validator")?;
                c.validate()?;
                Ok(StepOutput::CandidateEntered(c))
            }
            Step::SelectValidator => self.select_validator().await,
            Step::Initiate => {
                let ctx = self.context()?;
                let backoff = &self.settings.receipt_backoff;
                let out = match s.flow {
                    Flow::AddValidator => {
                        let c = Self::required(&s.inputs.candidate, "validator")?;
                        initiate::initiate_registration(&self.evm, ctx, &c, backoff).await?
                    }
                    Flow::RemoveValidator => {
                        let vid = Self::required(&s.artifacts.validation_id, "validation ID")?;
                        initiate::initiate_removal(&self.evm, ctx, &vid, backoff).await?
                    }
                    Flow::ChangeWeight => {
                        let vid = Self::required(&s.artifacts.validation_id, "validation ID")?;
                        let weight = Self::required(&s.inputs.weight, "weight")?;
                        initiate::initiate_weight_update(&self.evm, ctx, &vid, weight, backoff)
                            .await?
                    }
                    Flow::RemoveDelegation => {
                        let did = Self::required(&s.delegation_id(), "delegation ID")?;
                        initiate::initiate_delegator_removal(&self.evm, ctx, &did, backoff).await?
                    }
                    Flow::InitValidatorSet => {
                        return Err(Error::Validation(String::from(
                            "nothing to initiate for this flow",
                        )))
                    }
                };
                Ok(StepOutput::Initiated(out))
            }
            Step::SubmitPChain => {
                let ctx = self.context()?;
                let hash = Self::required(&s.artifacts.evm_tx_hash, "EVM tx hash")?;
                let out = match s.flow {
                    Flow::AddValidator => {
                        let c = Self::required(&s.inputs.candidate, "validator")?;
                        submit::submit_register_l1_validator(
                            &self.evm,
                            &self.pchain,
                            &self.wallet,
                            &self.aggregator,
                            ctx,
                            &c,
                            &hash,
                            &self.settings,
                        )
                        .await?
                    }
                    _ => {
                        submit::submit_set_l1_validator_weight(
                            &self.evm,
                            &self.pchain,
                            &self.wallet,
                            &self.aggregator,
                            ctx,
                            &hash,
                            &self.settings,
                        )
                        .await?
                    }
                };
                Ok(StepOutput::Submitted(out))
            }
            Step::Complete => {
                let ctx = self.context()?;
                let tx_id = Self::required(&s.artifacts.pchain_tx_id, "P-Chain tx ID")?;
                let (evm, pchain, agg, settings) =
                    (&self.evm, &self.pchain, &self.aggregator, &self.settings);
                let out = match s.flow {
                    Flow::AddValidator => {
                        complete::complete_registration(evm, pchain, agg, ctx, &tx_id, settings)
                            .await?
                    }
                    Flow::RemoveValidator => {
                        complete::complete_removal(evm, pchain, agg, ctx, &tx_id, settings).await?
                    }
                    Flow::ChangeWeight => {
                        complete::complete_weight_update(evm, pchain, agg, ctx, &tx_id, settings)
                            .await?
                    }
                    Flow::RemoveDelegation => {
                        let did = Self::required(&s.delegation_id(), "delegation ID")?;
                        complete::complete_delegator_removal(
                            evm, pchain, agg, ctx, &did, &tx_id, settings,
                        )
                        .await?
                    }
                    Flow::InitValidatorSet => {
                        return Err(Error::Validation(String::from(
                            "nothing to complete for this flow",
                        )))
                    }
                };
                Ok(StepOutput::Completed(out))
            }
            Step::InitializeValidatorSet => {
                let ctx = self.context()?;
                let tx_id = Self::required(&s.inputs.conversion_tx_id, "conversion tx ID")?;
                let out = init_validator_set(
                    &self.evm,
                    &self.pchain,
                    &self.aggregator,
                    ctx,
                    &tx_id,
                    &self.settings,
                )
                .await?;
                Ok(StepOutput::ValidatorSetInitialized(out))
            }
        }
    }

    /// Resolves the validator (or delegation) a removal or weight change targets.
    async fn select_validator(&self) -> Result<StepOutput> {
        let s = &self.state;
        if s.flow == Flow::RemoveDelegation {
            let did = Self::required(&s.inputs.delegation_id, "delegation ID")?;
            return Ok(StepOutput::ValidatorSelected {
                validation_id: s.inputs.validation_id,
                delegation_id: Some(did),
            });
        }

        let vid: H256 = match (&s.inputs.validation_id, &s.inputs.node_id) {
            (Some(vid), _) => *vid,
            (None, Some(node_id)) => {
                let node = parse_node_id(node_id)?;
                self.context()?.validation_id_of(&self.evm, &node).await?
            }
            (None, None) => {
                return Err(Error::Validation(String::from(
                    "node ID or validation ID is required",
                )))
            }
        };
        log::info!("selected validation 0x{:x}", vid);
        Ok(StepOutput::ValidatorSelected {
            validation_id: Some(vid),
            delegation_id: None,
        })
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- orchestrator::test_add_validator_flow --exact --show-output
#[tokio::test]
async fn test_add_validator_flow() {
    use crate::{
        candidate::sample_candidate,
        contracts,
        pchain::TxStatus,
        testutil::{
            fast_settings, register_message, register_receipt, signed, FakeAggregator, FakeEvm,
            FakePChain, FakeWallet,
        },
        wizard::Status,
    };
    use ethers_core::abi::Token;
    use primitive_types::H160;

    let _ = env_logger::builder().is_test(true).try_init();

    let subnet_id = H256::repeat_byte(0x0a);
    let manager = H160::repeat_byte(0x01);
    let pchain = FakePChain::default();
    pchain.add_l1(subnet_id, H256::repeat_byte(0x0b), manager);
    let evm = FakeEvm::default();
    evm.set_call(manager, &contracts::OWNER, vec![Token::Address(H160::repeat_byte(0x02))]);
    evm.set_code(H160::repeat_byte(0x02));

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).unwrap();
    let mut o = Orchestrator::new(
        Flow::AddValidator,
        evm,
        pchain,
        FakeWallet::default(),
        FakeAggregator::default(),
        Some(store.clone()),
        fast_settings(),
    );

    // nothing selected yet
    assert!(o.run_step().await.is_err());
    assert_eq!(o.state.status, Status::NotStarted);

    o.state.select_subnet(subnet_id);
    assert_eq!(o.run_step().await.unwrap(), Step::SelectSubnet);

    let candidate = sample_candidate();
    o.state.inputs.candidate = Some(candidate.clone());
    assert_eq!(o.run_step().await.unwrap(), Step::EnterCandidate);
    assert_eq!(store.load_validators().unwrap(), vec![candidate.clone()]);

    let (receipt, vid) = register_receipt(&candidate, subnet_id);
    o.evm().push_receipt(receipt);
    assert_eq!(o.run_step().await.unwrap(), Step::Initiate);
    assert_eq!(o.state.status, Status::Initiated);
    assert_eq!(o.state.artifacts.validation_id, Some(vid));

    o.pchain().push_status("register-1", TxStatus::Committed);
    assert_eq!(o.run_step().await.unwrap(), Step::SubmitPChain);
    assert_eq!(o.state.status, Status::SubmittedToPChain);

    let (unsigned, _) = register_message(&candidate, subnet_id);
    o.pchain().add_message_tx("register-1", signed(&unsigned));
    assert_eq!(o.run_step().await.unwrap(), Step::Complete);
    assert_eq!(o.state.status, Status::Completed);
    assert!(o.state.artifacts.completion_tx_hash.is_some());
    assert!(o.run_step().await.is_err());

    o.reset().unwrap();
    assert!(store.load_validators().unwrap().is_empty());
    assert_eq!(o.state.reset_key, 1);
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- orchestrator::test_rejected_step --exact --show-output
#[tokio::test]
async fn test_rejected_step() {
    use crate::{
        testutil::{
            fast_settings, poa_context, weight_receipt, FakeAggregator, FakeEvm, FakePChain,
            FakeWallet,
        },
        wizard::Status,
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let mut o = Orchestrator::new(
        Flow::RemoveValidator,
        FakeEvm::default(),
        FakePChain::default(),
        FakeWallet::default(),
        FakeAggregator::default(),
        None,
        fast_settings(),
    );
    let ctx = poa_context();
    o.state.select_subnet(ctx.subnet_id);
    o.state.on_success(Step::SelectSubnet, StepOutput::SubnetSelected(ctx)).unwrap();

    let vid = H256::repeat_byte(0x0f);
    o.state.inputs.validation_id = Some(vid);
    assert_eq!(o.run_step().await.unwrap(), Step::SelectValidator);

    o.evm().fail_next_send(4001, "User denied transaction signature");
    let message = o.run_step().await.unwrap_err();
    assert_eq!(message, "Transaction rejected by user");
    assert_eq!(
        o.state.status,
        Status::Failed {
            step: Step::Initiate,
            message: message.clone()
        }
    );
    assert_eq!(o.state.global_error, Some(message));

    // retrying the same step recovers
    o.evm().push_receipt(weight_receipt(vid, 1, 0));
    assert_eq!(o.run_step().await.unwrap(), Step::Initiate);
    assert_eq!(o.state.status, Status::Initiated);
    assert!(o.state.global_error.is_none());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- orchestrator::test_change_weight_flow --exact --show-output
#[tokio::test]
async fn test_change_weight_flow() {
    use crate::{
        contracts,
        pchain::TxStatus,
        testutil::{
            fast_settings, poa_context, signed, weight_message, weight_receipt, FakeAggregator,
            FakeEvm, FakePChain, FakeWallet,
        },
        wizard::{Requirement, Status},
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let mut o = Orchestrator::new(
        Flow::ChangeWeight,
        FakeEvm::default(),
        FakePChain::default(),
        FakeWallet::default(),
        FakeAggregator::default(),
        None,
        fast_settings(),
    );
    let ctx = poa_context();
    o.state.select_subnet(ctx.subnet_id);
    o.state
        .on_success(Step::SelectSubnet, StepOutput::SubnetSelected(ctx.clone()))
        .unwrap();

    let vid = H256::repeat_byte(0x0f);
    o.state.inputs.validation_id = Some(vid);
    assert_eq!(o.run_step().await.unwrap(), Step::SelectValidator);

    // no weight yet, nothing is sent and nothing is marked failed
    assert_eq!(o.state.missing(Step::Initiate), vec![Requirement::Weight]);
    assert!(o.run_step().await.is_err());
    assert_eq!(o.state.step(), Step::Initiate);
    assert_eq!(o.state.status, Status::NotStarted);
    assert!(o.evm().sent().is_empty());

    // zero is a removal, not a weight change
    o.state.inputs.weight = Some(0);
    assert!(!o.state.is_step_enabled(Step::Initiate));

    o.state.inputs.weight = Some(40);
    o.evm().push_receipt(weight_receipt(vid, 5, 40));
    assert_eq!(o.run_step().await.unwrap(), Step::Initiate);
    assert_eq!(o.state.status, Status::Initiated);
    assert_eq!(o.state.artifacts.nonce, Some(5));
    assert_eq!(o.state.artifacts.weight, Some(40));
    assert_eq!(
        &o.evm().sent()[0].data[..4],
        &contracts::INITIATE_VALIDATOR_WEIGHT_UPDATE.selector()
    );

    o.pchain().push_status("weight-1", TxStatus::Committed);
    assert_eq!(o.run_step().await.unwrap(), Step::SubmitPChain);
    assert_eq!(o.state.artifacts.pchain_tx_id.as_deref(), Some("weight-1"));

    o.pchain()
        .add_message_tx("weight-1", signed(&weight_message(vid, 5, 40)));
    assert_eq!(o.run_step().await.unwrap(), Step::Complete);
    assert_eq!(o.state.status, Status::Completed);
    assert_eq!(o.state.artifacts.validation_id, Some(vid));
    assert!(o.state.artifacts.delegation_id.is_none());

    let sent = o.evm().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].to, ctx.owner_address);
    assert_eq!(
        &sent[1].data[..4],
        &contracts::COMPLETE_VALIDATOR_WEIGHT_UPDATE.selector()
    );
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- orchestrator::test_remove_delegation_flow --exact --show-output
#[tokio::test]
async fn test_remove_delegation_flow() {
    use crate::{
        contracts,
        pchain::TxStatus,
        testutil::{
            delegator_removal_receipt, fast_settings, signed, staking_context, weight_message,
            FakeAggregator, FakeEvm, FakePChain, FakeWallet,
        },
        wizard::{Requirement, Status},
    };

    let _ = env_logger::builder().is_test(true).try_init();

    let mut o = Orchestrator::new(
        Flow::RemoveDelegation,
        FakeEvm::default(),
        FakePChain::default(),
        FakeWallet::default(),
        FakeAggregator::default(),
        None,
        fast_settings(),
    );
    let ctx = staking_context(None);
    let staking_manager = ctx.kind.staking_manager().unwrap();
    o.state.select_subnet(ctx.subnet_id);
    o.state
        .on_success(Step::SelectSubnet, StepOutput::SubnetSelected(ctx))
        .unwrap();

    // a validator alone does not identify the delegation
    let vid = H256::repeat_byte(0x0f);
    o.state.inputs.validation_id = Some(vid);
    assert_eq!(
        o.state.missing(Step::SelectValidator),
        vec![Requirement::DelegationId]
    );
    assert!(o.run_step().await.is_err());
    assert_eq!(o.state.step(), Step::SelectValidator);
    assert_eq!(o.state.status, Status::NotStarted);

    let did = H256::repeat_byte(0x0d);
    o.state.inputs.delegation_id = Some(did);
    assert_eq!(o.run_step().await.unwrap(), Step::SelectValidator);
    assert_eq!(o.state.artifacts.delegation_id, Some(did));

    o.evm().push_receipt(delegator_removal_receipt(did, vid, 8, 20));
    assert_eq!(o.run_step().await.unwrap(), Step::Initiate);
    assert_eq!(o.state.artifacts.validation_id, Some(vid));
    assert_eq!(o.state.artifacts.delegation_id, Some(did));
    assert_eq!(o.state.artifacts.nonce, Some(8));

    o.pchain().push_status("weight-1", TxStatus::Committed);
    assert_eq!(o.run_step().await.unwrap(), Step::SubmitPChain);

    o.pchain()
        .add_message_tx("weight-1", signed(&weight_message(vid, 8, 20)));
    assert_eq!(o.run_step().await.unwrap(), Step::Complete);
    assert_eq!(o.state.status, Status::Completed);

    // the delegation ID reaches the completion call
    let sent = o.evm().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, staking_manager);
    assert_eq!(&sent[0].data[..4], &contracts::INITIATE_DELEGATOR_REMOVAL.selector());
    assert_eq!(sent[1].to, staking_manager);
    assert_eq!(&sent[1].data[..4], &contracts::COMPLETE_DELEGATOR_REMOVAL.selector());
    assert_eq!(&sent[1].data[4..36], did.as_bytes());
}
