//! Validator lifecycle wizard: ordered steps, the artifacts each one
//! produces and consumes, and the flow status.
use std::fmt;

use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::{
    candidate::ValidatorCandidate,
    errors::{Error, Result},
    manager::ManagerContext,
    phases::{
        complete::CompleteOutput, init_validator_set::InitValidatorSetOutput,
        initiate::InitiateOutput, submit::SubmitOutput,
    },
};

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    AddValidator,
    RemoveValidator,
    RemoveDelegation,
    ChangeWeight,
    InitValidatorSet,
}

impl Flow {
    pub fn steps(&self) -> &'static [Step] {
        match self {
            Flow::AddValidator => &[
                Step::SelectSubnet,
                Step::EnterCandidate,
                Step::Initiate,
                Step::SubmitPChain,
                Step::Complete,
            ],
            Flow::RemoveValidator | Flow::RemoveDelegation | Flow::ChangeWeight => &[
                Step::SelectSubnet,
                Step::SelectValidator,
                Step::Initiate,
                Step::SubmitPChain,
                Step::Complete,
            ],
            Flow::InitValidatorSet => &[Step::SelectSubnet, Step::InitializeValidatorSet],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    SelectSubnet,
    EnterCandidate,
    SelectValidator,
    Initiate,
    SubmitPChain,
    Complete,
    InitializeValidatorSet,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::SelectSubnet => "select subnet",
            Step::EnterCandidate => "enter validator",
            Step::SelectValidator => "select validator",
            Step::Initiate => "initiate on EVM",
            Step::SubmitPChain => "submit to P-Chain",
            Step::Complete => "complete on EVM",
            Step::InitializeValidatorSet => "initialize validator set",
        };
        write!(f, "{s}")
    }
}

/// Values a step needs before it may run.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Requirement {
    SubnetId,
    ManagerContext,
    Candidate,
    /// Node ID or validation ID of an existing validator.
    ValidatorRef,
    DelegationId,
    Weight,
    ValidationId,
    EvmTxHash,
    PChainTxId,
    ConversionTxId,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub enum Status {
    NotStarted,
    Initiated,
    SubmittedToPChain,
    Completed,
    Failed { step: Step, message: String },
}

/// Operator-entered values.
#[derive(Debug, Eq, PartialEq, Clone, Default)]
pub struct Inputs {
    pub subnet_id: Option<H256>,
    pub candidate: Option<ValidatorCandidate>,
    pub node_id: Option<String>,
    pub validation_id: Option<H256>,
    pub delegation_id: Option<H256>,
    pub weight: Option<u64>,
    pub conversion_tx_id: Option<String>,
}

/// Values produced by completed steps.
#[derive(Debug, Eq, PartialEq, Clone, Default)]
pub struct Artifacts {
    pub evm_tx_hash: Option<H256>,
    pub pchain_tx_id: Option<String>,
    pub validation_id: Option<H256>,
    pub delegation_id: Option<H256>,
    pub unsigned_message: Option<Vec<u8>>,
    pub signed_message: Option<Vec<u8>>,
    pub nonce: Option<u64>,
    pub weight: Option<u64>,
    pub completion_tx_hash: Option<H256>,
    pub conversion_id: Option<H256>,
    pub initial_validation_ids: Vec<H256>,
}

/// Result of one successful step.
#[derive(Debug, Clone)]
pub enum StepOutput {
    SubnetSelected(ManagerContext),
    CandidateEntered(ValidatorCandidate),
    ValidatorSelected {
        validation_id: Option<H256>,
        delegation_id: Option<H256>,
    },
    Initiated(InitiateOutput),
    Submitted(SubmitOutput),
    Completed(CompleteOutput),
    ValidatorSetInitialized(InitValidatorSetOutput),
}

#[derive(Debug, Clone)]
pub struct WizardState {
    pub flow: Flow,
    /// Index into "flow.steps()".
    pub active_step: usize,
    /// Bumped on every reset; views keyed by it start over.
    pub reset_key: u64,
    pub status: Status,
    pub inputs: Inputs,
    pub context: Option<ManagerContext>,
    pub artifacts: Artifacts,
    pub global_error: Option<String>,
}

impl WizardState {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            active_step: 0,
            reset_key: 0,
            status: Status::NotStarted,
            inputs: Inputs::default(),
            context: None,
            artifacts: Artifacts::default(),
            global_error: None,
        }
    }

    pub fn step(&self) -> Step {
        let steps = self.flow.steps();
        steps[self.active_step.min(steps.len() - 1)]
    }

    pub fn is_finished(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn requirements(&self, step: Step) -> Vec<Requirement> {
        use Requirement::*;
        match (self.flow, step) {
            (_, Step::SelectSubnet) => vec![SubnetId],
            (_, Step::EnterCandidate) => vec![ManagerContext, Candidate],
            (Flow::RemoveDelegation, Step::SelectValidator) => {
                vec![ManagerContext, DelegationId]
            }
            (_, Step::SelectValidator) => vec![ManagerContext, ValidatorRef],
            (Flow::AddValidator, Step::Initiate) => vec![ManagerContext, Candidate],
            (Flow::RemoveDelegation, Step::Initiate) => vec![ManagerContext, DelegationId],
            (Flow::ChangeWeight, Step::Initiate) => vec![ManagerContext, ValidationId, Weight],
            (_, Step::Initiate) => vec![ManagerContext, ValidationId],
            (Flow::AddValidator, Step::SubmitPChain) => {
                vec![ManagerContext, Candidate, EvmTxHash]
            }
            (_, Step::SubmitPChain) => vec![ManagerContext, EvmTxHash],
            (Flow::RemoveDelegation, Step::Complete) => {
                vec![ManagerContext, DelegationId, PChainTxId]
            }
            (_, Step::Complete) => vec![ManagerContext, PChainTxId],
            (_, Step::InitializeValidatorSet) => vec![ManagerContext, ConversionTxId],
        }
    }

    fn has(&self, r: Requirement) -> bool {
        match r {
            Requirement::SubnetId => self.inputs.subnet_id.is_some(),
            Requirement::ManagerContext => self.context.is_some(),
            Requirement::Candidate => self
                .inputs
                .candidate
                .as_ref()
                .map(|c| c.is_complete())
                .unwrap_or(false),
            Requirement::ValidatorRef => {
                self.inputs.validation_id.is_some()
                    || self
                        .inputs
                        .node_id
                        .as_ref()
                        .map(|n| !n.is_empty())
                        .unwrap_or(false)
            }
            Requirement::DelegationId => self.delegation_id().is_some(),
            Requirement::Weight => self.inputs.weight.map(|w| w > 0).unwrap_or(false),
            Requirement::ValidationId => self.artifacts.validation_id.is_some(),
            Requirement::EvmTxHash => self.artifacts.evm_tx_hash.is_some(),
            Requirement::PChainTxId => self
                .artifacts
                .pchain_tx_id
                .as_ref()
                .map(|s| !s.is_empty())
                .unwrap_or(false),
            Requirement::ConversionTxId => self
                .inputs
                .conversion_tx_id
                .as_ref()
                .map(|s| !s.is_empty())
                .unwrap_or(false),
        }
    }

    /// Returns the requirements of "step" that are not yet met.
    pub fn missing(&self, step: Step) -> Vec<Requirement> {
        self.requirements(step)
            .into_iter()
            .filter(|r| !self.has(*r))
            .collect()
    }

    /// A step is enabled when it belongs to the flow and everything it
    /// consumes is present.
    pub fn is_step_enabled(&self, step: Step) -> bool {
        self.flow.steps().contains(&step) && self.missing(step).is_empty()
    }

    pub fn delegation_id(&self) -> Option<H256> {
        self.artifacts.delegation_id.or(self.inputs.delegation_id)
    }

    /// Selecting another subnet drops the manager context and everything after
    /// it. Selecting the same subnet again keeps the flow where it is.
    pub fn select_subnet(&mut self, subnet_id: H256) {
        if self.inputs.subnet_id == Some(subnet_id) {
            return;
        }
        if self.inputs.subnet_id.is_some() {
            log::info!("subnet changed, dropping manager context and artifacts");
        }
        self.inputs.subnet_id = Some(subnet_id);
        self.context = None;
        self.artifacts = Artifacts::default();
        self.active_step = 0;
        self.status = Status::NotStarted;
        self.global_error = None;
    }

    /// Stores the output of "step" and advances to the next step.
    pub fn on_success(&mut self, step: Step, output: StepOutput) -> Result<()> {
        if step != self.step() {
            return Err(Error::Validation(format!(
                "step '{step}' is not the active step '{}'",
                self.step()
            )));
        }

        let a = &mut self.artifacts;
        match output {
            StepOutput::SubnetSelected(ctx) => {
                self.context = Some(ctx);
            }
            StepOutput::CandidateEntered(c) => {
                self.inputs.candidate = Some(c);
            }
            StepOutput::ValidatorSelected {
                validation_id,
                delegation_id,
            } => {
                a.validation_id = validation_id;
                a.delegation_id = delegation_id;
            }
            StepOutput::Initiated(out) => {
                a.evm_tx_hash = Some(out.evm_tx_hash);
                a.unsigned_message = Some(out.unsigned_message);
                a.validation_id = Some(out.validation_id);
                a.nonce = out.nonce;
                a.weight = out.weight;
                if out.delegation_id.is_some() {
                    a.delegation_id = out.delegation_id;
                }
                self.status = Status::Initiated;
            }
            StepOutput::Submitted(out) => {
                a.pchain_tx_id = Some(out.pchain_tx_id);
                a.signed_message = Some(out.signature.signed_message);
                a.validation_id = Some(out.validation_id);
                a.nonce = out.nonce.or(a.nonce);
                a.weight = out.weight.or(a.weight);
                self.status = Status::SubmittedToPChain;
            }
            StepOutput::Completed(out) => {
                a.completion_tx_hash = Some(out.completion_tx_hash);
                a.validation_id = Some(out.validation_id);
                self.status = Status::Completed;
            }
            StepOutput::ValidatorSetInitialized(out) => {
                a.completion_tx_hash = Some(out.tx_hash);
                a.conversion_id = Some(out.conversion_id);
                a.initial_validation_ids = out.validation_ids;
                self.status = Status::Completed;
            }
        }

        self.global_error = None;
        if self.active_step + 1 < self.flow.steps().len() {
            self.active_step += 1;
        }
        log::info!("step '{step}' succeeded, status {:?}", self.status);
        Ok(())
    }

    /// Marks the flow failed at "step"; the same step stays active for a retry.
    pub fn on_error(&mut self, step: Step, message: String) {
        log::warn!("step '{step}' failed: {message}");
        self.status = Status::Failed {
            step,
            message: message.clone(),
        };
        self.global_error = Some(message);
    }

    /// Clears every input and artifact.
    pub fn reset(&mut self) {
        let reset_key = self.reset_key + 1;
        *self = Self::new(self.flow);
        self.reset_key = reset_key;
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- wizard::test_step_enablement --exact --show-output
#[test]
fn test_step_enablement() {
    use crate::{candidate::sample_candidate, testutil::poa_context};

    let mut w = WizardState::new(Flow::AddValidator);
    assert_eq!(w.step(), Step::SelectSubnet);
    assert!(!w.is_step_enabled(Step::SelectSubnet));
    assert!(!w.is_step_enabled(Step::SelectValidator));

    w.select_subnet(H256::repeat_byte(0x0a));
    assert!(w.is_step_enabled(Step::SelectSubnet));
    assert!(!w.is_step_enabled(Step::EnterCandidate));

    w.on_success(Step::SelectSubnet, StepOutput::SubnetSelected(poa_context()))
        .unwrap();
    assert_eq!(w.step(), Step::EnterCandidate);
    assert_eq!(
        w.missing(Step::EnterCandidate),
        vec![Requirement::Candidate]
    );

    // incomplete candidate keeps the step disabled
    let mut c = sample_candidate();
    c.node_pop.proof_of_possession = String::new();
    w.inputs.candidate = Some(c);
    assert!(!w.is_step_enabled(Step::EnterCandidate));
    assert!(!w.is_step_enabled(Step::Initiate));

    w.inputs.candidate = Some(sample_candidate());
    assert!(w.is_step_enabled(Step::EnterCandidate));
    assert!(w.is_step_enabled(Step::Initiate));
    assert!(!w.is_step_enabled(Step::SubmitPChain));
    assert!(!w.is_step_enabled(Step::Complete));

    // only the active step accepts results
    assert!(w
        .on_success(
            Step::Initiate,
            StepOutput::CandidateEntered(sample_candidate())
        )
        .is_err());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- wizard::test_transitions --exact --show-output
#[test]
fn test_transitions() {
    use crate::testutil::poa_context;

    let mut w = WizardState::new(Flow::RemoveValidator);
    w.select_subnet(H256::repeat_byte(0x0a));
    w.on_success(Step::SelectSubnet, StepOutput::SubnetSelected(poa_context()))
        .unwrap();
    w.inputs.node_id = Some(String::from("NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg"));
    assert!(w.is_step_enabled(Step::SelectValidator));

    let vid = H256::repeat_byte(0x0f);
    w.on_success(
        Step::SelectValidator,
        StepOutput::ValidatorSelected {
            validation_id: Some(vid),
            delegation_id: None,
        },
    )
    .unwrap();
    assert!(w.is_step_enabled(Step::Initiate));

    w.on_success(
        Step::Initiate,
        StepOutput::Initiated(InitiateOutput {
            evm_tx_hash: H256::repeat_byte(0x01),
            unsigned_message: vec![0x01],
            validation_id: vid,
            nonce: Some(1),
            weight: Some(0),
            delegation_id: None,
        }),
    )
    .unwrap();
    assert_eq!(w.status, Status::Initiated);
    assert_eq!(w.step(), Step::SubmitPChain);

    // failure keeps the step, retry succeeds
    w.on_error(Step::SubmitPChain, String::from("Transaction rejected by user"));
    assert_eq!(
        w.status,
        Status::Failed {
            step: Step::SubmitPChain,
            message: String::from("Transaction rejected by user")
        }
    );
    assert_eq!(w.step(), Step::SubmitPChain);
    assert!(w.global_error.is_some());

    // the same subnet again keeps the step and the initiated artifacts
    w.select_subnet(H256::repeat_byte(0x0a));
    assert_eq!(w.step(), Step::SubmitPChain);
    assert_eq!(w.artifacts.evm_tx_hash, Some(H256::repeat_byte(0x01)));
    assert!(w.context.is_some());
    assert!(matches!(w.status, Status::Failed { .. }));

    // another subnet drops everything learned so far
    w.select_subnet(H256::repeat_byte(0x0b));
    assert!(w.context.is_none());
    assert!(w.artifacts.evm_tx_hash.is_none());
    assert_eq!(w.step(), Step::SelectSubnet);
    assert_eq!(w.status, Status::NotStarted);

    let key = w.reset_key;
    w.reset();
    assert_eq!(w.reset_key, key + 1);
    assert!(w.inputs.subnet_id.is_none());
    assert_eq!(w.flow, Flow::RemoveValidator);
}
