use ethers::types::H256;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request validation before any stage runs.
    Ingestion,
    Canonicalization,
    Preverification,
    Proving,
    Verification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingestion => "ingestion",
            Stage::Canonicalization => "canonicalization",
            Stage::Preverification => "preverification",
            Stage::Proving => "proving",
            Stage::Verification => "verification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed email: {0}")]
    MalformedEmail(String),
    #[error("dkim key lookup failed: {0}")]
    DkimKeyLookup(String),
    #[error("invalid match predicate: {0}")]
    InvalidPredicate(String),
    #[error("proof job submission failed: {0:#}")]
    Submission(#[source] anyhow::Error),
    #[error("proving failed: {0}")]
    ProvingFailed(String),
    #[error("proof job {job} did not finish after {attempts} polls")]
    ProvingTimedOut { job: String, attempts: u32 },
    #[error("proof schema version {found} is not accepted (supported: {supported:?})")]
    UnsupportedProofSchema { found: u32, supported: Vec<u32> },
    #[error("verification broadcast rejected: {0:#}")]
    Broadcast(#[source] anyhow::Error),
    #[error("transaction {tx_hash:?} not confirmed after {attempts} polls")]
    ConfirmationTimeout { tx_hash: H256, attempts: u32 },
    #[error("transaction {tx_hash:?} reverted")]
    TransactionReverted { tx_hash: H256 },
    #[error("checkpoint store: {0:#}")]
    Checkpoint(#[source] anyhow::Error),
}

impl PipelineError {
    /// Bounded-wait exhaustion. The outcome is unknown and the request may be
    /// re-run to resume from its checkpoint.
    pub fn resumable(&self) -> bool {
        matches!(
            self,
            PipelineError::ProvingTimedOut { .. } | PipelineError::ConfirmationTimeout { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedEmail(_) => "MalformedEmailError",
            PipelineError::DkimKeyLookup(_) => "DkimKeyLookupError",
            PipelineError::InvalidPredicate(_) => "InvalidPredicateError",
            PipelineError::Submission(_) => "SubmissionError",
            PipelineError::ProvingFailed(_) => "ProvingFailedError",
            PipelineError::ProvingTimedOut { .. } => "ProvingTimedOutError",
            PipelineError::UnsupportedProofSchema { .. } => "UnsupportedProofSchemaError",
            PipelineError::Broadcast(_) => "BroadcastError",
            PipelineError::ConfirmationTimeout { .. } => "ConfirmationTimeoutError",
            PipelineError::TransactionReverted { .. } => "TransactionRevertedError",
            PipelineError::Checkpoint(_) => "CheckpointError",
        }
    }

    pub(crate) fn at(self, stage: Stage) -> PipelineFailure {
        PipelineFailure { stage, error: self }
    }
}

/// Terminal failure of one pipeline request.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    pub fn resumable(&self) -> bool {
        self.error.resumable()
    }
}
