use crate::canonicalizer::{CanonicalEmail, Canonicalizer, EmailMessage};
use crate::chain_client::{ChainClient, Receipt};
use crate::checkpoint::{CheckpointStore, RequestId};
use crate::config::{PipelineConfig, PipelineOptions};
use crate::error::{PipelineError, PipelineFailure, Stage};
use crate::predicate::MatchPredicate;
use crate::preverifier::{Preverifier, PreverifyError, UnverifiedEmail};
use crate::proof_job::ProofJobController;
use crate::prover::{ProofResult, ProverClient};
use crate::verification::VerificationSubmitter;
use ethers::types::Address;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One email to prove and verify.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub request_id: Option<RequestId>,
    pub email: EmailMessage,
    pub predicate: MatchPredicate,
    pub prover_address: Option<Address>,
    pub verifier_address: Option<Address>,
}

impl PipelineRequest {
    pub fn new(email: EmailMessage, predicate: MatchPredicate) -> Self {
        Self {
            request_id: None,
            email,
            predicate,
            prover_address: None,
            verifier_address: None,
        }
    }

    /// Pins the checkpoint key instead of deriving it from the content.
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Overrides the configured contracts. `None` keeps the default.
    pub fn with_contracts(mut self, prover: Option<Address>, verifier: Option<Address>) -> Self {
        self.prover_address = prover.or(self.prover_address);
        self.verifier_address = verifier.or(self.verifier_address);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Ingested,
    Canonicalized,
    Preverified,
    Proving,
    Proved,
    Verifying,
    Verified,
    Failed(Stage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verified {
    pub request_id: RequestId,
    pub proof_result: ProofResult,
    pub receipt: Receipt,
    /// Whether a checkpoint from an earlier run was picked up.
    pub resumed: bool,
}

pub type VerificationOutcome = Result<Verified, PipelineFailure>;

/// Drives a request from raw email to confirmed verification.
///
/// Cheap to clone; every clone shares the collaborators, the checkpoint
/// store and the broadcast lock.
#[derive(Clone)]
pub struct EmailPipeline {
    canonicalizer: Arc<Canonicalizer>,
    preverifier: Arc<dyn Preverifier>,
    jobs: Arc<ProofJobController>,
    submitter: Arc<VerificationSubmitter>,
    store: Arc<dyn CheckpointStore>,
    config: Arc<PipelineConfig>,
}

struct Tracker<'a> {
    request_id: &'a RequestId,
    state: PipelineState,
}

impl<'a> Tracker<'a> {
    fn advance(&mut self, next: PipelineState) {
        debug!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "pipeline transition"
        );
        self.state = next;
    }

    fn fail(&mut self, error: PipelineError, stage: Stage) -> PipelineFailure {
        self.advance(PipelineState::Failed(stage));
        if error.resumable() {
            warn!(request_id = %self.request_id, %stage, "{}; request can be resumed", error);
        } else {
            error!(request_id = %self.request_id, %stage, kind = error.kind(), "{}", error);
        }
        error.at(stage)
    }
}

impl EmailPipeline {
    pub fn new(
        config: PipelineConfig,
        preverifier: Arc<dyn Preverifier>,
        prover: Arc<dyn ProverClient>,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let jobs = ProofJobController::new(
            prover,
            store.clone(),
            config.chain_id,
            config.prover_function.clone(),
            config.proving_policy.clone(),
        );
        let submitter = VerificationSubmitter::new(
            chain,
            store.clone(),
            config.verifier_selector,
            config.supported_proof_schemas.clone(),
        );
        Self {
            canonicalizer: Arc::new(Canonicalizer::new(config.dedup_headers.iter())),
            preverifier,
            jobs: Arc::new(jobs),
            submitter: Arc::new(submitter),
            store,
            config: Arc::new(config),
        }
    }

    pub fn options(&self) -> PipelineOptions {
        self.config.options
    }

    /// Runs every remaining stage of `request`.
    ///
    /// A request that already has checkpoints picks up after the last one:
    /// a stored proof skips proving, a stored job handle is polled instead of
    /// resubmitted and a stored transaction is awaited instead of re-sent.
    pub async fn run(&self, request: PipelineRequest) -> VerificationOutcome {
        let PipelineRequest {
            request_id,
            email,
            predicate,
            prover_address,
            verifier_address,
        } = request;
        let prover = prover_address.unwrap_or(self.config.prover_address);
        let verifier = verifier_address.unwrap_or(self.config.verifier_address);

        let canonical = self.canonicalizer.canonicalize(email);
        let request_id = request_id
            .unwrap_or_else(|| RequestId::derive(&canonical, &predicate, prover, verifier));
        let mut tracker = Tracker {
            request_id: &request_id,
            state: PipelineState::Ingested,
        };
        info!(%request_id, ?prover, ?verifier, pattern = predicate.pattern(), "pipeline started");

        if self.config.options.require_date_window
            && (predicate.date().is_none() || predicate.window().is_none())
        {
            let reason = "a date and a time window are required".to_string();
            let error = PipelineError::InvalidPredicate(reason);
            return Err(tracker.fail(error, Stage::Ingestion));
        }
        tracker.advance(PipelineState::Canonicalized);

        let checkpointed = self
            .store
            .get_proof(&request_id)
            .await
            .map_err(|e| tracker.fail(PipelineError::Checkpoint(e), Stage::Proving))?;
        let (proof, resumed_proof) = match checkpointed {
            Some(proof) => {
                info!(%request_id, "resuming from checkpointed proof");
                tracker.advance(PipelineState::Proved);
                (proof, true)
            }
            None => self.prove(&mut tracker, canonical, &predicate, prover).await?,
        };

        let (receipt, resumed_tx) = self.verify(&mut tracker, &proof, verifier).await?;
        tracker.advance(PipelineState::Verified);
        info!(
            %request_id,
            tx_hash = ?receipt.tx_hash,
            confirmations = receipt.confirmations,
            "email verified"
        );
        Ok(Verified {
            request_id: request_id.clone(),
            proof_result: proof,
            receipt,
            resumed: resumed_proof || resumed_tx,
        })
    }

    async fn prove(
        &self,
        tracker: &mut Tracker<'_>,
        canonical: CanonicalEmail,
        predicate: &MatchPredicate,
        prover: Address,
    ) -> Result<(ProofResult, bool), PipelineFailure> {
        let request_id = tracker.request_id;
        let stored_job = self
            .store
            .get_job(request_id)
            .await
            .map_err(|e| tracker.fail(PipelineError::Checkpoint(e), Stage::Proving))?;
        let resumed = stored_job.is_some();
        let mut job = match stored_job {
            Some(handle) => {
                info!(%request_id, job = %handle, "resuming proof job");
                tracker.advance(PipelineState::Proving);
                self.jobs.resume(handle, predicate, prover)
            }
            None => {
                let artifact = self
                    .preverify(canonical)
                    .await
                    .map_err(|e| tracker.fail(e, Stage::Preverification))?;
                tracker.advance(PipelineState::Preverified);
                let job = self
                    .jobs
                    .submit(request_id, &artifact, predicate, prover)
                    .await
                    .map_err(|e| tracker.fail(e, Stage::Proving))?;
                tracker.advance(PipelineState::Proving);
                job
            }
        };
        let proof = self
            .jobs
            .await_completion(request_id, &mut job)
            .await
            .map_err(|e| tracker.fail(e, Stage::Proving))?;
        tracker.advance(PipelineState::Proved);
        Ok((proof, resumed))
    }

    async fn preverify(&self, canonical: CanonicalEmail) -> Result<UnverifiedEmail, PipelineError> {
        let preverifier = self.preverifier.clone();
        let outcome = tokio::task::spawn_blocking(move || preverifier.preverify(canonical))
            .await
            .map_err(|e| PipelineError::MalformedEmail(format!("preverifier panicked: {e}")))?;
        outcome.map_err(|e| match e {
            PreverifyError::Malformed(reason) => PipelineError::MalformedEmail(reason),
            PreverifyError::KeyLookup(reason) => PipelineError::DkimKeyLookup(reason),
        })
    }

    async fn verify(
        &self,
        tracker: &mut Tracker<'_>,
        proof: &ProofResult,
        verifier: Address,
    ) -> Result<(Receipt, bool), PipelineFailure> {
        let request_id = tracker.request_id;
        let stored_tx = self
            .store
            .get_transaction(request_id)
            .await
            .map_err(|e| tracker.fail(PipelineError::Checkpoint(e), Stage::Verification))?;
        let resumed = stored_tx.is_some();
        let mut tx = match stored_tx {
            Some(tx_hash) => {
                info!(%request_id, ?tx_hash, "resuming confirmation wait");
                self.submitter.resume(tx_hash, verifier)
            }
            None => self
                .submitter
                .broadcast(request_id, verifier, proof)
                .await
                .map_err(|e| tracker.fail(e, Stage::Verification))?,
        };
        tracker.advance(PipelineState::Verifying);
        let receipt = self
            .submitter
            .await_confirmation(
                &mut tx,
                self.config.required_confirmations,
                &self.config.confirmation_policy,
            )
            .await
            .map_err(|e| tracker.fail(e, Stage::Verification))?;
        Ok((receipt, resumed))
    }
}
