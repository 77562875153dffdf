use crate::checkpoint::{CheckpointStore, RequestId};
use crate::error::PipelineError;
use crate::predicate::MatchPredicate;
use crate::preverifier::UnverifiedEmail;
use crate::prover::{JobHandle, JobStatus, ProofResult, ProverCall, ProverClient};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes};
use ethers::utils::id;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling,
    Completed,
    Failed(String),
    TimedOut,
}

/// One outstanding request to the prover.
#[derive(Debug, Clone)]
pub struct ProofJob {
    pub handle: JobHandle,
    pub prover: Address,
    pub predicate: MatchPredicate,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
}

/// Submits proof jobs and waits for them to finish.
pub struct ProofJobController {
    prover: Arc<dyn ProverClient>,
    store: Arc<dyn CheckpointStore>,
    chain_id: u64,
    function: String,
    policy: RetryPolicy,
}

impl ProofJobController {
    pub fn new(
        prover: Arc<dyn ProverClient>,
        store: Arc<dyn CheckpointStore>,
        chain_id: u64,
        function: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            prover,
            store,
            chain_id,
            function: function.into(),
            policy,
        }
    }

    /// Encodes `function(UnverifiedEmail, pattern[, date][, start, end])`.
    pub fn prover_call(
        &self,
        artifact: &UnverifiedEmail,
        predicate: &MatchPredicate,
        prover: Address,
    ) -> ProverCall {
        let mut types = vec!["(string,string[])", "string"];
        let mut tokens = vec![
            Token::Tuple(vec![
                Token::String(artifact.email.clone()),
                Token::Array(artifact.dns_records.iter().cloned().map(Token::String).collect()),
            ]),
            Token::String(predicate.pattern().to_string()),
        ];
        if let Some(date) = predicate.date() {
            types.push("string");
            tokens.push(Token::String(date.to_string()));
        }
        if let Some(window) = predicate.window() {
            types.extend(["string", "string"]);
            tokens.push(Token::String(window.start.clone()));
            tokens.push(Token::String(window.end.clone()));
        }
        let signature = format!("{}({})", self.function, types.join(","));
        ProverCall {
            target: prover,
            selector: id(&signature),
            chain_id: self.chain_id,
            arguments: Bytes::from(encode(&tokens)),
        }
    }

    /// Sends the job to the prover. Never retried here: a resubmission may
    /// cost a second proof.
    pub async fn submit(
        &self,
        request_id: &RequestId,
        artifact: &UnverifiedEmail,
        predicate: &MatchPredicate,
        prover: Address,
    ) -> Result<ProofJob, PipelineError> {
        let call = self.prover_call(artifact, predicate, prover);
        let handle = self
            .prover
            .submit(&call)
            .await
            .map_err(PipelineError::Submission)?;
        let handle = self
            .store
            .put_job(request_id, &handle)
            .await
            .map_err(PipelineError::Checkpoint)?;
        info!(%request_id, job = %handle, "proof job submitted");
        Ok(ProofJob {
            handle,
            prover,
            predicate: predicate.clone(),
            submitted_at: Utc::now(),
            state: JobState::Submitted,
        })
    }

    /// Rebuilds a job from a checkpointed handle so it can be polled again.
    pub fn resume(
        &self,
        handle: JobHandle,
        predicate: &MatchPredicate,
        prover: Address,
    ) -> ProofJob {
        ProofJob {
            handle,
            prover,
            predicate: predicate.clone(),
            submitted_at: Utc::now(),
            state: JobState::Submitted,
        }
    }

    /// Polls until the job completes, fails or the retry budget is spent. A
    /// completed proof is checkpointed before it is returned.
    pub async fn await_completion(
        &self,
        request_id: &RequestId,
        job: &mut ProofJob,
    ) -> Result<ProofResult, PipelineError> {
        job.state = JobState::Polling;
        let prover = self.prover.as_ref();
        let handle = &job.handle;
        let outcome = self
            .policy
            .poll(|attempt| async move {
                match prover.poll(handle).await {
                    Ok(JobStatus::Pending) => {
                        debug!(job = %handle, attempt, "proof pending");
                        Ok(None)
                    }
                    Ok(JobStatus::Completed(result)) => Ok(Some(result)),
                    Ok(JobStatus::Failed(reason)) => Err(reason),
                    Err(e) => {
                        warn!(job = %handle, attempt, "polling prover failed: {:#}", e);
                        Ok(None)
                    }
                }
            })
            .await;
        match outcome {
            Ok(Some(result)) => {
                let stored = self
                    .store
                    .put_proof(request_id, &result)
                    .await
                    .map_err(PipelineError::Checkpoint)?;
                job.state = JobState::Completed;
                info!(
                    %request_id,
                    job = %job.handle,
                    elapsed_ms = (Utc::now() - job.submitted_at).num_milliseconds(),
                    "proof completed"
                );
                Ok(stored)
            }
            Ok(None) => {
                job.state = JobState::TimedOut;
                Err(PipelineError::ProvingTimedOut {
                    job: job.handle.to_string(),
                    attempts: self.policy.max_attempts,
                })
            }
            Err(reason) => {
                job.state = JobState::Failed(reason.clone());
                Err(PipelineError::ProvingFailed(reason))
            }
        }
    }
}
