mod http_prover;
use crate::abi::{encode_call, Selector};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, Bytes};
pub use http_prover::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle the prover hands out for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof payload of a completed job: the ABI-encoded, ordered arguments of
/// the verifier call, tagged with the proof format version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    pub schema_version: u32,
    pub arguments: Bytes,
}

/// A call on the prover contract, executed and proven by the prover service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProverCall {
    pub target: Address,
    pub selector: Selector,
    pub chain_id: u64,
    pub arguments: Bytes,
}

impl ProverCall {
    pub fn calldata(&self) -> Bytes {
        encode_call(self.selector, &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed(ProofResult),
    Failed(String),
}

#[async_trait]
pub trait ProverClient: Send + Sync {
    async fn submit(&self, call: &ProverCall) -> Result<JobHandle>;
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus>;
}
