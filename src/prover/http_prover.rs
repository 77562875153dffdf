use crate::prover::{JobHandle, JobStatus, ProofResult, ProverCall, ProverClient};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const SUBMIT_METHOD: &str = "v_call";
const RECEIPT_METHOD: &str = "v_getProofReceipt";

/// JSON-RPC 2.0 client for a remote prover service.
#[derive(Debug)]
pub struct HttpProver {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReceiptState {
    #[serde(alias = "queued", alias = "running")]
    Pending,
    #[serde(alias = "ready", alias = "completed")]
    Done,
    #[serde(alias = "error")]
    Failed,
}

#[derive(Debug, Deserialize)]
struct ProofReceipt {
    status: ReceiptState,
    data: Option<ProofResult>,
    error: Option<String>,
}

impl HttpProver {
    pub fn construct(url: &str) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(anyhow!("{} failed ({}): {}", method, error.code, error.message));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{} returned neither result nor error", method))
    }
}

#[async_trait]
impl ProverClient for HttpProver {
    async fn submit(&self, call: &ProverCall) -> Result<JobHandle> {
        let params = json!([
            { "to": call.target, "data": call.calldata() },
            { "chain_id": call.chain_id },
        ]);
        let hash: String = self.call(SUBMIT_METHOD, params).await?;
        debug!(job = %hash, "proof job accepted");
        Ok(JobHandle(hash))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        let receipt: ProofReceipt = self
            .call(RECEIPT_METHOD, json!({ "hash": handle.0 }))
            .await?;
        Ok(match receipt.status {
            ReceiptState::Pending => JobStatus::Pending,
            ReceiptState::Done => JobStatus::Completed(
                receipt
                    .data
                    .ok_or_else(|| anyhow!("job {} is done but carries no proof", handle))?,
            ),
            ReceiptState::Failed => JobStatus::Failed(
                receipt
                    .error
                    .unwrap_or_else(|| "unknown prover error".to_string()),
            ),
        })
    }
}
