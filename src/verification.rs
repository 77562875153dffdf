use crate::abi::Selector;
use crate::chain_client::{ChainClient, ContractCall, Receipt, ReceiptStatus};
use crate::checkpoint::{CheckpointStore, RequestId};
use crate::error::PipelineError;
use crate::prover::ProofResult;
use crate::retry::RetryPolicy;
use ethers::types::{Address, H256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Broadcast,
    AwaitingConfirmations,
    Confirmed,
    Reverted,
    TimedOut,
}

/// A verifier call that has been handed to the ledger.
#[derive(Debug, Clone)]
pub struct VerificationTransaction {
    pub tx_hash: H256,
    pub verifier: Address,
    pub confirmations: u64,
    pub state: TxState,
}

/// Broadcasts proofs to the verifier contract and waits for finality.
///
/// All broadcasts of one submitter go through a single lock, so the signing
/// account's nonces are handed out in one sequence even when many requests
/// are verifying at the same time.
pub struct VerificationSubmitter {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn CheckpointStore>,
    selector: Selector,
    supported_schemas: Vec<u32>,
    nonce_lock: Mutex<()>,
}

impl VerificationSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn CheckpointStore>,
        selector: Selector,
        supported_schemas: Vec<u32>,
    ) -> Self {
        Self {
            chain,
            store,
            selector,
            supported_schemas,
            nonce_lock: Mutex::new(()),
        }
    }

    /// Sends the verifier call for `result`.
    ///
    /// Not idempotent. The transaction hash is checkpointed before the lock is
    /// released; if one is already recorded for the request, that transaction
    /// is returned instead of sending a second one.
    pub async fn broadcast(
        &self,
        request_id: &RequestId,
        verifier: Address,
        result: &ProofResult,
    ) -> Result<VerificationTransaction, PipelineError> {
        if !self.supported_schemas.contains(&result.schema_version) {
            return Err(PipelineError::UnsupportedProofSchema {
                found: result.schema_version,
                supported: self.supported_schemas.clone(),
            });
        }
        let call = ContractCall {
            target: verifier,
            selector: self.selector,
            arguments: result.arguments.clone(),
        };

        let _nonce = self.nonce_lock.lock().await;
        if let Some(tx_hash) = self
            .store
            .get_transaction(request_id)
            .await
            .map_err(PipelineError::Checkpoint)?
        {
            warn!(%request_id, ?tx_hash, "verification already broadcast, not sending again");
            return Ok(self.resume(tx_hash, verifier));
        }
        let tx_hash = self
            .chain
            .broadcast(&call)
            .await
            .map_err(PipelineError::Broadcast)?;
        let tx_hash = self
            .store
            .put_transaction(request_id, tx_hash)
            .await
            .map_err(PipelineError::Checkpoint)?;
        info!(
            %request_id,
            ?tx_hash,
            signer = ?self.chain.signer_address(),
            "verification broadcast"
        );
        Ok(VerificationTransaction {
            tx_hash,
            verifier,
            confirmations: 0,
            state: TxState::Broadcast,
        })
    }

    /// Tracks a transaction recorded by an earlier attempt.
    pub fn resume(&self, tx_hash: H256, verifier: Address) -> VerificationTransaction {
        VerificationTransaction {
            tx_hash,
            verifier,
            confirmations: 0,
            state: TxState::Broadcast,
        }
    }

    /// Polls the receipt until it has `required_confirmations`. Running out
    /// of polls says nothing about the transaction's fate.
    pub async fn await_confirmation(
        &self,
        tx: &mut VerificationTransaction,
        required_confirmations: u64,
        policy: &RetryPolicy,
    ) -> Result<Receipt, PipelineError> {
        tx.state = TxState::AwaitingConfirmations;
        let chain = self.chain.as_ref();
        let tx_hash = tx.tx_hash;
        let observed = AtomicU64::new(0);
        let observed = &observed;
        let outcome = policy
            .poll(|attempt| {
                async move {
                    match chain.get_receipt(tx_hash).await {
                        Ok(ReceiptStatus::Absent) => {
                            debug!(?tx_hash, attempt, "no receipt yet");
                            Ok(None)
                        }
                        Ok(ReceiptStatus::Confirmed(receipt)) => {
                            observed.store(receipt.confirmations, Ordering::Relaxed);
                            if receipt.confirmations >= required_confirmations {
                                Ok(Some(receipt))
                            } else {
                                debug!(
                                    ?tx_hash,
                                    attempt,
                                    confirmations = receipt.confirmations,
                                    "awaiting depth"
                                );
                                Ok(None)
                            }
                        }
                        Ok(ReceiptStatus::Reverted { block_number }) => Err(block_number),
                        Err(e) => {
                            warn!(?tx_hash, attempt, "fetching receipt failed: {:#}", e);
                            Ok(None)
                        }
                    }
                }
            })
            .await;
        tx.confirmations = observed.load(Ordering::Relaxed);
        match outcome {
            Ok(Some(receipt)) => {
                tx.state = TxState::Confirmed;
                info!(?tx_hash, confirmations = receipt.confirmations, "verification confirmed");
                Ok(receipt)
            }
            Ok(None) => {
                tx.state = TxState::TimedOut;
                Err(PipelineError::ConfirmationTimeout {
                    tx_hash,
                    attempts: policy.max_attempts,
                })
            }
            Err(block_number) => {
                tx.state = TxState::Reverted;
                warn!(?tx_hash, block_number, "verification reverted");
                Err(PipelineError::TransactionReverted { tx_hash })
            }
        }
    }
}
