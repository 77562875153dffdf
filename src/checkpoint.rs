//! Durable per-request checkpoints.
//!
//! Each pipeline stage with a side effect records its result here before the
//! request moves on: the prover job handle, the completed proof, and the
//! verification transaction hash. A re-run of the same request picks up from
//! the latest recorded step instead of repeating it.

use crate::canonicalizer::CanonicalEmail;
use crate::predicate::MatchPredicate;
use crate::prover::{JobHandle, ProofResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Content-derived id: the same email, predicate and contracts always
    /// map to the same checkpoint.
    pub fn derive(
        canonical: &CanonicalEmail,
        predicate: &MatchPredicate,
        prover: Address,
        verifier: Address,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update([0u8]);
        hasher.update(predicate.pattern().as_bytes());
        hasher.update([0u8]);
        hasher.update(predicate.date().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        if let Some(window) = predicate.window() {
            hasher.update(window.start.as_bytes());
            hasher.update(b"-");
            hasher.update(window.end.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(prover.as_bytes());
        hasher.update(verifier.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every `put_*` keeps the first value written for a request and returns the
/// value that ended up stored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put_job(&self, id: &RequestId, job: &JobHandle) -> Result<JobHandle>;
    async fn get_job(&self, id: &RequestId) -> Result<Option<JobHandle>>;
    async fn put_proof(&self, id: &RequestId, proof: &ProofResult) -> Result<ProofResult>;
    async fn get_proof(&self, id: &RequestId) -> Result<Option<ProofResult>>;
    async fn put_transaction(&self, id: &RequestId, tx_hash: H256) -> Result<H256>;
    async fn get_transaction(&self, id: &RequestId) -> Result<Option<H256>>;
}

#[derive(Debug, Clone)]
pub struct SledCheckpointStore {
    db: sled::Db,
    jobs: sled::Tree,
    proofs: sled::Tree,
    transactions: sled::Tree,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open checkpoint store at {}", path.display()))?;
        Self::from_db(db)
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            jobs: db.open_tree("jobs")?,
            proofs: db.open_tree("proofs")?,
            transactions: db.open_tree("transactions")?,
            db,
        })
    }

    async fn insert_once<T>(&self, tree: &sled::Tree, id: &RequestId, value: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let encoded = serde_json::to_vec(value)?;
        let swapped = tree.compare_and_swap(id.as_str(), None as Option<&[u8]>, Some(encoded))?;
        let stored = match swapped {
            Ok(()) => value.clone(),
            Err(conflict) => match conflict.current {
                Some(current) => serde_json::from_slice(&current)?,
                None => value.clone(),
            },
        };
        self.db.flush_async().await?;
        Ok(stored)
    }

    fn load<T: DeserializeOwned>(tree: &sled::Tree, id: &RequestId) -> Result<Option<T>> {
        tree.get(id.as_str())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn put_job(&self, id: &RequestId, job: &JobHandle) -> Result<JobHandle> {
        self.insert_once(&self.jobs, id, job).await
    }

    async fn get_job(&self, id: &RequestId) -> Result<Option<JobHandle>> {
        Self::load(&self.jobs, id)
    }

    async fn put_proof(&self, id: &RequestId, proof: &ProofResult) -> Result<ProofResult> {
        self.insert_once(&self.proofs, id, proof).await
    }

    async fn get_proof(&self, id: &RequestId) -> Result<Option<ProofResult>> {
        Self::load(&self.proofs, id)
    }

    async fn put_transaction(&self, id: &RequestId, tx_hash: H256) -> Result<H256> {
        self.insert_once(&self.transactions, id, &tx_hash).await
    }

    async fn get_transaction(&self, id: &RequestId) -> Result<Option<H256>> {
        Self::load(&self.transactions, id)
    }
}
