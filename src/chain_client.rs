mod ethers_client;
use crate::abi::{encode_call, Selector};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
pub use ethers_client::*;
use serde::{Deserialize, Serialize};

/// A state-changing call on a ledger contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    pub selector: Selector,
    pub arguments: Bytes,
}

impl ContractCall {
    pub fn calldata(&self) -> Bytes {
        encode_call(self.selector, &self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub confirmations: u64,
    pub gas_used: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Not mined yet, or unknown to the node.
    Absent,
    /// Mined and executed successfully, with the current confirmation depth.
    Confirmed(Receipt),
    /// Mined, but execution reverted.
    Reverted { block_number: u64 },
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account whose nonce sequence every broadcast consumes.
    fn signer_address(&self) -> Address;
    /// Callers serialize broadcasts, so the next nonce can be read from the
    /// node's pending transaction count.
    async fn broadcast(&self, call: &ContractCall) -> Result<H256>; // return transaction hash
    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus>;
}
