use std::str::FromStr;

use crate::chain_client::{ChainClient, ContractCall, Receipt, ReceiptStatus};
use anyhow::Result;
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::Provider;
use tracing::{debug, info};

/// Ledger client signing with a local key over an HTTP JSON-RPC provider.
#[derive(Debug, Clone)]
pub struct EthersClient {
    signer: SignerMiddleware<Provider<Http>, LocalWallet>,
}

#[async_trait]
impl ChainClient for EthersClient {
    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn broadcast(&self, call: &ContractCall) -> Result<H256> {
        let pending: Option<BlockId> = Some(BlockNumber::Pending.into());
        // The pending count includes unmined sends, so consecutive broadcasts
        // get consecutive nonces.
        let nonce = self
            .signer
            .get_transaction_count(self.signer.address(), pending)
            .await?;
        let tx = TransactionRequest::new()
            .from(self.signer.address())
            .to(call.target)
            .nonce(nonce)
            .data(call.calldata());
        debug!(target_contract = ?call.target, %nonce, "sending transaction");
        let pending_tx = self.signer.send_transaction(tx, pending).await?;
        let tx_hash = pending_tx.tx_hash();
        info!(?tx_hash, "transaction broadcast");
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus> {
        let receipt = match self.signer.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(ReceiptStatus::Absent),
        };
        let block_number = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok(ReceiptStatus::Absent),
        };
        if receipt.status == Some(U64::zero()) {
            return Ok(ReceiptStatus::Reverted { block_number });
        }
        let head = self.signer.get_block_number().await?.as_u64();
        Ok(ReceiptStatus::Confirmed(Receipt {
            tx_hash,
            block_number,
            confirmations: head.saturating_sub(block_number) + 1,
            gas_used: receipt.gas_used,
        }))
    }
}

impl EthersClient {
    pub fn construct(private_key_hex: &str, rpc_url: &str, chain_id: u64) -> Result<Self> {
        let wallet = LocalWallet::from_str(private_key_hex)?;
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let signer = SignerMiddleware::new(provider, wallet.with_chain_id(chain_id));
        Ok(Self { signer })
    }
}
