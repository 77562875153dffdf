#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use relayer::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VERIFY_SELECTOR: [u8; 4] = hex_literal::hex!("8e760afe");

pub const ALICE_EMAIL: &str = "DKIM-Signature: v=1; a=rsa-sha256; d=example.com; s=sel1;\r\n\
\tbh=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=; b=c2lnbmF0dXJl\r\n\
DKIM-Signature: v=1; a=rsa-sha256; d=example.com; s=sel1;\r\n\
\tbh=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=; b=c2lnbmF0dXJl\r\n\
From: Alice <alice@example.com>\r\n\
To: bob@example.org\r\n\
Subject: Proof of sending\r\n\
Date: Fri, 15 Nov 2024 20:40:00 +0000\r\n\
\r\n\
Hello Bob\r\n";

pub fn email_for(sender: &str) -> String {
    ALICE_EMAIL.replace("alice@example.com", sender)
}

pub fn proof(schema_version: u32) -> ProofResult {
    ProofResult {
        schema_version,
        arguments: Bytes::from(vec![0x42; 64]),
    }
}

#[derive(Debug, Clone)]
pub enum Poll {
    Pending,
    Done(ProofResult),
    Fail(&'static str),
}

/// Prover answering polls from a script shared by all jobs; the last entry
/// repeats.
pub struct MockProver {
    script: Mutex<Vec<Poll>>,
    cursor: Mutex<usize>,
    pub calls: Mutex<Vec<ProverCall>>,
    pub polls: AtomicUsize,
}

impl MockProver {
    pub fn new(script: Vec<Poll>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn submits(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProverClient for MockProver {
    async fn submit(&self, call: &ProverCall) -> Result<JobHandle> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call.clone());
        Ok(JobHandle(format!("0xjob{}", calls.len())))
    }

    async fn poll(&self, _handle: &JobHandle) -> Result<JobStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let entry = script[(*cursor).min(script.len() - 1)].clone();
        *cursor += 1;
        Ok(match entry {
            Poll::Pending => JobStatus::Pending,
            Poll::Done(result) => JobStatus::Completed(result),
            Poll::Fail(reason) => JobStatus::Failed(reason.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Mined {
    Absent,
    Depth(u64),
    Reverted,
}

/// Ledger whose receipts follow a script per transaction; the last entry
/// repeats.
pub struct MockLedger {
    script: Mutex<Vec<Mined>>,
    receipt_polls: Mutex<Vec<(H256, usize)>>,
    pub broadcasts: Mutex<Vec<ContractCall>>,
    pub hold_broadcasts: AtomicBool,
    pub fail_broadcasts: AtomicBool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockLedger {
    pub fn new(script: Vec<Mined>) -> Self {
        Self {
            script: Mutex::new(script),
            receipt_polls: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            hold_broadcasts: AtomicBool::new(false),
            fail_broadcasts: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: Vec<Mined>) {
        *self.script.lock().unwrap() = script;
        self.receipt_polls.lock().unwrap().clear();
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    /// Receipt lookups across every transaction since the last script change.
    pub fn receipt_poll_count(&self) -> usize {
        self.receipt_polls.lock().unwrap().iter().map(|(_, count)| count).sum()
    }
}

#[async_trait]
impl ChainClient for MockLedger {
    fn signer_address(&self) -> Address {
        Address::repeat_byte(0xaa)
    }

    async fn broadcast(&self, call: &ContractCall) -> Result<H256> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.hold_broadcasts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(anyhow!("nonce too low"));
        }
        let mut broadcasts = self.broadcasts.lock().unwrap();
        broadcasts.push(call.clone());
        Ok(H256::from_low_u64_be(broadcasts.len() as u64))
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus> {
        let script = self.script.lock().unwrap();
        let mut polls = self.receipt_polls.lock().unwrap();
        let index = match polls.iter_mut().find(|(hash, _)| *hash == tx_hash) {
            Some((_, count)) => {
                *count += 1;
                *count - 1
            }
            None => {
                polls.push((tx_hash, 1));
                0
            }
        };
        Ok(match script[index.min(script.len() - 1)] {
            Mined::Absent => ReceiptStatus::Absent,
            Mined::Depth(confirmations) => ReceiptStatus::Confirmed(Receipt {
                tx_hash,
                block_number: 100,
                confirmations,
                gas_used: None,
            }),
            Mined::Reverted => ReceiptStatus::Reverted { block_number: 100 },
        })
    }
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::new(
        31337,
        Address::repeat_byte(0x01),
        Address::repeat_byte(0x02),
        VERIFY_SELECTOR,
    );
    config.proving_policy = RetryPolicy::fixed(10, Duration::from_millis(1));
    config.confirmation_policy = RetryPolicy::fixed(10, Duration::from_millis(1));
    config
}

pub struct Harness {
    pub pipeline: EmailPipeline,
    pub prover: Arc<MockProver>,
    pub ledger: Arc<MockLedger>,
    pub store: Arc<SledCheckpointStore>,
}

impl Harness {
    pub fn new(config: PipelineConfig, prover: MockProver, ledger: MockLedger) -> Self {
        let prover = Arc::new(prover);
        let ledger = Arc::new(ledger);
        let store = Arc::new(SledCheckpointStore::temporary().unwrap());
        let pipeline = EmailPipeline::new(
            config,
            Arc::new(MailPreverifier::offline()),
            prover.clone(),
            ledger.clone(),
            store.clone(),
        );
        Self {
            pipeline,
            prover,
            ledger,
            store,
        }
    }

    /// Prover completes after two polls, ledger confirms on the third.
    pub fn happy_path() -> Self {
        Self::new(
            test_config(),
            MockProver::new(vec![Poll::Pending, Poll::Done(proof(1))]),
            MockLedger::new(vec![Mined::Absent, Mined::Absent, Mined::Depth(2)]),
        )
    }
}

pub fn alice_request() -> PipelineRequest {
    PipelineRequest::new(
        EmailMessage::new(ALICE_EMAIL),
        MatchPredicate::for_address("alice@example.com").unwrap(),
    )
}
