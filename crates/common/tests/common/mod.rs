//! Shared test utilities for vault, sharing and inscription integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use parking_lot::Mutex;

use common::inscription::{
    ChainClient, ChainError, InscriptionBuilder, InscriptionConfig, MemoryReceiptStore, Utxo,
};
use common::wallet::{DerivedChild, KdfParams, MemoryVaultStore, VaultConfig, VaultHandle};

/// A vault over an in-memory store with cheap KDF parameters
pub fn memory_vault() -> VaultHandle<MemoryVaultStore> {
    VaultHandle::new(MemoryVaultStore::new(), fast_config())
}

pub fn fast_config() -> VaultConfig {
    VaultConfig {
        network: bitcoin::Network::Bitcoin,
        kdf: KdfParams::fast_insecure(),
    }
}

/// A transaction paying `value` to `script_pubkey` at output `vout`
pub fn funding_transaction(script_pubkey: ScriptBuf, value: u64, vout: usize) -> Transaction {
    let mut output: Vec<TxOut> = (0..vout)
        .map(|_| TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::new(),
        })
        .collect();
    output.push(TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    });
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        }],
        output,
    }
}

pub fn decode_transaction(raw_hex: &str) -> Transaction {
    bitcoin::consensus::deserialize(&hex::decode(raw_hex).unwrap()).unwrap()
}

#[derive(Default)]
struct ScriptedState {
    unspent: HashMap<String, Vec<Utxo>>,
    transactions: HashMap<String, String>,
    broadcast_replies: VecDeque<Result<String, ChainError>>,
    broadcasts: Vec<String>,
    unspent_calls: usize,
    stall: bool,
}

/// In-memory chain service with scripted broadcast replies
///
/// Broadcasts succeed with the transaction's own txid unless a reply was
/// queued with [`ScriptedChain::reply`].
#[derive(Default, Clone)]
pub struct ScriptedChain {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund `child`'s address with a single output of `value` satoshis
    pub fn fund(&self, child: &DerivedChild, value: u64) -> Utxo {
        let tx = funding_transaction(child.address().script_pubkey(), value, 1);
        let txid = tx.compute_txid().to_string();
        let utxo = Utxo {
            tx_hash: txid.clone(),
            tx_pos: 1,
            value,
        };

        let mut state = self.state.lock();
        state
            .transactions
            .insert(txid, hex::encode(bitcoin::consensus::serialize(&tx)));
        state
            .unspent
            .entry(child.address().to_string())
            .or_default()
            .push(utxo.clone());
        utxo
    }

    pub fn reply(&self, reply: Result<String, ChainError>) {
        self.state.lock().broadcast_replies.push_back(reply);
    }

    /// Make every call hang until the caller gives up
    pub fn stall(&self) {
        self.state.lock().stall = true;
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().broadcasts.clone()
    }

    pub fn unspent_calls(&self) -> usize {
        self.state.lock().unspent_calls
    }

    async fn maybe_stall(&self) {
        let stall = self.state.lock().stall;
        if stall {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn unspent(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        self.maybe_stall().await;
        let mut state = self.state.lock();
        state.unspent_calls += 1;
        Ok(state.unspent.get(address).cloned().unwrap_or_default())
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, ChainError> {
        self.maybe_stall().await;
        self.state
            .lock()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::InvalidResponse(format!("unknown tx {}", txid)))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, ChainError> {
        self.maybe_stall().await;
        let mut state = self.state.lock();
        state.broadcasts.push(raw_hex.to_string());
        match state.broadcast_replies.pop_front() {
            Some(reply) => reply,
            None => Ok(decode_transaction(raw_hex).compute_txid().to_string()),
        }
    }
}

pub fn test_config() -> InscriptionConfig {
    InscriptionConfig {
        fee_per_kb: 500,
        dust_limit: 546,
        token_output_value: 1,
        timeout: Duration::from_secs(5),
    }
}

pub fn builder(chain: &ScriptedChain, receipts: &MemoryReceiptStore) -> InscriptionBuilder {
    InscriptionBuilder::new(
        Arc::new(chain.clone()),
        Arc::new(receipts.clone()),
        test_config(),
    )
}
