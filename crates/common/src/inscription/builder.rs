use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::script::{Builder as ScriptBuilder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use super::batch::{BatchOutcome, BatchReport, SchedulePolicy};
use super::chain::{ChainClient, ChainError, Utxo, DEFAULT_REQUEST_TIMEOUT};
use super::payload::{Inscription, PayloadError};
use super::receipt::{InscriptionReceipt, ReceiptError, ReceiptKey, ReceiptStore};
use crate::wallet::DerivedChild;

// P2PKH size estimates, in bytes
const TX_OVERHEAD: u64 = 10;
const INPUT_SIZE: u64 = 148;
const OUTPUT_SIZE: u64 = 34;

/// `SIGHASH_ALL | SIGHASH_FORKID`, the only sighash type the relay's chain accepts
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

#[derive(Debug, thiserror::Error)]
pub enum InscriptionError {
    /// Nothing the network can fix: the derived address needs funding
    #[error("insufficient funds at {address}: need {needed} sat, have {available} sat")]
    InsufficientFunds {
        address: String,
        needed: u64,
        available: u64,
    },
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),
    #[error("network timeout")]
    NetworkTimeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response from chain service: {0}")]
    InvalidResponse(String),
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("receipt error: {0}")]
    Receipt(#[from] ReceiptError),
    #[error("signing error: {0}")]
    Signing(String),
}

impl InscriptionError {
    /// Whether trying again later might succeed without any user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InscriptionError::BroadcastRejected(_)
                | InscriptionError::NetworkTimeout
                | InscriptionError::Transport(_)
        )
    }
}

impl From<ChainError> for InscriptionError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Timeout => InscriptionError::NetworkTimeout,
            ChainError::Transport(e) => InscriptionError::Transport(e),
            ChainError::Rejected(e) => InscriptionError::BroadcastRejected(e),
            ChainError::InvalidResponse(e) => InscriptionError::InvalidResponse(e),
            ChainError::UrlParse(e) => InscriptionError::InvalidResponse(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InscriptionConfig {
    /// satoshis per 1000 bytes
    pub fee_per_kb: u64,
    pub dust_limit: u64,
    /// Value of the output carrying a token mint
    pub token_output_value: u64,
    /// Deadline for each call to the chain service
    pub timeout: Duration,
}

impl Default for InscriptionConfig {
    fn default() -> Self {
        Self {
            fee_per_kb: 500,
            dust_limit: 546,
            token_output_value: 1,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl InscriptionConfig {
    pub fn fee(&self, outputs: u64, payload_len: u64) -> u64 {
        let size = TX_OVERHEAD + INPUT_SIZE + OUTPUT_SIZE * outputs + payload_len;
        (size * self.fee_per_kb).div_ceil(1000)
    }
}

/// Turns a commitment into a signed, broadcast transaction paid for by a
/// derived key
///
/// Every attempt is recorded in the receipt store before it is broadcast, so
/// retrying an inscription never produces a second transaction for the same
/// payload and derivation path.
pub struct InscriptionBuilder {
    chain: Arc<dyn ChainClient>,
    receipts: Arc<dyn ReceiptStore>,
    config: InscriptionConfig,
}

impl InscriptionBuilder {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        receipts: Arc<dyn ReceiptStore>,
        config: InscriptionConfig,
    ) -> Self {
        Self {
            chain,
            receipts,
            config,
        }
    }

    pub fn config(&self) -> &InscriptionConfig {
        &self.config
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, InscriptionError> {
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(InscriptionError::NetworkTimeout),
        }
    }

    /// Inscribe `inscription` from `child`'s address
    ///
    /// Returns the existing receipt if this exact inscription was already
    /// made from this derivation path, and resubmits the same signed
    /// transaction if a previous attempt never got an answer.
    pub async fn inscribe(
        &self,
        child: &DerivedChild,
        inscription: &Inscription,
    ) -> Result<InscriptionReceipt, InscriptionError> {
        let commitment = inscription.commitment();
        let derivation_path = child.purpose_path();
        let payload_hash = inscription.fingerprint()?;
        let key = ReceiptKey {
            commitment_hash: commitment,
            derivation_path: &derivation_path,
            payload_hash: &payload_hash,
        };

        let existing = self.receipts.find(key)?;
        if let Some(receipt) = &existing {
            if receipt.is_confirmed() {
                tracing::info!(
                    commitment,
                    txid = receipt.txid.as_deref(),
                    "commitment already inscribed"
                );
                return Ok(receipt.clone());
            }
            if receipt.raw_tx.is_some() {
                return self.submit(receipt.clone()).await;
            }
        }

        let raw_tx = self.build(child, inscription).await?;
        match existing {
            Some(mut receipt) => {
                receipt.raw_tx = Some(raw_tx);
                self.receipts.update(&receipt)?;
                self.submit(receipt).await
            }
            None => {
                let mut receipt = InscriptionReceipt::pending(key);
                receipt.raw_tx = Some(raw_tx);
                self.receipts.append(receipt.clone())?;
                self.submit(receipt).await
            }
        }
    }

    /// Select funds, build and sign; returns the raw transaction hex
    async fn build(
        &self,
        child: &DerivedChild,
        inscription: &Inscription,
    ) -> Result<String, InscriptionError> {
        let address = child.address().to_string();
        let destination = child.address().script_pubkey();
        let payload = inscription.script(&destination)?;
        let payload_value = inscription
            .output_value(Amount::from_sat(self.config.token_output_value))
            .to_sat();

        let single_fee = self.config.fee(1, payload.len() as u64);
        let needed = payload_value + single_fee;

        let utxos = self.call(self.chain.unspent(&address)).await?;
        let Some(utxo) = utxos.into_iter().max_by_key(|u| u.value) else {
            tracing::warn!(%address, "no spendable outputs at derived address");
            return Err(InscriptionError::InsufficientFunds {
                address,
                needed,
                available: 0,
            });
        };
        if utxo.value < needed {
            return Err(InscriptionError::InsufficientFunds {
                address,
                needed,
                available: utxo.value,
            });
        }

        let previous = self.previous_output(&utxo, &destination).await?;

        let change_fee = self.config.fee(2, payload.len() as u64);
        let change = utxo
            .value
            .checked_sub(payload_value + change_fee)
            .filter(|change| *change > self.config.dust_limit);

        let mut output = vec![TxOut {
            value: Amount::from_sat(payload_value),
            script_pubkey: payload,
        }];
        if let Some(change) = change {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: destination.clone(),
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: previous,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output,
        };
        tx.input[0].script_sig = sign(&tx, child, &destination, Amount::from_sat(utxo.value))?;

        tracing::info!(
            %address,
            kind = inscription.kind(),
            input = utxo.value,
            change = change.unwrap_or(0),
            txid = %tx.compute_txid(),
            "built inscription transaction"
        );
        Ok(hex::encode(bitcoin::consensus::serialize(&tx)))
    }

    /// Fetch the funding transaction and check it really pays `destination`
    async fn previous_output(
        &self,
        utxo: &Utxo,
        destination: &ScriptBuf,
    ) -> Result<OutPoint, InscriptionError> {
        let txid: Txid = utxo
            .tx_hash
            .parse()
            .map_err(|e| InscriptionError::InvalidResponse(format!("invalid txid: {}", e)))?;

        let raw = self.call(self.chain.raw_transaction(&utxo.tx_hash)).await?;
        let previous: Transaction = hex::decode(raw.trim())
            .ok()
            .and_then(|bytes| bitcoin::consensus::deserialize(&bytes).ok())
            .ok_or_else(|| {
                InscriptionError::InvalidResponse(format!("undecodable transaction {}", txid))
            })?;
        if previous.compute_txid() != txid {
            return Err(InscriptionError::InvalidResponse(format!(
                "fetched transaction does not hash to {}",
                txid
            )));
        }

        let spent = previous
            .output
            .get(utxo.tx_pos as usize)
            .ok_or_else(|| {
                InscriptionError::InvalidResponse(format!("{} has no output {}", txid, utxo.tx_pos))
            })?;
        if spent.script_pubkey != *destination || spent.value.to_sat() != utxo.value {
            return Err(InscriptionError::InvalidResponse(format!(
                "{}:{} does not pay the derived address",
                txid, utxo.tx_pos
            )));
        }

        Ok(OutPoint::new(txid, utxo.tx_pos))
    }

    /// Broadcast the receipt's pending transaction and record the outcome
    async fn submit(
        &self,
        mut receipt: InscriptionReceipt,
    ) -> Result<InscriptionReceipt, InscriptionError> {
        let Some(raw_tx) = receipt.raw_tx.clone() else {
            return Ok(receipt);
        };

        let txid = match self.call(self.chain.broadcast(&raw_tx)).await {
            Ok(txid) => txid,
            Err(InscriptionError::BroadcastRejected(reason)) if is_already_known(&reason) => {
                tracing::info!(%reason, "relay already has the transaction");
                local_txid(&raw_tx)?
            }
            Err(InscriptionError::BroadcastRejected(reason)) => {
                tracing::warn!(
                    commitment = %receipt.commitment_hash,
                    %reason,
                    "broadcast rejected"
                );
                receipt.raw_tx = None;
                self.receipts.update(&receipt)?;
                return Err(InscriptionError::BroadcastRejected(reason));
            }
            Err(e) => {
                tracing::warn!(
                    commitment = %receipt.commitment_hash,
                    error = %e,
                    "broadcast did not complete; keeping signed transaction for retry"
                );
                return Err(e);
            }
        };

        receipt.txid = Some(txid);
        receipt.raw_tx = None;
        self.receipts.update(&receipt)?;
        tracing::info!(
            commitment = %receipt.commitment_hash,
            txid = receipt.txid.as_deref(),
            "inscription broadcast"
        );
        Ok(receipt)
    }

    /// Inscribe each item in order, waiting per `policy` in between
    ///
    /// A failed item is recorded and the batch moves on.
    pub async fn mint_batch(
        &self,
        child: &DerivedChild,
        items: Vec<Inscription>,
        policy: SchedulePolicy,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut consecutive_failures = 0u32;

        for (index, inscription) in items.into_iter().enumerate() {
            let delay = policy.delay(index, consecutive_failures);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = self.inscribe(child, &inscription).await;
            match &result {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(index, error = %e, "batch item failed");
                }
            }
            report.outcomes.push(BatchOutcome {
                index,
                inscription,
                result,
            });
        }

        tracing::info!(
            total = report.outcomes.len(),
            failed = report.failed().len(),
            "batch finished"
        );
        report
    }
}

/// Signature digest for `input_index` under the fork-id scheme
///
/// This is the BIP143 preimage: it commits to the spent `value`, and
/// `script_code` is the previous output's P2PKH script. Only `SIGHASH_ALL`
/// style types are supported.
pub fn forkid_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: Amount,
    sighash_type: u32,
) -> Result<sha256d::Hash, InscriptionError> {
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| InscriptionError::Signing(format!("no input {}", input_index)))?;

    let prevouts: Vec<u8> = tx
        .input
        .iter()
        .flat_map(|txin| serialize(&txin.previous_output))
        .collect();
    let sequences: Vec<u8> = tx
        .input
        .iter()
        .flat_map(|txin| txin.sequence.0.to_le_bytes())
        .collect();
    let outputs: Vec<u8> = tx.output.iter().flat_map(serialize).collect();

    let mut preimage = Vec::new();
    preimage.extend(tx.version.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&prevouts).to_byte_array());
    preimage.extend(sha256d::Hash::hash(&sequences).to_byte_array());
    preimage.extend(serialize(&input.previous_output));
    preimage.extend(serialize(script_code));
    preimage.extend(value.to_sat().to_le_bytes());
    preimage.extend(input.sequence.0.to_le_bytes());
    preimage.extend(sha256d::Hash::hash(&outputs).to_byte_array());
    preimage.extend(tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend(sighash_type.to_le_bytes());
    Ok(sha256d::Hash::hash(&preimage))
}

/// `SIGHASH_ALL|FORKID` P2PKH signature script for input 0
fn sign(
    tx: &Transaction,
    child: &DerivedChild,
    script_pubkey: &ScriptBuf,
    value: Amount,
) -> Result<ScriptBuf, InscriptionError> {
    let sighash = forkid_signature_hash(tx, 0, script_pubkey, value, SIGHASH_ALL_FORKID)?;

    let message = Message::from_digest(sighash.to_byte_array());
    let signature = Secp256k1::signing_only().sign_ecdsa(&message, child.private_key());

    let mut signature_bytes = signature.serialize_der().to_vec();
    signature_bytes.push(SIGHASH_ALL_FORKID as u8);

    let signature_push = PushBytesBuf::try_from(signature_bytes)
        .map_err(|e| InscriptionError::Signing(e.to_string()))?;
    let key_push = PushBytesBuf::try_from(child.public_key().serialize().to_vec())
        .map_err(|e| InscriptionError::Signing(e.to_string()))?;

    Ok(ScriptBuilder::new()
        .push_slice(&signature_push)
        .push_slice(&key_push)
        .into_script())
}

fn is_already_known(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("already known")
        || reason.contains("already-known")
        || reason.contains("already in the mempool")
        || reason.contains("already in block chain")
}

fn local_txid(raw_tx: &str) -> Result<String, InscriptionError> {
    hex::decode(raw_tx)
        .ok()
        .and_then(|bytes| bitcoin::consensus::deserialize::<Transaction>(&bytes).ok())
        .map(|tx| tx.compute_txid().to_string())
        .ok_or_else(|| InscriptionError::Signing("stored transaction is undecodable".into()))
}
