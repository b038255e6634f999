//! Sign, submit and confirm transactions.
//!
//! A transaction moves through `Built -> Signed -> Submitted` and then ends
//! `Confirmed`, `Failed` or `TimedOut`. Ledger rejections are mapped onto
//! [`SolError`] variants from the transaction error the node reports,
//! looking at which program failed and with which custom code.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::error::SolError;
use crate::keypair::Keypair;
use crate::rpc::{CommitmentLevel, RpcClient, SignatureStatus};
use crate::spl_token::{ASSOCIATED_TOKEN_PROGRAM_ID, ERROR_INSUFFICIENT_FUNDS, TOKEN_PROGRAM_ID};
use crate::system_instruction::{
    ERROR_ACCOUNT_ALREADY_IN_USE, ERROR_RESULT_WITH_NEGATIVE_LAMPORTS, SYSTEM_PROGRAM_ID,
};
use crate::transaction::{Message, Signature, SignedTransaction, TransactionBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Processed,
    Confirmed,
    Finalized,
    Failed,
}

impl From<CommitmentLevel> for ConfirmationStatus {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => ConfirmationStatus::Processed,
            CommitmentLevel::Confirmed => ConfirmationStatus::Confirmed,
            CommitmentLevel::Finalized => ConfirmationStatus::Finalized,
        }
    }
}

/// Outcome of confirming one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub signature: Signature,
    pub status: ConfirmationStatus,
    pub slot: Option<u64>,
    /// Raw transaction error when `status` is `Failed`.
    pub error: Option<String>,
}

impl SubmissionReceipt {
    pub fn is_success(&self) -> bool {
        !matches!(
            self.status,
            ConfirmationStatus::Failed | ConfirmationStatus::Pending
        )
    }
}

/// Drives transactions through signing, submission and confirmation.
pub struct SubmissionClient {
    rpc: Arc<RpcClient>,
}

impl SubmissionClient {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// Sign against a freshly fetched blockhash.
    ///
    /// Signer coverage is checked before the blockhash request, so a
    /// missing key never costs a network round trip.
    pub async fn sign(
        &self,
        builder: &TransactionBuilder,
        signers: &[&Keypair],
    ) -> Result<SignedTransaction, SolError> {
        builder.check_signers(signers)?;
        let latest = self.rpc.get_latest_blockhash().await?;
        debug!("signing {} instruction(s) against {}", builder.instructions().len(), latest.blockhash);
        builder.sign(&latest.blockhash, signers)
    }

    /// Submit a signed transaction. `operation` describes the intent and is
    /// carried into any rejection error.
    pub async fn submit(
        &self,
        transaction: &SignedTransaction,
        operation: &str,
    ) -> Result<Signature, SolError> {
        debug!("submitting {operation}");
        let signature = self
            .rpc
            .send_transaction(transaction)
            .await
            .map_err(|e| classify_rejection(e, &transaction.message, operation))?;
        debug!("submitted {operation} as {signature}");
        Ok(signature)
    }

    /// Poll until `signature` reaches `commitment` or the configured
    /// deadline passes.
    ///
    /// A deadline miss is `Err(TimedOut)`; the transaction may still land.
    /// An executed-but-failed transaction is `Ok` with status `Failed`.
    pub async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentLevel,
    ) -> Result<SubmissionReceipt, SolError> {
        let config = self.rpc.config();
        let started = Instant::now();
        let deadline = started + config.confirm_timeout();

        loop {
            let status = self
                .rpc
                .get_signature_statuses(std::slice::from_ref(signature))
                .await?
                .into_iter()
                .next()
                .flatten();

            if let Some(status) = status {
                if let Some(receipt) = receipt_for(signature, &status, commitment) {
                    if receipt.is_success() {
                        info!("{signature} reached {commitment} in slot {}", status.slot);
                    }
                    return Ok(receipt);
                }
            }

            if Instant::now() >= deadline {
                return Err(SolError::TimedOut {
                    operation: "confirm".to_string(),
                    signature: signature.to_string(),
                    commitment,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            sleep(config.poll_interval()).await;
        }
    }

    /// Sign, submit and confirm at the configured commitment.
    ///
    /// A stale-blockhash rejection is retried exactly once with a newly
    /// fetched blockhash. A failed execution is returned as the classified
    /// error.
    pub async fn send_and_confirm(
        &self,
        builder: &TransactionBuilder,
        signers: &[&Keypair],
        operation: &str,
    ) -> Result<SubmissionReceipt, SolError> {
        let mut retried = false;
        let (signature, message) = loop {
            let transaction = self
                .sign(builder, signers)
                .await
                .map_err(|e| e.within(operation))?;
            match self.submit(&transaction, operation).await {
                Ok(signature) => break (signature, transaction.message),
                Err(SolError::BlockhashExpired { reason, .. }) if !retried => {
                    warn!("{operation}: blockhash expired ({reason}), resubmitting with a fresh one");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        };

        let receipt = self
            .confirm(&signature, self.rpc.commitment())
            .await
            .map_err(|e| e.within(operation))?;
        if receipt.status == ConfirmationStatus::Failed {
            let raw = receipt.error.clone().unwrap_or_default();
            let err: Value = serde_json::from_str(&raw).unwrap_or(Value::String(raw.clone()));
            return Err(match classify_transaction_error(&err, &message, operation, &raw) {
                SolError::SubmissionRejected { reason, .. } => SolError::TransactionFailed {
                    signature: signature.to_string(),
                    reason,
                },
                other => other,
            });
        }
        Ok(receipt)
    }
}

fn receipt_for(
    signature: &Signature,
    status: &SignatureStatus,
    commitment: CommitmentLevel,
) -> Option<SubmissionReceipt> {
    if let Some(err) = status.err.as_ref().filter(|e| !e.is_null()) {
        return Some(SubmissionReceipt {
            signature: *signature,
            status: ConfirmationStatus::Failed,
            slot: Some(status.slot),
            error: Some(err.to_string()),
        });
    }
    if !status.satisfies(commitment) {
        return None;
    }
    Some(SubmissionReceipt {
        signature: *signature,
        status: status
            .confirmation_status
            .map(ConfirmationStatus::from)
            .unwrap_or(ConfirmationStatus::Pending),
        slot: Some(status.slot),
        error: None,
    })
}

// ---------------------------------------------------------------------------
// Rejection classification
// ---------------------------------------------------------------------------

/// Map an RPC error from `sendTransaction` onto the rejection taxonomy.
///
/// Non-RPC errors (transport, serialization) pass through unchanged.
pub fn classify_rejection(err: SolError, message: &Message, operation: &str) -> SolError {
    let (rpc_message, data) = match err {
        SolError::Rpc { message, data, .. } => (message, data),
        other => return other,
    };

    let mut reason = rpc_message;
    if let Some(logs) = data.as_ref().and_then(|d| d.get("logs")).and_then(Value::as_array) {
        let logs: Vec<&str> = logs.iter().filter_map(Value::as_str).collect();
        if !logs.is_empty() {
            reason = format!("{reason}; logs: {}", logs.join(" | "));
        }
    }

    match data.as_ref().and_then(|d| d.get("err")).filter(|e| !e.is_null()) {
        Some(tx_err) => classify_transaction_error(tx_err, message, operation, &reason),
        None => SolError::SubmissionRejected {
            operation: operation.to_string(),
            reason,
        },
    }
}

/// Classify a ledger `TransactionError` value, e.g. `"BlockhashNotFound"`
/// or `{"InstructionError":[0,{"Custom":1}]}`.
pub fn classify_transaction_error(
    tx_err: &Value,
    message: &Message,
    operation: &str,
    reason: &str,
) -> SolError {
    let operation = operation.to_string();
    let reason = reason.to_string();

    if let Some(kind) = tx_err.as_str() {
        return match kind {
            "BlockhashNotFound" => SolError::BlockhashExpired { operation, reason },
            "AccountNotFound" | "InsufficientFundsForFee" => {
                SolError::InsufficientFunds { operation, reason }
            }
            _ => SolError::SubmissionRejected { operation, reason },
        };
    }

    let Some((index, custom)) = instruction_custom_error(tx_err) else {
        return SolError::SubmissionRejected { operation, reason };
    };
    let Some(program) = message.program_id(index) else {
        return SolError::SubmissionRejected { operation, reason };
    };

    // The account being created sits second in both system create and
    // associated-account create.
    let target = || {
        message
            .instructions
            .get(index)
            .and_then(|ix| ix.account_indices.get(1))
            .and_then(|&i| message.account_keys.get(i as usize))
            .map(|a| a.to_base58())
            .unwrap_or_default()
    };

    match (*program, custom) {
        (p, ERROR_ACCOUNT_ALREADY_IN_USE)
            if p == SYSTEM_PROGRAM_ID || p == ASSOCIATED_TOKEN_PROGRAM_ID =>
        {
            SolError::AccountAlreadyExists {
                operation,
                address: target(),
                reason,
            }
        }
        (p, ERROR_RESULT_WITH_NEGATIVE_LAMPORTS)
            if p == SYSTEM_PROGRAM_ID || p == ASSOCIATED_TOKEN_PROGRAM_ID =>
        {
            SolError::InsufficientFunds { operation, reason }
        }
        (p, ERROR_INSUFFICIENT_FUNDS) if p == TOKEN_PROGRAM_ID => {
            SolError::InsufficientFunds { operation, reason }
        }
        _ => SolError::SubmissionRejected { operation, reason },
    }
}

fn instruction_custom_error(tx_err: &Value) -> Option<(usize, u32)> {
    let pair = tx_err.get("InstructionError")?.as_array()?;
    let index = pair.first()?.as_u64()? as usize;
    let custom = pair.get(1)?.get("Custom")?.as_u64()?;
    Some((index, u32::try_from(custom).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::config::ClientConfig;
    use crate::mock_ledger::MockLedger;
    use crate::system_instruction;
    use crate::transaction::Blockhash;
    use serde_json::json;

    fn create_message(payer: &Keypair, target: &Address) -> Message {
        TransactionBuilder::new(payer.address())
            .add(
                system_instruction::create_account_with_seed(
                    &payer.address(),
                    target,
                    &payer.address(),
                    "hello",
                    1,
                    30,
                    &SYSTEM_PROGRAM_ID,
                )
                .unwrap(),
            )
            .compile(&Blockhash::default())
            .unwrap()
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            confirm_timeout_ms: 200,
            poll_interval_ms: 5,
            ..ClientConfig::default()
        }
    }

    // -- Classification -----------------------------------------------------

    #[test]
    fn custom_zero_from_system_is_already_exists() {
        let payer = Keypair::from_seed(&[1; 32]);
        let target = Address::new([2; 32]);
        let message = create_message(&payer, &target);

        let err = classify_transaction_error(
            &json!({ "InstructionError": [0, { "Custom": 0 }] }),
            &message,
            "create account",
            "already in use",
        );
        match err {
            SolError::AccountAlreadyExists {
                operation, address, ..
            } => {
                assert_eq!(operation, "create account");
                assert_eq!(address, target.to_base58());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn custom_one_from_system_is_insufficient_funds() {
        let payer = Keypair::from_seed(&[1; 32]);
        let message = create_message(&payer, &Address::new([2; 32]));
        let err = classify_transaction_error(
            &json!({ "InstructionError": [0, { "Custom": 1 }] }),
            &message,
            "create account",
            "insufficient lamports",
        );
        assert!(matches!(err, SolError::InsufficientFunds { .. }));
    }

    #[test]
    fn unknown_custom_code_stays_generic() {
        let payer = Keypair::from_seed(&[1; 32]);
        let message = create_message(&payer, &Address::new([2; 32]));
        let err = classify_transaction_error(
            &json!({ "InstructionError": [0, { "Custom": 42 }] }),
            &message,
            "create account",
            "custom program error: 0x2a",
        );
        assert!(matches!(err, SolError::SubmissionRejected { .. }));
    }

    #[test]
    fn stale_blockhash_is_detected() {
        let payer = Keypair::from_seed(&[1; 32]);
        let message = create_message(&payer, &Address::new([2; 32]));
        let rpc_err = SolError::Rpc {
            code: -32002,
            message: "Transaction simulation failed: Blockhash not found".into(),
            data: Some(json!({ "err": "BlockhashNotFound", "logs": [] })),
        };
        assert!(matches!(
            classify_rejection(rpc_err, &message, "transfer"),
            SolError::BlockhashExpired { .. }
        ));
    }

    #[test]
    fn rejection_reason_carries_logs() {
        let payer = Keypair::from_seed(&[1; 32]);
        let message = create_message(&payer, &Address::new([2; 32]));
        let rpc_err = SolError::Rpc {
            code: -32002,
            message: "simulation failed".into(),
            data: Some(json!({ "err": "AlreadyProcessed", "logs": ["Program log: boom"] })),
        };
        match classify_rejection(rpc_err, &message, "transfer 5 lamports") {
            SolError::SubmissionRejected { operation, reason } => {
                assert_eq!(operation, "transfer 5 lamports");
                assert!(reason.contains("Program log: boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transport_errors_pass_through() {
        let payer = Keypair::from_seed(&[1; 32]);
        let message = create_message(&payer, &Address::new([2; 32]));
        assert!(matches!(
            classify_rejection(SolError::Transport("refused".into()), &message, "x"),
            SolError::Transport(_)
        ));
    }

    // -- Lifecycle ----------------------------------------------------------

    #[tokio::test]
    async fn missing_signer_fails_before_any_request() {
        let ledger = Arc::new(MockLedger::new());
        let client = SubmissionClient::new(Arc::new(RpcClient::new_with_sender(
            ledger.clone(),
            fast_config(),
        )));

        let payer = Keypair::from_seed(&[1; 32]);
        let other = Keypair::from_seed(&[2; 32]);
        let builder = TransactionBuilder::new(payer.address()).add(
            system_instruction::transfer(&other.address(), &payer.address(), 5).unwrap(),
        );

        let err = client.sign(&builder, &[&payer]).await.unwrap_err();
        assert!(matches!(err, SolError::MissingSigner { .. }));

        let err = client
            .send_and_confirm(&builder, &[&payer], "transfer 5 lamports")
            .await
            .unwrap_err();
        match err {
            SolError::MissingSigner { operation, address } => {
                assert_eq!(operation, "transfer 5 lamports");
                assert_eq!(address, other.address().to_base58());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.total_requests(), 0);
    }

    #[tokio::test]
    async fn transfer_confirms() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::from_seed(&[1; 32]);
        let recipient = Address::new([9; 32]);
        ledger.fund(&payer.address(), 1_000_000_000);

        let client = SubmissionClient::new(Arc::new(RpcClient::new_with_sender(
            ledger.clone(),
            fast_config(),
        )));
        let builder = TransactionBuilder::new(payer.address())
            .add(system_instruction::transfer(&payer.address(), &recipient, 1_000).unwrap());

        let receipt = client
            .send_and_confirm(&builder, &[&payer], "transfer 1000 lamports")
            .await
            .unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.status, ConfirmationStatus::Confirmed);
        assert_eq!(ledger.balance(&recipient), 1_000);
    }

    #[tokio::test]
    async fn dropped_transaction_times_out() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::from_seed(&[1; 32]);
        ledger.fund(&payer.address(), 1_000_000_000);
        ledger.set_drop_submissions(true);

        let client = SubmissionClient::new(Arc::new(RpcClient::new_with_sender(
            ledger.clone(),
            fast_config(),
        )));
        let builder = TransactionBuilder::new(payer.address()).add(
            system_instruction::transfer(&payer.address(), &Address::new([9; 32]), 1).unwrap(),
        );
        let transaction = client.sign(&builder, &[&payer]).await.unwrap();
        let signature = client.submit(&transaction, "transfer").await.unwrap();

        let err = client
            .confirm(&signature, CommitmentLevel::Confirmed)
            .await
            .unwrap_err();
        match err {
            SolError::TimedOut {
                operation,
                commitment,
                waited_ms,
                ..
            } => {
                assert_eq!(operation, "confirm");
                assert_eq!(commitment, CommitmentLevel::Confirmed);
                assert!(waited_ms >= 200);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.send_count(), 1);
    }

    #[tokio::test]
    async fn failed_execution_yields_failed_receipt() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_preflight(false);
        let payer = Keypair::from_seed(&[1; 32]);
        ledger.fund(&payer.address(), 10_000);

        let client = SubmissionClient::new(Arc::new(RpcClient::new_with_sender(
            ledger.clone(),
            fast_config(),
        )));
        let builder = TransactionBuilder::new(payer.address()).add(
            system_instruction::transfer(&payer.address(), &Address::new([9; 32]), 1_000_000)
                .unwrap(),
        );

        let transaction = client.sign(&builder, &[&payer]).await.unwrap();
        let signature = client.submit(&transaction, "transfer").await.unwrap();
        let receipt = client
            .confirm(&signature, CommitmentLevel::Confirmed)
            .await
            .unwrap();
        assert_eq!(receipt.status, ConfirmationStatus::Failed);
        assert!(receipt.error.unwrap().contains("InstructionError"));

        let retry = TransactionBuilder::new(payer.address()).add(
            system_instruction::transfer(&payer.address(), &Address::new([9; 32]), 2_000_000)
                .unwrap(),
        );
        let err = client
            .send_and_confirm(&retry, &[&payer], "transfer 2000000 lamports")
            .await
            .unwrap_err();
        assert!(matches!(err, SolError::InsufficientFunds { .. }));
    }
}
