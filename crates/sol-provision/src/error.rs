use thiserror::Error;

use crate::rpc::CommitmentLevel;

/// Errors surfaced by address derivation, encoding, signing, submission and
/// provisioning.
///
/// Remote rejections always carry the operation that was attempted and the
/// raw reason string reported by the ledger.
#[derive(Debug, Error)]
pub enum SolError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("seed is {len} bytes, maximum is {max}")]
    InvalidSeedLength { len: usize, max: usize },

    #[error("owner program id ends with the program-derived-address marker")]
    IllegalOwner,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("{operation}: missing signer, no key supplied for {address}")]
    MissingSigner { operation: String, address: String },

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("{operation} rejected: {reason}")]
    SubmissionRejected { operation: String, reason: String },

    #[error("{operation} rejected with stale blockhash: {reason}")]
    BlockhashExpired { operation: String, reason: String },

    #[error("{operation}: account {address} already exists: {reason}")]
    AccountAlreadyExists {
        operation: String,
        address: String,
        reason: String,
    },

    #[error("{operation} failed for insufficient funds: {reason}")]
    InsufficientFunds { operation: String, reason: String },

    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("{operation}: transaction {signature} not {commitment} after {waited_ms} ms")]
    TimedOut {
        operation: String,
        signature: String,
        commitment: CommitmentLevel,
        waited_ms: u64,
    },

    #[error("account {address} exists but does not match: {reason}")]
    AccountMismatch { address: String, reason: String },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("airdrop unavailable on {0}")]
    AirdropUnavailable(String),

    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SolError {
    /// True when the error means the target account is already present, which
    /// provisioning treats as success.
    pub fn is_benign_on_create(&self) -> bool {
        matches!(self, SolError::AccountAlreadyExists { .. })
    }

    /// True for rejections the ledger reported before or during execution.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SolError::SubmissionRejected { .. }
                | SolError::BlockhashExpired { .. }
                | SolError::AccountAlreadyExists { .. }
                | SolError::InsufficientFunds { .. }
        )
    }

    /// Attribute a signer or deadline failure to the caller's operation.
    /// Other errors already name what was attempted and pass through.
    pub(crate) fn within(self, operation: &str) -> Self {
        match self {
            SolError::MissingSigner { address, .. } => SolError::MissingSigner {
                operation: operation.to_string(),
                address,
            },
            SolError::TimedOut {
                signature,
                commitment,
                waited_ms,
                ..
            } => SolError::TimedOut {
                operation: operation.to_string(),
                signature,
                commitment,
                waited_ms,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for SolError {
    fn from(e: serde_json::Error) -> Self {
        SolError::SerializationError(e.to_string())
    }
}

impl From<reqwest::Error> for SolError {
    fn from(e: reqwest::Error) -> Self {
        SolError::Transport(e.to_string())
    }
}
