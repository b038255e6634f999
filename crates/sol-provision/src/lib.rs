//! Client toolkit for provisioning accounts on a Solana-style ledger.
//!
//! The crate covers the path from local key material to confirmed on-chain
//! state: seed-derived and program-derived addresses, a declarative binary
//! layout codec, rent-exemption math, transaction compilation and signing,
//! JSON-RPC submission with confirmation polling, idempotent account
//! creation, and SPL token mint/transfer/burn.
//!
//! Wire formats are implemented directly on top of `ed25519-dalek`, `sha2`
//! and `bs58`; the RPC layer talks JSON over `reqwest`. [`mock_ledger`]
//! provides an in-process ledger behind the same [`rpc::RpcSender`] seam so
//! every flow can be exercised without a validator.

pub mod address;
pub mod config;
pub mod counter_program;
pub mod error;
pub mod keypair;
pub mod mock_ledger;
pub mod provisioner;
pub mod rent;
pub mod rpc;
pub mod schema;
pub mod spl_token;
pub mod submission;
pub mod system_instruction;
pub mod token_client;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::Address;
pub use config::{ClientConfig, Cluster};
pub use error::SolError;
pub use keypair::Keypair;
pub use mock_ledger::MockLedger;
pub use provisioner::{AccountProvisioner, AccountSpec, Funding, ProvisionedAccount};
pub use rent::{Rent, RentModel, RentStatus};
pub use rpc::{AccountInfo, CommitmentLevel, HttpSender, RpcClient, RpcRequest, RpcSender};
pub use schema::{Field, FieldType, FieldValue, LengthPrefix, Record, Schema, TaggedSchema};
pub use submission::{ConfirmationStatus, SubmissionClient, SubmissionReceipt};
pub use system_instruction::SYSTEM_PROGRAM_ID;
pub use token_client::TokenClient;
pub use transaction::{
    AccountMeta, Blockhash, Instruction, Message, Signature, SignedTransaction,
    TransactionBuilder,
};
