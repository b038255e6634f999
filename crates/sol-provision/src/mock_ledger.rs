//! An in-process ledger that answers [`RpcSender`] calls.
//!
//! `MockLedger` keeps an account map and executes submitted transactions
//! against it: signatures are verified, the fee payer is charged per
//! signature, and the system, token and associated-token programs run
//! natively. Other programs can be plugged in with
//! [`MockLedger::register_processor`].
//!
//! It also exposes the knobs tests need to reach the unhappy paths:
//!
//! * a bounded blockhash queue, aged with [`MockLedger::advance_blockhashes`],
//!   plus [`MockLedger::serve_expired_blockhashes`] to hand out stale ones;
//! * [`MockLedger::set_drop_submissions`], after which transactions are
//!   accepted but never land;
//! * [`MockLedger::set_preflight`], which decides whether failing
//!   transactions are rejected up front or land with an error status.
//!
//! Every landed transaction produces a new block and blockhash. Signature
//! statuses advance one commitment level per status query: processed, then
//! confirmed, then finalized.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::address::Address;
use crate::error::SolError;
use crate::rent::Rent;
use crate::rpc::{AccountInfo, CommitmentLevel, RpcRequest, RpcSender,
    JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE};
use crate::spl_token::{
    self, Mint, TokenAccount, ASSOCIATED_TOKEN_PROGRAM_ID, MINT_LEN, TOKEN_ACCOUNT_LEN,
    TOKEN_INSTRUCTIONS, TOKEN_PROGRAM_ID,
};
use crate::system_instruction::{
    ERROR_ACCOUNT_ALREADY_IN_USE, ERROR_RESULT_WITH_NEGATIVE_LAMPORTS, SYSTEM_INSTRUCTIONS,
    SYSTEM_PROGRAM_ID,
};
use crate::transaction::{Blockhash, Message, Signature, SignedTransaction};

pub const DEFAULT_LAMPORTS_PER_SIGNATURE: u64 = 5_000;
/// Number of recent blockhashes a transaction may reference.
pub const MAX_RECENT_BLOCKHASHES: usize = 150;
/// Largest data buffer the system program allocates.
pub const MAX_PERMITTED_DATA_LENGTH: u64 = 10 * 1024 * 1024;

const JSON_RPC_SERVER_ERROR_SIGNATURE_VERIFICATION_FAILURE: i64 = -32003;
const JSON_RPC_INVALID_PARAMS: i64 = -32602;

// System program custom error.
const ERROR_ADDRESS_WITH_SEED_MISMATCH: u32 = 5;
// Token program custom errors.
const TOKEN_ERROR_NOT_RENT_EXEMPT: u32 = 0;
const TOKEN_ERROR_FIXED_SUPPLY: u32 = 5;
const TOKEN_ERROR_ALREADY_IN_USE: u32 = 6;
const TOKEN_ERROR_ACCOUNT_FROZEN: u32 = 17;

// ---------------------------------------------------------------------------
// Program interface
// ---------------------------------------------------------------------------

/// Errors a program returns; serialized the way the ledger reports them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("custom program error: {0:#x}")]
    Custom(u32),
    #[error("invalid program argument")]
    InvalidArgument,
    #[error("invalid instruction data")]
    InvalidInstructionData,
    #[error("invalid account data for instruction")]
    InvalidAccountData,
    #[error("incorrect program id for instruction")]
    IncorrectProgramId,
    #[error("missing required signature for instruction")]
    MissingRequiredSignature,
    #[error("insufficient account keys for instruction")]
    NotEnoughAccountKeys,
    #[error("provided seeds do not result in a valid address")]
    InvalidSeeds,
    #[error("instruction requires an initialized account")]
    UninitializedAccount,
    #[error("provided owner is not allowed")]
    IllegalOwner,
    #[error("arithmetic overflowed")]
    ArithmeticOverflow,
    #[error("instruction modified data of a read-only account")]
    ReadonlyDataModified,
    #[error("instruction changed the balance of a read-only account")]
    ReadonlyLamportChange,
    #[error("unsupported program id")]
    UnsupportedProgramId,
}

impl InstructionError {
    /// `{"Custom": n}` for custom codes, the bare variant name otherwise.
    pub fn to_json(&self) -> Value {
        match self {
            InstructionError::Custom(code) => json!({ "Custom": code }),
            other => json!(format!("{other:?}")),
        }
    }
}

/// An account as seen by an executing instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedAccount {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
    pub account: AccountInfo,
}

/// A program the ledger can execute.
pub trait ProgramProcessor: Send + Sync {
    fn process(
        &self,
        program_id: &Address,
        accounts: &mut [KeyedAccount],
        data: &[u8],
    ) -> Result<(), InstructionError>;
}

// ---------------------------------------------------------------------------
// Ledger state
// ---------------------------------------------------------------------------

struct TrackedStatus {
    slot: u64,
    err: Option<Value>,
    polls: u64,
}

struct LedgerState {
    accounts: HashMap<Address, AccountInfo>,
    processors: HashMap<Address, Arc<dyn ProgramProcessor>>,
    statuses: HashMap<Signature, TrackedStatus>,
    blockhashes: VecDeque<Blockhash>,
    expired: Option<Blockhash>,
    expired_reads: usize,
    block_height: u64,
    slot: u64,
    airdrops: u64,
    rent: Rent,
    lamports_per_signature: u64,
    preflight: bool,
    drop_submissions: bool,
    requests: HashMap<&'static str, usize>,
}

pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        let mut blockhashes = VecDeque::with_capacity(MAX_RECENT_BLOCKHASHES + 1);
        blockhashes.push_back(blockhash_at(0));
        Self {
            state: Mutex::new(LedgerState {
                accounts: HashMap::new(),
                processors: HashMap::new(),
                statuses: HashMap::new(),
                blockhashes,
                expired: None,
                expired_reads: 0,
                block_height: 0,
                slot: 1,
                airdrops: 0,
                rent: Rent::default(),
                lamports_per_signature: DEFAULT_LAMPORTS_PER_SIGNATURE,
                preflight: true,
                drop_submissions: false,
                requests: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Setup --------------------------------------------------------------

    /// Credit `lamports` to `address`, creating a system account if needed.
    pub fn fund(&self, address: &Address, lamports: u64) {
        let mut state = self.lock();
        let account = state.accounts.entry(*address).or_insert_with(empty_account);
        account.lamports = account.lamports.saturating_add(lamports);
    }

    pub fn set_account(&self, address: &Address, account: AccountInfo) {
        self.lock().accounts.insert(*address, account);
    }

    pub fn register_processor(&self, program_id: Address, processor: Arc<dyn ProgramProcessor>) {
        self.lock().processors.insert(program_id, processor);
    }

    pub fn set_lamports_per_signature(&self, lamports: u64) {
        self.lock().lamports_per_signature = lamports;
    }

    /// With preflight on (the default) a failing transaction is rejected by
    /// `sendTransaction`; with it off the transaction lands, pays its fee,
    /// and reports the error through its signature status.
    pub fn set_preflight(&self, enabled: bool) {
        self.lock().preflight = enabled;
    }

    /// Accept submissions without ever executing them.
    pub fn set_drop_submissions(&self, drop: bool) {
        self.lock().drop_submissions = drop;
    }

    /// Produce `count` new blockhashes, retiring those that fall out of the
    /// validity window.
    pub fn advance_blockhashes(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.new_block();
        }
    }

    /// Answer the next `count` `getLatestBlockhash` calls with a blockhash
    /// that is no longer valid.
    pub fn serve_expired_blockhashes(&self, count: usize) {
        self.lock().expired_reads = count;
    }

    // -- Inspection ---------------------------------------------------------

    pub fn account(&self, address: &Address) -> Option<AccountInfo> {
        self.lock().accounts.get(address).cloned()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.account(address).map(|a| a.lamports).unwrap_or(0)
    }

    pub fn latest_blockhash(&self) -> Blockhash {
        latest(&self.lock())
    }

    pub fn lamports_per_signature(&self) -> u64 {
        self.lock().lamports_per_signature
    }

    /// Number of requests received for one RPC method, e.g. `"sendTransaction"`.
    pub fn request_count(&self, method: &str) -> usize {
        self.lock().requests.get(method).copied().unwrap_or(0)
    }

    pub fn send_count(&self) -> usize {
        self.request_count(RpcRequest::SendTransaction.method())
    }

    pub fn total_requests(&self) -> usize {
        self.lock().requests.values().sum()
    }

    // -- Request handling ---------------------------------------------------

    fn handle(&self, request: RpcRequest, params: &Value) -> Result<Value, SolError> {
        let mut state = self.lock();
        *state.requests.entry(request.method()).or_insert(0) += 1;
        let slot = state.slot;

        match request {
            RpcRequest::GetAccountInfo => {
                let address = param_address(params, 0)?;
                let value = state
                    .accounts
                    .get(&address)
                    .map(AccountInfo::to_ui_json)
                    .unwrap_or(Value::Null);
                Ok(with_context(slot, value))
            }
            RpcRequest::GetBalance => {
                let address = param_address(params, 0)?;
                let lamports = state.accounts.get(&address).map(|a| a.lamports).unwrap_or(0);
                Ok(with_context(slot, json!(lamports)))
            }
            RpcRequest::GetMinimumBalanceForRentExemption => {
                let data_len = params[0]
                    .as_u64()
                    .ok_or_else(|| invalid_params("expected a data length"))?;
                Ok(json!(state.rent.minimum_balance(data_len as usize)))
            }
            RpcRequest::GetLatestBlockhash => {
                let blockhash = if state.expired_reads > 0 {
                    state.expired_reads -= 1;
                    state.expired.unwrap_or_else(|| blockhash_at(u64::MAX))
                } else {
                    latest(&state)
                };
                let last_valid = state.block_height + MAX_RECENT_BLOCKHASHES as u64;
                Ok(with_context(
                    slot,
                    json!({
                        "blockhash": blockhash.to_string(),
                        "lastValidBlockHeight": last_valid,
                    }),
                ))
            }
            RpcRequest::SendTransaction => {
                let encoded = params[0]
                    .as_str()
                    .ok_or_else(|| invalid_params("expected a base64 transaction"))?;
                let wire = BASE64
                    .decode(encoded)
                    .map_err(|e| invalid_params(&format!("base64: {e}")))?;
                let transaction = SignedTransaction::from_wire(&wire)
                    .map_err(|e| invalid_params(&format!("failed to deserialize transaction: {e}")))?;
                let signature = state.process_transaction(&transaction)?;
                Ok(json!(signature.to_string()))
            }
            RpcRequest::GetSignatureStatuses => {
                let signatures = params[0]
                    .as_array()
                    .ok_or_else(|| invalid_params("expected an array of signatures"))?;
                let statuses = signatures
                    .iter()
                    .map(|s| {
                        let signature = s
                            .as_str()
                            .ok_or_else(|| invalid_params("signature must be a string"))
                            .and_then(|s| Signature::from_str(s).map_err(|e| invalid_params(&e.to_string())))?;
                        Ok(state.poll_status(&signature))
                    })
                    .collect::<Result<Vec<_>, SolError>>()?;
                Ok(with_context(slot, Value::Array(statuses)))
            }
            RpcRequest::RequestAirdrop => {
                let address = param_address(params, 0)?;
                let lamports = params[1]
                    .as_u64()
                    .ok_or_else(|| invalid_params("expected lamports"))?;
                Ok(json!(state.airdrop(&address, lamports).to_string()))
            }
            RpcRequest::GetTokenAccountsByOwner => {
                let owner = param_address(params, 0)?;
                let mint = match params[1].get("mint").and_then(Value::as_str) {
                    Some(mint) => Some(Address::from_base58(mint).map_err(|e| invalid_params(&e.to_string()))?),
                    None => None,
                };
                let mut matches: Vec<(&Address, &AccountInfo)> = state
                    .accounts
                    .iter()
                    .filter(|(_, account)| {
                        account.owner == TOKEN_PROGRAM_ID && account.data.len() == TOKEN_ACCOUNT_LEN
                    })
                    .filter(|(_, account)| match TokenAccount::unpack(&account.data) {
                        Ok(token) => token.owner == owner && mint.map_or(true, |m| token.mint == m),
                        Err(_) => false,
                    })
                    .collect();
                matches.sort_by_key(|(address, _)| **address);
                let value = matches
                    .into_iter()
                    .map(|(address, account)| json!({ "pubkey": address, "account": account.to_ui_json() }))
                    .collect();
                Ok(with_context(slot, Value::Array(value)))
            }
        }
    }
}

#[async_trait]
impl RpcSender for MockLedger {
    async fn send(&self, request: RpcRequest, params: Value) -> Result<Value, SolError> {
        self.handle(request, &params)
    }

    fn url(&self) -> String {
        "mock-ledger".to_string()
    }
}

impl LedgerState {
    fn new_block(&mut self) {
        self.block_height += 1;
        let next = blockhash_at(self.block_height);
        self.blockhashes.push_back(next);
        while self.blockhashes.len() > MAX_RECENT_BLOCKHASHES {
            self.expired = self.blockhashes.pop_front();
        }
    }

    fn process_transaction(&mut self, transaction: &SignedTransaction) -> Result<Signature, SolError> {
        transaction.verify().map_err(|e| SolError::Rpc {
            code: JSON_RPC_SERVER_ERROR_SIGNATURE_VERIFICATION_FAILURE,
            message: format!("Transaction signature verification failure: {e}"),
            data: None,
        })?;
        let signature = transaction.signature();
        if self.drop_submissions {
            return Ok(signature);
        }

        let message = &transaction.message;
        if self.statuses.contains_key(&signature) {
            return Err(preflight_failure(
                json!("AlreadyProcessed"),
                "This transaction has already been processed",
                Vec::new(),
            ));
        }
        if !self.blockhashes.contains(&message.recent_blockhash) {
            return Err(preflight_failure(
                json!("BlockhashNotFound"),
                "Blockhash not found",
                Vec::new(),
            ));
        }

        let fee = message.fee(self.lamports_per_signature);
        let payer = message
            .fee_payer()
            .copied()
            .ok_or_else(|| invalid_params("message has no fee payer"))?;
        match self.accounts.get(&payer) {
            None => {
                return Err(preflight_failure(
                    json!("AccountNotFound"),
                    "Attempt to debit an account but found no record of a prior credit.",
                    Vec::new(),
                ))
            }
            Some(account) if account.lamports < fee => {
                return Err(preflight_failure(
                    json!("InsufficientFundsForFee"),
                    "Insufficient funds for fee",
                    Vec::new(),
                ))
            }
            Some(_) => {}
        }

        let mut working: HashMap<Address, AccountInfo> = message
            .account_keys
            .iter()
            .map(|key| (*key, self.accounts.get(key).cloned().unwrap_or_else(empty_account)))
            .collect();
        if let Some(account) = working.get_mut(&payer) {
            account.lamports -= fee;
        }

        let outcome = self.execute(message, &mut working);
        match outcome {
            Ok(()) => {
                self.commit(working);
                self.slot += 1;
                self.new_block();
                self.statuses.insert(signature, TrackedStatus { slot: self.slot, err: None, polls: 0 });
                Ok(signature)
            }
            Err((index, err, logs)) => {
                let tx_err = json!({ "InstructionError": [index, err.to_json()] });
                if self.preflight {
                    return Err(preflight_failure(
                        tx_err,
                        &format!("Error processing Instruction {index}: {err}"),
                        logs,
                    ));
                }
                if let Some(account) = self.accounts.get_mut(&payer) {
                    account.lamports -= fee;
                }
                self.slot += 1;
                self.new_block();
                self.statuses.insert(signature, TrackedStatus { slot: self.slot, err: Some(tx_err), polls: 0 });
                Ok(signature)
            }
        }
    }

    fn execute(
        &self,
        message: &Message,
        working: &mut HashMap<Address, AccountInfo>,
    ) -> Result<(), (usize, InstructionError, Vec<String>)> {
        for (index, compiled) in message.instructions.iter().enumerate() {
            let fail = |err: InstructionError, program: &Address| {
                let logs = vec![
                    format!("Program {program} invoke [1]"),
                    format!("Program {program} failed: {err}"),
                ];
                (index, err, logs)
            };

            let program_id = message
                .account_keys
                .get(compiled.program_id_index as usize)
                .copied()
                .ok_or_else(|| fail(InstructionError::NotEnoughAccountKeys, &Address::default()))?;

            let mut keyed = Vec::with_capacity(compiled.account_indices.len());
            for &i in &compiled.account_indices {
                let address = message
                    .account_keys
                    .get(i as usize)
                    .copied()
                    .ok_or_else(|| fail(InstructionError::NotEnoughAccountKeys, &program_id))?;
                keyed.push(KeyedAccount {
                    address,
                    is_signer: message.is_signer(i as usize),
                    is_writable: message.is_writable(i as usize),
                    account: working.get(&address).cloned().unwrap_or_else(empty_account),
                });
            }
            let before = keyed.clone();

            let result = if program_id == SYSTEM_PROGRAM_ID {
                process_system(&mut keyed, &compiled.data)
            } else if program_id == TOKEN_PROGRAM_ID {
                process_token(&self.rent, &mut keyed, &compiled.data)
            } else if program_id == ASSOCIATED_TOKEN_PROGRAM_ID {
                process_associated_token(&self.rent, &mut keyed, &compiled.data)
            } else {
                match self.processors.get(&program_id) {
                    Some(processor) => processor.process(&program_id, &mut keyed, &compiled.data),
                    None => Err(InstructionError::UnsupportedProgramId),
                }
            };
            result.map_err(|e| fail(e, &program_id))?;

            for (after, before) in keyed.iter().zip(&before) {
                if after.is_writable {
                    continue;
                }
                if after.account.lamports != before.account.lamports {
                    return Err(fail(InstructionError::ReadonlyLamportChange, &program_id));
                }
                if after.account != before.account {
                    return Err(fail(InstructionError::ReadonlyDataModified, &program_id));
                }
            }
            for account in keyed.into_iter().filter(|k| k.is_writable) {
                working.insert(account.address, account.account);
            }
        }
        Ok(())
    }

    /// Write back executed state; empty system accounts are purged.
    fn commit(&mut self, working: HashMap<Address, AccountInfo>) {
        for (address, account) in working {
            if account.lamports == 0 && account.data.is_empty() && account.owner == SYSTEM_PROGRAM_ID {
                self.accounts.remove(&address);
            } else {
                self.accounts.insert(address, account);
            }
        }
    }

    fn poll_status(&mut self, signature: &Signature) -> Value {
        let Some(tracked) = self.statuses.get_mut(signature) else {
            return Value::Null;
        };
        tracked.polls += 1;
        let level = match tracked.polls {
            1 => CommitmentLevel::Processed,
            2 => CommitmentLevel::Confirmed,
            _ => CommitmentLevel::Finalized,
        };
        let confirmations = match level {
            CommitmentLevel::Finalized => Value::Null,
            _ => json!(tracked.polls - 1),
        };
        let status = match &tracked.err {
            Some(err) => json!({ "Err": err }),
            None => json!({ "Ok": null }),
        };
        json!({
            "slot": tracked.slot,
            "confirmations": confirmations,
            "err": tracked.err,
            "status": status,
            "confirmationStatus": level,
        })
    }

    fn airdrop(&mut self, address: &Address, lamports: u64) -> Signature {
        self.airdrops += 1;
        let mut signature = [0u8; 64];
        for (half, chunk) in signature.chunks_mut(32).enumerate() {
            let digest = Sha256::new()
                .chain_update(b"airdrop")
                .chain_update(self.airdrops.to_le_bytes())
                .chain_update([half as u8])
                .finalize();
            chunk.copy_from_slice(&digest);
        }
        let signature = Signature(signature);

        let account = self.accounts.entry(*address).or_insert_with(empty_account);
        account.lamports = account.lamports.saturating_add(lamports);
        self.slot += 1;
        self.statuses.insert(signature, TrackedStatus { slot: self.slot, err: None, polls: 0 });
        signature
    }
}

// ---------------------------------------------------------------------------
// Native programs
// ---------------------------------------------------------------------------

fn instruction_data<T>(result: Result<T, SolError>) -> Result<T, InstructionError> {
    result.map_err(|_| InstructionError::InvalidInstructionData)
}

fn require_accounts(accounts: &[KeyedAccount], count: usize) -> Result<(), InstructionError> {
    if accounts.len() < count {
        return Err(InstructionError::NotEnoughAccountKeys);
    }
    Ok(())
}

fn require_signer(account: &KeyedAccount) -> Result<(), InstructionError> {
    if !account.is_signer {
        return Err(InstructionError::MissingRequiredSignature);
    }
    Ok(())
}

fn debit(account: &mut KeyedAccount, lamports: u64) -> Result<(), InstructionError> {
    account.account.lamports = account
        .account
        .lamports
        .checked_sub(lamports)
        .ok_or(InstructionError::Custom(ERROR_RESULT_WITH_NEGATIVE_LAMPORTS))?;
    Ok(())
}

fn credit(account: &mut KeyedAccount, lamports: u64) -> Result<(), InstructionError> {
    account.account.lamports = account
        .account
        .lamports
        .checked_add(lamports)
        .ok_or(InstructionError::ArithmeticOverflow)?;
    Ok(())
}

fn process_system(accounts: &mut [KeyedAccount], data: &[u8]) -> Result<(), InstructionError> {
    let (variant, record) = instruction_data(SYSTEM_INSTRUCTIONS.decode(data))?;
    match variant.tag {
        // CreateAccount
        0 => {
            require_accounts(accounts, 2)?;
            require_signer(&accounts[0])?;
            require_signer(&accounts[1])?;
            allocate(
                accounts,
                instruction_data(record.u64("lamports"))?,
                instruction_data(record.u64("space"))?,
                instruction_data(record.address("owner"))?,
            )
        }
        // Transfer
        2 => {
            require_accounts(accounts, 2)?;
            require_signer(&accounts[0])?;
            if !accounts[0].account.data.is_empty() {
                return Err(InstructionError::InvalidArgument);
            }
            let lamports = instruction_data(record.u64("lamports"))?;
            debit(&mut accounts[0], lamports)?;
            credit(&mut accounts[1], lamports)
        }
        // CreateAccountWithSeed
        3 => {
            require_accounts(accounts, 2)?;
            require_signer(&accounts[0])?;
            let base = instruction_data(record.address("base"))?;
            let seed = instruction_data(record.str("seed"))?;
            let owner = instruction_data(record.address("owner"))?;
            let derived = Address::derive_with_seed(&base, seed, &owner)
                .map_err(|_| InstructionError::InvalidArgument)?;
            if derived != accounts[1].address {
                return Err(InstructionError::Custom(ERROR_ADDRESS_WITH_SEED_MISMATCH));
            }
            if !accounts.iter().any(|a| a.address == base && a.is_signer) {
                return Err(InstructionError::MissingRequiredSignature);
            }
            allocate(
                accounts,
                instruction_data(record.u64("lamports"))?,
                instruction_data(record.u64("space"))?,
                owner,
            )
        }
        // TransferWithSeed
        11 => {
            require_accounts(accounts, 3)?;
            require_signer(&accounts[1])?;
            let from_seed = instruction_data(record.str("from_seed"))?;
            let from_owner = instruction_data(record.address("from_owner"))?;
            let derived = Address::derive_with_seed(&accounts[1].address, from_seed, &from_owner)
                .map_err(|_| InstructionError::InvalidArgument)?;
            if derived != accounts[0].address {
                return Err(InstructionError::Custom(ERROR_ADDRESS_WITH_SEED_MISMATCH));
            }
            let lamports = instruction_data(record.u64("lamports"))?;
            debit(&mut accounts[0], lamports)?;
            credit(&mut accounts[2], lamports)
        }
        _ => Err(InstructionError::InvalidInstructionData),
    }
}

/// Fund and allocate `accounts[1]` from `accounts[0]`.
fn allocate(
    accounts: &mut [KeyedAccount],
    lamports: u64,
    space: u64,
    owner: Address,
) -> Result<(), InstructionError> {
    let target = &accounts[1].account;
    if target.lamports > 0 || !target.data.is_empty() || target.owner != SYSTEM_PROGRAM_ID {
        return Err(InstructionError::Custom(ERROR_ACCOUNT_ALREADY_IN_USE));
    }
    if space > MAX_PERMITTED_DATA_LENGTH {
        return Err(InstructionError::InvalidArgument);
    }

    debit(&mut accounts[0], lamports)?;
    credit(&mut accounts[1], lamports)?;
    accounts[1].account.data = vec![0; space as usize];
    accounts[1].account.owner = owner;
    Ok(())
}

fn load_mint(account: &KeyedAccount) -> Result<Mint, InstructionError> {
    if account.account.owner != TOKEN_PROGRAM_ID {
        return Err(InstructionError::IncorrectProgramId);
    }
    let mint = Mint::unpack(&account.account.data).map_err(|_| InstructionError::InvalidAccountData)?;
    if !mint.is_initialized {
        return Err(InstructionError::UninitializedAccount);
    }
    Ok(mint)
}

fn load_token_account(account: &KeyedAccount) -> Result<TokenAccount, InstructionError> {
    if account.account.owner != TOKEN_PROGRAM_ID {
        return Err(InstructionError::IncorrectProgramId);
    }
    let state = TokenAccount::unpack(&account.account.data)
        .map_err(|_| InstructionError::InvalidAccountData)?;
    if state.state == spl_token::AccountState::Uninitialized {
        return Err(InstructionError::UninitializedAccount);
    }
    if state.is_frozen() {
        return Err(InstructionError::Custom(TOKEN_ERROR_ACCOUNT_FROZEN));
    }
    Ok(state)
}

fn store(account: &mut KeyedAccount, packed: Result<Vec<u8>, SolError>) -> Result<(), InstructionError> {
    account.account.data = packed.map_err(|_| InstructionError::InvalidAccountData)?;
    Ok(())
}

fn check_authority(expected: &Address, signer: &KeyedAccount) -> Result<(), InstructionError> {
    if signer.address != *expected {
        return Err(InstructionError::Custom(spl_token::ERROR_OWNER_MISMATCH));
    }
    require_signer(signer)
}

fn check_decimals(mint: &Mint, decimals: u8) -> Result<(), InstructionError> {
    if mint.decimals != decimals {
        return Err(InstructionError::Custom(spl_token::ERROR_MINT_DECIMALS_MISMATCH));
    }
    Ok(())
}

fn process_token(rent: &Rent, accounts: &mut [KeyedAccount], data: &[u8]) -> Result<(), InstructionError> {
    let (variant, record) = instruction_data(TOKEN_INSTRUCTIONS.decode(data))?;
    match variant.tag {
        // InitializeMint2
        20 => {
            require_accounts(accounts, 1)?;
            let account = &accounts[0];
            if account.account.owner != TOKEN_PROGRAM_ID {
                return Err(InstructionError::IncorrectProgramId);
            }
            if account.account.data.len() != MINT_LEN {
                return Err(InstructionError::InvalidAccountData);
            }
            if Mint::unpack(&account.account.data).map(|m| m.is_initialized).unwrap_or(false) {
                return Err(InstructionError::Custom(TOKEN_ERROR_ALREADY_IN_USE));
            }
            if !rent.is_exempt(account.account.lamports, MINT_LEN) {
                return Err(InstructionError::Custom(TOKEN_ERROR_NOT_RENT_EXEMPT));
            }

            // tag, decimals, authority, flag, then the optional freeze key.
            let freeze_authority = match instruction_data(record.u8("freeze_authority_option"))? {
                0 => None,
                1 => {
                    let bytes: [u8; 32] = data
                        .get(35..67)
                        .and_then(|b| b.try_into().ok())
                        .ok_or(InstructionError::InvalidInstructionData)?;
                    Some(Address::new(bytes))
                }
                _ => return Err(InstructionError::InvalidInstructionData),
            };
            let mint = Mint {
                mint_authority: Some(instruction_data(record.address("mint_authority"))?),
                supply: 0,
                decimals: instruction_data(record.u8("decimals"))?,
                is_initialized: true,
                freeze_authority,
            };
            store(&mut accounts[0], mint.pack())
        }
        // MintTo
        7 => {
            require_accounts(accounts, 3)?;
            let amount = instruction_data(record.u64("amount"))?;
            let mut mint = load_mint(&accounts[0])?;
            let mut destination = load_token_account(&accounts[1])?;
            if destination.mint != accounts[0].address {
                return Err(InstructionError::Custom(spl_token::ERROR_MINT_MISMATCH));
            }
            let authority = mint
                .mint_authority
                .ok_or(InstructionError::Custom(TOKEN_ERROR_FIXED_SUPPLY))?;
            check_authority(&authority, &accounts[2])?;

            mint.supply = mint.supply.checked_add(amount).ok_or(InstructionError::ArithmeticOverflow)?;
            destination.amount = destination
                .amount
                .checked_add(amount)
                .ok_or(InstructionError::ArithmeticOverflow)?;
            store(&mut accounts[0], mint.pack())?;
            store(&mut accounts[1], destination.pack())
        }
        // Transfer, TransferChecked
        3 | 12 => {
            let checked = variant.tag == 12;
            let (source_index, destination_index, owner_index) = if checked { (0, 2, 3) } else { (0, 1, 2) };
            require_accounts(accounts, owner_index + 1)?;
            let amount = instruction_data(record.u64("amount"))?;

            let mut source = load_token_account(&accounts[source_index])?;
            let mut destination = load_token_account(&accounts[destination_index])?;
            if source.mint != destination.mint {
                return Err(InstructionError::Custom(spl_token::ERROR_MINT_MISMATCH));
            }
            if checked {
                if accounts[1].address != source.mint {
                    return Err(InstructionError::Custom(spl_token::ERROR_MINT_MISMATCH));
                }
                let mint = load_mint(&accounts[1])?;
                check_decimals(&mint, instruction_data(record.u8("decimals"))?)?;
            }
            check_authority(&source.owner, &accounts[owner_index])?;
            if source.amount < amount {
                return Err(InstructionError::Custom(spl_token::ERROR_INSUFFICIENT_FUNDS));
            }
            if accounts[source_index].address == accounts[destination_index].address {
                return Ok(());
            }

            source.amount -= amount;
            destination.amount = destination
                .amount
                .checked_add(amount)
                .ok_or(InstructionError::ArithmeticOverflow)?;
            store(&mut accounts[source_index], source.pack())?;
            store(&mut accounts[destination_index], destination.pack())
        }
        // BurnChecked
        15 => {
            require_accounts(accounts, 3)?;
            let amount = instruction_data(record.u64("amount"))?;
            let mut account = load_token_account(&accounts[0])?;
            if account.mint != accounts[1].address {
                return Err(InstructionError::Custom(spl_token::ERROR_MINT_MISMATCH));
            }
            let mut mint = load_mint(&accounts[1])?;
            check_decimals(&mint, instruction_data(record.u8("decimals"))?)?;
            check_authority(&account.owner, &accounts[2])?;
            if account.amount < amount {
                return Err(InstructionError::Custom(spl_token::ERROR_INSUFFICIENT_FUNDS));
            }

            account.amount -= amount;
            mint.supply = mint.supply.saturating_sub(amount);
            store(&mut accounts[0], account.pack())?;
            store(&mut accounts[1], mint.pack())
        }
        _ => Err(InstructionError::InvalidInstructionData),
    }
}

fn process_associated_token(
    rent: &Rent,
    accounts: &mut [KeyedAccount],
    data: &[u8],
) -> Result<(), InstructionError> {
    let idempotent = match data {
        [] | [0] => false,
        [1] => true,
        _ => return Err(InstructionError::InvalidInstructionData),
    };
    require_accounts(accounts, 6)?;
    require_signer(&accounts[0])?;

    let wallet = accounts[2].address;
    let mint_address = accounts[3].address;
    let expected = spl_token::derive_associated_token_address(&wallet, &mint_address)
        .map_err(|_| InstructionError::InvalidSeeds)?;
    if expected != accounts[1].address {
        return Err(InstructionError::InvalidSeeds);
    }

    let existing = &accounts[1].account;
    if existing.owner == TOKEN_PROGRAM_ID && idempotent {
        let state = load_token_account(&accounts[1])?;
        if state.owner != wallet || state.mint != mint_address {
            return Err(InstructionError::IllegalOwner);
        }
        return Ok(());
    }
    if existing.lamports > 0 || !existing.data.is_empty() || existing.owner != SYSTEM_PROGRAM_ID {
        return Err(InstructionError::Custom(ERROR_ACCOUNT_ALREADY_IN_USE));
    }
    load_mint(&accounts[3])?;

    let lamports = rent.minimum_balance(TOKEN_ACCOUNT_LEN);
    debit(&mut accounts[0], lamports)?;
    credit(&mut accounts[1], lamports)?;
    accounts[1].account.owner = TOKEN_PROGRAM_ID;
    store(&mut accounts[1], TokenAccount::new(mint_address, wallet).pack())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn empty_account() -> AccountInfo {
    AccountInfo {
        lamports: 0,
        data: Vec::new(),
        owner: SYSTEM_PROGRAM_ID,
        executable: false,
        rent_epoch: u64::MAX,
    }
}

fn blockhash_at(height: u64) -> Blockhash {
    let digest = Sha256::new()
        .chain_update(b"mock-ledger-blockhash")
        .chain_update(height.to_le_bytes())
        .finalize();
    Blockhash(digest.into())
}

fn latest(state: &LedgerState) -> Blockhash {
    state.blockhashes.back().copied().unwrap_or_default()
}

fn with_context(slot: u64, value: Value) -> Value {
    json!({ "context": { "slot": slot }, "value": value })
}

fn invalid_params(detail: &str) -> SolError {
    SolError::Rpc {
        code: JSON_RPC_INVALID_PARAMS,
        message: format!("Invalid params: {detail}"),
        data: None,
    }
}

fn param_address(params: &Value, index: usize) -> Result<Address, SolError> {
    let encoded = params[index]
        .as_str()
        .ok_or_else(|| invalid_params(&format!("expected an address at position {index}")))?;
    Address::from_base58(encoded).map_err(|e| invalid_params(&e.to_string()))
}

fn preflight_failure(err: Value, detail: &str, logs: Vec<String>) -> SolError {
    SolError::Rpc {
        code: JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
        message: format!("Transaction simulation failed: {detail}"),
        data: Some(json!({
            "err": err,
            "logs": logs,
            "accounts": null,
            "unitsConsumed": 0,
        })),
    }
}
