//! Instructions, transaction assembly, wire format and signing.
//!
//! Transactions are compiled and serialized by hand. The layout the ledger
//! expects is:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```
//!
//! A transaction moves through `TransactionBuilder` (built, no blockhash),
//! `Message` (compiled against a blockhash) and `SignedTransaction` (every
//! required signature present). Submission and confirmation live in
//! [`crate::submission`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::Address;
use crate::error::SolError;
use crate::keypair::{verify_signature, Keypair, SIGNATURE_LEN};

/// Wire transactions larger than this are rejected by the ledger.
pub const PACKET_DATA_SIZE: usize = 1232;

/// Operation named by signer failures raised outside a submission.
pub const SIGN_OPERATION: &str = "sign transaction";

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in the ledger's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)` or an error if the data is truncated.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;
    let mut consumed = 0usize;

    loop {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError("unexpected end of data while decoding compact-u16".into())
        })?;
        value |= ((byte & 0x7f) as u32) << (7 * consumed);
        consumed += 1;

        if byte & 0x80 == 0 || consumed >= 3 {
            break;
        }
    }

    let value = u16::try_from(value)
        .map_err(|_| SolError::SerializationError("compact-u16 value overflow".into()))?;
    Ok((value, consumed))
}

fn compact_len(len: usize, what: &str) -> Result<Vec<u8>, SolError> {
    let len = u16::try_from(len)
        .map_err(|_| SolError::SerializationError(format!("too many {what}: {len}")))?;
    Ok(encode_compact_u16(len))
}

// ---------------------------------------------------------------------------
// Blockhash and signature
// ---------------------------------------------------------------------------

/// A recent blockhash: the freshness token every message must carry.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Blockhash(pub [u8; 32]);

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

impl FromStr for Blockhash {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| SolError::SerializationError(format!("blockhash: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::SerializationError(format!("blockhash: expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

/// A transaction signature. The first signature identifies the transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_LEN])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| SolError::SerializationError(format!("signature: {e}")))?;
        let arr: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::SerializationError(format!("signature: expected 64 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// A single account reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account reference.
    pub fn new(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

/// A program invocation before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    /// Invoke `program_id` with an ordered account list and opaque payload.
    pub fn new(program_id: Address, accounts: Vec<AccountMeta>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// An ordered list of instructions plus the fee payer.
///
/// Instructions execute in the order they are added, all-or-nothing. The
/// builder performs no I/O; the blockhash is supplied at compile time.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fee_payer: Address,
    instructions: Vec<Instruction>,
}

impl TransactionBuilder {
    pub fn new(fee_payer: Address) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
        }
    }

    pub fn add(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn fee_payer(&self) -> &Address {
        &self.fee_payer
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Every address whose signature the transaction needs: the fee payer
    /// first, then signer-flagged accounts in first-seen order.
    pub fn required_signers(&self) -> Vec<Address> {
        let mut signers = vec![self.fee_payer];
        for meta in self.instructions.iter().flat_map(|ix| &ix.accounts) {
            if meta.is_signer && !signers.contains(&meta.address) {
                signers.push(meta.address);
            }
        }
        signers
    }

    /// Fail with `MissingSigner` unless `signers` covers every required
    /// signature. Pure; callers run this before touching the network.
    pub fn check_signers(&self, signers: &[&Keypair]) -> Result<(), SolError> {
        let supplied: Vec<Address> = signers.iter().map(|k| k.address()).collect();
        match self
            .required_signers()
            .into_iter()
            .find(|required| !supplied.contains(required))
        {
            Some(missing) => Err(SolError::MissingSigner {
                operation: SIGN_OPERATION.to_string(),
                address: missing.to_base58(),
            }),
            None => Ok(()),
        }
    }

    pub fn compile(&self, recent_blockhash: &Blockhash) -> Result<Message, SolError> {
        if self.instructions.is_empty() {
            return Err(SolError::TransactionBuildError(
                "transaction has no instructions".into(),
            ));
        }
        Message::compile(&self.instructions, &self.fee_payer, recent_blockhash)
    }

    /// Compile against `recent_blockhash` and sign with `signers`.
    pub fn sign(
        &self,
        recent_blockhash: &Blockhash,
        signers: &[&Keypair],
    ) -> Result<SignedTransaction, SolError> {
        self.check_signers(signers)?;
        SignedTransaction::sign(self.compile(recent_blockhash)?, signers)
    }
}

// ---------------------------------------------------------------------------
// Compiled message
// ---------------------------------------------------------------------------

/// A compiled instruction where account references are replaced by u8 indices
/// into the message's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// The signed portion of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// All account keys referenced by this message, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Address>,

    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,

    pub recent_blockhash: Blockhash,

    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Build a message from a set of instructions with a single fee payer.
    ///
    /// The fee payer is always a writable signer at index 0.
    pub fn compile(
        instructions: &[Instruction],
        fee_payer: &Address,
        recent_blockhash: &Blockhash,
    ) -> Result<Self, SolError> {
        struct AccountEntry {
            address: Address,
            is_signer: bool,
            is_writable: bool,
        }

        // Instruction account lists are tiny, a Vec scan beats a map here.
        let mut entries: Vec<AccountEntry> = Vec::new();
        let mut upsert = |address: Address, signer: bool, writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|e| e.address == address) {
                entry.is_signer |= signer;
                entry.is_writable |= writable;
            } else {
                entries.push(AccountEntry {
                    address,
                    is_signer: signer,
                    is_writable: writable,
                });
            }
        };

        upsert(*fee_payer, true, true);
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.address, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        // Stable sort keeps insertion order inside each class, so the fee
        // payer (rank 0, inserted first) stays at index 0.
        entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        });

        if entries.len() > u8::MAX as usize + 1 {
            return Err(SolError::TransactionBuildError(format!(
                "{} accounts exceed the 256-account limit",
                entries.len()
            )));
        }

        let num_required_signatures = entries.iter().filter(|e| e.is_signer).count() as u8;
        let num_readonly_signed = entries
            .iter()
            .filter(|e| e.is_signer && !e.is_writable)
            .count() as u8;
        let num_readonly_unsigned = entries
            .iter()
            .filter(|e| !e.is_signer && !e.is_writable)
            .count() as u8;

        let account_keys: Vec<Address> = entries.iter().map(|e| e.address).collect();
        let index_of = |address: &Address| -> Result<u8, SolError> {
            account_keys
                .iter()
                .position(|k| k == address)
                .map(|i| i as u8)
                .ok_or_else(|| {
                    SolError::TransactionBuildError(format!("{address} not in account keys"))
                })
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices: ix
                    .accounts
                    .iter()
                    .map(|meta| index_of(&meta.address))
                    .collect::<Result<_, _>>()?,
                data: ix.data.clone(),
            });
        }

        Ok(Self {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash: *recent_blockhash,
            instructions: compiled,
        })
    }

    /// The addresses that must sign, in signature-slot order.
    pub fn signer_keys(&self) -> &[Address] {
        let n = (self.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn fee_payer(&self) -> Option<&Address> {
        self.account_keys.first()
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = self.num_required_signatures as usize;
        if index < signers {
            index < signers - self.num_readonly_signed as usize
        } else {
            index < self.account_keys.len() - self.num_readonly_unsigned as usize
        }
    }

    /// Program id of the instruction at `index`, if any.
    pub fn program_id(&self, index: usize) -> Option<&Address> {
        let ix = self.instructions.get(index)?;
        self.account_keys.get(ix.program_id_index as usize)
    }

    /// Fee the ledger charges for this message at a flat per-signature rate.
    pub fn fee(&self, lamports_per_signature: u64) -> u64 {
        lamports_per_signature.saturating_mul(self.num_required_signatures as u64)
    }

    /// Expand compiled instructions back into address-based instructions.
    pub fn decompile(&self) -> Result<Vec<Instruction>, SolError> {
        let key = |i: u8| {
            self.account_keys.get(i as usize).copied().ok_or_else(|| {
                SolError::SerializationError(format!("account index {i} out of range"))
            })
        };

        self.instructions
            .iter()
            .map(|cix| {
                let accounts = cix
                    .account_indices
                    .iter()
                    .map(|&i| {
                        Ok(AccountMeta {
                            address: key(i)?,
                            is_signer: self.is_signer(i as usize),
                            is_writable: self.is_writable(i as usize),
                        })
                    })
                    .collect::<Result<_, SolError>>()?;
                Ok(Instruction {
                    program_id: key(cix.program_id_index)?,
                    accounts,
                    data: cix.data.clone(),
                })
            })
            .collect()
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, SolError> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);

        buf.extend_from_slice(&compact_len(self.account_keys.len(), "account keys")?);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(&self.recent_blockhash.0);

        buf.extend_from_slice(&compact_len(self.instructions.len(), "instructions")?);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);

            buf.extend_from_slice(&compact_len(ix.account_indices.len(), "instruction accounts")?);
            buf.extend_from_slice(&ix.account_indices);

            buf.extend_from_slice(&compact_len(ix.data.len(), "instruction data bytes")?);
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }

    /// Parse a serialized message, returning it and the bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), SolError> {
        let mut cursor = Cursor { data, pos: 0 };

        let header = cursor.take(3, "message header")?;
        let (num_required_signatures, num_readonly_signed, num_readonly_unsigned) =
            (header[0], header[1], header[2]);

        let num_accounts = cursor.compact()?;
        let mut account_keys = Vec::with_capacity(num_accounts);
        for _ in 0..num_accounts {
            account_keys.push(Address::new(cursor.array("account key")?));
        }

        let recent_blockhash = Blockhash(cursor.array("recent blockhash")?);

        let num_instructions = cursor.compact()?;
        let mut instructions = Vec::with_capacity(num_instructions);
        for _ in 0..num_instructions {
            let program_id_index = cursor.take(1, "program id index")?[0];
            let n = cursor.compact()?;
            let account_indices = cursor.take(n, "account indices")?.to_vec();
            let n = cursor.compact()?;
            let data = cursor.take(n, "instruction data")?.to_vec();

            let max_index = std::iter::once(program_id_index)
                .chain(account_indices.iter().copied())
                .max()
                .unwrap_or(0);
            if max_index as usize >= account_keys.len() {
                return Err(SolError::SerializationError(format!(
                    "account index {max_index} out of range for {} keys",
                    account_keys.len()
                )));
            }

            instructions.push(CompiledInstruction {
                program_id_index,
                account_indices,
                data,
            });
        }

        if num_required_signatures as usize > account_keys.len()
            || (num_readonly_signed as usize) > num_required_signatures as usize
            || num_readonly_unsigned as usize + num_required_signatures as usize
                > account_keys.len()
        {
            return Err(SolError::SerializationError(
                "message header inconsistent with account keys".into(),
            ));
        }

        Ok((
            Self {
                account_keys,
                num_required_signatures,
                num_readonly_signed,
                num_readonly_unsigned,
                recent_blockhash,
                instructions,
            },
            cursor.pos,
        ))
    }
}

// ---------------------------------------------------------------------------
// Signed transaction
// ---------------------------------------------------------------------------

/// A message with one signature per required signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl SignedTransaction {
    /// Sign `message` with the supplied key set.
    ///
    /// Each required signer must have a key in `signers`; extra keys are
    /// ignored. Fails with `MissingSigner` naming the first uncovered address.
    pub fn sign(message: Message, signers: &[&Keypair]) -> Result<Self, SolError> {
        let message_bytes = message.serialize()?;

        let signatures = message
            .signer_keys()
            .iter()
            .map(|required| {
                signers
                    .iter()
                    .find(|k| k.address() == *required)
                    .map(|k| Signature(k.sign(&message_bytes)))
                    .ok_or_else(|| SolError::MissingSigner {
                        operation: SIGN_OPERATION.to_string(),
                        address: required.to_base58(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            signatures,
            message,
        })
    }

    /// The transaction id: its first signature.
    pub fn signature(&self) -> Signature {
        self.signatures.first().copied().unwrap_or_default()
    }

    /// Check every signature against its signer key.
    pub fn verify(&self) -> Result<(), SolError> {
        let keys = self.message.signer_keys();
        if keys.len() != self.signatures.len() {
            return Err(SolError::SigningError(format!(
                "{} signatures for {} required signers",
                self.signatures.len(),
                keys.len()
            )));
        }

        let message_bytes = self.message.serialize()?;
        for (key, signature) in keys.iter().zip(&self.signatures) {
            if !verify_signature(key, &message_bytes, &signature.0)? {
                return Err(SolError::SigningError(format!(
                    "signature verification failed for {key}"
                )));
            }
        }
        Ok(())
    }

    /// Serialize into the wire format submitted via `sendTransaction`.
    pub fn to_wire(&self) -> Result<Vec<u8>, SolError> {
        let message_bytes = self.message.serialize()?;
        let mut wire =
            Vec::with_capacity(3 + SIGNATURE_LEN * self.signatures.len() + message_bytes.len());
        wire.extend_from_slice(&compact_len(self.signatures.len(), "signatures")?);
        for signature in &self.signatures {
            wire.extend_from_slice(&signature.0);
        }
        wire.extend_from_slice(&message_bytes);

        if wire.len() > PACKET_DATA_SIZE {
            return Err(SolError::TransactionBuildError(format!(
                "transaction is {} bytes, limit is {PACKET_DATA_SIZE}",
                wire.len()
            )));
        }
        Ok(wire)
    }

    /// Parse a wire-format transaction.
    pub fn from_wire(raw_tx: &[u8]) -> Result<Self, SolError> {
        let (num_sigs, compact_len) = decode_compact_u16(raw_tx)?;
        if num_sigs == 0 {
            return Err(SolError::TransactionBuildError(
                "transaction has zero signatures".into(),
            ));
        }

        let sigs_end = compact_len + num_sigs as usize * SIGNATURE_LEN;
        if sigs_end > raw_tx.len() {
            return Err(SolError::SerializationError(
                "transaction too short: signature slots exceed length".into(),
            ));
        }

        let signatures = raw_tx[compact_len..sigs_end]
            .chunks_exact(SIGNATURE_LEN)
            .map(|chunk| {
                let mut sig = [0u8; SIGNATURE_LEN];
                sig.copy_from_slice(chunk);
                Signature(sig)
            })
            .collect();

        let (message, consumed) = Message::deserialize(&raw_tx[sigs_end..])?;
        if sigs_end + consumed != raw_tx.len() {
            return Err(SolError::SerializationError(format!(
                "{} trailing bytes after transaction",
                raw_tx.len() - sigs_end - consumed
            )));
        }

        Ok(Self {
            signatures,
            message,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], SolError> {
        if self.data.len() - self.pos < n {
            return Err(SolError::SerializationError(format!(
                "message too short for {what}"
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array(&mut self, what: &str) -> Result<[u8; 32], SolError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32, what)?);
        Ok(out)
    }

    fn compact(&mut self) -> Result<usize, SolError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_instruction::{self, SYSTEM_PROGRAM_ID};

    fn key(seed: u8) -> Keypair {
        Keypair::from_seed(&[seed; 32])
    }

    fn transfer_builder(from: &Keypair, to: Address) -> TransactionBuilder {
        TransactionBuilder::new(from.address())
            .add(system_instruction::transfer(&from.address(), &to, 1_000).unwrap())
    }

    // -- compact-u16 --------------------------------------------------------

    #[test]
    fn compact_u16_boundaries() {
        assert_eq!(encode_compact_u16(0), vec![0x00]);
        assert_eq!(encode_compact_u16(0x7f), vec![0x7f]);
        assert_eq!(encode_compact_u16(128), vec![0x80, 0x01]);
        assert_eq!(encode_compact_u16(16383), vec![0xff, 0x7f]);
        assert_eq!(encode_compact_u16(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode_compact_u16(u16::MAX), vec![0xff, 0xff, 0x03]);
    }

    #[test]
    fn decode_compact_u16_consumes_prefix() {
        assert_eq!(decode_compact_u16(&[0x80, 0x01, 0xAA]).unwrap(), (128, 2));
        assert_eq!(decode_compact_u16(&[0xff, 0xff, 0x03]).unwrap(), (u16::MAX, 3));
    }

    #[test]
    fn decode_compact_u16_errors() {
        assert!(decode_compact_u16(&[]).is_err());
        assert!(decode_compact_u16(&[0x80]).is_err());
        // 0xff 0xff 0x07 encodes 0x1ffff which overflows u16.
        assert!(decode_compact_u16(&[0xff, 0xff, 0x07]).is_err());
    }

    // -- Compilation ---------------------------------------------------------

    #[test]
    fn fee_payer_is_first_writable_signer() {
        let payer = key(1);
        let to = Address::new([2; 32]);
        let message = transfer_builder(&payer, to).compile(&Blockhash([0xAA; 32])).unwrap();

        assert_eq!(message.account_keys[0], payer.address());
        assert_eq!(message.account_keys.len(), 3);
        assert_eq!(message.num_required_signatures, 1);
        assert_eq!(message.num_readonly_signed, 0);
        assert_eq!(message.num_readonly_unsigned, 1);
        assert!(message.is_writable(0));
        assert!(message.is_writable(1));
        assert!(!message.is_writable(2));
        assert_eq!(message.program_id(0), Some(&SYSTEM_PROGRAM_ID));
    }

    #[test]
    fn separate_fee_payer_and_signer() {
        let payer = key(1);
        let authority = key(2);
        let to = Address::new([3; 32]);
        let builder = TransactionBuilder::new(payer.address())
            .add(system_instruction::transfer(&authority.address(), &to, 5).unwrap());

        assert_eq!(
            builder.required_signers(),
            vec![payer.address(), authority.address()]
        );
        let message = builder.compile(&Blockhash::default()).unwrap();
        assert_eq!(message.signer_keys(), &[payer.address(), authority.address()]);
    }

    #[test]
    fn self_transfer_deduplicates_accounts() {
        let payer = key(1);
        let message = transfer_builder(&payer, payer.address())
            .compile(&Blockhash::default())
            .unwrap();
        assert_eq!(message.account_keys.len(), 2);
    }

    #[test]
    fn instruction_order_is_preserved() {
        let payer = key(1);
        let a = Address::new([5; 32]);
        let b = Address::new([6; 32]);
        let message = TransactionBuilder::new(payer.address())
            .add(system_instruction::transfer(&payer.address(), &a, 1).unwrap())
            .add(system_instruction::transfer(&payer.address(), &b, 2).unwrap())
            .compile(&Blockhash::default())
            .unwrap();
        let decompiled = message.decompile().unwrap();
        assert_eq!(decompiled[0].accounts[1].address, a);
        assert_eq!(decompiled[1].accounts[1].address, b);
    }

    #[test]
    fn empty_builder_fails_to_compile() {
        let builder = TransactionBuilder::new(Address::new([1; 32]));
        assert!(builder.compile(&Blockhash::default()).is_err());
    }

    #[test]
    fn fee_scales_with_signatures() {
        let payer = key(1);
        let authority = key(2);
        let message = TransactionBuilder::new(payer.address())
            .add(system_instruction::transfer(&authority.address(), &payer.address(), 5).unwrap())
            .compile(&Blockhash::default())
            .unwrap();
        assert_eq!(message.fee(5_000), 10_000);
    }

    // -- Serialization --------------------------------------------------------

    #[test]
    fn message_serialization_roundtrip() {
        let payer = key(1);
        let message = transfer_builder(&payer, Address::new([9; 32]))
            .compile(&Blockhash([0xCC; 32]))
            .unwrap();
        let bytes = message.serialize().unwrap();
        assert_eq!(bytes[0], message.num_required_signatures);

        let (parsed, consumed) = Message::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, message);
    }

    #[test]
    fn message_contains_blockhash_after_keys() {
        let payer = key(1);
        let message = transfer_builder(&payer, Address::new([9; 32]))
            .compile(&Blockhash([0xCC; 32]))
            .unwrap();
        let bytes = message.serialize().unwrap();
        let offset = 3 + 1 + 32 * message.account_keys.len();
        assert_eq!(&bytes[offset..offset + 32], &[0xCC; 32]);
    }

    #[test]
    fn truncated_message_fails() {
        let payer = key(1);
        let bytes = transfer_builder(&payer, Address::new([9; 32]))
            .compile(&Blockhash::default())
            .unwrap()
            .serialize()
            .unwrap();
        assert!(Message::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    // -- Signing ------------------------------------------------------------

    #[test]
    fn signed_transaction_verifies_and_roundtrips() {
        let payer = key(0x42);
        let tx = transfer_builder(&payer, Address::new([0xBB; 32]))
            .sign(&Blockhash([0xCC; 32]), &[&payer])
            .unwrap();
        tx.verify().unwrap();

        let wire = tx.to_wire().unwrap();
        assert_eq!(wire[0], 0x01);
        assert_eq!(SignedTransaction::from_wire(&wire).unwrap(), tx);
    }

    #[test]
    fn signing_is_deterministic() {
        let payer = key(0x55);
        let builder = transfer_builder(&payer, Address::new([0x77; 32]));
        let a = builder.sign(&Blockhash([0x99; 32]), &[&payer]).unwrap();
        let b = builder.sign(&Blockhash([0x99; 32]), &[&payer]).unwrap();
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn missing_signer_is_reported() {
        let payer = key(1);
        let authority = key(2);
        let transfer =
            system_instruction::transfer(&authority.address(), &payer.address(), 5).unwrap();
        let builder = TransactionBuilder::new(payer.address()).add(transfer);

        let err = builder.sign(&Blockhash::default(), &[&payer]).unwrap_err();
        match err {
            SolError::MissingSigner { operation, address } => {
                assert_eq!(operation, SIGN_OPERATION);
                assert_eq!(address, authority.address().to_base58());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(builder.check_signers(&[&payer, &authority]).is_ok());
    }

    #[test]
    fn extra_signers_are_ignored() {
        let payer = key(1);
        let extra = key(3);
        let tx = transfer_builder(&payer, Address::new([2; 32]))
            .sign(&Blockhash::default(), &[&extra, &payer])
            .unwrap();
        assert_eq!(tx.signatures.len(), 1);
        tx.verify().unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let payer = key(1);
        let mut tx = transfer_builder(&payer, Address::new([2; 32]))
            .sign(&Blockhash::default(), &[&payer])
            .unwrap();
        tx.message.recent_blockhash = Blockhash([1; 32]);
        assert!(tx.verify().is_err());
    }

    #[test]
    fn from_wire_rejects_bad_input() {
        assert!(SignedTransaction::from_wire(&[]).is_err());
        assert!(SignedTransaction::from_wire(&[0x01]).is_err());
        let err = SignedTransaction::from_wire(&[0x00, 0x01, 0x00, 0x00]).unwrap_err();
        assert!(err.to_string().contains("zero signatures"));
    }

    #[test]
    fn signature_and_blockhash_parse_from_base58() {
        let payer = key(1);
        let tx = transfer_builder(&payer, Address::new([2; 32]))
            .sign(&Blockhash([4; 32]), &[&payer])
            .unwrap();
        let sig = tx.signature();
        assert_eq!(sig.to_string().parse::<Signature>().unwrap(), sig);

        let hash = Blockhash([4; 32]);
        assert_eq!(hash.to_string().parse::<Blockhash>().unwrap(), hash);
    }
}
