//! Client side of the counter program.
//!
//! Every instruction is one tag byte plus a `some_data: u8` payload and is
//! invoked against exactly two writable accounts, in order: the counter
//! account, then the lamport source used by `TransferLamports`.

use crate::address::Address;
use crate::error::SolError;
use crate::schema::{Field, FieldType, FieldValue, Record, Schema, TagWidth, TaggedSchema, Variant};
use crate::transaction::{AccountMeta, Instruction};

/// Lamports `TransferLamports` moves from the second account to the first.
pub const TRANSFER_LAMPORTS_AMOUNT: u64 = 500_000_000;
/// Custom error when the second account cannot cover the transfer.
pub const ERROR_INSUFFICIENT_LAMPORTS: u32 = 5;

const PAYLOAD: &[Field] = &[Field::new("some_data", FieldType::U8)];

pub const COUNTER_INSTRUCTIONS: TaggedSchema = TaggedSchema::new(
    "CounterInstruction",
    TagWidth::U8,
    &[
        Variant::new(0, Schema::new("Increment", PAYLOAD)),
        Variant::new(1, Schema::new("Noop", PAYLOAD)),
        Variant::new(2, Schema::new("TransferLamports", PAYLOAD)),
    ],
);

/// State account layout: a single counter byte.
pub const COUNTER_SCHEMA: Schema =
    Schema::new("Counter", &[Field::new("counter", FieldType::U8)]);
pub const COUNTER_ACCOUNT_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterInstruction {
    /// Increment the counter held by the first account.
    Increment,
    Noop,
    /// Move [`TRANSFER_LAMPORTS_AMOUNT`] from the second account to the first.
    TransferLamports,
}

impl CounterInstruction {
    fn variant_name(&self) -> &'static str {
        match self {
            CounterInstruction::Increment => "Increment",
            CounterInstruction::Noop => "Noop",
            CounterInstruction::TransferLamports => "TransferLamports",
        }
    }

    /// Decode instruction data into the instruction and its payload byte.
    pub fn unpack(data: &[u8]) -> Result<(Self, u8), SolError> {
        let (variant, record) = COUNTER_INSTRUCTIONS.decode(data)?;
        let instruction = match variant.tag {
            0 => CounterInstruction::Increment,
            1 => CounterInstruction::Noop,
            _ => CounterInstruction::TransferLamports,
        };
        Ok((instruction, record.u8("some_data")?))
    }
}

/// Build an instruction for the counter program deployed at `program_id`.
pub fn instruction(
    program_id: &Address,
    kind: CounterInstruction,
    some_data: u8,
    counter_account: &Address,
    second_account: &Address,
) -> Result<Instruction, SolError> {
    let data = COUNTER_INSTRUCTIONS.encode(
        kind.variant_name(),
        &Record::new().with("some_data", FieldValue::U8(some_data)),
    )?;

    Ok(Instruction::new(
        *program_id,
        vec![
            AccountMeta::new(*counter_account, false),
            AccountMeta::new(*second_account, false),
        ],
        data,
    ))
}

/// Read the counter out of a state account buffer.
pub fn decode_counter(data: &[u8]) -> Result<u8, SolError> {
    COUNTER_SCHEMA.decode(data)?.u8("counter")
}

pub fn encode_counter(counter: u8) -> Result<Vec<u8>, SolError> {
    COUNTER_SCHEMA.encode(&Record::new().with("counter", FieldValue::U8(counter)))
}
