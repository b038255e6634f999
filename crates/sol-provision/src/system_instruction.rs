//! System program instruction builders.
//!
//! The system program decodes its instructions with a u32 little-endian
//! variant tag followed by the fields below; strings carry a u64 length
//! prefix.
//!
//! | tag | instruction           | accounts                                  |
//! |-----|-----------------------|-------------------------------------------|
//! | 0   | CreateAccount         | from (s,w), new (s,w)                     |
//! | 2   | Transfer              | from (s,w), to (w)                        |
//! | 3   | CreateAccountWithSeed | from (s,w), new (w), base (s) if != from  |
//! | 11  | TransferWithSeed      | from (w), base (s), to (w)                |

use crate::address::{Address, MAX_SEED_LEN};
use crate::error::SolError;
use crate::schema::{
    Field, FieldType, FieldValue, LengthPrefix, Record, Schema, TagWidth, TaggedSchema, Variant,
};
use crate::transaction::{AccountMeta, Instruction};

/// The System Program address: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Address = Address::new([0u8; 32]);

/// Custom error code the system program returns when the target account is
/// already in use.
pub const ERROR_ACCOUNT_ALREADY_IN_USE: u32 = 0;

/// Custom error code for a debit that would leave a negative balance.
pub const ERROR_RESULT_WITH_NEGATIVE_LAMPORTS: u32 = 1;

pub const SYSTEM_INSTRUCTIONS: TaggedSchema = TaggedSchema::new(
    "SystemInstruction",
    TagWidth::U32,
    &[
        Variant::new(
            0,
            Schema::new(
                "CreateAccount",
                &[
                    Field::new("lamports", FieldType::U64),
                    Field::new("space", FieldType::U64),
                    Field::new("owner", FieldType::Address),
                ],
            ),
        ),
        Variant::new(
            2,
            Schema::new("Transfer", &[Field::new("lamports", FieldType::U64)]),
        ),
        Variant::new(
            3,
            Schema::new(
                "CreateAccountWithSeed",
                &[
                    Field::new("base", FieldType::Address),
                    Field::new("seed", FieldType::Str(LengthPrefix::U64)),
                    Field::new("lamports", FieldType::U64),
                    Field::new("space", FieldType::U64),
                    Field::new("owner", FieldType::Address),
                ],
            ),
        ),
        Variant::new(
            11,
            Schema::new(
                "TransferWithSeed",
                &[
                    Field::new("lamports", FieldType::U64),
                    Field::new("from_seed", FieldType::Str(LengthPrefix::U64)),
                    Field::new("from_owner", FieldType::Address),
                ],
            ),
        ),
    ],
);

fn check_seed(seed: &str) -> Result<(), SolError> {
    if seed.len() > MAX_SEED_LEN {
        return Err(SolError::InvalidSeedLength {
            len: seed.len(),
            max: MAX_SEED_LEN,
        });
    }
    Ok(())
}

/// Create a new account at a key-pair address; both keys sign.
pub fn create_account(
    from: &Address,
    new_account: &Address,
    lamports: u64,
    space: u64,
    owner: &Address,
) -> Result<Instruction, SolError> {
    let data = SYSTEM_INSTRUCTIONS.encode(
        "CreateAccount",
        &Record::new()
            .with("lamports", FieldValue::U64(lamports))
            .with("space", FieldValue::U64(space))
            .with("owner", FieldValue::Address(*owner)),
    )?;

    Ok(Instruction::new(
        SYSTEM_PROGRAM_ID,
        vec![AccountMeta::new(*from, true), AccountMeta::new(*new_account, true)],
        data,
    ))
}

/// Create an account at `to`, which must equal
/// `Address::derive_with_seed(base, seed, owner)`.
///
/// `from` funds the account with `lamports`; `base` signs for the derived
/// address. Funding below the rent-exempt minimum is not rejected here.
pub fn create_account_with_seed(
    from: &Address,
    to: &Address,
    base: &Address,
    seed: &str,
    lamports: u64,
    space: u64,
    owner: &Address,
) -> Result<Instruction, SolError> {
    check_seed(seed)?;
    let data = SYSTEM_INSTRUCTIONS.encode(
        "CreateAccountWithSeed",
        &Record::new()
            .with("base", FieldValue::Address(*base))
            .with("seed", FieldValue::Str(seed.to_owned()))
            .with("lamports", FieldValue::U64(lamports))
            .with("space", FieldValue::U64(space))
            .with("owner", FieldValue::Address(*owner)),
    )?;

    let mut accounts = vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)];
    if base != from {
        accounts.push(AccountMeta::new_readonly(*base, true));
    }

    Ok(Instruction::new(SYSTEM_PROGRAM_ID, accounts, data))
}

/// Move `lamports` from a wallet account to `to`.
pub fn transfer(from: &Address, to: &Address, lamports: u64) -> Result<Instruction, SolError> {
    let data = SYSTEM_INSTRUCTIONS.encode(
        "Transfer",
        &Record::new().with("lamports", FieldValue::U64(lamports)),
    )?;

    Ok(Instruction::new(
        SYSTEM_PROGRAM_ID,
        vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
        data,
    ))
}

/// Move `lamports` out of a seed-derived system account. The derived
/// account cannot sign, so its `base` key signs instead.
pub fn transfer_with_seed(
    from: &Address,
    base: &Address,
    from_seed: &str,
    from_owner: &Address,
    to: &Address,
    lamports: u64,
) -> Result<Instruction, SolError> {
    check_seed(from_seed)?;
    let data = SYSTEM_INSTRUCTIONS.encode(
        "TransferWithSeed",
        &Record::new()
            .with("lamports", FieldValue::U64(lamports))
            .with("from_seed", FieldValue::Str(from_seed.to_owned()))
            .with("from_owner", FieldValue::Address(*from_owner)),
    )?;

    Ok(Instruction::new(
        SYSTEM_PROGRAM_ID,
        vec![
            AccountMeta::new(*from, false),
            AccountMeta::new_readonly(*base, true),
            AccountMeta::new(*to, false),
        ],
        data,
    ))
}
