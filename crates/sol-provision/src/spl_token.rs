//! Token program instructions and state layouts.
//!
//! Implements the mint/transfer/burn instruction set, associated token
//! account (ATA) derivation, and the packed `Mint` and token `Account`
//! layouts without pulling in the `spl-token` crates. Both instruction
//! payloads and state are described as [`Schema`] tables.
//!
//! Token instructions start with a single u8 tag:
//!
//! | tag | instruction      | payload               |
//! |-----|------------------|-----------------------|
//! | 3   | Transfer         | amount u64            |
//! | 7   | MintTo           | amount u64            |
//! | 12  | TransferChecked  | amount u64, decimals  |
//! | 15  | BurnChecked      | amount u64, decimals  |
//! | 20  | InitializeMint2  | decimals, authority, optional freeze authority |

use crate::address::Address;
use crate::error::SolError;
use crate::schema::{Field, FieldType, FieldValue, Record, Schema, TagWidth, TaggedSchema, Variant};
use crate::system_instruction::SYSTEM_PROGRAM_ID;
use crate::transaction::{AccountMeta, Instruction};

// ---------------------------------------------------------------------------
// Well-known program IDs
// ---------------------------------------------------------------------------

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Address = Address::new([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79,
    0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff,
    0x00, 0xa9,
]);

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Address = Address::new([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d,
    0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9,
    0xf8, 0x59,
]);

/// Token program custom error: source balance too low.
pub const ERROR_INSUFFICIENT_FUNDS: u32 = 1;
/// Token program custom error: account and mint disagree.
pub const ERROR_MINT_MISMATCH: u32 = 3;
/// Token program custom error: wrong owner or authority signed.
pub const ERROR_OWNER_MISMATCH: u32 = 4;
/// Token program custom error: supplied decimals differ from the mint's.
pub const ERROR_MINT_DECIMALS_MISMATCH: u32 = 18;

// ---------------------------------------------------------------------------
// Instruction layouts
// ---------------------------------------------------------------------------

const AMOUNT: &[Field] = &[Field::new("amount", FieldType::U64)];
const AMOUNT_DECIMALS: &[Field] = &[
    Field::new("amount", FieldType::U64),
    Field::new("decimals", FieldType::U8),
];

pub const TOKEN_INSTRUCTIONS: TaggedSchema = TaggedSchema::new(
    "TokenInstruction",
    TagWidth::U8,
    &[
        Variant::new(3, Schema::new("Transfer", AMOUNT)),
        Variant::new(7, Schema::new("MintTo", AMOUNT)),
        Variant::new(12, Schema::new("TransferChecked", AMOUNT_DECIMALS)),
        Variant::new(15, Schema::new("BurnChecked", AMOUNT_DECIMALS)),
        // The optional freeze authority follows as 32 bytes when the flag is 1.
        Variant::new(
            20,
            Schema::new(
                "InitializeMint2",
                &[
                    Field::new("decimals", FieldType::U8),
                    Field::new("mint_authority", FieldType::Address),
                    Field::new("freeze_authority_option", FieldType::U8),
                ],
            ),
        ),
    ],
);

fn amount_record(amount: u64) -> Record {
    Record::new().with("amount", FieldValue::U64(amount))
}

fn amount_decimals_record(amount: u64, decimals: u8) -> Record {
    amount_record(amount).with("decimals", FieldValue::U8(decimals))
}

fn nonzero(amount: u64, what: &str) -> Result<(), SolError> {
    if amount == 0 {
        return Err(SolError::TransactionBuildError(format!(
            "{what} amount must be > 0"
        )));
    }
    Ok(())
}

/// Build an `InitializeMint2` instruction for a freshly allocated mint.
pub fn initialize_mint2(
    mint: &Address,
    mint_authority: &Address,
    freeze_authority: Option<&Address>,
    decimals: u8,
) -> Result<Instruction, SolError> {
    let record = Record::new()
        .with("decimals", FieldValue::U8(decimals))
        .with("mint_authority", FieldValue::Address(*mint_authority))
        .with(
            "freeze_authority_option",
            FieldValue::U8(u8::from(freeze_authority.is_some())),
        );
    let mut data = TOKEN_INSTRUCTIONS.encode("InitializeMint2", &record)?;
    if let Some(freeze) = freeze_authority {
        data.extend_from_slice(freeze.as_bytes());
    }

    Ok(Instruction::new(
        TOKEN_PROGRAM_ID,
        vec![AccountMeta::new(*mint, false)],
        data,
    ))
}

/// Build a `MintTo` instruction; the mint authority signs.
pub fn mint_to(
    mint: &Address,
    destination: &Address,
    mint_authority: &Address,
    amount: u64,
) -> Result<Instruction, SolError> {
    nonzero(amount, "mint")?;
    let data = TOKEN_INSTRUCTIONS.encode("MintTo", &amount_record(amount))?;

    Ok(Instruction::new(
        TOKEN_PROGRAM_ID,
        vec![
            AccountMeta::new(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*mint_authority, true),
        ],
        data,
    ))
}

/// Build a token `Transfer` instruction.
///
/// Transfers `amount` of the smallest token unit (e.g. for a token with 9
/// decimals, `amount = 1_000_000_000` transfers 1 whole token).
pub fn transfer(
    source: &Address,
    destination: &Address,
    owner: &Address,
    amount: u64,
) -> Result<Instruction, SolError> {
    nonzero(amount, "transfer")?;
    let data = TOKEN_INSTRUCTIONS.encode("Transfer", &amount_record(amount))?;

    Ok(Instruction::new(
        TOKEN_PROGRAM_ID,
        vec![
            AccountMeta::new(*source, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data,
    ))
}

/// Build a `TransferChecked` instruction; the program validates `decimals`
/// against the mint.
pub fn transfer_checked(
    source: &Address,
    mint: &Address,
    destination: &Address,
    owner: &Address,
    amount: u64,
    decimals: u8,
) -> Result<Instruction, SolError> {
    nonzero(amount, "transfer")?;
    let data = TOKEN_INSTRUCTIONS.encode(
        "TransferChecked",
        &amount_decimals_record(amount, decimals),
    )?;

    Ok(Instruction::new(
        TOKEN_PROGRAM_ID,
        vec![
            AccountMeta::new(*source, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data,
    ))
}

/// Build a `BurnChecked` instruction; the program validates `decimals`
/// against the mint.
pub fn burn_checked(
    account: &Address,
    mint: &Address,
    owner: &Address,
    amount: u64,
    decimals: u8,
) -> Result<Instruction, SolError> {
    nonzero(amount, "burn")?;
    let data =
        TOKEN_INSTRUCTIONS.encode("BurnChecked", &amount_decimals_record(amount, decimals))?;

    Ok(Instruction::new(
        TOKEN_PROGRAM_ID,
        vec![
            AccountMeta::new(*account, false),
            AccountMeta::new(*mint, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data,
    ))
}

/// Build the associated-token-program instruction that creates `wallet`'s
/// token account for `mint`, funded by `payer`.
///
/// The idempotent form succeeds when the account already exists.
pub fn create_associated_token_account(
    payer: &Address,
    wallet: &Address,
    mint: &Address,
    idempotent: bool,
) -> Result<Instruction, SolError> {
    let ata = derive_associated_token_address(wallet, mint)?;

    Ok(Instruction::new(
        ASSOCIATED_TOKEN_PROGRAM_ID,
        vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*wallet, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        vec![u8::from(idempotent)],
    ))
}

// ---------------------------------------------------------------------------
// Associated Token Account (PDA) derivation
// ---------------------------------------------------------------------------

/// Derive the associated token account address for a wallet + mint pair.
///
/// The ATA is a Program Derived Address (PDA) with seeds
/// `[wallet_address, token_program_id, mint_address]` derived from the
/// Associated Token Account program.
pub fn derive_associated_token_address(
    wallet: &Address,
    mint: &Address,
) -> Result<Address, SolError> {
    Address::find_program_address(
        &[wallet.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Convert whole tokens to base units for a mint with `decimals`.
pub fn to_base_units(whole_tokens: u64, decimals: u8) -> Result<u64, SolError> {
    10u64
        .checked_pow(decimals as u32)
        .and_then(|scale| whole_tokens.checked_mul(scale))
        .ok_or_else(|| {
            SolError::TransactionBuildError(format!(
                "{whole_tokens} tokens at {decimals} decimals overflows u64"
            ))
        })
}

// ---------------------------------------------------------------------------
// State layouts
// ---------------------------------------------------------------------------

/// Packed mint layout, 82 bytes. `COption` tags are u32 LE.
pub const MINT_SCHEMA: Schema = Schema::new(
    "Mint",
    &[
        Field::new("mint_authority_option", FieldType::U32),
        Field::new("mint_authority", FieldType::Address),
        Field::new("supply", FieldType::U64),
        Field::new("decimals", FieldType::U8),
        Field::new("is_initialized", FieldType::Bool),
        Field::new("freeze_authority_option", FieldType::U32),
        Field::new("freeze_authority", FieldType::Address),
    ],
);

/// Packed token account layout, 165 bytes.
pub const TOKEN_ACCOUNT_SCHEMA: Schema = Schema::new(
    "TokenAccount",
    &[
        Field::new("mint", FieldType::Address),
        Field::new("owner", FieldType::Address),
        Field::new("amount", FieldType::U64),
        Field::new("delegate_option", FieldType::U32),
        Field::new("delegate", FieldType::Address),
        Field::new("state", FieldType::U8),
        Field::new("is_native_option", FieldType::U32),
        Field::new("is_native", FieldType::U64),
        Field::new("delegated_amount", FieldType::U64),
        Field::new("close_authority_option", FieldType::U32),
        Field::new("close_authority", FieldType::Address),
    ],
);

pub const MINT_LEN: usize = 82;
pub const TOKEN_ACCOUNT_LEN: usize = 165;

fn coption(record: &Record, flag: &str, value: &str) -> Result<Option<Address>, SolError> {
    match record.u32(flag)? {
        0 => Ok(None),
        1 => Ok(Some(record.address(value)?)),
        other => Err(SolError::SchemaMismatch(format!("{flag}: invalid tag {other}"))),
    }
}

fn coption_fields(value: Option<&Address>) -> (FieldValue, FieldValue) {
    (
        FieldValue::U32(u32::from(value.is_some())),
        FieldValue::Address(value.copied().unwrap_or_default()),
    )
}

/// Decoded mint state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mint {
    pub mint_authority: Option<Address>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
    pub freeze_authority: Option<Address>,
}

impl Mint {
    pub fn unpack(data: &[u8]) -> Result<Self, SolError> {
        let record = MINT_SCHEMA.decode_exact(data)?;
        Ok(Self {
            mint_authority: coption(&record, "mint_authority_option", "mint_authority")?,
            supply: record.u64("supply")?,
            decimals: record.u8("decimals")?,
            is_initialized: record.bool("is_initialized")?,
            freeze_authority: coption(&record, "freeze_authority_option", "freeze_authority")?,
        })
    }

    pub fn pack(&self) -> Result<Vec<u8>, SolError> {
        let (mint_flag, mint_authority) = coption_fields(self.mint_authority.as_ref());
        let (freeze_flag, freeze_authority) = coption_fields(self.freeze_authority.as_ref());
        MINT_SCHEMA.encode(
            &Record::new()
                .with("mint_authority_option", mint_flag)
                .with("mint_authority", mint_authority)
                .with("supply", FieldValue::U64(self.supply))
                .with("decimals", FieldValue::U8(self.decimals))
                .with("is_initialized", FieldValue::Bool(self.is_initialized))
                .with("freeze_authority_option", freeze_flag)
                .with("freeze_authority", freeze_authority),
        )
    }
}

/// Lifecycle state of a token account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Uninitialized = 0,
    Initialized = 1,
    Frozen = 2,
}

impl TryFrom<u8> for AccountState {
    type Error = SolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccountState::Uninitialized),
            1 => Ok(AccountState::Initialized),
            2 => Ok(AccountState::Frozen),
            other => Err(SolError::SchemaMismatch(format!(
                "invalid token account state {other}"
            ))),
        }
    }
}

/// Decoded token account state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Address,
    pub owner: Address,
    pub amount: u64,
    pub delegate: Option<Address>,
    pub state: AccountState,
    pub is_native: Option<u64>,
    pub delegated_amount: u64,
    pub close_authority: Option<Address>,
}

impl TokenAccount {
    /// A fresh, initialized, empty account.
    pub fn new(mint: Address, owner: Address) -> Self {
        Self {
            mint,
            owner,
            amount: 0,
            delegate: None,
            state: AccountState::Initialized,
            is_native: None,
            delegated_amount: 0,
            close_authority: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state == AccountState::Frozen
    }

    pub fn unpack(data: &[u8]) -> Result<Self, SolError> {
        let record = TOKEN_ACCOUNT_SCHEMA.decode_exact(data)?;
        let is_native = match record.u32("is_native_option")? {
            0 => None,
            1 => Some(record.u64("is_native")?),
            other => {
                return Err(SolError::SchemaMismatch(format!(
                    "is_native_option: invalid tag {other}"
                )))
            }
        };

        Ok(Self {
            mint: record.address("mint")?,
            owner: record.address("owner")?,
            amount: record.u64("amount")?,
            delegate: coption(&record, "delegate_option", "delegate")?,
            state: AccountState::try_from(record.u8("state")?)?,
            is_native,
            delegated_amount: record.u64("delegated_amount")?,
            close_authority: coption(&record, "close_authority_option", "close_authority")?,
        })
    }

    pub fn pack(&self) -> Result<Vec<u8>, SolError> {
        let (delegate_flag, delegate) = coption_fields(self.delegate.as_ref());
        let (close_flag, close_authority) = coption_fields(self.close_authority.as_ref());
        TOKEN_ACCOUNT_SCHEMA.encode(
            &Record::new()
                .with("mint", FieldValue::Address(self.mint))
                .with("owner", FieldValue::Address(self.owner))
                .with("amount", FieldValue::U64(self.amount))
                .with("delegate_option", delegate_flag)
                .with("delegate", delegate)
                .with("state", FieldValue::U8(self.state as u8))
                .with(
                    "is_native_option",
                    FieldValue::U32(u32::from(self.is_native.is_some())),
                )
                .with("is_native", FieldValue::U64(self.is_native.unwrap_or(0)))
                .with("delegated_amount", FieldValue::U64(self.delegated_amount))
                .with("close_authority_option", close_flag)
                .with("close_authority", close_authority),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Constant verification ----------------------------------------------

    #[test]
    fn token_program_id_roundtrip() {
        assert_eq!(
            TOKEN_PROGRAM_ID.to_base58(),
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );
    }

    #[test]
    fn associated_token_program_id_roundtrip() {
        assert_eq!(
            ASSOCIATED_TOKEN_PROGRAM_ID.to_base58(),
            "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL"
        );
    }

    #[test]
    fn state_layout_widths() {
        assert_eq!(MINT_SCHEMA.fixed_len(), Some(MINT_LEN));
        assert_eq!(TOKEN_ACCOUNT_SCHEMA.fixed_len(), Some(TOKEN_ACCOUNT_LEN));
    }

    // -- Instructions -------------------------------------------------------

    #[test]
    fn transfer_data_encoding() {
        let ix = transfer(
            &Address::new([1; 32]),
            &Address::new([2; 32]),
            &Address::new([3; 32]),
            500_000,
        )
        .unwrap();
        assert_eq!(ix.data.len(), 9);
        assert_eq!(ix.data[0], 3);
        assert_eq!(&ix.data[1..], &500_000u64.to_le_bytes());
        assert_eq!(ix.program_id, TOKEN_PROGRAM_ID);
    }

    #[test]
    fn transfer_account_roles() {
        let ix = transfer(
            &Address::new([1; 32]),
            &Address::new([2; 32]),
            &Address::new([3; 32]),
            100,
        )
        .unwrap();
        assert!(ix.accounts[0].is_writable && !ix.accounts[0].is_signer);
        assert!(ix.accounts[1].is_writable && !ix.accounts[1].is_signer);
        assert!(ix.accounts[2].is_signer && !ix.accounts[2].is_writable);
    }

    #[test]
    fn zero_amounts_fail() {
        let a = Address::new([1; 32]);
        assert!(transfer(&a, &a, &a, 0).is_err());
        assert!(mint_to(&a, &a, &a, 0).is_err());
        assert!(burn_checked(&a, &a, &a, 0, 9).is_err());
    }

    #[test]
    fn mint_to_layout() {
        let mint = Address::new([1; 32]);
        let ix = mint_to(&mint, &Address::new([2; 32]), &Address::new([3; 32]), 7).unwrap();
        assert_eq!(ix.data[0], 7);
        assert_eq!(ix.accounts[0].address, mint);
        assert!(ix.accounts[2].is_signer);
    }

    #[test]
    fn burn_checked_carries_decimals() {
        let ix = burn_checked(
            &Address::new([1; 32]),
            &Address::new([2; 32]),
            &Address::new([3; 32]),
            20_000_000_000,
            9,
        )
        .unwrap();
        assert_eq!(ix.data.len(), 10);
        assert_eq!(ix.data[0], 15);
        assert_eq!(ix.data[9], 9);

        let (variant, record) = TOKEN_INSTRUCTIONS.decode(&ix.data).unwrap();
        assert_eq!(variant.schema.name, "BurnChecked");
        assert_eq!(record.u64("amount").unwrap(), 20_000_000_000);
    }

    #[test]
    fn transfer_checked_includes_mint() {
        let mint = Address::new([9; 32]);
        let ix = transfer_checked(
            &Address::new([1; 32]),
            &mint,
            &Address::new([2; 32]),
            &Address::new([3; 32]),
            5,
            6,
        )
        .unwrap();
        assert_eq!(ix.data[0], 12);
        assert_eq!(ix.accounts[1].address, mint);
        assert!(!ix.accounts[1].is_writable);
    }

    #[test]
    fn initialize_mint2_optional_freeze_authority() {
        let mint = Address::new([1; 32]);
        let authority = Address::new([2; 32]);
        let freeze = Address::new([3; 32]);

        let without = initialize_mint2(&mint, &authority, None, 9).unwrap();
        assert_eq!(without.data.len(), 1 + 1 + 32 + 1);
        assert_eq!(*without.data.last().unwrap(), 0);

        let with = initialize_mint2(&mint, &authority, Some(&freeze), 9).unwrap();
        assert_eq!(with.data.len(), 1 + 1 + 32 + 1 + 32);
        assert_eq!(&with.data[35..], freeze.as_bytes());
    }

    #[test]
    fn create_ata_instruction_targets_derived_address() {
        let payer = Address::new([1; 32]);
        let wallet = Address::new([2; 32]);
        let mint = Address::new([3; 32]);
        let ix = create_associated_token_account(&payer, &wallet, &mint, true).unwrap();
        assert_eq!(ix.program_id, ASSOCIATED_TOKEN_PROGRAM_ID);
        assert_eq!(ix.data, vec![1]);
        assert_eq!(
            ix.accounts[1].address,
            derive_associated_token_address(&wallet, &mint).unwrap()
        );
        assert!(ix.accounts[0].is_signer);
    }

    // -- PDA derivation -----------------------------------------------------

    #[test]
    fn ata_is_off_curve_and_deterministic() {
        let wallet = Address::new([0xAA; 32]);
        let mint = Address::new([0xBB; 32]);
        let a = derive_associated_token_address(&wallet, &mint).unwrap();
        let b = derive_associated_token_address(&wallet, &mint).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_on_curve());
    }

    #[test]
    fn ata_differs_per_wallet_and_mint() {
        let mint = Address::new([0xFF; 32]);
        let a = derive_associated_token_address(&Address::new([1; 32]), &mint).unwrap();
        let b = derive_associated_token_address(&Address::new([2; 32]), &mint).unwrap();
        assert_ne!(a, b);
        let c = derive_associated_token_address(&Address::new([1; 32]), &Address::new([2; 32]))
            .unwrap();
        assert_ne!(a, c);
    }

    // -- State --------------------------------------------------------------

    #[test]
    fn mint_pack_unpack() {
        let mint = Mint {
            mint_authority: Some(Address::new([4; 32])),
            supply: 100_000_000_000,
            decimals: 9,
            is_initialized: true,
            freeze_authority: None,
        };
        let bytes = mint.pack().unwrap();
        assert_eq!(bytes.len(), MINT_LEN);
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(Mint::unpack(&bytes).unwrap(), mint);
    }

    #[test]
    fn token_account_pack_unpack() {
        let mut account = TokenAccount::new(Address::new([1; 32]), Address::new([2; 32]));
        account.amount = 50;
        let bytes = account.pack().unwrap();
        assert_eq!(bytes.len(), TOKEN_ACCOUNT_LEN);
        assert_eq!(&bytes[64..72], &50u64.to_le_bytes());
        assert_eq!(TokenAccount::unpack(&bytes).unwrap(), account);
    }

    #[test]
    fn short_state_fails() {
        assert!(matches!(
            TokenAccount::unpack(&[0u8; 100]),
            Err(SolError::SchemaMismatch(_))
        ));
        assert!(Mint::unpack(&[0u8; 81]).is_err());
    }

    #[test]
    fn base_units() {
        assert_eq!(to_base_units(100, 9).unwrap(), 100_000_000_000);
        assert!(to_base_units(u64::MAX, 9).is_err());
    }
}
