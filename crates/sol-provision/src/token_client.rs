//! Token operations on top of the submission pipeline.
//!
//! Each call builds its instructions with [`crate::spl_token`], then signs,
//! submits and confirms them through a [`SubmissionClient`]. Reads decode
//! mint and token-account state with the packed layouts.

use std::sync::Arc;

use log::info;

use crate::address::Address;
use crate::error::SolError;
use crate::keypair::Keypair;
use crate::rent::RentModel;
use crate::rpc::{AccountInfo, RpcClient};
use crate::spl_token::{self, Mint, TokenAccount, MINT_LEN, TOKEN_PROGRAM_ID};
use crate::submission::SubmissionClient;
use crate::system_instruction;
use crate::transaction::{Signature, TransactionBuilder};

pub struct TokenClient {
    rpc: Arc<RpcClient>,
    rent: RentModel,
    submission: SubmissionClient,
}

impl TokenClient {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rent: RentModel::new(rpc.clone()),
            submission: SubmissionClient::new(rpc.clone()),
            rpc,
        }
    }

    /// Allocate and initialize a mint at `mint`'s address in one transaction.
    pub async fn create_mint(
        &self,
        payer: &Keypair,
        mint: &Keypair,
        mint_authority: &Address,
        freeze_authority: Option<&Address>,
        decimals: u8,
    ) -> Result<Address, SolError> {
        let address = mint.address();
        let lamports = self.rent.minimum_balance(MINT_LEN).await?;

        let builder = TransactionBuilder::new(payer.address())
            .add(system_instruction::create_account(
                &payer.address(),
                &address,
                lamports,
                MINT_LEN as u64,
                &TOKEN_PROGRAM_ID,
            )?)
            .add(spl_token::initialize_mint2(
                &address,
                mint_authority,
                freeze_authority,
                decimals,
            )?);

        let operation = format!("create mint {address} ({decimals} decimals)");
        self.submission
            .send_and_confirm(&builder, &[payer, mint], &operation)
            .await?;
        info!("created mint {address}");
        Ok(address)
    }

    /// Return `wallet`'s associated token account for `mint`, creating it
    /// if it does not exist yet.
    pub async fn get_or_create_associated_token_account(
        &self,
        payer: &Keypair,
        wallet: &Address,
        mint: &Address,
    ) -> Result<Address, SolError> {
        let ata = spl_token::derive_associated_token_address(wallet, mint)?;

        if let Some(existing) = self.rpc.get_account_info(&ata).await? {
            let account = token_account_state(&ata, &existing)?;
            if account.mint != *mint || account.owner != *wallet {
                return Err(SolError::AccountMismatch {
                    address: ata.to_base58(),
                    reason: format!(
                        "holds mint {} for {}, expected mint {mint} for {wallet}",
                        account.mint, account.owner
                    ),
                });
            }
            return Ok(ata);
        }

        let builder = TransactionBuilder::new(payer.address()).add(
            spl_token::create_associated_token_account(&payer.address(), wallet, mint, true)?,
        );
        let operation = format!("create token account {ata} for {wallet} (mint {mint})");
        match self
            .submission
            .send_and_confirm(&builder, &[payer], &operation)
            .await
        {
            Ok(_) => {
                info!("created token account {ata}");
                Ok(ata)
            }
            Err(e) if e.is_benign_on_create() => Ok(ata),
            Err(e) => Err(e),
        }
    }

    pub async fn mint_to(
        &self,
        payer: &Keypair,
        mint: &Address,
        destination: &Address,
        mint_authority: &Keypair,
        amount: u64,
    ) -> Result<Signature, SolError> {
        let builder = TransactionBuilder::new(payer.address()).add(spl_token::mint_to(
            mint,
            destination,
            &mint_authority.address(),
            amount,
        )?);
        let operation = format!("mint {amount} of {mint} to {destination}");
        let receipt = self
            .submission
            .send_and_confirm(&builder, &[payer, mint_authority], &operation)
            .await?;
        Ok(receipt.signature)
    }

    pub async fn transfer(
        &self,
        payer: &Keypair,
        source: &Address,
        destination: &Address,
        owner: &Keypair,
        amount: u64,
    ) -> Result<Signature, SolError> {
        let builder = TransactionBuilder::new(payer.address()).add(spl_token::transfer(
            source,
            destination,
            &owner.address(),
            amount,
        )?);
        let operation = format!("transfer {amount} tokens from {source} to {destination}");
        let receipt = self
            .submission
            .send_and_confirm(&builder, &[payer, owner], &operation)
            .await?;
        Ok(receipt.signature)
    }

    /// Transfer with the mint's decimals checked on-chain.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_checked(
        &self,
        payer: &Keypair,
        source: &Address,
        mint: &Address,
        destination: &Address,
        owner: &Keypair,
        amount: u64,
        decimals: u8,
    ) -> Result<Signature, SolError> {
        let builder = TransactionBuilder::new(payer.address()).add(spl_token::transfer_checked(
            source,
            mint,
            destination,
            &owner.address(),
            amount,
            decimals,
        )?);
        let operation = format!(
            "transfer {amount} tokens ({decimals} decimals) from {source} to {destination}"
        );
        let receipt = self
            .submission
            .send_and_confirm(&builder, &[payer, owner], &operation)
            .await?;
        Ok(receipt.signature)
    }

    pub async fn burn_checked(
        &self,
        payer: &Keypair,
        account: &Address,
        mint: &Address,
        owner: &Keypair,
        amount: u64,
        decimals: u8,
    ) -> Result<Signature, SolError> {
        let builder = TransactionBuilder::new(payer.address()).add(spl_token::burn_checked(
            account,
            mint,
            &owner.address(),
            amount,
            decimals,
        )?);
        let operation = format!("burn {amount} tokens ({decimals} decimals) from {account}");
        let receipt = self
            .submission
            .send_and_confirm(&builder, &[payer, owner], &operation)
            .await?;
        Ok(receipt.signature)
    }

    pub async fn get_mint(&self, mint: &Address) -> Result<Mint, SolError> {
        let account = self
            .rpc
            .get_account_info(mint)
            .await?
            .ok_or_else(|| SolError::AccountNotFound(mint.to_base58()))?;
        check_token_owned(mint, &account)?;
        Mint::unpack(&account.data)
    }

    pub async fn get_token_account(&self, address: &Address) -> Result<TokenAccount, SolError> {
        let account = self
            .rpc
            .get_account_info(address)
            .await?
            .ok_or_else(|| SolError::AccountNotFound(address.to_base58()))?;
        token_account_state(address, &account)
    }

    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &Address,
        mint: Option<&Address>,
    ) -> Result<Vec<(Address, TokenAccount)>, SolError> {
        self.rpc
            .get_token_accounts_by_owner(owner, mint)
            .await?
            .into_iter()
            .map(|(address, account)| {
                let state = token_account_state(&address, &account)?;
                Ok((address, state))
            })
            .collect()
    }
}

fn check_token_owned(address: &Address, account: &AccountInfo) -> Result<(), SolError> {
    if account.owner != TOKEN_PROGRAM_ID {
        return Err(SolError::AccountMismatch {
            address: address.to_base58(),
            reason: format!("owned by {}, not the token program", account.owner),
        });
    }
    Ok(())
}

fn token_account_state(address: &Address, account: &AccountInfo) -> Result<TokenAccount, SolError> {
    check_token_owned(address, account)?;
    TokenAccount::unpack(&account.data)
}
