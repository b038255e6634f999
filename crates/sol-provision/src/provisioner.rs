//! Idempotent creation of seed-derived accounts.
//!
//! The provisioner derives the target address, looks it up, and only when
//! it is absent funds and creates it. A create that loses a race against
//! another creator is rejected by the ledger as already in use; that
//! rejection counts as success.

use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, info, warn};

use crate::address::Address;
use crate::error::SolError;
use crate::keypair::Keypair;
use crate::rent::{RentModel, RentStatus};
use crate::rpc::{AccountInfo, RpcClient};
use crate::submission::SubmissionClient;
use crate::system_instruction;
use crate::transaction::TransactionBuilder;

/// How many lamports a newly created account receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    /// The rent-exempt minimum for the requested size.
    RentExempt,
    /// An explicit amount; below the minimum the account is created anyway
    /// and reported as non-exempt.
    Lamports(u64),
}

/// One account to provision under a shared base key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub seed: String,
    pub owner: Address,
    pub data_len: usize,
    pub funding: Funding,
}

impl AccountSpec {
    pub fn new(seed: impl Into<String>, owner: Address, data_len: usize) -> Self {
        Self {
            seed: seed.into(),
            owner,
            data_len,
            funding: Funding::RentExempt,
        }
    }

    pub fn with_funding(mut self, funding: Funding) -> Self {
        self.funding = funding;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub address: Address,
    /// False when the account already existed.
    pub created: bool,
    pub lamports: u64,
    pub rent_status: RentStatus,
}

pub struct AccountProvisioner {
    rpc: Arc<RpcClient>,
    rent: RentModel,
    submission: SubmissionClient,
}

impl AccountProvisioner {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rent: RentModel::new(rpc.clone()),
            submission: SubmissionClient::new(rpc.clone()),
            rpc,
        }
    }

    pub fn rent(&self) -> &RentModel {
        &self.rent
    }

    pub fn submission(&self) -> &SubmissionClient {
        &self.submission
    }

    /// Make sure the account derived from `(base, seed, owner)` exists with
    /// `data_len` bytes, creating it rent-exempt and paid for by `funder`
    /// if it does not.
    ///
    /// A second call with the same arguments submits nothing.
    pub async fn ensure_account(
        &self,
        base: &Keypair,
        seed: &str,
        owner: &Address,
        data_len: usize,
        funder: &Keypair,
    ) -> Result<Address, SolError> {
        let spec = AccountSpec::new(seed, *owner, data_len);
        Ok(self.provision(base, funder, &spec).await?.address)
    }

    /// Provision one account with an explicit funding policy.
    pub async fn provision(
        &self,
        base: &Keypair,
        funder: &Keypair,
        spec: &AccountSpec,
    ) -> Result<ProvisionedAccount, SolError> {
        let address = Address::derive_with_seed(&base.address(), &spec.seed, &spec.owner)?;

        if let Some(existing) = self.rpc.get_account_info(&address).await? {
            debug!("{address} already exists, skipping create");
            return self.existing(address, &existing, spec).await;
        }

        let minimum = self.rent.minimum_balance(spec.data_len).await?;
        let lamports = match spec.funding {
            Funding::RentExempt => minimum,
            Funding::Lamports(lamports) => lamports,
        };
        let rent_status = RentStatus::from_minimum(lamports, minimum);
        if let RentStatus::NonExempt { shortfall } = rent_status {
            warn!(
                "funding {address} with {lamports} lamports, {shortfall} below the rent-exempt minimum for {} bytes",
                spec.data_len
            );
        }

        let create = system_instruction::create_account_with_seed(
            &funder.address(),
            &address,
            &base.address(),
            &spec.seed,
            lamports,
            spec.data_len as u64,
            &spec.owner,
        )?;
        let builder = TransactionBuilder::new(funder.address()).add(create);
        let operation = format!(
            "create account {address} (seed {:?}, {} bytes, {lamports} lamports, owner {})",
            spec.seed, spec.data_len, spec.owner
        );

        let mut signers = vec![funder];
        if base.address() != funder.address() {
            signers.push(base);
        }

        match self
            .submission
            .send_and_confirm(&builder, &signers, &operation)
            .await
        {
            Ok(receipt) => {
                info!("created {address} in {}", receipt.signature);
                Ok(ProvisionedAccount {
                    address,
                    created: true,
                    lamports,
                    rent_status,
                })
            }
            Err(e) if e.is_benign_on_create() => {
                info!("{address} was created concurrently: {e}");
                match self.rpc.get_account_info(&address).await? {
                    Some(existing) => self.existing(address, &existing, spec).await,
                    None => Ok(ProvisionedAccount {
                        address,
                        created: false,
                        lamports: 0,
                        rent_status: RentStatus::from_minimum(0, minimum),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Provision several independent accounts concurrently.
    ///
    /// Results are in `specs` order. The first failure is returned; creates
    /// that already landed stay on the ledger and are found by a re-run.
    pub async fn ensure_accounts(
        &self,
        base: &Keypair,
        funder: &Keypair,
        specs: &[AccountSpec],
    ) -> Result<Vec<ProvisionedAccount>, SolError> {
        try_join_all(specs.iter().map(|spec| self.provision(base, funder, spec))).await
    }

    async fn existing(
        &self,
        address: Address,
        account: &AccountInfo,
        spec: &AccountSpec,
    ) -> Result<ProvisionedAccount, SolError> {
        if account.owner != spec.owner {
            return Err(SolError::AccountMismatch {
                address: address.to_base58(),
                reason: format!("owned by {}, expected {}", account.owner, spec.owner),
            });
        }
        if account.data.len() != spec.data_len {
            return Err(SolError::AccountMismatch {
                address: address.to_base58(),
                reason: format!("{} bytes, expected {}", account.data.len(), spec.data_len),
            });
        }

        Ok(ProvisionedAccount {
            address,
            created: false,
            lamports: account.lamports,
            rent_status: self.rent.status(account).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock_ledger::MockLedger;
    use crate::system_instruction::SYSTEM_PROGRAM_ID;

    fn setup() -> (Arc<MockLedger>, AccountProvisioner, Keypair) {
        let ledger = Arc::new(MockLedger::new());
        let config = ClientConfig {
            poll_interval_ms: 1,
            confirm_timeout_ms: 1_000,
            ..ClientConfig::default()
        };
        let rpc = Arc::new(RpcClient::new_with_sender(ledger.clone(), config));
        let payer = Keypair::from_seed(&[7; 32]);
        ledger.fund(&payer.address(), 10_000_000_000);
        (ledger, AccountProvisioner::new(rpc), payer)
    }

    #[tokio::test]
    async fn second_call_submits_nothing() {
        let (ledger, provisioner, payer) = setup();

        let first = provisioner
            .ensure_account(&payer, "hello", &SYSTEM_PROGRAM_ID, 30, &payer)
            .await
            .unwrap();
        let second = provisioner
            .ensure_account(&payer, "hello", &SYSTEM_PROGRAM_ID, 30, &payer)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.send_count(), 1);
    }

    #[tokio::test]
    async fn mismatched_size_is_reported() {
        let (_ledger, provisioner, payer) = setup();
        provisioner
            .ensure_account(&payer, "sized", &SYSTEM_PROGRAM_ID, 30, &payer)
            .await
            .unwrap();

        let err = provisioner
            .ensure_account(&payer, "sized", &SYSTEM_PROGRAM_ID, 31, &payer)
            .await
            .unwrap_err();
        assert!(matches!(err, SolError::AccountMismatch { .. }));
    }

    #[tokio::test]
    async fn separate_base_key_co_signs() {
        let (ledger, provisioner, payer) = setup();
        let base = Keypair::from_seed(&[8; 32]);

        let provisioned = provisioner
            .provision(&base, &payer, &AccountSpec::new("data", SYSTEM_PROGRAM_ID, 8))
            .await
            .unwrap();
        assert!(provisioned.created);
        assert_eq!(
            provisioned.address,
            Address::derive_with_seed(&base.address(), "data", &SYSTEM_PROGRAM_ID).unwrap()
        );
        assert_eq!(ledger.account(&provisioned.address).unwrap().data.len(), 8);
    }

    #[tokio::test]
    async fn underfunded_create_is_flagged_not_rejected() {
        let (_ledger, provisioner, payer) = setup();
        let minimum = provisioner.rent().minimum_balance(10).await.unwrap();

        let provisioned = provisioner
            .provision(
                &payer,
                &payer,
                &AccountSpec::new("rogue1", SYSTEM_PROGRAM_ID, 10)
                    .with_funding(Funding::Lamports(minimum / 2)),
            )
            .await
            .unwrap();
        assert!(provisioned.created);
        assert_eq!(
            provisioned.rent_status,
            RentStatus::NonExempt {
                shortfall: minimum - minimum / 2
            }
        );
    }

    #[tokio::test]
    async fn many_accounts_concurrently() {
        let (ledger, provisioner, payer) = setup();
        let specs: Vec<AccountSpec> = (0..4)
            .map(|i| AccountSpec::new(format!("slot-{i}"), SYSTEM_PROGRAM_ID, 16))
            .collect();

        let results = provisioner.ensure_accounts(&payer, &payer, &specs).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.created && r.rent_status.is_exempt()));
        assert_eq!(ledger.send_count(), 4);

        let again = provisioner.ensure_accounts(&payer, &payer, &specs).await.unwrap();
        assert!(again.iter().all(|r| !r.created));
        assert_eq!(ledger.send_count(), 4);
    }
}
