//! Rent-exemption economics.
//!
//! [`Rent`] is the ledger's rent schedule and computes minimum balances
//! locally. [`RentModel`] asks the node for them and remembers answers for
//! the lifetime of the model, one entry per data length.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::error::SolError;
use crate::rpc::{AccountInfo, RpcClient};

/// Bytes of account metadata charged on top of the data buffer.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
pub const DEFAULT_LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
pub const DEFAULT_EXEMPTION_THRESHOLD: f64 = 2.0;

/// The rent schedule: an account holding `exemption_threshold` years of
/// rent is never charged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rent {
    pub lamports_per_byte_year: u64,
    pub exemption_threshold: f64,
}

impl Default for Rent {
    fn default() -> Self {
        Self {
            lamports_per_byte_year: DEFAULT_LAMPORTS_PER_BYTE_YEAR,
            exemption_threshold: DEFAULT_EXEMPTION_THRESHOLD,
        }
    }
}

impl Rent {
    pub fn minimum_balance(&self, data_len: usize) -> u64 {
        let bytes = ACCOUNT_STORAGE_OVERHEAD.saturating_add(data_len as u64);
        (bytes.saturating_mul(self.lamports_per_byte_year) as f64 * self.exemption_threshold) as u64
    }

    pub fn is_exempt(&self, lamports: u64, data_len: usize) -> bool {
        lamports >= self.minimum_balance(data_len)
    }

    pub fn status(&self, lamports: u64, data_len: usize) -> RentStatus {
        RentStatus::from_minimum(lamports, self.minimum_balance(data_len))
    }
}

/// Whether an account holds enough lamports to be exempt from rent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentStatus {
    Exempt,
    /// Funded below the minimum; the account is subject to collection.
    NonExempt { shortfall: u64 },
}

impl RentStatus {
    pub fn from_minimum(lamports: u64, minimum: u64) -> Self {
        if lamports >= minimum {
            RentStatus::Exempt
        } else {
            RentStatus::NonExempt {
                shortfall: minimum - lamports,
            }
        }
    }

    pub fn is_exempt(&self) -> bool {
        matches!(self, RentStatus::Exempt)
    }
}

/// Minimum-balance lookups against the node's current rent schedule,
/// cached per data length.
///
/// The cache lives only as long as the model, so a new session always
/// sees the current schedule.
pub struct RentModel {
    rpc: Arc<RpcClient>,
    cache: RwLock<HashMap<usize, u64>>,
}

impl RentModel {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lamports an account with `data_len` bytes must hold to be exempt.
    pub async fn minimum_balance(&self, data_len: usize) -> Result<u64, SolError> {
        if let Some(lamports) = self.cache.read().await.get(&data_len) {
            return Ok(*lamports);
        }

        let lamports = self.rpc.get_minimum_balance_for_rent_exemption(data_len).await?;
        debug!("rent-exempt minimum for {data_len} bytes is {lamports} lamports");
        self.cache.write().await.insert(data_len, lamports);
        Ok(lamports)
    }

    /// Classify an existing account against the minimum for its size.
    pub async fn status(&self, account: &AccountInfo) -> Result<RentStatus, SolError> {
        let minimum = self.minimum_balance(account.data.len()).await?;
        Ok(RentStatus::from_minimum(account.lamports, minimum))
    }

    pub async fn cached_lengths(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock_ledger::MockLedger;

    // -- Schedule -----------------------------------------------------------

    #[test]
    fn default_schedule_matches_ledger_constants() {
        let rent = Rent::default();
        assert_eq!(rent.minimum_balance(0), 890_880);
        assert_eq!(rent.minimum_balance(30), 1_099_680);
        assert_eq!(rent.minimum_balance(165), 2_039_280);
    }

    #[test]
    fn exemption_boundary() {
        let rent = Rent::default();
        let minimum = rent.minimum_balance(10);
        assert!(rent.is_exempt(minimum, 10));
        assert!(!rent.is_exempt(minimum - 1, 10));
        assert_eq!(
            rent.status(minimum / 2, 10),
            RentStatus::NonExempt {
                shortfall: minimum - minimum / 2
            }
        );
    }

    // -- Cached model -------------------------------------------------------

    #[tokio::test]
    async fn minimum_balance_is_cached_per_length() {
        let ledger = Arc::new(MockLedger::new());
        let rpc = Arc::new(RpcClient::new_with_sender(ledger.clone(), ClientConfig::default()));
        let model = RentModel::new(rpc);

        let first = model.minimum_balance(30).await.unwrap();
        let second = model.minimum_balance(30).await.unwrap();
        model.minimum_balance(10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Rent::default().minimum_balance(30));
        assert_eq!(ledger.request_count("getMinimumBalanceForRentExemption"), 2);
        assert_eq!(model.cached_lengths().await, 2);
    }

    #[tokio::test]
    async fn status_of_underfunded_account() {
        let ledger = Arc::new(MockLedger::new());
        let rpc = Arc::new(RpcClient::new_with_sender(ledger, ClientConfig::default()));
        let model = RentModel::new(rpc);

        let minimum = Rent::default().minimum_balance(10);
        let account = AccountInfo {
            lamports: minimum / 2,
            data: vec![0; 10],
            owner: crate::system_instruction::SYSTEM_PROGRAM_ID,
            executable: false,
            rent_epoch: 0,
        };
        assert!(!model.status(&account).await.unwrap().is_exempt());
    }
}
