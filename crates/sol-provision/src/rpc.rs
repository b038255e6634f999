//! JSON-RPC access to a ledger node.
//!
//! [`RpcSender`] is the transport seam: [`HttpSender`] speaks JSON-RPC 2.0
//! over HTTP, and [`crate::mock_ledger::MockLedger`] answers the same calls
//! in-process. [`RpcClient`] layers typed requests and responses on top of
//! whichever sender it is given.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::address::Address;
use crate::config::ClientConfig;
use crate::error::SolError;
use crate::spl_token::TOKEN_PROGRAM_ID;
use crate::transaction::{Blockhash, Signature, SignedTransaction};

/// JSON-RPC server error code for a transaction that failed preflight.
pub const JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;

// ---------------------------------------------------------------------------
// Commitment
// ---------------------------------------------------------------------------

/// How final a ledger state must be before a read or confirmation counts.
///
/// Ordered from weakest to strongest, so `status >= requested` tests whether
/// a reported level satisfies a requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
    Finalized,
}

impl fmt::Display for CommitmentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcRequest {
    GetAccountInfo,
    GetBalance,
    GetMinimumBalanceForRentExemption,
    GetLatestBlockhash,
    SendTransaction,
    GetSignatureStatuses,
    RequestAirdrop,
    GetTokenAccountsByOwner,
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::GetAccountInfo => "getAccountInfo",
            RpcRequest::GetBalance => "getBalance",
            RpcRequest::GetMinimumBalanceForRentExemption => "getMinimumBalanceForRentExemption",
            RpcRequest::GetLatestBlockhash => "getLatestBlockhash",
            RpcRequest::SendTransaction => "sendTransaction",
            RpcRequest::GetSignatureStatuses => "getSignatureStatuses",
            RpcRequest::RequestAirdrop => "requestAirdrop",
            RpcRequest::GetTokenAccountsByOwner => "getTokenAccountsByOwner",
        }
    }

    pub fn build_request_json(&self, id: u64, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.method(),
            "params": params,
        })
    }
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sends one JSON-RPC request and returns its `result` member.
///
/// Error responses come back as [`SolError::Rpc`] with the server's `data`
/// member preserved so callers can classify rejections.
#[async_trait]
pub trait RpcSender {
    async fn send(&self, request: RpcRequest, params: Value) -> Result<Value, SolError>;
    fn url(&self) -> String;
}

/// The standard [`RpcSender`] over HTTP.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

#[derive(Deserialize, Debug)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl HttpSender {
    /// The URL is an HTTP URL, usually for port 8899.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SolError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            request_id: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl RpcSender for HttpSender {
    async fn send(&self, request: RpcRequest, params: Value) -> Result<Value, SolError> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = request.build_request_json(request_id, params);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        parse_response(request, response.json().await?)
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

/// Split a JSON-RPC response body into its `result` or its error object.
fn parse_response(request: RpcRequest, mut json: Value) -> Result<Value, SolError> {
    if json["error"].is_object() {
        let error: RpcErrorObject = serde_json::from_value(json["error"].take())
            .map_err(|e| SolError::Transport(format!("malformed {request} error response: {e}")))?;
        return Err(SolError::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    Ok(json["result"].take())
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// An account as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub data: Vec<u8>,
    pub owner: Address,
    pub executable: bool,
    pub rent_epoch: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiAccount {
    lamports: u64,
    data: (String, String),
    owner: Address,
    executable: bool,
    rent_epoch: u64,
}

impl AccountInfo {
    /// JSON form with base64 data, as returned for `"encoding": "base64"`.
    pub fn to_ui_json(&self) -> Value {
        json!({
            "lamports": self.lamports,
            "data": [BASE64.encode(&self.data), "base64"],
            "owner": self.owner,
            "executable": self.executable,
            "rentEpoch": self.rent_epoch,
            "space": self.data.len(),
        })
    }

    fn from_ui(ui: UiAccount) -> Result<Self, SolError> {
        let (encoded, encoding) = ui.data;
        if encoding != "base64" {
            return Err(SolError::SerializationError(format!(
                "unsupported account encoding `{encoding}`"
            )));
        }
        let data = BASE64
            .decode(encoded)
            .map_err(|e| SolError::SerializationError(format!("account data: {e}")))?;
        Ok(Self {
            lamports: ui.lamports,
            data,
            owner: ui.owner,
            executable: ui.executable,
            rent_epoch: ui.rent_epoch,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Blockhash,
    pub last_valid_block_height: u64,
}

/// Status of a submitted signature.
///
/// `err` is the raw transaction error; it is set when the transaction
/// executed and failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    pub confirmations: Option<u64>,
    pub err: Option<Value>,
    pub confirmation_status: Option<CommitmentLevel>,
}

impl SignatureStatus {
    pub fn satisfies(&self, commitment: CommitmentLevel) -> bool {
        self.confirmation_status
            .map(|status| status >= commitment)
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct Response<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
struct UiKeyedAccount {
    pubkey: Address,
    account: UiAccount,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Typed access to the ledger's JSON-RPC interface.
///
/// Cheap to share behind an `Arc`; it holds no mutable state.
pub struct RpcClient {
    sender: Arc<dyn RpcSender + Send + Sync>,
    config: ClientConfig,
}

impl RpcClient {
    /// Connect over HTTP to `config.rpc_url`.
    pub fn new(config: ClientConfig) -> Result<Self, SolError> {
        config.validate()?;
        let sender = HttpSender::new(config.rpc_url.clone(), config.request_timeout())?;
        Ok(Self::new_with_sender(Arc::new(sender), config))
    }

    pub fn new_with_sender(sender: Arc<dyn RpcSender + Send + Sync>, config: ClientConfig) -> Self {
        Self { sender, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn commitment(&self) -> CommitmentLevel {
        self.config.commitment
    }

    pub fn url(&self) -> String {
        self.sender.url()
    }

    async fn send<T: DeserializeOwned>(&self, request: RpcRequest, params: Value) -> Result<T, SolError> {
        debug!("rpc {request} {params}");
        let result = self.sender.send(request, params).await?;
        serde_json::from_value(result).map_err(|e| {
            SolError::SerializationError(format!("unexpected {request} response: {e}"))
        })
    }

    fn commitment_config(&self) -> Value {
        json!({ "commitment": self.config.commitment })
    }

    /// Returns `None` when no account exists at `address`.
    pub async fn get_account_info(&self, address: &Address) -> Result<Option<AccountInfo>, SolError> {
        let params = json!([
            address,
            { "encoding": "base64", "commitment": self.config.commitment }
        ]);
        let response: Response<Option<UiAccount>> =
            self.send(RpcRequest::GetAccountInfo, params).await?;
        response.value.map(AccountInfo::from_ui).transpose()
    }

    pub async fn get_balance(&self, address: &Address) -> Result<u64, SolError> {
        let response: Response<u64> = self
            .send(RpcRequest::GetBalance, json!([address, self.commitment_config()]))
            .await?;
        Ok(response.value)
    }

    pub async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, SolError> {
        self.send(RpcRequest::GetMinimumBalanceForRentExemption, json!([data_len]))
            .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, SolError> {
        let response: Response<UiBlockhash> = self
            .send(RpcRequest::GetLatestBlockhash, json!([self.commitment_config()]))
            .await?;
        Ok(LatestBlockhash {
            blockhash: Blockhash::from_str(&response.value.blockhash)?,
            last_valid_block_height: response.value.last_valid_block_height,
        })
    }

    /// Submit a signed transaction with preflight checks enabled.
    ///
    /// Rejections surface as [`SolError::Rpc`]; see
    /// [`crate::submission::classify_rejection`].
    pub async fn send_transaction(&self, transaction: &SignedTransaction) -> Result<Signature, SolError> {
        let wire = BASE64.encode(transaction.to_wire()?);
        let params = json!([
            wire,
            {
                "encoding": "base64",
                "skipPreflight": false,
                "preflightCommitment": self.config.commitment,
            }
        ]);
        let signature: Signature = self.send(RpcRequest::SendTransaction, params).await?;
        if signature != transaction.signature() {
            return Err(SolError::Transport(format!(
                "node returned signature {signature}, expected {}",
                transaction.signature()
            )));
        }
        Ok(signature)
    }

    pub async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>, SolError> {
        let params = json!([signatures, { "searchTransactionHistory": true }]);
        let response: Response<Vec<Option<SignatureStatus>>> =
            self.send(RpcRequest::GetSignatureStatuses, params).await?;
        Ok(response.value)
    }

    /// Ask the cluster faucet for lamports. Never issued against mainnet.
    pub async fn request_airdrop(&self, address: &Address, lamports: u64) -> Result<Signature, SolError> {
        let cluster = self.config.cluster;
        if !cluster.allows_airdrop() {
            return Err(SolError::AirdropUnavailable(cluster.to_string()));
        }
        self.send(
            RpcRequest::RequestAirdrop,
            json!([address, lamports, self.commitment_config()]),
        )
        .await
    }

    /// Token accounts owned by `owner`, optionally restricted to one mint.
    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &Address,
        mint: Option<&Address>,
    ) -> Result<Vec<(Address, AccountInfo)>, SolError> {
        let filter = match mint {
            Some(mint) => json!({ "mint": mint }),
            None => json!({ "programId": TOKEN_PROGRAM_ID }),
        };
        let params = json!([
            owner,
            filter,
            { "encoding": "base64", "commitment": self.config.commitment }
        ]);
        let response: Response<Vec<UiKeyedAccount>> =
            self.send(RpcRequest::GetTokenAccountsByOwner, params).await?;
        response
            .value
            .into_iter()
            .map(|keyed| Ok((keyed.pubkey, AccountInfo::from_ui(keyed.account)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cluster;
    use std::sync::Mutex;

    /// Replays canned results and records every request.
    struct Canned {
        result: Value,
        seen: Mutex<Vec<(RpcRequest, Value)>>,
    }

    impl Canned {
        fn new(result: Value) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RpcSender for Canned {
        async fn send(&self, request: RpcRequest, params: Value) -> Result<Value, SolError> {
            self.seen.lock().unwrap().push((request, params));
            Ok(self.result.clone())
        }

        fn url(&self) -> String {
            "canned".into()
        }
    }

    fn client(sender: Arc<Canned>, cluster: Cluster) -> RpcClient {
        RpcClient::new_with_sender(sender, ClientConfig::for_cluster(cluster))
    }

    // -- Wire format --------------------------------------------------------

    #[test]
    fn response_result_is_extracted() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": { "value": 42 } });
        let result = parse_response(RpcRequest::GetBalance, body).unwrap();
        assert_eq!(result, json!({ "value": 42 }));
    }

    #[test]
    fn response_error_keeps_code_and_data() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {
                "code": -32002,
                "message": "Transaction simulation failed: Blockhash not found",
                "data": { "err": "BlockhashNotFound", "logs": [] }
            }
        });
        match parse_response(RpcRequest::SendTransaction, body).unwrap_err() {
            SolError::Rpc {
                code,
                message,
                data,
            } => {
                assert_eq!(code, -32002);
                assert!(message.contains("Blockhash not found"));
                assert_eq!(data.unwrap()["err"], "BlockhashNotFound");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn response_error_without_data() {
        let body = json!({ "error": { "code": -32601, "message": "Method not found" } });
        match parse_response(RpcRequest::GetBalance, body).unwrap_err() {
            SolError::Rpc { code, data, .. } => {
                assert_eq!(code, -32601);
                assert!(data.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_error_object_is_transport_error() {
        let body = json!({ "error": { "message": "no code" } });
        let err = parse_response(RpcRequest::GetBalance, body).unwrap_err();
        assert!(matches!(err, SolError::Transport(_)));
        assert!(err.to_string().contains("getBalance"));
    }

    #[test]
    fn request_json_shape() {
        let json = RpcRequest::GetBalance.build_request_json(7, json!(["abc"]));
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "getBalance");
        assert_eq!(json["params"][0], "abc");
    }

    #[test]
    fn commitment_ordering_and_display() {
        assert!(CommitmentLevel::Finalized > CommitmentLevel::Confirmed);
        assert!(CommitmentLevel::Confirmed > CommitmentLevel::Processed);
        assert_eq!(CommitmentLevel::Processed.to_string(), "processed");
        assert_eq!(
            serde_json::to_value(CommitmentLevel::Finalized).unwrap(),
            json!("finalized")
        );
    }

    #[test]
    fn status_satisfies_weaker_levels() {
        let status = SignatureStatus {
            slot: 1,
            confirmations: Some(1),
            err: None,
            confirmation_status: Some(CommitmentLevel::Confirmed),
        };
        assert!(status.satisfies(CommitmentLevel::Processed));
        assert!(status.satisfies(CommitmentLevel::Confirmed));
        assert!(!status.satisfies(CommitmentLevel::Finalized));
    }

    // -- Typed calls --------------------------------------------------------

    #[tokio::test]
    async fn account_info_decodes_base64_data() {
        let owner = Address::new([7; 32]);
        let account = AccountInfo {
            lamports: 42,
            data: vec![1, 2, 3],
            owner,
            executable: false,
            rent_epoch: u64::MAX,
        };
        let sender = Canned::new(json!({ "context": { "slot": 3 }, "value": account.to_ui_json() }));
        let client = client(sender.clone(), Cluster::Localnet);

        let fetched = client.get_account_info(&owner).await.unwrap();
        assert_eq!(fetched, Some(account));

        let seen = sender.seen.lock().unwrap();
        assert_eq!(seen[0].0, RpcRequest::GetAccountInfo);
        assert_eq!(seen[0].1[1]["encoding"], "base64");
    }

    #[tokio::test]
    async fn missing_account_is_none() {
        let sender = Canned::new(json!({ "context": { "slot": 3 }, "value": null }));
        let client = client(sender, Cluster::Localnet);
        assert_eq!(client.get_account_info(&Address::default()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn latest_blockhash_parses() {
        let hash = Blockhash([9; 32]);
        let sender = Canned::new(json!({
            "context": { "slot": 1 },
            "value": { "blockhash": hash.to_string(), "lastValidBlockHeight": 150 }
        }));
        let latest = client(sender, Cluster::Devnet).get_latest_blockhash().await.unwrap();
        assert_eq!(latest.blockhash, hash);
        assert_eq!(latest.last_valid_block_height, 150);
    }

    #[tokio::test]
    async fn airdrop_refused_on_mainnet_without_request() {
        let sender = Canned::new(json!(null));
        let client = client(sender.clone(), Cluster::Mainnet);
        let err = client
            .request_airdrop(&Address::default(), 1_000_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, SolError::AirdropUnavailable(_)));
        assert!(sender.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unexpected_shape_is_serialization_error() {
        let sender = Canned::new(json!("not a number"));
        let err = client(sender, Cluster::Localnet)
            .get_minimum_balance_for_rent_exemption(10)
            .await
            .unwrap_err();
        assert!(matches!(err, SolError::SerializationError(_)));
    }
}
