//! zkvault-backend
//!
//! Axum-based HTTP service in front of the vault. Proof-gated requests are
//! encoded and relayed as sponsored user operations; webhook deliveries of
//! vault logs are reconciled into the ledger that serves balances and
//! history.

pub mod config;

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use zkvault_common::{credential_hash, identity_hash, FieldElement, ProofObject, ZkVaultError};
use zkvault_ledger::{
    ChainReader, IngestReport, Ledger, LedgerReconciler, LedgerRecord, StoreError, WebhookIngestor,
};
use zkvault_relayer::{RelayOutcome, RelayPipeline, VaultCall};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub chain: Arc<dyn ChainReader>,
    pub pipeline: Arc<RelayPipeline>,
    pub ingestor: Arc<WebhookIngestor>,
    /// Vault contract address
    pub vault: Address,
    /// Token queried by wallet balance lookups
    pub token: Option<Address>,
    pub token_symbol: String,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn ChainReader>,
        pipeline: RelayPipeline,
        vault: Address,
    ) -> Self {
        let ingestor = WebhookIngestor::new(
            chain.clone(),
            LedgerReconciler::new(ledger.clone()),
            vault,
        );
        Self {
            ledger,
            chain,
            pipeline: Arc::new(pipeline),
            ingestor: Arc::new(ingestor),
            vault,
            token: None,
            token_symbol: zkvault_common::DEFAULT_TOKEN_SYMBOL.to_string(),
        }
    }

    pub fn with_token(mut self, token: Option<Address>, symbol: impl Into<String>) -> Self {
        self.token = token;
        self.token_symbol = symbol.into();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the router
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // Ledger reads
        .route("/users/:username/balance", get(user_balance))
        .route("/users/:username/history", get(user_history))
        // Credential derivation
        .route("/proof/pay", get(derive_credential).post(derive_credential))
        // Proof-gated vault calls
        .route("/register", post(register))
        .route("/pay", post(pay))
        .route("/withdraw", post(withdraw))
        // Event ingestion
        .route("/webhooks/quicknode", post(quicknode_webhook))
        // Chain reads
        .route("/wallets/:address/balance", get(wallet_balance))
        .route("/txs/:tx", get(transaction))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON body whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub username: String,
    pub username_hash: FieldElement,
    pub balance: String,
    pub token: String,
}

async fn user_balance(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let username_hash = identity_hash(&username).map_err(ZkVaultError::from)?;
    let balance = state
        .ledger
        .balance(&username_hash)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(BalanceResponse {
        username,
        username_hash,
        balance: balance.to_string(),
        token: state.token_symbol.clone(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<LedgerRecord>,
}

async fn user_history(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let username_hash = identity_hash(&username).map_err(ZkVaultError::from)?;
    let history = state.ledger.history(&username_hash)?;
    Ok(Json(HistoryResponse { history }))
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub credential_hash: FieldElement,
}

async fn derive_credential(
    ApiJson(request): ApiJson<CredentialRequest>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let credential_hash =
        credential_hash(&request.username, &request.password).map_err(ZkVaultError::from)?;
    Ok(Json(CredentialResponse { credential_hash }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - VAULT CALLS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub proof: ProofObject,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub proof: ProofObject,
    pub to_username_hash: FieldElement,
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub proof: ProofObject,
    #[serde(alias = "to_address")]
    pub to_user_address: Address,
    pub amount: Amount,
}

/// Token amount in base units; accepts a JSON number or a decimal / `0x`
/// hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Amount(pub U256);

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Amount(U256::from(value))),
            Raw::Text(text) => {
                let text = text.trim();
                let parsed = match text.strip_prefix("0x") {
                    Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| e.to_string()),
                    None => U256::from_dec_str(text).map_err(|e| e.to_string()),
                };
                parsed
                    .map(Amount)
                    .map_err(|e| serde::de::Error::custom(format!("invalid amount {text:?}: {e}")))
            }
        }
    }
}

async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<Json<RelayOutcome>, ApiError> {
    let identity = request
        .proof
        .input
        .require_username_hash()
        .map_err(ZkVaultError::from)?;

    // Checked before any pipeline stage runs.
    if state.ledger.is_registered(&identity)? {
        return Err(ZkVaultError::AlreadyRegistered(identity.to_string()).into());
    }

    let call = VaultCall::register(&request.proof).map_err(ZkVaultError::from)?;
    relay(&state, call).await
}

async fn pay(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PayRequest>,
) -> Result<Json<RelayOutcome>, ApiError> {
    let call = VaultCall::pay(&request.proof, request.to_username_hash, request.amount.0)
        .map_err(ZkVaultError::from)?;
    relay(&state, call).await
}

async fn withdraw(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<WithdrawRequest>,
) -> Result<Json<RelayOutcome>, ApiError> {
    let call = VaultCall::withdraw(&request.proof, request.to_user_address, request.amount.0)
        .map_err(ZkVaultError::from)?;
    relay(&state, call).await
}

async fn relay(state: &AppState, call: VaultCall) -> Result<Json<RelayOutcome>, ApiError> {
    let name = call.name();
    info!(call = name, "relaying vault call");
    let outcome = state
        .pipeline
        .execute(call.into_call(state.vault))
        .await
        .map_err(ZkVaultError::from)?;
    info!(call = name, tx_hash = ?outcome.tx_hash, "vault call settled");
    Ok(Json(outcome))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - WEBHOOKS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub data: Vec<Value>,
}

async fn quicknode_webhook(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<WebhookPayload>,
) -> impl IntoResponse {
    let IngestReport { failed, .. } = state.ingestor.ingest(payload.data).await;
    if failed > 0 {
        warn!(failed, "webhook batch had failing logs");
    }
    Json(serde_json::json!({ "message": "Webhook received" }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - CHAIN READS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletBalanceResponse {
    pub address: String,
    pub balance: String,
    pub token: String,
}

async fn wallet_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<WalletBalanceResponse>, ApiError> {
    let owner = Address::from_str(&address)
        .map_err(|e| ApiError::bad_request("Invalid address", format!("{address}: {e}")))?;
    let token = state
        .token
        .ok_or_else(|| ApiError::bad_request("Failed to fetch balance", "no token configured"))?;

    let balance = state
        .chain
        .erc20_balance(token, owner)
        .await
        .map_err(|e| ApiError::bad_request("Failed to fetch balance", e.to_string()))?;

    Ok(Json(WalletBalanceResponse {
        address,
        balance: balance.to_string(),
        token: state.token_symbol.clone(),
    }))
}

async fn transaction(
    State(state): State<AppState>,
    Path(tx): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hash = H256::from_str(&tx)
        .map_err(|e| ApiError::bad_request("Invalid transaction hash", format!("{tx}: {e}")))?;

    let found = state
        .chain
        .transaction(hash)
        .await
        .map_err(|e| ApiError::bad_request("Failed to fetch transaction", e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Transaction not found"))?;

    Ok(Json(serde_json::json!({ "tx_hash": found })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

/// `{ "error": <label>, "message": <detail> }` with a status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    fn bad_request(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, message)
    }

    fn not_found(label: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, label, label)
    }
}

impl From<ZkVaultError> for ApiError {
    fn from(err: ZkVaultError) -> Self {
        let message = err.to_string();
        match err {
            ZkVaultError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Not found", message),
            ZkVaultError::AlreadyRegistered(_) => {
                Self::bad_request("User already registered", message)
            }
            ZkVaultError::MalformedProof(_) => Self::bad_request("Malformed proof", message),
            ZkVaultError::InvalidInput(_) => Self::bad_request("Invalid input", message),
            ZkVaultError::EstimationFailed(_)
            | ZkVaultError::SubmissionRejected(_)
            | ZkVaultError::ReceiptTimeout(_)
            | ZkVaultError::ReceiptFailed(_) => {
                Self::bad_request("Failed to send transaction", message)
            }
            ZkVaultError::StoreWriteFailed(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Ledger unavailable", message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("Invalid request", rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Ledger unavailable",
            err.to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            warn!(error = %self.error, message = %self.message, "request failed");
        }
        let body = serde_json::json!({
            "error": self.error,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;
    use crate::config::{BackendConfig, LogFormat};
    use anyhow::Context;
    use std::net::SocketAddr;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    use zkvault_ledger::{LedgerStore, RpcChainReader};
    use zkvault_relayer::{BundlerClient, EphemeralAccountFactory, GasPolicy, PipelineConfig};

    const DEFAULT_LOG_FILTER: &str =
        "zkvault_backend=info,zkvault_relayer=info,zkvault_ledger=info,tower_http=info";

    pub fn init_tracing(format: LogFormat) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
            LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        }
    }

    /// Wire the production collaborators from configuration.
    pub fn build_state(config: &BackendConfig) -> anyhow::Result<AppState> {
        let ledger = LedgerStore::open(&config.ledger_db_path)
            .with_context(|| format!("opening ledger at {}", config.ledger_db_path))?;
        let chain = RpcChainReader::new(&config.rpc_url).context("creating chain reader")?;
        let relayer = BundlerClient::new(
            config.bundler_url.clone(),
            &config.rpc_url,
            config.entry_point,
            config.chain_id,
        )
        .context("creating bundler client")?;
        let accounts = EphemeralAccountFactory::new(&config.rpc_url, config.account_factory)
            .context("creating account factory")?;

        let pipeline = RelayPipeline::new(
            Arc::new(relayer),
            Arc::new(accounts),
            PipelineConfig {
                entry_point: config.entry_point,
                chain_id: config.chain_id,
                gas_policy: GasPolicy {
                    pre_verification_gas_multiplier: config.pre_verification_gas_multiplier,
                },
                receipt_timeout: config.receipt_timeout,
                poll_interval: config.receipt_poll_interval,
            },
        );

        Ok(
            AppState::new(Arc::new(ledger), Arc::new(chain), pipeline, config.vault_address)
                .with_token(config.usdc_address, config.token_symbol.clone()),
        )
    }

    pub async fn run_server() -> anyhow::Result<()> {
        dotenvy::dotenv().ok();
        let config = BackendConfig::from_env()?;
        init_tracing(config.log_format);

        let state = build_state(&config)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        info!(
            vault = ?config.vault_address,
            chain_id = config.chain_id,
            "zkvault backend listening on {}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        axum::serve(listener, app_router(state).into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        Ok(())
    }

    async fn shutdown_signal() {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    }
}
