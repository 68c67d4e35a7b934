//! HTTP API for health checks, status, orchestration requests and relay delivery

use crate::chain::LocalChain;
use crate::config::ApiConfig;
use crate::coordination::{
    DepositCounts, DepositId, DepositLeg, DepositParams, DepositSummary, Orchestrator,
};
use crate::error::{ErrorCategory, OrchestratorError, OrchestratorResult};
use crate::messaging::InboundMessage;
use crate::registry::{ChainId, PoolRecord, PoolStatus};
use crate::state::StateManager;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";
const RELAY_TOKEN_HEADER: &str = "x-relay-token";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub state_manager: Option<Arc<StateManager>>,
    pub chain: Option<Arc<LocalChain>>,
    pub admin_token: Option<String>,
    /// Shared secret of the service submitting pool and deposit requests
    pub operator_token: Option<String>,
    /// Shared secret of the relay delivery bridge
    pub relay_token: Option<String>,
    pub started: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/chains", get(get_chains))
        .route("/stats", get(get_stats))
        .route("/pools", post(create_pool))
        .route("/pools/:chain_id", get(get_pool))
        .route("/deposits", post(create_deposit))
        .route("/deposits/:deposit_id", get(get_deposit))
        .route("/admin/peers", post(register_peer))
        .route("/messages", post(receive_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> OrchestratorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Orchestrator error rendered as a JSON response
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::UnknownLedger { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::PoolAlreadyCreated { .. }
            | OrchestratorError::PeerAlreadyRegistered { .. }
            | OrchestratorError::SelectorAlreadyRegistered { .. }
            | OrchestratorError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            err => match err.category() {
                ErrorCategory::Precondition => StatusCode::BAD_REQUEST,
                ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
                ErrorCategory::External => StatusCode::BAD_GATEWAY,
                ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.to_string(),
            category: self.0.category().as_str(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - database and local chain
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.state_manager {
        Some(manager) => manager.health_check().await.is_ok(),
        None => true,
    };
    let chain = match &state.chain {
        Some(chain) => chain.health_check().await,
        None => true,
    };

    let ready = database && chain;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            chain,
        }),
    )
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let local_chain_id = orchestrator.local_chain_id();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        local_chain_id,
        local_pool: orchestrator.pool_record(local_chain_id).await.status,
        known_ledgers: orchestrator.known_ledgers().await,
        pending_deposits: orchestrator.deposit_counts().await.pending,
        node: state.chain.as_ref().map(|chain| NodeStatus {
            name: chain.provider().name().to_string(),
            last_block: chain.provider().last_block(),
            wallet: chain.sender().wallet_address(),
        }),
    })
}

/// Every chain with a peer, a selector, a pool record, or known status
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.snapshot().await;
    let registry = &snapshot.registry;

    let chain_ids: BTreeSet<ChainId> = registry
        .known_ledgers()
        .iter()
        .chain(registry.peers().map(|(chain_id, _)| chain_id))
        .chain(registry.selectors().map(|(chain_id, _)| chain_id))
        .chain(registry.pools().map(|(chain_id, _)| chain_id))
        .collect();

    let chains = chain_ids
        .into_iter()
        .map(|chain_id| ChainEntry {
            chain_id,
            local: registry.is_local(chain_id),
            known: registry.is_known(chain_id),
            peer: registry.peer(chain_id),
            selector: registry.selector(chain_id),
            pool_status: registry.pool_status(chain_id),
        })
        .collect();

    Json(ChainsResponse { chains })
}

async fn get_stats(State(state): State<AppState>) -> Json<DepositCounts> {
    Json(state.orchestrator.deposit_counts().await)
}

async fn get_pool(State(state): State<AppState>, Path(chain_id): Path<ChainId>) -> Json<PoolRecord> {
    Json(state.orchestrator.pool_record(chain_id).await)
}

async fn get_deposit(
    State(state): State<AppState>,
    Path(deposit_id): Path<String>,
) -> ApiResult<DepositSummary> {
    let deposit_id: DepositId = deposit_id
        .parse()
        .map_err(|_| OrchestratorError::InvalidInput(format!("invalid deposit id {}", deposit_id)))?;

    Ok(Json(state.orchestrator.deposit_summary(deposit_id).await))
}

async fn create_pool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePoolBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_token(&state.operator_token, &headers, OPERATOR_TOKEN_HEADER)?;
    let creation = state
        .orchestrator
        .request_pool_creation(request.chain_id, &request.name, request.tokens)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(creation)))
}

async fn create_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DepositBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_token(&state.operator_token, &headers, OPERATOR_TOKEN_HEADER)?;
    let orchestrator = &state.orchestrator;

    let outcomes = match request {
        DepositBody::FanOut {
            deposit_id,
            depositor,
            legs,
        } => orchestrator.request_deposits(deposit_id, depositor, legs).await?,
        DepositBody::Swapped {
            deposit_id,
            depositor,
            quote_amount,
            min_output,
        } => vec![
            orchestrator
                .deposit_swapped(deposit_id, depositor, quote_amount, min_output)
                .await?,
        ],
        DepositBody::Single(params) => vec![orchestrator.request_pool_deposit(params).await?],
    };

    Ok((StatusCode::ACCEPTED, Json(outcomes)))
}

/// Register a peer and, optionally, its selector on behalf of the admin
async fn register_peer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterPeerBody>,
) -> Result<StatusCode, ApiError> {
    let caller = authorize(&state, &headers)?;
    let orchestrator = &state.orchestrator;

    orchestrator
        .register_peer(caller, request.chain_id, request.peer)
        .await?;
    if let Some(selector) = request.selector {
        orchestrator
            .register_selector(caller, request.chain_id, selector)
            .await?;
    }

    Ok(StatusCode::CREATED)
}

/// Inbound relay delivery.
/// The sender field is trusted only from the relay bridge holding the relay token.
async fn receive_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<InboundMessage>,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = check_token(&state.relay_token, &headers, RELAY_TOKEN_HEADER) {
        warn!("Rejected delivery claiming sender {:?}: missing relay credential", message.sender);
        crate::metrics::record_message_rejected(0, "unauthenticated");
        return Err(e);
    }

    let sender = message.sender;
    if let Err(e) = state.orchestrator.receive_message(message).await {
        warn!("Rejected message from {:?}: {}", sender, e);
        return Err(e.into());
    }
    Ok(StatusCode::OK)
}

/// Map a valid admin token to the admin capability
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Address, ApiError> {
    check_token(&state.admin_token, headers, ADMIN_TOKEN_HEADER)?;
    Ok(state.orchestrator.admin())
}

/// Compare the secret presented in `header`; an unset or empty secret admits nobody
fn check_token(
    expected: &Option<String>,
    headers: &HeaderMap,
    header: &'static str,
) -> Result<(), ApiError> {
    let presented = headers.get(header).and_then(|value| value.to_str().ok());

    match (expected.as_deref(), presented) {
        (Some(expected), Some(token)) if !expected.is_empty() && expected == token => Ok(()),
        _ => Err(OrchestratorError::InvalidCredential { header }.into()),
    }
}

// Request types

#[derive(Debug, Deserialize)]
struct CreatePoolBody {
    chain_id: ChainId,
    name: String,
    tokens: Vec<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DepositBody {
    FanOut {
        deposit_id: DepositId,
        depositor: Address,
        legs: Vec<DepositLeg>,
    },
    Swapped {
        deposit_id: DepositId,
        depositor: Address,
        quote_amount: U256,
        min_output: U256,
    },
    Single(DepositParams),
}

#[derive(Debug, Deserialize)]
struct RegisterPeerBody {
    chain_id: ChainId,
    peer: Address,
    selector: Option<u64>,
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    category: &'static str,
    retryable: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chain: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    local_chain_id: ChainId,
    local_pool: PoolStatus,
    known_ledgers: Vec<ChainId>,
    pending_deposits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<NodeStatus>,
}

#[derive(Serialize)]
struct NodeStatus {
    name: String,
    last_block: u64,
    wallet: Address,
}

#[derive(Serialize)]
struct ChainEntry {
    chain_id: ChainId,
    local: bool,
    known: bool,
    peer: Option<Address>,
    selector: Option<u64>,
    pool_status: PoolStatus,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::messaging::codec::{AbiPayload, PoolCreatedReceipt};
    use crate::messaging::{Envelope, LoopbackNetwork, MessagingGateway, SuccessKind};
    use crate::tokens::equal_weights;
    use crate::services::{
        Collaborators, MockAmmService, MockOrchestratorHooks, MockSwapService, MockTreasury,
    };

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ethers::types::H256;
    use tower::ServiceExt;

    fn admin() -> Address {
        Address::from_low_u64_be(0xa1)
    }

    fn state() -> AppState {
        let network = LoopbackNetwork::new(U256::from(1));
        let relay = network.endpoint(Address::from_low_u64_be(0xb001));
        let gateway = MessagingGateway::new(Arc::new(relay), Address::from_low_u64_be(0xc0));
        let mut hooks = MockOrchestratorHooks::new();
        hooks.expect_on_pool_created().returning(|_, _| Ok(()));
        let services = Collaborators {
            amm: Arc::new(MockAmmService::new()),
            swapper: Arc::new(MockSwapService::new()),
            treasury: Arc::new(MockTreasury::new()),
            hooks: Arc::new(hooks),
        };
        let config = OrchestratorConfig {
            local_chain_id: 1,
            chain_label: "chain-1".to_string(),
            admin: admin(),
            quote_token: Address::from_low_u64_be(0xc0),
            create_pool_gas_limit: 3_000_000,
            deposit_gas_limit: 2_000_000,
            receipt_gas_limit: 500_000,
            max_retries: 3,
            retry_delay_ms: 10,
            tx_timeout_secs: 5,
            health_check_interval_secs: 30,
        };

        AppState {
            orchestrator: Arc::new(Orchestrator::new(config, gateway, services)),
            state_manager: None,
            chain: None,
            admin_token: Some("secret".to_string()),
            operator_token: Some("operator".to_string()),
            relay_token: Some("bridge".to_string()),
            started: Instant::now(),
        }
    }

    fn app() -> Router {
        router(state())
    }

    fn post_with(uri: &str, header: Option<(&str, &str)>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        post_with(uri, token.map(|token| (ADMIN_TOKEN_HEADER, token)), body)
    }

    /// POOL_CREATED receipt as the registered chain 2 peer would send it
    fn pool_created_delivery() -> serde_json::Value {
        let receipt = PoolCreatedReceipt {
            address: Address::from_low_u64_be(0x666),
            pool_id: H256::from_low_u64_be(2),
            tokens: vec![Address::from_low_u64_be(0x11), Address::from_low_u64_be(0x12)],
            weights: equal_weights(2),
        };
        let message = InboundMessage {
            message_id: H256::from_low_u64_be(7),
            sender: Address::from_low_u64_be(0xb002),
            data: Envelope::success(2, SuccessKind::PoolCreated, receipt.encode()).encode(),
            token_amounts: Vec::new(),
        };
        serde_json::to_value(&message).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_route_requires_token() {
        let app = app();
        let body = serde_json::json!({
            "chain_id": 2,
            "peer": format!("{:?}", Address::from_low_u64_be(0xb002)),
            "selector": 5002
        });

        let response = app
            .clone()
            .oneshot(post_json("/admin/peers", Some("wrong"), body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["category"], "authentication");

        let response = app
            .clone()
            .oneshot(post_json("/admin/peers", Some("secret"), body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(post_json("/admin/peers", Some("secret"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(Request::get("/chains").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let chains = json_body(response).await;
        assert_eq!(chains["chains"][1]["chain_id"], 2);
        assert_eq!(chains["chains"][1]["selector"], 5002);
        assert_eq!(chains["chains"][1]["known"], false);
    }

    #[tokio::test]
    async fn test_error_categories_map_to_status() {
        let response = app()
            .oneshot(post_with(
                "/pools",
                Some((OPERATOR_TOKEN_HEADER, "operator")),
                serde_json::json!({
                    "chain_id": 2,
                    "name": "index",
                    "tokens": [format!("{:?}", Address::from_low_u64_be(0x11))]
                }),
            ))
            .await
            .unwrap();
        // No peer registered for chain 2
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["category"], "precondition");

        let response = app()
            .oneshot(Request::get("/deposits/not-hex").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_relay_delivery_requires_relay_token() {
        let state = state();
        let orchestrator = state.orchestrator.clone();
        orchestrator
            .register_peer(admin(), 2, Address::from_low_u64_be(0xb002))
            .await
            .unwrap();
        let app = router(state);

        // The claimed sender is the registered peer, but nothing vouches for it
        for header in [None, Some((RELAY_TOKEN_HEADER, "guess")), Some((ADMIN_TOKEN_HEADER, "secret"))] {
            let response = app
                .clone()
                .oneshot(post_with("/messages", header, pool_created_delivery()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(json_body(response).await["category"], "authentication");
        }
        assert_eq!(orchestrator.pool_record(2).await.status, PoolStatus::NotCreated);
        assert_eq!(orchestrator.known_ledgers().await.len(), 1);

        let response = app
            .oneshot(post_with(
                "/messages",
                Some((RELAY_TOKEN_HEADER, "bridge")),
                pool_created_delivery(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = orchestrator.pool_record(2).await;
        assert_eq!(record.status, PoolStatus::Active);
        assert_eq!(record.address, Address::from_low_u64_be(0x666));
    }

    #[tokio::test]
    async fn test_request_routes_require_operator_token() {
        let app = app();
        let pool = serde_json::json!({
            "chain_id": 1,
            "name": "index",
            "tokens": [format!("{:?}", Address::from_low_u64_be(0x11))]
        });
        let deposit = serde_json::json!({
            "deposit_id": format!("{:?}", H256::repeat_byte(0xdd)),
            "depositor": format!("{:?}", Address::from_low_u64_be(0xd0)),
            "quote_amount": "0x64",
            "min_output": "0x1"
        });

        for (uri, body) in [("/pools", &pool), ("/deposits", &deposit)] {
            for header in [None, Some((OPERATOR_TOKEN_HEADER, "wrong")), Some((ADMIN_TOKEN_HEADER, "secret"))] {
                let response = app
                    .clone()
                    .oneshot(post_with(uri, header, body.clone()))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            }
        }

        // Authenticated, the deposit reaches the orchestrator: no local pool yet
        let response = app
            .oneshot(post_with("/deposits", Some((OPERATOR_TOKEN_HEADER, "operator")), deposit))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_configured_token_admits_nobody() {
        let mut state = state();
        state.operator_token = Some(String::new());
        let response = router(state)
            .oneshot(post_with(
                "/pools",
                Some((OPERATOR_TOKEN_HEADER, "")),
                serde_json::json!({ "chain_id": 1, "name": "index", "tokens": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_status_mapping() {
        let status = |err| ApiError(err).status();
        assert_eq!(status(OrchestratorError::UnknownLedger { chain_id: 9 }), StatusCode::NOT_FOUND);
        assert_eq!(
            status(OrchestratorError::SenderMismatch {
                chain_id: 2,
                expected: None,
                actual: Address::zero()
            }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(OrchestratorError::external("amm", "reverted")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(OrchestratorError::Internal("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
