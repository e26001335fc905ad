//! HTTP surface
//!
//! Thin axum handlers over the gate, the compliance engine and the trading backend.
//! Priced routes sit behind [`require_payment`]; every failure leaves as an
//! [`ApiError`] envelope or a 402 [`PaymentChallenge`].

use crate::envelope::{ApiError, ErrorCode};
use crate::payment::{GateDecision, PaymentChallenge, PaymentGate, PAYMENT_HEADER};
use crate::policy::{
    ComplianceEngine, PolicyStore, PolicyUpdate, PolicyVerdict, TradeIntent, UserPolicy,
};
use crate::tokens::addresses::ZERO_ADDRESS;
use crate::upstream::vault::{execute_trade_calldata, min_amount_out};
use crate::upstream::{FailureClass, TradingBackend};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared, process-wide handler state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<PaymentGate>,
    pub policies: Arc<dyn PolicyStore>,
    /// `None` when no VaultRouter is configured
    pub backend: Option<Arc<dyn TradingBackend>>,
    pub engine: ComplianceEngine,
    pub vault_router: Option<Address>,
}

impl AppState {
    fn backend(&self) -> std::result::Result<&Arc<dyn TradingBackend>, ApiError> {
        self.backend
            .as_ref()
            .ok_or_else(|| ApiError::service_unavailable("VaultRouter"))
    }

    /// On-chain policy when a VaultRouter is configured, else the configured defaults
    async fn base_policy(&self, user: Address) -> std::result::Result<Arc<UserPolicy>, ApiError> {
        match &self.backend {
            Some(backend) => Ok(Arc::new(backend.user_policy(user).await?)),
            None => Ok(self.policies.defaults()),
        }
    }

    /// Limits the compliance engine evaluates against
    ///
    /// A local override replaces the base limits, but trade history always comes from
    /// the base since only settled on-chain trades move `lastTradeTimestamp`.
    async fn resolve_policy(&self, user: Address) -> std::result::Result<Arc<UserPolicy>, ApiError> {
        let base = self.base_policy(user).await?;
        Ok(match self.policies.get(user).await {
            Some(local) => Arc::new(local.with_last_trade(base.last_trade_timestamp)),
            None => base,
        })
    }
}

/// Price lookup key for one route
#[derive(Clone)]
struct PricedOperation {
    gate: Arc<PaymentGate>,
    operation: &'static str,
}

impl IntoResponse for PaymentChallenge {
    fn into_response(self) -> Response {
        (StatusCode::PAYMENT_REQUIRED, Json(self)).into_response()
    }
}

async fn require_payment(
    State(priced): State<PricedOperation>,
    req: Request,
    next: Next,
) -> Response {
    let decision = {
        let header = req
            .headers()
            .get(PAYMENT_HEADER)
            .and_then(|value| value.to_str().ok());
        // nested routers see the path with their prefix stripped
        let path = req
            .extensions()
            .get::<OriginalUri>()
            .map(|uri| uri.0.path())
            .unwrap_or_else(|| req.uri().path());
        priced.gate.evaluate_at(
            priced.operation,
            path,
            header,
            chrono::Utc::now().timestamp(),
        )
    };

    match decision {
        GateDecision::Pass => next.run(req).await,
        GateDecision::Challenge(challenge) => {
            tracing::info!(
                operation = priced.operation,
                class = ?FailureClass::InvalidProof,
                "Payment required"
            );
            challenge.into_response()
        }
    }
}

/// Request id, span and one completion line per request
async fn log_requests(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = std::time::Instant::now();
    let span = tracing::info_span!("request", %request_id, %method, %path);

    let mut response = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request complete"
        )
    });
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub fn router(state: AppState) -> Router {
    let priced = |operation: &'static str| {
        from_fn_with_state(
            PricedOperation {
                gate: state.gate.clone(),
                operation,
            },
            require_payment,
        )
    };

    let agent = Router::new()
        .route("/simulate", post(simulate).layer(priced("/simulate")))
        .route("/execute", post(execute).layer(priced("/execute")))
        .route("/policy/set", post(set_policy))
        .route("/policy/{address}", get(get_policy));

    Router::new()
        .route("/health", get(health))
        .nest("/api/agent", agent)
        .layer(from_fn(log_requests))
        .with_state(state)
}

/// Serve until `shutdown` flips to `true`
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            tracing::info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| Error::Server(e.to_string()))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> std::result::Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeRequest {
    user_address: Address,
    #[serde(flatten)]
    intent: TradeIntent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicySetRequest {
    user_address: Address,
    #[serde(flatten)]
    update: PolicyUpdate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    intent: TradeIntent,
    amount_out: String,
    policy: PolicyVerdict,
    success: bool,
}

#[derive(Debug, Serialize)]
struct UnsignedTransaction {
    to: Address,
    data: Bytes,
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    intent: TradeIntent,
    min_amount_out: String,
    transaction: UnsignedTransaction,
    message: &'static str,
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn simulate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TradeRequest>, JsonRejection>,
) -> std::result::Result<Json<SimulateResponse>, ApiError> {
    let TradeRequest {
        user_address,
        intent,
    } = body(payload)?;

    let policy = state.resolve_policy(user_address).await?;
    let verdict = state.engine.check(&policy, &intent, now());

    let amount_out = state
        .backend()?
        .simulate_trade(intent.token_in, intent.token_out, intent.amount_in)
        .await?;

    Ok(Json(SimulateResponse {
        intent,
        amount_out: amount_out.to_string(),
        policy: verdict,
        success: true,
    }))
}

async fn execute(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TradeRequest>, JsonRejection>,
) -> std::result::Result<Json<ExecuteResponse>, ApiError> {
    let TradeRequest {
        user_address,
        intent,
    } = body(payload)?;

    let policy = state.resolve_policy(user_address).await?;
    let verdict = state.engine.check(&policy, &intent, now());
    if !verdict.compliant {
        tracing::info!(user = %user_address, violations = ?verdict.violations, "Trade blocked by policy");
        return Err(ApiError::policy_violation(&verdict.violations));
    }

    let router = state
        .vault_router
        .ok_or_else(|| ApiError::service_unavailable("VaultRouter"))?;
    let backend = state.backend()?;

    // native input travels as msg.value, everything else is pulled from the vault
    if intent.token_in != ZERO_ADDRESS {
        let balance = backend
            .vault_balance(user_address, intent.token_in)
            .await?;
        if balance < intent.amount_in {
            return Err(ApiError::new(
                ErrorCode::InsufficientBalance,
                format!(
                    "Vault balance {} is below trade amount {}",
                    balance, intent.amount_in
                ),
            ));
        }
    }

    let amount_out = backend
        .simulate_trade(intent.token_in, intent.token_out, intent.amount_in)
        .await?;

    let slippage_bps = intent.max_slippage_bps.unwrap_or(policy.max_slippage_bps);
    let min_out = min_amount_out(amount_out, slippage_bps);
    let data = execute_trade_calldata(intent.token_in, intent.token_out, intent.amount_in, min_out);
    let value = if intent.token_in == ZERO_ADDRESS {
        intent.amount_in
    } else {
        U256::ZERO
    };

    tracing::info!(
        user = %user_address,
        amount_in = %intent.amount_in,
        min_amount_out = %min_out,
        "Prepared unsigned trade"
    );

    Ok(Json(ExecuteResponse {
        intent,
        min_amount_out: min_out.to_string(),
        transaction: UnsignedTransaction {
            to: router,
            data,
            value: value.to_string(),
        },
        message: "Transaction prepared. User must sign and submit.",
    }))
}

async fn get_policy(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> std::result::Result<Json<UserPolicy>, ApiError> {
    let user = Address::from_str(&address)
        .map_err(|_| ApiError::validation(format!("Invalid address: {}", address)))?;
    let policy = state.resolve_policy(user).await?;
    Ok(Json(policy.as_ref().clone()))
}

async fn set_policy(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PolicySetRequest>, JsonRejection>,
) -> std::result::Result<Json<UserPolicy>, ApiError> {
    let PolicySetRequest {
        user_address,
        update,
    } = body(payload)?;
    if update.is_empty() {
        return Err(ApiError::validation("No policy fields provided"));
    }

    let base = state.base_policy(user_address).await?;
    let policy = state
        .policies
        .apply_update(user_address, base, &update)
        .await
        .map_err(Error::from)?;
    Ok(Json(policy.as_ref().clone()))
}
