//! Axum HTTP surface.
//!
//! Provides:
//!   POST /tg-webhook      → Telegram webhook (secret-token header)
//!   GET  /health          → liveness probe
//!   GET  /run             → manual notification pass (key-guarded)
//!   GET  /debug-subs      → subscription dump (key-guarded)
//!   GET  /diag            → config presence booleans (key-guarded)
//!   GET  /peek            → watermark + latest votes for a ref (key-guarded)
//!   GET  /notify-dummy    → send a synthetic vote message (key-guarded)
//!   GET  /set-commands    → register the bot command menu (key-guarded)
//!   GET  /set-identity    → pin a display-name override (key-guarded)
//!
//! The scheduled pass never surfaces errors to end users; these admin
//! routes are where internal state becomes visible.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::commands;
use crate::format::format_vote;
use crate::notifier::Notifier;
use crate::sources::{HttpVoteSource, VoteSource};
use crate::store::Store;
use crate::telegram::TelegramClient;
use crate::types::{normalize_timestamp_secs, now_secs, Network, VoteDirection, VoteEvent};

/// The concrete engine wiring used by the running service.
pub type AppNotifier = Notifier<Arc<HttpVoteSource>, Arc<TelegramClient>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub notifier: Arc<AppNotifier>,
    pub telegram: Arc<TelegramClient>,
    pub source: Arc<HttpVoteSource>,
    pub webhook_secret: String,
    pub has_telegram_token: bool,
    pub has_subscan_key: bool,
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeekQuery {
    key: Option<String>,
    #[serde(rename = "ref")]
    ref_id: Option<i64>,
    chain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DummyQuery {
    key: Option<String>,
    chat: Option<String>,
    #[serde(rename = "ref")]
    ref_id: Option<i64>,
    #[serde(rename = "type")]
    direction: Option<String>,
    chain: Option<String>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    key: Option<String>,
    addr: Option<String>,
    display: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tg-webhook", post(tg_webhook))
        .route("/health", get(health))
        .route("/run", get(run_pass))
        .route("/debug-subs", get(debug_subs))
        .route("/diag", get(diag))
        .route("/peek", get(peek))
        .route("/notify-dummy", get(notify_dummy))
        .route("/set-commands", get(set_commands))
        .route("/set-identity", get(set_identity))
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "http server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Admin routes share one credential: the webhook secret as a `key`
/// query parameter.
fn authorized(secret: &str, key: Option<&str>) -> bool {
    !secret.is_empty() && key == Some(secret)
}

async fn health() -> &'static str {
    "ok"
}

async fn tg_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let token = headers
        .get("X-Telegram-Bot-Api-Secret-Token")
        .and_then(|v| v.to_str().ok());
    if token != Some(state.webhook_secret.as_str()) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    // tolerate update shapes we don't model; Telegram retries on non-2xx
    match serde_json::from_str::<commands::Update>(&body) {
        Ok(update) => {
            commands::handle_update(&state.store, &state.telegram, &update).await;
            (StatusCode::OK, "ok").into_response()
        }
        Err(_) => (StatusCode::OK, "ignored").into_response(),
    }
}

async fn run_pass(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let summary = state.notifier.run_pass().await;
    Json(summary).into_response()
}

async fn debug_subs(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    match state.store.dump_subscriptions() {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn diag(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    Json(json!({
        "hasToken": state.has_telegram_token,
        "hasSecret": !state.webhook_secret.is_empty(),
        "hasSubscanKey": state.has_subscan_key,
    }))
    .into_response()
}

/// Peek at the watermark and the latest parsed votes for one referendum,
/// without delivering anything or moving state.
async fn peek(State(state): State<AppState>, Query(query): Query<PeekQuery>) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let ref_id = query.ref_id.unwrap_or(1759);
    let network = query
        .chain
        .as_deref()
        .and_then(Network::parse)
        .unwrap_or(Network::Polkadot);

    let watermark = match state.store.get_watermark(ref_id, network) {
        Ok(wm) => wm,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let batch = state.source.fetch_recent_votes(network, ref_id).await;
    let latest: Vec<_> = batch
        .votes
        .iter()
        .take(5)
        .map(|v| {
            json!({
                "direction": v.direction,
                "addr": v.address,
                "delegate": v.delegate,
                "amount": v.amount,
                "ts": normalize_timestamp_secs(v.timestamp),
            })
        })
        .collect();

    Json(json!({
        "ref": ref_id,
        "chain": network.code(),
        "watermark_sec": watermark,
        "provider_errors": batch.provider_errors,
        "latest": latest,
    }))
    .into_response()
}

async fn notify_dummy(
    State(state): State<AppState>,
    Query(query): Query<DummyQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let Some(chat) = query.chat else {
        return (StatusCode::BAD_REQUEST, "chat required").into_response();
    };
    let ref_id = query.ref_id.unwrap_or(1759);
    let network = query
        .chain
        .as_deref()
        .and_then(Network::parse)
        .unwrap_or(Network::Polkadot);
    let direction = query
        .direction
        .as_deref()
        .and_then(VoteDirection::from_status)
        .unwrap_or(VoteDirection::Aye);
    let address = query
        .addr
        .unwrap_or_else(|| "16CwBowmC6fNyvBGwtZwoKFu8PDjTbd1pMovQRx2UyjhJArK".to_string());

    let vote = VoteEvent {
        direction,
        address,
        delegate: None,
        amount: "123400000000".to_string(),
        conviction: Some("Locked1x".to_string()),
        timestamp: now_secs(),
    };
    let text = format_vote(ref_id, network, &vote, None);
    match state.telegram.send_message(&chat, &text).await {
        Ok(()) => "dummy sent".into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn set_commands(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    match state.telegram.set_my_commands().await {
        Ok(()) => "commands set".into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn set_identity(
    State(state): State<AppState>,
    Query(query): Query<IdentityQuery>,
) -> impl IntoResponse {
    if !authorized(&state.webhook_secret, query.key.as_deref()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let (Some(addr), Some(display)) = (query.addr, query.display) else {
        return (StatusCode::BAD_REQUEST, "addr & display are required").into_response();
    };
    match state.store.set_identity_override(&addr, &display) {
        Ok(()) => "ok".into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_requires_nonempty_secret_match() {
        assert!(authorized("s3cret", Some("s3cret")));
        assert!(!authorized("s3cret", Some("wrong")));
        assert!(!authorized("s3cret", None));
        // an unset secret must never authorize anything
        assert!(!authorized("", Some("")));
        assert!(!authorized("", None));
    }
}
