//! Inbound webhook and operator endpoints.
//!
//! - `POST /v1/webhook`        one inbound channel message in, one reply out
//! - `POST /v1/ops/ghost/run`  run a re-engagement cycle now
//!
//! When `server.webhook_secret` is set both endpoints require
//! `x-leadline-signature: sha256=<hex hmac of the raw body>`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use leadline_agent::{GhostRunResult, GhostScheduler, Orchestrator};
use leadline_channels::{InboundMessage, MediaRef};
use leadline_core::domain::conversation::{Channel, Language, MessageId};
use leadline_core::domain::tenant::TenantId;
use leadline_core::errors::{ApplicationError, InterfaceError};

pub const SIGNATURE_HEADER: &str = "x-leadline-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub ghost: Arc<GhostScheduler>,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub tenant_id: String,
    pub external_user_id: String,
    pub channel: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub callback: Option<String>,
    /// `<kind>:<provider id>`, e.g. `voice:AwACAgQ`.
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    pub fn into_message(self, now: DateTime<Utc>) -> Result<InboundMessage, String> {
        let tenant_id = self.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err("tenant_id is required".to_string());
        }
        let external_user_id = self.external_user_id.trim();
        if external_user_id.is_empty() {
            return Err("external_user_id is required".to_string());
        }
        let channel = Channel::parse(&self.channel)
            .ok_or_else(|| format!("unsupported channel `{}`", self.channel))?;
        let media = match self.media_ref.as_deref() {
            Some(raw) => Some(
                MediaRef::parse(raw).ok_or_else(|| format!("media_ref `{raw}` is not kind:id"))?,
            ),
            None => None,
        };

        Ok(InboundMessage {
            tenant_id: TenantId::new(tenant_id),
            external_user_id: external_user_id.to_string(),
            channel,
            text: self.text,
            callback: self.callback,
            media,
            // An unknown language tag is a hint we cannot use, not an error.
            language_hint: self.language.as_deref().and_then(Language::parse),
            message_id: self.message_id.filter(|id| !id.trim().is_empty()).map(MessageId),
            // Client clocks are trusted only up to the server's own.
            received_at: self.received_at.map_or(now, |at| at.min(now)),
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    correlation_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/webhook", post(webhook))
        .route("/v1/ops/ghost/run", post(run_ghost))
        .with_state(state)
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Err(response) = authorize(&state, &headers, &body, &correlation_id) {
        return response;
    }

    let payload = match serde_json::from_slice::<WebhookPayload>(&body) {
        Ok(payload) => payload,
        Err(error) => return bad_request(format!("malformed payload: {error}"), correlation_id),
    };
    let message = match payload.into_message(Utc::now()) {
        Ok(message) => message,
        Err(reason) => return bad_request(reason, correlation_id),
    };
    let language = message.language_hint.unwrap_or(Language::English);
    let tenant_id = message.tenant_id.clone();

    match state.orchestrator.handle(message).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome.reply)).into_response(),
        Err(error @ ApplicationError::NotFound { .. }) => {
            warn!(
                event_name = "server.webhook.rejected",
                correlation_id = %correlation_id,
                tenant_id = %tenant_id,
                error = %error,
            );
            interface_response(error.into_interface(correlation_id))
        }
        Err(error) => {
            error!(
                event_name = "server.webhook.turn_failed",
                correlation_id = %correlation_id,
                tenant_id = %tenant_id,
                error = %error,
                "turn failed; answering with the degraded reply"
            );
            (StatusCode::OK, Json(state.orchestrator.degraded_reply(language))).into_response()
        }
    }
}

async fn run_ghost(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Err(response) = authorize(&state, &headers, &body, &correlation_id) {
        return response;
    }

    info!(event_name = "server.ops.ghost_run", correlation_id = %correlation_id);
    match state.ghost.run_once(Utc::now()).await {
        Ok(GhostRunResult::Completed(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(GhostRunResult::AlreadyRunning) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "already_running" }))).into_response()
        }
        Err(error) => {
            error!(
                event_name = "server.ops.ghost_run_failed",
                correlation_id = %correlation_id,
                error = %error,
            );
            interface_response(error.into_interface(correlation_id))
        }
    }
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    correlation_id: &str,
) -> Result<(), Response> {
    let Some(secret) = &state.webhook_secret else {
        return Ok(());
    };
    let provided = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if verify_signature(secret.expose_secret(), provided, body) {
        return Ok(());
    }
    warn!(event_name = "server.webhook.bad_signature", correlation_id = %correlation_id);
    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid webhook signature", "correlation_id": correlation_id })),
    )
        .into_response())
}

pub fn verify_signature(secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    let Some(signature) = header.map(str::trim).and_then(|value| value.strip_prefix("sha256="))
    else {
        return false;
    };
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn bad_request(message: String, correlation_id: String) -> Response {
    warn!(
        event_name = "server.webhook.bad_request",
        correlation_id = %correlation_id,
        reason = %message,
    );
    interface_response(InterfaceError::BadRequest { message, correlation_id })
}

fn interface_response(error: InterfaceError) -> Response {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: error.user_message(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body)).into_response()
}
