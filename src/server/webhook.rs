//! Webhook endpoint handler.
//!
//! Verifies and classifies a GitHub delivery, then hands it to the
//! repository's worker. The response is sent as soon as the job is queued;
//! terraform runs afterwards.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::feedback::Reporter;
use crate::terraform::Executor;
use crate::types::DeliveryId;
use crate::webhooks::{ParseError, SIGNATURE_HEADER, SignatureError, parse_webhook, verify_signature};
use crate::worker::{DispatchError, Job};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// The payload could not be classified.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),

    /// The job could not be queued.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 202 Accepted: a plan or apply may run; the job is queued
/// - 200 OK (`Ignored`): the event kind or action never triggers a run
/// - 400 Bad Request: missing `X-GitHub-Event` or an unusable payload
/// - 401 Unauthorized: bad or missing signature while a secret is configured
/// - 503 Service Unavailable: the repository's queue is full, or shutting down
pub async fn webhook_handler<E, R>(
    State(app_state): State<AppState<E, R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError>
where
    E: Executor + Send + Sync + 'static,
    R: Reporter + Send + Sync + 'static,
{
    let event_kind = header(&headers, HEADER_EVENT).ok_or(WebhookError::MissingHeader(HEADER_EVENT))?;
    let delivery = header(&headers, HEADER_DELIVERY).map(DeliveryId::new);
    let delivery_label = delivery.as_ref().map_or("-", DeliveryId::as_str);

    debug!(delivery = delivery_label, event = event_kind, "Received webhook");

    // Verify before parsing.
    if let Some(secret) = app_state.webhook_secret() {
        let signature = header(&headers, SIGNATURE_HEADER);
        if let Err(e) = verify_signature(&body, signature, secret) {
            warn!(delivery = delivery_label, error = %e, "Rejected webhook signature");
            return Err(e.into());
        }
    }

    let event = match parse_webhook(event_kind, &body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(delivery = delivery_label, event = event_kind, "Ignoring webhook");
            return Ok((StatusCode::OK, "Ignored"));
        }
        Err(e) => {
            warn!(delivery = delivery_label, event = event_kind, error = %e, "Could not parse webhook");
            return Err(e.into());
        }
    };

    info!(delivery = delivery_label, %event, "Queueing webhook");
    app_state
        .dispatcher()
        .dispatch(Job::new(delivery, event))
        .await?;

    Ok((StatusCode::ACCEPTED, "Accepted"))
}

/// Returns a header's value, if present and valid UTF-8.
fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
