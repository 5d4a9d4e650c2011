//! HTTP server for tellus.
//!
//! # Endpoints
//!
//! - `POST /api/github/webhook` - Accepts GitHub webhook deliveries
//! - `GET /healthz` - Returns `"ok"` while the server is running

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::feedback::Reporter;
use crate::terraform::Executor;
use crate::worker::Dispatcher;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Largest webhook payload GitHub delivers.
pub const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<E, R> {
    inner: Arc<AppStateInner<E, R>>,
}

struct AppStateInner<E, R> {
    dispatcher: Arc<Dispatcher<E, R>>,

    /// Webhook secret for HMAC-SHA256 signature verification. Unsigned
    /// deliveries are accepted when this is `None`.
    webhook_secret: Option<Vec<u8>>,
}

impl<E, R> Clone for AppState<E, R> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, R> AppState<E, R> {
    pub fn new(dispatcher: Arc<Dispatcher<E, R>>, webhook_secret: Option<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                webhook_secret,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<E, R> {
        &self.inner.dispatcher
    }

    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.inner.webhook_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<E, R>(app_state: AppState<E, R>) -> axum::Router
where
    E: Executor + Send + Sync + 'static,
    R: Reporter + Send + Sync + 'static,
{
    use axum::extract::DefaultBodyLimit;
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/api/github/webhook",
            post(webhook_handler::<E, R>).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
