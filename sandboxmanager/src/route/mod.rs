/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Access point of the sandbox emulator HTTP APIs.
//!
//! Three surfaces share one listener: the runtime API the function
//! process talks to, the extensions API its agents talk to, and the
//! standalone surface callers use to invoke the function and shut the
//! sandbox down.

pub mod extension;
pub mod runtime;
pub mod standalone;

use crate::appctx::ApplicationContext;
use crate::core::registration::RegistrationService;
use crate::interop::InteropError;
use crate::manager::InvokeRequest;
use crate::model::{ErrorResponse, StatusResponse, LAMBDA_AGENT_IDENTIFIER, ERR_INTEROP};
use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Agent identity recovered from `Lambda-Extension-Identifier` by the
/// [`agent_identity`] middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentId(pub Uuid);

/// Shared singletons handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<RegistrationService>,
    pub appctx: ApplicationContext,
    pub invoke_tx: mpsc::Sender<InvokeRequest>,
}

/// Compose the full emulator router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/2018-06-01/runtime", runtime::router())
        .nest("/2020-01-01/extension", extension::router())
        .merge(standalone::router())
        .layer(middleware::from_fn(agent_identity))
        .with_state(state)
}

/// Serve the emulator HTTP APIs until the shutdown signal fires.
pub async fn launch_tcp_listener(state: AppState, mut shutdown_rx: watch::Receiver<bool>) {
    let config = crate::config::Config::get();
    let addr = format!("{}:{}", config.sandbox.host_ip, config.sandbox.port);
    let listener = TcpListener::bind(&addr).await.unwrap();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    info!(
        "sandbox api listening on {}",
        listener.local_addr().unwrap()
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .unwrap();
}

/// Populate the agent identity extension from the identifier header.
/// Routes that require the identity answer 500 when it is absent; the
/// middleware itself rejects nothing.
pub async fn agent_identity(mut request: Request, next: Next) -> Response {
    if let Some(value) = request.headers().get(LAMBDA_AGENT_IDENTIFIER) {
        if let Some(id) = value.to_str().ok().and_then(|v| v.parse::<Uuid>().ok()) {
            request.extensions_mut().insert(AgentId(id));
        }
    }
    next.run(request).await
}

/// Accepted state transition: 202 `{"status":"OK"}`.
pub(crate) fn render_accepted() -> Response {
    info!("state transition accepted");
    (StatusCode::ACCEPTED, Json(StatusResponse::ok())).into_response()
}

/// Denied request: 403 with a structured error body.
pub(crate) fn render_forbidden(error_type: &str, error_message: &str) -> Response {
    warn!(error_type, error_message, "request forbidden");
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::new(error_type, error_message)),
    )
        .into_response()
}

/// Wiring bug: 500. Anything here means the sandbox was assembled wrong.
pub(crate) fn render_internal(error_message: &str) -> Response {
    warn!(error_message, "internal sandbox wiring error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("InternalServerError", error_message)),
    )
        .into_response()
}

/// The interop server rejected a delivery.
pub(crate) fn render_interop_error(error: &InteropError) -> Response {
    warn!(%error, "interop delivery failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(ERR_INTEROP, &error.to_string())),
    )
        .into_response()
}
