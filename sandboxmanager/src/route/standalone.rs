/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Handler functions of the standalone surface: function invocation and
//! sandbox shutdown.

use super::{render_internal, render_interop_error, AppState};
use crate::config::Config;
use crate::interop::{Invoke, Shutdown};
use crate::manager::InvokeRequest;
use crate::model::ShutdownBody;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Response header flagging that the payload is a function error.
pub const FUNCTION_ERROR_HEADER: &str = "X-Amz-Function-Error";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/2015-03-31/functions/function/invocations",
            post(invoke),
        )
        .route("/restore", post(restore))
        .route("/shutdown", post(shutdown))
}

/// Invoke the emulated function and wait for its result.
async fn invoke(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let config = Config::get();
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_owned();

    let invoke = Invoke {
        request_id: Uuid::new_v4().to_string(),
        invoked_function_arn: config.function_arn(),
        deadline_ms: Utc::now().timestamp_millis() + config.sandbox.function.timeout_ms,
        trace_id: new_trace_id(),
        payload: body.to_vec(),
        content_type,
    };

    let (done_tx, done_rx) = oneshot::channel();
    if state
        .invoke_tx
        .send(InvokeRequest {
            invoke,
            done: done_tx,
        })
        .await
        .is_err()
    {
        return render_internal("sandbox supervisor is not running");
    }

    match done_rx.await {
        Ok(outcome) => {
            let mut response = (
                StatusCode::OK,
                [(CONTENT_TYPE.as_str(), outcome.content_type)],
                outcome.payload,
            )
                .into_response();
            if let Some(function_error) = outcome.function_error {
                if let Ok(value) = function_error.parse::<axum::http::HeaderValue>() {
                    response
                        .headers_mut()
                        .insert(FUNCTION_ERROR_HEADER, value);
                }
            }
            response
        }
        Err(_) => render_internal("invocation aborted by the supervisor"),
    }
}

/// Begin a restore cycle and wait until the runtime reports the snapshot
/// restored.
async fn restore(State(state): State<AppState>) -> Response {
    let config = Config::get();
    if let Err(error) = state.registration.runtime_restore_started() {
        return super::render_forbidden(
            crate::model::ERR_INVALID_STATE_TRANSITION,
            &format!("Runtime restore cycle could not start. Error: {error}"),
        );
    }

    let restore_timeout = Duration::from_millis(config.sandbox.function.timeout_ms.max(0) as u64);
    let init_flow = state.registration.init_flow();
    match tokio::time::timeout(restore_timeout, init_flow.await_runtime_restore_ready()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(crate::model::StatusResponse::ok())).into_response(),
        Ok(Err(error)) => super::render_forbidden(
            crate::model::ERR_INVALID_STATE_TRANSITION,
            &format!("Runtime restore cycle failed. Error: {error}"),
        ),
        Err(_) => render_internal("runtime did not complete the restore cycle in time"),
    }
}

/// Shut the sandbox down and report the final state of every
/// participant.
async fn shutdown(State(state): State<AppState>, Json(body): Json<ShutdownBody>) -> Response {
    let Some(interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let deadline_ns = now_ns.saturating_add(body.timeout_ms.saturating_mul(1_000_000));
    match interop.shutdown(Shutdown { deadline_ns }).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => render_interop_error(&err),
    }
}

fn new_trace_id() -> String {
    let epoch = Utc::now().timestamp() as u32;
    let unique = Uuid::new_v4().simple().to_string();
    format!("Root=1-{epoch:08x}-{}", &unique[..24])
}
