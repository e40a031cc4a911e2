/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Handler functions of the runtime API.
//!
//! Every handler is a thin adapter: recover the shared context, validate
//! headers, ask the registration service for the state transition, hand
//! payloads to the interop server, render the outcome.

use super::{
    render_accepted, render_forbidden, render_internal, render_interop_error, AppState,
};
use crate::appctx::InvokeErrorTraceData;
use crate::core::registration::RegistrationError;
use crate::core::states::{RuntimeState, StateError};
use crate::interop::{json_content_type, ErrorInvokeResponse, FunctionError, InvokeResponseHeaders};
use crate::model::{
    ERR_INVALID_STATE_TRANSITION, LAMBDA_RUNTIME_AWS_REQUEST_ID, LAMBDA_RUNTIME_DEADLINE_MS,
    LAMBDA_RUNTIME_FUNCTION_ERROR_TYPE, LAMBDA_RUNTIME_INVOKED_FUNCTION_ARN,
    LAMBDA_RUNTIME_TRACE_ID,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use common::fatalerror::{self, ErrorType};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invocation/next", get(next))
        .route("/invocation/:id/response", post(invocation_response))
        .route("/invocation/:id/error", post(invocation_error))
        .route("/init/error", post(init_error))
        .route("/restore/error", post(restore_error))
        .route("/restore/next", get(restore_next))
}

/// Long-poll for the next invocation.
///
/// The call itself is the runtime's readiness signal: init (or the
/// previous invocation) is complete, so the state moves to `Ready` before
/// the poll blocks on the interop server.
async fn next(State(state): State<AppState>) -> Response {
    let Some(interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    if let Err(err) = state.registration.runtime_ready() {
        return render_runtime_transition_failure(&err);
    }

    let invoke = match interop.next_invoke().await {
        Ok(invoke) => invoke,
        Err(err) => return render_interop_error(&err),
    };

    if let Err(err) = state.registration.runtime_invoke_dispatched() {
        return render_runtime_transition_failure(&err);
    }

    (
        StatusCode::OK,
        [
            (LAMBDA_RUNTIME_AWS_REQUEST_ID, invoke.request_id),
            (LAMBDA_RUNTIME_DEADLINE_MS, invoke.deadline_ms.to_string()),
            (
                LAMBDA_RUNTIME_INVOKED_FUNCTION_ARN,
                invoke.invoked_function_arn,
            ),
            (LAMBDA_RUNTIME_TRACE_ID, invoke.trace_id),
            (CONTENT_TYPE.as_str(), invoke.content_type),
        ],
        invoke.payload,
    )
        .into_response()
}

/// Deliver the payload the runtime produced for one invocation.
async fn invocation_response(
    State(state): State<AppState>,
    Path(invoke_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    if let Err(err) = state.registration.runtime_response() {
        return render_runtime_transition_failure(&err);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_owned();
    if let Err(err) = interop.send_response(
        &invoke_id,
        InvokeResponseHeaders { content_type },
        body.to_vec(),
    ) {
        return render_interop_error(&err);
    }

    if let Err(err) = state.registration.runtime_response_sent() {
        return render_runtime_transition_failure(&err);
    }

    render_accepted()
}

/// Deliver a function error the runtime produced for one invocation.
async fn invocation_error(
    State(state): State<AppState>,
    Path(invoke_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    let error_type =
        fatalerror::validate_runtime_or_function(header_value(&headers, LAMBDA_RUNTIME_FUNCTION_ERROR_TYPE));

    if let Err(err) = state.registration.runtime_error_response() {
        return render_runtime_transition_failure(&err);
    }

    let response = error_invoke_response(error_type, &body);
    if let Err(err) = interop.send_error_response(&invoke_id, response) {
        return render_interop_error(&err);
    }

    if let Err(err) = state.registration.runtime_response_sent() {
        return render_runtime_transition_failure(&err);
    }

    state
        .appctx
        .store_invoke_error_trace_data(InvokeErrorTraceData::default());
    render_accepted()
}

/// Runtime failed to initialize.
async fn init_error(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    let raw = header_value(&headers, LAMBDA_RUNTIME_FUNCTION_ERROR_TYPE);
    let error_type = fatalerror::validate_runtime_or_function(raw);
    let kind = runtime_fatal_kind(raw);
    let response = error_invoke_response(error_type, &body);

    // Runtimes still report exceptions thrown in their restore hooks
    // here. TODO: drop this branch once the language runtimes report them
    // through /restore/error.
    if state.registration.runtime_state() == Ok(RuntimeState::Restoring) {
        if let Err(err) = state.registration.runtime_restore_error(kind) {
            return render_runtime_transition_failure(&err);
        }
        state
            .appctx
            .store_invoke_error_trace_data(InvokeErrorTraceData::default());
        return render_accepted();
    }

    if let Err(err) = state.registration.runtime_init_error(kind) {
        return render_runtime_transition_failure(&err);
    }

    if let Err(err) = interop.send_init_error_response(response) {
        return render_interop_error(&err);
    }

    state.appctx.store_first_fatal_error(kind);
    state
        .appctx
        .store_invoke_error_trace_data(InvokeErrorTraceData::default());
    render_accepted()
}

/// Runtime failed while restoring a snapshot.
async fn restore_error(
    State(state): State<AppState>,
    headers: HeaderMap,
    _body: Bytes,
) -> Response {
    let Some(_interop) = state.appctx.load_interop_server() else {
        return render_internal("interop server is not wired into the sandbox");
    };

    let kind = runtime_fatal_kind(header_value(&headers, LAMBDA_RUNTIME_FUNCTION_ERROR_TYPE));
    if let Err(err) = state.registration.runtime_restore_error(kind) {
        return render_runtime_transition_failure(&err);
    }

    state
        .appctx
        .store_invoke_error_trace_data(InvokeErrorTraceData::default());
    render_accepted()
}

/// Runtime completed its restore cycle.
async fn restore_next(State(state): State<AppState>) -> Response {
    if let Err(err) = state.registration.runtime_restore_completed() {
        return render_runtime_transition_failure(&err);
    }
    (StatusCode::OK, axum::Json(crate::model::StatusResponse::ok())).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Fatal kind recorded on the runtime entity for a reported error. Wire
/// values outside the closed set count as unclassified runtime failures.
fn runtime_fatal_kind(raw: &str) -> ErrorType {
    match ErrorType::validate(raw) {
        ErrorType::Unknown => ErrorType::RuntimeUnknown,
        known => known,
    }
}

fn error_invoke_response(error_type: String, body: &Bytes) -> ErrorInvokeResponse {
    ErrorInvokeResponse {
        headers: InvokeResponseHeaders {
            content_type: json_content_type(body).to_owned(),
        },
        function_error: FunctionError {
            error_type,
            error_message: String::new(),
        },
        payload: body.to_vec(),
    }
}

fn render_runtime_transition_failure(error: &RegistrationError) -> Response {
    let message = match error {
        RegistrationError::State(StateError::InvalidTransition { current, target }) => format!(
            "State transition from {current} to {target} failed for runtime. Error: {error}"
        ),
        other => format!("Runtime state transition failed. Error: {other}"),
    };
    render_forbidden(ERR_INVALID_STATE_TRANSITION, &message)
}
