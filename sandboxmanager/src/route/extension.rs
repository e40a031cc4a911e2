/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Handler functions of the extensions API.
//!
//! Agent routes are authenticated by the identifier middleware: the
//! handlers recover the [`AgentId`] extension themselves and render a
//! structured 500 when it is missing, since only broken wiring can
//! produce that.

use super::{render_accepted, render_forbidden, render_internal, AgentId, AppState};
use crate::core::agent::SandboxEvent;
use crate::core::registration::RegistrationError;
use crate::core::states::{AgentState, StateError};
use crate::model::{
    NextEventResponse, RegisterRequest, RegisterResponse, TracingInfo,
    ERR_AGENT_INVALID_EVENT_TYPE, ERR_AGENT_INVALID_STATE, ERR_AGENT_MISSING_HEADER,
    ERR_AGENT_REGISTRATION, ERR_AGENT_IDENTIFIER_UNKNOWN, LAMBDA_AGENT_FUNCTION_ERROR_TYPE,
    LAMBDA_AGENT_IDENTIFIER, LAMBDA_AGENT_NAME,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use common::fatalerror::ErrorType;
use tracing::info;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/event/next", get(event_next))
        .route("/init/error", post(init_error))
        .route("/exit/error", post(exit_error))
}

/// Register an agent by name and subscribe it to lifecycle events.
///
/// External agents were created when their process was discovered; this
/// call finds them by name. Anything else registers as an internal agent.
async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let name = headers
        .get(LAMBDA_AGENT_NAME)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if name.is_empty() {
        return render_forbidden(ERR_AGENT_REGISTRATION, "extension name header missing");
    }

    let agent = match state.registration.find_external_agent_by_name(name) {
        Some(agent) => agent,
        None => match state.registration.create_internal_agent(name, &request.events) {
            Ok(agent) => agent,
            Err(err) => return render_registration_failure(&err),
        },
    };

    let agent = match state.registration.register_agent(agent.id, &request.events) {
        Ok(agent) => agent,
        Err(err) => return render_registration_failure(&err),
    };
    info!(agent = %agent.name, id = %agent.id, "agent registered");

    let metadata = state.registration.get_function_metadata();
    (
        StatusCode::OK,
        [(LAMBDA_AGENT_IDENTIFIER, agent.id.to_string())],
        Json(RegisterResponse {
            function_name: metadata.function_name,
            function_version: metadata.function_version,
            handler: metadata.handler,
        }),
    )
        .into_response()
}

/// Long-poll for the next lifecycle event.
///
/// The first call is the agent's readiness signal for the init flow;
/// subsequent calls acknowledge the previous event for the invoke flow.
async fn event_next(
    State(state): State<AppState>,
    identity: Option<Extension<AgentId>>,
) -> Response {
    let Some(Extension(AgentId(agent_id))) = identity else {
        return render_internal("agent identity missing from request context");
    };

    let Some(agent) = state.registration.find_agent_by_id(agent_id) else {
        return render_forbidden(ERR_AGENT_IDENTIFIER_UNKNOWN, "unknown extension identifier");
    };

    let result = match agent.state {
        AgentState::Registered => state.registration.agent_ready_for_events(agent_id),
        AgentState::Running => state.registration.agent_event_processed(agent_id),
        AgentState::Ready => Ok(()),
        _ => Err(RegistrationError::State(StateError::InvalidTransition {
            current: agent.state.name(),
            target: AgentState::Ready.name(),
        })),
    };
    if let Err(err) = result {
        return render_agent_transition_failure(&agent.name, &err);
    }

    let Some(receiver) = state.registration.agent_event_receiver(agent_id) else {
        return render_forbidden(ERR_AGENT_IDENTIFIER_UNKNOWN, "unknown extension identifier");
    };
    let event = receiver.lock().await.recv().await;

    match event {
        Some(SandboxEvent::Invoke {
            request_id,
            deadline_ms,
            invoked_function_arn,
            trace_id,
        }) => {
            if let Err(err) = state.registration.agent_event_dispatched(agent_id) {
                return render_agent_transition_failure(&agent.name, &err);
            }
            Json(NextEventResponse::Invoke {
                request_id,
                deadline_ms,
                invoked_function_arn,
                tracing: TracingInfo {
                    r#type: "X-Amzn-Trace-Id".to_owned(),
                    value: trace_id,
                },
            })
            .into_response()
        }
        Some(SandboxEvent::Shutdown {
            shutdown_reason,
            deadline_ms,
        }) => Json(NextEventResponse::Shutdown {
            shutdown_reason,
            deadline_ms,
        })
        .into_response(),
        None => render_internal("agent event channel closed"),
    }
}

/// Agent failed during the init window.
async fn init_error(
    State(state): State<AppState>,
    identity: Option<Extension<AgentId>>,
    headers: HeaderMap,
) -> Response {
    let Some(Extension(AgentId(agent_id))) = identity else {
        return render_internal("agent identity missing from request context");
    };

    if !headers.contains_key(LAMBDA_AGENT_FUNCTION_ERROR_TYPE) {
        return render_forbidden(
            ERR_AGENT_MISSING_HEADER,
            "Lambda-Extension-Function-Error-Type header is required",
        );
    }

    let Some(agent) = state.registration.find_agent_by_id(agent_id) else {
        return render_forbidden(ERR_AGENT_IDENTIFIER_UNKNOWN, "unknown extension identifier");
    };

    if let Err(err) = state
        .registration
        .agent_init_error(agent_id, ErrorType::AgentInit)
    {
        return render_agent_transition_failure(&agent.name, &err);
    }

    state.appctx.store_first_fatal_error(ErrorType::AgentInit);
    render_accepted()
}

/// Agent failed after the init window.
async fn exit_error(
    State(state): State<AppState>,
    identity: Option<Extension<AgentId>>,
    headers: HeaderMap,
) -> Response {
    let Some(Extension(AgentId(agent_id))) = identity else {
        return render_internal("agent identity missing from request context");
    };

    if !headers.contains_key(LAMBDA_AGENT_FUNCTION_ERROR_TYPE) {
        return render_forbidden(
            ERR_AGENT_MISSING_HEADER,
            "Lambda-Extension-Function-Error-Type header is required",
        );
    }

    let Some(agent) = state.registration.find_agent_by_id(agent_id) else {
        return render_forbidden(ERR_AGENT_IDENTIFIER_UNKNOWN, "unknown extension identifier");
    };

    if let Err(err) = state
        .registration
        .agent_exit_error(agent_id, ErrorType::AgentExit)
    {
        return render_agent_transition_failure(&agent.name, &err);
    }

    state.appctx.store_first_fatal_error(ErrorType::AgentExit);
    render_accepted()
}

fn render_agent_transition_failure(name: &str, error: &RegistrationError) -> Response {
    let message = match error {
        RegistrationError::State(StateError::InvalidTransition { current, target }) => format!(
            "State transition from {current} to {target} failed for extension {name}. Error: {error}"
        ),
        other => format!("State transition failed for extension {name}. Error: {other}"),
    };
    render_forbidden(ERR_AGENT_INVALID_STATE, &message)
}

fn render_registration_failure(error: &RegistrationError) -> Response {
    match error {
        RegistrationError::InvalidEventName(name) => render_forbidden(
            ERR_AGENT_INVALID_EVENT_TYPE,
            &format!("unknown event name: {name}"),
        ),
        RegistrationError::State(StateError::InvalidTransition { current, target }) => {
            render_forbidden(
                ERR_AGENT_INVALID_STATE,
                &format!("State transition from {current} to {target} failed. Error: {error}"),
            )
        }
        other => render_forbidden(ERR_AGENT_REGISTRATION, &other.to_string()),
    }
}
