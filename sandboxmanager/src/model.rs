/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Wire model of the runtime and extensions APIs: header names, request
//! and response bodies.

use serde::{Deserialize, Serialize};

// Runtime API response headers.
pub const LAMBDA_RUNTIME_AWS_REQUEST_ID: &str = "Lambda-Runtime-Aws-Request-Id";
pub const LAMBDA_RUNTIME_DEADLINE_MS: &str = "Lambda-Runtime-Deadline-Ms";
pub const LAMBDA_RUNTIME_INVOKED_FUNCTION_ARN: &str = "Lambda-Runtime-Invoked-Function-Arn";
pub const LAMBDA_RUNTIME_TRACE_ID: &str = "Lambda-Runtime-Trace-Id";

// Error-type request headers.
pub const LAMBDA_RUNTIME_FUNCTION_ERROR_TYPE: &str = "Lambda-Runtime-Function-Error-Type";
pub const LAMBDA_AGENT_FUNCTION_ERROR_TYPE: &str = "Lambda-Extension-Function-Error-Type";

// Extensions API identity headers.
pub const LAMBDA_AGENT_NAME: &str = "Lambda-Extension-Name";
pub const LAMBDA_AGENT_IDENTIFIER: &str = "Lambda-Extension-Identifier";

// Error types owned by this layer (the fatal-error taxonomy covers the
// rest).
pub const ERR_AGENT_MISSING_HEADER: &str = "Agent.MissingHeader";
pub const ERR_AGENT_IDENTIFIER_UNKNOWN: &str = "Agent.UnknownIdentifier";
pub const ERR_AGENT_INVALID_STATE: &str = "Agent.InvalidState";
pub const ERR_AGENT_REGISTRATION: &str = "Agent.RegistrationError";
pub const ERR_AGENT_INVALID_EVENT_TYPE: &str = "Agent.InvalidEventType";
pub const ERR_INVALID_STATE_TRANSITION: &str = "InvalidStateTransition";
pub const ERR_INTEROP: &str = "InteropError";

/// Body of every 4xx/5xx response rendered by this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_type: String,
    pub error_message: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, error_message: impl Into<String>) -> Self {
        ErrorResponse {
            error_type: error_type.to_owned(),
            error_message: error_message.into(),
        }
    }
}

/// Body of every accepted state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        StatusResponse {
            status: "OK".to_owned(),
        }
    }
}

/// Agent registration request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegisterRequest {
    #[serde(default)]
    pub events: Vec<String>,
}

/// Agent registration response: the function the agent is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub function_name: String,
    pub function_version: String,
    pub handler: String,
}

/// Event delivered on `/event/next`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum NextEventResponse {
    #[serde(rename = "INVOKE", rename_all = "camelCase")]
    Invoke {
        request_id: String,
        deadline_ms: i64,
        invoked_function_arn: String,
        tracing: TracingInfo,
    },
    #[serde(rename = "SHUTDOWN", rename_all = "camelCase")]
    Shutdown {
        shutdown_reason: String,
        deadline_ms: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingInfo {
    pub r#type: String,
    pub value: String,
}

/// Body of the standalone shutdown request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownBody {
    pub timeout_ms: i64,
}
