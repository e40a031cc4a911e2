/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Closed taxonomy of fatal errors reportable by the runtime or its agents.
//!
//! Wire values arrive in error-type headers and are mapped through
//! [`ErrorType::validate`], which never fails: anything outside the known
//! set collapses to [`ErrorType::Unknown`]. Callers that forbid `Unknown`
//! reject it themselves.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A terminal error kind recorded on a sandbox entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum ErrorType {
    /// Runtime process exited before completing init or an invocation.
    RuntimeExit,
    /// Bootstrap entrypoint could not be resolved.
    InvalidEntrypoint,
    /// The configured handler does not exist in the function package.
    HandlerNotFound,
    /// Runtime produced a response the platform could not parse.
    InvalidResponseFormat,
    /// Runtime failed for a reason it did not classify.
    RuntimeUnknown,
    /// An agent reported a failure during the init window.
    AgentInit,
    /// An agent reported a failure after init.
    AgentExit,
    /// Catch-all for wire values outside the known set.
    Unknown,
}

impl ErrorType {
    /// Wire representation used in headers, response bodies and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::RuntimeExit => "Runtime.ExitError",
            ErrorType::InvalidEntrypoint => "Runtime.InvalidEntrypoint",
            ErrorType::HandlerNotFound => "Runtime.HandlerNotFound",
            ErrorType::InvalidResponseFormat => "Runtime.InvalidResponseFormat",
            ErrorType::RuntimeUnknown => "Runtime.Unknown",
            ErrorType::AgentInit => "Agent.InitError",
            ErrorType::AgentExit => "Agent.ExitError",
            ErrorType::Unknown => "Unknown",
        }
    }

    /// Map an arbitrary wire value to a recognized kind, or `Unknown`.
    ///
    /// Never fails. Downstream contexts that forbid `Unknown` must reject
    /// it there.
    pub fn validate(value: &str) -> ErrorType {
        match value {
            "Runtime.ExitError" => ErrorType::RuntimeExit,
            "Runtime.InvalidEntrypoint" => ErrorType::InvalidEntrypoint,
            "Runtime.HandlerNotFound" => ErrorType::HandlerNotFound,
            "Runtime.InvalidResponseFormat" => ErrorType::InvalidResponseFormat,
            "Runtime.Unknown" => ErrorType::RuntimeUnknown,
            "Agent.InitError" => ErrorType::AgentInit,
            "Agent.ExitError" => ErrorType::AgentExit,
            _ => ErrorType::Unknown,
        }
    }
}

/// Validate an error-type wire value reported by the runtime.
///
/// Known taxonomy values pass through as-is. Custom function errors keep
/// their `Function.`-prefixed name verbatim, since user code classifies
/// its own failures. Anything else collapses to `Unknown`.
pub fn validate_runtime_or_function(value: &str) -> String {
    if value.starts_with("Function.") {
        return value.to_owned();
    }
    match ErrorType::validate(value) {
        ErrorType::Unknown => ErrorType::Unknown.as_str().to_owned(),
        known => known.as_str().to_owned(),
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<String> for ErrorType {
    fn from(value: String) -> Self {
        ErrorType::validate(&value)
    }
}
