/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Interop boundary between the HTTP handlers and the sandbox supervisor.
//!
//! Handlers never touch the supervised function process; they hand
//! invocations, responses and errors to an [`InteropServer`] and translate
//! its failures into structured HTTP errors. The channel-backed
//! [`SandboxInteropServer`] pairs the public invoke endpoint with the
//! runtime's `/invocation/next` long poll.

use async_trait::async_trait;
use common::fatalerror::ErrorType;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// One invocation handed to the runtime.
#[derive(Debug, Clone)]
pub struct Invoke {
    pub request_id: String,
    pub invoked_function_arn: String,
    pub deadline_ms: i64,
    pub trace_id: String,
    pub payload: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct InvokeResponseHeaders {
    pub content_type: String,
}

/// Error reported by the runtime or an agent, as put on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionError {
    pub error_type: String,
    pub error_message: String,
}

#[derive(Debug, Clone)]
pub struct ErrorInvokeResponse {
    pub headers: InvokeResponseHeaders,
    pub function_error: FunctionError,
    pub payload: Vec<u8>,
}

/// Control request ending the sandbox.
#[derive(Debug, Clone, Copy)]
pub struct Shutdown {
    pub deadline_ns: i64,
}

/// Final state of one entity, reported in the shutdown snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub name: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorType>,
}

/// Snapshot of every participant, returned from [`InteropServer::shutdown`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalState {
    pub runtime: Option<EntitySnapshot>,
    pub agents: Vec<EntitySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_fatal_error: Option<ErrorType>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InteropError {
    #[error("no invocation is pending delivery")]
    NoPendingInvoke,
    #[error("invocation id mismatch: expected {expected}, got {got}")]
    InvokeIdMismatch { expected: String, got: String },
    #[error("a response was already sent for this invocation")]
    ResponseAlreadySent,
    #[error("an invocation is already in flight")]
    InvokeAlreadyPending,
    #[error("sandbox is shutting down")]
    SandboxShuttingDown,
}

/// Result of one invocation, as delivered by the runtime.
#[derive(Debug, Clone)]
pub enum InvokeResult {
    Response {
        headers: InvokeResponseHeaders,
        payload: Vec<u8>,
    },
    Error(ErrorInvokeResponse),
}

/// Shutdown request routed to the supervisor, answered with the snapshot.
#[derive(Debug)]
pub struct ShutdownRequest {
    pub shutdown: Shutdown,
    pub done: oneshot::Sender<InternalState>,
}

#[async_trait]
pub trait InteropServer: Send + Sync {
    /// Runtime-side long poll for the next invocation.
    async fn next_invoke(&self) -> Result<Invoke, InteropError>;

    /// Deliver a successful invocation response.
    fn send_response(
        &self,
        invoke_id: &str,
        headers: InvokeResponseHeaders,
        payload: Vec<u8>,
    ) -> Result<(), InteropError>;

    /// Deliver a function error response for an invocation.
    fn send_error_response(
        &self,
        invoke_id: &str,
        response: ErrorInvokeResponse,
    ) -> Result<(), InteropError>;

    /// Record the init error the runtime reported. The first one wins and
    /// is replayed to every caller that invokes a sandbox that never came
    /// up.
    fn send_init_error_response(&self, response: ErrorInvokeResponse) -> Result<(), InteropError>;

    /// Drive sandbox shutdown and collect the final state of every
    /// participant.
    async fn shutdown(&self, shutdown: Shutdown) -> Result<InternalState, InteropError>;
}

struct InFlightInvoke {
    request_id: String,
    result: Option<InvokeResult>,
}

/// Channel-backed interop server wiring the supervisor to the handlers.
pub struct SandboxInteropServer {
    invoke_tx: mpsc::Sender<Invoke>,
    invoke_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Invoke>>>,
    in_flight: Mutex<Option<InFlightInvoke>>,
    stored_init_error: Mutex<Option<ErrorInvokeResponse>>,
    shutdown_tx: mpsc::Sender<ShutdownRequest>,
}

impl SandboxInteropServer {
    pub fn new(shutdown_tx: mpsc::Sender<ShutdownRequest>) -> Self {
        let (invoke_tx, invoke_rx) = mpsc::channel(1);
        SandboxInteropServer {
            invoke_tx,
            invoke_rx: Arc::new(tokio::sync::Mutex::new(invoke_rx)),
            in_flight: Mutex::new(None),
            stored_init_error: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Supervisor side: offer the next invocation to the runtime.
    pub fn offer_invoke(&self, invoke: Invoke) -> Result<(), InteropError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.is_some() {
                return Err(InteropError::InvokeAlreadyPending);
            }
            *in_flight = Some(InFlightInvoke {
                request_id: invoke.request_id.clone(),
                result: None,
            });
        }
        if self.invoke_tx.try_send(invoke).is_err() {
            self.in_flight.lock().unwrap().take();
            return Err(InteropError::InvokeAlreadyPending);
        }
        Ok(())
    }

    /// Supervisor side: collect the delivered result once the invoke flow
    /// released. Clears the in-flight slot.
    pub fn take_result(&self, invoke_id: &str) -> Option<InvokeResult> {
        let mut in_flight = self.in_flight.lock().unwrap();
        match in_flight.as_ref() {
            Some(entry) if entry.request_id == invoke_id && entry.result.is_some() => {
                in_flight.take().and_then(|entry| entry.result)
            }
            _ => None,
        }
    }

    /// Supervisor side: drop an in-flight invocation during reset or
    /// shutdown.
    pub fn abort_in_flight(&self) {
        self.in_flight.lock().unwrap().take();
        if let Ok(mut rx) = self.invoke_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }

    pub fn stored_init_error(&self) -> Option<ErrorInvokeResponse> {
        self.stored_init_error.lock().unwrap().clone()
    }
}

#[async_trait]
impl InteropServer for SandboxInteropServer {
    async fn next_invoke(&self) -> Result<Invoke, InteropError> {
        let rx = Arc::clone(&self.invoke_rx);
        let mut rx = rx.lock().await;
        rx.recv().await.ok_or(InteropError::SandboxShuttingDown)
    }

    fn send_response(
        &self,
        invoke_id: &str,
        headers: InvokeResponseHeaders,
        payload: Vec<u8>,
    ) -> Result<(), InteropError> {
        self.store_result(invoke_id, InvokeResult::Response { headers, payload })
    }

    fn send_error_response(
        &self,
        invoke_id: &str,
        response: ErrorInvokeResponse,
    ) -> Result<(), InteropError> {
        self.store_result(invoke_id, InvokeResult::Error(response))
    }

    fn send_init_error_response(&self, response: ErrorInvokeResponse) -> Result<(), InteropError> {
        let mut stored = self.stored_init_error.lock().unwrap();
        if stored.is_none() {
            *stored = Some(response);
        }
        Ok(())
    }

    async fn shutdown(&self, shutdown: Shutdown) -> Result<InternalState, InteropError> {
        let (done, snapshot) = oneshot::channel();
        self.shutdown_tx
            .send(ShutdownRequest { shutdown, done })
            .await
            .map_err(|_| InteropError::SandboxShuttingDown)?;
        snapshot.await.map_err(|_| InteropError::SandboxShuttingDown)
    }
}

impl SandboxInteropServer {
    fn store_result(&self, invoke_id: &str, result: InvokeResult) -> Result<(), InteropError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        let entry = in_flight.as_mut().ok_or(InteropError::NoPendingInvoke)?;
        if entry.request_id != invoke_id {
            return Err(InteropError::InvokeIdMismatch {
                expected: entry.request_id.clone(),
                got: invoke_id.to_owned(),
            });
        }
        if entry.result.is_some() {
            return Err(InteropError::ResponseAlreadySent);
        }
        entry.result = Some(result);
        Ok(())
    }
}

/// Error payloads with valid JSON keep their content type; anything else
/// is delivered as an opaque blob.
pub fn json_content_type(body: &[u8]) -> &'static str {
    if serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok() {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

//UNIT TEST CASES
#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SandboxInteropServer {
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        SandboxInteropServer::new(shutdown_tx)
    }

    fn invoke(id: &str) -> Invoke {
        Invoke {
            request_id: id.to_owned(),
            invoked_function_arn: "arn:aws:lambda:us-east-1:012345678912:function:emulated"
                .to_owned(),
            deadline_ms: 300_000,
            trace_id: "Root=1-00000000-000000000000000000000000".to_owned(),
            payload: b"{}".to_vec(),
            content_type: "application/json".to_owned(),
        }
    }

    #[test]
    fn test_json_content_type_sniffing() {
        assert_eq!(json_content_type(b"{\"ok\":true}"), "application/json");
        assert_eq!(json_content_type(b"\"plain string\""), "application/json");
        assert_eq!(json_content_type(b"not json"), "application/octet-stream");
        assert_eq!(json_content_type(b""), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_offer_then_next_invoke() {
        let server = server();
        server.offer_invoke(invoke("req-1")).unwrap();
        let delivered = server.next_invoke().await.unwrap();
        assert_eq!(delivered.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_single_invoke_in_flight() {
        let server = server();
        server.offer_invoke(invoke("req-1")).unwrap();
        assert_eq!(
            server.offer_invoke(invoke("req-2")),
            Err(InteropError::InvokeAlreadyPending)
        );
    }

    #[test]
    fn test_response_requires_pending_invoke() {
        let server = server();
        let headers = InvokeResponseHeaders {
            content_type: "application/json".to_owned(),
        };
        assert_eq!(
            server.send_response("req-1", headers, b"{}".to_vec()),
            Err(InteropError::NoPendingInvoke)
        );
    }

    #[test]
    fn test_response_id_must_match() {
        let server = server();
        server.offer_invoke(invoke("req-1")).unwrap();
        let headers = InvokeResponseHeaders {
            content_type: "application/json".to_owned(),
        };
        assert_eq!(
            server.send_response("req-2", headers, b"{}".to_vec()),
            Err(InteropError::InvokeIdMismatch {
                expected: "req-1".to_owned(),
                got: "req-2".to_owned(),
            })
        );
    }

    #[test]
    fn test_second_response_rejected_and_result_taken_once() {
        let server = server();
        server.offer_invoke(invoke("req-1")).unwrap();
        let headers = InvokeResponseHeaders {
            content_type: "application/json".to_owned(),
        };
        server
            .send_response("req-1", headers.clone(), b"{}".to_vec())
            .unwrap();
        assert_eq!(
            server.send_response("req-1", headers, b"{}".to_vec()),
            Err(InteropError::ResponseAlreadySent)
        );

        assert!(server.take_result("req-1").is_some());
        assert!(server.take_result("req-1").is_none());
    }

    #[test]
    fn test_first_init_error_wins() {
        let server = server();
        let first = ErrorInvokeResponse {
            headers: InvokeResponseHeaders {
                content_type: "application/json".to_owned(),
            },
            function_error: FunctionError {
                error_type: "Runtime.ExitError".to_owned(),
                error_message: "exit 1".to_owned(),
            },
            payload: Vec::new(),
        };
        let mut second = first.clone();
        second.function_error.error_type = "Runtime.Unknown".to_owned();

        server.send_init_error_response(first).unwrap();
        server.send_init_error_response(second).unwrap();

        assert_eq!(
            server.stored_init_error().unwrap().function_error.error_type,
            "Runtime.ExitError"
        );
    }
}
