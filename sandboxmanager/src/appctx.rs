/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Application context shared between handlers and the supervisor.
//!
//! Carries the interop server handle, the write-once first-fatal-error
//! slot, and the trace data recorded alongside error responses. Handed to
//! handlers explicitly through router state, never through any ambient
//! mechanism.

use crate::interop::InteropServer;
use common::fatalerror::ErrorType;
use std::sync::{Arc, Mutex, OnceLock};

/// Trace details recorded when an error response passes through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeErrorTraceData {
    pub error_cause: Option<String>,
}

#[derive(Default)]
struct AppCtxInner {
    interop: Mutex<Option<Arc<dyn InteropServer>>>,
    first_fatal_error: OnceLock<ErrorType>,
    invoke_error_trace_data: Mutex<Option<InvokeErrorTraceData>>,
}

#[derive(Clone, Default)]
pub struct ApplicationContext {
    inner: Arc<AppCtxInner>,
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_interop_server(&self, server: Arc<dyn InteropServer>) {
        *self.inner.interop.lock().unwrap() = Some(server);
    }

    /// `None` means the sandbox wiring is broken; handlers answer 500.
    pub fn load_interop_server(&self) -> Option<Arc<dyn InteropServer>> {
        self.inner.interop.lock().unwrap().clone()
    }

    /// Record the first fatal error of the sandbox. Later calls are
    /// no-ops on the slot.
    pub fn store_first_fatal_error(&self, kind: ErrorType) {
        let _ = self.inner.first_fatal_error.set(kind);
    }

    /// The originally recorded fatal error, regardless of how many were
    /// reported afterwards.
    pub fn load_first_fatal_error(&self) -> Option<ErrorType> {
        self.inner.first_fatal_error.get().copied()
    }

    pub fn store_invoke_error_trace_data(&self, data: InvokeErrorTraceData) {
        *self.inner.invoke_error_trace_data.lock().unwrap() = Some(data);
    }

    pub fn load_invoke_error_trace_data(&self) -> Option<InvokeErrorTraceData> {
        self.inner.invoke_error_trace_data.lock().unwrap().clone()
    }
}

//UNIT TEST CASES
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fatal_error_is_write_once() {
        let appctx = ApplicationContext::new();
        assert_eq!(appctx.load_first_fatal_error(), None);

        appctx.store_first_fatal_error(ErrorType::AgentInit);
        appctx.store_first_fatal_error(ErrorType::RuntimeExit);

        assert_eq!(appctx.load_first_fatal_error(), Some(ErrorType::AgentInit));
    }

    #[test]
    fn test_interop_server_missing_by_default() {
        let appctx = ApplicationContext::new();
        assert!(appctx.load_interop_server().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let appctx = ApplicationContext::new();
        let clone = appctx.clone();
        clone.store_first_fatal_error(ErrorType::AgentExit);
        assert_eq!(appctx.load_first_fatal_error(), Some(ErrorType::AgentExit));
    }

    #[test]
    fn test_trace_data_round_trip() {
        let appctx = ApplicationContext::new();
        assert_eq!(appctx.load_invoke_error_trace_data(), None);

        appctx.store_invoke_error_trace_data(InvokeErrorTraceData::default());
        assert_eq!(
            appctx.load_invoke_error_trace_data(),
            Some(InvokeErrorTraceData::default())
        );
    }
}
