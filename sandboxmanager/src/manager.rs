/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! SandboxManager: supervisor of the sandbox lifecycle.
//!
//! Owns the init cycle, serializes invocations end to end, applies the
//! idle reset timeout, and drives shutdown. Handlers reach it only
//! through channels; it reaches entities only through the registration
//! service.

use crate::appctx::ApplicationContext;
use crate::config::Config;
use crate::core::agent::{EventKind, SandboxEvent};
use crate::core::flow::{FlowError, InitFlowSynchronization, InvokeFlowSynchronization};
use crate::core::registration::{FunctionMetadata, RegistrationService};
use crate::interop::{
    EntitySnapshot, InternalState, Invoke, InvokeResult, SandboxInteropServer, ShutdownRequest,
};
use crate::route::{self, AppState};
use common::fatalerror::ErrorType;
use common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{info, warn};

const INVOKE_CHANNEL_CAPACITY: usize = 16;

/// One public invocation routed to the supervisor.
#[derive(Debug)]
pub struct InvokeRequest {
    pub invoke: Invoke,
    pub done: oneshot::Sender<InvokeOutcome>,
}

/// What the caller of the standalone invoke endpoint receives.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub function_error: Option<String>,
}

impl InvokeOutcome {
    fn fatal(kind: ErrorType) -> Self {
        let body = serde_json::json!({
            "errorType": kind.as_str(),
            "errorMessage": format!("sandbox cycle ended with a fatal error: {kind}"),
        });
        InvokeOutcome {
            payload: body.to_string().into_bytes(),
            content_type: "application/json".to_owned(),
            function_error: Some(kind.as_str().to_owned()),
        }
    }
}

/// Wire the whole sandbox together and run it until shutdown.
///
/// This is the daemon entry point below `main`: it assembles flows,
/// registration service, interop server and supervisor, then serves the
/// HTTP APIs alongside the supervisor loop.
pub async fn initialize() -> Result<()> {
    let init_flow = Arc::new(InitFlowSynchronization::new());
    let invoke_flow = Arc::new(InvokeFlowSynchronization::new());
    let registration = Arc::new(RegistrationService::new(
        Arc::clone(&init_flow),
        Arc::clone(&invoke_flow),
    ));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let interop = Arc::new(SandboxInteropServer::new(shutdown_tx));
    let appctx = ApplicationContext::new();
    appctx.store_interop_server(Arc::clone(&interop) as _);

    let (invoke_tx, invoke_rx) = mpsc::channel(INVOKE_CHANNEL_CAPACITY);
    let (signal_tx, signal_rx) = watch::channel(false);

    let manager = SandboxManager::new(
        Arc::clone(&registration),
        Arc::clone(&interop),
        appctx.clone(),
        invoke_rx,
        shutdown_rx,
        signal_tx,
    );
    manager.initialize()?;

    let state = AppState {
        registration,
        appctx,
        invoke_tx,
    };
    tokio::join!(
        manager.run(),
        route::launch_tcp_listener(state, signal_rx)
    );
    Ok(())
}

pub struct SandboxManager {
    registration: Arc<RegistrationService>,
    init_flow: Arc<InitFlowSynchronization>,
    invoke_flow: Arc<InvokeFlowSynchronization>,
    interop: Arc<SandboxInteropServer>,
    appctx: ApplicationContext,
    /// Receiver for public invocations from the standalone route
    rx_invoke: Arc<Mutex<mpsc::Receiver<InvokeRequest>>>,
    /// Receiver for the shutdown control request from the interop server
    rx_shutdown: Arc<Mutex<mpsc::Receiver<ShutdownRequest>>>,
    /// Releases the HTTP listener when the sandbox ends
    shutdown_signal: watch::Sender<bool>,
}

impl SandboxManager {
    pub fn new(
        registration: Arc<RegistrationService>,
        interop: Arc<SandboxInteropServer>,
        appctx: ApplicationContext,
        rx_invoke: mpsc::Receiver<InvokeRequest>,
        rx_shutdown: mpsc::Receiver<ShutdownRequest>,
        shutdown_signal: watch::Sender<bool>,
    ) -> Self {
        let init_flow = registration.init_flow();
        let invoke_flow = registration.invoke_flow();
        SandboxManager {
            registration,
            init_flow,
            invoke_flow,
            interop,
            appctx,
            rx_invoke: Arc::new(Mutex::new(rx_invoke)),
            rx_shutdown: Arc::new(Mutex::new(rx_shutdown)),
            shutdown_signal,
        }
    }

    /// Create the sandbox population: the runtime entity and the expected
    /// external agents, with the init flow sized to match.
    pub fn initialize(&self) -> Result<()> {
        let config = Config::get();
        self.registration.set_function_metadata(FunctionMetadata {
            function_name: config.sandbox.function.name.clone(),
            function_version: config.sandbox.function.version.clone(),
            handler: config.sandbox.function.handler.clone(),
            function_arn: config.function_arn(),
            memory_size_mb: config.sandbox.function.memory_size_mb,
        });

        self.registration.preregister_runtime()?;
        for name in &config.sandbox.external_agents {
            self.registration.create_external_agent(name)?;
        }
        self.init_flow
            .set_external_agents_count(config.sandbox.external_agents.len())?;
        self.registration.runtime_started()?;
        info!(
            external_agents = config.sandbox.external_agents.len(),
            "sandbox populated"
        );
        Ok(())
    }

    /// Run the supervisor until shutdown.
    ///
    /// The init rendezvous runs as its own worker so control requests
    /// (shutdown, reset) are served even while the sandbox is still
    /// coming up.
    pub async fn run(self) {
        {
            let init_flow = Arc::clone(&self.init_flow);
            let registration = Arc::clone(&self.registration);
            let appctx = self.appctx.clone();
            tokio::spawn(async move {
                match Self::run_init_cycle(&init_flow, &registration).await {
                    Ok(()) => info!("sandbox init cycle complete"),
                    Err(error) => {
                        if let FlowError::Fatal(kind) = &error {
                            appctx.store_first_fatal_error(*kind);
                        }
                        warn!(%error, "sandbox init cycle failed");
                    }
                }
            });
        }

        let reset_timeout = Duration::from_millis(Config::get().sandbox.invoke_reset_timeout_ms);
        loop {
            let request = {
                let mut rx_invoke = self.rx_invoke.lock().await;
                let mut rx_shutdown = self.rx_shutdown.lock().await;
                tokio::select! {
                    request = rx_invoke.recv() => match request {
                        Some(request) => Either::Invoke(request),
                        None => break,
                    },
                    request = rx_shutdown.recv() => match request {
                        Some(request) => Either::Shutdown(request),
                        None => break,
                    },
                    _ = tokio::time::sleep(reset_timeout) => Either::IdleReset,
                }
            };
            match request {
                Either::Invoke(request) => self.handle_invoke(request).await,
                Either::Shutdown(request) => {
                    self.handle_shutdown(request).await;
                    break;
                }
                Either::IdleReset => self.reset_idle(),
            }
        }
        info!("sandbox supervisor stopped");
    }

    /// Init rendezvous: external agents register, all agents become
    /// ready, the runtime becomes ready. Any participant's fatal error
    /// releases every wait.
    async fn run_init_cycle(
        init_flow: &InitFlowSynchronization,
        registration: &RegistrationService,
    ) -> std::result::Result<(), FlowError> {
        init_flow.await_external_agents_registered().await?;
        init_flow.set_agents_ready_count(registration.count_agents())?;
        init_flow.await_agents_ready().await?;
        init_flow.await_runtime_ready().await?;
        Ok(())
    }

    /// One serialized invocation cycle.
    async fn handle_invoke(&self, request: InvokeRequest) {
        let InvokeRequest { invoke, done } = request;

        // A sandbox that never came up replays its init error to every
        // caller.
        if let Some(stored) = self.interop.stored_init_error() {
            let outcome = InvokeOutcome {
                payload: stored.payload.clone(),
                content_type: stored.headers.content_type.clone(),
                function_error: Some(stored.function_error.error_type.clone()),
            };
            let _ = done.send(outcome);
            return;
        }
        if let Some(kind) = self.appctx.load_first_fatal_error() {
            let _ = done.send(InvokeOutcome::fatal(kind));
            return;
        }

        let request_id = invoke.request_id.clone();
        let subscribers = self.registration.event_senders_for(EventKind::Invoke);

        if self
            .invoke_flow
            .set_agents_ready_count(subscribers.len())
            .is_err()
        {
            // A previous cycle was aborted mid-flight; start clean.
            if let Err(error) = self.invoke_flow.clear() {
                warn!(%error, "invoke flow stuck, cannot start cycle");
                let _ = done.send(InvokeOutcome::fatal(ErrorType::RuntimeUnknown));
                return;
            }
            let _ = self.invoke_flow.set_agents_ready_count(subscribers.len());
        }

        let event = SandboxEvent::Invoke {
            request_id: request_id.clone(),
            deadline_ms: invoke.deadline_ms,
            invoked_function_arn: invoke.invoked_function_arn.clone(),
            trace_id: invoke.trace_id.clone(),
        };
        for (agent_id, sender) in &subscribers {
            if sender.send(event.clone()).await.is_err() {
                warn!(%agent_id, "agent event channel closed");
            }
        }

        if let Err(error) = self.interop.offer_invoke(invoke) {
            warn!(%error, "could not offer invocation to the runtime");
            let _ = done.send(InvokeOutcome::fatal(ErrorType::RuntimeUnknown));
            return;
        }

        let outcome = match self.invoke_flow.await_runtime_response().await {
            Ok(()) => match self.interop.take_result(&request_id) {
                Some(InvokeResult::Response { headers, payload }) => InvokeOutcome {
                    payload,
                    content_type: headers.content_type,
                    function_error: None,
                },
                Some(InvokeResult::Error(response)) => InvokeOutcome {
                    payload: response.payload,
                    content_type: response.headers.content_type,
                    function_error: Some(response.function_error.error_type),
                },
                None => {
                    warn!(%request_id, "runtime response gate released without a result");
                    InvokeOutcome::fatal(ErrorType::InvalidResponseFormat)
                }
            },
            Err(error) => {
                if let FlowError::Fatal(kind) = &error {
                    self.appctx.store_first_fatal_error(*kind);
                }
                warn!(%error, %request_id, "invocation cycle aborted");
                self.interop.abort_in_flight();
                match error {
                    FlowError::Fatal(kind) => InvokeOutcome::fatal(kind),
                    _ => InvokeOutcome::fatal(ErrorType::RuntimeUnknown),
                }
            }
        };

        if let Err(error) = self.invoke_flow.await_agents_ready().await {
            warn!(%error, %request_id, "agents did not acknowledge the invocation");
        }

        if let Err(error) = self.invoke_flow.clear() {
            warn!(%error, "invoke flow not cleared at cycle end");
        }
        let _ = done.send(outcome);
    }

    /// Idle past the reset timeout: drop any half-finished cycle.
    fn reset_idle(&self) {
        info!("idle reset timeout reached, resetting invoke flow");
        self.interop.abort_in_flight();
        self.invoke_flow
            .cancel_with_error(FlowError::Canceled("sandbox idle reset".to_owned()));
        if self.invoke_flow.clear().is_err() {
            warn!("invoke flow has blocked waiters during idle reset");
        }
    }

    /// Drive shutdown: notify subscribed agents, give them until the
    /// deadline, then cancel all waiters and snapshot the final state.
    async fn handle_shutdown(&self, request: ShutdownRequest) {
        let deadline_ns = request.shutdown.deadline_ns;
        let now_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(deadline_ns);
        let grace = Duration::from_nanos(deadline_ns.saturating_sub(now_ns).max(0) as u64);
        info!(grace_ms = grace.as_millis() as u64, "sandbox shutting down");

        let event = SandboxEvent::Shutdown {
            shutdown_reason: "spindown".to_owned(),
            deadline_ms: deadline_ns / 1_000_000,
        };
        let subscribers = self.registration.event_senders_for(EventKind::Shutdown);
        for (agent_id, sender) in &subscribers {
            if sender.send(event.clone()).await.is_err() {
                warn!(%agent_id, "agent event channel closed during shutdown");
            }
        }

        let _ = tokio::time::timeout(grace, self.await_agents_exited()).await;

        self.init_flow
            .cancel_with_error(FlowError::SandboxShuttingDown);
        self.invoke_flow
            .cancel_with_error(FlowError::SandboxShuttingDown);
        self.interop.abort_in_flight();

        let _ = self.registration.runtime_exited();
        for agent in self.registration.agent_views() {
            if !agent.state.is_terminal() {
                let _ = self.registration.agent_exited(agent.id);
            }
        }

        let _ = request.done.send(self.internal_state_snapshot());
        let _ = self.shutdown_signal.send(true);
    }

    async fn await_agents_exited(&self) {
        loop {
            let all_final = self
                .registration
                .agent_views()
                .iter()
                .all(|agent| agent.state.is_terminal());
            if all_final {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn internal_state_snapshot(&self) -> InternalState {
        let runtime = self
            .registration
            .runtime_state()
            .ok()
            .map(|state| EntitySnapshot {
                name: "runtime".to_owned(),
                state: state.name(),
                last_error: self.registration.runtime_last_error(),
            });
        let agents = self
            .registration
            .agent_views()
            .into_iter()
            .map(|agent| EntitySnapshot {
                name: agent.name,
                state: agent.state.name(),
                last_error: agent.last_error,
            })
            .collect();
        InternalState {
            runtime,
            agents,
            first_fatal_error: self.appctx.load_first_fatal_error(),
        }
    }
}

enum Either {
    Invoke(InvokeRequest),
    Shutdown(ShutdownRequest),
    IdleReset,
}
