/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Registration service: creates, names and looks up the runtime and all
//! agents, and authorizes every state transition.
//!
//! The service is the single writer. Everything it owns sits behind one
//! mutex; the guard is a plain `std::sync` guard, so it cannot be held
//! across an await point. Flow barriers are signaled only after the lock
//! has been released.

use super::agent::{Agent, AgentKind, AgentView, EventKind, SandboxEvent};
use super::flow::{FlowError, InitFlowSynchronization, InvokeFlowSynchronization};
use super::runtime::Runtime;
use super::states::{AgentEvent, RuntimeEvent, RuntimeState, StateError};
use common::fatalerror::ErrorType;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Metadata of the emulated function, reported to registering agents.
#[derive(Debug, Clone, Default)]
pub struct FunctionMetadata {
    pub function_name: String,
    pub function_version: String,
    pub handler: String,
    pub function_arn: String,
    pub memory_size_mb: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("agent name must not be empty")]
    EmptyAgentName,
    #[error("agent name already registered: {0}")]
    DuplicateAgentName(String),
    #[error("unknown agent identifier: {0}")]
    UnknownAgent(Uuid),
    #[error("unknown event name: {0}")]
    InvalidEventName(String),
    #[error("runtime already registered for this sandbox")]
    RuntimeAlreadyRegistered,
    #[error("runtime not registered")]
    RuntimeNotRegistered,
    #[error(transparent)]
    State(#[from] StateError),
}

struct Inner {
    runtime: Option<Runtime>,
    agents: HashMap<Uuid, Agent>,
    names: HashMap<String, Uuid>,
    function_metadata: FunctionMetadata,
}

pub struct RegistrationService {
    inner: Mutex<Inner>,
    init_flow: Arc<InitFlowSynchronization>,
    invoke_flow: Arc<InvokeFlowSynchronization>,
}

impl RegistrationService {
    pub fn new(
        init_flow: Arc<InitFlowSynchronization>,
        invoke_flow: Arc<InvokeFlowSynchronization>,
    ) -> Self {
        RegistrationService {
            inner: Mutex::new(Inner {
                runtime: None,
                agents: HashMap::new(),
                names: HashMap::new(),
                function_metadata: FunctionMetadata::default(),
            }),
            init_flow,
            invoke_flow,
        }
    }

    pub fn init_flow(&self) -> Arc<InitFlowSynchronization> {
        Arc::clone(&self.init_flow)
    }

    pub fn invoke_flow(&self) -> Arc<InvokeFlowSynchronization> {
        Arc::clone(&self.invoke_flow)
    }

    // ---- entity creation and lookup ----

    /// Create the runtime entity. At most one per sandbox.
    pub fn preregister_runtime(&self) -> Result<(), RegistrationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.runtime.is_some() {
            return Err(RegistrationError::RuntimeAlreadyRegistered);
        }
        inner.runtime = Some(Runtime::new());
        Ok(())
    }

    pub fn runtime_state(&self) -> Result<RuntimeState, RegistrationError> {
        let inner = self.inner.lock().unwrap();
        inner
            .runtime
            .as_ref()
            .map(|r| r.state())
            .ok_or(RegistrationError::RuntimeNotRegistered)
    }

    pub fn runtime_last_error(&self) -> Option<ErrorType> {
        let inner = self.inner.lock().unwrap();
        inner.runtime.as_ref().and_then(|r| r.last_error())
    }

    pub fn create_external_agent(&self, name: &str) -> Result<AgentView, RegistrationError> {
        self.create_agent(name, AgentKind::External, HashSet::new())
    }

    pub fn create_internal_agent(
        &self,
        name: &str,
        events: &[String],
    ) -> Result<AgentView, RegistrationError> {
        let subscriptions = parse_events(events)?;
        self.create_agent(name, AgentKind::Internal, subscriptions)
    }

    fn create_agent(
        &self,
        name: &str,
        kind: AgentKind,
        subscriptions: HashSet<EventKind>,
    ) -> Result<AgentView, RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyAgentName);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.names.contains_key(name) {
            return Err(RegistrationError::DuplicateAgentName(name.to_owned()));
        }
        let mut agent = Agent::new(name, kind);
        agent.set_subscriptions(subscriptions);
        let view = AgentView::from(&agent);
        inner.names.insert(name.to_owned(), agent.id());
        inner.agents.insert(agent.id(), agent);
        Ok(view)
    }

    pub fn find_agent_by_id(&self, id: Uuid) -> Option<AgentView> {
        let inner = self.inner.lock().unwrap();
        inner.agents.get(&id).map(AgentView::from)
    }

    pub fn find_external_agent_by_name(&self, name: &str) -> Option<AgentView> {
        let inner = self.inner.lock().unwrap();
        inner
            .names
            .get(name)
            .and_then(|id| inner.agents.get(id))
            .filter(|agent| agent.kind() == AgentKind::External)
            .map(AgentView::from)
    }

    pub fn count_agents(&self) -> usize {
        self.inner.lock().unwrap().agents.len()
    }

    pub fn agent_views(&self) -> Vec<AgentView> {
        let inner = self.inner.lock().unwrap();
        inner.agents.values().map(AgentView::from).collect()
    }

    /// Delivery handles of every agent subscribed to `kind`.
    pub fn event_senders_for(&self, kind: EventKind) -> Vec<(Uuid, mpsc::Sender<SandboxEvent>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .agents
            .values()
            .filter(|agent| agent.is_subscribed(kind))
            .map(|agent| (agent.id(), agent.event_sender()))
            .collect()
    }

    pub fn agent_event_receiver(
        &self,
        id: Uuid,
    ) -> Option<Arc<tokio::sync::Mutex<mpsc::Receiver<SandboxEvent>>>> {
        let inner = self.inner.lock().unwrap();
        inner.agents.get(&id).map(|agent| agent.event_receiver())
    }

    pub fn set_function_metadata(&self, metadata: FunctionMetadata) {
        self.inner.lock().unwrap().function_metadata = metadata;
    }

    pub fn get_function_metadata(&self) -> FunctionMetadata {
        self.inner.lock().unwrap().function_metadata.clone()
    }

    // ---- runtime transitions ----

    pub fn runtime_started(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::Started)?;
        Ok(())
    }

    /// Runtime reports readiness: completion of init, of a restore cycle,
    /// or of a previous invocation. Signals the init flow on first
    /// readiness.
    pub fn runtime_ready(&self) -> Result<(), RegistrationError> {
        let init_completed = {
            let mut inner = self.inner.lock().unwrap();
            let runtime = runtime_mut(&mut inner)?;
            let event = match runtime.state() {
                RuntimeState::ResponseSent | RuntimeState::RestoreReady => RuntimeEvent::ReadyAgain,
                _ => RuntimeEvent::InitCompleted,
            };
            runtime.apply(event)?;
            event == RuntimeEvent::InitCompleted
        };
        if init_completed {
            self.init_flow.runtime_ready();
        }
        Ok(())
    }

    pub fn runtime_invoke_dispatched(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::InvokeDispatched)
    }

    pub fn runtime_response(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::ResponseReceived)
    }

    pub fn runtime_error_response(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::ErrorResponseReceived)
    }

    /// The response left through the interop boundary; the invocation
    /// cycle may complete. Releases the invoke flow's runtime gate.
    pub fn runtime_response_sent(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::ResponseDelivered)?;
        self.invoke_flow.runtime_response();
        Ok(())
    }

    /// Runtime failed to initialize. Records the kind and cancels the init
    /// flow so no waiter hangs on a sandbox that will never come up.
    pub fn runtime_init_error(&self, kind: ErrorType) -> Result<(), RegistrationError> {
        {
            let mut inner = self.inner.lock().unwrap();
            runtime_mut(&mut inner)?.apply_fatal(RuntimeEvent::InitErrorReported, kind)?;
        }
        self.init_flow
            .cancel_with_error(FlowError::Fatal(kind));
        Ok(())
    }

    pub fn runtime_restore_started(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::RestoreStarted)
    }

    pub fn runtime_restore_completed(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::RestoreCompleted)?;
        self.init_flow.runtime_restore_ready();
        Ok(())
    }

    pub fn runtime_restore_error(&self, kind: ErrorType) -> Result<(), RegistrationError> {
        {
            let mut inner = self.inner.lock().unwrap();
            runtime_mut(&mut inner)?.apply_fatal(RuntimeEvent::RestoreErrorReported, kind)?;
        }
        self.init_flow
            .cancel_with_error(FlowError::Fatal(kind));
        Ok(())
    }

    pub fn runtime_exited(&self) -> Result<(), RegistrationError> {
        self.apply_runtime(RuntimeEvent::Exited)
    }

    fn apply_runtime(&self, event: RuntimeEvent) -> Result<(), RegistrationError> {
        let mut inner = self.inner.lock().unwrap();
        runtime_mut(&mut inner)?.apply(event)?;
        Ok(())
    }

    // ---- agent transitions ----

    /// Move an agent from `Starting` to `Registered`, freezing its
    /// subscription set. External registrations release the init flow's
    /// registration gate.
    pub fn register_agent(
        &self,
        id: Uuid,
        events: &[String],
    ) -> Result<AgentView, RegistrationError> {
        let subscriptions = parse_events(events)?;
        let view = {
            let mut inner = self.inner.lock().unwrap();
            let agent = agent_mut(&mut inner, id)?;
            agent.apply(AgentEvent::Register)?;
            agent.set_subscriptions(subscriptions);
            AgentView::from(&*agent)
        };
        if view.kind == AgentKind::External {
            self.init_flow.external_agent_registered(id);
        }
        Ok(view)
    }

    /// First `/event/next` call of an agent: it finished its own init and
    /// is ready for events. Releases its slot on the init flow.
    pub fn agent_ready_for_events(&self, id: Uuid) -> Result<(), RegistrationError> {
        self.apply_agent(id, AgentEvent::ReadyForEvents)?;
        self.init_flow.agent_ready(id);
        Ok(())
    }

    pub fn agent_event_dispatched(&self, id: Uuid) -> Result<(), RegistrationError> {
        self.apply_agent(id, AgentEvent::EventDispatched)
    }

    /// Agent came back for the next event: the previous one is processed.
    /// Releases its slot on the invoke flow.
    pub fn agent_event_processed(&self, id: Uuid) -> Result<(), RegistrationError> {
        self.apply_agent(id, AgentEvent::EventProcessed)?;
        self.invoke_flow.agent_ready_for_invoke(id);
        Ok(())
    }

    pub fn agent_init_error(&self, id: Uuid, kind: ErrorType) -> Result<(), RegistrationError> {
        {
            let mut inner = self.inner.lock().unwrap();
            agent_mut(&mut inner, id)?.apply_fatal(AgentEvent::InitErrorReported, kind)?;
        }
        self.init_flow
            .cancel_with_error(FlowError::Fatal(kind));
        Ok(())
    }

    pub fn agent_exit_error(&self, id: Uuid, kind: ErrorType) -> Result<(), RegistrationError> {
        {
            let mut inner = self.inner.lock().unwrap();
            agent_mut(&mut inner, id)?.apply_fatal(AgentEvent::ExitErrorReported, kind)?;
        }
        self.init_flow
            .cancel_with_error(FlowError::Fatal(kind));
        self.invoke_flow
            .cancel_with_error(FlowError::Fatal(kind));
        Ok(())
    }

    pub fn agent_exited(&self, id: Uuid) -> Result<(), RegistrationError> {
        self.apply_agent(id, AgentEvent::Exited)
    }

    fn apply_agent(&self, id: Uuid, event: AgentEvent) -> Result<(), RegistrationError> {
        let mut inner = self.inner.lock().unwrap();
        agent_mut(&mut inner, id)?.apply(event)?;
        Ok(())
    }
}

fn runtime_mut(inner: &mut Inner) -> Result<&mut Runtime, RegistrationError> {
    inner
        .runtime
        .as_mut()
        .ok_or(RegistrationError::RuntimeNotRegistered)
}

fn agent_mut(inner: &mut Inner, id: Uuid) -> Result<&mut Agent, RegistrationError> {
    inner
        .agents
        .get_mut(&id)
        .ok_or(RegistrationError::UnknownAgent(id))
}

fn parse_events(events: &[String]) -> Result<HashSet<EventKind>, RegistrationError> {
    events
        .iter()
        .map(|name| {
            EventKind::parse(name).ok_or_else(|| RegistrationError::InvalidEventName(name.clone()))
        })
        .collect()
}

//UNIT TEST CASES
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::states::AgentState;

    fn service() -> RegistrationService {
        RegistrationService::new(
            Arc::new(InitFlowSynchronization::new()),
            Arc::new(InvokeFlowSynchronization::new()),
        )
    }

    #[test]
    fn test_agent_names_are_unique() {
        let service = service();
        service.create_external_agent("watchdog").unwrap();
        assert_eq!(
            service.create_external_agent("watchdog"),
            Err(RegistrationError::DuplicateAgentName("watchdog".to_owned()))
        );
        // Internal agents share the same namespace.
        assert_eq!(
            service.create_internal_agent("watchdog", &[]),
            Err(RegistrationError::DuplicateAgentName("watchdog".to_owned()))
        );
    }

    #[test]
    fn test_empty_agent_name_rejected() {
        let service = service();
        assert_eq!(
            service.create_external_agent(""),
            Err(RegistrationError::EmptyAgentName)
        );
    }

    #[test]
    fn test_at_most_one_runtime() {
        let service = service();
        service.preregister_runtime().unwrap();
        assert_eq!(
            service.preregister_runtime(),
            Err(RegistrationError::RuntimeAlreadyRegistered)
        );
    }

    #[test]
    fn test_runtime_ops_require_preregistration() {
        let service = service();
        assert_eq!(
            service.runtime_started(),
            Err(RegistrationError::RuntimeNotRegistered)
        );
    }

    #[test]
    fn test_register_agent_freezes_subscriptions() {
        let service = service();
        let agent = service.create_external_agent("watchdog").unwrap();
        let view = service
            .register_agent(agent.id, &["INVOKE".to_owned()])
            .unwrap();
        assert_eq!(view.state, AgentState::Registered);
        assert!(view.subscriptions.contains(&EventKind::Invoke));
    }

    #[test]
    fn test_register_agent_rejects_unknown_event() {
        let service = service();
        let agent = service.create_external_agent("watchdog").unwrap();
        assert_eq!(
            service.register_agent(agent.id, &["REBOOT".to_owned()]),
            Err(RegistrationError::InvalidEventName("REBOOT".to_owned()))
        );
        // The failed registration must not have advanced the state.
        assert_eq!(
            service.find_agent_by_id(agent.id).unwrap().state,
            AgentState::Starting
        );
    }

    #[test]
    fn test_illegal_agent_transition_preserves_state() {
        let service = service();
        let agent = service.create_external_agent("watchdog").unwrap();
        let err = service
            .agent_init_error(agent.id, ErrorType::AgentInit)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::State(_)));
        assert_eq!(
            service.find_agent_by_id(agent.id).unwrap().state,
            AgentState::Starting
        );
    }

    #[test]
    fn test_find_external_agent_by_name_skips_internal() {
        let service = service();
        service
            .create_internal_agent("telemetry", &["INVOKE".to_owned()])
            .unwrap();
        assert!(service.find_external_agent_by_name("telemetry").is_none());

        service.create_external_agent("watchdog").unwrap();
        assert!(service.find_external_agent_by_name("watchdog").is_some());
        assert_eq!(service.count_agents(), 2);
    }

    #[tokio::test]
    async fn test_runtime_init_error_cancels_init_flow() {
        let service = service();
        service.preregister_runtime().unwrap();
        service.runtime_started().unwrap();
        service
            .runtime_init_error(ErrorType::InvalidEntrypoint)
            .unwrap();

        assert_eq!(
            service.runtime_state().unwrap(),
            crate::core::states::RuntimeState::InitError
        );
        assert_eq!(
            service.runtime_last_error(),
            Some(ErrorType::InvalidEntrypoint)
        );
        assert_eq!(
            service.init_flow().await_runtime_ready().await.unwrap_err(),
            FlowError::Fatal(ErrorType::InvalidEntrypoint)
        );
    }

    #[tokio::test]
    async fn test_full_runtime_invoke_transitions() {
        let service = service();
        service.preregister_runtime().unwrap();
        service.runtime_started().unwrap();
        service.runtime_ready().unwrap();
        service.runtime_invoke_dispatched().unwrap();
        service.runtime_response().unwrap();
        service.runtime_response_sent().unwrap();
        service.runtime_ready().unwrap();

        // The response-sent transition released the invoke flow gate.
        service
            .invoke_flow()
            .await_runtime_response()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_agent_ready_signals_init_flow() {
        let service = service();
        let agent = service.create_external_agent("watchdog").unwrap();
        service.init_flow().set_agents_ready_count(1).unwrap();

        service.register_agent(agent.id, &[]).unwrap();
        service.agent_ready_for_events(agent.id).unwrap();

        service.init_flow().await_agents_ready().await.unwrap();
    }
}
