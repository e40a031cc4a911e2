/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Transition tables for the runtime and agent lifecycles.
//!
//! Both machines are table driven: every legal transition is one row of
//! `(current state, event, next state)`, and the lookup is the single place
//! that decides legality. An entity is mutated only after the lookup
//! succeeds, so an illegal request leaves it untouched.

use thiserror::Error;

/// Error returned for a transition request with no matching table row.
///
/// Carries the printable names of the current state and the attempted
/// target so handlers can render the failure without re-deriving them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("transition from {current} to {target} is not allowed")]
    InvalidTransition {
        current: &'static str,
        target: &'static str,
    },
}

/// Lifecycle states of the function runtime (one per sandbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    Starting,
    Initializing,
    Ready,
    Invoking,
    InvocationResponse,
    InvocationErrorResponse,
    ResponseSent,
    InitError,
    Restoring,
    RestoreReady,
    RestoreError,
    Exited,
}

impl RuntimeState {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeState::Starting => "RuntimeStartingState",
            RuntimeState::Initializing => "RuntimeInitializingState",
            RuntimeState::Ready => "RuntimeReadyState",
            RuntimeState::Invoking => "RuntimeInvokingState",
            RuntimeState::InvocationResponse => "RuntimeInvocationResponseState",
            RuntimeState::InvocationErrorResponse => "RuntimeInvocationErrorResponseState",
            RuntimeState::ResponseSent => "RuntimeResponseSentState",
            RuntimeState::InitError => "RuntimeInitErrorState",
            RuntimeState::Restoring => "RuntimeRestoringState",
            RuntimeState::RestoreReady => "RuntimeRestoreReadyState",
            RuntimeState::RestoreError => "RuntimeRestoreErrorState",
            RuntimeState::Exited => "RuntimeExitedState",
        }
    }

    /// Terminal states accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeState::InitError | RuntimeState::RestoreError | RuntimeState::Exited
        )
    }
}

/// Triggers of runtime transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    Started,
    InitCompleted,
    InitErrorReported,
    InvokeDispatched,
    ResponseReceived,
    ErrorResponseReceived,
    ResponseDelivered,
    ReadyAgain,
    RestoreStarted,
    RestoreCompleted,
    RestoreErrorReported,
    Exited,
}

impl RuntimeEvent {
    /// The state this event drives toward, used in failure messages.
    pub fn target(&self) -> RuntimeState {
        match self {
            RuntimeEvent::Started => RuntimeState::Initializing,
            RuntimeEvent::InitCompleted => RuntimeState::Ready,
            RuntimeEvent::InitErrorReported => RuntimeState::InitError,
            RuntimeEvent::InvokeDispatched => RuntimeState::Invoking,
            RuntimeEvent::ResponseReceived => RuntimeState::InvocationResponse,
            RuntimeEvent::ErrorResponseReceived => RuntimeState::InvocationErrorResponse,
            RuntimeEvent::ResponseDelivered => RuntimeState::ResponseSent,
            RuntimeEvent::ReadyAgain => RuntimeState::Ready,
            RuntimeEvent::RestoreStarted => RuntimeState::Restoring,
            RuntimeEvent::RestoreCompleted => RuntimeState::RestoreReady,
            RuntimeEvent::RestoreErrorReported => RuntimeState::RestoreError,
            RuntimeEvent::Exited => RuntimeState::Exited,
        }
    }
}

const RUNTIME_TRANSITIONS: &[(RuntimeState, RuntimeEvent, RuntimeState)] = &[
    (
        RuntimeState::Starting,
        RuntimeEvent::Started,
        RuntimeState::Initializing,
    ),
    (
        RuntimeState::Initializing,
        RuntimeEvent::InitCompleted,
        RuntimeState::Ready,
    ),
    (
        RuntimeState::Initializing,
        RuntimeEvent::InitErrorReported,
        RuntimeState::InitError,
    ),
    (
        RuntimeState::Ready,
        RuntimeEvent::InvokeDispatched,
        RuntimeState::Invoking,
    ),
    (
        RuntimeState::Invoking,
        RuntimeEvent::ResponseReceived,
        RuntimeState::InvocationResponse,
    ),
    (
        RuntimeState::Invoking,
        RuntimeEvent::ErrorResponseReceived,
        RuntimeState::InvocationErrorResponse,
    ),
    (
        RuntimeState::InvocationResponse,
        RuntimeEvent::ResponseDelivered,
        RuntimeState::ResponseSent,
    ),
    (
        RuntimeState::InvocationErrorResponse,
        RuntimeEvent::ResponseDelivered,
        RuntimeState::ResponseSent,
    ),
    (
        RuntimeState::ResponseSent,
        RuntimeEvent::ReadyAgain,
        RuntimeState::Ready,
    ),
    (
        RuntimeState::Ready,
        RuntimeEvent::RestoreStarted,
        RuntimeState::Restoring,
    ),
    (
        RuntimeState::Restoring,
        RuntimeEvent::RestoreCompleted,
        RuntimeState::RestoreReady,
    ),
    (
        RuntimeState::Restoring,
        RuntimeEvent::RestoreErrorReported,
        RuntimeState::RestoreError,
    ),
    (
        RuntimeState::RestoreReady,
        RuntimeEvent::ReadyAgain,
        RuntimeState::Ready,
    ),
];

/// Look up the runtime transition for `event` from `current`.
///
/// `Exited` is legal from every non-terminal state; everything else must
/// have an explicit row.
pub fn next_runtime_state(
    current: RuntimeState,
    event: RuntimeEvent,
) -> Result<RuntimeState, StateError> {
    if event == RuntimeEvent::Exited && !current.is_terminal() {
        return Ok(RuntimeState::Exited);
    }

    RUNTIME_TRANSITIONS
        .iter()
        .find(|(from, ev, _)| *from == current && *ev == event)
        .map(|(_, _, to)| *to)
        .ok_or(StateError::InvalidTransition {
            current: current.name(),
            target: event.target().name(),
        })
}

/// Lifecycle states of an extension agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Starting,
    Registered,
    Ready,
    Running,
    InitError,
    ExitError,
    Exited,
}

impl AgentState {
    pub fn name(&self) -> &'static str {
        match self {
            AgentState::Starting => "AgentStartingState",
            AgentState::Registered => "AgentRegisteredState",
            AgentState::Ready => "AgentReadyState",
            AgentState::Running => "AgentRunningState",
            AgentState::InitError => "AgentInitErrorState",
            AgentState::ExitError => "AgentExitErrorState",
            AgentState::Exited => "AgentExitedState",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentState::InitError | AgentState::ExitError | AgentState::Exited
        )
    }
}

/// Triggers of agent transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    Register,
    InitErrorReported,
    ReadyForEvents,
    EventDispatched,
    EventProcessed,
    ExitErrorReported,
    Exited,
}

impl AgentEvent {
    pub fn target(&self) -> AgentState {
        match self {
            AgentEvent::Register => AgentState::Registered,
            AgentEvent::InitErrorReported => AgentState::InitError,
            AgentEvent::ReadyForEvents => AgentState::Ready,
            AgentEvent::EventDispatched => AgentState::Running,
            AgentEvent::EventProcessed => AgentState::Ready,
            AgentEvent::ExitErrorReported => AgentState::ExitError,
            AgentEvent::Exited => AgentState::Exited,
        }
    }
}

const AGENT_TRANSITIONS: &[(AgentState, AgentEvent, AgentState)] = &[
    (
        AgentState::Starting,
        AgentEvent::Register,
        AgentState::Registered,
    ),
    (
        AgentState::Registered,
        AgentEvent::InitErrorReported,
        AgentState::InitError,
    ),
    (
        AgentState::Registered,
        AgentEvent::ReadyForEvents,
        AgentState::Ready,
    ),
    (
        AgentState::Ready,
        AgentEvent::EventDispatched,
        AgentState::Running,
    ),
    (
        AgentState::Running,
        AgentEvent::EventProcessed,
        AgentState::Ready,
    ),
];

/// Look up the agent transition for `event` from `current`.
///
/// `ExitErrorReported` and `Exited` are legal from every non-terminal
/// state.
pub fn next_agent_state(current: AgentState, event: AgentEvent) -> Result<AgentState, StateError> {
    if !current.is_terminal() {
        match event {
            AgentEvent::ExitErrorReported => return Ok(AgentState::ExitError),
            AgentEvent::Exited => return Ok(AgentState::Exited),
            _ => {}
        }
    }

    AGENT_TRANSITIONS
        .iter()
        .find(|(from, ev, _)| *from == current && *ev == event)
        .map(|(_, _, to)| *to)
        .ok_or(StateError::InvalidTransition {
            current: current.name(),
            target: event.target().name(),
        })
}
