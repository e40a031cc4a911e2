/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Agent entities and the events delivered to them.
//!
//! Each agent carries a private delivery channel. The sender side is used
//! by the supervisor to fan out lifecycle events; the receiver side is
//! handed to the long-polling handler as a shared handle so it can be
//! awaited after the registry lock has been released.

use super::states::{next_agent_state, AgentEvent, AgentState, StateError};
use common::fatalerror::ErrorType;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    External,
    Internal,
}

/// Lifecycle event kinds an agent may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Invoke,
    Shutdown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Invoke => "INVOKE",
            EventKind::Shutdown => "SHUTDOWN",
        }
    }

    pub fn parse(value: &str) -> Option<EventKind> {
        match value {
            "INVOKE" => Some(EventKind::Invoke),
            "SHUTDOWN" => Some(EventKind::Shutdown),
            _ => None,
        }
    }
}

/// An event delivered to an agent through its channel.
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    Invoke {
        request_id: String,
        deadline_ms: i64,
        invoked_function_arn: String,
        trace_id: String,
    },
    Shutdown {
        shutdown_reason: String,
        deadline_ms: i64,
    },
}

#[derive(Debug)]
pub struct Agent {
    id: Uuid,
    name: String,
    kind: AgentKind,
    state: AgentState,
    subscriptions: HashSet<EventKind>,
    last_error: Option<ErrorType>,
    event_tx: mpsc::Sender<SandboxEvent>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SandboxEvent>>>,
}

impl Agent {
    pub fn new(name: &str, kind: AgentKind) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Agent {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            kind,
            state: AgentState::Starting,
            subscriptions: HashSet::new(),
            last_error: None,
            event_tx,
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn last_error(&self) -> Option<ErrorType> {
        self.last_error
    }

    pub fn subscriptions(&self) -> &HashSet<EventKind> {
        &self.subscriptions
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.subscriptions.contains(&kind)
    }

    /// Subscriptions freeze once the agent leaves `Registered`; the
    /// registration service only calls this while registering.
    pub(crate) fn set_subscriptions(&mut self, events: HashSet<EventKind>) {
        self.subscriptions = events;
    }

    pub(crate) fn apply(&mut self, event: AgentEvent) -> Result<(), StateError> {
        self.state = next_agent_state(self.state, event)?;
        Ok(())
    }

    pub(crate) fn apply_fatal(
        &mut self,
        event: AgentEvent,
        kind: ErrorType,
    ) -> Result<(), StateError> {
        self.apply(event)?;
        self.last_error = Some(kind);
        Ok(())
    }

    pub fn event_sender(&self) -> mpsc::Sender<SandboxEvent> {
        self.event_tx.clone()
    }

    pub fn event_receiver(&self) -> Arc<tokio::sync::Mutex<mpsc::Receiver<SandboxEvent>>> {
        Arc::clone(&self.event_rx)
    }
}

/// Read-only snapshot handed out by the registration service. Everything
/// outside the service works with these, never with the entity itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentView {
    pub id: Uuid,
    pub name: String,
    pub kind: AgentKind,
    pub state: AgentState,
    pub last_error: Option<ErrorType>,
    pub subscriptions: Vec<EventKind>,
}

impl From<&Agent> for AgentView {
    fn from(agent: &Agent) -> Self {
        AgentView {
            id: agent.id,
            name: agent.name.clone(),
            kind: agent.kind,
            state: agent.state,
            last_error: agent.last_error,
            subscriptions: agent.subscriptions.iter().copied().collect(),
        }
    }
}
