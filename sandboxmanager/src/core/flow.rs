/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Rendezvous barriers coordinating the init and invoke phases.
//!
//! A [`Gate`] releases its waiters when the expected participant count has
//! arrived *or* when an error is recorded, whichever comes first. Arrivals
//! are level triggered: a signal emitted before the corresponding wait is
//! not lost. Waiting is async; the protected state lives behind a plain
//! mutex whose guard never crosses an await point.

use common::fatalerror::ErrorType;
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

/// Participant id used by the runtime on gates it shares with agents.
pub const RUNTIME_PARTICIPANT: Uuid = Uuid::nil();

/// Errors surfaced by gates and flows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("expected participant count already set for this cycle")]
    CountAlreadySet,
    #[error("gate cleared while waiters are still blocked")]
    ClearWithWaiters,
    #[error("fatal error reported: {0}")]
    Fatal(ErrorType),
    #[error("sandbox is shutting down")]
    SandboxShuttingDown,
    #[error("flow canceled: {0}")]
    Canceled(String),
}

#[derive(Default)]
struct GateState {
    expected: Option<usize>,
    arrived: HashSet<Uuid>,
    error: Option<FlowError>,
    waiters: usize,
}

impl GateState {
    fn released(&self) -> Option<Result<(), FlowError>> {
        if let Some(err) = &self.error {
            return Some(Err(err.clone()));
        }
        match self.expected {
            Some(expected) if self.arrived.len() >= expected => Some(Ok(())),
            _ => None,
        }
    }
}

/// Count-or-error rendezvous point.
pub struct Gate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Gate {
    pub fn new() -> Self {
        Gate {
            state: Mutex::new(GateState::default()),
            notify: Notify::new(),
        }
    }

    /// Declare the expected participant population. Once per cycle.
    pub fn set_expected(&self, count: usize) -> Result<(), FlowError> {
        let mut state = self.state.lock().unwrap();
        if state.expected.is_some() {
            return Err(FlowError::CountAlreadySet);
        }
        state.expected = Some(count);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Signal arrival of one participant. Idempotent per participant.
    pub fn walk_through(&self, participant: Uuid) {
        let mut state = self.state.lock().unwrap();
        state.arrived.insert(participant);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Record an error and release every current and future waiter with it.
    /// The first recorded error wins; later ones are dropped.
    pub fn cancel(&self, error: FlowError) {
        let mut state = self.state.lock().unwrap();
        if state.error.is_none() {
            state.error = Some(error);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wait until the gate releases: count reached or error recorded.
    pub async fn await_gate(&self) -> Result<(), FlowError> {
        self.state.lock().unwrap().waiters += 1;
        let _guard = WaiterGuard { gate: self };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before re-checking so a signal arriving
            // between the check and the await is not lost.
            notified.as_mut().enable();

            if let Some(result) = self.state.lock().unwrap().released() {
                return result;
            }

            notified.as_mut().await;
        }
    }

    /// Reset for the next cycle. Illegal while any waiter is blocked.
    pub fn clear(&self) -> Result<(), FlowError> {
        let mut state = self.state.lock().unwrap();
        if state.waiters > 0 {
            return Err(FlowError::ClearWithWaiters);
        }
        state.expected = None;
        state.arrived.clear();
        state.error = None;
        Ok(())
    }

    #[cfg(test)]
    fn arrived_count(&self) -> usize {
        self.state.lock().unwrap().arrived.len()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

struct WaiterGuard<'a> {
    gate: &'a Gate,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().unwrap().waiters -= 1;
    }
}

/// Barrier set for the init phase: external agent registration, agent
/// readiness, runtime readiness and runtime restore readiness.
pub struct InitFlowSynchronization {
    external_agents_gate: Gate,
    agents_ready_gate: Gate,
    runtime_ready_gate: Gate,
    runtime_restore_gate: Gate,
}

impl InitFlowSynchronization {
    pub fn new() -> Self {
        let flow = InitFlowSynchronization {
            external_agents_gate: Gate::new(),
            agents_ready_gate: Gate::new(),
            runtime_ready_gate: Gate::new(),
            runtime_restore_gate: Gate::new(),
        };
        flow.runtime_ready_gate
            .set_expected(1)
            .expect("fresh gate accepts expected count");
        flow.runtime_restore_gate
            .set_expected(1)
            .expect("fresh gate accepts expected count");
        flow
    }

    pub fn set_external_agents_count(&self, count: usize) -> Result<(), FlowError> {
        self.external_agents_gate.set_expected(count)
    }

    pub fn external_agent_registered(&self, id: Uuid) {
        self.external_agents_gate.walk_through(id);
    }

    pub async fn await_external_agents_registered(&self) -> Result<(), FlowError> {
        self.external_agents_gate.await_gate().await
    }

    pub fn set_agents_ready_count(&self, count: usize) -> Result<(), FlowError> {
        self.agents_ready_gate.set_expected(count)
    }

    pub fn agent_ready(&self, id: Uuid) {
        self.agents_ready_gate.walk_through(id);
    }

    pub async fn await_agents_ready(&self) -> Result<(), FlowError> {
        self.agents_ready_gate.await_gate().await
    }

    pub fn runtime_ready(&self) {
        self.runtime_ready_gate.walk_through(RUNTIME_PARTICIPANT);
    }

    pub async fn await_runtime_ready(&self) -> Result<(), FlowError> {
        self.runtime_ready_gate.await_gate().await
    }

    pub fn runtime_restore_ready(&self) {
        self.runtime_restore_gate.walk_through(RUNTIME_PARTICIPANT);
    }

    pub async fn await_runtime_restore_ready(&self) -> Result<(), FlowError> {
        self.runtime_restore_gate.await_gate().await
    }

    /// Abort the cycle: all gates release with the error.
    pub fn cancel_with_error(&self, error: FlowError) {
        self.external_agents_gate.cancel(error.clone());
        self.agents_ready_gate.cancel(error.clone());
        self.runtime_ready_gate.cancel(error.clone());
        self.runtime_restore_gate.cancel(error);
    }

    pub fn clear(&self) -> Result<(), FlowError> {
        self.external_agents_gate.clear()?;
        self.agents_ready_gate.clear()?;
        self.runtime_ready_gate.clear()?;
        self.runtime_restore_gate.clear()?;
        self.runtime_ready_gate.set_expected(1)?;
        self.runtime_restore_gate.set_expected(1)?;
        Ok(())
    }
}

impl Default for InitFlowSynchronization {
    fn default() -> Self {
        Self::new()
    }
}

/// Barrier set for one invocation: runtime response delivery and agent
/// acknowledgements.
pub struct InvokeFlowSynchronization {
    runtime_response_gate: Gate,
    agents_ready_gate: Gate,
}

impl InvokeFlowSynchronization {
    pub fn new() -> Self {
        let flow = InvokeFlowSynchronization {
            runtime_response_gate: Gate::new(),
            agents_ready_gate: Gate::new(),
        };
        flow.runtime_response_gate
            .set_expected(1)
            .expect("fresh gate accepts expected count");
        flow
    }

    /// Declare how many agents participate in this invocation cycle.
    pub fn set_agents_ready_count(&self, count: usize) -> Result<(), FlowError> {
        self.agents_ready_gate.set_expected(count)
    }

    pub fn agent_ready_for_invoke(&self, id: Uuid) {
        self.agents_ready_gate.walk_through(id);
    }

    pub async fn await_agents_ready(&self) -> Result<(), FlowError> {
        self.agents_ready_gate.await_gate().await
    }

    pub fn runtime_response(&self) {
        self.runtime_response_gate.walk_through(RUNTIME_PARTICIPANT);
    }

    pub async fn await_runtime_response(&self) -> Result<(), FlowError> {
        self.runtime_response_gate.await_gate().await
    }

    pub fn cancel_with_error(&self, error: FlowError) {
        self.runtime_response_gate.cancel(error.clone());
        self.agents_ready_gate.cancel(error);
    }

    pub fn clear(&self) -> Result<(), FlowError> {
        self.runtime_response_gate.clear()?;
        self.agents_ready_gate.clear()?;
        self.runtime_response_gate.set_expected(1)?;
        Ok(())
    }
}

impl Default for InvokeFlowSynchronization {
    fn default() -> Self {
        Self::new()
    }
}

//UNIT TEST CASES
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_releases_on_count() {
        let gate = Gate::new();
        gate.set_expected(2).unwrap();
        gate.walk_through(Uuid::new_v4());
        gate.walk_through(Uuid::new_v4());
        gate.await_gate().await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_signal_before_wait_is_not_lost() {
        let gate = Gate::new();
        gate.set_expected(1).unwrap();
        gate.walk_through(Uuid::new_v4());
        // The arrival happened before anyone waited; the wait must still
        // observe it.
        tokio::time::timeout(Duration::from_secs(1), gate.await_gate())
            .await
            .expect("gate must not block")
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_walk_through_is_idempotent_per_participant() {
        let gate = Gate::new();
        gate.set_expected(2).unwrap();
        let agent = Uuid::new_v4();
        gate.walk_through(agent);
        gate.walk_through(agent);
        assert_eq!(gate.arrived_count(), 1);

        gate.walk_through(Uuid::new_v4());
        gate.await_gate().await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_releases_waiter_on_late_arrivals() {
        let gate = Arc::new(Gate::new());
        gate.set_expected(1).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.await_gate().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.walk_through(Uuid::new_v4());

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_gate_cancel_unblocks_waiters_first_error_wins() {
        let gate = Arc::new(Gate::new());
        gate.set_expected(5).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.await_gate().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.cancel(FlowError::Fatal(ErrorType::AgentInit));
        gate.cancel(FlowError::SandboxShuttingDown);

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err, FlowError::Fatal(ErrorType::AgentInit));

        // Future waiters observe the same error without blocking.
        let err = gate.await_gate().await.unwrap_err();
        assert_eq!(err, FlowError::Fatal(ErrorType::AgentInit));
    }

    #[tokio::test]
    async fn test_gate_expected_count_set_once() {
        let gate = Gate::new();
        gate.set_expected(1).unwrap();
        assert_eq!(gate.set_expected(2), Err(FlowError::CountAlreadySet));
    }

    #[tokio::test]
    async fn test_gate_clear_resets_cycle() {
        let gate = Gate::new();
        gate.set_expected(1).unwrap();
        gate.walk_through(Uuid::new_v4());
        gate.await_gate().await.unwrap();

        gate.clear().unwrap();
        gate.set_expected(1).unwrap();
        assert_eq!(gate.arrived_count(), 0);
    }

    #[tokio::test]
    async fn test_gate_clear_with_blocked_waiter_fails() {
        let gate = Arc::new(Gate::new());
        gate.set_expected(1).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.await_gate().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(gate.clear(), Err(FlowError::ClearWithWaiters));

        gate.walk_through(Uuid::new_v4());
        waiter.await.unwrap().unwrap();
        gate.clear().unwrap();
    }

    #[tokio::test]
    async fn test_init_flow_full_rendezvous() {
        let flow = Arc::new(InitFlowSynchronization::new());
        flow.set_external_agents_count(1).unwrap();
        flow.set_agents_ready_count(2).unwrap();

        let supervisor = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move {
                flow.await_external_agents_registered().await?;
                flow.await_agents_ready().await?;
                flow.await_runtime_ready().await
            })
        };

        let external = Uuid::new_v4();
        let internal = Uuid::new_v4();
        flow.external_agent_registered(external);
        flow.agent_ready(external);
        flow.agent_ready(internal);
        flow.runtime_ready();

        supervisor.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_init_flow_cancel_releases_all_gates() {
        let flow = Arc::new(InitFlowSynchronization::new());
        flow.set_external_agents_count(3).unwrap();

        let waiter = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.await_runtime_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        flow.cancel_with_error(FlowError::Fatal(ErrorType::RuntimeExit));

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            FlowError::Fatal(ErrorType::RuntimeExit)
        );
        assert_eq!(
            flow.await_external_agents_registered().await.unwrap_err(),
            FlowError::Fatal(ErrorType::RuntimeExit)
        );
    }

    #[tokio::test]
    async fn test_invoke_flow_cycle_and_clear() {
        let flow = InvokeFlowSynchronization::new();
        flow.set_agents_ready_count(1).unwrap();

        let agent = Uuid::new_v4();
        flow.runtime_response();
        flow.agent_ready_for_invoke(agent);

        flow.await_runtime_response().await.unwrap();
        flow.await_agents_ready().await.unwrap();

        flow.clear().unwrap();
        flow.set_agents_ready_count(0).unwrap();
        // Zero expected agents releases immediately.
        flow.await_agents_ready().await.unwrap();
    }
}
