/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The runtime entity. One per sandbox, owned by the registration service.

use super::states::{next_runtime_state, RuntimeEvent, RuntimeState, StateError};
use common::fatalerror::ErrorType;

#[derive(Debug)]
pub struct Runtime {
    state: RuntimeState,
    last_error: Option<ErrorType>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            state: RuntimeState::Starting,
            last_error: None,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Set if and only if the runtime is in a terminal error state.
    pub fn last_error(&self) -> Option<ErrorType> {
        self.last_error
    }

    /// Apply one lifecycle event. On a table miss the state is unchanged
    /// and the error carries the current and attempted state names.
    pub(crate) fn apply(&mut self, event: RuntimeEvent) -> Result<(), StateError> {
        self.state = next_runtime_state(self.state, event)?;
        Ok(())
    }

    /// Apply a terminal error event, recording the fatal error kind.
    pub(crate) fn apply_fatal(
        &mut self,
        event: RuntimeEvent,
        kind: ErrorType,
    ) -> Result<(), StateError> {
        self.apply(event)?;
        self.last_error = Some(kind);
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
