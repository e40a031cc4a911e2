/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Core sandbox entities: lifecycle state machines, rendezvous flows, and
//! the registration service that owns and arbitrates everything.

pub mod agent;
pub mod flow;
pub mod registration;
pub mod runtime;
pub mod states;
