/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

pub mod appctx;
pub mod config;
pub mod core;
pub mod interop;
pub mod manager;
pub mod model;
pub mod route;
