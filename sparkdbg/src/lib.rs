// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Spark batch submission to Livy clusters with remote debugging of the
//! driver and executors through an SSH tunnel.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
