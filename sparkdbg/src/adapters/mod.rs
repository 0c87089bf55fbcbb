// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod console;
pub mod container_log;
pub mod debugger;
pub mod http;
pub mod livy;
pub mod ssh;
pub mod telemetry;
pub mod time;
