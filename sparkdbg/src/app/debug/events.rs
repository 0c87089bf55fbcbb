// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::debug::process::DebugProcess;
use crate::app::ports::ForwardedPort;

/// Messages on the orchestrator's event bus.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// A process saw its JDWP banner. `forwarded` is `None` when the port
    /// forward could not be opened.
    HandlerReady {
        process: Arc<DebugProcess>,
        forwarded: Option<ForwardedPort>,
    },
    /// A `Launching container` line was seen in the driver output.
    ExecutorCreated {
        host_uri: String,
        container_id: String,
    },
}
