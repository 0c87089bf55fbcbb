// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::DebugTarget;

/// Execution environment forked for one debuggable process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugExecutionContext {
    pub target: DebugTarget,
    pub host: String,
    pub container_id: Option<String>,
}

impl DebugExecutionContext {
    pub fn label(&self) -> String {
        match &self.container_id {
            Some(container) => format!("{}@{} [{}]", self.target, self.host, container),
            None => format!("{}@{}", self.target, self.host),
        }
    }
}

#[async_trait]
/// Opaque "attach a debugger to localhost:port" operation.
pub trait DebuggerPort: Send + Sync {
    async fn attach(&self, context: &DebugExecutionContext, local_port: u16) -> AppResult<()>;
}
