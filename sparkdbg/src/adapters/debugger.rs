// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Debugger front-ends attached to forwarded JDWP ports.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ConsolePort, DebugExecutionContext, DebuggerPort};
use crate::app::types::LogSeverity;

/// Prints how to attach instead of launching anything.
pub struct AnnouncingDebugger {
    console: Arc<dyn ConsolePort>,
}

impl AnnouncingDebugger {
    pub fn new(console: Arc<dyn ConsolePort>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl DebuggerPort for AnnouncingDebugger {
    async fn attach(&self, context: &DebugExecutionContext, local_port: u16) -> AppResult<()> {
        self.console.print(
            &context.label(),
            LogSeverity::Info,
            &format!("debugger ready: jdb -attach localhost:{local_port}"),
        );
        Ok(())
    }
}

/// Spawns a command per attach, e.g. `jdb -attach localhost:{port}`.
pub struct CommandDebugger {
    template: Vec<String>,
}

impl CommandDebugger {
    pub fn new(template: &str) -> AppResult<Self> {
        let template: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if template.is_empty() {
            return Err(AppError::configuration("debugger command is empty"));
        }
        Ok(Self { template })
    }

    fn expand(&self, context: &DebugExecutionContext, local_port: u16) -> Vec<String> {
        self.template
            .iter()
            .map(|part| {
                part.replace("{host}", &context.host)
                    .replace("{port}", &local_port.to_string())
                    .replace("{target}", context.target.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl DebuggerPort for CommandDebugger {
    async fn attach(&self, context: &DebugExecutionContext, local_port: u16) -> AppResult<()> {
        let argv = self.expand(context, local_port);
        let Some((program, args)) = argv.split_first() else {
            return Err(AppError::configuration("debugger command is empty"));
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|err| {
                AppError::configuration(format!("failed to start debugger '{program}': {err}"))
            })?;
        tracing::info!(program = %program, local_port, label = %context.label(), "debugger started");
        let label = context.label();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%label, %status, "debugger exited"),
                Err(err) => tracing::warn!(%label, error = %err, "failed to wait for debugger"),
            }
        });
        Ok(())
    }
}
