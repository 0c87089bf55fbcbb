// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

/// Emits telemetry as structured `tracing` events.
#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            cluster,
            batch_id,
            target,
            host,
            storage_type,
            remote_path,
            error_type,
            message,
        } = fields;

        if error_type.is_some() {
            tracing::warn!(
                target: "sparkdbg::telemetry",
                event = name,
                cluster = cluster.as_deref(),
                batch_id = batch_id,
                debug_target = target,
                host = host.as_deref(),
                storage_type = storage_type,
                remote_path = remote_path.as_deref(),
                error_type = error_type,
                message = message.as_deref(),
            );
        } else {
            tracing::info!(
                target: "sparkdbg::telemetry",
                event = name,
                cluster = cluster.as_deref(),
                batch_id = batch_id,
                debug_target = target,
                host = host.as_deref(),
                storage_type = storage_type,
                remote_path = remote_path.as_deref(),
                message = message.as_deref(),
            );
        }
    }
}
