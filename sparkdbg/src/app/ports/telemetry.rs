// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

#[derive(Clone, Debug, Default)]
pub struct TelemetryEvent {
    pub cluster: Option<String>,
    pub batch_id: Option<i64>,
    pub target: Option<&'static str>,
    pub host: Option<String>,
    pub storage_type: Option<&'static str>,
    pub remote_path: Option<String>,
    pub error_type: Option<&'static str>,
    pub message: Option<String>,
}

pub trait TelemetryPort: Send + Sync {
    fn event(&self, name: &'static str, fields: TelemetryEvent);
}

#[derive(Clone, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn event(&self, _name: &'static str, _fields: TelemetryEvent) {}
}
