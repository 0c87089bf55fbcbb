// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod console;
pub mod container_log;
pub mod debugger;
pub mod http;
pub mod job_submission;
pub mod ssh_tunnel;
pub mod telemetry;

pub use clock::ClockPort;
pub use console::ConsolePort;
pub use container_log::ContainerLogPort;
pub use debugger::{DebugExecutionContext, DebuggerPort};
pub use http::{HttpAuth, HttpBody, HttpMethod, HttpPort, HttpRequest, HttpResponse};
pub use job_submission::{BatchLog, JobSubmissionPort};
pub use ssh_tunnel::{ForwardId, ForwardedPort, SshTunnelPort};
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
