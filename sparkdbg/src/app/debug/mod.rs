// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Remote debugging of a Spark batch: one SSH session, one driver process,
//! one executor process per discovered container.

pub mod ctrl;
pub mod events;
pub mod orchestrator;
pub mod process;
pub mod scanner;
pub mod session;

pub use ctrl::{CtrlEvent, CtrlSubject, CtrlSubscription, SubscriptionId};
pub use events::DebugEvent;
pub use orchestrator::{
    DebugOrchestrator, DebugOutcome, DebugReport, OrchestratorSettings, OrchestratorState,
};
pub use process::{DebugProcess, DriverDebugProcess, ExecutorDebugProcess, LogSource, ProcessDeps};
pub use session::{DebugSession, SessionState};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::app::debug::session::DebugSession;
    use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
    use crate::app::ports::{
        ConsolePort, ContainerLogPort, DebugExecutionContext, DebuggerPort, ForwardId,
        ForwardedPort, SshTunnelPort, TelemetryEvent, TelemetryPort,
    };
    use crate::app::types::{AdvancedConfigModel, LineSource, LogSeverity, SshAuth};

    pub fn ssh_config() -> AdvancedConfigModel {
        AdvancedConfigModel {
            remote_debug_enabled: true,
            host: "c1-ssh.azurehdinsight.net".to_string(),
            port: 22,
            username: "sshuser".to_string(),
            auth: Some(SshAuth::Password("secret".to_string())),
            known_hosts_path: None,
        }
    }

    pub async fn verified_session(tunnel: Arc<MemoryTunnel>) -> Arc<DebugSession> {
        let session = DebugSession::new(tunnel, ssh_config()).unwrap();
        session.open().await.unwrap();
        session.verify_certificate().await.unwrap();
        Arc::new(session)
    }

    /// SSH tunnel that hands out local ports from 50000 and records calls.
    #[derive(Default)]
    pub struct MemoryTunnel {
        pub reject_auth: bool,
        pub reject_host_key: bool,
        pub fail_forwards: bool,
        pub connects: AtomicUsize,
        pub disconnects: AtomicUsize,
        pub next_id: AtomicU64,
        pub open: Mutex<BTreeMap<ForwardId, ForwardedPort>>,
        pub closed: Mutex<Vec<ForwardId>>,
        pub targets: Mutex<Vec<(String, u16)>>,
    }

    impl MemoryTunnel {
        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn disconnects(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }

        pub fn open_forward_count(&self) -> usize {
            self.open.lock().unwrap().len()
        }

        pub fn closed_forwards(&self) -> Vec<ForwardId> {
            self.closed.lock().unwrap().clone()
        }

        pub fn forward_targets(&self) -> Vec<(String, u16)> {
            self.targets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SshTunnelPort for MemoryTunnel {
        async fn connect(&self, _config: &AdvancedConfigModel) -> AppResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.reject_auth {
                return Err(AppError::with_message(
                    AppErrorKind::Unauthenticated,
                    codes::AUTHENTICATION_FAILURE,
                    "ssh authentication failed",
                ));
            }
            Ok(())
        }

        async fn verify_host_key(&self, _config: &AdvancedConfigModel) -> AppResult<()> {
            if self.reject_host_key {
                return Err(AppError::with_message(
                    AppErrorKind::Unauthenticated,
                    codes::HOST_KEY_REJECTED,
                    "host key does not match known_hosts",
                ));
            }
            Ok(())
        }

        async fn open_forward(&self, remote_host: &str, remote_port: u16) -> AppResult<ForwardedPort> {
            if self.fail_forwards {
                return Err(AppError::with_message(
                    AppErrorKind::Unavailable,
                    codes::CONNECTION_FAILURE,
                    "forwarding refused",
                ));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let forwarded = ForwardedPort {
                id: ForwardId(n),
                local_port: 50000 + n as u16,
                remote_host: remote_host.to_string(),
                remote_port,
            };
            self.targets
                .lock()
                .unwrap()
                .push((remote_host.to_string(), remote_port));
            self.open.lock().unwrap().insert(forwarded.id, forwarded.clone());
            Ok(forwarded)
        }

        async fn close_forward(&self, id: ForwardId) -> AppResult<()> {
            self.open.lock().unwrap().remove(&id);
            self.closed.lock().unwrap().push(id);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Container logs served from queued chunks; an empty queue reads as "".
    #[derive(Default)]
    pub struct FakeContainerLogs {
        chunks: Mutex<HashMap<(String, LineSource), VecDeque<AppResult<String>>>>,
        bases: Mutex<Vec<String>>,
    }

    impl FakeContainerLogs {
        pub fn push(&self, container_id: &str, stream: LineSource, chunk: &str) {
            self.chunks
                .lock()
                .unwrap()
                .entry((container_id.to_string(), stream))
                .or_default()
                .push_back(Ok(chunk.to_string()));
        }

        pub fn fail(&self, container_id: &str, stream: LineSource, message: &str) {
            self.chunks
                .lock()
                .unwrap()
                .entry((container_id.to_string(), stream))
                .or_default()
                .push_back(Err(AppError::remote(message)));
        }

        /// Inputs of `resolve_public_base`, in call order.
        pub fn bases(&self) -> Vec<String> {
            self.bases.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerLogPort for FakeContainerLogs {
        async fn resolve_public_base(&self, host_uri: &str) -> AppResult<String> {
            self.bases.lock().unwrap().push(host_uri.to_string());
            Ok(host_uri.to_string())
        }

        async fn fetch_log(
            &self,
            _base_uri: &str,
            container_id: &str,
            stream: LineSource,
            _offset: u64,
        ) -> AppResult<String> {
            self.chunks
                .lock()
                .unwrap()
                .get_mut(&(container_id.to_string(), stream))
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    #[derive(Default)]
    pub struct RecordingDebugger {
        pub fail_hosts: Vec<String>,
        pub attached: Mutex<Vec<(DebugExecutionContext, u16)>>,
    }

    impl RecordingDebugger {
        pub fn attached(&self) -> Vec<(DebugExecutionContext, u16)> {
            self.attached.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DebuggerPort for RecordingDebugger {
        async fn attach(&self, context: &DebugExecutionContext, local_port: u16) -> AppResult<()> {
            self.attached
                .lock()
                .unwrap()
                .push((context.clone(), local_port));
            if self.fail_hosts.contains(&context.host) {
                return Err(AppError::remote(format!("attach to {} refused", context.host)));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingConsole {
        pub lines: Mutex<Vec<(String, LogSeverity, String)>>,
    }

    impl ConsolePort for RecordingConsole {
        fn print(&self, label: &str, severity: LogSeverity, text: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((label.to_string(), severity, text.to_string()));
        }
    }

    #[derive(Default)]
    pub struct RecordingTelemetry {
        pub events: Mutex<Vec<(&'static str, TelemetryEvent)>>,
    }

    impl RecordingTelemetry {
        pub fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|(name, _)| *name).collect()
        }

        pub fn error_type_of(&self, name: &str) -> Option<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, event)| event.error_type)
        }
    }

    impl TelemetryPort for RecordingTelemetry {
        fn event(&self, name: &'static str, fields: TelemetryEvent) {
            self.events.lock().unwrap().push((name, fields));
        }
    }
}
