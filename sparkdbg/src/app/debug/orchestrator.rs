// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Remote debug sequencing.
//!
//! One run opens the SSH session, submits the driver with JDWP agents and
//! dispatches [`DebugEvent`]s until every producer is gone:
//!
//! - the driver lane and each executor lane emit `HandlerReady`,
//! - the driver watcher scans driver output and emits `ExecutorCreated`.
//!
//! The dispatcher only keeps a weak sender, so the bus ends once the driver,
//! its watcher and all executors have finished. The session is then closed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::app::debug::ctrl::{CtrlEvent, CtrlSubject, CtrlSubscription, SubscriptionId};
use crate::app::debug::events::DebugEvent;
use crate::app::debug::process::{
    DebugProcess, DriverDebugProcess, ExecutorDebugProcess, ProcessDeps,
};
use crate::app::debug::scanner::{host_of, launched_container};
use crate::app::debug::session::DebugSession;
use crate::app::errors::{AppError, AppResult, ErrorClass};
use crate::app::ports::{
    ConsolePort, ContainerLogPort, DebugExecutionContext, DebuggerPort, SshTunnelPort,
    TelemetryEvent, TelemetryPort,
};
use crate::app::submit::Submitter;
use crate::app::types::{
    AdvancedConfigModel, BatchInfo, ClusterDetail, DebugTarget, LogSeverity, SubmissionModel,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOutcome {
    Success,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    SubmittingDriver,
    AwaitingDriverPort,
    DriverAttached,
    ScanningForExecutors,
    Terminated(DebugOutcome),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub log_page_size: u64,
}

#[derive(Debug, Clone)]
pub struct DebugReport {
    pub batch: BatchInfo,
    pub outcome: DebugOutcome,
    pub driver_attached: bool,
    pub executors_discovered: usize,
    pub executors_attached: usize,
}

pub struct DebugOrchestrator {
    submitter: Submitter,
    tunnel: Arc<dyn SshTunnelPort>,
    container_logs: Arc<dyn ContainerLogPort>,
    debugger: Arc<dyn DebuggerPort>,
    console: Arc<dyn ConsolePort>,
    telemetry: Arc<dyn TelemetryPort>,
    settings: OrchestratorSettings,
    state: Arc<watch::Sender<OrchestratorState>>,
}

impl DebugOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        submitter: Submitter,
        tunnel: Arc<dyn SshTunnelPort>,
        container_logs: Arc<dyn ContainerLogPort>,
        debugger: Arc<dyn DebuggerPort>,
        console: Arc<dyn ConsolePort>,
        telemetry: Arc<dyn TelemetryPort>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            submitter,
            tunnel,
            container_logs,
            debugger,
            console,
            telemetry,
            settings,
            state: Arc::new(state),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Submit the job in debug mode and attach to the driver and to every
    /// executor discovered while it runs. Setting `cancel` to `true`
    /// requests termination of the driver.
    #[tracing::instrument(name = "debug", skip_all, fields(cluster = %cluster.name))]
    pub async fn run(
        &self,
        model: &SubmissionModel,
        cluster: &ClusterDetail,
        ssh: &AdvancedConfigModel,
        cancel: watch::Receiver<bool>,
    ) -> AppResult<DebugReport> {
        self.set_state(OrchestratorState::SubmittingDriver);
        let session = match self.open_session(ssh).await {
            Ok(session) => session,
            Err(err) => {
                self.set_state(OrchestratorState::Terminated(DebugOutcome::Failed(
                    err.to_string(),
                )));
                return Err(err);
            }
        };
        self.telemetry.event(
            "debug.session.opened",
            TelemetryEvent {
                cluster: Some(cluster.name.clone()),
                host: Some(ssh.host.clone()),
                ..TelemetryEvent::default()
            },
        );

        let batch = match self.submitter.submit(model, cluster, true).await {
            Ok(batch) => batch,
            Err(err) => {
                session.close().await;
                self.set_state(OrchestratorState::Terminated(DebugOutcome::Failed(
                    err.to_string(),
                )));
                return Err(err);
            }
        };
        self.set_state(OrchestratorState::AwaitingDriverPort);

        let deps = ProcessDeps {
            jobs: self.submitter.jobs(),
            container_logs: self.container_logs.clone(),
            poll_interval: self.settings.poll_interval,
            log_page_size: self.settings.log_page_size,
        };
        let labels = Labels {
            cluster: cluster.name.clone(),
            batch_id: batch.id,
        };
        let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
        let (driver_done_tx, driver_done_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver_ready = Arc::new(DriverReady::new(ready_tx));
        let driver = DriverDebugProcess::new(
            session.clone(),
            batch.id,
            cluster.container_log_port,
            deps.clone(),
        );
        let driver_ctrl = driver.process().ctrl_subject().clone();

        let mut consoles = JoinSet::new();
        let mirror = driver_ctrl.subscribe();
        let mirror_id = mirror.id;
        consoles.spawn(print_events(self.console.clone(), "driver".to_string(), mirror));

        let (attach_lane, attach_handle) =
            AttachLane::spawn(self.debugger.clone(), self.telemetry.clone(), labels.clone());

        let watcher = tokio::spawn(watch_driver(
            driver_ctrl.subscribe(),
            driver.clone(),
            bus_tx.clone(),
            driver_done_tx,
            driver_ready.clone(),
            self.telemetry.clone(),
            labels.clone(),
        ));
        let cancel_task = tokio::spawn(forward_cancellation(
            cancel,
            driver.process().clone(),
            driver_done_rx.clone(),
        ));
        let driver_lane = driver.start(bus_tx.clone());
        let continuation = tokio::spawn(attach_driver(
            ready_rx,
            attach_lane.clone(),
            self.console.clone(),
            self.state.clone(),
        ));

        let mut dispatcher = Dispatcher {
            bus: bus_tx.downgrade(),
            session: session.clone(),
            driver_ctrl,
            mirror: Some(mirror_id),
            driver_ready,
            attach: attach_lane,
            deps,
            driver_done: driver_done_rx,
            console: self.console.clone(),
            consoles,
            telemetry: self.telemetry.clone(),
            labels: labels.clone(),
            executors: Vec::new(),
            discovered: 0,
        };
        drop(bus_tx);

        while let Some(event) = bus_rx.recv().await {
            dispatcher.handle(event).await;
        }
        session.close().await;

        let driver_result = match watcher.await {
            Ok(result) => result,
            Err(err) => Err(AppError::internal(format!("driver watcher failed: {err}"))),
        };
        join_quietly(driver_lane).await;
        join_quietly(cancel_task).await;
        let driver_attached = continuation.await.unwrap_or(false);
        let Dispatcher {
            attach,
            mut consoles,
            executors,
            discovered,
            ..
        } = dispatcher;
        for executor in executors {
            join_quietly(executor).await;
        }
        drop(attach);
        let executors_attached = attach_handle.await.unwrap_or(0);
        while consoles.join_next().await.is_some() {}

        let outcome = match &driver_result {
            Ok(()) => DebugOutcome::Success,
            Err(err) if err.is_cancelled() => DebugOutcome::Cancelled,
            Err(err) => DebugOutcome::Failed(err.to_string()),
        };
        tracing::info!(
            batch_id = batch.id,
            outcome = ?outcome,
            driver_attached,
            executors_discovered = discovered,
            executors_attached,
            "debug run finished"
        );
        self.telemetry.event(
            "debug.completed",
            TelemetryEvent {
                cluster: Some(labels.cluster.clone()),
                batch_id: Some(batch.id),
                message: Some(format!("{outcome:?}")),
                ..TelemetryEvent::default()
            },
        );
        self.set_state(OrchestratorState::Terminated(outcome.clone()));
        Ok(DebugReport {
            batch,
            outcome,
            driver_attached,
            executors_discovered: discovered,
            executors_attached,
        })
    }

    async fn open_session(&self, ssh: &AdvancedConfigModel) -> AppResult<Arc<DebugSession>> {
        let session = Arc::new(DebugSession::new(self.tunnel.clone(), ssh.clone())?);
        session.open().await?;
        session.verify_certificate().await?;
        Ok(session)
    }

    fn set_state(&self, state: OrchestratorState) {
        set_state(&self.state, state);
    }
}

fn set_state(sender: &watch::Sender<OrchestratorState>, state: OrchestratorState) {
    tracing::debug!(state = ?state, "orchestrator state");
    sender.send_replace(state);
}

async fn join_quietly<T>(handle: JoinHandle<T>) {
    if let Err(err) = handle.await {
        tracing::warn!(error = %err, "debug task ended abnormally");
    }
}

#[derive(Debug, Clone)]
struct Labels {
    cluster: String,
    batch_id: i64,
}

impl Labels {
    fn event(&self) -> TelemetryEvent {
        TelemetryEvent {
            cluster: Some(self.cluster.clone()),
            batch_id: Some(self.batch_id),
            ..TelemetryEvent::default()
        }
    }
}

#[derive(Debug, Clone)]
struct DriverPort {
    context: DebugExecutionContext,
    local_port: u16,
}

/// Single-shot "driver ready" promise shared by the dispatcher and the
/// driver watcher. The first resolution wins.
struct DriverReady(Mutex<Option<oneshot::Sender<AppResult<DriverPort>>>>);

impl DriverReady {
    fn new(tx: oneshot::Sender<AppResult<DriverPort>>) -> Self {
        Self(Mutex::new(Some(tx)))
    }

    fn resolve(&self, result: AppResult<DriverPort>) -> bool {
        let tx = self
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match tx {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

struct AttachRequest {
    context: DebugExecutionContext,
    local_port: u16,
    reply: Option<oneshot::Sender<AppResult<()>>>,
}

/// Serialized lane for every debugger attach.
#[derive(Clone)]
struct AttachLane {
    tx: mpsc::UnboundedSender<AttachRequest>,
}

impl AttachLane {
    /// The handle resolves to the number of attached executors once every
    /// lane handle is dropped.
    fn spawn(
        debugger: Arc<dyn DebuggerPort>,
        telemetry: Arc<dyn TelemetryPort>,
        labels: Labels,
    ) -> (Self, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AttachRequest>();
        let handle = tokio::spawn(async move {
            let mut executors_attached = 0;
            while let Some(request) = rx.recv().await {
                let context = request.context;
                let result = debugger.attach(&context, request.local_port).await;
                let event = TelemetryEvent {
                    target: Some(context.target.as_str()),
                    host: Some(context.host.clone()),
                    ..labels.event()
                };
                match (&result, context.target) {
                    (Ok(()), DebugTarget::Driver) => {
                        telemetry.event("debug.driver.attached", event);
                    }
                    (Ok(()), DebugTarget::Executor) => {
                        executors_attached += 1;
                        telemetry.event("debug.executor.attached", event);
                    }
                    (Err(err), target) => {
                        tracing::warn!(label = %context.label(), error = %err, "debugger attach failed");
                        let name = match target {
                            DebugTarget::Driver => "debug.driver.failed",
                            DebugTarget::Executor => "debug.executor.failed",
                        };
                        telemetry.event(
                            name,
                            TelemetryEvent {
                                error_type: Some(err.classification().as_str()),
                                message: Some(err.to_string()),
                                ..event
                            },
                        );
                    }
                }
                if let Some(reply) = request.reply {
                    let _ = reply.send(result);
                }
            }
            executors_attached
        });
        (Self { tx }, handle)
    }

    fn submit(&self, context: DebugExecutionContext, local_port: u16) {
        let request = AttachRequest {
            context,
            local_port,
            reply: None,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!("attach lane closed, dropping attach request");
        }
    }

    async fn attach(&self, context: DebugExecutionContext, local_port: u16) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AttachRequest {
                context,
                local_port,
                reply: Some(reply),
            })
            .map_err(|_| AppError::internal("attach lane closed"))?;
        rx.await
            .map_err(|_| AppError::internal("attach lane dropped the request"))?
    }
}

/// Waits for the driver port, then attaches through the lane.
async fn attach_driver(
    ready: oneshot::Receiver<AppResult<DriverPort>>,
    lane: AttachLane,
    console: Arc<dyn ConsolePort>,
    state: Arc<watch::Sender<OrchestratorState>>,
) -> bool {
    let port = match ready.await {
        Ok(Ok(port)) => port,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "driver never became ready for attach");
            return false;
        }
        Err(_) => return false,
    };
    let label = port.context.label();
    match lane.attach(port.context, port.local_port).await {
        Ok(()) => {
            set_state(&state, OrchestratorState::DriverAttached);
            set_state(&state, OrchestratorState::ScanningForExecutors);
            true
        }
        Err(err) => {
            console.print(
                &label,
                LogSeverity::Warning,
                &format!(
                    "debugger attach failed: {err}; the driver stays suspended until a debugger connects to localhost:{}",
                    port.local_port
                ),
            );
            false
        }
    }
}

async fn print_events(console: Arc<dyn ConsolePort>, label: String, mut subscription: CtrlSubscription) {
    while let Some(event) = subscription.events.recv().await {
        match event {
            CtrlEvent::Line(line) => console.print(&label, line.severity, &line.text),
            CtrlEvent::Completed(_) => break,
        }
    }
}

/// Scans driver output for executor launches and turns the end of the
/// driver stream into the driver-ready error and the `driver_done` signal.
async fn watch_driver(
    mut subscription: CtrlSubscription,
    driver: DriverDebugProcess,
    bus: mpsc::UnboundedSender<DebugEvent>,
    driver_done: watch::Sender<bool>,
    driver_ready: Arc<DriverReady>,
    telemetry: Arc<dyn TelemetryPort>,
    labels: Labels,
) -> AppResult<()> {
    let mut log_port = None;
    let mut result = Err(AppError::internal("driver control stream closed unexpectedly"));
    while let Some(event) = subscription.events.recv().await {
        match event {
            CtrlEvent::Line(line) => {
                let Some(found) = launched_container(&line.text) else {
                    continue;
                };
                let port = match log_port {
                    Some(port) => port,
                    None => {
                        let port = driver.fetch_container_log_port().await.unwrap_or_else(|err| {
                            tracing::debug!(error = %err, "falling back to default container log port");
                            driver.default_log_port()
                        });
                        log_port = Some(port);
                        port
                    }
                };
                let _ = bus.send(DebugEvent::ExecutorCreated {
                    host_uri: found.host_uri(port),
                    container_id: found.container_id,
                });
            }
            CtrlEvent::Completed(completed) => {
                result = completed;
                break;
            }
        }
    }
    let _ = driver_done.send(true);

    match &result {
        Ok(()) => {
            driver_ready.resolve(Err(AppError::remote(
                "driver finished before its debug port became available",
            )));
        }
        Err(err) if err.is_cancelled() || driver.process().is_termination_requested() => {
            tracing::info!(batch_id = labels.batch_id, "driver terminated by user");
            telemetry.event(
                "debug.driver.cancelled",
                TelemetryEvent {
                    error_type: Some(ErrorClass::User.as_str()),
                    message: Some(err.to_string()),
                    ..labels.event()
                },
            );
            driver_ready.resolve(Err(err.clone()));
        }
        Err(err) => {
            tracing::error!(batch_id = labels.batch_id, error = %err, "driver debug stream failed");
            telemetry.event(
                "debug.driver.failed",
                TelemetryEvent {
                    error_type: Some(ErrorClass::System.as_str()),
                    message: Some(err.to_string()),
                    ..labels.event()
                },
            );
            driver_ready.resolve(Err(err.clone()));
        }
    }
    result
}

async fn forward_cancellation(
    mut cancel: watch::Receiver<bool>,
    driver: Arc<DebugProcess>,
    mut driver_done: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = wait_until_set(&mut cancel) => driver.request_termination(),
        _ = wait_until_set(&mut driver_done) => {}
    }
}

/// Resolves once the flag is `true`; never resolves if the sender is gone.
async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct Dispatcher {
    bus: mpsc::WeakUnboundedSender<DebugEvent>,
    session: Arc<DebugSession>,
    driver_ctrl: Arc<CtrlSubject>,
    mirror: Option<SubscriptionId>,
    driver_ready: Arc<DriverReady>,
    attach: AttachLane,
    deps: ProcessDeps,
    driver_done: watch::Receiver<bool>,
    console: Arc<dyn ConsolePort>,
    consoles: JoinSet<()>,
    telemetry: Arc<dyn TelemetryPort>,
    labels: Labels,
    executors: Vec<JoinHandle<()>>,
    discovered: usize,
}

impl Dispatcher {
    async fn handle(&mut self, event: DebugEvent) {
        match event {
            DebugEvent::HandlerReady {
                process,
                forwarded: None,
            } => {
                tracing::debug!(
                    target_kind = process.target().as_str(),
                    "handler ready without a forwarded port, ignoring"
                );
            }
            DebugEvent::HandlerReady {
                process,
                forwarded: Some(forwarded),
            } => {
                let context = process.context(&forwarded.remote_host);
                match process.target() {
                    DebugTarget::Driver => {
                        if let Some(mirror) = self.mirror.take() {
                            let subscription = self.driver_ctrl.handover(mirror);
                            self.consoles.spawn(print_events(
                                self.console.clone(),
                                context.label(),
                                subscription,
                            ));
                        }
                        self.driver_ready.resolve(Ok(DriverPort {
                            context,
                            local_port: forwarded.local_port,
                        }));
                    }
                    DebugTarget::Executor => self.attach.submit(context, forwarded.local_port),
                }
            }
            DebugEvent::ExecutorCreated {
                host_uri,
                container_id,
            } => self.spawn_executor(host_uri, container_id).await,
        }
    }

    async fn spawn_executor(&mut self, host_uri: String, container_id: String) {
        self.discovered += 1;
        let Some(host) = host_of(&host_uri) else {
            tracing::warn!(%host_uri, "executor host uri has no host, skipping");
            return;
        };
        self.telemetry.event(
            "debug.executor.discovered",
            TelemetryEvent {
                host: Some(host.clone()),
                message: Some(container_id.clone()),
                ..self.labels.event()
            },
        );
        let base_uri = match self.deps.container_logs.resolve_public_base(&host_uri).await {
            Ok(base) => base,
            Err(err) => {
                tracing::debug!(%host_uri, error = %err, "using internal container log uri");
                host_uri.clone()
            }
        };
        let Some(bus) = self.bus.upgrade() else {
            tracing::warn!(%container_id, "event bus closed, executor not attached");
            return;
        };
        let executor = ExecutorDebugProcess::new(
            self.session.clone(),
            host,
            container_id,
            base_uri,
            self.deps.clone(),
            self.driver_done.clone(),
        );
        let process = executor.process();
        let label = process.context(&process.host().unwrap_or_default()).label();
        self.consoles.spawn(print_events(
            self.console.clone(),
            label,
            process.ctrl_subject().subscribe(),
        ));
        self.executors.push(executor.start(bus));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::app::debug::testing::{
        FakeContainerLogs, MemoryTunnel, RecordingConsole, RecordingDebugger, RecordingTelemetry,
        ssh_config, verified_session,
    };
    use crate::app::deploy::JobDeployFactory;
    use crate::app::deploy::testing::{FixedClock, RecordingHttp};
    use crate::app::ports::ForwardedPort;
    use crate::app::submit::testing::ScriptedJobs;
    use crate::app::types::{
        BatchState, LineSource, StorageAccountType, StorageSettings, SubmissionParameter,
    };

    const DRIVER_LOG_URL: &str =
        "http://wn0:30060/node/containerlogs/container_1_0001_01_000001/livy";

    fn cluster() -> ClusterDetail {
        ClusterDetail {
            name: "c1".to_string(),
            livy_url: "https://c1.azurehdinsight.net/livy".to_string(),
            gateway_url: None,
            username: "admin".to_string(),
            password: Some("pw".to_string()),
            container_log_port: 30060,
            default_storage: None,
        }
    }

    fn labels() -> Labels {
        Labels {
            cluster: "c1".to_string(),
            batch_id: 42,
        }
    }

    fn model(artifact: PathBuf) -> SubmissionModel {
        SubmissionModel {
            storage_type: StorageAccountType::Blob,
            storage: StorageSettings {
                account: Some("acct".to_string()),
                key: Some("c2VjcmV0LWtleQ==".to_string()),
                container: Some("jobs".to_string()),
                ..StorageSettings::default()
            },
            parameter: SubmissionParameter {
                cluster_name: "c1".to_string(),
                class_name: "com.example.Main".to_string(),
                ..SubmissionParameter::default()
            },
            artifact,
        }
    }

    struct Harness {
        orchestrator: DebugOrchestrator,
        tunnel: Arc<MemoryTunnel>,
        jobs: Arc<ScriptedJobs>,
        logs: Arc<FakeContainerLogs>,
        debugger: Arc<RecordingDebugger>,
        telemetry: Arc<RecordingTelemetry>,
        _dir: tempfile::TempDir,
        artifact: PathBuf,
    }

    fn harness(tunnel: MemoryTunnel, jobs: ScriptedJobs) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app.jar");
        std::fs::write(&artifact, b"jar").unwrap();
        let tunnel = Arc::new(tunnel);
        let jobs = Arc::new(jobs);
        let logs = Arc::new(FakeContainerLogs::default());
        let debugger = Arc::new(RecordingDebugger::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let factory = JobDeployFactory::new(
            Arc::new(RecordingHttp::default()),
            Arc::new(FixedClock::default()),
            Duration::ZERO,
        );
        let submitter = Submitter::new(Arc::new(factory), jobs.clone(), telemetry.clone());
        let orchestrator = DebugOrchestrator::new(
            submitter,
            tunnel.clone(),
            logs.clone(),
            debugger.clone(),
            Arc::new(RecordingConsole::default()),
            telemetry.clone(),
            OrchestratorSettings {
                poll_interval: Duration::from_millis(2),
                log_page_size: 100,
            },
        );
        Harness {
            orchestrator,
            tunnel,
            jobs,
            logs,
            debugger,
            telemetry,
            _dir: dir,
            artifact,
        }
    }

    fn running_then_success(running: usize) -> ScriptedJobs {
        let mut states = vec![BatchState::Running; running];
        states.push(BatchState::Success);
        ScriptedJobs {
            driver_log_url: Some(DRIVER_LOG_URL.to_string()),
            ..ScriptedJobs::with_states(states)
        }
    }

    #[tokio::test]
    async fn attaches_driver_then_discovered_executor() {
        let h = harness(MemoryTunnel::default(), running_then_success(100));
        h.logs.push(
            "container_1_0001_01_000001",
            LineSource::Stdout,
            "Listening for transport dt_socket at address: 41234\n",
        );
        h.logs.push(
            "container_1_0001_01_000001",
            LineSource::Stderr,
            "INFO YarnAllocator: Launching container container_002 on host 10.0.0.5 for executor with ID 1\n",
        );
        h.logs.push(
            "container_002",
            LineSource::Stdout,
            "Listening for transport dt_socket at address: 40001\n",
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h
            .orchestrator
            .run(&model(h.artifact.clone()), &cluster(), &ssh_config(), cancel_rx)
            .await
            .unwrap();

        assert_eq!(report.outcome, DebugOutcome::Success);
        assert!(report.driver_attached);
        assert_eq!(report.executors_discovered, 1);
        assert_eq!(report.executors_attached, 1);
        let attached = h.debugger.attached();
        assert_eq!(attached.len(), 2);
        let driver = attached
            .iter()
            .find(|(ctx, _)| ctx.target == DebugTarget::Driver)
            .unwrap();
        assert_eq!(driver.0.host, "wn0");
        let executor = attached
            .iter()
            .find(|(ctx, _)| ctx.target == DebugTarget::Executor)
            .unwrap();
        assert_eq!(executor.0.host, "10.0.0.5");
        assert_eq!(executor.0.container_id.as_deref(), Some("container_002"));
        let mut targets = h.tunnel.forward_targets();
        targets.sort();
        assert_eq!(
            targets,
            vec![("10.0.0.5".to_string(), 40001), ("wn0".to_string(), 41234)]
        );
        assert_eq!(h.tunnel.open_forward_count(), 0);
        assert_eq!(h.tunnel.disconnects(), 1);
        let submitted = h.jobs.submitted.lock().unwrap();
        assert!(submitted[0].conf["spark.driver.extraJavaOptions"].contains("-agentlib:jdwp"));
        assert_eq!(
            *h.orchestrator.subscribe_state().borrow(),
            OrchestratorState::Terminated(DebugOutcome::Success)
        );
        assert!(h.telemetry.names().contains(&"debug.executor.attached"));
    }

    #[tokio::test]
    async fn cancellation_resolves_driver_ready_without_attaching() {
        let h = harness(
            MemoryTunnel::default(),
            ScriptedJobs {
                driver_log_url: Some(DRIVER_LOG_URL.to_string()),
                ..ScriptedJobs::with_states(vec![BatchState::Running])
            },
        );
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut state = h.orchestrator.subscribe_state();
        let canceller = tokio::spawn(async move {
            state
                .wait_for(|s| *s == OrchestratorState::AwaitingDriverPort)
                .await
                .map(|_| ())
                .ok();
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = cancel_tx.send(true);
            cancel_tx
        });

        let report = h
            .orchestrator
            .run(&model(h.artifact.clone()), &cluster(), &ssh_config(), cancel_rx)
            .await
            .unwrap();
        let _ = canceller.await;

        assert_eq!(report.outcome, DebugOutcome::Cancelled);
        assert!(!report.driver_attached);
        assert!(h.debugger.attached().is_empty());
        assert_eq!(*h.jobs.killed.lock().unwrap(), vec![42]);
        assert_eq!(h.tunnel.disconnects(), 1);
        let names = h.telemetry.names();
        assert!(names.contains(&"debug.driver.cancelled"));
        assert!(!names.contains(&"debug.driver.failed"));
        assert_eq!(
            h.telemetry.error_type_of("debug.driver.cancelled"),
            Some("user")
        );
    }

    #[tokio::test]
    async fn ssh_failure_aborts_before_submission() {
        let h = harness(
            MemoryTunnel {
                reject_auth: true,
                ..MemoryTunnel::default()
            },
            running_then_success(1),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = h
            .orchestrator
            .run(&model(h.artifact.clone()), &cluster(), &ssh_config(), cancel_rx)
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::app::errors::codes::AUTHENTICATION_FAILURE);
        assert!(h.jobs.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_failure_is_a_system_error() {
        let h = harness(MemoryTunnel::default(), running_then_success(5));
        h.jobs.fail_next_log("log endpoint returned 500");
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h
            .orchestrator
            .run(&model(h.artifact.clone()), &cluster(), &ssh_config(), cancel_rx)
            .await
            .unwrap();

        assert!(matches!(report.outcome, DebugOutcome::Failed(ref m) if m.contains("500")));
        assert_eq!(h.telemetry.error_type_of("debug.driver.failed"), Some("system"));
        assert!(h.debugger.attached().is_empty());
        assert_eq!(*h.jobs.killed.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn every_launch_line_emits_an_executor_event() {
        let session = verified_session(Arc::new(MemoryTunnel::default())).await;
        let jobs = Arc::new(ScriptedJobs {
            driver_log_url: Some(DRIVER_LOG_URL.to_string()),
            ..ScriptedJobs::default()
        });
        let deps = ProcessDeps {
            jobs: jobs.clone(),
            container_logs: Arc::new(FakeContainerLogs::default()),
            poll_interval: Duration::from_millis(1),
            log_page_size: 100,
        };
        let driver = DriverDebugProcess::new(session, 42, 30060, deps);
        let ctrl = driver.process().ctrl_subject().clone();
        let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        for text in [
            "Launching container container_001 on host 10.0.0.5",
            "unrelated line",
            "Launching container container_002 on host 10.0.0.6 for executor with ID 2",
            "Launching container container_001 on host 10.0.0.5",
        ] {
            ctrl.emit(crate::app::types::ControlLogLine::info(text));
        }
        ctrl.complete(Ok(()));

        let result = watch_driver(
            ctrl.subscribe(),
            driver,
            bus_tx,
            done_tx,
            Arc::new(DriverReady::new(ready_tx)),
            Arc::new(RecordingTelemetry::default()),
            labels(),
        )
        .await;

        result.unwrap();
        let mut events = Vec::new();
        while let Ok(DebugEvent::ExecutorCreated {
            host_uri,
            container_id,
        }) = bus_rx.try_recv()
        {
            events.push((host_uri, container_id));
        }
        assert_eq!(
            events,
            vec![
                ("http://10.0.0.5:30060".to_string(), "container_001".to_string()),
                ("http://10.0.0.6:30060".to_string(), "container_002".to_string()),
                ("http://10.0.0.5:30060".to_string(), "container_001".to_string()),
            ]
        );
        assert!(*done_rx.borrow());
        assert!(ready_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handler_ready_without_port_is_dropped() {
        let session = verified_session(Arc::new(MemoryTunnel::default())).await;
        let deps = ProcessDeps {
            jobs: Arc::new(ScriptedJobs::default()),
            container_logs: Arc::new(FakeContainerLogs::default()),
            poll_interval: Duration::from_millis(1),
            log_page_size: 100,
        };
        let driver = DriverDebugProcess::new(session.clone(), 42, 30060, deps.clone());
        let debugger = Arc::new(RecordingDebugger::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (lane, lane_handle) = AttachLane::spawn(debugger.clone(), telemetry.clone(), labels());
        let (ready_tx, mut ready_rx) = oneshot::channel();
        let (bus_tx, _bus_rx) = mpsc::unbounded_channel::<DebugEvent>();
        let (_done_tx, done_rx) = watch::channel(false);
        let mirror = driver.process().ctrl_subject().subscribe();
        let mut dispatcher = Dispatcher {
            bus: bus_tx.downgrade(),
            session,
            driver_ctrl: driver.process().ctrl_subject().clone(),
            mirror: Some(mirror.id),
            driver_ready: Arc::new(DriverReady::new(ready_tx)),
            attach: lane,
            deps,
            driver_done: done_rx,
            console: Arc::new(RecordingConsole::default()),
            consoles: JoinSet::new(),
            telemetry,
            labels: labels(),
            executors: Vec::new(),
            discovered: 0,
        };

        dispatcher
            .handle(DebugEvent::HandlerReady {
                process: driver.process().clone(),
                forwarded: None,
            })
            .await;
        assert!(matches!(
            ready_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(dispatcher.mirror, Some(mirror.id));

        dispatcher
            .handle(DebugEvent::HandlerReady {
                process: driver.process().clone(),
                forwarded: Some(ForwardedPort {
                    id: crate::app::ports::ForwardId(1),
                    local_port: 50000,
                    remote_host: "wn0".to_string(),
                    remote_port: 41234,
                }),
            })
            .await;
        let ready = ready_rx.try_recv().unwrap().unwrap();
        assert_eq!(ready.local_port, 50000);
        assert_eq!(ready.context.host, "wn0");
        assert!(dispatcher.mirror.is_none());

        drop(dispatcher);
        assert_eq!(lane_handle.await.unwrap(), 0);
        assert!(debugger.attached().is_empty());
    }

    #[tokio::test]
    async fn failed_executor_attach_does_not_stop_others() {
        let debugger = Arc::new(RecordingDebugger {
            fail_hosts: vec!["10.0.0.5".to_string()],
            ..RecordingDebugger::default()
        });
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (lane, handle) = AttachLane::spawn(debugger.clone(), telemetry.clone(), labels());
        for host in ["10.0.0.5", "10.0.0.6"] {
            lane.submit(
                DebugExecutionContext {
                    target: DebugTarget::Executor,
                    host: host.to_string(),
                    container_id: None,
                },
                40000,
            );
        }
        drop(lane);

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(debugger.attached().len(), 2);
        let names = telemetry.names();
        assert!(names.contains(&"debug.executor.failed"));
        assert!(names.contains(&"debug.executor.attached"));
    }
}
