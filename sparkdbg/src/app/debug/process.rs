// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Debuggable remote processes.
//!
//! Each process runs one lane: it pages its log sources, republishes every
//! line on its [`CtrlSubject`], requests a port forward when the JDWP banner
//! shows up and announces it with exactly one `HandlerReady` event.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::app::debug::ctrl::CtrlSubject;
use crate::app::debug::events::DebugEvent;
use crate::app::debug::scanner::{DriverLocation, driver_location, jdwp_port};
use crate::app::debug::session::DebugSession;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ContainerLogPort, DebugExecutionContext, ForwardId, JobSubmissionPort,
};
use crate::app::types::{BatchState, ControlLogLine, DebugTarget, LineSource, LogSeverity};

const MAX_CONTAINER_LOG_FAILURES: u32 = 5;
const MAX_PAGES_PER_POLL: u32 = 16;

/// Where a process's control/log lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    /// `GET /batches/{id}/log`, paged by line.
    LivyBatch { batch_id: i64 },
    /// NodeManager container log file, paged by byte offset.
    ContainerLog {
        base_uri: String,
        container_id: String,
        stream: LineSource,
    },
}

#[derive(Clone)]
pub struct ProcessDeps {
    pub jobs: Arc<dyn JobSubmissionPort>,
    pub container_logs: Arc<dyn ContainerLogPort>,
    pub poll_interval: Duration,
    pub log_page_size: u64,
}

struct LogCursor {
    source: LogSource,
    offset: u64,
    partial: String,
    livy_stream: LineSource,
    failures: u32,
}

impl LogCursor {
    fn new(source: LogSource) -> Self {
        Self {
            source,
            offset: 0,
            partial: String::new(),
            livy_stream: LineSource::System,
            failures: 0,
        }
    }

    /// New complete lines since the previous call.
    async fn poll(&mut self, deps: &ProcessDeps) -> AppResult<Vec<ControlLogLine>> {
        match &self.source {
            LogSource::LivyBatch { batch_id } => {
                let batch_id = *batch_id;
                let mut out = Vec::new();
                for _ in 0..MAX_PAGES_PER_POLL {
                    let page = deps
                        .jobs
                        .get_batch_log(batch_id, self.offset, deps.log_page_size)
                        .await?;
                    let count = page.lines.len() as u64;
                    self.offset = page.from + count;
                    for raw in page.lines {
                        match raw.trim() {
                            "stdout:" => self.livy_stream = LineSource::Stdout,
                            "stderr:" => self.livy_stream = LineSource::Stderr,
                            "YARN Diagnostics:" => self.livy_stream = LineSource::System,
                            _ => out.push(classify(self.livy_stream, raw)),
                        }
                    }
                    if count < deps.log_page_size || self.offset >= page.total {
                        break;
                    }
                }
                Ok(out)
            }
            LogSource::ContainerLog {
                base_uri,
                container_id,
                stream,
            } => {
                let stream = *stream;
                let chunk = match deps
                    .container_logs
                    .fetch_log(base_uri, container_id, stream, self.offset)
                    .await
                {
                    Ok(chunk) => {
                        self.failures = 0;
                        chunk
                    }
                    Err(err) => {
                        self.failures += 1;
                        if self.failures >= MAX_CONTAINER_LOG_FAILURES {
                            return Err(err);
                        }
                        tracing::debug!(
                            container = %container_id,
                            stream = stream.as_str(),
                            attempt = self.failures,
                            error = %err,
                            "container log not available yet"
                        );
                        return Ok(Vec::new());
                    }
                };
                self.offset += chunk.len() as u64;
                self.partial.push_str(&chunk);
                let Some(end) = self.partial.rfind('\n') else {
                    return Ok(Vec::new());
                };
                let complete: String = self.partial.drain(..=end).collect();
                Ok(complete
                    .lines()
                    .map(|line| classify(stream, line.trim_end_matches('\r').to_string()))
                    .collect())
            }
        }
    }

    /// Trailing text without a newline, emitted when the source ends.
    fn flush(&mut self) -> Option<ControlLogLine> {
        let stream = match &self.source {
            LogSource::ContainerLog { stream, .. } => *stream,
            LogSource::LivyBatch { .. } => return None,
        };
        let rest = std::mem::take(&mut self.partial);
        (!rest.trim().is_empty()).then(|| classify(stream, rest))
    }
}

fn classify(source: LineSource, text: String) -> ControlLogLine {
    let severity = if text.contains(" ERROR ") || text.starts_with("ERROR ") {
        LogSeverity::Error
    } else if text.contains(" WARN ") || text.starts_with("WARN ") {
        LogSeverity::Warning
    } else {
        LogSeverity::Log
    };
    ControlLogLine::new(source, severity, text)
}

/// State shared by driver and executor processes.
pub struct DebugProcess {
    target: DebugTarget,
    host: Mutex<Option<String>>,
    container_id: Mutex<Option<String>>,
    session: Arc<DebugSession>,
    ctrl: Arc<CtrlSubject>,
    termination_requested: AtomicBool,
    terminate: Notify,
    announced: AtomicBool,
    forward: Mutex<Option<ForwardId>>,
}

impl fmt::Debug for DebugProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugProcess")
            .field("target", &self.target)
            .field("host", &self.host())
            .field("container_id", &self.container_id())
            .finish_non_exhaustive()
    }
}

impl DebugProcess {
    fn new(
        target: DebugTarget,
        session: Arc<DebugSession>,
        host: Option<String>,
        container_id: Option<String>,
    ) -> Self {
        Self {
            target,
            host: Mutex::new(host),
            container_id: Mutex::new(container_id),
            session,
            ctrl: Arc::new(CtrlSubject::new()),
            termination_requested: AtomicBool::new(false),
            terminate: Notify::new(),
            announced: AtomicBool::new(false),
            forward: Mutex::new(None),
        }
    }

    pub fn target(&self) -> DebugTarget {
        self.target
    }

    /// Executors share the driver's session.
    pub fn debug_session(&self) -> &Arc<DebugSession> {
        &self.session
    }

    pub fn ctrl_subject(&self) -> &Arc<CtrlSubject> {
        &self.ctrl
    }

    pub fn host(&self) -> Option<String> {
        lock(&self.host).clone()
    }

    pub fn container_id(&self) -> Option<String> {
        lock(&self.container_id).clone()
    }

    pub fn context(&self, host: &str) -> DebugExecutionContext {
        DebugExecutionContext {
            target: self.target,
            host: host.to_string(),
            container_id: self.container_id(),
        }
    }

    pub fn request_termination(&self) {
        if !self.termination_requested.swap(true, Ordering::SeqCst) {
            tracing::info!(target_kind = self.target.as_str(), "termination requested");
        }
        self.terminate.notify_waiters();
    }

    pub fn is_termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::SeqCst)
    }

    async fn wait_for_termination(&self) {
        loop {
            let notified = self.terminate.notified();
            if self.is_termination_requested() {
                return;
            }
            notified.await;
        }
    }

    fn emit(&self, line: ControlLogLine) {
        self.ctrl.emit(line);
    }

    /// Publish `lines`, returning the first JDWP port among them.
    fn ingest(&self, lines: Vec<ControlLogLine>) -> Option<u16> {
        let mut port = None;
        for line in lines {
            if port.is_none() {
                port = jdwp_port(&line.text);
            }
            self.emit(line);
        }
        port
    }

    /// Forward the JDWP port and emit the single `HandlerReady` event.
    async fn announce(self: &Arc<Self>, port: u16, bus: &mpsc::UnboundedSender<DebugEvent>) {
        let Some(host) = self.host() else {
            return;
        };
        if self.announced.swap(true, Ordering::SeqCst) {
            return;
        }
        let forwarded = match self.session.forward(&host, port).await {
            Ok(forwarded) => {
                *lock(&self.forward) = Some(forwarded.id);
                self.emit(ControlLogLine::info(format!(
                    "{} debug port {host}:{port} forwarded to localhost:{}",
                    self.target, forwarded.local_port
                )));
                Some(forwarded)
            }
            Err(err) => {
                tracing::warn!(target_kind = self.target.as_str(), %host, port, error = %err, "port forward failed");
                self.emit(ControlLogLine::warning(format!(
                    "failed to forward {} debug port {host}:{port}: {err}",
                    self.target
                )));
                None
            }
        };
        let _ = bus.send(DebugEvent::HandlerReady {
            process: self.clone(),
            forwarded,
        });
    }

    async fn finish(&self, cursors: &mut [LogCursor], result: AppResult<()>) {
        for cursor in cursors.iter_mut() {
            if let Some(line) = cursor.flush() {
                self.emit(line);
            }
        }
        let forward = lock(&self.forward).take();
        if let Some(id) = forward {
            if let Err(err) = self.session.release(id).await {
                tracing::debug!(forward = id.0, error = %err, "failed to release port forward");
            }
        }
        if let Err(err) = &result {
            let line = if err.is_cancelled() {
                ControlLogLine::warning(err.to_string())
            } else {
                ControlLogLine::new(LineSource::System, LogSeverity::Error, err.to_string())
            };
            self.emit(line);
        }
        self.ctrl.complete(result);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn pump(
    process: &Arc<DebugProcess>,
    cursors: &mut [LogCursor],
    pending_port: &mut Option<u16>,
    deps: &ProcessDeps,
    bus: &mpsc::UnboundedSender<DebugEvent>,
) -> AppResult<()> {
    for cursor in cursors.iter_mut() {
        let lines = cursor.poll(deps).await?;
        if let Some(port) = process.ingest(lines) {
            pending_port.get_or_insert(port);
        }
    }
    if let Some(port) = *pending_port {
        process.announce(port, bus).await;
    }
    Ok(())
}

/// The Spark driver, submitted as a Livy batch.
#[derive(Clone)]
pub struct DriverDebugProcess {
    process: Arc<DebugProcess>,
    batch_id: i64,
    default_log_port: u16,
    deps: ProcessDeps,
}

impl DriverDebugProcess {
    pub fn new(
        session: Arc<DebugSession>,
        batch_id: i64,
        default_log_port: u16,
        deps: ProcessDeps,
    ) -> Self {
        Self {
            process: Arc::new(DebugProcess::new(DebugTarget::Driver, session, None, None)),
            batch_id,
            default_log_port,
            deps,
        }
    }

    pub fn process(&self) -> &Arc<DebugProcess> {
        &self.process
    }

    pub fn batch_id(&self) -> i64 {
        self.batch_id
    }

    pub fn default_log_port(&self) -> u16 {
        self.default_log_port
    }

    /// NodeManager port from the batch's driver log URL, or the cluster default.
    pub async fn fetch_container_log_port(&self) -> AppResult<u16> {
        let batch = self.deps.jobs.get_batch(self.batch_id).await?;
        let port = batch
            .driver_log_url
            .as_deref()
            .and_then(driver_location)
            .and_then(|location| location.container_log_port)
            .unwrap_or(self.default_log_port);
        tracing::debug!(batch_id = self.batch_id, port, "container log port resolved");
        Ok(port)
    }

    pub fn start(&self, bus: mpsc::UnboundedSender<DebugEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(bus).await })
    }

    async fn run(self, bus: mpsc::UnboundedSender<DebugEvent>) {
        let process = self.process.clone();
        let jobs = self.deps.jobs.clone();
        let batch_id = self.batch_id;
        process.emit(ControlLogLine::info(format!(
            "batch {batch_id} submitted, waiting for the driver to start"
        )));
        let mut cursors = vec![LogCursor::new(LogSource::LivyBatch { batch_id })];
        let mut pending_port = None;
        let mut batch_finished = false;

        let result = loop {
            if process.is_termination_requested() {
                if let Err(err) = jobs.kill_batch(batch_id).await {
                    tracing::warn!(batch_id, error = %err, "failed to kill batch");
                }
                break Err(AppError::cancelled(format!(
                    "driver of batch {batch_id} terminated by user"
                )));
            }
            if let Err(err) = pump(&process, &mut cursors, &mut pending_port, &self.deps, &bus).await {
                break Err(err);
            }
            let batch = match jobs.get_batch(batch_id).await {
                Ok(batch) => batch,
                Err(err) => break Err(err),
            };
            if process.host().is_none() {
                if let Some(location) = batch.driver_log_url.as_deref().and_then(driver_location) {
                    self.locate(location, &mut cursors).await;
                }
            }
            if batch.state.is_terminal() {
                batch_finished = true;
                let drained = pump(&process, &mut cursors, &mut pending_port, &self.deps, &bus).await;
                break match (drained, batch.state) {
                    (Err(err), _) => Err(err),
                    (Ok(()), BatchState::Success) => Ok(()),
                    (Ok(()), state) => Err(AppError::remote(format!(
                        "batch {batch_id} finished in state {state:?}"
                    ))),
                };
            }
            tokio::select! {
                _ = tokio::time::sleep(self.deps.poll_interval) => {}
                _ = process.wait_for_termination() => {}
            }
        };
        if let Err(err) = &result {
            if !batch_finished && !err.is_cancelled() {
                self.abandon_batch().await;
            }
        }
        process.finish(&mut cursors, result).await;
    }

    /// Nobody follows the batch once the driver lane fails; stop it.
    async fn abandon_batch(&self) {
        let batch_id = self.batch_id;
        self.process.emit(ControlLogLine::warning(format!(
            "driver lane failed, killing batch {batch_id}"
        )));
        if let Err(err) = self.deps.jobs.kill_batch(batch_id).await {
            tracing::warn!(batch_id, error = %err, "failed to kill abandoned batch");
            self.process.emit(ControlLogLine::warning(format!(
                "batch {batch_id} may still be running, stop it with `sparkdbg kill {batch_id}`"
            )));
        }
    }

    async fn locate(&self, location: DriverLocation, cursors: &mut Vec<LogCursor>) {
        let process = &self.process;
        *lock(&process.host) = Some(location.host.clone());
        *lock(&process.container_id) = location.container_id.clone();
        process.emit(ControlLogLine::info(format!(
            "driver is running on {}",
            location.host
        )));
        let host_uri = location.host_uri(self.default_log_port);
        let Some(container_id) = location.container_id else {
            return;
        };
        let base_uri = match self.deps.container_logs.resolve_public_base(&host_uri).await {
            Ok(base) => base,
            Err(err) => {
                tracing::debug!(%host_uri, error = %err, "using internal container log uri");
                host_uri
            }
        };
        for stream in [LineSource::Stdout, LineSource::Stderr] {
            cursors.push(LogCursor::new(LogSource::ContainerLog {
                base_uri: base_uri.clone(),
                container_id: container_id.clone(),
                stream,
            }));
        }
    }
}

/// An executor container discovered from the driver output.
pub struct ExecutorDebugProcess {
    process: Arc<DebugProcess>,
    base_uri: String,
    deps: ProcessDeps,
    driver_done: watch::Receiver<bool>,
}

impl ExecutorDebugProcess {
    pub fn new(
        session: Arc<DebugSession>,
        host: String,
        container_id: String,
        base_uri: String,
        deps: ProcessDeps,
        driver_done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            process: Arc::new(DebugProcess::new(
                DebugTarget::Executor,
                session,
                Some(host),
                Some(container_id),
            )),
            base_uri,
            deps,
            driver_done,
        }
    }

    pub fn process(&self) -> &Arc<DebugProcess> {
        &self.process
    }

    pub fn start(self, bus: mpsc::UnboundedSender<DebugEvent>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(bus).await })
    }

    async fn run(mut self, bus: mpsc::UnboundedSender<DebugEvent>) {
        let process = self.process.clone();
        let container_id = process.container_id().unwrap_or_default();
        process.emit(ControlLogLine::info(format!(
            "executor container {container_id} launched on {}",
            process.host().unwrap_or_default()
        )));
        let mut cursors: Vec<LogCursor> = [LineSource::Stdout, LineSource::Stderr]
            .into_iter()
            .map(|stream| {
                LogCursor::new(LogSource::ContainerLog {
                    base_uri: self.base_uri.clone(),
                    container_id: container_id.clone(),
                    stream,
                })
            })
            .collect();
        let mut pending_port = None;

        let result = loop {
            if process.is_termination_requested() {
                break Err(AppError::cancelled(format!(
                    "executor {container_id} terminated by user"
                )));
            }
            if let Err(err) = pump(&process, &mut cursors, &mut pending_port, &self.deps, &bus).await {
                break Err(err);
            }
            if *self.driver_done.borrow() {
                break Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.deps.poll_interval) => {}
                _ = process.wait_for_termination() => {}
                changed = self.driver_done.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };
        process.finish(&mut cursors, result).await;
    }
}
