// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use sparkdbg::adapters;
use sparkdbg::adapters::cli::{Command, JobArgs};
use sparkdbg::app::debug::{DebugOrchestrator, DebugOutcome, OrchestratorSettings};
use sparkdbg::app::deploy::JobDeployFactory;
use sparkdbg::app::deploy::factory::cluster_auth;
use sparkdbg::app::ports::{ConsolePort, DebuggerPort, HttpPort, TelemetryPort};
use sparkdbg::app::submit::Submitter;
use sparkdbg::app::types::{ClusterDetail, SubmissionModel};
use sparkdbg::config::{self, Config};
use sparkdbg::logging;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config poll_interval_ms: {} (source={})",
        report.poll_interval_ms.value,
        report.poll_interval_ms.source.as_str()
    );
    tracing::info!(
        "config log_page_size: {} (source={})",
        report.log_page_size.value,
        report.log_page_size.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

struct Wiring {
    config: Config,
    cluster: ClusterDetail,
    http: Arc<dyn HttpPort>,
    console: Arc<dyn ConsolePort>,
    telemetry: Arc<dyn TelemetryPort>,
    submitter: Submitter,
}

impl Wiring {
    fn new(config: Config) -> anyhow::Result<Self> {
        let cluster = config.cluster_detail()?;
        let http: Arc<dyn HttpPort> = Arc::new(adapters::http::ReqwestHttp::new(HTTP_TIMEOUT)?);
        let clock = Arc::new(adapters::time::SystemClock::new());
        let telemetry: Arc<dyn TelemetryPort> =
            Arc::new(adapters::telemetry::TracingTelemetry::new());
        let console: Arc<dyn ConsolePort> = Arc::new(adapters::console::TerminalConsole::new());
        let jobs = Arc::new(adapters::livy::LivyClient::new(
            &cluster.livy_url,
            cluster_auth(&cluster),
            http.clone(),
        )?);
        let factory = Arc::new(JobDeployFactory::new(
            http.clone(),
            clock,
            config.poll_interval,
        ));
        let submitter = Submitter::new(factory, jobs, telemetry.clone());
        Ok(Self {
            config,
            cluster,
            http,
            console,
            telemetry,
            submitter,
        })
    }

    fn submission_model(&self, job: JobArgs) -> anyhow::Result<SubmissionModel> {
        let storage_type = job
            .storage_type
            .as_deref()
            .map(config::parse_storage_type)
            .transpose()?;
        Ok(self
            .config
            .submission_model(job.artifact, storage_type, job.class_name, job.args)?)
    }

    fn debugger(&self) -> anyhow::Result<Arc<dyn DebuggerPort>> {
        let command = self
            .config
            .debugger
            .command
            .as_deref()
            .filter(|command| !command.trim().is_empty());
        let debugger: Arc<dyn DebuggerPort> = match command {
            Some(command) => Arc::new(adapters::debugger::CommandDebugger::new(command)?),
            None => Arc::new(adapters::debugger::AnnouncingDebugger::new(
                self.console.clone(),
            )),
        };
        Ok(debugger)
    }
}

/// Flip `cancel` on the first Ctrl-C.
fn watch_ctrl_c() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, terminating the driver");
            let _ = cancel_tx.send(true);
        }
        // Keep the sender alive so receivers never see a closed channel.
        std::future::pending::<()>().await;
    });
    cancel_rx
}

async fn debug(wiring: &Wiring, job: JobArgs) -> anyhow::Result<ExitCode> {
    let model = wiring.submission_model(job)?;
    let ssh = wiring.config.ssh_settings()?;
    let container_logs = Arc::new(adapters::container_log::NodeManagerLogs::new(
        wiring.cluster.gateway_url.as_deref(),
        adapters::container_log::DEFAULT_LOG_USER,
        cluster_auth(&wiring.cluster),
        wiring.http.clone(),
    ));
    let orchestrator = DebugOrchestrator::new(
        wiring.submitter.clone(),
        Arc::new(adapters::ssh::RusshTunnel::new()),
        container_logs,
        wiring.debugger()?,
        wiring.console.clone(),
        wiring.telemetry.clone(),
        OrchestratorSettings {
            poll_interval: wiring.config.poll_interval,
            log_page_size: wiring.config.log_page_size,
        },
    );

    let report = orchestrator
        .run(&model, &wiring.cluster, &ssh, watch_ctrl_c())
        .await?;
    println!(
        "batch {} finished: {:?} (driver attached: {}, executors attached: {}/{})",
        report.batch.id,
        report.outcome,
        report.driver_attached,
        report.executors_attached,
        report.executors_discovered
    );
    Ok(match report.outcome {
        DebugOutcome::Success => ExitCode::SUCCESS,
        DebugOutcome::Cancelled => ExitCode::from(130),
        DebugOutcome::Failed(_) => ExitCode::FAILURE,
    })
}

async fn logs(wiring: &Wiring, batch_id: i64, from: u64) -> anyhow::Result<()> {
    let page_size = wiring.config.log_page_size;
    let mut offset = from;
    loop {
        let page = wiring.submitter.logs(batch_id, offset, page_size).await?;
        let count = page.lines.len() as u64;
        for line in page.lines {
            println!("{line}");
        }
        offset = page.from + count;
        if count < page_size || offset >= page.total {
            return Ok(());
        }
    }
}

async fn run(wiring: Wiring, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Deploy(job) => {
            let model = wiring.submission_model(job)?;
            let deployed = wiring.submitter.deploy(&model, &wiring.cluster).await?;
            println!("{}", deployed.remote_path);
        }
        Command::Submit(job) => {
            let model = wiring.submission_model(job)?;
            let batch = wiring
                .submitter
                .submit(&model, &wiring.cluster, false)
                .await?;
            println!("batch {} submitted ({:?})", batch.id, batch.state);
        }
        Command::Debug(job) => return debug(&wiring, job).await,
        Command::Status(args) => {
            let batch = wiring.submitter.status(args.batch_id).await?;
            println!("batch {}: {:?}", batch.id, batch.state);
            if let Some(app_id) = &batch.app_id {
                println!("application: {app_id}");
            }
            if let Some(url) = &batch.driver_log_url {
                println!("driver log: {url}");
            }
            if let Some(url) = &batch.spark_ui_url {
                println!("spark ui: {url}");
            }
        }
        Command::Logs(args) => logs(&wiring, args.batch_id, args.from).await?,
        Command::Kill(args) => {
            wiring.submitter.kill(args.batch_id).await?;
            println!("batch {} killed", args.batch_id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            poll_interval_ms: opts.poll_interval_ms,
            log_page_size: opts.log_page_size,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let wiring = Wiring::new(config)?;
    run(wiring, opts.command).await
}
