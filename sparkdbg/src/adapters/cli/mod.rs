// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "sparkdbg",
    version,
    about = "Submit Spark batches to a Livy cluster and debug the driver and executors over SSH",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < SPARKDBG_CONFIG_PATH < --config.\n\
If --config is omitted, sparkdbg tries SPARKDBG_CONFIG_PATH, then the default config file location; missing default config is OK."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        value_name = "MS",
        help = "How often to poll batch state and logs. Overrides `poll_interval_ms`."
    )]
    pub poll_interval_ms: Option<u64>,
    #[arg(
        long,
        global = true,
        value_name = "LINES",
        help = "Lines fetched per batch log request. Overrides `log_page_size`."
    )]
    pub log_page_size: Option<u64>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload the artifact and print its remote path.
    Deploy(JobArgs),
    /// Upload the artifact and create a batch.
    Submit(JobArgs),
    /// Submit with JDWP agents and attach debuggers to the driver and executors.
    Debug(JobArgs),
    /// Show the state of a batch.
    Status(BatchArgs),
    /// Print the Livy log of a batch.
    Logs(LogsArgs),
    /// Kill a batch.
    Kill(BatchArgs),
}

#[derive(Args, Debug)]
pub struct JobArgs {
    #[arg(value_name = "ARTIFACT", help = "Local jar to deploy.")]
    pub artifact: PathBuf,
    #[arg(
        long,
        value_name = "TYPE",
        help = "Storage backend: default_storage_account, blob, adls_gen1, adls_gen2, adls_gen2_for_oauth, webhdfs or spark_interactive_session."
    )]
    pub storage_type: Option<String>,
    #[arg(long, value_name = "CLASS", help = "Main class. Overrides `submission.class_name`.")]
    pub class_name: Option<String>,
    #[arg(
        last = true,
        value_name = "ARGS",
        help = "Arguments passed to the main class. Replace `submission.args`."
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[arg(value_name = "BATCH_ID")]
    pub batch_id: i64,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[arg(value_name = "BATCH_ID")]
    pub batch_id: i64,
    #[arg(long, default_value_t = 0, help = "First log line to print.")]
    pub from: u64,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    from_matches(&matches)
}

fn from_matches(matches: &clap::ArgMatches) -> ParsedOpts {
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
