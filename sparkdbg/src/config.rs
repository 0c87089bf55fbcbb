// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{
    AdvancedConfigModel, ClusterDetail, ClusterStorage, ClusterStorageKind, SshAuth,
    StorageAccountType, StorageSettings, SubmissionModel, SubmissionParameter,
};

const APP_DIR_NAME: &str = "sparkdbg";
const CONFIG_FILE_NAME: &str = "sparkdbg.toml";
const CONFIG_ENV_VAR: &str = "SPARKDBG_CONFIG_PATH";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_LOG_PAGE_SIZE: u64 = 100;
const DEFAULT_CONTAINER_LOG_PORT: u16 = 30060;
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    verbose: Option<bool>,
    poll_interval_ms: Option<u64>,
    log_page_size: Option<u64>,
    #[serde(default)]
    cluster: Option<ClusterSection>,
    #[serde(default)]
    storage: Option<StorageSection>,
    #[serde(default)]
    ssh: Option<SshSection>,
    #[serde(default)]
    submission: Option<SubmissionSection>,
    #[serde(default)]
    debugger: Option<DebuggerSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    pub name: Option<String>,
    pub livy_url: Option<String>,
    pub gateway_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub container_log_port: Option<u16>,
    pub default_storage: Option<DefaultStorageSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultStorageSection {
    pub kind: Option<String>,
    pub account: Option<String>,
    pub key: Option<String>,
    pub container: Option<String>,
    pub root_path: Option<String>,
    pub endpoint_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(rename = "type")]
    pub storage_type: Option<String>,
    pub account: Option<String>,
    pub key: Option<String>,
    pub container: Option<String>,
    pub root_path: Option<String>,
    pub access_token: Option<String>,
    pub endpoint_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionSection {
    pub name: Option<String>,
    pub class_name: Option<String>,
    #[serde(default)]
    pub jars: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub py_files: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub driver_memory: Option<String>,
    pub driver_cores: Option<u32>,
    pub executor_memory: Option<String>,
    pub executor_cores: Option<u32>,
    pub num_executors: Option<u32>,
    #[serde(default)]
    pub conf: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerSection {
    /// Command template with `{host}`, `{port}` and `{target}` placeholders.
    pub command: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub verbose: bool,
    pub poll_interval: Duration,
    pub log_page_size: u64,
    pub cluster: ClusterSection,
    pub storage: StorageSection,
    pub ssh: SshSection,
    pub submission: SubmissionSection,
    pub debugger: DebuggerSection,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub poll_interval_ms: ConfigValue<u64>,
    pub log_page_size: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub poll_interval_ms: Option<u64>,
    pub log_page_size: Option<u64>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (poll_interval_ms, poll_source) = pick(
        overrides.poll_interval_ms,
        file_config.poll_interval_ms,
        DEFAULT_POLL_INTERVAL_MS,
    );
    if poll_interval_ms == 0 {
        anyhow::bail!("poll_interval_ms must be greater than zero");
    }
    let (log_page_size, page_source) = pick(
        overrides.log_page_size,
        file_config.log_page_size,
        DEFAULT_LOG_PAGE_SIZE,
    );
    if log_page_size == 0 {
        anyhow::bail!("log_page_size must be greater than zero");
    }
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, false);

    let mut ssh = file_config.ssh.unwrap_or_default();
    ssh.key_file = ssh
        .key_file
        .map(|path| resolve_path(&path.to_string_lossy(), base_dir));
    ssh.known_hosts = ssh
        .known_hosts
        .map(|path| resolve_path(&path.to_string_lossy(), base_dir));

    let config = Config {
        verbose,
        poll_interval: Duration::from_millis(poll_interval_ms),
        log_page_size,
        cluster: file_config.cluster.unwrap_or_default(),
        storage: file_config.storage.unwrap_or_default(),
        ssh,
        submission: file_config.submission.unwrap_or_default(),
        debugger: file_config.debugger.unwrap_or_default(),
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        poll_interval_ms: ConfigValue {
            value: poll_interval_ms,
            source: poll_source,
        },
        log_page_size: ConfigValue {
            value: log_page_size,
            source: page_source,
        },
        verbose: ConfigValue {
            value: verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn pick<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> (T, ConfigSource) {
    match override_value {
        Some(value) => (value, ConfigSource::Override),
        None => match file_value {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default, ConfigSource::Default),
        },
    }
}

impl Config {
    pub fn cluster_detail(&self) -> AppResult<ClusterDetail> {
        let cluster = &self.cluster;
        let name = required(&cluster.name, "cluster.name")?;
        let livy_url = match non_blank(&cluster.livy_url) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{name}.azurehdinsight.net/livy"),
        };
        let default_storage = cluster
            .default_storage
            .as_ref()
            .map(cluster_storage)
            .transpose()?;
        Ok(ClusterDetail {
            name: name.to_string(),
            livy_url,
            gateway_url: non_blank(&cluster.gateway_url).map(str::to_string),
            username: non_blank(&cluster.username).unwrap_or("admin").to_string(),
            password: cluster.password.clone(),
            container_log_port: cluster
                .container_log_port
                .unwrap_or(DEFAULT_CONTAINER_LOG_PORT),
            default_storage,
        })
    }

    /// SSH settings; the host defaults to the HDInsight `{cluster}-ssh` endpoint.
    pub fn ssh_settings(&self) -> AppResult<AdvancedConfigModel> {
        let ssh = &self.ssh;
        let host = match non_blank(&ssh.host) {
            Some(host) => host.to_string(),
            None => format!(
                "{}-ssh.azurehdinsight.net",
                required(&self.cluster.name, "ssh.host")?
            ),
        };
        let auth = match (&ssh.key_file, non_blank(&ssh.password)) {
            (Some(path), _) => Some(SshAuth::KeyFile {
                path: path.clone(),
                passphrase: ssh.key_passphrase.clone(),
            }),
            (None, Some(password)) => Some(SshAuth::Password(password.to_string())),
            (None, None) => None,
        };
        let model = AdvancedConfigModel {
            remote_debug_enabled: ssh.enabled.unwrap_or(true),
            host,
            port: ssh.port.unwrap_or(DEFAULT_SSH_PORT),
            username: non_blank(&ssh.username).unwrap_or("sshuser").to_string(),
            auth,
            known_hosts_path: ssh.known_hosts.clone(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn submission_model(
        &self,
        artifact: PathBuf,
        storage_type: Option<StorageAccountType>,
        class_name: Option<String>,
        args: Vec<String>,
    ) -> AppResult<SubmissionModel> {
        let storage_type = match storage_type {
            Some(storage_type) => storage_type,
            None => parse_storage_type(
                non_blank(&self.storage.storage_type).unwrap_or("default_storage_account"),
            )?,
        };
        let section = &self.submission;
        let parameter = SubmissionParameter {
            cluster_name: non_blank(&self.cluster.name).unwrap_or_default().to_string(),
            name: section.name.clone(),
            file: String::new(),
            class_name: class_name
                .or_else(|| section.class_name.clone())
                .unwrap_or_default(),
            jars: section.jars.clone(),
            files: section.files.clone(),
            py_files: section.py_files.clone(),
            args: if args.is_empty() {
                section.args.clone()
            } else {
                args
            },
            driver_memory: section.driver_memory.clone(),
            driver_cores: section.driver_cores,
            executor_memory: section.executor_memory.clone(),
            executor_cores: section.executor_cores,
            num_executors: section.num_executors,
            conf: section.conf.clone(),
        };
        parameter.validate()?;
        if !artifact.is_file() {
            return Err(AppError::configuration(format!(
                "artifact {} not found",
                artifact.display()
            )));
        }
        let storage = &self.storage;
        Ok(SubmissionModel {
            storage_type,
            storage: StorageSettings {
                account: storage.account.clone(),
                key: storage.key.clone(),
                container: storage.container.clone(),
                root_path: storage.root_path.clone(),
                access_token: storage.access_token.clone(),
                endpoint_suffix: storage.endpoint_suffix.clone(),
            },
            parameter,
            artifact,
        })
    }
}

pub fn parse_storage_type(raw: &str) -> AppResult<StorageAccountType> {
    let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
    let parsed = match normalized.as_str() {
        "spark_interactive_session" | "livy_session" => StorageAccountType::SparkInteractiveSession,
        "default_storage_account" | "default" => StorageAccountType::DefaultStorageAccount,
        "blob" => StorageAccountType::Blob,
        "adls_gen1" | "adls" => StorageAccountType::AdlsGen1,
        "adls_gen2" => StorageAccountType::AdlsGen2,
        "adls_gen2_for_oauth" | "adls_gen2_oauth" => StorageAccountType::AdlsGen2ForOauth,
        "webhdfs" => StorageAccountType::Webhdfs,
        _ => {
            return Err(AppError::configuration(format!(
                "unknown storage type '{raw}'"
            ))
            .with_context("storage.type"));
        }
    };
    Ok(parsed)
}

fn cluster_storage(section: &DefaultStorageSection) -> AppResult<ClusterStorage> {
    let kind = match non_blank(&section.kind).map(str::to_ascii_lowercase).as_deref() {
        Some("blob") | None => ClusterStorageKind::Blob,
        Some("adls_gen1") => ClusterStorageKind::AdlsGen1,
        Some("adls_gen2") => ClusterStorageKind::AdlsGen2,
        Some(other) => {
            return Err(AppError::configuration(format!(
                "unknown default storage kind '{other}'"
            ))
            .with_context("cluster.default_storage.kind"));
        }
    };
    Ok(ClusterStorage {
        kind,
        account: required(&section.account, "cluster.default_storage.account")?.to_string(),
        key: section.key.clone(),
        container: section.container.clone(),
        root_path: section.root_path.clone(),
        endpoint_suffix: non_blank(&section.endpoint_suffix)
            .unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            .to_string(),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, field: &str) -> AppResult<&'a str> {
    non_blank(value)
        .ok_or_else(|| AppError::configuration(format!("{field} is required")).with_context(field))
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
