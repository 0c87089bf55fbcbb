// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::app::errors::{AppError, AppResult};

const JDWP_DRIVER_AGENT: &str = "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address=0";
const JDWP_EXECUTOR_AGENT: &str = "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=0";
const DRIVER_JAVA_OPTIONS: &str = "spark.driver.extraJavaOptions";
const EXECUTOR_JAVA_OPTIONS: &str = "spark.executor.extraJavaOptions";
const MAX_APP_ATTEMPTS: &str = "spark.yarn.maxAppAttempts";

/// Parameters of one Spark batch submission.
///
/// Values are never mutated after hand-off; transformations return a copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionParameter {
    pub cluster_name: String,
    pub name: Option<String>,
    /// Remote path of the main artifact, filled in after deployment.
    pub file: String,
    pub class_name: String,
    pub jars: Vec<String>,
    pub files: Vec<String>,
    pub py_files: Vec<String>,
    pub args: Vec<String>,
    pub driver_memory: Option<String>,
    pub driver_cores: Option<u32>,
    pub executor_memory: Option<String>,
    pub executor_cores: Option<u32>,
    pub num_executors: Option<u32>,
    pub conf: BTreeMap<String, String>,
}

/// JSON body of `POST /batches`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub file: String,
    pub class_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jars: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub py_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_executors: Option<u32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub conf: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SubmissionParameter {
    pub fn with_file(&self, file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..self.clone()
        }
    }

    /// Copy with the main file and every referenced jar/file rewritten by `f`.
    pub fn with_referenced_paths_transformed<F>(&self, f: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            file: f(&self.file),
            jars: self.jars.iter().map(|p| f(p)).collect(),
            files: self.files.iter().map(|p| f(p)).collect(),
            py_files: self.py_files.iter().map(|p| f(p)).collect(),
            ..self.clone()
        }
    }

    /// Copy with JDWP agents configured for the driver and the executors.
    pub fn with_remote_debug(&self) -> Self {
        let mut conf = self.conf.clone();
        append_java_option(&mut conf, DRIVER_JAVA_OPTIONS, JDWP_DRIVER_AGENT);
        append_java_option(&mut conf, EXECUTOR_JAVA_OPTIONS, JDWP_EXECUTOR_AGENT);
        conf.insert(MAX_APP_ATTEMPTS.to_string(), "1".to_string());
        Self {
            conf,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(AppError::configuration("no cluster selected"));
        }
        if self.class_name.trim().is_empty() {
            return Err(AppError::configuration("main class name is empty"));
        }
        Ok(())
    }

    pub fn to_batch_request(&self) -> AppResult<BatchRequest> {
        self.validate()?;
        if self.file.trim().is_empty() {
            return Err(AppError::configuration(
                "artifact has not been deployed; remote file path is empty",
            ));
        }
        Ok(BatchRequest {
            file: self.file.clone(),
            class_name: self.class_name.clone(),
            args: self.args.clone(),
            jars: self.jars.clone(),
            files: self.files.clone(),
            py_files: self.py_files.clone(),
            driver_memory: self.driver_memory.clone(),
            driver_cores: self.driver_cores,
            executor_memory: self.executor_memory.clone(),
            executor_cores: self.executor_cores,
            num_executors: self.num_executors,
            conf: self.conf.clone(),
            name: self.name.clone(),
        })
    }
}

fn append_java_option(conf: &mut BTreeMap<String, String>, key: &str, option: &str) {
    let value = match conf.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(existing) if existing.contains("-agentlib:jdwp") => existing.to_string(),
        Some(existing) => format!("{existing} {option}"),
        None => option.to_string(),
    };
    conf.insert(key.to_string(), value);
}

#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => write!(f, "Password(<redacted>)"),
            SshAuth::KeyFile { path, .. } => write!(f, "KeyFile({})", path.display()),
        }
    }
}

/// SSH settings for remote debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedConfigModel {
    pub remote_debug_enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Option<SshAuth>,
    pub known_hosts_path: Option<PathBuf>,
}

impl AdvancedConfigModel {
    pub fn validate(&self) -> AppResult<()> {
        if !self.remote_debug_enabled {
            return Err(AppError::configuration(
                "remote debugging is disabled in the ssh settings",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::configuration("ssh host is empty"));
        }
        if self.port == 0 {
            return Err(AppError::configuration("ssh port must be between 1 and 65535"));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::configuration("ssh username is empty"));
        }
        match &self.auth {
            None => Err(AppError::configuration(
                "either an ssh password or a private key file is required",
            )),
            Some(SshAuth::Password(password)) if password.is_empty() => {
                Err(AppError::configuration("ssh password is empty"))
            }
            Some(SshAuth::KeyFile { path, .. }) if !path.is_file() => Err(
                AppError::configuration(format!("ssh key file {} not found", path.display())),
            ),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugTarget {
    Driver,
    Executor,
}

impl DebugTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            DebugTarget::Driver => "driver",
            DebugTarget::Executor => "executor",
        }
    }
}

impl fmt::Display for DebugTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage the user picked for the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAccountType {
    SparkInteractiveSession,
    DefaultStorageAccount,
    Blob,
    AdlsGen1,
    AdlsGen2,
    AdlsGen2ForOauth,
    Webhdfs,
}

impl StorageAccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageAccountType::SparkInteractiveSession => "spark_interactive_session",
            StorageAccountType::DefaultStorageAccount => "default_storage_account",
            StorageAccountType::Blob => "blob",
            StorageAccountType::AdlsGen1 => "adls_gen1",
            StorageAccountType::AdlsGen2 => "adls_gen2",
            StorageAccountType::AdlsGen2ForOauth => "adls_gen2_for_oauth",
            StorageAccountType::Webhdfs => "webhdfs",
        }
    }
}

/// Protocol behind a cluster's default storage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStorageKind {
    Blob,
    AdlsGen1,
    AdlsGen2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStorage {
    pub kind: ClusterStorageKind,
    pub account: String,
    pub key: Option<String>,
    /// Blob container or Gen2 filesystem.
    pub container: Option<String>,
    /// Gen1 root, e.g. `adl://acct.azuredatalakestore.net/clusters/c1`.
    pub root_path: Option<String>,
    pub endpoint_suffix: String,
}

/// Already-resolved metadata about the target cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDetail {
    pub name: String,
    pub livy_url: String,
    pub gateway_url: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub container_log_port: u16,
    pub default_storage: Option<ClusterStorage>,
}

/// Credentials and paths for the user-selected storage type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSettings {
    pub account: Option<String>,
    pub key: Option<String>,
    pub container: Option<String>,
    pub root_path: Option<String>,
    pub access_token: Option<String>,
    pub endpoint_suffix: Option<String>,
}

/// Everything the deploy factory needs from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionModel {
    pub storage_type: StorageAccountType,
    pub storage: StorageSettings,
    pub parameter: SubmissionParameter,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Error,
    Info,
    Log,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineSource {
    Stdout,
    Stderr,
    System,
}

impl LineSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LineSource::Stdout => "stdout",
            LineSource::Stderr => "stderr",
            LineSource::System => "system",
        }
    }
}

/// One line of a remote job's control/log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLogLine {
    pub source: LineSource,
    pub severity: LogSeverity,
    pub text: String,
}

impl ControlLogLine {
    pub fn new(source: LineSource, severity: LogSeverity, text: impl Into<String>) -> Self {
        Self {
            source,
            severity,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LineSource::System, LogSeverity::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(LineSource::System, LogSeverity::Warning, text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    NotStarted,
    Starting,
    Running,
    Busy,
    ShuttingDown,
    Success,
    Dead,
    Killed,
    Error,
    Unknown,
}

impl BatchState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not_started" => BatchState::NotStarted,
            "starting" => BatchState::Starting,
            "running" => BatchState::Running,
            "busy" => BatchState::Busy,
            "shutting_down" => BatchState::ShuttingDown,
            "success" => BatchState::Success,
            "dead" => BatchState::Dead,
            "killed" => BatchState::Killed,
            "error" => BatchState::Error,
            _ => BatchState::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Success | BatchState::Dead | BatchState::Killed | BatchState::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    pub id: i64,
    pub state: BatchState,
    pub app_id: Option<String>,
    pub driver_log_url: Option<String>,
    pub spark_ui_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter() -> SubmissionParameter {
        SubmissionParameter {
            cluster_name: "c1".to_string(),
            class_name: "com.example.Main".to_string(),
            file: "https://acct.dfs.core.windows.net/fs/SparkSubmission/1/app.jar".to_string(),
            jars: vec!["https://acct.dfs.core.windows.net/fs/lib/dep.jar".to_string()],
            files: vec!["/local/conf.json".to_string()],
            ..SubmissionParameter::default()
        }
    }

    #[test]
    fn transforming_paths_leaves_original_untouched() {
        let original = parameter();
        let rewritten = original.with_referenced_paths_transformed(|p| p.to_uppercase());
        assert_eq!(rewritten.jars[0], original.jars[0].to_uppercase());
        assert_eq!(rewritten.files[0], "/LOCAL/CONF.JSON");
        assert_eq!(original.files[0], "/local/conf.json");
        assert_eq!(rewritten.class_name, original.class_name);
    }

    #[test]
    fn remote_debug_appends_to_existing_java_options() {
        let mut base = parameter();
        base.conf.insert(
            DRIVER_JAVA_OPTIONS.to_string(),
            "-Dfoo=bar".to_string(),
        );
        let debug = base.with_remote_debug();
        assert_eq!(
            debug.conf[DRIVER_JAVA_OPTIONS],
            format!("-Dfoo=bar {JDWP_DRIVER_AGENT}")
        );
        assert_eq!(debug.conf[EXECUTOR_JAVA_OPTIONS], JDWP_EXECUTOR_AGENT);
        assert_eq!(debug.conf[MAX_APP_ATTEMPTS], "1");

        let twice = debug.with_remote_debug();
        assert_eq!(twice.conf, debug.conf);
    }

    #[test]
    fn batch_request_uses_livy_field_names() {
        let mut param = parameter();
        param.driver_memory = Some("4g".to_string());
        param.num_executors = Some(2);
        let body = serde_json::to_value(param.to_batch_request().unwrap()).unwrap();
        assert_eq!(body["className"], "com.example.Main");
        assert_eq!(body["driverMemory"], "4g");
        assert_eq!(body["numExecutors"], 2);
        assert!(body.get("args").is_none());
        assert!(body.get("pyFiles").is_none());
    }

    #[test]
    fn batch_request_requires_deployed_file() {
        let param = parameter().with_file("");
        let err = param.to_batch_request().unwrap_err();
        assert!(err.message().contains("not been deployed"));
    }

    #[test]
    fn advanced_config_requires_credentials() {
        let model = AdvancedConfigModel {
            remote_debug_enabled: true,
            host: "c1-ssh.azurehdinsight.net".to_string(),
            port: 22,
            username: "sshuser".to_string(),
            auth: None,
            known_hosts_path: None,
        };
        assert!(model.validate().is_err());

        let with_password = AdvancedConfigModel {
            auth: Some(SshAuth::Password("secret".to_string())),
            ..model.clone()
        };
        with_password.validate().unwrap();

        let missing_key = AdvancedConfigModel {
            auth: Some(SshAuth::KeyFile {
                path: PathBuf::from("/definitely/not/here/id_rsa"),
                passphrase: None,
            }),
            ..model
        };
        let err = missing_key.validate().unwrap_err();
        assert!(err.message().contains("not found"));
    }

    #[test]
    fn ssh_password_is_redacted_in_debug_output() {
        let auth = SshAuth::Password("hunter2".to_string());
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn batch_state_terminal_states() {
        assert!(BatchState::parse("dead").is_terminal());
        assert!(BatchState::parse("SUCCESS").is_terminal());
        assert!(!BatchState::parse("running").is_terminal());
        assert_eq!(BatchState::parse("weird"), BatchState::Unknown);
    }
}
