// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use crate::app::deploy::adls_gen2::account_from_root;
use crate::app::deploy::shared_key::SharedKeyCredential;
use crate::app::deploy::{
    AdlsGen1Deploy, AdlsGen2Deploy, BlobDeploy, Deployable, Gen2Auth, LivySessionDeploy,
    WebHdfsDeploy,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, HttpAuth, HttpPort};
use crate::app::types::{
    ClusterDetail, ClusterStorage, ClusterStorageKind, StorageAccountType, StorageSettings,
    SubmissionModel,
};

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Picks exactly one upload strategy per submission. Performs no I/O.
pub struct JobDeployFactory {
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
    poll_interval: Duration,
}

impl JobDeployFactory {
    pub fn new(http: Arc<dyn HttpPort>, clock: Arc<dyn ClockPort>, poll_interval: Duration) -> Self {
        Self {
            http,
            clock,
            poll_interval,
        }
    }

    pub fn build(&self, model: &SubmissionModel, cluster: &ClusterDetail) -> AppResult<Deployable> {
        let storage = &model.storage;
        let deployable = match model.storage_type {
            StorageAccountType::SparkInteractiveSession => {
                Deployable::LivySession(LivySessionDeploy::new(
                    &cluster.livy_url,
                    cluster_auth(cluster),
                    self.poll_interval,
                    self.http.clone(),
                    self.clock.clone(),
                )?)
            }
            StorageAccountType::DefaultStorageAccount => {
                let default_storage = cluster.default_storage.as_ref().ok_or_else(|| {
                    AppError::configuration(format!(
                        "cluster '{}' does not report a default storage account",
                        cluster.name
                    ))
                })?;
                self.default_storage(default_storage, storage)?
            }
            StorageAccountType::Blob => {
                let credential = SharedKeyCredential::new(
                    required(&storage.account, "storage.account")?,
                    required(&storage.key, "storage.key")?,
                )?;
                Deployable::Blob(BlobDeploy::new(
                    credential,
                    required(&storage.container, "storage.container")?,
                    endpoint_suffix(storage.endpoint_suffix.as_deref()),
                    self.http.clone(),
                    self.clock.clone(),
                )?)
            }
            StorageAccountType::AdlsGen1 => Deployable::AdlsGen1(AdlsGen1Deploy::new(
                required(&storage.root_path, "storage.root_path")?,
                required(&storage.access_token, "storage.access_token")?,
                self.http.clone(),
                self.clock.clone(),
            )?),
            StorageAccountType::AdlsGen2 => {
                let root = required(&storage.root_path, "storage.root_path")?;
                let key = required(&storage.key, "storage.key")?;
                let account = match storage.account.as_deref().map(str::trim) {
                    Some(account) if !account.is_empty() => account.to_string(),
                    _ => account_from_root(root)?,
                };
                let credential = SharedKeyCredential::new(account, key)?;
                Deployable::AdlsGen2(AdlsGen2Deploy::new(
                    root,
                    Gen2Auth::SharedKey(credential),
                    self.http.clone(),
                    self.clock.clone(),
                )?)
            }
            StorageAccountType::AdlsGen2ForOauth => {
                let token = required(&storage.access_token, "storage.access_token")?;
                Deployable::AdlsGen2(AdlsGen2Deploy::new(
                    required(&storage.root_path, "storage.root_path")?,
                    Gen2Auth::OAuth(token.to_string()),
                    self.http.clone(),
                    self.clock.clone(),
                )?)
            }
            StorageAccountType::Webhdfs => Deployable::WebHdfs(WebHdfsDeploy::new(
                required(&storage.root_path, "storage.root_path")?,
                &cluster.username,
                required(&cluster.password, "cluster.password")?,
                self.http.clone(),
                self.clock.clone(),
            )?),
        };
        tracing::debug!(
            storage_type = model.storage_type.as_str(),
            kind = deployable.kind(),
            root = deployable.destination_root(),
            "selected deploy strategy"
        );
        Ok(deployable)
    }

    /// The cluster's own account decides the protocol. Read once per build.
    fn default_storage(
        &self,
        default_storage: &ClusterStorage,
        storage: &StorageSettings,
    ) -> AppResult<Deployable> {
        let suffix = endpoint_suffix(Some(default_storage.endpoint_suffix.as_str()));
        match default_storage.kind {
            ClusterStorageKind::Blob => {
                let credential = SharedKeyCredential::new(
                    default_storage.account.clone(),
                    required(&default_storage.key, "cluster.default_storage.key")?,
                )?;
                Ok(Deployable::DefaultStorage(BlobDeploy::new(
                    credential,
                    required(&default_storage.container, "cluster.default_storage.container")?,
                    suffix,
                    self.http.clone(),
                    self.clock.clone(),
                )?))
            }
            ClusterStorageKind::AdlsGen1 => Ok(Deployable::AdlsGen1(AdlsGen1Deploy::new(
                required(&default_storage.root_path, "cluster.default_storage.root_path")?,
                required(&storage.access_token, "storage.access_token")?,
                self.http.clone(),
                self.clock.clone(),
            )?)),
            ClusterStorageKind::AdlsGen2 => {
                let filesystem =
                    required(&default_storage.container, "cluster.default_storage.container")?;
                let root = match default_storage.root_path.as_deref().map(str::trim) {
                    Some(root) if !root.is_empty() => root.to_string(),
                    _ => format!(
                        "https://{}.dfs.{}/{}",
                        default_storage.account, suffix, filesystem
                    ),
                };
                let auth = match storage.access_token.as_deref().map(str::trim) {
                    Some(token) if !token.is_empty() && default_storage.key.is_none() => {
                        Gen2Auth::OAuth(token.to_string())
                    }
                    _ => Gen2Auth::SharedKey(SharedKeyCredential::new(
                        default_storage.account.clone(),
                        required(&default_storage.key, "cluster.default_storage.key")?,
                    )?),
                };
                Ok(Deployable::AdlsGen2(AdlsGen2Deploy::new(
                    &root,
                    auth,
                    self.http.clone(),
                    self.clock.clone(),
                )?))
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::configuration(format!("{field} is required")).with_context(field))
}

fn endpoint_suffix(configured: Option<&str>) -> &str {
    configured
        .map(str::trim)
        .filter(|suffix| !suffix.is_empty())
        .unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
}

pub fn cluster_auth(cluster: &ClusterDetail) -> Option<HttpAuth> {
    cluster
        .password
        .as_ref()
        .filter(|_| !cluster.username.trim().is_empty())
        .map(|password| HttpAuth::Basic {
            username: cluster.username.clone(),
            password: password.clone(),
        })
}
