// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::app::deploy::{
    date_partition, expect_success, read_artifact, submission_root, upload_error,
    url_file_name,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, HttpAuth, HttpBody, HttpMethod, HttpPort, HttpRequest};

const WEBHDFS_PREFIX: &str = "/webhdfs/v1";

/// Two-step WebHDFS `op=CREATE`: the name node answers 307 with the data
/// node location, which receives the bytes.
pub struct WebHdfsDeploy {
    /// `{scheme}://{host}[:port]/webhdfs/v1`
    endpoint: String,
    /// HDFS path, e.g. `/user/spark/SparkSubmission/`
    destination_root: String,
    auth: HttpAuth,
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
}

impl WebHdfsDeploy {
    pub fn new(
        root_path: &str,
        username: &str,
        password: &str,
        http: Arc<dyn HttpPort>,
        clock: Arc<dyn ClockPort>,
    ) -> AppResult<Self> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AppError::configuration(
                "cluster username and password are required for WebHDFS uploads",
            ));
        }
        let url = Url::parse(root_path.trim()).map_err(|err| {
            AppError::configuration(format!("invalid WebHDFS root path '{root_path}': {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::configuration(format!(
                "WebHDFS root path must be an http(s) URL, got '{root_path}'"
            )));
        }
        let hdfs_path = url.path().strip_prefix(WEBHDFS_PREFIX).ok_or_else(|| {
            AppError::configuration(format!(
                "WebHDFS root path '{root_path}' must contain {WEBHDFS_PREFIX}"
            ))
        })?;
        let authority = &url[url::Position::BeforeScheme..url::Position::AfterPort];
        Ok(Self {
            endpoint: format!("{authority}{WEBHDFS_PREFIX}"),
            destination_root: submission_root(if hdfs_path.is_empty() { "/" } else { hdfs_path }),
            auth: HttpAuth::Basic {
                username: username.trim().to_string(),
                password: password.to_string(),
            },
            http,
            clock,
        })
    }

    pub fn destination_root(&self) -> &str {
        &self.destination_root
    }

    pub async fn deploy(&self, artifact: &Path) -> AppResult<String> {
        let file_name = url_file_name(artifact)?;
        let bytes = read_artifact(artifact).await?;
        let remote = format!(
            "{}{}/{}",
            self.destination_root,
            date_partition(self.clock.as_ref()),
            file_name
        );
        let create_url = format!("{}{}?op=CREATE&overwrite=true", self.endpoint, remote);

        let create = HttpRequest::new(HttpMethod::Put, &create_url).auth(Some(self.auth.clone()));
        let response = self
            .http
            .send(create.clone())
            .await
            .map_err(|err| upload_error(&remote, err))?;

        let data_url = match response.status {
            307 => response
                .header("Location")
                .map(str::to_string)
                .ok_or_else(|| upload_error(&remote, "redirect without a Location header"))?,
            _ => {
                expect_success(&create, response)?;
                create_url
            }
        };

        let upload = HttpRequest::new(HttpMethod::Put, &data_url)
            .header("Content-Type", "application/octet-stream")
            .auth(Some(self.auth.clone()))
            .body(HttpBody::Bytes(bytes));
        let response = self
            .http
            .send(upload.clone())
            .await
            .map_err(|err| upload_error(&remote, err))?;
        expect_success(&upload, response)?;
        Ok(remote)
    }
}
