// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::app::deploy::shared_key::bearer;
use crate::app::deploy::{
    date_partition, expect_success, read_artifact, submission_root, upload_error,
    url_file_name,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, HttpBody, HttpMethod, HttpPort, HttpRequest};

/// Data Lake Storage Gen1 upload through its WebHDFS-compatible endpoint.
pub struct AdlsGen1Deploy {
    host: String,
    /// `adl://{host}/{path}/SparkSubmission/`
    destination_root: String,
    access_token: String,
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
}

impl AdlsGen1Deploy {
    pub fn new(
        root_path: &str,
        access_token: &str,
        http: Arc<dyn HttpPort>,
        clock: Arc<dyn ClockPort>,
    ) -> AppResult<Self> {
        if access_token.trim().is_empty() {
            return Err(AppError::configuration(
                "an access token is required to upload to ADLS Gen1",
            ));
        }
        let url = Url::parse(root_path.trim()).map_err(|err| {
            AppError::configuration(format!("invalid ADLS Gen1 root path '{root_path}': {err}"))
        })?;
        if url.scheme() != "adl" {
            return Err(AppError::configuration(format!(
                "ADLS Gen1 root path must use the adl:// scheme, got '{root_path}'"
            )));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                AppError::configuration(format!("ADLS Gen1 root path '{root_path}' has no account"))
            })?
            .to_string();
        let destination_root = submission_root(&format!("adl://{}{}", host, url.path()));
        Ok(Self {
            host,
            destination_root,
            access_token: access_token.trim().to_string(),
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
        let prefix = format!("adl://{}", self.host);
        let remote_path = remote.strip_prefix(&prefix).unwrap_or(&remote);
        let url = format!(
            "https://{}/webhdfs/v1{}?op=CREATE&overwrite=true&write=true",
            self.host, remote_path
        );

        let request = HttpRequest::new(HttpMethod::Put, &url)
            .header("Content-Type", "application/octet-stream")
            .auth(bearer(&self.access_token))
            .body(HttpBody::Bytes(bytes));
        let response = self
            .http
            .send(request.clone())
            .await
            .map_err(|err| upload_error(&remote, err))?;
        expect_success(&request, response)?;
        Ok(remote)
    }
}
