// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use crate::app::deploy::shared_key::SharedKeyCredential;
use crate::app::deploy::{
    STORAGE_API_VERSION, date_partition, expect_success, http_date, read_artifact,
    submission_root, upload_error, url_file_name,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, HttpBody, HttpMethod, HttpPort, HttpRequest};

/// Block blob upload with a storage account key.
pub struct BlobDeploy {
    credential: SharedKeyCredential,
    container: String,
    endpoint_suffix: String,
    destination_root: String,
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
}

impl BlobDeploy {
    pub fn new(
        credential: SharedKeyCredential,
        container: &str,
        endpoint_suffix: &str,
        http: Arc<dyn HttpPort>,
        clock: Arc<dyn ClockPort>,
    ) -> AppResult<Self> {
        let container = container.trim().trim_matches('/');
        if container.is_empty() {
            return Err(AppError::configuration(format!(
                "no blob container configured for storage account '{}'",
                credential.account()
            )));
        }
        let endpoint_suffix = endpoint_suffix.trim().trim_matches('.').to_string();
        let destination_root = submission_root(&format!(
            "https://{}.blob.{}/{}",
            credential.account(),
            endpoint_suffix,
            container
        ));
        Ok(Self {
            container: container.to_string(),
            endpoint_suffix,
            destination_root,
            credential,
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
        let partition = date_partition(self.clock.as_ref());
        let url = format!("{}{}/{}", self.destination_root, partition, file_name);

        let request = HttpRequest::new(HttpMethod::Put, &url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", http_date(self.clock.as_ref()))
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Content-Type", "application/octet-stream")
            .body(HttpBody::Bytes(bytes));
        let request = self.credential.authorize(request)?;
        let response = self
            .http
            .send(request.clone())
            .await
            .map_err(|err| upload_error(&url, err))?;
        expect_success(&request, response)?;

        Ok(format!(
            "wasbs://{}@{}.blob.{}/{}/{}/{}",
            self.container,
            self.credential.account(),
            self.endpoint_suffix,
            super::SUBMISSION_FOLDER,
            partition,
            file_name
        ))
    }
}
