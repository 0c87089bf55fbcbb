// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Data Lake Storage Gen2 upload.
//!
//! Three calls per artifact: create the date directory, create an empty file,
//! then append the content with `flush=true`.

use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::app::deploy::shared_key::{SharedKeyCredential, bearer};
use crate::app::deploy::{
    STORAGE_API_VERSION, date_partition, expect_success, http_date, read_artifact,
    submission_root, upload_error, url_file_name,
};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, HttpBody, HttpMethod, HttpPort, HttpRequest};

pub enum Gen2Auth {
    SharedKey(SharedKeyCredential),
    OAuth(String),
}

pub struct AdlsGen2Deploy {
    account: String,
    /// `https://{account}.dfs.{suffix}/{filesystem}/.../SparkSubmission/`
    destination_root: String,
    auth: Gen2Auth,
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
}

impl AdlsGen2Deploy {
    pub fn new(
        root_path: &str,
        auth: Gen2Auth,
        http: Arc<dyn HttpPort>,
        clock: Arc<dyn ClockPort>,
    ) -> AppResult<Self> {
        let https_root = to_https_root(root_path)?;
        let account = account_from_root(&https_root)?;
        if let Gen2Auth::OAuth(token) = &auth {
            if token.trim().is_empty() {
                return Err(AppError::configuration(
                    "an OAuth access token is required to upload to ADLS Gen2",
                ));
            }
        }
        Ok(Self {
            account,
            destination_root: submission_root(&https_root),
            auth,
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
        let dir_url = format!(
            "{}{}",
            self.destination_root,
            date_partition(self.clock.as_ref())
        );
        let file_url = format!("{dir_url}/{file_name}");

        self.create_directory(&dir_url).await?;

        let create_file = HttpRequest::new(HttpMethod::Put, format!("{file_url}?resource=file"));
        self.send(create_file, &file_url).await?;

        let length = bytes.len();
        let append = HttpRequest::new(
            HttpMethod::Patch,
            format!("{file_url}?action=append&position=0&flush=true"),
        )
        .header("Content-Type", "application/octet-stream")
        .body(HttpBody::Bytes(bytes));
        self.send(append, &file_url).await?;

        tracing::debug!(url = %file_url, bytes = length, "uploaded artifact to ADLS Gen2");
        Ok(file_url)
    }

    async fn create_directory(&self, dir_url: &str) -> AppResult<()> {
        let request = self.prepare(HttpRequest::new(
            HttpMethod::Put,
            format!("{dir_url}?resource=directory"),
        ))?;
        let response = self
            .http
            .send(request.clone())
            .await
            .map_err(|err| upload_error(dir_url, err))?;
        if matches!(response.status, 403 | 404) {
            return Err(AppError::with_message(
                AppErrorKind::PermissionDenied,
                codes::PERMISSION_DENIED,
                format!(
                    "failed to create folder {dir_url} when uploading the Spark application artifact (HTTP {}). \
                     Make sure the identity used for the upload has the 'Storage Blob Data Contributor' role \
                     on storage account '{}'; ask the account owner to grant it and retry after the role assignment has propagated",
                    response.status, self.account
                ),
            ));
        }
        expect_success(&request, response)?;
        Ok(())
    }

    async fn send(&self, request: HttpRequest, target: &str) -> AppResult<()> {
        let request = self.prepare(request)?;
        let response = self
            .http
            .send(request.clone())
            .await
            .map_err(|err| upload_error(target, err))?;
        expect_success(&request, response)?;
        Ok(())
    }

    fn prepare(&self, request: HttpRequest) -> AppResult<HttpRequest> {
        let request = request
            .header("x-ms-date", http_date(self.clock.as_ref()))
            .header("x-ms-version", STORAGE_API_VERSION);
        match &self.auth {
            Gen2Auth::SharedKey(credential) => credential.authorize(request),
            Gen2Auth::OAuth(token) => Ok(request.auth(bearer(token))),
        }
    }
}

/// Storage account name from the first label of the root host.
pub(crate) fn account_from_root(root_path: &str) -> AppResult<String> {
    let https_root = to_https_root(root_path)?;
    Url::parse(&https_root)
        .ok()
        .and_then(|url| {
            url.host_str()
                .and_then(|host| host.split('.').next())
                .filter(|account| !account.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| {
            AppError::configuration(format!(
                "ADLS Gen2 root path '{root_path}' has no storage account"
            ))
        })
}

/// Accept `https://acct.dfs.../fs/path` or `abfs[s]://fs@acct.dfs.../path`.
pub(crate) fn to_https_root(root_path: &str) -> AppResult<String> {
    let trimmed = root_path.trim();
    if trimmed.is_empty() {
        return Err(AppError::configuration("ADLS Gen2 root path is empty"));
    }
    let url = Url::parse(trimmed).map_err(|err| {
        AppError::configuration(format!("invalid ADLS Gen2 root path '{trimmed}': {err}"))
    })?;
    match url.scheme() {
        "https" => Ok(trimmed.to_string()),
        "abfs" | "abfss" => {
            let filesystem = url.username();
            let host = url.host_str().unwrap_or_default();
            if filesystem.is_empty() || host.is_empty() {
                return Err(AppError::configuration(format!(
                    "ADLS Gen2 root path '{trimmed}' must look like abfss://<filesystem>@<account>.dfs.core.windows.net/"
                )));
            }
            Ok(format!("https://{}/{}{}", host, filesystem, url.path()))
        }
        other => Err(AppError::configuration(format!(
            "unsupported ADLS Gen2 root path scheme '{other}'"
        ))),
    }
}

/// Rewrite an `https://acct.dfs.../fs/path` URL to `abfss://fs@acct.dfs.../path`.
/// Anything else is returned unchanged.
pub fn to_abfs_uri(path: &str) -> String {
    let Ok(url) = Url::parse(path) else {
        return path.to_string();
    };
    let Some(host) = url.host_str() else {
        return path.to_string();
    };
    if url.scheme() != "https" || !host.contains(".dfs.") {
        return path.to_string();
    }
    let mut segments = url.path().trim_start_matches('/').splitn(2, '/');
    let filesystem = segments.next().unwrap_or_default();
    if filesystem.is_empty() {
        return path.to_string();
    }
    let rest = segments.next().unwrap_or_default();
    format!("abfss://{filesystem}@{host}/{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::deploy::testing::{FixedClock, RecordingHttp, status};
    use crate::app::ports::HttpAuth;

    const ROOT: &str = "https://acct.dfs.core.windows.net/fs/SparkSubmission/";

    fn artifact() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jar");
        std::fs::write(&path, b"jar-content").unwrap();
        (dir, path)
    }

    fn deploy(http: Arc<RecordingHttp>, auth: Gen2Auth) -> AdlsGen2Deploy {
        AdlsGen2Deploy::new(ROOT, auth, http, Arc::new(FixedClock::default())).unwrap()
    }

    #[tokio::test]
    async fn uploads_in_three_sequential_calls() {
        let (_dir, path) = artifact();
        let http = Arc::new(RecordingHttp::default());
        let credential = SharedKeyCredential::new("acct", "c2VjcmV0LWtleQ==").unwrap();

        let remote = deploy(http.clone(), Gen2Auth::SharedKey(credential))
            .deploy(&path)
            .await
            .unwrap();

        assert_eq!(
            remote,
            "https://acct.dfs.core.windows.net/fs/SparkSubmission/20261018093015/app.jar"
        );
        let requests = http.recorded();
        let calls: Vec<(HttpMethod, &str)> = requests
            .iter()
            .map(|req| (req.method, req.url.as_str()))
            .collect();
        assert_eq!(
            calls,
            vec![
                (
                    HttpMethod::Put,
                    "https://acct.dfs.core.windows.net/fs/SparkSubmission/20261018093015?resource=directory"
                ),
                (
                    HttpMethod::Put,
                    "https://acct.dfs.core.windows.net/fs/SparkSubmission/20261018093015/app.jar?resource=file"
                ),
                (
                    HttpMethod::Patch,
                    "https://acct.dfs.core.windows.net/fs/SparkSubmission/20261018093015/app.jar?action=append&position=0&flush=true"
                ),
            ]
        );
        assert_eq!(requests[2].body, HttpBody::Bytes(b"jar-content".to_vec()));
        assert!(
            requests
                .iter()
                .all(|req| req.header_value("Authorization").is_some())
        );
    }

    #[tokio::test]
    async fn file_name_with_space_is_percent_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app v2.jar");
        std::fs::write(&path, b"jar-content").unwrap();
        let http = Arc::new(RecordingHttp::default());

        let remote = deploy(http.clone(), Gen2Auth::OAuth("token".to_string()))
            .deploy(&path)
            .await
            .unwrap();

        assert_eq!(
            remote,
            "https://acct.dfs.core.windows.net/fs/SparkSubmission/20261018093015/app%20v2.jar"
        );
        assert!(http.recorded().iter().all(|req| !req.url.contains(' ')));
    }

    #[tokio::test]
    async fn forbidden_directory_creation_suggests_role_assignment() {
        let (_dir, path) = artifact();
        let http = Arc::new(RecordingHttp::with_responses(vec![status(403)]));

        let err = deploy(http.clone(), Gen2Auth::OAuth("token".to_string()))
            .deploy(&path)
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PERMISSION_DENIED);
        assert!(err.message().contains("Storage Blob Data Contributor"));
        assert!(err.message().contains("'acct'"));
        assert_eq!(http.recorded().len(), 1);
        assert_eq!(
            http.recorded()[0].auth,
            Some(HttpAuth::Bearer("token".to_string()))
        );
    }

    #[tokio::test]
    async fn other_directory_failures_stay_transport_errors() {
        let (_dir, path) = artifact();
        let http = Arc::new(RecordingHttp::with_responses(vec![status(500)]));

        let err = deploy(http, Gen2Auth::OAuth("token".to_string()))
            .deploy(&path)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::UPLOAD_FAILURE);
    }

    #[test]
    fn abfss_root_is_normalised_to_https() {
        assert_eq!(
            to_https_root("abfss://fs@acct.dfs.core.windows.net/base").unwrap(),
            "https://acct.dfs.core.windows.net/fs/base"
        );
        assert!(to_https_root("wasbs://c@acct.blob.core.windows.net/").is_err());
    }

    #[test]
    fn https_paths_rewrite_to_abfss() {
        assert_eq!(
            to_abfs_uri("https://acct.dfs.core.windows.net/fs/SparkSubmission/1/app.jar"),
            "abfss://fs@acct.dfs.core.windows.net/SparkSubmission/1/app.jar"
        );
        assert_eq!(to_abfs_uri("/local/dep.jar"), "/local/dep.jar");
        assert_eq!(
            to_abfs_uri("https://acct.blob.core.windows.net/c/dep.jar"),
            "https://acct.blob.core.windows.net/c/dep.jar"
        );
    }
}
