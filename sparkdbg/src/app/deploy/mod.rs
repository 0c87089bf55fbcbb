// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Artifact upload strategies.
//!
//! A [`Deployable`] is picked once per submission by the
//! [`factory::JobDeployFactory`] and discarded after `deploy` returns. Network
//! backends place the artifact at `{root}/SparkSubmission/{date}/{file}`.

use std::path::Path;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use time::macros::format_description;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, HttpRequest, HttpResponse};

pub mod adls_gen1;
pub mod adls_gen2;
pub mod blob;
pub mod factory;
pub mod livy_session;
pub mod shared_key;
pub mod webhdfs;

pub use adls_gen1::AdlsGen1Deploy;
pub use adls_gen2::{AdlsGen2Deploy, Gen2Auth};
pub use blob::BlobDeploy;
pub use factory::JobDeployFactory;
pub use livy_session::LivySessionDeploy;
pub use webhdfs::WebHdfsDeploy;

pub const SUBMISSION_FOLDER: &str = "SparkSubmission";
pub(crate) const STORAGE_API_VERSION: &str = "2021-08-06";

/// One upload strategy per storage backend.
pub enum Deployable {
    Blob(BlobDeploy),
    /// Blob upload into the default container of the cluster's own account.
    DefaultStorage(BlobDeploy),
    AdlsGen1(AdlsGen1Deploy),
    AdlsGen2(AdlsGen2Deploy),
    WebHdfs(WebHdfsDeploy),
    LivySession(LivySessionDeploy),
}

impl Deployable {
    pub fn kind(&self) -> &'static str {
        match self {
            Deployable::Blob(_) => "blob",
            Deployable::DefaultStorage(_) => "default_storage",
            Deployable::AdlsGen1(_) => "adls_gen1",
            Deployable::AdlsGen2(_) => "adls_gen2",
            Deployable::WebHdfs(_) => "webhdfs",
            Deployable::LivySession(_) => "livy_session",
        }
    }

    /// Root every artifact of this strategy is placed under.
    pub fn destination_root(&self) -> &str {
        match self {
            Deployable::Blob(d) | Deployable::DefaultStorage(d) => d.destination_root(),
            Deployable::AdlsGen1(d) => d.destination_root(),
            Deployable::AdlsGen2(d) => d.destination_root(),
            Deployable::WebHdfs(d) => d.destination_root(),
            Deployable::LivySession(d) => d.destination_root(),
        }
    }

    /// Upload `artifact` and return the path the submission API should use.
    #[tracing::instrument(
        name = "deploy",
        level = "debug",
        skip(self, artifact),
        fields(kind = self.kind(), artifact = %artifact.display())
    )]
    pub async fn deploy(&self, artifact: &Path) -> AppResult<String> {
        match self {
            Deployable::Blob(d) | Deployable::DefaultStorage(d) => d.deploy(artifact).await,
            Deployable::AdlsGen1(d) => d.deploy(artifact).await,
            Deployable::AdlsGen2(d) => d.deploy(artifact).await,
            Deployable::WebHdfs(d) => d.deploy(artifact).await,
            Deployable::LivySession(d) => d.deploy(artifact).await,
        }
    }
}

/// `yyyyMMddHHmmss` partition for the current upload.
pub(crate) fn date_partition(clock: &dyn ClockPort) -> String {
    let format = format_description!("[year][month][day][hour][minute][second]");
    clock
        .now_utc()
        .format(&format)
        .unwrap_or_else(|_| clock.now_utc().unix_timestamp().to_string())
}

/// RFC 1123 date for the `x-ms-date` header.
pub(crate) fn http_date(clock: &dyn ClockPort) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    clock.now_utc().format(&format).unwrap_or_default()
}

/// Root guaranteed to end with `/SparkSubmission/`.
pub(crate) fn submission_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.ends_with(SUBMISSION_FOLDER) {
        format!("{trimmed}/")
    } else {
        format!("{trimmed}/{SUBMISSION_FOLDER}/")
    }
}

pub(crate) fn artifact_file_name(artifact: &Path) -> AppResult<String> {
    artifact
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::configuration(format!(
                "artifact path {} has no file name",
                artifact.display()
            ))
        })
}

/// Characters escaped in a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Artifact file name as it appears in storage URLs.
pub(crate) fn url_file_name(artifact: &Path) -> AppResult<String> {
    let name = artifact_file_name(artifact)?;
    Ok(utf8_percent_encode(&name, PATH_SEGMENT).to_string())
}

pub(crate) async fn read_artifact(artifact: &Path) -> AppResult<Vec<u8>> {
    tokio::fs::read(artifact).await.map_err(|err| {
        AppError::configuration(format!(
            "failed to read artifact {}: {err}",
            artifact.display()
        ))
    })
}

pub(crate) fn upload_error(target: &str, cause: impl std::fmt::Display) -> AppError {
    AppError::with_message(
        AppErrorKind::Unavailable,
        codes::UPLOAD_FAILURE,
        format!("failed to upload artifact to {target}: {cause}"),
    )
}

/// Fail with the response status and body unless the call succeeded.
pub(crate) fn expect_success(
    request: &HttpRequest,
    response: HttpResponse,
) -> AppResult<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(upload_error(
        &request.url,
        format!(
            "{} {} returned {}: {}",
            request.method.as_str(),
            request.url,
            response.status,
            response.text().trim()
        ),
    ))
}


#[cfg(test)]
mod tests {
    use super::testing::FixedClock;
    use super::*;

    #[test]
    fn date_partition_is_compact_timestamp() {
        assert_eq!(date_partition(&FixedClock::default()), "20261018093015");
    }

    #[test]
    fn http_date_is_rfc1123() {
        assert_eq!(http_date(&FixedClock::default()), "Sun, 18 Oct 2026 09:30:15 GMT");
    }

    #[test]
    fn submission_root_appends_folder_once() {
        assert_eq!(
            submission_root("https://acct.dfs.core.windows.net/fs"),
            "https://acct.dfs.core.windows.net/fs/SparkSubmission/"
        );
        assert_eq!(
            submission_root("https://acct.dfs.core.windows.net/fs/SparkSubmission/"),
            "https://acct.dfs.core.windows.net/fs/SparkSubmission/"
        );
    }

    #[test]
    fn artifact_without_file_name_is_rejected() {
        let err = artifact_file_name(Path::new("/")).unwrap_err();
        assert_eq!(err.code(), codes::CONFIGURATION_ERROR);
        assert!(url_file_name(Path::new("/")).is_err());
    }

    #[test]
    fn url_file_name_escapes_reserved_characters() {
        assert_eq!(url_file_name(Path::new("/tmp/app.jar")).unwrap(), "app.jar");
        assert_eq!(
            url_file_name(Path::new("/tmp/app v2#1.jar")).unwrap(),
            "app%20v2%231.jar"
        );
        assert_eq!(url_file_name(Path::new("100%.jar")).unwrap(), "100%25.jar");
    }
}
