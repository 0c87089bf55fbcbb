// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Upload through a short-lived interactive Livy session.
//!
//! The artifact is attached to a `spark` session with `upload-file`, then a
//! Scala statement copies it from the session's local `SparkFiles` directory
//! into the cluster default file system. The session is always deleted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::app::deploy::{
    artifact_file_name, date_partition, expect_success, read_artifact, submission_root,
    upload_error,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, HttpAuth, HttpBody, HttpMethod, HttpPort, HttpRequest};

const MAX_POLLS: u32 = 600;

pub struct LivySessionDeploy {
    livy_url: String,
    auth: Option<HttpAuth>,
    destination_root: String,
    poll_interval: Duration,
    http: Arc<dyn HttpPort>,
    clock: Arc<dyn ClockPort>,
}

impl LivySessionDeploy {
    pub fn new(
        livy_url: &str,
        auth: Option<HttpAuth>,
        poll_interval: Duration,
        http: Arc<dyn HttpPort>,
        clock: Arc<dyn ClockPort>,
    ) -> AppResult<Self> {
        let livy_url = livy_url.trim().trim_end_matches('/');
        if livy_url.is_empty() {
            return Err(AppError::configuration("cluster Livy URL is empty"));
        }
        Ok(Self {
            livy_url: livy_url.to_string(),
            auth,
            destination_root: submission_root("/"),
            poll_interval,
            http,
            clock,
        })
    }

    pub fn destination_root(&self) -> &str {
        &self.destination_root
    }

    pub async fn deploy(&self, artifact: &Path) -> AppResult<String> {
        let file_name = artifact_file_name(artifact)?;
        let bytes = read_artifact(artifact).await?;
        let remote = format!(
            "{}{}/{}",
            self.destination_root,
            date_partition(self.clock.as_ref()),
            file_name
        );

        let session_id = self.create_session().await?;
        let result = self
            .upload_and_copy(session_id, &file_name, bytes, &remote)
            .await;
        if let Err(err) = self.delete_session(session_id).await {
            tracing::warn!(session_id, error = %err, "failed to delete Livy upload session");
        }
        result.map(|()| remote)
    }

    async fn upload_and_copy(
        &self,
        session_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        remote: &str,
    ) -> AppResult<()> {
        self.wait_for_session(session_id).await?;

        let upload = self
            .request(
                HttpMethod::Post,
                &format!("/sessions/{session_id}/upload-file"),
            )
            .body(HttpBody::Multipart {
                field: "file".to_string(),
                file_name: file_name.to_string(),
                bytes,
            });
        self.call(upload, remote).await?;

        let code = copy_statement(file_name, remote);
        let statement = self
            .request(HttpMethod::Post, &format!("/sessions/{session_id}/statements"))
            .body(HttpBody::Json(json!({ "code": code })));
        let created = self.call(statement, remote).await?;
        let statement_id = created.get("id").and_then(Value::as_i64).ok_or_else(|| {
            upload_error(remote, "Livy did not return a statement id")
        })?;
        self.wait_for_statement(session_id, statement_id, remote)
            .await
    }

    async fn create_session(&self) -> AppResult<i64> {
        let request = self
            .request(HttpMethod::Post, "/sessions")
            .body(HttpBody::Json(json!({ "kind": "spark" })));
        let body = self.call(request, &self.livy_url).await?;
        body.get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| upload_error(&self.livy_url, "Livy did not return a session id"))
    }

    async fn wait_for_session(&self, session_id: i64) -> AppResult<()> {
        let path = format!("/sessions/{session_id}");
        for _ in 0..MAX_POLLS {
            let body = self
                .call(self.request(HttpMethod::Get, &path), &self.livy_url)
                .await?;
            match body.get("state").and_then(Value::as_str).unwrap_or_default() {
                "idle" => return Ok(()),
                state @ ("dead" | "error" | "killed" | "shutting_down") => {
                    return Err(upload_error(
                        &self.livy_url,
                        format!("upload session {session_id} ended in state '{state}'"),
                    ));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
        Err(upload_error(
            &self.livy_url,
            format!("upload session {session_id} did not become idle"),
        ))
    }

    async fn wait_for_statement(
        &self,
        session_id: i64,
        statement_id: i64,
        remote: &str,
    ) -> AppResult<()> {
        let path = format!("/sessions/{session_id}/statements/{statement_id}");
        for _ in 0..MAX_POLLS {
            let body = self.call(self.request(HttpMethod::Get, &path), remote).await?;
            match body.get("state").and_then(Value::as_str).unwrap_or_default() {
                "available" => {
                    let output = body.get("output").cloned().unwrap_or(Value::Null);
                    if output.get("status").and_then(Value::as_str) == Some("ok") {
                        return Ok(());
                    }
                    let reason = output
                        .get("evalue")
                        .and_then(Value::as_str)
                        .unwrap_or("copy statement failed");
                    return Err(upload_error(remote, reason));
                }
                state @ ("error" | "cancelled" | "cancelling") => {
                    return Err(upload_error(
                        remote,
                        format!("copy statement ended in state '{state}'"),
                    ));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
        Err(upload_error(remote, "copy statement did not complete"))
    }

    async fn delete_session(&self, session_id: i64) -> AppResult<()> {
        let request = self.request(HttpMethod::Delete, &format!("/sessions/{session_id}"));
        self.call(request, &self.livy_url).await.map(|_| ())
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{}", self.livy_url, path))
            .header("X-Requested-By", "sparkdbg")
            .auth(self.auth.clone())
    }

    async fn call(&self, request: HttpRequest, target: &str) -> AppResult<Value> {
        let response = self
            .http
            .send(request.clone())
            .await
            .map_err(|err| upload_error(target, err))?;
        let response = expect_success(&request, response)?;
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body).map_err(|err| {
            upload_error(target, format!("invalid JSON from {}: {err}", request.url))
        })
    }
}

fn copy_statement(file_name: &str, remote: &str) -> String {
    let file_name = scala_string(file_name);
    let remote = scala_string(remote);
    format!(
        "import org.apache.hadoop.fs.{{FileSystem, Path}}\n\
         import org.apache.spark.SparkFiles\n\
         val fs = FileSystem.get(sc.hadoopConfiguration)\n\
         fs.copyFromLocalFile(false, true, new Path(\"file://\" + SparkFiles.get({file_name})), new Path({remote}))\n"
    )
}

fn scala_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
