// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! YARN NodeManager container logs, optionally proxied by the cluster gateway.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ContainerLogPort, HttpAuth, HttpMethod, HttpPort, HttpRequest};
use crate::app::types::LineSource;

/// Container owner segment of the log URL; Livy runs batches as `livy`.
pub const DEFAULT_LOG_USER: &str = "livy";

pub struct NodeManagerLogs {
    gateway_url: Option<String>,
    user: String,
    auth: Option<HttpAuth>,
    http: Arc<dyn HttpPort>,
}

impl NodeManagerLogs {
    pub fn new(
        gateway_url: Option<&str>,
        user: impl Into<String>,
        auth: Option<HttpAuth>,
        http: Arc<dyn HttpPort>,
    ) -> Self {
        Self {
            gateway_url: gateway_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            user: user.into(),
            auth,
            http,
        }
    }
}

fn stream_name(stream: LineSource) -> &'static str {
    match stream {
        LineSource::Stdout => "stdout",
        LineSource::Stderr => "stderr",
        LineSource::System => "syslog",
    }
}

/// Text of the first `<pre>` block of a NodeManager log page, or the body
/// itself when it is not HTML.
fn log_text(body: &str) -> String {
    let Some(open) = body.find("<pre") else {
        return body.to_string();
    };
    let Some(start) = body[open..].find('>').map(|i| open + i + 1) else {
        return String::new();
    };
    let end = body[start..]
        .find("</pre>")
        .map(|i| start + i)
        .unwrap_or(body.len());
    unescape(&body[start..end])
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl ContainerLogPort for NodeManagerLogs {
    async fn resolve_public_base(&self, host_uri: &str) -> AppResult<String> {
        let Some(gateway) = &self.gateway_url else {
            return Ok(host_uri.trim_end_matches('/').to_string());
        };
        let url = Url::parse(host_uri).map_err(|err| {
            AppError::configuration(format!("invalid NodeManager URI '{host_uri}': {err}"))
        })?;
        let host = url.host_str().ok_or_else(|| {
            AppError::configuration(format!("NodeManager URI '{host_uri}' has no host"))
        })?;
        Ok(format!("{gateway}/yarnui/{host}"))
    }

    async fn fetch_log(
        &self,
        base_uri: &str,
        container_id: &str,
        stream: LineSource,
        offset: u64,
    ) -> AppResult<String> {
        let url = format!(
            "{}/node/containerlogs/{container_id}/{}/{}/?start={offset}",
            base_uri.trim_end_matches('/'),
            self.user,
            stream_name(stream),
        );
        let request = HttpRequest::new(HttpMethod::Get, url.clone()).auth(self.auth.clone());
        let response = self.http.send(request).await?;
        if !response.is_success() {
            let code = if response.status == 404 {
                (AppErrorKind::NotFound, codes::NOT_FOUND)
            } else {
                (AppErrorKind::Unavailable, codes::REMOTE_ERROR)
            };
            return Err(AppError::with_message(
                code.0,
                code.1,
                format!("GET {url} returned {}", response.status),
            ));
        }
        Ok(log_text(&response.text()))
    }
}
