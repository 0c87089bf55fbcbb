// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Livy batch REST client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    BatchLog, HttpAuth, HttpBody, HttpMethod, HttpPort, HttpRequest, HttpResponse,
    JobSubmissionPort,
};
use crate::app::types::{BatchInfo, BatchRequest, BatchState};

const REQUESTED_BY: &str = "sparkdbg";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    id: i64,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    app_info: Option<AppInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppInfo {
    #[serde(default)]
    driver_log_url: Option<String>,
    #[serde(default)]
    spark_ui_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    #[serde(default)]
    from: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    log: Vec<String>,
}

impl From<BatchResponse> for BatchInfo {
    fn from(response: BatchResponse) -> Self {
        let app_info = response.app_info.unwrap_or_default();
        BatchInfo {
            id: response.id,
            state: response
                .state
                .as_deref()
                .map(BatchState::parse)
                .unwrap_or(BatchState::Unknown),
            app_id: non_empty(response.app_id),
            driver_log_url: non_empty(app_info.driver_log_url),
            spark_ui_url: non_empty(app_info.spark_ui_url),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != "null")
}

pub struct LivyClient {
    base_url: String,
    auth: Option<HttpAuth>,
    http: Arc<dyn HttpPort>,
}

impl LivyClient {
    pub fn new(
        livy_url: &str,
        auth: Option<HttpAuth>,
        http: Arc<dyn HttpPort>,
    ) -> AppResult<Self> {
        let base_url = livy_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(AppError::configuration("cluster Livy URL is empty"));
        }
        url::Url::parse(base_url).map_err(|err| {
            AppError::configuration(format!("invalid Livy URL '{base_url}': {err}"))
        })?;
        Ok(Self {
            base_url: base_url.to_string(),
            auth,
            http,
        })
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{path}", self.base_url))
            .header("X-Requested-By", REQUESTED_BY)
            .auth(self.auth.clone())
    }

    async fn send(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        let label = format!("{} {}", request.method.as_str(), request.url);
        let response = self.http.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        Err(api_error(&label, &response))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> AppResult<T> {
        let label = format!("{} {}", request.method.as_str(), request.url);
        let response = self.send(request).await?;
        serde_json::from_slice(&response.body).map_err(|err| {
            AppError::remote(format!("failed to parse response of {label}: {err}"))
        })
    }
}

fn api_error(label: &str, response: &HttpResponse) -> AppError {
    let text = response.text();
    let text = text.trim();
    let message = if text.is_empty() {
        format!("{label} returned {}", response.status)
    } else {
        format!("{label} returned {}: {text}", response.status)
    };
    match response.status {
        401 => AppError::with_message(
            AppErrorKind::Unauthenticated,
            codes::AUTHENTICATION_FAILURE,
            message,
        ),
        403 => AppError::with_message(
            AppErrorKind::PermissionDenied,
            codes::PERMISSION_DENIED,
            message,
        ),
        404 => AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message),
        _ => AppError::remote(message),
    }
}

#[async_trait]
impl JobSubmissionPort for LivyClient {
    #[tracing::instrument(name = "livy", level = "debug", skip_all, fields(op = "submit"))]
    async fn submit_batch(&self, request: &BatchRequest) -> AppResult<BatchInfo> {
        let body = serde_json::to_value(request)
            .map_err(|err| AppError::internal(format!("failed to encode batch request: {err}")))?;
        let response: BatchResponse = self
            .send_json(self.request(HttpMethod::Post, "/batches").body(HttpBody::Json(body)))
            .await?;
        Ok(response.into())
    }

    async fn get_batch(&self, batch_id: i64) -> AppResult<BatchInfo> {
        let response: BatchResponse = self
            .send_json(self.request(HttpMethod::Get, &format!("/batches/{batch_id}")))
            .await?;
        Ok(response.into())
    }

    async fn get_batch_log(&self, batch_id: i64, from: u64, size: u64) -> AppResult<BatchLog> {
        let response: LogResponse = self
            .send_json(self.request(
                HttpMethod::Get,
                &format!("/batches/{batch_id}/log?from={from}&size={size}"),
            ))
            .await?;
        Ok(BatchLog {
            from: response.from,
            total: response.total,
            lines: response.log,
        })
    }

    #[tracing::instrument(name = "livy", level = "debug", skip(self), fields(op = "kill"))]
    async fn kill_batch(&self, batch_id: i64) -> AppResult<()> {
        match self
            .send(self.request(HttpMethod::Delete, &format!("/batches/{batch_id}")))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone.
            Err(err) if err.kind() == AppErrorKind::NotFound => {
                tracing::debug!(batch_id, "batch not found while killing");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::deploy::testing::{RecordingHttp, json, status};

    fn client(http: Arc<RecordingHttp>) -> LivyClient {
        LivyClient::new(
            "https://c1.azurehdinsight.net/livy/",
            Some(HttpAuth::Basic {
                username: "admin".to_string(),
                password: "secret".to_string(),
            }),
            http,
        )
        .unwrap()
    }

    fn batch_request() -> BatchRequest {
        BatchRequest {
            file: "wasbs://c@a.blob.core.windows.net/SparkSubmission/1/app.jar".to_string(),
            class_name: "com.example.Main".to_string(),
            args: vec!["--in".to_string()],
            jars: Vec::new(),
            files: Vec::new(),
            py_files: Vec::new(),
            driver_memory: None,
            driver_cores: None,
            executor_memory: None,
            executor_cores: None,
            num_executors: Some(2),
            conf: Default::default(),
            name: None,
        }
    }

    #[tokio::test]
    async fn submit_posts_camel_case_body_with_headers() {
        let http = Arc::new(RecordingHttp::with_responses(vec![json(
            201,
            json!({"id": 7, "state": "starting", "appId": null, "appInfo": {"driverLogUrl": null}}),
        )]));

        let info = client(http.clone()).submit_batch(&batch_request()).await.unwrap();

        assert_eq!(info.id, 7);
        assert_eq!(info.state, BatchState::Starting);
        assert_eq!(info.driver_log_url, None);
        let requests = http.recorded();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "https://c1.azurehdinsight.net/livy/batches");
        assert_eq!(requests[0].header_value("x-requested-by"), Some("sparkdbg"));
        assert!(matches!(requests[0].auth, Some(HttpAuth::Basic { .. })));
        let HttpBody::Json(body) = &requests[0].body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body["className"], "com.example.Main");
        assert_eq!(body["numExecutors"], 2);
        assert!(body.get("jars").is_none());
    }

    #[tokio::test]
    async fn get_batch_reads_app_info() {
        let http = Arc::new(RecordingHttp::with_responses(vec![json(
            200,
            json!({
                "id": 7,
                "state": "running",
                "appId": "application_1_0001",
                "appInfo": {
                    "driverLogUrl": "http://wn0.internal:30060/node/containerlogs/container_1_0001_01_000001/livy",
                    "sparkUiUrl": "https://c1.azurehdinsight.net/yarnui/hn/proxy/application_1_0001/"
                }
            }),
        )]));

        let info = client(http).get_batch(7).await.unwrap();

        assert_eq!(info.state, BatchState::Running);
        assert_eq!(info.app_id.as_deref(), Some("application_1_0001"));
        assert!(info.driver_log_url.unwrap().contains("wn0.internal:30060"));
        assert!(info.spark_ui_url.is_some());
    }

    #[tokio::test]
    async fn log_page_passes_offsets() {
        let http = Arc::new(RecordingHttp::with_responses(vec![json(
            200,
            json!({"id": 7, "from": 100, "total": 102, "log": ["a", "b"]}),
        )]));

        let page = client(http.clone()).get_batch_log(7, 100, 50).await.unwrap();

        assert_eq!(page.from, 100);
        assert_eq!(page.total, 102);
        assert_eq!(page.lines, vec!["a".to_string(), "b".to_string()]);
        assert!(http.recorded()[0].url.ends_with("/batches/7/log?from=100&size=50"));
    }

    #[tokio::test]
    async fn status_codes_map_to_error_kinds() {
        let http = Arc::new(RecordingHttp::with_responses(vec![
            status(401),
            status(403),
            status(500),
        ]));
        let livy = client(http);

        assert_eq!(livy.get_batch(1).await.unwrap_err().code(), codes::AUTHENTICATION_FAILURE);
        assert_eq!(livy.get_batch(1).await.unwrap_err().code(), codes::PERMISSION_DENIED);
        assert_eq!(livy.get_batch(1).await.unwrap_err().code(), codes::REMOTE_ERROR);
    }

    #[tokio::test]
    async fn killing_a_missing_batch_succeeds() {
        let http = Arc::new(RecordingHttp::with_responses(vec![status(404), status(503)]));
        let livy = client(http.clone());

        livy.kill_batch(3).await.unwrap();
        assert!(livy.kill_batch(3).await.is_err());
        assert_eq!(http.recorded()[0].method, HttpMethod::Delete);
    }

    #[tokio::test]
    async fn malformed_json_is_a_remote_error() {
        let http = Arc::new(RecordingHttp::with_responses(vec![Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"<html>gateway</html>".to_vec(),
        })]));

        let err = client(http).get_batch(1).await.unwrap_err();

        assert_eq!(err.code(), codes::REMOTE_ERROR);
    }

    #[test]
    fn empty_url_is_a_configuration_error() {
        let err = LivyClient::new(" ", None, Arc::new(RecordingHttp::default()))
            .err()
            .unwrap();
        assert_eq!(err.code(), codes::CONFIGURATION_ERROR);
    }
}
