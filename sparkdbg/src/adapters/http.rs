// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, redirect};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{HttpAuth, HttpBody, HttpMethod, HttpPort, HttpRequest, HttpResponse};

const USER_AGENT: &str = concat!("sparkdbg/", env!("CARGO_PKG_VERSION"));

/// reqwest transport. Redirects are surfaced to the caller as-is.
pub struct ReqwestHttp {
    client: Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AppError::internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Post => Method::POST,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn transport_error(request: &HttpRequest, err: reqwest::Error) -> AppError {
    let (kind, code) = if err.is_builder() {
        (AppErrorKind::InvalidArgument, codes::CONFIGURATION_ERROR)
    } else {
        (AppErrorKind::Unavailable, codes::CONNECTION_FAILURE)
    };
    AppError::with_message(
        kind,
        code,
        format!("{} {} failed: {err}", request.method.as_str(), request.url),
    )
}

#[async_trait]
impl HttpPort for ReqwestHttp {
    #[tracing::instrument(
        name = "http",
        level = "debug",
        skip(self, request),
        fields(method = request.method.as_str(), url = %request.url, bytes = request.body.len())
    )]
    async fn send(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        let mut builder = self.client.request(method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.auth {
            Some(HttpAuth::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(HttpAuth::Bearer(token)) => builder.bearer_auth(token),
            None => builder,
        };
        builder = match request.body.clone() {
            HttpBody::Empty => builder,
            HttpBody::Bytes(bytes) => builder.body(bytes),
            HttpBody::Json(value) => builder.json(&value),
            HttpBody::Multipart {
                field,
                file_name,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(&request, err))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(&request, err))?
            .to_vec();
        tracing::debug!(status, "response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
