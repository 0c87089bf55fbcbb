// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Azure Storage SharedKey request signing (blob and dfs endpoints).

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{HttpAuth, HttpRequest};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeyCredential {
    pub fn new(account: impl Into<String>, key: &str) -> AppResult<Self> {
        let account = account.into();
        if account.trim().is_empty() {
            return Err(AppError::configuration("storage account name is empty"));
        }
        if key.trim().is_empty() {
            return Err(AppError::configuration(format!(
                "access key for storage account '{account}' is empty"
            )));
        }
        let key = BASE64.decode(key.trim()).map_err(|err| {
            AppError::configuration(format!(
                "access key for storage account '{account}' is not valid base64: {err}"
            ))
        })?;
        Ok(Self { account, key })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Attach the `Authorization` header. `x-ms-date` must already be set.
    pub fn authorize(&self, mut request: HttpRequest) -> AppResult<HttpRequest> {
        let signature = self.sign(&request)?;
        request.auth = None;
        request
            .headers
            .push(("Authorization".to_string(), signature));
        Ok(request)
    }

    pub fn sign(&self, request: &HttpRequest) -> AppResult<String> {
        let to_sign = string_to_sign(&self.account, request)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| AppError::internal(format!("failed to initialise hmac: {err}")))?;
        mac.update(to_sign.as_bytes());
        let digest = BASE64.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{}", self.account, digest))
    }
}

/// Bearer authorization for token-based uploads.
pub(crate) fn bearer(token: &str) -> Option<HttpAuth> {
    Some(HttpAuth::Bearer(token.to_string()))
}

pub(crate) fn string_to_sign(account: &str, request: &HttpRequest) -> AppResult<String> {
    let url = Url::parse(&request.url).map_err(|err| {
        AppError::configuration(format!("invalid storage url {}: {err}", request.url))
    })?;

    let header = |name: &str| request.header_value(name).unwrap_or("").to_string();
    let content_length = match request.body.len() {
        0 => String::new(),
        len => len.to_string(),
    };

    let mut canonical_headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("x-ms-") {
            canonical_headers.insert(lower, value.trim().to_string());
        }
    }

    let mut out = String::new();
    for part in [
        request.method.as_str().to_string(),
        header("Content-Encoding"),
        header("Content-Language"),
        content_length,
        header("Content-MD5"),
        header("Content-Type"),
        String::new(),
        header("If-Modified-Since"),
        header("If-Match"),
        header("If-None-Match"),
        header("If-Unmodified-Since"),
        header("Range"),
    ] {
        out.push_str(&part);
        out.push('\n');
    }
    for (name, value) in &canonical_headers {
        out.push_str(&format!("{name}:{value}\n"));
    }
    out.push_str(&canonical_resource(account, &url));
    Ok(out)
}

fn canonical_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account, url.path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        resource.push_str(&format!("\n{}:{}", name, values.join(",")));
    }
    resource
}
