// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{BatchInfo, BatchRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLog {
    pub from: u64,
    pub total: u64,
    pub lines: Vec<String>,
}

#[async_trait]
/// Livy-compatible batch API.
pub trait JobSubmissionPort: Send + Sync {
    async fn submit_batch(&self, request: &BatchRequest) -> AppResult<BatchInfo>;

    async fn get_batch(&self, batch_id: i64) -> AppResult<BatchInfo>;

    async fn get_batch_log(&self, batch_id: i64, from: u64, size: u64) -> AppResult<BatchLog>;

    async fn kill_batch(&self, batch_id: i64) -> AppResult<()>;
}
