// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::LineSource;

#[async_trait]
/// Access to YARN NodeManager container logs.
pub trait ContainerLogPort: Send + Sync {
    /// Map an internal NodeManager URI (`http://host:port`) to a base URI
    /// reachable from this machine, e.g. through the cluster gateway.
    async fn resolve_public_base(&self, host_uri: &str) -> AppResult<String>;

    /// Container `stdout`/`stderr` content starting at byte `offset`.
    async fn fetch_log(
        &self,
        base_uri: &str,
        container_id: &str,
        stream: LineSource,
        offset: u64,
    ) -> AppResult<String>;
}
