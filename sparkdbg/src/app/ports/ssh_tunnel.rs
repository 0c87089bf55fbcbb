// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::AdvancedConfigModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForwardId(pub u64);

/// A local listener tunnelled to `remote_host:remote_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedPort {
    pub id: ForwardId,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

#[async_trait]
/// One SSH transport. The debug session drives its lifecycle.
pub trait SshTunnelPort: Send + Sync {
    /// TCP connect, key exchange and user authentication.
    async fn connect(&self, config: &AdvancedConfigModel) -> AppResult<()>;

    /// Check the server key recorded during `connect` against known_hosts.
    async fn verify_host_key(&self, config: &AdvancedConfigModel) -> AppResult<()>;

    async fn open_forward(&self, remote_host: &str, remote_port: u16) -> AppResult<ForwardedPort>;

    async fn close_forward(&self, id: ForwardId) -> AppResult<()>;

    async fn disconnect(&self);
}
