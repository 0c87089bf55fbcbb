// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ForwardId, ForwardedPort, SshTunnelPort};
use crate::app::types::AdvancedConfigModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opened,
    CertificateVerified,
    Closed,
}

struct Inner {
    state: SessionState,
    forwards: BTreeMap<ForwardId, ForwardedPort>,
}

/// One authenticated SSH connection shared by the driver and every executor.
///
/// `Created -> Opened -> CertificateVerified -> Closed`. Forwards can only be
/// requested once the host key is verified; `close` releases all of them.
pub struct DebugSession {
    tunnel: Arc<dyn SshTunnelPort>,
    config: AdvancedConfigModel,
    inner: Mutex<Inner>,
}

impl DebugSession {
    pub fn new(tunnel: Arc<dyn SshTunnelPort>, config: AdvancedConfigModel) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            tunnel,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                forwards: BTreeMap::new(),
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Handshake and authenticate. A failed open leaves the session closed.
    pub async fn open(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Created {
            return Err(invalid_state("open", inner.state));
        }
        if let Err(err) = self.tunnel.connect(&self.config).await {
            inner.state = SessionState::Closed;
            self.tunnel.disconnect().await;
            return Err(err);
        }
        inner.state = SessionState::Opened;
        tracing::debug!(host = %self.config.host, port = self.config.port, "ssh session opened");
        Ok(())
    }

    pub async fn verify_certificate(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Opened {
            return Err(invalid_state("verify the host key of", inner.state));
        }
        if let Err(err) = self.tunnel.verify_host_key(&self.config).await {
            inner.state = SessionState::Closed;
            self.tunnel.disconnect().await;
            return Err(err);
        }
        inner.state = SessionState::CertificateVerified;
        Ok(())
    }

    pub async fn forward(&self, remote_host: &str, remote_port: u16) -> AppResult<ForwardedPort> {
        {
            let inner = self.inner.lock().await;
            if inner.state != SessionState::CertificateVerified {
                return Err(invalid_state("forward a port through", inner.state));
            }
        }
        let forwarded = self.tunnel.open_forward(remote_host, remote_port).await?;
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            drop(inner);
            let _ = self.tunnel.close_forward(forwarded.id).await;
            return Err(invalid_state("forward a port through", SessionState::Closed));
        }
        inner.forwards.insert(forwarded.id, forwarded.clone());
        tracing::debug!(
            local_port = forwarded.local_port,
            remote = %format!("{remote_host}:{remote_port}"),
            "port forward opened"
        );
        Ok(forwarded)
    }

    /// Release one forward. Unknown or already released ids are ignored.
    pub async fn release(&self, id: ForwardId) -> AppResult<()> {
        let removed = self.inner.lock().await.forwards.remove(&id);
        match removed {
            Some(_) => self.tunnel.close_forward(id).await,
            None => Ok(()),
        }
    }

    pub async fn open_forwards(&self) -> Vec<ForwardedPort> {
        self.inner.lock().await.forwards.values().cloned().collect()
    }

    /// Tear down every forward and the transport. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return;
        }
        let was_connected = inner.state != SessionState::Created;
        inner.state = SessionState::Closed;
        let forwards = std::mem::take(&mut inner.forwards);
        for id in forwards.into_keys() {
            if let Err(err) = self.tunnel.close_forward(id).await {
                tracing::debug!(forward = id.0, error = %err, "failed to close port forward");
            }
        }
        if was_connected {
            self.tunnel.disconnect().await;
        }
        tracing::debug!(host = %self.config.host, "ssh session closed");
    }
}

fn invalid_state(action: &str, state: SessionState) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::INTERNAL_ERROR,
        format!("cannot {action} an ssh session in state {state:?}"),
    )
}
