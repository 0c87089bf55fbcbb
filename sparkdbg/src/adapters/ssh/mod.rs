// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! russh-backed SSH transport with local port forwarding.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ForwardId, ForwardedPort, SshTunnelPort};
use crate::app::types::{AdvancedConfigModel, SshAuth};

mod error;
mod host_keys;

pub use error::{AuthenticationFailure, HostKeyRejected, NetError};
use host_keys::{HostKeyVerdict, verify_server_key};

/// Verifies the server key during key exchange and keeps the verdict for
/// the separate certificate step.
struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts: Option<PathBuf>,
    verdict: Arc<StdMutex<Option<HostKeyVerdict>>>,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let verdict = verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts.as_deref(),
        )?;
        *lock(&self.verdict) = Some(verdict);
        Ok(true)
    }
}

struct Connection {
    handle: Arc<Handle<ClientHandler>>,
    host: String,
    verdict: Option<HostKeyVerdict>,
}

pub struct RusshTunnel {
    config: Arc<Config>,
    connection: Mutex<Option<Connection>>,
    forwards: StdMutex<HashMap<ForwardId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Default for RusshTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl RusshTunnel {
    pub fn new() -> Self {
        let config = Config {
            // A suspended JVM keeps the session idle for long stretches.
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            connection: Mutex::new(None),
            forwards: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    async fn establish(&self, config: &AdvancedConfigModel) -> anyhow::Result<Connection> {
        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to resolve {}", config.host))?
            .next()
            .ok_or_else(|| NetError::Unresolved(config.host.clone()))?;
        let verdict = Arc::new(StdMutex::new(None));
        let handler = ClientHandler {
            host: config.host.clone(),
            addr,
            known_hosts: config.known_hosts_path.clone(),
            verdict: verdict.clone(),
        };
        log::info!("connecting to {}@{} ({addr})", config.username, config.host);
        let mut handle = russh::client::connect(self.config.clone(), addr, handler)
            .await
            .context("SSH connect failed")?;

        let result = match &config.auth {
            Some(SshAuth::Password(password)) => {
                handle
                    .authenticate_password(config.username.clone(), password.clone())
                    .await?
            }
            Some(SshAuth::KeyFile { path, passphrase }) => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .with_context(|| format!("failed to load secret key at {}", path.display()))?;
                let key = PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    handle.best_supported_rsa_hash().await?.flatten(),
                );
                handle
                    .authenticate_publickey(config.username.clone(), key)
                    .await?
            }
            None => return Err(AuthenticationFailure.into()),
        };
        if !matches!(result, AuthResult::Success) {
            log::debug!("authentication rejected for {}@{}", config.username, config.host);
            return Err(AuthenticationFailure.into());
        }
        let verdict = lock(&verdict).take();
        Ok(Connection {
            handle: Arc::new(handle),
            host: config.host.clone(),
            verdict,
        })
    }

    async fn handle(&self) -> AppResult<Arc<Handle<ClientHandler>>> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.handle.clone())
            .ok_or_else(|| map_connect_error(NetError::NotConnected.into()))
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ssh_error(err: &anyhow::Error) -> (AppErrorKind, &'static str) {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        (AppErrorKind::Unauthenticated, codes::AUTHENTICATION_FAILURE)
    } else if err.chain().any(|cause| cause.is::<HostKeyRejected>()) {
        (AppErrorKind::Unauthenticated, codes::HOST_KEY_REJECTED)
    } else {
        (AppErrorKind::Unavailable, codes::CONNECTION_FAILURE)
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    let (kind, code) = ssh_error(&err);
    AppError::with_message(kind, code, format!("ssh connect failed: {err:#}"))
}

fn map_forward_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Unavailable,
        codes::CONNECTION_FAILURE,
        format!("port forward failed: {err:#}"),
    )
}

#[async_trait]
impl SshTunnelPort for RusshTunnel {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, config),
        fields(op = "connect", host = %config.host, user = %config.username, port = config.port)
    )]
    async fn connect(&self, config: &AdvancedConfigModel) -> AppResult<()> {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().is_some_and(|c| !c.handle.is_closed()) {
            return Ok(());
        }
        let connection = self.establish(config).await.map_err(map_connect_error)?;
        *slot = Some(connection);
        Ok(())
    }

    async fn verify_host_key(&self, config: &AdvancedConfigModel) -> AppResult<()> {
        let slot = self.connection.lock().await;
        let connection = slot
            .as_ref()
            .ok_or_else(|| map_connect_error(NetError::NotConnected.into()))?;
        match connection.verdict {
            Some(HostKeyVerdict::Known) => Ok(()),
            Some(HostKeyVerdict::Learned) => {
                log::info!(
                    "host key for {}:{} recorded in known_hosts",
                    connection.host,
                    config.port
                );
                Ok(())
            }
            None => Err(map_connect_error(anyhow!(HostKeyRejected {
                host: connection.host.clone(),
                port: config.port,
                reason: "server did not present a host key".to_string(),
            }))),
        }
    }

    #[tracing::instrument(name = "ssh", level = "debug", skip(self), fields(op = "forward"))]
    async fn open_forward(&self, remote_host: &str, remote_port: u16) -> AppResult<ForwardedPort> {
        let handle = self.handle().await?;
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("failed to bind local listener")
            .map_err(map_forward_error)?;
        let local_port = listener
            .local_addr()
            .context("failed to read local listener address")
            .map_err(map_forward_error)?
            .port();
        let id = ForwardId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = tokio::spawn(accept_loop(
            listener,
            handle,
            remote_host.to_string(),
            remote_port,
        ));
        lock(&self.forwards).insert(id, task);
        log::debug!("forwarding localhost:{local_port} to {remote_host}:{remote_port}");
        Ok(ForwardedPort {
            id,
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
        })
    }

    async fn close_forward(&self, id: ForwardId) -> AppResult<()> {
        if let Some(task) = lock(&self.forwards).remove(&id) {
            task.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        for (_, task) in lock(&self.forwards).drain() {
            task.abort();
        }
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };
        if let Err(err) = connection
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!("ssh disconnect from {} failed: {err}", connection.host);
        }
    }
}

/// Accepts local connections until aborted; dropping the task closes the
/// listener and every piped connection.
async fn accept_loop(
    listener: TcpListener,
    handle: Arc<Handle<ClientHandler>>,
    remote_host: String,
    remote_port: u16,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    connections.spawn(pipe(
                        socket,
                        peer,
                        handle.clone(),
                        remote_host.clone(),
                        remote_port,
                    ));
                }
                Err(err) => {
                    log::warn!("local listener for {remote_host}:{remote_port} failed: {err}");
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn pipe(
    mut socket: TcpStream,
    peer: SocketAddr,
    handle: Arc<Handle<ClientHandler>>,
    remote_host: String,
    remote_port: u16,
) {
    let channel = match handle
        .channel_open_direct_tcpip(
            remote_host.clone(),
            u32::from(remote_port),
            peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await
    {
        Ok(channel) => channel,
        Err(err) => {
            log::warn!("direct-tcpip to {remote_host}:{remote_port} failed: {err}");
            return;
        }
    };
    let mut stream = channel.into_stream();
    match tokio::io::copy_bidirectional(&mut socket, &mut stream).await {
        Ok((sent, received)) => {
            log::debug!("{peer} -> {remote_host}:{remote_port} closed ({sent} bytes out, {received} bytes in)");
        }
        Err(err) => log::debug!("{peer} -> {remote_host}:{remote_port} ended: {err}"),
    }
}
