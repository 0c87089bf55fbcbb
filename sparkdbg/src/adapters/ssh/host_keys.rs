// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::Path;

use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh::keys::ssh_key::PublicKey;

use super::error::HostKeyRejected;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyVerdict {
    Known,
    /// Not in known_hosts before; recorded on first use.
    Learned,
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Check `key` against known_hosts under the host name and the resolved IP.
/// Unknown keys are learned; a changed key is rejected.
pub fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> Result<HostKeyVerdict, HostKeyRejected> {
    let port = addr.port();
    let rejected = |reason: String| {
        log::warn!("server key validation failed for {host}:{port}: {reason}");
        HostKeyRejected {
            host: host.to_string(),
            port,
            reason,
        }
    };

    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }
    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(HostKeyVerdict::Known),
            Ok(false) => {}
            Err(err) => return Err(rejected(err.to_string())),
        }
    }

    log::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path)
        .map_err(|err| rejected(format!("failed to record server key: {err}")))?;
    Ok(HostKeyVerdict::Learned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::public::{Ed25519PublicKey, KeyData};

    fn key(seed: u8) -> PublicKey {
        PublicKey::new(KeyData::Ed25519(Ed25519PublicKey([seed; 32])), "")
    }

    #[test]
    fn unknown_key_is_learned_then_known() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let addr: SocketAddr = "10.1.2.3:22".parse().unwrap();

        let first = verify_server_key("c1-ssh.example.net", addr, &key(7), Some(&path)).unwrap();
        let second = verify_server_key("c1-ssh.example.net", addr, &key(7), Some(&path)).unwrap();

        assert_eq!(first, HostKeyVerdict::Learned);
        assert_eq!(second, HostKeyVerdict::Known);
        assert!(std::fs::read_to_string(&path).unwrap().contains("c1-ssh.example.net"));
    }

    #[test]
    fn changed_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let addr: SocketAddr = "10.1.2.3:22".parse().unwrap();
        verify_server_key("c1-ssh.example.net", addr, &key(7), Some(&path)).unwrap();

        let err = verify_server_key("c1-ssh.example.net", addr, &key(9), Some(&path)).unwrap_err();

        assert_eq!(err.host, "c1-ssh.example.net");
        assert_eq!(err.port, 22);
    }
}
