// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Log line patterns: YARN executor launches, JDWP listen addresses and the
//! driver container log URL.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static LAUNCHING_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Launching container (?P<container>\S+).*? on host:? (?P<host>[^\s,:]+)")
        .expect("valid container launch pattern")
});

static JDWP_LISTENING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Listening for transport dt_socket at address: (?:[^\s:]+:)?(?P<port>\d+)")
        .expect("valid JDWP banner pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedContainer {
    pub container_id: String,
    pub host: String,
}

impl LaunchedContainer {
    /// Internal NodeManager URI for the container's host.
    pub fn host_uri(&self, container_log_port: u16) -> String {
        format!("http://{}:{}", self.host, container_log_port)
    }
}

/// `Launching container <id> ... on host <host>`, case-insensitive.
pub fn launched_container(line: &str) -> Option<LaunchedContainer> {
    let caps = LAUNCHING_CONTAINER.captures(line)?;
    Some(LaunchedContainer {
        container_id: caps.name("container")?.as_str().to_string(),
        host: caps.name("host")?.as_str().to_string(),
    })
}

/// Port from the JDWP agent's `Listening for transport dt_socket ...` banner.
pub fn jdwp_port(line: &str) -> Option<u16> {
    let caps = JDWP_LISTENING.captures(line)?;
    caps.name("port")?.as_str().parse().ok()
}

/// Where the driver runs, parsed from the batch `driverLogUrl`, e.g.
/// `http://wn0:30060/node/containerlogs/container_e01_..._000001/livy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverLocation {
    pub host: String,
    pub container_log_port: Option<u16>,
    pub container_id: Option<String>,
}

impl DriverLocation {
    pub fn host_uri(&self, default_port: u16) -> String {
        format!(
            "http://{}:{}",
            self.host,
            self.container_log_port.unwrap_or(default_port)
        )
    }
}

pub fn driver_location(driver_log_url: &str) -> Option<DriverLocation> {
    let url = Url::parse(driver_log_url.trim()).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?.to_string();
    let container_id = url
        .path_segments()
        .and_then(|mut segments| segments.find(|s| s.starts_with("container_")))
        .map(str::to_string);
    Some(DriverLocation {
        host,
        container_log_port: url.port(),
        container_id,
    })
}

/// Host part of `http://host:port`.
pub fn host_of(host_uri: &str) -> Option<String> {
    Url::parse(host_uri)
        .ok()?
        .host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_yarn_allocator_lines() {
        let found = launched_container("Launching container container_001 on host 10.0.0.5").unwrap();
        assert_eq!(found.container_id, "container_001");
        assert_eq!(found.host, "10.0.0.5");
        assert_eq!(found.host_uri(30060), "http://10.0.0.5:30060");

        let spark3 = "24/10/18 09:31:02 INFO YarnAllocator: Launching container \
                      container_e01_1729243812_0004_01_000002 on host wn1.internal.cloudapp.net \
                      for executor with ID 1 for ResourceProfile Id 0";
        let found = launched_container(spark3).unwrap();
        assert_eq!(found.container_id, "container_e01_1729243812_0004_01_000002");
        assert_eq!(found.host, "wn1.internal.cloudapp.net");

        let lower = launched_container("launching CONTAINER c_7 for x ON HOST: wn2, port 1").unwrap();
        assert_eq!(lower.host, "wn2");

        assert!(launched_container("Launching executor on host wn0").is_none());
    }

    #[test]
    fn parses_jdwp_banner() {
        assert_eq!(
            jdwp_port("Listening for transport dt_socket at address: 41234"),
            Some(41234)
        );
        assert_eq!(
            jdwp_port("Listening for transport dt_socket at address: wn0:5005"),
            Some(5005)
        );
        assert_eq!(jdwp_port("Listening for transport dt_shmem at address: x"), None);
    }

    #[test]
    fn parses_driver_log_url() {
        let location = driver_location(
            "http://wn0-c1.internal.cloudapp.net:30060/node/containerlogs/container_e01_1_0004_01_000001/livy",
        )
        .unwrap();
        assert_eq!(location.host, "wn0-c1.internal.cloudapp.net");
        assert_eq!(location.container_log_port, Some(30060));
        assert_eq!(
            location.container_id.as_deref(),
            Some("container_e01_1_0004_01_000001")
        );

        let no_port = driver_location("http://wn0/node/containerlogs/container_1/livy").unwrap();
        assert_eq!(no_port.host_uri(30060), "http://wn0:30060");
        assert!(driver_location("not a url").is_none());
    }

    #[test]
    fn extracts_host_from_uri() {
        assert_eq!(host_of("http://10.0.0.5:30060").as_deref(), Some("10.0.0.5"));
        assert_eq!(host_of("garbage"), None);
    }
}
