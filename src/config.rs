//! Server configuration.
//!
//! Configuration is read from a YAML file named by `WEBSERV_CONFIG`; without
//! it a single server on `127.0.0.1:8080` is used. `LISTEN=host:port`
//! overrides the listen address when exactly one server is configured.
//!
//! ```yaml
//! idle_timeout_secs: 30
//! servers:
//!   - host: 0.0.0.0
//!     port: 8080
//!     server_names: [example.com]
//!     client_max_body_size: 1048576
//!     locations:
//!       - path: /
//!         methods: [GET, POST]
//!       - path: /old
//!         redirect: { status: 301, target: /new }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    /// Connections without read/write activity for this long are closed.
    pub idle_timeout_secs: u64,
    /// Upper bound on one readiness wait, so idle sweeps run without I/O.
    pub poll_interval_ms: u64,
    pub max_header_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_names: Vec<String>,
    pub client_max_body_size: usize,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Location {
    pub path: String,
    pub methods: Vec<String>,
    pub redirect: Option<Redirect>,
    pub root: Option<String>,
    pub index: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Redirect {
    pub status: u16,
    pub target: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: vec![ServerConfig {
                host: "127.0.0.1".to_string(),
                ..ServerConfig::default()
            }],
            idle_timeout_secs: 60,
            poll_interval_ms: 1000,
            max_header_bytes: crate::http::parser::DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            server_names: Vec::new(),
            client_max_body_size: 1024 * 1024,
            locations: vec![Location::default()],
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            methods: vec!["GET".to_string(), "POST".to_string(), "DELETE".to_string()],
            redirect: None,
            root: None,
            index: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `WEBSERV_CONFIG` (or defaults) and applies
    /// the `LISTEN` override.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("WEBSERV_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.apply_listen_override(&listen)?;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(text).context("Failed to parse YAML config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            bail!("No servers configured");
        }
        for server in &self.servers {
            for location in &server.locations {
                if !location.path.starts_with('/') {
                    bail!(
                        "Location path {:?} of {} must start with '/'",
                        location.path,
                        server.listen_addr()
                    );
                }
            }
        }
        Ok(())
    }

    fn apply_listen_override(&mut self, listen: &str) -> Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("LISTEN must be host:port, got {listen:?}"))?;
        let port = port
            .parse()
            .with_context(|| format!("Invalid port in LISTEN={listen:?}"))?;

        match self.servers.as_mut_slice() {
            [server] => {
                server.host = host.to_string();
                server.port = port;
                Ok(())
            }
            _ => bail!("LISTEN can only override a single-server configuration"),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Distinct `(host, port)` pairs to listen on, in configuration order.
    pub fn listen_addrs(&self) -> Vec<(String, u16)> {
        let mut addrs: Vec<(String, u16)> = Vec::new();
        for server in &self.servers {
            let addr = (server.host.clone(), server.port);
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }

    /// Selects the server block for a request.
    ///
    /// Among servers listening on `host:port` (a `0.0.0.0` server matches any
    /// host), the first one naming `server_name` wins, otherwise the first
    /// one on that address is the default.
    pub fn find_config(&self, host: &str, port: u16, server_name: &str) -> Option<&ServerConfig> {
        let server_name = server_name
            .rsplit_once(':')
            .filter(|(_, p)| p.bytes().all(|b| b.is_ascii_digit()))
            .map_or(server_name, |(name, _)| name);

        let mut candidates = self
            .servers
            .iter()
            .filter(|s| s.port == port && (s.host == host || s.host == "0.0.0.0"));

        let default = candidates.clone().next();
        candidates
            .find(|s| {
                s.server_names
                    .iter()
                    .any(|n| n.eq_ignore_ascii_case(server_name))
            })
            .or(default)
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Longest location prefix matching `path` on a segment boundary.
    pub fn find_location(&self, path: &str) -> Option<&Location> {
        self.locations
            .iter()
            .filter(|loc| loc.matches(path))
            .max_by_key(|loc| loc.path.len())
    }
}

impl Location {
    fn matches(&self, path: &str) -> bool {
        let prefix = self.path.as_str();
        if prefix == "/" {
            return path.starts_with('/');
        }
        let prefix = prefix.trim_end_matches('/');
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_matches_on_segment_boundary() {
        let server = ServerConfig {
            locations: vec![
                Location::default(),
                Location {
                    path: "/images".to_string(),
                    ..Location::default()
                },
            ],
            ..ServerConfig::default()
        };

        assert_eq!(server.find_location("/images/a.png").unwrap().path, "/images");
        assert_eq!(server.find_location("/images").unwrap().path, "/images");
        assert_eq!(server.find_location("/imagesx").unwrap().path, "/");
    }

    #[test]
    fn server_name_port_suffix_is_ignored() {
        let cfg = Config::from_yaml_str(
            "servers:\n  - port: 80\n  - port: 80\n    server_names: [b.test]\n",
        )
        .unwrap();

        let server = cfg.find_config("127.0.0.1", 80, "b.test:80").unwrap();
        assert_eq!(server.server_names, vec!["b.test".to_string()]);
    }
}
