//! # Configuration
//!
//! Two layers feed the server:
//!
//! - [`ServerConfig`] - the deployment surface (port, credentials, upload
//!   directory, static roots). Read from a YAML file whose keys match the
//!   recorder's existing `config.yml` (`serverPort`, `basicAuth`,
//!   `uploadTempDir`), then overridden by environment variables.
//! - [`RuntimeConfig`] - coroutine runtime tuning read from the environment.
//!
//! ## Environment Variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `MEDIAGATE_PORT` | overrides `serverPort` |
//! | `MEDIAGATE_EVENT_PORT` | overrides `eventPort` |
//! | `MEDIAGATE_UPLOAD_DIR` | overrides `uploadTempDir` |
//! | `MEDIAGATE_BASIC_AUTH` | `user:password`, enables the access gate |
//! | `MEDIAGATE_STACK_SIZE` | coroutine stack size, decimal or `0x` hex |
//!
//! ```yaml
//! serverPort: 8888
//! uploadTempDir: ./data/upload
//! basicAuth:
//!   user: admin
//!   password: secret
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Credentials for the optional HTTP Basic access gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub user: String,
    pub password: String,
}

/// Extra static directory mounted under its own prefix (vendored assets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRoot {
    pub prefix: String,
    pub dir: PathBuf,
}

/// Directories backing the fixed static prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticRoots {
    /// Served at `/`
    pub html: PathBuf,
    /// Client bundle, served at `/js`
    pub client: PathBuf,
    pub css: PathBuf,
    pub img: PathBuf,
    pub icon: PathBuf,
    pub thumbnail: PathBuf,
    /// HLS / DASH segments, served at `/streamfiles`
    pub stream_files: PathBuf,
    pub vendor: Vec<VendorRoot>,
}

impl Default for StaticRoots {
    fn default() -> Self {
        Self {
            html: PathBuf::from("html"),
            client: PathBuf::from("dist/client"),
            css: PathBuf::from("dist/css"),
            img: PathBuf::from("img"),
            icon: PathBuf::from("icon"),
            thumbnail: PathBuf::from("data/thumbnail"),
            stream_files: PathBuf::from("data/streamfiles"),
            vendor: vec![
                VendorRoot {
                    prefix: "/material-design-icons".to_string(),
                    dir: PathBuf::from("node_modules/material-design-icons"),
                },
                VendorRoot {
                    prefix: "/material-design-lite".to_string(),
                    dir: PathBuf::from("node_modules/material-design-lite"),
                },
            ],
        }
    }
}

/// Server configuration as handed to the composition root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub server_port: u16,
    pub bind_address: String,
    /// Port of the event (SSE) channel; `serverPort + 1` when unset
    pub event_port: Option<u16>,
    pub basic_auth: Option<BasicAuthConfig>,
    pub upload_temp_dir: PathBuf,
    pub contract_path: PathBuf,
    pub static_roots: StaticRoots,
    pub json_limit_bytes: usize,
    pub text_limit_bytes: usize,
    /// Limit for each non-file multipart field
    pub field_limit_bytes: usize,
    /// Upload files older than this are removed at startup; `None` disables the sweep
    pub stale_upload_secs: Option<u64>,
    /// Outbound queue depth per live connection before it counts as slow
    pub subscriber_queue: usize,
    pub heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            event_port: None,
            basic_auth: None,
            upload_temp_dir: PathBuf::from("./data/upload"),
            contract_path: PathBuf::from("api.yml"),
            static_roots: StaticRoots::default(),
            json_limit_bytes: 1024 * 1024,
            text_limit_bytes: 1024 * 1024,
            field_limit_bytes: 64 * 1024,
            stale_upload_secs: Some(24 * 60 * 60),
            subscriber_queue: 64,
            heartbeat_secs: 15,
        }
    }
}

impl ServerConfig {
    /// Load a YAML (or JSON) configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(config)
    }

    /// Apply `MEDIAGATE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("MEDIAGATE_PORT") {
            self.server_port = port
                .parse()
                .with_context(|| format!("MEDIAGATE_PORT is not a port: {port}"))?;
        }
        if let Some(port) = lookup("MEDIAGATE_EVENT_PORT") {
            self.event_port = Some(
                port.parse()
                    .with_context(|| format!("MEDIAGATE_EVENT_PORT is not a port: {port}"))?,
            );
        }
        if let Some(dir) = lookup("MEDIAGATE_UPLOAD_DIR") {
            self.upload_temp_dir = PathBuf::from(dir);
        }
        if let Some(creds) = lookup("MEDIAGATE_BASIC_AUTH") {
            let (user, password) = creds
                .split_once(':')
                .context("MEDIAGATE_BASIC_AUTH must be user:password")?;
            self.basic_auth = Some(BasicAuthConfig {
                user: user.to_string(),
                password: password.to_string(),
            });
        }
        Ok(())
    }

    /// Reject port settings the server cannot listen with.
    ///
    /// `may_minihttp` binds internally and never reports an ephemeral port
    /// back, so `serverPort` must be fixed.
    pub fn check_ports(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("serverPort must be a fixed port, 0 is not supported");
        }
        if self.event_port() == self.server_port {
            anyhow::bail!(
                "eventPort {} collides with serverPort; set eventPort explicitly",
                self.event_port()
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn event_port(&self) -> u16 {
        self.event_port
            .unwrap_or_else(|| self.server_port.saturating_add(1))
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.server_port)
    }

    #[must_use]
    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.event_port())
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 64 KB / 0x10000)
    pub stack_size: usize,
}

impl RuntimeConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = env::var("MEDIAGATE_STACK_SIZE")
            .ok()
            .and_then(|val| parse_stack_size(&val))
            .unwrap_or(DEFAULT_STACK_SIZE);
        RuntimeConfig { stack_size }
    }

    /// Apply to the `may` runtime. Call once, before the server starts.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}

fn parse_stack_size(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}
