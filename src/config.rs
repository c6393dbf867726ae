//! Client configuration parameters
//!
//! All tunable parameters for a launch-and-debug session.  Values can be
//! loaded from a JSON file; anything missing falls back to the default.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Well-known device control port the tunnel listener is reached through.
pub const LOCKDOWN_PORT: u16 = 62078;

/// MTU requested during tunnel negotiation unless configured otherwise.
pub const DEFAULT_TUNNEL_MTU: u32 = 16_000;

/// Core client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // --- Transport ---
    /// Label the host presents to the device during pairing proof
    pub label: String,
    /// Device-side control port
    pub control_port: u16,
    /// Socket read/write timeout (milliseconds, 0 = block forever)
    pub io_timeout_ms: u64,
    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    // --- Tunnel ---
    /// MTU requested during tunnel negotiation
    pub tunnel_mtu: u32,

    // --- RPC ---
    /// Minimum RPC body size considered for DEFLATE compression (bytes)
    pub rpc_compress_threshold: usize,

    // --- Launch ---
    /// Leave the launched process suspended at its entry point
    pub start_suspended: bool,
    /// Terminate an already running instance before launching
    pub kill_existing: bool,
    /// Command-line arguments passed to the launched app
    pub arguments: Vec<String>,
    /// Extra environment for the launched app
    pub environment: BTreeMap<String, String>,

    // --- Debug ---
    /// How many times the workflow sends `D` after attaching
    pub detach_attempts: u8,
    /// Negotiate `QStartNoAckMode` before attaching
    pub disable_acks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            // Transport
            label: "ProcessDebugTest".to_string(),
            control_port: LOCKDOWN_PORT,
            io_timeout_ms: 15_000,
            connect_timeout_ms: 5_000,

            // Tunnel
            tunnel_mtu: DEFAULT_TUNNEL_MTU,

            // RPC
            rpc_compress_threshold: 1024,

            // Launch
            start_suspended: true,
            kill_existing: false,
            arguments: Vec::new(),
            environment: BTreeMap::new(),

            // Debug
            detach_attempts: 1,
            disable_acks: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::Input(format!("cannot read config {}: {e}", path.display())))?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| Error::Input(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the session unusable.
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(Error::Input("label must not be empty".into()));
        }
        if self.control_port == 0 {
            return Err(Error::Input("control_port must be non-zero".into()));
        }
        if !(1280..=65_535).contains(&self.tunnel_mtu) {
            return Err(Error::Input(format!(
                "tunnel_mtu {} outside 1280..=65535",
                self.tunnel_mtu
            )));
        }
        if self.detach_attempts == 0 {
            return Err(Error::Input("detach_attempts must be at least 1".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Input("connect_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Socket I/O timeout, `None` when blocking indefinitely.
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
