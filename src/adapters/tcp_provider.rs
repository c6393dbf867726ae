//! TCP transport provider.
//!
//! Implements [`TransportProvider`](crate::transport::TransportProvider):
//! opens a TCP connection to the device's control port and proves
//! possession of the pairing secret before handing the stream to the
//! tunnel layer.
//!
//! ## Connection model
//!
//! 1. `connect()` opens a blocking TCP stream with the configured connect
//!    and I/O timeouts.
//! 2. The host sends `StartSession` (label, HostID, SystemBUID).
//! 3. The device answers with a 32-byte `Challenge` nonce.
//! 4. The host answers `ProveIdentity` with `HMAC-SHA256(secret, nonce)`.
//! 5. The device confirms with an empty `Result`, or a `Result` carrying
//!    an `Error` string, which surfaces as a handshake error.
//!
//! The stream itself is plaintext; record-layer encryption belongs to the
//! secure-transport collaborator and is not modelled here.

use core::fmt;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pairing::PairingCredential;
use crate::transport::{Transport, TransportProvider};

// ───────────────────────────────────────────────────────────────
// Pairing proof messages
// ───────────────────────────────────────────────────────────────

/// Messages of the pairing proof exchange, framed with
/// [`codec::write_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Request")]
pub enum PairingMessage {
    StartSession {
        #[serde(rename = "Label")]
        label: String,
        #[serde(rename = "HostID")]
        host_id: String,
        #[serde(rename = "SystemBUID")]
        system_buid: String,
    },
    Challenge {
        #[serde(rename = "Nonce")]
        nonce: String,
    },
    ProveIdentity {
        #[serde(rename = "Proof")]
        proof: String,
    },
    Result {
        #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Parse a device address given as dotted IPv4 text into an endpoint on
/// `port`.
pub fn device_endpoint(ip: &str, port: u16) -> Result<SocketAddr> {
    let addr: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| Error::Input(format!("invalid IPv4 address: {ip:?}")))?;
    if port == 0 {
        return Err(Error::Input("device port must be non-zero".into()));
    }
    Ok(SocketAddr::new(IpAddr::V4(addr), port))
}

// ───────────────────────────────────────────────────────────────
// TcpTransport
// ───────────────────────────────────────────────────────────────

/// Authenticated TCP stream to the device.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Wrap an already connected stream (no pairing proof is performed).
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map_err(|e| Error::io("query peer address", e))?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Shut both directions of the socket down.
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("tcp: shutdown of {} failed: {}", self.peer, e);
        }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => {
                    info!("tcp: {} closed the connection (EOF)", self.peer);
                    return Err(Error::closed("device closed the connection"));
                }
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io("socket read", e)),
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .map_err(|e| Error::io("socket write", e))
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(|e| Error::io("socket flush", e))
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport").field("peer", &self.peer).finish()
    }
}

// ───────────────────────────────────────────────────────────────
// TcpProvider
// ───────────────────────────────────────────────────────────────

/// Connects to a device endpoint and authenticates with a pairing
/// credential.
pub struct TcpProvider {
    endpoint: SocketAddr,
    pairing: PairingCredential,
    label: String,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl TcpProvider {
    pub fn new(endpoint: SocketAddr, pairing: PairingCredential, config: &ClientConfig) -> Self {
        Self {
            endpoint,
            pairing,
            label: config.label.clone(),
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn prove_identity(&self, transport: &mut TcpTransport) -> Result<()> {
        codec::write_json(
            transport,
            &PairingMessage::StartSession {
                label: self.label.clone(),
                host_id: self.pairing.host_id().to_string(),
                system_buid: self.pairing.system_buid().to_string(),
            },
        )?;

        let nonce = match codec::read_json::<_, PairingMessage>(transport) {
            Ok(PairingMessage::Challenge { nonce }) => BASE64
                .decode(nonce)
                .map_err(|_| Error::Handshake("challenge nonce is not base64".into()))?,
            Ok(PairingMessage::Result { error: Some(e) }) => {
                return Err(Error::Handshake(format!("device rejected session: {e}")));
            }
            Ok(other) => {
                return Err(Error::Handshake(format!(
                    "expected challenge, got {other:?}"
                )));
            }
            Err(e) if e.kind() == crate::error::ErrorKind::ProtocolViolation => {
                return Err(Error::Handshake(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let proof = self.pairing.prove(&nonce);
        codec::write_json(
            transport,
            &PairingMessage::ProveIdentity {
                proof: BASE64.encode(proof),
            },
        )?;

        match codec::read_json::<_, PairingMessage>(transport) {
            Ok(PairingMessage::Result { error: None }) => Ok(()),
            Ok(PairingMessage::Result { error: Some(e) }) => {
                warn!("tcp: device rejected pairing proof: {}", e);
                Err(Error::Handshake(format!("pairing proof rejected: {e}")))
            }
            Ok(other) => Err(Error::Handshake(format!(
                "expected proof result, got {other:?}"
            ))),
            Err(e) if e.kind() == crate::error::ErrorKind::ProtocolViolation => {
                Err(Error::Handshake(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

impl TransportProvider for TcpProvider {
    type Transport = TcpTransport;

    fn connect(&self) -> Result<TcpTransport> {
        info!("tcp: connecting to {} as {:?}", self.endpoint, self.label);
        let stream = TcpStream::connect_timeout(&self.endpoint, self.connect_timeout)
            .map_err(|e| Error::io("connect to device", e))?;
        stream
            .set_read_timeout(self.io_timeout)
            .and_then(|()| stream.set_write_timeout(self.io_timeout))
            .map_err(|e| Error::io("configure socket timeouts", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::io("configure socket", e))?;

        let mut transport = TcpTransport::from_stream(stream)?;
        if let Err(e) = self.prove_identity(&mut transport) {
            transport.shutdown();
            return Err(e);
        }
        info!("tcp: authenticated to {}", self.endpoint);
        Ok(transport)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
