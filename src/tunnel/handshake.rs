//! CDTunnel negotiation messages.
//!
//! ```text
//! ┌────────────────┬──────────────┬─────────────────────┐
//! │ "CDTunnel" (8B)│ length BE u16│ JSON body (N B)     │
//! └────────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! The host sends one `clientHandshakeRequest`; the device answers with
//! one `serverHandshakeResponse` carrying the tunnel addresses, the MTU
//! and the port the service catalog (RSD) listens on.

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Transport;

pub const TUNNEL_MAGIC: &[u8; 8] = b"CDTunnel";

pub const CLIENT_HANDSHAKE_REQUEST: &str = "clientHandshakeRequest";
pub const SERVER_HANDSHAKE_RESPONSE: &str = "serverHandshakeResponse";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub mtu: u32,
}

impl HandshakeRequest {
    pub fn new(mtu: u32) -> Self {
        Self {
            kind: CLIENT_HANDSHAKE_REQUEST.to_string(),
            mtu,
        }
    }
}

/// Addressing the device assigned to the host end of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParameters {
    pub address: String,
    pub netmask: String,
    pub mtu: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "clientParameters")]
    pub client_parameters: ClientParameters,
    #[serde(rename = "serverAddress")]
    pub server_address: String,
    #[serde(rename = "serverRSDPort")]
    pub server_rsd_port: u16,
}

impl HandshakeResponse {
    /// Reject responses the tunnel cannot be built on.
    pub fn validate(&self) -> Result<()> {
        if self.kind != SERVER_HANDSHAKE_RESPONSE {
            return Err(Error::Handshake(format!(
                "unexpected handshake type {:?}",
                self.kind
            )));
        }
        if self.server_rsd_port == 0 {
            return Err(Error::Handshake("device advertised RSD port 0".into()));
        }
        if self.client_parameters.mtu == 0 {
            return Err(Error::Handshake("device advertised MTU 0".into()));
        }
        Ok(())
    }
}

/// Send one CDTunnel message.
pub fn write_message<T, M>(transport: &mut T, msg: &M) -> Result<()>
where
    T: Transport + ?Sized,
    M: Serialize,
{
    let body = serde_json::to_vec(msg)
        .map_err(|e| Error::Input(format!("unserialisable handshake message: {e}")))?;
    let len = u16::try_from(body.len())
        .map_err(|_| Error::Input("handshake message exceeds 65535 bytes".into()))?;

    let mut out = Vec::with_capacity(TUNNEL_MAGIC.len() + 2 + body.len());
    out.extend_from_slice(TUNNEL_MAGIC);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    debug!("tunnel: -> handshake ({} byte body)", body.len());
    transport.write_all(&out)?;
    transport.flush()
}

/// Receive one CDTunnel message.  Framing or JSON problems are handshake
/// errors; a dropped stream stays a transport error.
pub fn read_message<T, M>(transport: &mut T) -> Result<M>
where
    T: Transport + ?Sized,
    M: DeserializeOwned,
{
    let mut magic = [0u8; 8];
    transport.read_exact(&mut magic)?;
    if &magic != TUNNEL_MAGIC {
        return Err(Error::Handshake(format!(
            "bad tunnel magic {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let mut len = [0u8; 2];
    transport.read_exact(&mut len)?;
    let len = u16::from_be_bytes(len) as usize;
    if len == 0 {
        return Err(Error::Handshake("empty handshake body".into()));
    }

    let mut body = vec![0u8; len];
    transport.read_exact(&mut body)?;
    debug!("tunnel: <- handshake ({} byte body)", len);

    serde_json::from_slice(&body)
        .map_err(|e| Error::Handshake(format!("malformed handshake body: {e}")))
}
