//! Length-prefix frame codec for structured (JSON) messages.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (4B)│ JSON document (N B)      │
//! │ LE u32     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! Used by the pairing proof exchange and the service catalog.  Reads
//! are blocking: the header is read in full, then exactly `length`
//! payload bytes, so a short read on the underlying transport is
//! simply retried until the frame is complete.

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Encode a payload into a length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!(
            "frame payload of {} bytes outside 1..={MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read one complete frame payload.
pub fn read_frame<T: Transport + ?Sized>(transport: &mut T) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    transport.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!("invalid frame length {len}")));
    }
    let mut payload = vec![0u8; len];
    transport.read_exact(&mut payload)?;
    Ok(payload)
}

/// Serialise `msg` as JSON and send it as one frame.
pub fn write_json<T, M>(transport: &mut T, msg: &M) -> Result<()>
where
    T: Transport + ?Sized,
    M: Serialize,
{
    let body = serde_json::to_vec(msg)
        .map_err(|e| Error::Input(format!("unserialisable message: {e}")))?;
    debug!("codec: -> {} byte JSON frame", body.len());
    transport.write_all(&encode_frame(&body)?)?;
    transport.flush()
}

/// Receive one frame and deserialise it from JSON.
pub fn read_json<T, M>(transport: &mut T) -> Result<M>
where
    T: Transport + ?Sized,
    M: DeserializeOwned,
{
    let body = read_frame(transport)?;
    debug!("codec: <- {} byte JSON frame", body.len());
    Ok(serde_json::from_slice(&body)?)
}

// ── Tests ────────────────────────────────────────────────────
