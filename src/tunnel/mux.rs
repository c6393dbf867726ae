//! Multiplex frame codec for logical connections inside the tunnel.
//!
//! Wire format (integers little-endian):
//! ```text
//! ┌──────────┬─────────┬──────────────┬─────────────┬──────────────┐
//! │ magic u8 │ kind u8 │ stream u32   │ length u32  │ payload (N)  │
//! │  0xCD    │         │              │             │              │
//! └──────────┴─────────┴──────────────┴─────────────┴──────────────┘
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete frames.
//! A single transport read may return part of a header, part of a
//! payload, or several frames back to back.  Unlike a resynchronising
//! codec, a bad magic byte or oversized length poisons the decoder: the
//! tunnel carries many logical streams, and guessing a resync point would
//! deliver bytes to the wrong one.

use core::fmt;

use crate::error::{Error, Result};

/// First byte of every frame.
pub const MUX_MAGIC: u8 = 0xCD;

/// Fixed header size: magic + kind + stream + length.
pub const MUX_HEADER_SIZE: usize = 10;

/// Maximum payload carried by one frame.
pub const MAX_MUX_PAYLOAD: usize = 64 * 1024;

/// Stream id reserved for tunnel-wide control frames.
pub const CONTROL_STREAM: u32 = 0;

// ── Frame kinds ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Host asks the device to connect `stream` to a port (payload: LE u16).
    Open = 1,
    /// Device accepted the `Open`.
    Accept = 2,
    /// Device refused the `Open` (payload: UTF-8 reason).
    Refuse = 3,
    /// Stream bytes.
    Data = 4,
    /// Either side closes the stream.
    Close = 5,
    /// Tear down the whole tunnel (stream 0).
    Shutdown = 6,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => Self::Open,
            2 => Self::Accept,
            3 => Self::Refuse,
            4 => Self::Data,
            5 => Self::Close,
            6 => Self::Shutdown,
            other => return Err(Error::protocol(format!("unknown mux frame kind {other}"))),
        })
    }
}

// ── Frame ────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct MuxFrame {
    pub kind: FrameKind,
    pub stream: u32,
    pub payload: Vec<u8>,
}

impl MuxFrame {
    pub fn open(stream: u32, port: u16) -> Self {
        Self {
            kind: FrameKind::Open,
            stream,
            payload: port.to_le_bytes().to_vec(),
        }
    }

    pub fn accept(stream: u32) -> Self {
        Self {
            kind: FrameKind::Accept,
            stream,
            payload: Vec::new(),
        }
    }

    pub fn refuse(stream: u32, reason: &str) -> Self {
        Self {
            kind: FrameKind::Refuse,
            stream,
            payload: reason.as_bytes().to_vec(),
        }
    }

    pub fn data(stream: u32, bytes: &[u8]) -> Self {
        Self {
            kind: FrameKind::Data,
            stream,
            payload: bytes.to_vec(),
        }
    }

    pub fn close(stream: u32) -> Self {
        Self {
            kind: FrameKind::Close,
            stream,
            payload: Vec::new(),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: FrameKind::Shutdown,
            stream: CONTROL_STREAM,
            payload: Vec::new(),
        }
    }

    /// Port requested by an `Open` frame.
    pub fn port(&self) -> Result<u16> {
        match (self.kind, self.payload.as_slice()) {
            (FrameKind::Open, &[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(Error::protocol("Open frame without a 2-byte port")),
        }
    }

    /// Reason text of a `Refuse` frame.
    pub fn reason(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialise header and payload.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_MUX_PAYLOAD);
        let mut out = Vec::with_capacity(MUX_HEADER_SIZE + self.payload.len());
        out.push(MUX_MAGIC);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.stream.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

impl fmt::Debug for MuxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MuxFrame({:?} stream={} len={})",
            self.kind,
            self.stream,
            self.payload.len()
        )
    }
}

// ── Decoder ──────────────────────────────────────────────────

enum DecoderState {
    /// Waiting for a complete header.
    ReadingHeader,
    /// Header parsed, waiting for `expected` payload bytes.
    ReadingPayload {
        kind: FrameKind,
        stream: u32,
        expected: usize,
    },
    /// A framing error desynchronised the stream.
    Poisoned,
}

/// Streaming frame decoder.
pub struct MuxDecoder {
    state: DecoderState,
    pending: Vec<u8>,
}

impl MuxDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader,
            pending: Vec::new(),
        }
    }

    /// Feed bytes and return every frame they complete.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<MuxFrame>> {
        if matches!(self.state, DecoderState::Poisoned) {
            return Err(Error::protocol("mux decoder poisoned by earlier error"));
        }
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut offset = 0;
        loop {
            match self.state {
                DecoderState::ReadingHeader => {
                    if self.pending.len() - offset < MUX_HEADER_SIZE {
                        break;
                    }
                    match Self::parse_header(&self.pending[offset..offset + MUX_HEADER_SIZE]) {
                        Ok((kind, stream, expected)) => {
                            self.state = DecoderState::ReadingPayload {
                                kind,
                                stream,
                                expected,
                            };
                            offset += MUX_HEADER_SIZE;
                        }
                        Err(e) => {
                            self.state = DecoderState::Poisoned;
                            self.pending.clear();
                            return Err(e);
                        }
                    }
                }
                DecoderState::ReadingPayload {
                    kind,
                    stream,
                    expected,
                } => {
                    if self.pending.len() - offset < expected {
                        break;
                    }
                    frames.push(MuxFrame {
                        kind,
                        stream,
                        payload: self.pending[offset..offset + expected].to_vec(),
                    });
                    offset += expected;
                    self.state = DecoderState::ReadingHeader;
                }
                DecoderState::Poisoned => unreachable!("checked on entry"),
            }
        }

        self.pending.drain(..offset);
        Ok(frames)
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader;
        self.pending.clear();
    }

    fn parse_header(header: &[u8]) -> Result<(FrameKind, u32, usize)> {
        if header[0] != MUX_MAGIC {
            return Err(Error::protocol(format!(
                "bad mux magic 0x{:02x}",
                header[0]
            )));
        }
        let kind = FrameKind::try_from(header[1])?;
        let stream = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        let expected = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        if expected > MAX_MUX_PAYLOAD {
            return Err(Error::protocol(format!(
                "mux payload of {expected} bytes exceeds {MAX_MUX_PAYLOAD}"
            )));
        }
        Ok((kind, stream, expected))
    }
}

impl Default for MuxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
