//! Remote-serial-protocol packet codec.
//!
//! ```text
//! ┌─────┬──────────────────────────┬─────┬───────────────┐
//! │ '$' │ escaped payload          │ '#' │ 2 hex digits  │
//! └─────┴──────────────────────────┴─────┴───────────────┘
//! ```
//!
//! The checksum is the sum of the escaped payload bytes modulo 256.
//! `#`, `$`, `}` and `*` inside a payload are sent as `}` followed by the
//! byte XOR 0x20.  Replies may also use run-length encoding: `X*n`
//! repeats `X` a further `n - 29` times.  Outside packets the only legal
//! bytes are the `+` / `-` acknowledgements.

use core::fmt::Write as _;

use log::debug;

use crate::error::{Error, Result};

pub const PACKET_START: u8 = b'$';
pub const CHECKSUM_MARK: u8 = b'#';
pub const ESCAPE: u8 = b'}';
pub const RUN_LENGTH: u8 = b'*';
pub const ACK: u8 = b'+';
pub const NACK: u8 = b'-';

/// Upper bound on a buffered packet.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Longest attach command: "vAttach;" plus 16 hex digits.
pub type AttachCommand = heapless::String<32>;

/// `vAttach;<pid in lowercase hex, no padding>`.
pub fn attach_command(pid: u64) -> AttachCommand {
    let mut cmd = AttachCommand::new();
    // 24 bytes at most, always fits.
    let _ = write!(cmd, "vAttach;{pid:x}");
    cmd
}

fn needs_escape(b: u8) -> bool {
    matches!(b, CHECKSUM_MARK | PACKET_START | ESCAPE | RUN_LENGTH)
}

pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if needs_escape(b) {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

pub fn checksum(wire_payload: &[u8]) -> u8 {
    wire_payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Frame a payload for the wire.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let mut out = Vec::with_capacity(escaped.len() + 4);
    out.push(PACKET_START);
    out.extend_from_slice(&escaped);
    out.push(CHECKSUM_MARK);
    out.extend_from_slice(format!("{:02x}", checksum(&escaped)).as_bytes());
    out
}

/// Undo escaping and run-length encoding.
pub fn decode_payload(wire: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter().copied();
    while let Some(b) = bytes.next() {
        match b {
            ESCAPE => {
                let next = bytes
                    .next()
                    .ok_or_else(|| Error::protocol("packet ends inside an escape"))?;
                out.push(next ^ 0x20);
            }
            RUN_LENGTH => {
                let count = bytes
                    .next()
                    .ok_or_else(|| Error::protocol("packet ends inside a run-length"))?;
                let repeat = usize::from(count)
                    .checked_sub(29)
                    .ok_or_else(|| Error::protocol(format!("bad run-length count 0x{count:02x}")))?;
                let &last = out
                    .last()
                    .ok_or_else(|| Error::protocol("run-length with nothing to repeat"))?;
                if out.len() + repeat > MAX_PACKET_SIZE {
                    return Err(Error::protocol("run-length expands past packet limit"));
                }
                out.extend(core::iter::repeat_n(last, repeat));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ── Decoder ──────────────────────────────────────────────────

/// One unit read from the debugserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    Ack,
    Nack,
    /// Decoded payload of a packet with a valid checksum.
    Packet(Vec<u8>),
}

/// Streaming decoder: feed raw bytes, pull events.
#[derive(Default)]
pub struct PacketDecoder {
    pending: Vec<u8>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Next complete event, `None` when more bytes are needed.  Errors
    /// discard everything buffered.
    pub fn next_event(&mut self) -> Result<Option<PacketEvent>> {
        let result = self.parse();
        if result.is_err() {
            self.pending.clear();
        }
        result
    }

    fn parse(&mut self) -> Result<Option<PacketEvent>> {
        let Some(&first) = self.pending.first() else {
            return Ok(None);
        };
        match first {
            ACK => {
                self.pending.remove(0);
                Ok(Some(PacketEvent::Ack))
            }
            NACK => {
                self.pending.remove(0);
                Ok(Some(PacketEvent::Nack))
            }
            PACKET_START => {
                let Some(end) = self.pending.iter().position(|&b| b == CHECKSUM_MARK) else {
                    if self.pending.len() > MAX_PACKET_SIZE {
                        return Err(Error::protocol("unterminated packet exceeds limit"));
                    }
                    return Ok(None);
                };
                if self.pending.len() < end + 3 {
                    return Ok(None);
                }
                let wire = &self.pending[1..end];
                let sent = match (hex_value(self.pending[end + 1]), hex_value(self.pending[end + 2])) {
                    (Some(hi), Some(lo)) => (hi << 4) | lo,
                    _ => return Err(Error::protocol("non-hex packet checksum")),
                };
                let computed = checksum(wire);
                if sent != computed {
                    return Err(Error::protocol(format!(
                        "packet checksum mismatch: sent {sent:02x}, computed {computed:02x}"
                    )));
                }
                let payload = decode_payload(wire)?;
                self.pending.drain(..end + 3);
                Ok(Some(PacketEvent::Packet(payload)))
            }
            other => {
                debug!("debug: unexpected byte 0x{:02x} between packets", other);
                Err(Error::protocol(format!(
                    "unexpected byte 0x{other:02x} between packets"
                )))
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────
