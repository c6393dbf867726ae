//! RPC message framing.
//!
//! Every fragment on the wire is a fixed 32-byte header followed by its
//! share of the message body (all integers little-endian):
//!
//! ```text
//! ┌────────────┬────────────┬──────────┬──────────┬─────────────┐
//! │ magic u32  │ hdr_len u32│ frag_idx │ frag_cnt │ payload_len │
//! │ 0x1F3D5B79 │ 32         │ u16      │ u16      │ u32         │
//! ├────────────┼────────────┼──────────┴──────────┼─────────────┤
//! │ message_id │ conversation│ channel i32        │ flags u32   │
//! │ u32        │ u32         │                    │             │
//! └────────────┴─────────────┴────────────────────┴─────────────┘
//! ```
//!
//! A complete message body is a postcard [`RpcMessage`], optionally
//! DEFLATE-compressed (`FLAG_COMPRESSED`) and split into fragments when
//! it exceeds [`chunked::FRAGMENT_SIZE`](super::chunked::FRAGMENT_SIZE).
//! [`write_envelope`] and [`EnvelopeReader`] hide both steps.

use log::debug;

use super::chunked::{self, FragmentAssembler};
use super::compress;
use super::value::RpcMessage;
use crate::error::{Error, Result};
use crate::transport::Transport;

pub const MESSAGE_MAGIC: u32 = 0x1F3D_5B79;
pub const HEADER_LEN: usize = 32;

/// Largest payload a single fragment may carry.
pub const MAX_FRAGMENT_PAYLOAD: usize = 64 * 1024;

/// Sender waits for a reply with the same message id.
pub const FLAG_EXPECTS_REPLY: u32 = 1 << 0;
/// Reassembled body is DEFLATE-compressed.
pub const FLAG_COMPRESSED: u32 = 1 << 1;

/// `conversation` value of a request.
pub const CONVERSATION_REQUEST: u32 = 0;
/// `conversation` value of a reply.
pub const CONVERSATION_REPLY: u32 = 1;

// ── Header ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub payload_len: u32,
    pub message_id: u32,
    pub conversation: u32,
    pub channel: i32,
    pub flags: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MESSAGE_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        out[8..10].copy_from_slice(&self.fragment_index.to_le_bytes());
        out[10..12].copy_from_slice(&self.fragment_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..20].copy_from_slice(&self.message_id.to_le_bytes());
        out[20..24].copy_from_slice(&self.conversation.to_le_bytes());
        out[24..28].copy_from_slice(&self.channel.to_le_bytes());
        out[28..32].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let u16_at = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);

        let magic = u32_at(0);
        if magic != MESSAGE_MAGIC {
            return Err(Error::protocol(format!("bad rpc magic 0x{magic:08x}")));
        }
        let header_len = u32_at(4);
        if header_len as usize != HEADER_LEN {
            return Err(Error::protocol(format!("unsupported rpc header length {header_len}")));
        }
        let header = Self {
            fragment_index: u16_at(8),
            fragment_count: u16_at(10),
            payload_len: u32_at(12),
            message_id: u32_at(16),
            conversation: u32_at(20),
            channel: u32_at(24) as i32,
            flags: u32_at(28),
        };
        if header.fragment_count == 0 || header.fragment_index >= header.fragment_count {
            return Err(Error::protocol(format!(
                "fragment {} of {} is out of range",
                header.fragment_index, header.fragment_count
            )));
        }
        if header.payload_len as usize > MAX_FRAGMENT_PAYLOAD {
            return Err(Error::protocol(format!(
                "fragment payload of {} bytes exceeds {MAX_FRAGMENT_PAYLOAD}",
                header.payload_len
            )));
        }
        Ok(header)
    }

    pub fn expects_reply(&self) -> bool {
        self.flags & FLAG_EXPECTS_REPLY != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// Read one fragment: header plus payload.
pub fn read_fragment<T: Transport + ?Sized>(transport: &mut T) -> Result<(MessageHeader, Vec<u8>)> {
    let mut raw = [0u8; HEADER_LEN];
    transport.read_exact(&mut raw)?;
    let header = MessageHeader::decode(&raw)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    transport.read_exact(&mut payload)?;
    Ok((header, payload))
}

// ── Envelope ─────────────────────────────────────────────────

/// A complete, decoded message plus its routing fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: u32,
    pub conversation: u32,
    pub channel: i32,
    pub expects_reply: bool,
    pub message: RpcMessage,
}

impl Envelope {
    pub fn is_reply(&self) -> bool {
        self.conversation == CONVERSATION_REPLY
    }
}

/// Serialise, compress when worthwhile, fragment and send one message.
pub fn write_envelope<T: Transport + ?Sized>(
    transport: &mut T,
    envelope: &Envelope,
    compress_threshold: usize,
) -> Result<()> {
    let mut body = postcard::to_allocvec(&envelope.message)
        .map_err(|e| Error::Input(format!("unserialisable rpc message: {e}")))?;
    let mut flags = if envelope.expects_reply {
        FLAG_EXPECTS_REPLY
    } else {
        0
    };
    if let Some(compressed) = compress::compress(&body, compress_threshold) {
        debug!("rpc: compressed body {} -> {} bytes", body.len(), compressed.len());
        body = compressed;
        flags |= FLAG_COMPRESSED;
    }

    let fragments = chunked::fragment(&body);
    let fragment_count = u16::try_from(fragments.len())
        .map_err(|_| Error::Input(format!("rpc body of {} bytes is too large", body.len())))?;

    let mut out = Vec::with_capacity(body.len() + HEADER_LEN * fragments.len());
    for (index, part) in (0u16..).zip(&fragments) {
        let header = MessageHeader {
            fragment_index: index,
            fragment_count,
            payload_len: part.len() as u32,
            message_id: envelope.message_id,
            conversation: envelope.conversation,
            channel: envelope.channel,
            flags,
        };
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(part);
    }
    debug!(
        "rpc: -> msg {} ch {} conv {} ({} fragments)",
        envelope.message_id, envelope.channel, envelope.conversation, fragment_count
    );
    transport.write_all(&out)?;
    transport.flush()
}

/// Reads complete messages, reassembling fragments across calls.
#[derive(Default)]
pub struct EnvelopeReader {
    assembler: FragmentAssembler,
}

impl EnvelopeReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until one whole message has arrived.
    pub fn read<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Envelope> {
        loop {
            let (header, payload) = read_fragment(transport)?;
            let Some((header, body)) = self.assembler.feed(header, payload)? else {
                continue;
            };
            let body = if header.is_compressed() {
                compress::decompress(&body)
                    .ok_or_else(|| Error::protocol("corrupt compressed rpc body"))?
            } else {
                body
            };
            let message: RpcMessage = postcard::from_bytes(&body)?;
            debug!(
                "rpc: <- msg {} ch {} conv {}",
                header.message_id, header.channel, header.conversation
            );
            return Ok(Envelope {
                message_id: header.message_id,
                conversation: header.conversation,
                channel: header.channel,
                expects_reply: header.expects_reply(),
                message,
            });
        }
    }

    /// Drop any partially reassembled messages.
    pub fn reset(&mut self) {
        self.assembler.reset();
    }
}

// ── Tests ────────────────────────────────────────────────────
