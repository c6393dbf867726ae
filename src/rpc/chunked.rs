//! Fragmentation of large RPC message bodies.
//!
//! When a (possibly compressed) body exceeds [`FRAGMENT_SIZE`] it is split
//! into numbered fragments that share one message id:
//!
//! ```text
//! Fragment 0/N: header{idx 0, cnt N, flags}  body part 1
//! Fragment 1/N: header{idx 1, cnt N, flags}  body part 2
//! Fragment N-1: header{idx N-1, cnt N}       body part N (final)
//! ```
//!
//! The receiver reassembles fragments per `(message_id, conversation)`
//! before handing the complete body to the decoder.  Fragments of one
//! message must arrive in order; fragments of different messages may
//! interleave.

use std::collections::HashMap;

use super::codec::MessageHeader;
use crate::error::{Error, Result};

/// Maximum body bytes per fragment.
pub const FRAGMENT_SIZE: usize = 16 * 1024;

/// Upper bound on a reassembled body.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Messages that may be mid-reassembly at once.
pub const MAX_PARTIAL_MESSAGES: usize = 16;

/// Split a body into fragment payloads.  An empty body is one empty
/// fragment.
pub fn fragment(body: &[u8]) -> Vec<&[u8]> {
    if body.len() <= FRAGMENT_SIZE {
        return vec![body];
    }
    body.chunks(FRAGMENT_SIZE).collect()
}

struct Partial {
    first: MessageHeader,
    next_index: u16,
    buffer: Vec<u8>,
}

/// Reassembly buffers for in-progress fragmented messages.
#[derive(Default)]
pub struct FragmentAssembler {
    partial: HashMap<(u32, u32), Partial>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment.
    ///
    /// Returns the first fragment's header and the complete body once the
    /// final fragment arrives, `None` while more are expected.
    pub fn feed(
        &mut self,
        header: MessageHeader,
        payload: Vec<u8>,
    ) -> Result<Option<(MessageHeader, Vec<u8>)>> {
        if header.fragment_count == 1 {
            return Ok(Some((header, payload)));
        }

        let key = (header.message_id, header.conversation);
        let Some(mut partial) = self.partial.remove(&key) else {
            if header.fragment_index != 0 {
                return Err(Error::protocol(format!(
                    "message {} starts at fragment {}",
                    header.message_id, header.fragment_index
                )));
            }
            if self.partial.len() >= MAX_PARTIAL_MESSAGES {
                return Err(Error::protocol(format!(
                    "message {} would exceed {MAX_PARTIAL_MESSAGES} partial messages",
                    header.message_id
                )));
            }
            self.partial.insert(
                key,
                Partial {
                    first: header,
                    next_index: 1,
                    buffer: payload,
                },
            );
            return Ok(None);
        };

        if header.fragment_index != partial.next_index
            || header.fragment_count != partial.first.fragment_count
        {
            return Err(Error::protocol(format!(
                "message {} fragment {}/{} out of sequence (expected {}/{})",
                header.message_id,
                header.fragment_index,
                header.fragment_count,
                partial.next_index,
                partial.first.fragment_count
            )));
        }
        if partial.buffer.len() + payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::protocol(format!(
                "message {} exceeds {MAX_MESSAGE_SIZE} bytes",
                header.message_id
            )));
        }

        partial.buffer.extend_from_slice(&payload);
        partial.next_index += 1;
        if partial.next_index == partial.first.fragment_count {
            return Ok(Some((partial.first, partial.buffer)));
        }
        self.partial.insert(key, partial);
        Ok(None)
    }

    /// Discard all partial data.
    pub fn reset(&mut self) {
        self.partial.clear();
    }

    /// Number of messages mid-reassembly.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

// ── Tests ────────────────────────────────────────────────────
