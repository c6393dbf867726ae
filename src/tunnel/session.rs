//! Shared tunnel state: the secure stream plus per-stream demultiplexing.
//!
//! One `TunnelCore` sits behind `Rc<RefCell<_>>` and is shared by the
//! [`CoreDeviceProxy`](super::CoreDeviceProxy) and every
//! [`Adapter`](super::Adapter) it minted.  All calls are blocking and
//! single-threaded: whichever adapter is currently reading pumps the
//! transport and parks frames addressed to other streams in their slots.

use std::collections::{HashMap, VecDeque};

use log::{debug, info, warn};

use super::mux::{FrameKind, MAX_MUX_PAYLOAD, MuxDecoder, MuxFrame};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Size of each transport read while pumping.
const READ_CHUNK: usize = 16 * 1024;

/// Device answer to an `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenReply {
    Accepted,
    Refused(String),
}

/// Per-stream receive state.
#[derive(Default)]
struct StreamSlot {
    inbound: VecDeque<u8>,
    reply: Option<OpenReply>,
    remote_closed: bool,
}

pub(crate) struct TunnelCore {
    transport: Box<dyn Transport>,
    decoder: MuxDecoder,
    streams: HashMap<u32, StreamSlot>,
    next_stream: u32,
    /// Largest `Data` payload sent in one frame.
    mtu: usize,
    closed: bool,
}

impl TunnelCore {
    pub(crate) fn new(transport: Box<dyn Transport>, mtu: usize) -> Self {
        Self {
            transport,
            decoder: MuxDecoder::new(),
            streams: HashMap::new(),
            next_stream: 1,
            mtu: mtu.clamp(1, MAX_MUX_PAYLOAD),
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::closed("tunnel is closed"))
        } else {
            Ok(())
        }
    }

    fn send(&mut self, frame: &MuxFrame) -> Result<()> {
        self.ensure_open()?;
        debug!("tunnel: -> {:?}", frame);
        let result = self
            .transport
            .write_all(&frame.encode())
            .and_then(|()| self.transport.flush());
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    /// One blocking read from the transport, dispatching every completed
    /// frame.  Any failure is fatal to the whole tunnel.
    fn pump(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut buf = [0u8; READ_CHUNK];
        let n = match self.transport.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("tunnel: transport failed, closing: {}", e);
                self.closed = true;
                return Err(e);
            }
        };
        let frames = match self.decoder.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("tunnel: framing error, closing: {}", e);
                self.closed = true;
                return Err(e);
            }
        };
        for frame in frames {
            self.dispatch(frame)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: MuxFrame) -> Result<()> {
        debug!("tunnel: <- {:?}", frame);
        match frame.kind {
            FrameKind::Shutdown => {
                info!("tunnel: device shut the tunnel down");
                self.closed = true;
            }
            FrameKind::Open => {
                // Device-initiated streams are not part of this protocol.
                warn!("tunnel: refusing device-initiated stream {}", frame.stream);
                self.send(&MuxFrame::refuse(frame.stream, "host does not accept streams"))?;
            }
            kind => {
                let Some(slot) = self.streams.get_mut(&frame.stream) else {
                    debug!("tunnel: dropping {:?} for unknown stream", kind);
                    return Ok(());
                };
                match kind {
                    FrameKind::Accept => slot.reply = Some(OpenReply::Accepted),
                    FrameKind::Refuse => slot.reply = Some(OpenReply::Refused(frame.reason())),
                    FrameKind::Data => slot.inbound.extend(frame.payload),
                    FrameKind::Close => slot.remote_closed = true,
                    FrameKind::Open | FrameKind::Shutdown => unreachable!("handled above"),
                }
            }
        }
        Ok(())
    }

    /// Ask the device to connect a new stream to `port`; blocks for the
    /// answer.
    pub(crate) fn open_stream(&mut self, port: u16) -> Result<u32> {
        self.ensure_open()?;
        let id = self.allocate_stream_id()?;
        self.streams.insert(id, StreamSlot::default());

        if let Err(e) = self.send(&MuxFrame::open(id, port)) {
            self.streams.remove(&id);
            return Err(e);
        }

        loop {
            let reply = match self.streams.get(&id) {
                Some(slot) if slot.reply.is_none() && slot.remote_closed => {
                    Some(OpenReply::Refused("device closed the stream".to_string()))
                }
                Some(slot) => slot.reply.clone(),
                None => None,
            };
            match reply {
                Some(OpenReply::Accepted) => return Ok(id),
                Some(OpenReply::Refused(reason)) => {
                    self.streams.remove(&id);
                    return Err(Error::Connect { port, reason });
                }
                None => {
                    if let Err(e) = self.pump() {
                        self.streams.remove(&id);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Next id that is neither the control stream nor held by a live
    /// stream.  Ids wrap.
    fn allocate_stream_id(&mut self) -> Result<u32> {
        for _ in 0..=self.streams.len() {
            let id = self.next_stream;
            self.next_stream = self.next_stream.wrapping_add(1).max(1);
            if !self.streams.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(Error::protocol("no free stream id"))
    }

    /// Blocking read of stream bytes.
    pub(crate) fn read_stream(&mut self, id: u32, buf: &mut [u8]) -> Result<usize> {
        loop {
            let slot = self
                .streams
                .get_mut(&id)
                .ok_or_else(|| Error::closed("stream no longer exists"))?;
            if !slot.inbound.is_empty() {
                let n = buf.len().min(slot.inbound.len());
                for (dst, src) in buf.iter_mut().zip(slot.inbound.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
            if slot.remote_closed {
                return Err(Error::closed("device closed the stream"));
            }
            self.pump()?;
        }
    }

    /// Send stream bytes, split at the tunnel MTU.
    pub(crate) fn write_stream(&mut self, id: u32, data: &[u8]) -> Result<()> {
        match self.streams.get(&id) {
            Some(slot) if slot.remote_closed => {
                return Err(Error::closed("device closed the stream"));
            }
            Some(_) => {}
            None => return Err(Error::closed("stream no longer exists")),
        }
        for chunk in data.chunks(self.mtu) {
            self.send(&MuxFrame::data(id, chunk))?;
        }
        Ok(())
    }

    /// Forget a stream, telling the device unless it already hung up.
    pub(crate) fn close_stream(&mut self, id: u32) -> Result<()> {
        let Some(slot) = self.streams.remove(&id) else {
            return Ok(());
        };
        if slot.remote_closed || self.closed {
            return Ok(());
        }
        self.send(&MuxFrame::close(id))
    }

    /// Tear the tunnel down.  Idempotent.
    pub(crate) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.send(&MuxFrame::shutdown()) {
            debug!("tunnel: shutdown frame not delivered: {}", e);
        }
        self.closed = true;
        self.streams.clear();
        self.decoder.reset();
        info!("tunnel: closed");
    }
}

// ── Tests ────────────────────────────────────────────────────
