//! Remote invocation channel.
//!
//! A request/reply message protocol spoken over an adapter bound to the
//! instruments service hub.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐  │
//! │  │ Adapter  │──▶│  Codec   │──▶│  RemoteServerClient   │  │
//! │  │(Transport│   │ (header, │   │  invoke / oneway      │  │
//! │  │  trait)  │   │ fragment,│   │  make_channel         │  │
//! │  └──────────┘   │ deflate) │   └───────────┬───────────┘  │
//! │                 └──────────┘               │              │
//! │                                            ▼              │
//! │                              ┌───────────────────────┐    │
//! │                              │ ProcessControlClient  │    │
//! │                              └───────────────────────┘    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one invocation may be outstanding.  Remote exceptions are not
//! errors at this layer: they come back as [`Reply::Fault`] and the
//! caller decides what they mean.

pub mod chunked;
pub mod codec;
pub mod compress;
pub mod process_control;
pub mod value;

use core::fmt;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::tunnel::Adapter;
use codec::{CONVERSATION_REQUEST, Envelope, EnvelopeReader};
pub use value::{RpcMessage, RpcValue};

/// Channel every session starts with; new channels are requested on it.
pub const ROOT_CHANNEL: i32 = 0;

pub const REQUEST_CHANNEL_SELECTOR: &str = "_requestChannelWithCode:identifier:";

/// Exception raised by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    pub code: i64,
    pub description: String,
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote fault {}: {}", self.code, self.description)
    }
}

/// Outcome of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(RpcValue),
    Fault(RemoteFault),
}

impl Reply {
    /// Turn a fault into a protocol violation; used where the remote
    /// side has no business refusing.
    pub fn into_value(self) -> Result<RpcValue> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Fault(fault) => Err(Error::protocol(fault.to_string())),
        }
    }
}

pub struct RemoteServerClient<T: Transport = Adapter> {
    adapter: Option<T>,
    reader: EnvelopeReader,
    next_message_id: u32,
    next_channel_code: i32,
    in_flight: Option<u32>,
    compress_threshold: usize,
}

impl<T: Transport> RemoteServerClient<T> {
    /// Wrap an adapter bound to the service hub.  No handshake is sent.
    pub fn new(adapter: T) -> Self {
        Self::with_compress_threshold(adapter, compress::DEFAULT_COMPRESS_THRESHOLD)
    }

    pub fn with_compress_threshold(adapter: T, compress_threshold: usize) -> Self {
        Self {
            adapter: Some(adapter),
            reader: EnvelopeReader::new(),
            next_message_id: 1,
            next_channel_code: 1,
            in_flight: None,
            compress_threshold,
        }
    }

    /// Message id of the invocation still awaiting its reply.
    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }

    fn adapter_mut(&mut self) -> Result<&mut T> {
        self.adapter.as_mut().ok_or(Error::UseAfterExtract)
    }

    fn send(
        &mut self,
        channel: i32,
        selector: &str,
        args: Vec<RpcValue>,
        expects_reply: bool,
    ) -> Result<u32> {
        if let Some(pending) = self.in_flight {
            return Err(Error::ConcurrentInvocation { pending });
        }
        let threshold = self.compress_threshold;
        let message_id = self.next_message_id;
        let envelope = Envelope {
            message_id,
            conversation: CONVERSATION_REQUEST,
            channel,
            expects_reply,
            message: RpcMessage::invoke(selector, args),
        };
        codec::write_envelope(self.adapter_mut()?, &envelope, threshold)?;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        debug!("rpc: sent {} on channel {} as msg {}", selector, channel, message_id);
        Ok(message_id)
    }

    /// Send an invocation that expects a reply; pair with
    /// [`read_reply`](Self::read_reply).
    pub fn send_invocation(
        &mut self,
        channel: i32,
        selector: &str,
        args: Vec<RpcValue>,
    ) -> Result<u32> {
        let id = self.send(channel, selector, args, true)?;
        self.in_flight = Some(id);
        Ok(id)
    }

    /// Send an invocation with no reply.
    pub fn send_oneway(&mut self, channel: i32, selector: &str, args: Vec<RpcValue>) -> Result<()> {
        self.send(channel, selector, args, false).map(|_| ())
    }

    /// Block until the outstanding invocation's reply arrives.  Messages
    /// that answer nothing we asked are logged and skipped.
    pub fn read_reply(&mut self) -> Result<Reply> {
        if self.adapter.is_none() {
            return Err(Error::UseAfterExtract);
        }
        let Some(pending) = self.in_flight else {
            return Err(Error::protocol("read_reply with no invocation outstanding"));
        };
        let result = self.await_reply(pending);
        self.in_flight = None;
        result
    }

    fn await_reply(&mut self, pending: u32) -> Result<Reply> {
        let adapter = self.adapter.as_mut().ok_or(Error::UseAfterExtract)?;
        loop {
            let envelope = self.reader.read(adapter)?;
            if !envelope.is_reply() || envelope.message_id != pending {
                warn!(
                    "rpc: skipping unsolicited msg {} on channel {}",
                    envelope.message_id, envelope.channel
                );
                continue;
            }
            return match envelope.message {
                RpcMessage::Reply(value) => Ok(Reply::Value(value)),
                RpcMessage::Fault { code, description } => {
                    debug!("rpc: msg {} faulted with code {}", pending, code);
                    Ok(Reply::Fault(RemoteFault { code, description }))
                }
                RpcMessage::Invoke { selector, .. } => Err(Error::protocol(format!(
                    "reply to msg {pending} is an invocation of {selector:?}"
                ))),
            };
        }
    }

    /// Synchronous round trip.
    pub fn invoke(&mut self, channel: i32, selector: &str, args: Vec<RpcValue>) -> Result<Reply> {
        self.send_invocation(channel, selector, args)?;
        self.read_reply()
    }

    /// Ask the device to open the service channel `identifier`; returns
    /// the code to address it with.
    pub fn make_channel(&mut self, identifier: &str) -> Result<i32> {
        let code = self.next_channel_code;
        let reply = self.invoke(
            ROOT_CHANNEL,
            REQUEST_CHANNEL_SELECTOR,
            vec![RpcValue::I64(i64::from(code)), RpcValue::from(identifier)],
        )?;
        reply.into_value()?;
        self.next_channel_code += 1;
        debug!("rpc: channel {} -> {}", code, identifier);
        Ok(code)
    }

    /// Take the adapter out, leaving this client unusable.
    pub fn extract_adapter(&mut self) -> Result<T> {
        let adapter = self.adapter.take().ok_or(Error::UseAfterExtract)?;
        self.in_flight = None;
        self.reader.reset();
        Ok(adapter)
    }

    pub fn into_inner(mut self) -> Result<T> {
        self.extract_adapter()
    }
}

// ── Tests ────────────────────────────────────────────────────
