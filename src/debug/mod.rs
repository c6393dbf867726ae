//! Debug session over the debugserver proxy.
//!
//! ```text
//!                 attach(pid) ok
//!   Connected ───────────────────▶ Attached
//!       ▲                             │
//!       └──────── detach() ───────────┘
//! ```
//!
//! Every command is one packet out and at most one packet back.  In ack
//! mode the device acknowledges our packet with `+` and we acknowledge
//! its reply the same way.  A `-` or a corrupt reply ends the exchange
//! with a protocol violation; nothing is retransmitted.

pub mod packet;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::tunnel::Adapter;
use packet::{ACK, PacketDecoder, PacketEvent};

pub const DETACH: &str = "D";
pub const CONTINUE: &str = "c";
pub const START_NO_ACK_MODE: &str = "QStartNoAckMode";

/// One debugserver request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugserverCommand {
    verb: String,
    args: Vec<u8>,
}

impl DebugserverCommand {
    pub fn new(verb: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            verb: verb.into(),
            args,
        }
    }

    pub fn attach(pid: u64) -> Self {
        Self::new(packet::attach_command(pid).as_str(), Vec::new())
    }

    pub fn detach() -> Self {
        Self::new(DETACH, Vec::new())
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Unescaped packet payload: the verb followed by the raw arguments.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.verb.len() + self.args.len());
        out.extend_from_slice(self.verb.as_bytes());
        out.extend_from_slice(&self.args);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Attached { pid: u64 },
}

/// `E` followed by two hex digits.
fn is_error_reply(reply: &str) -> bool {
    let b = reply.as_bytes();
    b.len() == 3 && b[0] == b'E' && b[1..].iter().all(u8::is_ascii_hexdigit)
}

pub struct DebugProxyClient<T: Transport = Adapter> {
    adapter: Option<T>,
    decoder: PacketDecoder,
    ack_mode: bool,
    state: SessionState,
}

impl<T: Transport> DebugProxyClient<T> {
    /// Wrap an adapter bound to the debugserver proxy port.
    pub fn new(adapter: T) -> Self {
        Self {
            adapter: Some(adapter),
            decoder: PacketDecoder::new(),
            ack_mode: true,
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attached_pid(&self) -> Option<u64> {
        match self.state {
            SessionState::Attached { pid } => Some(pid),
            SessionState::Connected => None,
        }
    }

    pub fn ack_mode(&self) -> bool {
        self.ack_mode
    }

    fn next_event(&mut self) -> Result<PacketEvent> {
        let adapter = self.adapter.as_mut().ok_or(Error::UseAfterExtract)?;
        let mut buf = [0u8; 1024];
        loop {
            if let Some(event) = self.decoder.next_event()? {
                return Ok(event);
            }
            let n = adapter.read(&mut buf)?;
            self.decoder.feed(&buf[..n]);
        }
    }

    /// One request/response round trip.  `None` means the device sent an
    /// empty packet.
    pub fn send_command(&mut self, command: &DebugserverCommand) -> Result<Option<String>> {
        let wire = packet::encode_packet(&command.payload());
        {
            let adapter = self.adapter.as_mut().ok_or(Error::UseAfterExtract)?;
            debug!("debug: -> {}", String::from_utf8_lossy(&wire));
            adapter.write_all(&wire)?;
            adapter.flush()?;
        }

        if self.ack_mode {
            match self.next_event()? {
                PacketEvent::Ack => {}
                PacketEvent::Nack => {
                    return Err(Error::protocol(format!(
                        "debugserver rejected {:?}",
                        command.verb
                    )));
                }
                PacketEvent::Packet(_) => {
                    return Err(Error::protocol("reply arrived before acknowledgement"));
                }
            }
        }

        let payload = loop {
            match self.next_event()? {
                PacketEvent::Packet(payload) => break payload,
                PacketEvent::Ack => debug!("debug: ignoring stray ack"),
                PacketEvent::Nack => {
                    return Err(Error::protocol("debugserver asked for retransmission"));
                }
            }
        };

        if self.ack_mode {
            let adapter = self.adapter.as_mut().ok_or(Error::UseAfterExtract)?;
            adapter.write_all(&[ACK])?;
            adapter.flush()?;
        }

        if payload.is_empty() {
            debug!("debug: <- (empty)");
            return Ok(None);
        }
        let reply = String::from_utf8_lossy(&payload).into_owned();
        debug!("debug: <- {}", reply);
        Ok(Some(reply))
    }

    /// Attach to `pid`.  Returns the stop reply.
    pub fn attach(&mut self, pid: u64) -> Result<Option<String>> {
        if let SessionState::Attached { pid: current } = self.state {
            return Err(Error::AlreadyAttached { pid: current });
        }
        let reply = self.send_command(&DebugserverCommand::attach(pid))?;
        if let Some(text) = reply.as_deref() {
            if is_error_reply(text) {
                warn!("debug: attach to pid {} refused with {}", pid, text);
                return Err(Error::AttachRefused(text.to_string()));
            }
        }
        info!("debug: attached to pid {}", pid);
        self.state = SessionState::Attached { pid };
        Ok(reply)
    }

    /// Send `D`.  Whatever the device answers, the session is back to
    /// `Connected` and the answer is returned unchanged.
    pub fn detach(&mut self) -> Result<Option<String>> {
        let reply = self.send_command(&DebugserverCommand::detach())?;
        if let SessionState::Attached { pid } = self.state {
            info!("debug: detached from pid {} ({:?})", pid, reply);
        }
        self.state = SessionState::Connected;
        Ok(reply)
    }

    /// Resume the attached process.
    pub fn continue_process(&mut self) -> Result<Option<String>> {
        self.send_command(&DebugserverCommand::new(CONTINUE, Vec::new()))
    }

    /// Switch acknowledgements off (`QStartNoAckMode`).  Re-enabling is not
    /// part of the protocol.
    pub fn set_ack_mode(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.ack_mode {
            return Ok(());
        }
        if enabled {
            return Err(Error::Input("ack mode cannot be re-enabled".into()));
        }
        match self.send_command(&DebugserverCommand::new(START_NO_ACK_MODE, Vec::new()))? {
            Some(reply) if reply == "OK" => {
                debug!("debug: ack mode off");
                self.ack_mode = false;
                Ok(())
            }
            other => Err(Error::protocol(format!(
                "QStartNoAckMode answered with {other:?}"
            ))),
        }
    }

    /// Take the adapter out, leaving the session unusable.
    pub fn extract_adapter(&mut self) -> Result<T> {
        let adapter = self.adapter.take().ok_or(Error::UseAfterExtract)?;
        self.decoder.reset();
        Ok(adapter)
    }

    pub fn into_inner(mut self) -> Result<T> {
        self.extract_adapter()
    }
}

// ── Tests ────────────────────────────────────────────────────
