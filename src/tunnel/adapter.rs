//! Multiplexed adapter: one logical connection inside the tunnel.
//!
//! ```text
//!            connect(port)          Accept
//!   Idle ──────────────────▶ Connecting ──────▶ Bound
//!    ▲                          │                 │
//!    │       disconnect()       │ Refuse / I/O    │ close() / drop /
//!    └──────────────────────────┼─────────────────┤ fatal I/O error
//!                               ▼                 ▼
//!                             Closed ◀────────────┘
//! ```
//!
//! An adapter is a move-only value: whoever holds it owns it.  Protocol
//! wrappers take it by value and hand it back through their
//! `extract_adapter` / `into_inner` operations, so the same logical slot
//! can serve the service catalog, then process control, then the
//! debug session, one port at a time.

use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, warn};

use super::session::TunnelCore;
use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;

/// Lifecycle state of an [`Adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not bound to any port; may `connect`.
    Idle,
    /// `Open` sent, waiting for the device.
    Connecting,
    /// Bound to a device port; may read and write.
    Bound,
    /// Terminal.
    Closed,
}

pub struct Adapter {
    core: Rc<RefCell<TunnelCore>>,
    state: AdapterState,
    stream: Option<u32>,
    port: Option<u16>,
}

impl Adapter {
    pub(crate) fn new(core: Rc<RefCell<TunnelCore>>) -> Self {
        Self {
            core,
            state: AdapterState::Idle,
            stream: None,
            port: None,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Device port this adapter is bound to.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_bound(&self) -> bool {
        self.state == AdapterState::Bound
    }

    /// Bind to `port` on the device.  Only legal from `Idle`; a bound
    /// adapter must be [`disconnect`](Self::disconnect)ed first.
    pub fn connect(&mut self, port: u16) -> Result<()> {
        if self.state != AdapterState::Idle {
            return Err(Error::protocol(format!(
                "connect({port}) on an adapter in state {:?}",
                self.state
            )));
        }

        self.state = AdapterState::Connecting;
        let opened = self.core.borrow_mut().open_stream(port);
        match opened {
            Ok(id) => {
                info!("adapter: stream {} bound to port {}", id, port);
                self.stream = Some(id);
                self.port = Some(port);
                self.state = AdapterState::Bound;
                Ok(())
            }
            Err(e) => {
                warn!("adapter: connect to port {} failed: {}", port, e);
                self.state = AdapterState::Closed;
                Err(e)
            }
        }
    }

    /// Release the current port and return to `Idle`.
    pub fn disconnect(&mut self) -> Result<()> {
        let id = self.bound_stream()?;
        let result = self.core.borrow_mut().close_stream(id);
        self.stream = None;
        match result {
            Ok(()) => {
                debug!("adapter: stream {} released port {:?}", id, self.port);
                self.port = None;
                self.state = AdapterState::Idle;
                Ok(())
            }
            Err(e) => {
                self.state = AdapterState::Closed;
                Err(e)
            }
        }
    }

    /// Free the adapter.  Dropping has the same effect; this form reports
    /// whether the device was told.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let stream = self.stream.take();
        self.state = AdapterState::Closed;
        match stream {
            Some(id) => match self.core.try_borrow_mut() {
                Ok(mut core) => core.close_stream(id),
                Err(_) => Err(Error::protocol("tunnel busy while closing adapter")),
            },
            None => Ok(()),
        }
    }

    fn bound_stream(&self) -> Result<u32> {
        match (self.state, self.stream) {
            (AdapterState::Bound, Some(id)) => Ok(id),
            (AdapterState::Closed, _) => Err(Error::closed("adapter is closed")),
            (state, _) => Err(Error::protocol(format!(
                "adapter is {state:?}, not bound to a port"
            ))),
        }
    }

    /// Transport failures are fatal to this adapter.
    fn note_failure(&mut self, err: &Error) {
        if err.kind() == ErrorKind::Transport {
            if let Some(id) = self.stream.take() {
                if let Ok(mut core) = self.core.try_borrow_mut() {
                    let _ = core.close_stream(id);
                }
            }
            self.state = AdapterState::Closed;
        }
    }
}

impl Transport for Adapter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let id = self.bound_stream()?;
        let result = self.core.borrow_mut().read_stream(id, buf);
        if let Err(e) = &result {
            self.note_failure(e);
        }
        result
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let id = self.bound_stream()?;
        let result = self.core.borrow_mut().write_stream(id, data);
        if let Err(e) = &result {
            self.note_failure(e);
        }
        result
    }

    fn flush(&mut self) -> Result<()> {
        self.bound_stream().map(|_| ())
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if self.stream.is_some() {
            if let Err(e) = self.release() {
                debug!("adapter: close on drop not delivered: {}", e);
            }
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("state", &self.state)
            .field("stream", &self.stream)
            .field("port", &self.port)
            .finish()
    }
}
