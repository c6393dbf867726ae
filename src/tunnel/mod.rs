//! Tunnel proxy: one negotiated session over the secure transport.
//!
//! ```text
//!   TcpTransport ──▶ CDTunnel handshake ──▶ CoreDeviceProxy
//!                                              │ create_tcp_adapter()
//!                                  ┌───────────┼───────────┐
//!                                  ▼           ▼           ▼
//!                               Adapter     Adapter     Adapter
//!                             (stream 1)  (stream 2)  (stream 3)
//! ```
//!
//! The proxy owns the secure stream through a shared [`TunnelCore`];
//! adapters hold a handle to the same core and demultiplex their own
//! stream out of it.  Closing the proxy shuts the tunnel down and every
//! adapter's next I/O fails with a transport error.

mod adapter;
mod session;
pub mod handshake;
pub mod mux;

use std::cell::RefCell;
use std::rc::Rc;

use log::info;

pub use adapter::{Adapter, AdapterState};
use session::TunnelCore;
use crate::config::DEFAULT_TUNNEL_MTU;
use crate::error::{Error, Result};
use crate::transport::Transport;
use handshake::{HandshakeRequest, HandshakeResponse};

/// A negotiated tunnel session.
pub struct CoreDeviceProxy {
    core: Rc<RefCell<TunnelCore>>,
    rsd_port: u16,
    server_address: String,
    client_address: String,
    mtu: u32,
}

impl CoreDeviceProxy {
    /// Negotiate a tunnel over `transport` with the default MTU.
    pub fn connect<T: Transport + 'static>(transport: T) -> Result<Self> {
        Self::connect_with_mtu(transport, DEFAULT_TUNNEL_MTU)
    }

    /// Negotiate a tunnel, asking for at most `mtu` bytes per data frame.
    /// The effective MTU is the smaller of the request and the device's
    /// answer.
    pub fn connect_with_mtu<T: Transport + 'static>(mut transport: T, mtu: u32) -> Result<Self> {
        if mtu == 0 {
            return Err(Error::Input("tunnel MTU must be non-zero".into()));
        }
        handshake::write_message(&mut transport, &HandshakeRequest::new(mtu))?;
        let response: HandshakeResponse = handshake::read_message(&mut transport)?;
        response.validate()?;

        let effective = mtu.min(response.client_parameters.mtu);
        info!(
            "tunnel: established, server {} rsd port {} mtu {}",
            response.server_address, response.server_rsd_port, effective
        );

        let core = TunnelCore::new(Box::new(transport), effective as usize);
        Ok(Self {
            core: Rc::new(RefCell::new(core)),
            rsd_port: response.server_rsd_port,
            server_address: response.server_address,
            client_address: response.client_parameters.address,
            mtu: effective,
        })
    }

    /// Port of the service catalog (RSD) inside the tunnel.
    pub fn server_rsd_port(&self) -> u16 {
        self.rsd_port
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Mint a fresh, unbound adapter.
    pub fn create_tcp_adapter(&self) -> Result<Adapter> {
        if self.core.borrow().is_closed() {
            return Err(Error::closed("tunnel is closed"));
        }
        Ok(Adapter::new(Rc::clone(&self.core)))
    }

    /// Shut the tunnel down.  Adapters minted from it stop working.
    pub fn close(&self) {
        self.core.borrow_mut().shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.core.borrow().is_closed()
    }
}

impl core::fmt::Debug for CoreDeviceProxy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoreDeviceProxy")
            .field("server_address", &self.server_address)
            .field("rsd_port", &self.rsd_port)
            .field("mtu", &self.mtu)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────
