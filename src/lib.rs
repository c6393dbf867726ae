//! devtunnel: client protocol stack for remote developer services.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  workflow::launch_and_debug                                    │
//! │                                                                │
//! │  ServiceCatalog ─▶ RemoteServerClient ─▶ DebugProxyClient      │
//! │   (rsd)            (rpc, process_control) (debug)              │
//! │        ▲                  ▲                     ▲              │
//! │        └──────── one Adapter, moved along ──────┘              │
//! │                           │                                    │
//! │  ──────────────── Transport trait boundary ────────────────    │
//! │                           │                                    │
//! │  CoreDeviceProxy (tunnel: CDTunnel handshake + stream mux)     │
//! │                           │                                    │
//! │  TransportProvider ─▶ TcpProvider (pairing proof over TCP)     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is blocking and single-threaded.  The library logs through
//! the `log` facade and never installs a logger itself.

#![deny(unused_must_use)]

pub mod adapters;
pub mod codec;
pub mod config;
pub mod debug;
pub mod error;
pub mod logging;
pub mod pairing;
pub mod rpc;
pub mod rsd;
pub mod transport;
pub mod tunnel;
pub mod workflow;


pub use error::{Error, ErrorKind, Result};
