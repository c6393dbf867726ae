//! Adapters: concrete implementations of the transport seam.
//!
//! | Adapter        | Implements         | Connects to                    |
//! |----------------|--------------------|--------------------------------|
//! | `tcp_provider` | TransportProvider  | Device control port over TCP   |
//! |                | Transport          | (pairing proof, HMAC-SHA256)   |

pub mod tcp_provider;
