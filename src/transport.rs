//! Transport abstraction: any blocking, byte-oriented channel.
//!
//! Concrete implementations:
//! - [`TcpTransport`](crate::adapters::tcp_provider::TcpTransport), the
//!   authenticated stream to the device's tunnel listener
//! - [`Adapter`](crate::tunnel::Adapter), one logical connection carried
//!   inside the tunnel
//!
//! Every protocol layer is generic over `Transport`, so the service
//! catalog, RPC channel and debug session run unchanged over an adapter
//! or over a scripted in-memory stream in tests.

use crate::error::{Error, Result};

/// Blocking byte-oriented transport channel.
pub trait Transport {
    /// Read up to `buf.len()` bytes into `buf`, blocking until at least one
    /// byte is available.  End of stream is reported as a transport error,
    /// never as `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` to the transport.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()>;

    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::closed("stream returned no data"));
            }
            filled += n;
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Produces an authenticated transport to a device.
///
/// This is the narrow seam to the secure-transport collaborator: given a
/// pairing credential and an endpoint (held by the implementor), hand back a
/// ready byte stream.
pub trait TransportProvider {
    type Transport: Transport + 'static;

    /// Open and authenticate a new stream.
    fn connect(&self) -> Result<Self::Transport>;

    /// Human-readable label used in log lines.
    fn label(&self) -> &str;
}
