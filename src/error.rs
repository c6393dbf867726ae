//! Unified error type for the device protocol stack.
//!
//! Every layer (transport, tunnel, adapter, catalog, RPC, debug session)
//! funnels into a single [`Error`] enum so the orchestration code can
//! abort the pipeline uniformly.  [`ErrorKind`] is the `Copy`
//! discriminant callers match on when deciding whether to retry.

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Error kind
// ---------------------------------------------------------------------------

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed address, missing or corrupt credential, invalid config.
    Input,
    /// The underlying byte stream failed or closed unexpectedly.
    Transport,
    /// Tunnel (or pairing) negotiation was rejected or malformed.
    Handshake,
    /// A received message did not conform to the expected framing, or a
    /// handle was driven through an invalid state transition.
    ProtocolViolation,
    /// The device refused a multiplexed port bind.
    Connect,
    /// The wrapper's adapter has already been extracted.
    UseAfterExtract,
    /// A second invocation was issued while a reply is outstanding.
    ConcurrentInvocation,
    /// The bundle identifier is unknown to the device.
    BundleNotFound,
    /// The device refused to launch the application.
    LaunchRefused,
    /// The debugserver answered `vAttach` with an error packet.
    AttachRefused,
    /// An attach is already outstanding on this debug session.
    AlreadyAttached,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "input error",
            Self::Transport => "transport error",
            Self::Handshake => "handshake error",
            Self::ProtocolViolation => "protocol violation",
            Self::Connect => "connect error",
            Self::UseAfterExtract => "use after extract",
            Self::ConcurrentInvocation => "concurrent invocation",
            Self::BundleNotFound => "bundle not found",
            Self::LaunchRefused => "launch refused",
            Self::AttachRefused => "attach refused",
            Self::AlreadyAttached => "already attached",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate returns this type.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied input could not be used.
    Input(String),
    /// Byte stream failure. `source` carries the OS-level cause when known.
    Transport {
        context: &'static str,
        source: Option<io::Error>,
    },
    /// Negotiation rejected or malformed.
    Handshake(String),
    /// Framing or state-machine violation.
    ProtocolViolation(String),
    /// Device refused (or failed to answer) a bind to `port`.
    Connect { port: u16, reason: String },
    /// The wrapper no longer owns its adapter.
    UseAfterExtract,
    /// A reply to message `pending` is still outstanding.
    ConcurrentInvocation { pending: u32 },
    /// Launch failed because the bundle is not installed.
    BundleNotFound(String),
    /// Launch failed for policy or signing reasons.
    LaunchRefused(String),
    /// The debugserver refused to attach.
    AttachRefused(String),
    /// `attach` called twice without a `detach` in between.
    AlreadyAttached { pid: u64 },
}

impl Error {
    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Handshake(_) => ErrorKind::Handshake,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::UseAfterExtract => ErrorKind::UseAfterExtract,
            Self::ConcurrentInvocation { .. } => ErrorKind::ConcurrentInvocation,
            Self::BundleNotFound(_) => ErrorKind::BundleNotFound,
            Self::LaunchRefused(_) => ErrorKind::LaunchRefused,
            Self::AttachRefused(_) => ErrorKind::AttachRefused,
            Self::AlreadyAttached { .. } => ErrorKind::AlreadyAttached,
        }
    }

    /// Transport failure without an OS-level cause (peer closed, tunnel shut down).
    pub(crate) fn closed(context: &'static str) -> Self {
        Self::Transport {
            context,
            source: None,
        }
    }

    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Transport {
            context,
            source: Some(source),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(msg) => write!(f, "input error: {msg}"),
            Self::Transport {
                context,
                source: Some(e),
            } => write!(f, "transport error: {context}: {e}"),
            Self::Transport {
                context,
                source: None,
            } => write!(f, "transport error: {context}"),
            Self::Handshake(msg) => write!(f, "handshake error: {msg}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::Connect { port, reason } => {
                write!(f, "connect to port {port} failed: {reason}")
            }
            Self::UseAfterExtract => write!(f, "adapter already extracted from this handle"),
            Self::ConcurrentInvocation { pending } => {
                write!(f, "invocation {pending} still awaiting its reply")
            }
            Self::BundleNotFound(bundle) => write!(f, "bundle not found: {bundle}"),
            Self::LaunchRefused(msg) => write!(f, "launch refused: {msg}"),
            Self::AttachRefused(msg) => write!(f, "attach refused: {msg}"),
            Self::AlreadyAttached { pid } => {
                write!(f, "already attached to pid {pid}; detach first")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport {
                source: Some(e), ..
            } => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::ProtocolViolation(format!("malformed JSON payload: {e}"))
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Self::ProtocolViolation(format!("malformed RPC body: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
