//! Secure-connection interface.
//!
//! The stream never touches the transport directly; it only answers identity
//! and address queries by delegating to the connection all streams of one
//! session share. The muxer owns the real connection object and hands every
//! stream a shared handle at construction.

use core::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Identity of the remote peer, as established by the secure transport
/// handshake. Opaque to the stream layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Bytes);

impl PeerId {
    /// Wrap a raw identity.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// The raw identity bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Transport address in multiaddr notation, e.g. `/ip4/127.0.0.1/tcp/4001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Multiaddr(String);

impl Multiaddr {
    /// Wrap an address string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address in string notation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queries the stream delegates to the underlying secure connection.
///
/// Each accessor may fail, typically with [`Error::ConnectionClosed`] once
/// the session is torn down; the stream forwards the failure verbatim.
///
/// [`Error::ConnectionClosed`]: crate::error::Error::ConnectionClosed
pub trait SecureConnection {
    /// Identity of the remote peer.
    fn remote_peer(&self) -> Result<PeerId>;

    /// Whether the local side initiated the connection.
    fn is_initiator(&self) -> Result<bool>;

    /// Local transport address.
    fn local_multiaddr(&self) -> Result<Multiaddr>;

    /// Remote transport address.
    fn remote_multiaddr(&self) -> Result<Multiaddr>;
}
