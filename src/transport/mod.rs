//! Datagram transport between the controller and the UUT.

pub mod udp;

use std::net::SocketAddr;

use thiserror::Error;

pub use udp::UdpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open UDP socket towards {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("UUT address {0} did not resolve to any socket address")]
    Unresolved(String),

    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),

    #[error("incomplete send: {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },

    #[error("failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),

    #[error("timed out waiting for a datagram")]
    Timeout,

    #[error("expected a {expected}-byte datagram from {peer}, got {got} bytes")]
    UnexpectedLength {
        expected: usize,
        got: usize,
        peer: SocketAddr,
    },
}

/// One shared datagram endpoint.
///
/// Methods take `&self`: the orchestrator sends once, then hands the same
/// transport to every listener thread. Sends and receives never overlap.
pub trait Transport: Send + Sync {
    /// Send one datagram to the UUT.
    fn send_datagram(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until one datagram arrives from any sender.
    ///
    /// Fails with [`TransportError::UnexpectedLength`] unless the datagram is
    /// exactly `expected_len` bytes long.
    fn receive_datagram(&self, expected_len: usize) -> Result<(Vec<u8>, SocketAddr), TransportError>;
}
