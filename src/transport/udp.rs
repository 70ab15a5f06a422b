//! UDP socket bound to an ephemeral local port, aimed at a fixed UUT endpoint.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use super::{Transport, TransportError};

/// Large enough to hold any datagram the UUT could plausibly send, so that
/// oversized replies are reported with their real length.
const RECV_BUF_LEN: usize = 1500;

pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Resolve `address:port`, bind a local socket of the same family and cache
    /// the destination.
    ///
    /// `receive_timeout` of `None` (or zero) makes every receive block
    /// indefinitely.
    pub fn open(
        address: &str,
        port: u16,
        receive_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let target = format!("{}:{}", address, port);
        let destination = (address, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::Unresolved(target.clone()))?;

        let bind_addr = if destination.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).map_err(|source| TransportError::Connect {
            target: target.clone(),
            source,
        })?;

        let timeout = receive_timeout.filter(|t| !t.is_zero());
        socket
            .set_read_timeout(timeout)
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        info!(
            %destination,
            local = ?socket.local_addr().ok(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "UDP transport ready"
        );

        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(bytes, self.destination)
            .map_err(TransportError::Send)?;
        if sent != bytes.len() {
            return Err(TransportError::PartialSend {
                sent,
                expected: bytes.len(),
            });
        }
        debug!(destination = %self.destination, bytes = sent, "datagram sent");
        Ok(())
    }

    fn receive_datagram(&self, expected_len: usize) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let (len, peer) = self.socket.recv_from(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Receive(e),
        })?;
        debug!(%peer, bytes = len, "datagram received");
        if len != expected_len {
            return Err(TransportError::UnexpectedLength {
                expected: expected_len,
                got: len,
                peer,
            });
        }
        Ok((buf[..len].to_vec(), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_socket() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    #[test]
    fn test_send_reaches_destination() {
        let (uut, port) = peer_socket();
        let transport = UdpTransport::open("127.0.0.1", port, None).unwrap();
        transport.send_datagram(b"command").unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = uut.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"command");
    }

    #[test]
    fn test_receive_checks_length() {
        let (uut, port) = peer_socket();
        let transport = UdpTransport::open("127.0.0.1", port, Some(Duration::from_secs(5))).unwrap();
        let local = transport.local_addr().unwrap();
        let reply_to = SocketAddr::from(([127, 0, 0, 1], local.port()));

        uut.send_to(&[1, 2, 3, 4, 5, 6], reply_to).unwrap();
        let (bytes, peer) = transport.receive_datagram(6).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(peer, uut.local_addr().unwrap());

        uut.send_to(&[1, 2, 3], reply_to).unwrap();
        let err = transport.receive_datagram(6).unwrap_err();
        assert!(matches!(
            err,
            TransportError::UnexpectedLength { expected: 6, got: 3, .. }
        ));
    }

    #[test]
    fn test_receive_times_out_when_configured() {
        let (_uut, port) = peer_socket();
        let transport =
            UdpTransport::open("127.0.0.1", port, Some(Duration::from_millis(50))).unwrap();
        let err = transport.receive_datagram(6).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[test]
    fn test_unresolvable_host_is_connect_error() {
        let err = UdpTransport::open("no-such-host.invalid", 54321, None)
            .err()
            .expect("resolution should fail");
        assert!(matches!(
            err,
            TransportError::Connect { .. } | TransportError::Unresolved(_)
        ));
    }
}
