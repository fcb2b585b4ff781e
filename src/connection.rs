//! Client connection handles
//!
//! A tracked connection is the handle the drain path writes to and closes.
//! The worker serves the request on its own stream; the registry holds a
//! cloned handle of the same socket, so closing the tracked handle tears
//! down the transport for both sides.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Identity of a tracked connection, unique within the worker process.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next connection identity.
pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// The slice of a connection the drain path needs: write bytes, close.
///
/// Implemented by `TcpConn` for real sockets and by in-memory fakes in tests.
pub trait Conn: Send {
    fn id(&self) -> ConnId;

    /// Peer label for log lines.
    fn peer(&self) -> String;

    /// Write the full buffer, honoring the configured write timeout.
    fn send_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Tear down the transport in both directions.
    fn close(&mut self) -> std::io::Result<()>;
}

/// Tracked handle to an accepted TCP client.
pub struct TcpConn {
    id: ConnId,
    peer: SocketAddr,
    stream: TcpStream,
}

impl TcpConn {
    /// Wrap a cloned stream handle. The write timeout bounds the drain's
    /// terminal write so one unresponsive client cannot stall the rest.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        write_timeout: Duration,
    ) -> std::io::Result<Self> {
        // set_write_timeout rejects a zero Duration; zero means "no timeout"
        let timeout = if write_timeout.is_zero() {
            None
        } else {
            Some(write_timeout)
        };
        stream.set_write_timeout(timeout)?;
        Ok(Self {
            id: next_conn_id(),
            peer,
            stream,
        })
    }
}

impl Conn for TcpConn {
    fn id(&self) -> ConnId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn send_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    #[test]
    fn test_conn_ids_are_unique() {
        let a = next_conn_id();
        let b = next_conn_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_send_all_then_close_reaches_peer() {
        let (mut client, server, peer) = socket_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut conn = TcpConn::new(server, peer, Duration::from_millis(500)).unwrap();
        conn.send_all(b"bye now").unwrap();
        conn.close().unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"bye now");
    }

    #[test]
    fn test_zero_write_timeout_means_unbounded() {
        let (_client, server, peer) = socket_pair();
        // Must not error: Duration::ZERO maps to "no timeout"
        let conn = TcpConn::new(server, peer, Duration::ZERO).unwrap();
        assert!(conn.id() > 0);
    }

    #[test]
    fn test_peer_label() {
        let (_client, server, peer) = socket_pair();
        let conn = TcpConn::new(server, peer, Duration::from_millis(500)).unwrap();
        assert_eq!(conn.peer(), peer.to_string());
    }
}
