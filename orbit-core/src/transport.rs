use std::io;
use std::sync::mpsc;
use std::time::Duration;

/// The DTLS 1.2 datagram transport the engine drives. Credentials, handshake
/// mechanics, and socket I/O are external collaborators per spec §1/§6 -- this trait
/// is the seam the engine talks to, not an implementation of DTLS itself.
pub trait DtlsTransport: Send {
    /// Sends one datagram. The handshake kick is an empty CoAP packet sent the same
    /// way as any other datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for one inbound datagram. `Ok(None)` means the timeout
    /// elapsed with nothing to read.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// An in-memory loopback transport pair for tests: whatever one end sends, the
/// other end's `recv` returns. Stands in for the real DTLS socket the way the
/// reference SDK's test harness stubs the socket layer.
pub struct LoopbackTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            LoopbackTransport { tx: tx_a, rx: rx_b },
            LoopbackTransport { tx: tx_b, rx: rx_a },
        )
    }
}

impl DtlsTransport for LoopbackTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer dropped"))
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer dropped"))
            }
        }
    }
}
