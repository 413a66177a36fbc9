//! Ping-pong integration tests for the bridge.

#![deny(unsafe_code)] // unsafety should all be in the library.

use biobridge::{Bridge, BridgeConfig, Conn};

use async_trait::async_trait;
use bytes::BytesMut;
use std::io::{Read, Write};
use std::sync::Arc;
use test_case::test_case;
use tokio::net::UnixStream;

#[async_trait]
trait SockIO: Send + Sync + 'static {
    async fn ready(&self, interest: tokio::io::Interest) -> std::io::Result<tokio::io::Ready>;

    fn try_recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn try_send(&self, buf: &[u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl SockIO for tokio::net::UnixStream {
    async fn ready(&self, interest: tokio::io::Interest) -> std::io::Result<tokio::io::Ready> {
        Self::ready(self, interest).await
    }

    fn try_recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        Self::try_read(self, buf)
    }

    fn try_send(&self, buf: &[u8]) -> std::io::Result<usize> {
        Self::try_write(self, buf)
    }
}

/// A non-blocking socket as a [`Conn`]: an idle socket reports
/// `WouldBlock` instead of blocking.
struct SockConn<S: SockIO>(Arc<S>);

impl<S: SockIO> Conn for SockConn<S> {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.try_recv(buf)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.try_send(buf)
    }
}

/// One end of the conversation: the bridge plays engine and connection
/// owner at once, awaiting socket readiness whenever it would block.
struct Peer<S: SockIO> {
    sock: Arc<S>,
    bridge: Bridge,
}

impl<S: SockIO> Peer<S> {
    fn new(sock: S, config: BridgeConfig) -> Self {
        let sock = Arc::new(sock);
        let bridge = Bridge::new(Arc::new(SockConn(Arc::clone(&sock))), config).expect("Create bridge");
        Self { sock, bridge }
    }

    async fn poll(&self, interest: tokio::io::Interest) {
        let _ = self.sock.ready(interest).await.unwrap();
    }

    async fn send(&self, msg: &[u8]) {
        self.bridge.write_stream().write_all(msg).expect("write_stream");
        loop {
            match self.bridge.flush_all() {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.poll(tokio::io::Interest::WRITABLE).await
                }
                Err(e) => panic!("flush_all: {e}"),
            }
        }
        assert_eq!(self.bridge.writer().pending(), 0);
    }

    /// Returns 0 only at end of stream.
    async fn recv(&self, buf: &mut [u8]) -> usize {
        loop {
            let nr = self.bridge.read_stream().read(buf).expect("read_stream");
            if nr > 0 || self.bridge.reader().is_eof() {
                return nr;
            }
            match self.bridge.pump_read() {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.poll(tokio::io::Interest::READABLE).await
                }
                Err(e) => panic!("pump_read: {e}"),
            }
        }
    }

    async fn recv_exact(&self, len: usize) -> BytesMut {
        let mut out = BytesMut::with_capacity(len);
        let mut buf = [0u8; 1900];
        while out.len() < len {
            let want = (len - out.len()).min(buf.len());
            let nr = self.recv(&mut buf[..want]).await;
            assert_ne!(nr, 0, "Unexpected end of stream");
            out.extend_from_slice(&buf[..nr]);
        }
        out
    }
}

async fn client<S: SockIO>(sock: S, config: BridgeConfig) {
    let peer = Peer::new(sock, config);

    println!("[Client] Starting ping/pong loop");

    for ping in ["Hello", "Goodbye", "QUIT"] {
        println!("[Client] Send {ping}");
        peer.send(ping.as_bytes()).await;

        let pong = peer.recv_exact(ping.len()).await;
        let pong = String::from_utf8_lossy(&pong);
        println!("[Client] Got pong: {pong}");
        assert_eq!(pong, ping);
    }

    peer.bridge.close();
    println!("[Client] Finished");
}

async fn server<S: SockIO>(sock: S, config: BridgeConfig) {
    let peer = Peer::new(sock, config);
    let mut buf = [0u8; 1900];
    let mut seen = BytesMut::new();

    println!("[Server] Starting ping/pong loop");

    // Small records may split a ping, so echo whatever arrives.
    while !seen.ends_with(b"QUIT") {
        let nr = peer.recv(&mut buf).await;
        assert_ne!(nr, 0, "Client hung up before QUIT");
        println!("[Server] Got ping: {}", String::from_utf8_lossy(&buf[..nr]));

        peer.send(&buf[..nr]).await;
        seen.extend_from_slice(&buf[..nr]);
    }

    // The client hangs up after its last pong.
    assert_eq!(peer.recv(&mut buf).await, 0);
    assert!(peer.bridge.reader().is_eof());
    assert_eq!(&seen[..], b"HelloGoodbyeQUIT");

    println!("[Server] Finished");
}

#[test_case(false, None; "default")]
#[test_case(true, None; "release_buffers")]
#[test_case(false, Some(3); "tiny_records")]
#[test_case(true, Some(3); "release_buffers_tiny_records")]
#[tokio::test]
async fn stream(release_buffers: bool, record_size: Option<usize>) {
    let config = BridgeConfig::new()
        .with_release_buffers(release_buffers)
        .when_some(record_size, BridgeConfig::with_record_size);

    // Communicate over a local stream socket for simplicity
    let (client_sock, server_sock) = UnixStream::pair().expect("UnixStream");

    let client = client(client_sock, config.clone());
    let server = server(server_sock, config);

    // Note that this runs concurrently but not in parallel
    tokio::join!(client, server);
}

#[tokio::test]
async fn bulk_transfer() {
    const LEN: usize = 4 * 1024 * 1024;

    let (a, b) = UnixStream::pair().expect("UnixStream");
    let data: Vec<u8> = (0..LEN).map(|i| (i % 253) as u8).collect();

    let sender = async {
        let peer = Peer::new(a, BridgeConfig::new());
        // More than the socket buffers hold: flushing has to wait on the
        // receiver.
        peer.send(&data).await;
        println!("[Sender] Finished");
    };

    let receiver = async {
        let peer = Peer::new(b, BridgeConfig::new().with_record_size(1000));
        let received = peer.recv_exact(LEN).await;
        assert_eq!(&received[..], &data[..]);
        assert_eq!(peer.recv(&mut [0u8; 16]).await, 0);
        println!("[Receiver] Finished");
    };

    tokio::join!(sender, receiver);
}
