//! The raw byte connection a VIF multiplexes over.
//!
//! A VIF only needs something it can split into a reader half and a
//! writer half; it does not care whether that is a TCP socket, a proxied
//! tunnel, or an in-memory pipe used in tests. [`RawConn`] is that least
//! common denominator.

use std::io;
use std::net::SocketAddr;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use vflow_core::error::{Error, Result};

/// A duplex byte stream, boxed so the VIF can be generic over transport
/// (TCP today; the protocol-registered dialer/listener model from the
/// spec leaves room for others without touching VIF internals).
pub trait RawConn: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn peer_addr_string(&self) -> String;
}

impl RawConn for TcpStream {
    fn peer_addr_string(&self) -> String {
        self.peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

pub type BoxedConn = Box<dyn RawConn>;

/// Applies a short linger so a closed VC's socket releases promptly
/// instead of lingering in `TIME_WAIT` under the kernel default.
fn configure_linger(stream: &TcpStream) -> io::Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_linger(Some(std::time::Duration::from_secs(2)))
}

/// Dials a TCP byte connection (the "protocol-registered dialer" of
/// spec §4.5, narrowed to the one protocol this crate implements).
pub async fn dial_tcp(address: &str) -> Result<BoxedConn> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| Error::from(e))?;
    stream.set_nodelay(true).ok();
    configure_linger(&stream).ok();
    Ok(Box::new(stream))
}

/// A bound TCP listener producing [`RawConn`]s plus the peer address of
/// each accepted connection.
pub struct TcpRawListener {
    inner: TokioTcpListener,
}

impl TcpRawListener {
    pub async fn bind(address: &str) -> Result<Self> {
        let inner = TokioTcpListener::bind(address).await.map_err(Error::from)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Error::from)
    }

    pub async fn accept(&self) -> Result<(BoxedConn, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await.map_err(Error::from)?;
        stream.set_nodelay(true).ok();
        configure_linger(&stream).ok();
        Ok((Box::new(stream), peer))
    }
}

/// An in-memory connection pair used by tests in place of TCP.
pub fn mem_pair() -> (BoxedConn, BoxedConn) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (Box::new(DuplexConn(a)), Box::new(DuplexConn(b)))
}

struct DuplexConn(tokio::io::DuplexStream);

impl RawConn for DuplexConn {
    fn peer_addr_string(&self) -> String {
        "mem".to_string()
    }
}

impl AsyncRead for DuplexConn {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexConn {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
