use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

/// The byte stream a connection runs over: plain TCP, or TCP wrapped in
/// TLS for wss endpoints. Both the client dialer and the server acceptor
/// produce this type, so the rest of the crate never cares which one it
/// got.
pub enum SocketWireStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

impl AsyncRead for SocketWireStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketWireStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SocketWireStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketWireStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketWireStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SocketWireStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketWireStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SocketWireStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketWireStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SocketWireStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
