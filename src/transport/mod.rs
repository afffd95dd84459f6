//! Transport abstraction and addressing (§4.1, C9).

pub mod address;
mod tcp;
mod unix;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use crate::error::{Error, ErrorKind};

use address::Endpoint;

/// A connected, byte-oriented stream to a message bus.
///
/// Both variants implement [`AsyncRead`]/[`AsyncWrite`] directly so the
/// connection runtime can drive either transport without branching.
pub enum BusTransport {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl BusTransport {
    /// Try every endpoint in `address` in order, returning the first one
    /// that connects.
    pub async fn connect(address: &str) -> Result<Self, Error> {
        let endpoints = address::parse(address)?;
        if endpoints.is_empty() {
            return Err(ErrorKind::InvalidAddress(format!("`{address}` has no endpoints")).into());
        }

        let mut last_error = None;
        for endpoint in &endpoints {
            match Self::connect_endpoint(endpoint).await {
                Ok(transport) => return Ok(transport),
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| ErrorKind::TransportFailure("no reachable endpoint".into()).into()))
    }

    async fn connect_endpoint(endpoint: &Endpoint) -> Result<Self, Error> {
        match endpoint {
            Endpoint::UnixPath(path) => Ok(BusTransport::Unix(unix::connect_path(path).await?)),
            Endpoint::UnixAbstract(name) => Ok(BusTransport::Unix(unix::connect_abstract(name).await?)),
            Endpoint::Tcp { host, port } => Ok(BusTransport::Tcp(tcp::connect(host, *port).await?)),
        }
    }
}

impl AsyncRead for BusTransport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusTransport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            BusTransport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BusTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BusTransport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            BusTransport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusTransport::Unix(stream) => Pin::new(stream).poll_flush(cx),
            BusTransport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BusTransport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            BusTransport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
