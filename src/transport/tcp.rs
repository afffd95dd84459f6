//! TCP connections (§4.1, C9).

use tokio::net::TcpStream;

use crate::error::Error;

/// Connect to a host:port pair, disabling Nagle's algorithm since D-Bus
/// messages are framed and latency sensitive.
pub(crate) async fn connect(host: &str, port: u16) -> Result<TcpStream, Error> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
