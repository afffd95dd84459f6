//! Unix domain socket connections (§4.1, C9).

use tokio::net::UnixStream;

use crate::error::Error;

/// Connect to a named filesystem socket.
pub(crate) async fn connect_path(path: &str) -> Result<UnixStream, Error> {
    Ok(UnixStream::connect(path).await?)
}

/// Connect to a Linux abstract-namespace socket.
///
/// Tokio has no direct abstract-socket constructor, so the leading NUL
/// [`std::os::linux::net::SocketAddrExt`] requires is built by hand and
/// bound through `std`'s non-blocking `UnixStream` before handing the
/// socket to Tokio.
#[cfg(target_os = "linux")]
pub(crate) async fn connect_abstract(name: &str) -> Result<UnixStream, Error> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};

    let address = SocketAddr::from_abstract_name(name.as_bytes())?;
    let std_stream = StdUnixStream::connect_addr(&address)?;
    std_stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(std_stream)?)
}

#[cfg(not(target_os = "linux"))]
pub(crate) async fn connect_abstract(_name: &str) -> Result<UnixStream, Error> {
    Err(crate::error::ErrorKind::TransportFailure(
        "abstract unix sockets are only supported on linux".into(),
    )
    .into())
}
