use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::connection::ConnectionState;
use crate::signature::SignatureError;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Returns the remote error name and message, if this error wraps a
    /// D-Bus `ERROR` reply.
    pub fn remote_error(&self) -> Option<(&str, Option<&str>)> {
        match &self.kind {
            ErrorKind::RemoteError { name, message } => Some((name, message.as_deref())),
            _ => None,
        }
    }

    /// Test whether this error represents a call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::CallTimeout)
    }

    /// Test whether this error represents a lost connection.
    pub fn is_disconnected(&self) -> bool {
        matches!(self.kind, ErrorKind::Disconnected)
    }

    /// Test whether this error represents backpressure rejection (too many
    /// calls already pending).
    pub fn is_busy(&self) -> bool {
        matches!(self.kind, ErrorKind::Busy)
    }

    /// Test whether this error represents a call rejected because the
    /// connection was not in a state that admits calls (§4.8, §5).
    pub fn is_not_connected(&self) -> bool {
        matches!(self.kind, ErrorKind::NotConnected(_))
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::new(ErrorKind::WouldBlock),
            _ => Self::new(ErrorKind::Io(error)),
        }
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::Utf8Error(error) => error.fmt(f),
            ErrorKind::WouldBlock => write!(f, "would block"),
            ErrorKind::BufferUnderflow => write!(f, "buffer underflow"),
            ErrorKind::InvalidSignature(reason) => write!(f, "invalid signature: {reason}"),
            ErrorKind::InvalidPath(reason) => write!(f, "invalid object path: {reason}"),
            ErrorKind::InvalidInterface(reason) => write!(f, "invalid interface name: {reason}"),
            ErrorKind::InvalidMember(reason) => write!(f, "invalid member name: {reason}"),
            ErrorKind::InvalidBusName(reason) => write!(f, "invalid bus name: {reason}"),
            ErrorKind::InvalidData(reason) => write!(f, "invalid data: {reason}"),
            ErrorKind::MalformedMessage(reason) => write!(f, "malformed message: {reason}"),
            ErrorKind::AuthenticationFailed(reason) => {
                write!(f, "SASL authentication failed: {reason}")
            }
            ErrorKind::TransportFailure(reason) => write!(f, "transport failure: {reason}"),
            ErrorKind::NotConnected(state) => {
                write!(f, "not connected (current state is `{state}`)")
            }
            ErrorKind::InvalidAddress(reason) => write!(f, "invalid d-bus address: {reason}"),
            ErrorKind::MissingBus => write!(f, "missing session or system bus address"),
            ErrorKind::CallTimeout => write!(f, "method call timed out"),
            ErrorKind::Disconnected => write!(f, "connection was lost while the call was pending"),
            ErrorKind::RemoteError { name, message } => match message {
                Some(message) => write!(f, "remote error {name}: {message}"),
                None => write!(f, "remote error {name}"),
            },
            ErrorKind::Cancelled => write!(f, "call was cancelled"),
            ErrorKind::Busy => write!(f, "outbound write buffer is full"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

/// The private discriminant behind [`Error`].
///
/// Kept private so that new variants can be added without a breaking change;
/// match on [`Error`]'s accessor methods instead.
#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    Utf8Error(Utf8Error),
    WouldBlock,
    BufferUnderflow,
    InvalidSignature(String),
    InvalidPath(String),
    InvalidInterface(String),
    InvalidMember(String),
    InvalidBusName(String),
    InvalidData(String),
    MalformedMessage(String),
    AuthenticationFailed(String),
    TransportFailure(String),
    NotConnected(ConnectionState),
    InvalidAddress(String),
    MissingBus,
    CallTimeout,
    Disconnected,
    RemoteError {
        name: String,
        message: Option<String>,
    },
    Cancelled,
    Busy,
}
