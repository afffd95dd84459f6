//! An asynchronous D-Bus client built on Tokio.
//!
//! This crate implements the wire-level core of the D-Bus protocol: the
//! type system and codec ([`signature`], [`value`], [`codec`]), message
//! framing ([`message`], [`frame`]), the SASL authentication handshake
//! ([`sasl`]), and a connection runtime that dispatches inbound traffic to
//! registered handlers while correlating outbound calls with their replies
//! ([`connection`], [`pipeline`], [`correlator`]).
//!
//! ```no_run
//! # async fn run() -> Result<(), dbus_rt::Error> {
//! use dbus_rt::connection::{Connection, ConnectionBuilder};
//!
//! let connection = Connection::connect(ConnectionBuilder::new().session_bus().build()).await?;
//! println!("connected as {:?}", connection.unique_name());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod event;
pub mod frame;
pub mod health;
pub mod message;
pub mod names;
pub mod object_path;
pub mod peer;
pub mod pipeline;
pub mod reconnect;
pub mod sasl;
pub mod serial;
pub mod signature;
pub mod transport;
pub mod value;

#[doc(inline)]
pub use connection::{Connection, ConnectionBuilder};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use message::{Flags, Message, MessageKind};
#[doc(inline)]
pub use object_path::ObjectPathBuf;
#[doc(inline)]
pub use signature::{SignatureError, Type};
#[doc(inline)]
pub use value::Value;
