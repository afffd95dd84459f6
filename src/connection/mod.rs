//! Connection lifecycle, configuration, and the steady-state runtime
//! (§4.8, C8).

pub mod builder;
mod connection;
mod state;

pub use builder::{BusChoice, ConnectionBuilder, ConnectionConfig};
pub use connection::Connection;
pub use state::ConnectionState;
