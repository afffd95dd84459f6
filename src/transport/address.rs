//! D-Bus server address parsing (§4.1, C9).
//!
//! Addresses are semicolon separated lists of `transport:key=value,...`
//! entries; a client tries each in order until one connects.

use crate::error::{Error, ErrorKind};

/// One parsed transport endpoint out of a D-Bus address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:path=/run/dbus/system_bus_socket`
    UnixPath(String),
    /// `unix:abstract=/tmp/dbus-xyz` (Linux abstract namespace socket).
    UnixAbstract(String),
    /// `tcp:host=127.0.0.1,port=1234[,family=ipv4|ipv6]`
    Tcp { host: String, port: u16 },
}

/// Parse a full D-Bus address string into its semicolon separated
/// endpoints, in the order a client should try them.
pub fn parse(address: &str) -> Result<Vec<Endpoint>, Error> {
    address.split(';').filter(|entry| !entry.is_empty()).map(parse_one).collect()
}

fn parse_one(entry: &str) -> Result<Endpoint, Error> {
    let (transport, rest) = entry
        .split_once(':')
        .ok_or_else(|| invalid(format!("missing `:` in address entry `{entry}`")))?;

    let fields = parse_fields(rest)?;

    match transport {
        "unix" => parse_unix(&fields, entry),
        "tcp" => parse_tcp(&fields, entry),
        other => Err(invalid(format!("unsupported transport `{other}` in `{entry}`"))),
    }
}

fn parse_fields(rest: &str) -> Result<Vec<(String, String)>, Error> {
    rest.split(',')
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .split_once('=')
                .map(|(key, value)| (key.to_owned(), unescape(value)))
                .ok_or_else(|| invalid(format!("malformed key=value field `{field}`")))
        })
        .collect()
}

fn parse_unix(fields: &[(String, String)], entry: &str) -> Result<Endpoint, Error> {
    for (key, value) in fields {
        match key.as_str() {
            "path" => return Ok(Endpoint::UnixPath(value.clone())),
            "abstract" => return Ok(Endpoint::UnixAbstract(value.clone())),
            _ => continue,
        }
    }
    Err(invalid(format!("unix address `{entry}` has neither `path` nor `abstract`")))
}

fn parse_tcp(fields: &[(String, String)], entry: &str) -> Result<Endpoint, Error> {
    let mut host = None;
    let mut port = None;

    for (key, value) in fields {
        match key.as_str() {
            "host" => host = Some(value.clone()),
            "port" => {
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| invalid(format!("invalid tcp port in `{entry}`")))?,
                )
            }
            _ => continue,
        }
    }

    let host = host.ok_or_else(|| invalid(format!("tcp address `{entry}` is missing `host`")))?;
    let port = port.ok_or_else(|| invalid(format!("tcp address `{entry}` is missing `port`")))?;
    Ok(Endpoint::Tcp { host, port })
}

/// Reverse the `%XX` percent-escaping D-Bus addresses use for bytes that
/// cannot appear literally in a key=value field.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn invalid(message: String) -> Error {
    ErrorKind::InvalidAddress(message).into()
}

/// The well known fallback address for the system bus, used when
/// `DBUS_SYSTEM_BUS_ADDRESS` is unset (§4.1).
pub const DEFAULT_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Resolve the session bus address from `DBUS_SESSION_BUS_ADDRESS`.
pub fn session_bus_address() -> Result<String, Error> {
    std::env::var("DBUS_SESSION_BUS_ADDRESS").map_err(|_| ErrorKind::MissingBus.into())
}

/// Resolve the system bus address from `DBUS_SYSTEM_BUS_ADDRESS`, falling
/// back to the well known default socket path.
pub fn system_bus_address() -> String {
    std::env::var("DBUS_SYSTEM_BUS_ADDRESS").unwrap_or_else(|_| DEFAULT_SYSTEM_BUS_ADDRESS.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        let endpoints = parse("unix:path=/run/dbus/system_bus_socket").unwrap();
        assert_eq!(endpoints, vec![Endpoint::UnixPath("/run/dbus/system_bus_socket".into())]);
    }

    #[test]
    fn parses_unix_abstract() {
        let endpoints = parse("unix:abstract=/tmp/dbus-abcd123").unwrap();
        assert_eq!(endpoints, vec![Endpoint::UnixAbstract("/tmp/dbus-abcd123".into())]);
    }

    #[test]
    fn parses_tcp() {
        let endpoints = parse("tcp:host=127.0.0.1,port=55341,family=ipv4").unwrap();
        assert_eq!(endpoints, vec![Endpoint::Tcp { host: "127.0.0.1".into(), port: 55341 }]);
    }

    #[test]
    fn parses_multiple_semicolon_separated_endpoints() {
        let endpoints =
            parse("unix:path=/run/dbus/system_bus_socket;tcp:host=localhost,port=1234").unwrap();
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn unescapes_percent_encoded_paths() {
        let endpoints = parse("unix:path=/tmp/has%20space").unwrap();
        assert_eq!(endpoints, vec![Endpoint::UnixPath("/tmp/has space".into())]);
    }

    #[test]
    fn rejects_unknown_transport() {
        assert!(parse("carrier-pigeon:path=/dev/null").is_err());
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse("not-an-address").is_err());
    }
}
