//! Validation for interface names, bus names, and member names (§3.3–§3.4).

use crate::error::{Error, ErrorKind};

const MAX_NAME_LEN: usize = 255;

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match bytes.first() {
        Some(&first) if is_name_start(first) => {}
        _ => return false,
    }
    bytes[1..].iter().all(|&b| is_name_char(b))
}

/// Validate an interface name: two or more `.`-separated components, each
/// matching `[A-Za-z_][A-Za-z0-9_]*`, total length at most 255.
pub fn validate_interface(name: &str) -> Result<(), Error> {
    if name.len() > MAX_NAME_LEN {
        return Err(ErrorKind::InvalidInterface(format!(
            "interface name `{name}` exceeds {MAX_NAME_LEN} bytes"
        ))
        .into());
    }

    let components: Vec<&str> = name.split('.').collect();
    if components.len() < 2 {
        return Err(ErrorKind::InvalidInterface(format!(
            "interface name `{name}` must have at least two components"
        ))
        .into());
    }

    if !components.iter().all(|c| is_valid_component(c)) {
        return Err(ErrorKind::InvalidInterface(format!(
            "interface name `{name}` has an invalid component"
        ))
        .into());
    }

    Ok(())
}

/// Validate a well-known or unique bus name.
///
/// Unique names start with `:` and otherwise share the dot-separated
/// component grammar of interface names, minus the "at least two
/// components" requirement on the part following the colon only when a
/// single numeric component is used by the bus daemon itself.
pub fn validate_bus_name(name: &str) -> Result<(), Error> {
    if name.len() > MAX_NAME_LEN || name.is_empty() {
        return Err(ErrorKind::InvalidBusName(format!(
            "bus name `{name}` has an invalid length"
        ))
        .into());
    }

    let rest = if let Some(rest) = name.strip_prefix(':') {
        rest
    } else {
        name
    };

    let components: Vec<&str> = rest.split('.').collect();
    if components.len() < 2 || components.iter().any(|c| c.is_empty()) {
        return Err(ErrorKind::InvalidBusName(format!(
            "bus name `{name}` must have at least two components"
        ))
        .into());
    }

    let valid = if name.starts_with(':') {
        // Unique names allow components that start with a digit.
        components
            .iter()
            .all(|c| c.bytes().all(|b| is_name_char(b)))
    } else {
        components.iter().all(|c| is_valid_component(c))
    };

    if !valid {
        return Err(ErrorKind::InvalidBusName(format!(
            "bus name `{name}` has an invalid component"
        ))
        .into());
    }

    Ok(())
}

/// Validate a member (method or signal) name: a single component matching
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_member(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !is_valid_component(name) {
        return Err(ErrorKind::InvalidMember(format!("invalid member name `{name}`")).into());
    }

    Ok(())
}

/// Test whether `name` denotes a bus-assigned unique name (begins with `:`).
pub fn is_unique_name(name: &str) -> bool {
    name.starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names() {
        assert!(validate_interface("org.freedesktop.DBus").is_ok());
        assert!(validate_interface("org").is_err());
        assert!(validate_interface("org.free-desktop").is_err());
        assert!(validate_interface(".org.freedesktop").is_err());
    }

    #[test]
    fn bus_names() {
        assert!(validate_bus_name("org.freedesktop.DBus").is_ok());
        assert!(validate_bus_name(":1.42").is_ok());
        assert!(validate_bus_name("org").is_err());
    }

    #[test]
    fn member_names() {
        assert!(validate_member("Hello").is_ok());
        assert!(validate_member("Get_Property2").is_ok());
        assert!(validate_member("2Bad").is_err());
        assert!(validate_member("a.b").is_err());
    }

    #[test]
    fn unique_name_detection() {
        assert!(is_unique_name(":1.1"));
        assert!(!is_unique_name("org.freedesktop.DBus"));
    }
}
