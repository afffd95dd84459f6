//! `DBUS_COOKIE_SHA1` keyring file access (§4.4).

use std::env;
use std::fs;
use std::path::PathBuf;

use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind};

use super::hex;

fn keyring_dir() -> PathBuf {
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join("dbus-1").join("keyrings");
        }
    }

    let home = env::var("HOME").unwrap_or_else(|_| "/".to_owned());
    PathBuf::from(home).join(".dbus-keyrings")
}

/// Read the cookie identified by `cookie_id` out of the keyring file for
/// `context`.
///
/// Keyring files are newline-separated records of `<id> <timestamp>
/// <cookie>`; this reads only read-only collaborator input, never writes
/// one.
pub(crate) fn read_cookie(context: &str, cookie_id: &str) -> Result<String, Error> {
    let path = keyring_dir().join(context);
    let contents = fs::read_to_string(&path).map_err(|error| {
        Error::from(ErrorKind::AuthenticationFailed(format!(
            "could not read cookie file {}: {error}",
            path.display()
        )))
    })?;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(id) = parts.next() else { continue };
        if id != cookie_id {
            continue;
        }
        let Some(_timestamp) = parts.next() else { continue };
        let Some(cookie) = parts.next() else { continue };
        return Ok(cookie.to_owned());
    }

    Err(ErrorKind::AuthenticationFailed(format!(
        "no cookie with id {cookie_id} in context {context}"
    ))
    .into())
}

/// Generate a client challenge: at least 16 random bytes, hex encoded.
pub(crate) fn generate_client_challenge() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(&bytes)
}

/// Compute `SHA1("<server-challenge>:<client-challenge>:<cookie>")`, hex
/// encoded, per the standard `DBUS_COOKIE_SHA1` mechanism.
pub(crate) fn compute_response(server_challenge: &str, client_challenge: &str, cookie: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(client_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(cookie.as_bytes());
    hex::encode(&hasher.finalize())
}
