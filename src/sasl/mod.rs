//! Line-oriented SASL authentication handshake (§4.4, C4).
//!
//! The pre-protocol is ASCII, CRLF terminated. [`SaslClient`] drives the
//! client side of the handshake; the caller owns reading lines off the
//! transport and feeding them back in with [`SaslClient::feed_line`].

mod cookie;
mod hex;


use crate::error::{Error, ErrorKind};

/// A SASL authentication mechanism this client is willing to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Authenticate using the transport's peer credentials.
    External,
    /// Authenticate using a shared-secret cookie file and a SHA1 challenge.
    CookieSha1,
    /// No authentication at all.
    Anonymous,
}

impl Mechanism {
    fn wire_name(self) -> &'static str {
        match self {
            Mechanism::External => "EXTERNAL",
            Mechanism::CookieSha1 => "DBUS_COOKIE_SHA1",
            Mechanism::Anonymous => "ANONYMOUS",
        }
    }
}

/// The default mechanism negotiation order (§4.4).
pub fn default_mechanisms() -> Vec<Mechanism> {
    vec![Mechanism::External, Mechanism::CookieSha1, Mechanism::Anonymous]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    WaitingData(Mechanism),
    WaitingOk(Mechanism),
    WaitingAgreeUnixFd,
    WaitingReject,
    Authenticated,
    Failed,
}

/// The outcome of feeding one line into [`SaslClient`].
pub enum SaslOutcome {
    /// Write this line (already CRLF terminated) to the transport.
    Send(Vec<u8>),
    /// The handshake is complete. `begin` is the final `BEGIN\r\n` line,
    /// which the caller must write before switching to the binary framer.
    Authenticated {
        guid: String,
        unix_fd_enabled: bool,
        begin: Vec<u8>,
    },
    /// Every configured mechanism was rejected, or the server sent a line
    /// the state machine could not make sense of.
    Failed(Error),
}

/// Drives the client side of the SASL handshake (§4.4).
pub struct SaslClient {
    mechanisms: Vec<Mechanism>,
    index: usize,
    state: ClientState,
    negotiate_unix_fd: bool,
    guid: Option<String>,
    unix_fd_enabled: bool,
}

impl SaslClient {
    /// Construct a client that will try `mechanisms` in order, optionally
    /// negotiating Unix file descriptor passing after authentication.
    pub fn new(mechanisms: Vec<Mechanism>, negotiate_unix_fd: bool) -> Self {
        assert!(!mechanisms.is_empty(), "at least one mechanism is required");
        Self {
            mechanisms,
            index: 0,
            state: ClientState::WaitingOk(Mechanism::External),
            negotiate_unix_fd,
            guid: None,
            unix_fd_enabled: false,
        }
    }

    /// The single zero byte stream transports require before any SASL
    /// traffic (§6.1).
    pub const fn initial_byte() -> u8 {
        0
    }

    /// Produce the first `AUTH ...` line, starting from the first
    /// configured mechanism.
    pub fn start(&mut self) -> Vec<u8> {
        self.try_mechanism(0)
    }

    fn try_mechanism(&mut self, index: usize) -> Vec<u8> {
        self.index = index;
        let mechanism = self.mechanisms[index];

        match mechanism {
            Mechanism::External => {
                self.state = ClientState::WaitingOk(mechanism);
                line(&format!("AUTH {} {}", mechanism.wire_name(), hex::encode(current_uid().as_bytes())))
            }
            Mechanism::CookieSha1 => {
                self.state = ClientState::WaitingData(mechanism);
                line(&format!(
                    "AUTH {} {}",
                    mechanism.wire_name(),
                    hex::encode(current_username().as_bytes())
                ))
            }
            Mechanism::Anonymous => {
                self.state = ClientState::WaitingOk(mechanism);
                line(&format!(
                    "AUTH {} {}",
                    mechanism.wire_name(),
                    hex::encode(b"dbus-rt")
                ))
            }
        }
    }

    fn next_mechanism_or_fail(&mut self) -> SaslOutcome {
        let next = self.index + 1;
        if next < self.mechanisms.len() {
            SaslOutcome::Send(self.try_mechanism(next))
        } else {
            self.state = ClientState::Failed;
            SaslOutcome::Failed(
                ErrorKind::AuthenticationFailed("all SASL mechanisms were rejected".into()).into(),
            )
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> SaslOutcome {
        self.state = ClientState::Failed;
        SaslOutcome::Failed(ErrorKind::AuthenticationFailed(reason.into()).into())
    }

    /// Feed one line received from the server (without its trailing CRLF,
    /// or with it — both are accepted).
    pub fn feed_line(&mut self, raw: &str) -> SaslOutcome {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let mut parts = raw.splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").to_owned();

        match (self.state, command) {
            (ClientState::WaitingData(mechanism), "DATA") => self.handle_data(mechanism, &rest),
            (ClientState::WaitingData(_), "OK") => self.handle_ok(&rest),
            (ClientState::WaitingData(_), "REJECTED") => self.next_mechanism_or_fail(),
            (ClientState::WaitingData(_), "ERROR") => {
                self.state = ClientState::WaitingReject;
                SaslOutcome::Send(line("CANCEL"))
            }
            (ClientState::WaitingOk(_), "OK") => self.handle_ok(&rest),
            (ClientState::WaitingOk(_), "REJECTED") => self.next_mechanism_or_fail(),
            (ClientState::WaitingOk(_), _) => {
                self.state = ClientState::WaitingReject;
                SaslOutcome::Send(line("CANCEL"))
            }
            (ClientState::WaitingAgreeUnixFd, "AGREE_UNIX_FD") => {
                self.unix_fd_enabled = true;
                self.finish()
            }
            (ClientState::WaitingAgreeUnixFd, _) => {
                self.unix_fd_enabled = false;
                self.finish()
            }
            (ClientState::WaitingReject, "REJECTED") => self.next_mechanism_or_fail(),
            (ClientState::Authenticated | ClientState::Failed, _) => {
                self.fail("received SASL traffic after the handshake completed")
            }
            _ => self.fail(format!("unexpected SASL line `{raw}`")),
        }
    }

    fn handle_data(&mut self, mechanism: Mechanism, hex_arg: &str) -> SaslOutcome {
        match mechanism {
            Mechanism::CookieSha1 => self.handle_cookie_challenge(mechanism, hex_arg),
            _ => self.fail("unexpected DATA for a mechanism without a challenge"),
        }
    }

    fn handle_cookie_challenge(&mut self, mechanism: Mechanism, hex_arg: &str) -> SaslOutcome {
        let Some(decoded) = hex::decode(hex_arg) else {
            return self.fail("DATA argument was not valid hex");
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return self.fail("DATA payload was not valid UTF-8");
        };

        let mut fields = text.split_whitespace();
        let (Some(context), Some(cookie_id), Some(server_challenge)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return self.fail("malformed DBUS_COOKIE_SHA1 challenge");
        };

        let cookie = match cookie::read_cookie(context, cookie_id) {
            Ok(cookie) => cookie,
            Err(error) => {
                self.state = ClientState::Failed;
                return SaslOutcome::Failed(error);
            }
        };

        let client_challenge = cookie::generate_client_challenge();
        let response = cookie::compute_response(server_challenge, &client_challenge, &cookie);
        let payload = hex::encode(format!("{client_challenge} {response}").as_bytes());

        self.state = ClientState::WaitingOk(mechanism);
        SaslOutcome::Send(line(&format!("DATA {payload}")))
    }

    fn handle_ok(&mut self, rest: &str) -> SaslOutcome {
        self.guid = Some(rest.trim().to_owned());

        if self.negotiate_unix_fd {
            self.state = ClientState::WaitingAgreeUnixFd;
            SaslOutcome::Send(line("NEGOTIATE_UNIX_FD"))
        } else {
            self.finish()
        }
    }

    fn finish(&mut self) -> SaslOutcome {
        self.state = ClientState::Authenticated;
        SaslOutcome::Authenticated {
            guid: self.guid.clone().unwrap_or_default(),
            unix_fd_enabled: self.unix_fd_enabled,
            begin: line("BEGIN"),
        }
    }
}

fn line(command: &str) -> Vec<u8> {
    let mut bytes = command.as_bytes().to_vec();
    bytes.extend_from_slice(b"\r\n");
    bytes
}

fn current_uid() -> String {
    #[cfg(all(unix, feature = "libc"))]
    {
        let uid = unsafe { libc::getuid() };
        return uid.to_string();
    }

    #[cfg(not(all(unix, feature = "libc")))]
    {
        String::new()
    }
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}
