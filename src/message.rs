//! Message framing: the header/body layout of every D-Bus message (§3.5).

use std::fmt;

use crate::codec::{Endianness, ReadCursor, WriteBuf};
use crate::error::{Error, ErrorKind};
use crate::names;
use crate::object_path::ObjectPathBuf;
use crate::signature::{self, Basic, Type};
use crate::value::Value;

/// The four message kinds, carrying the header fields that are mandatory
/// for that kind (§3.5).
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A call that may prompt a `MethodReturn` or `Error` reply.
    MethodCall {
        path: ObjectPathBuf,
        interface: Option<String>,
        member: String,
    },
    /// A successful reply to a method call.
    MethodReturn { reply_serial: u32 },
    /// A failed reply to a method call.
    Error {
        error_name: String,
        reply_serial: u32,
    },
    /// A broadcast emitted from an object.
    Signal {
        path: ObjectPathBuf,
        interface: String,
        member: String,
    },
}

impl MessageKind {
    fn type_code(&self) -> u8 {
        match self {
            MessageKind::MethodCall { .. } => 1,
            MessageKind::MethodReturn { .. } => 2,
            MessageKind::Error { .. } => 3,
            MessageKind::Signal { .. } => 4,
        }
    }
}

/// Message flags (§3.5), a bitset over [`Flags::NO_REPLY_EXPECTED`],
/// [`Flags::NO_AUTO_START`], and [`Flags::ALLOW_INTERACTIVE_AUTHORIZATION`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const EMPTY: Flags = Flags(0);
    pub const NO_REPLY_EXPECTED: Flags = Flags(1);
    pub const NO_AUTO_START: Flags = Flags(2);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(4);

    /// Test whether `self` contains all the bits of `other`.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw wire byte for this flag set.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Construct a flag set from a raw wire byte.
    pub const fn from_bits(bits: u8) -> Flags {
        Flags(bits)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// A single header field code (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldCode {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

/// A decoded D-Bus message: shared header fields plus the kind-specific
/// required ones, and a marshalled argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub endianness: Endianness,
    pub flags: Flags,
    pub serial: u32,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub body: Vec<Value>,
    pub kind: MessageKind,
}

impl Message {
    /// Construct a `METHOD_CALL` message.
    pub fn method_call(path: ObjectPathBuf, member: impl Into<String>) -> Message {
        Message {
            endianness: Endianness::NATIVE,
            flags: Flags::EMPTY,
            serial: 0,
            destination: None,
            sender: None,
            body: Vec::new(),
            kind: MessageKind::MethodCall {
                path,
                interface: None,
                member: member.into(),
            },
        }
    }

    /// Construct a `METHOD_RETURN` message replying to `reply_serial`.
    pub fn method_return(reply_serial: u32) -> Message {
        Message {
            endianness: Endianness::NATIVE,
            flags: Flags::EMPTY,
            serial: 0,
            destination: None,
            sender: None,
            body: Vec::new(),
            kind: MessageKind::MethodReturn { reply_serial },
        }
    }

    /// Construct an `ERROR` message replying to `reply_serial`.
    pub fn error(error_name: impl Into<String>, reply_serial: u32) -> Message {
        Message {
            endianness: Endianness::NATIVE,
            flags: Flags::EMPTY,
            serial: 0,
            destination: None,
            sender: None,
            body: Vec::new(),
            kind: MessageKind::Error {
                error_name: error_name.into(),
                reply_serial,
            },
        }
    }

    /// Construct a `SIGNAL` message.
    pub fn signal(
        path: ObjectPathBuf,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Message {
        Message {
            endianness: Endianness::NATIVE,
            flags: Flags::EMPTY,
            serial: 0,
            destination: None,
            sender: None,
            body: Vec::new(),
            kind: MessageKind::Signal {
                path,
                interface: interface.into(),
                member: member.into(),
            },
        }
    }

    /// Set the destination, interface, and body in a builder style.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Message {
        self.destination = Some(destination.into());
        self
    }

    /// Set the destination if `destination` is `Some`, otherwise leave it
    /// unset. Useful when replying to a sender that may be absent (e.g. a
    /// message bus address that omits SENDER for its own replies).
    pub fn with_destination_opt(mut self, destination: Option<String>) -> Message {
        self.destination = destination;
        self
    }

    /// Set the interface on a `MethodCall`. No-op for other kinds.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Message {
        if let MessageKind::MethodCall { interface: slot, .. } = &mut self.kind {
            *slot = Some(interface.into());
        }
        self
    }

    /// Replace the body arguments.
    pub fn with_body(mut self, body: Vec<Value>) -> Message {
        self.body = body;
        self
    }

    /// Set (or clear) flags.
    pub fn with_flags(mut self, flags: Flags) -> Message {
        self.flags = flags;
        self
    }

    /// Test whether this message's flags suppress a reply.
    pub fn no_reply_expected(&self) -> bool {
        self.flags.contains(Flags::NO_REPLY_EXPECTED)
    }

    /// The `REPLY_SERIAL` this message responds to, if it is a return or an
    /// error.
    pub fn reply_serial(&self) -> Option<u32> {
        match &self.kind {
            MessageKind::MethodReturn { reply_serial } => Some(*reply_serial),
            MessageKind::Error { reply_serial, .. } => Some(*reply_serial),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.serial == 0 {
            return Err(ErrorKind::MalformedMessage("serial must not be zero".into()).into());
        }

        match &self.kind {
            MessageKind::MethodCall { member, interface, .. } => {
                names::validate_member(member)?;
                if let Some(interface) = interface {
                    names::validate_interface(interface)?;
                }
            }
            MessageKind::MethodReturn { reply_serial } => {
                if *reply_serial == 0 {
                    return Err(ErrorKind::MalformedMessage(
                        "REPLY_SERIAL header must not be zero".into(),
                    )
                    .into());
                }
            }
            MessageKind::Error {
                error_name,
                reply_serial,
            } => {
                if *reply_serial == 0 {
                    return Err(ErrorKind::MalformedMessage(
                        "REPLY_SERIAL header must not be zero".into(),
                    )
                    .into());
                }
                names::validate_interface(error_name)?;
            }
            MessageKind::Signal {
                interface, member, ..
            } => {
                names::validate_interface(interface)?;
                names::validate_member(member)?;
            }
        }

        Ok(())
    }

    fn header_fields(&self) -> Vec<(FieldCode, Value)> {
        let mut fields = Vec::new();

        match &self.kind {
            MessageKind::MethodCall {
                path, interface, member,
            } => {
                fields.push((FieldCode::Path, Value::ObjectPath(path.clone())));
                if let Some(interface) = interface {
                    fields.push((
                        FieldCode::Interface,
                        Value::string(interface.clone()).expect("validated"),
                    ));
                }
                fields.push((
                    FieldCode::Member,
                    Value::string(member.clone()).expect("validated"),
                ));
            }
            MessageKind::MethodReturn { reply_serial } => {
                fields.push((FieldCode::ReplySerial, Value::Uint32(*reply_serial)));
            }
            MessageKind::Error {
                error_name,
                reply_serial,
            } => {
                fields.push((
                    FieldCode::ErrorName,
                    Value::string(error_name.clone()).expect("validated"),
                ));
                fields.push((FieldCode::ReplySerial, Value::Uint32(*reply_serial)));
            }
            MessageKind::Signal {
                path,
                interface,
                member,
            } => {
                fields.push((FieldCode::Path, Value::ObjectPath(path.clone())));
                fields.push((
                    FieldCode::Interface,
                    Value::string(interface.clone()).expect("validated"),
                ));
                fields.push((
                    FieldCode::Member,
                    Value::string(member.clone()).expect("validated"),
                ));
            }
        }

        if let Some(destination) = &self.destination {
            fields.push((
                FieldCode::Destination,
                Value::string(destination.clone()).expect("validated"),
            ));
        }
        if let Some(sender) = &self.sender {
            fields.push((
                FieldCode::Sender,
                Value::string(sender.clone()).expect("validated"),
            ));
        }

        if !self.body.is_empty() {
            let signature = signature::print_signature(
                &self.body.iter().map(Value::value_type).collect::<Vec<_>>(),
            );
            fields.push((FieldCode::Signature, Value::signature(signature).unwrap()));
        }

        fields
    }

    /// Marshal this message into a complete wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        self.validate()?;

        let mut buf = WriteBuf::new(self.endianness);

        buf.extend_from_slice(&[self.endianness.code(), self.kind.type_code(), self.flags.bits(), 1]);
        let body_length_at = buf.len();
        buf.store_u32(0); // body_length, patched below
        buf.store_u32(self.serial);

        let header_struct_ty = Type::Struct(vec![Type::Basic(Basic::Byte), Type::Variant]);
        let header_elements: Vec<Value> = self
            .header_fields()
            .into_iter()
            .map(|(code, value)| {
                Value::Struct(vec![Value::Byte(code as u8), Value::Variant(Box::new(value))])
            })
            .collect();

        buf.write_value(&Value::Array(header_elements, header_struct_ty));
        buf.align_to(8);

        let body_start = buf.len();
        for value in &self.body {
            buf.write_value(value);
        }
        let body_length = (buf.len() - body_start) as u32;

        buf.patch_u32_at(body_length_at, body_length);

        Ok(buf.into_inner())
    }

    /// Unmarshal a complete wire frame, as produced by [`Message::encode`].
    ///
    /// The caller is responsible for first determining the frame boundary
    /// with [`crate::frame`].
    pub fn decode(bytes: &[u8]) -> Result<Message, Error> {
        if bytes.len() < 12 {
            return Err(ErrorKind::MalformedMessage("frame shorter than fixed prefix".into()).into());
        }

        let endianness = Endianness::from_code(bytes[0])
            .ok_or_else(|| ErrorKind::MalformedMessage("invalid endianness flag".into()))?;

        let mut cursor = ReadCursor::new(bytes, endianness);
        let _endian_byte = cursor_u8(&mut cursor)?;
        let type_code = cursor_u8(&mut cursor)?;
        let flags = Flags::from_bits(cursor_u8(&mut cursor)?);
        let version = cursor_u8(&mut cursor)?;
        if version != 1 {
            return Err(ErrorKind::MalformedMessage(format!(
                "unsupported protocol version {version}"
            ))
            .into());
        }

        let body_length = cursor.load_u32()?;
        let serial = cursor.load_u32()?;
        if serial == 0 {
            return Err(ErrorKind::MalformedMessage("serial must not be zero".into()).into());
        }

        let header_array_ty = Type::Array(Box::new(Type::Struct(vec![
            Type::Basic(Basic::Byte),
            Type::Variant,
        ])));
        let header_value = cursor.read_value(&header_array_ty)?;

        let mut path = None;
        let mut interface = None;
        let mut member = None;
        let mut error_name = None;
        let mut reply_serial = None;
        let mut destination = None;
        let mut sender = None;
        let mut body_signature: Option<String> = None;

        if let Value::Array(elements, _) = header_value {
            for element in elements {
                let Value::Struct(mut fields) = element else {
                    continue;
                };
                if fields.len() != 2 {
                    continue;
                }
                let field_value = fields.pop().unwrap();
                let code = fields.pop().unwrap();
                let Value::Byte(code) = code else { continue };
                let Value::Variant(field_value) = field_value else {
                    continue;
                };

                match code {
                    1 => path = field_value.as_str().map(str::to_owned),
                    2 => interface = field_value.as_str().map(str::to_owned),
                    3 => member = field_value.as_str().map(str::to_owned),
                    4 => error_name = field_value.as_str().map(str::to_owned),
                    5 => reply_serial = field_value.as_u32(),
                    6 => destination = field_value.as_str().map(str::to_owned),
                    7 => sender = field_value.as_str().map(str::to_owned),
                    8 => body_signature = field_value.as_str().map(str::to_owned),
                    _ => {}
                }
            }
        }

        cursor.align_to(8)?;

        let body_types = match &body_signature {
            Some(sig) => signature::parse_signature(sig)?,
            None => Vec::new(),
        };

        let body_end = cursor.position() + body_length as usize;
        if body_end > bytes.len() {
            return Err(ErrorKind::MalformedMessage("body exceeds frame length".into()).into());
        }

        let mut body = Vec::with_capacity(body_types.len());
        for ty in &body_types {
            body.push(cursor.read_value(ty)?);
        }
        if cursor.position() != body_end {
            return Err(ErrorKind::MalformedMessage(
                "body did not consume the declared body length".into(),
            )
            .into());
        }

        let kind = match type_code {
            1 => MessageKind::MethodCall {
                path: ObjectPathBuf::new(
                    path.ok_or_else(|| ErrorKind::MalformedMessage("missing PATH header".into()))?,
                )?,
                interface,
                member: member
                    .ok_or_else(|| ErrorKind::MalformedMessage("missing MEMBER header".into()))?,
            },
            2 => MessageKind::MethodReturn {
                reply_serial: reply_serial.ok_or_else(|| {
                    ErrorKind::MalformedMessage("missing REPLY_SERIAL header".into())
                })?,
            },
            3 => MessageKind::Error {
                error_name: error_name.ok_or_else(|| {
                    ErrorKind::MalformedMessage("missing ERROR_NAME header".into())
                })?,
                reply_serial: reply_serial.ok_or_else(|| {
                    ErrorKind::MalformedMessage("missing REPLY_SERIAL header".into())
                })?,
            },
            4 => MessageKind::Signal {
                path: ObjectPathBuf::new(
                    path.ok_or_else(|| ErrorKind::MalformedMessage("missing PATH header".into()))?,
                )?,
                interface: interface.ok_or_else(|| {
                    ErrorKind::MalformedMessage("missing INTERFACE header".into())
                })?,
                member: member
                    .ok_or_else(|| ErrorKind::MalformedMessage("missing MEMBER header".into()))?,
            },
            other => {
                return Err(ErrorKind::MalformedMessage(format!("unknown message type {other}")).into())
            }
        };

        Ok(Message {
            endianness,
            flags,
            serial,
            destination,
            sender,
            body,
            kind,
        })
    }
}

fn cursor_u8(cursor: &mut ReadCursor<'_>) -> Result<u8, Error> {
    let ty = Type::Basic(Basic::Byte);
    match cursor.read_value(&ty)? {
        Value::Byte(byte) => Ok(byte),
        _ => unreachable!(),
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::MethodCall { path, member, .. } => {
                write!(f, "method_call {path} {member}")
            }
            MessageKind::MethodReturn { reply_serial } => {
                write!(f, "method_return (reply to {reply_serial})")
            }
            MessageKind::Error { error_name, .. } => write!(f, "error {error_name}"),
            MessageKind::Signal {
                path,
                interface,
                member,
            } => write!(f, "signal {path} {interface}.{member}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_call_round_trips() {
        let mut message = Message::method_call(
            ObjectPathBuf::new("/org/freedesktop/DBus".into()).unwrap(),
            "Hello",
        )
        .with_destination("org.freedesktop.DBus")
        .with_interface("org.freedesktop.DBus");
        message.serial = 1;

        let bytes = message.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn method_return_requires_reply_serial() {
        let mut message = Message::method_return(0);
        message.serial = 5;
        assert!(message.encode().is_err());
    }

    #[test]
    fn body_round_trips_with_signature() {
        let mut message = Message::method_return(7);
        message.serial = 9;
        message.body = vec![Value::string("hi").unwrap(), Value::Uint32(3)];

        let bytes = message.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.body, message.body);
    }

    #[test]
    fn big_endian_round_trip() {
        let mut message = Message::method_return(7);
        message.endianness = Endianness::Big;
        message.serial = 2;
        message.body = vec![Value::Int32(-5)];

        let bytes = message.encode().unwrap();
        assert_eq!(bytes[0], b'B');
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.body, message.body);
    }
}
