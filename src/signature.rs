//! The D-Bus signature language: parsing, printing, and the type AST used
//! throughout the codec.

use std::error;
use std::fmt;

/// Maximum nesting depth for container types, per the D-Bus specification.
pub const MAX_DEPTH: usize = 32;

/// Maximum length in bytes of a signature, per the D-Bus specification.
pub const MAX_SIGNATURE_LEN: usize = 255;

/// An error produced while parsing or validating a [`Signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureError {
    kind: SignatureErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SignatureErrorKind {
    UnknownCode(u8),
    UnbalancedBrackets,
    EmptyStruct,
    DictEntryOutsideArray,
    NonBasicDictKey,
    TooDeep,
    TooLong(usize),
    UnexpectedEnd,
    TrailingCloser(u8),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SignatureErrorKind::UnknownCode(code) => {
                write!(f, "unknown type code `{}`", *code as char)
            }
            SignatureErrorKind::UnbalancedBrackets => write!(f, "unbalanced brackets"),
            SignatureErrorKind::EmptyStruct => write!(f, "struct must have at least one field"),
            SignatureErrorKind::DictEntryOutsideArray => {
                write!(f, "dict entry may only appear as an array element")
            }
            SignatureErrorKind::NonBasicDictKey => {
                write!(f, "dict entry key must be a basic type")
            }
            SignatureErrorKind::TooDeep => write!(f, "signature nesting exceeds {MAX_DEPTH}"),
            SignatureErrorKind::TooLong(len) => {
                write!(f, "signature of length {len} exceeds {MAX_SIGNATURE_LEN}")
            }
            SignatureErrorKind::UnexpectedEnd => write!(f, "unexpected end of signature"),
            SignatureErrorKind::TrailingCloser(code) => {
                write!(f, "unexpected closing `{}`", *code as char)
            }
        }
    }
}

impl error::Error for SignatureError {}

impl SignatureError {
    fn new(kind: SignatureErrorKind) -> Self {
        Self { kind }
    }
}

/// A basic (non-container) D-Bus type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Basic {
    /// `y`
    Byte,
    /// `b`
    Boolean,
    /// `n`
    Int16,
    /// `q`
    Uint16,
    /// `i`
    Int32,
    /// `u`
    Uint32,
    /// `x`
    Int64,
    /// `t`
    Uint64,
    /// `d`
    Double,
    /// `s`
    String,
    /// `o`
    ObjectPath,
    /// `g`
    Signature,
    /// `h`
    UnixFd,
}

impl Basic {
    /// The single-byte wire code for this type.
    pub const fn code(self) -> u8 {
        match self {
            Basic::Byte => b'y',
            Basic::Boolean => b'b',
            Basic::Int16 => b'n',
            Basic::Uint16 => b'q',
            Basic::Int32 => b'i',
            Basic::Uint32 => b'u',
            Basic::Int64 => b'x',
            Basic::Uint64 => b't',
            Basic::Double => b'd',
            Basic::String => b's',
            Basic::ObjectPath => b'o',
            Basic::Signature => b'g',
            Basic::UnixFd => b'h',
        }
    }

    /// The alignment, in bytes, required for this type.
    pub const fn alignment(self) -> usize {
        match self {
            Basic::Byte => 1,
            Basic::Boolean => 4,
            Basic::Int16 | Basic::Uint16 => 2,
            Basic::Int32 | Basic::Uint32 => 4,
            Basic::Int64 | Basic::Uint64 => 8,
            Basic::Double => 8,
            Basic::String | Basic::ObjectPath => 4,
            Basic::Signature => 1,
            Basic::UnixFd => 4,
        }
    }

    fn from_code(code: u8) -> Option<Basic> {
        Some(match code {
            b'y' => Basic::Byte,
            b'b' => Basic::Boolean,
            b'n' => Basic::Int16,
            b'q' => Basic::Uint16,
            b'i' => Basic::Int32,
            b'u' => Basic::Uint32,
            b'x' => Basic::Int64,
            b't' => Basic::Uint64,
            b'd' => Basic::Double,
            b's' => Basic::String,
            b'o' => Basic::ObjectPath,
            b'g' => Basic::Signature,
            b'h' => Basic::UnixFd,
            _ => return None,
        })
    }
}

/// A single complete type, parsed out of a [`Signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// A basic, fixed-shape type.
    Basic(Basic),
    /// A self-describing value: `v`.
    Variant,
    /// An array of a single element type: `a...`.
    Array(Box<Type>),
    /// A non-empty ordered sequence of fields: `(...)`.
    Struct(Vec<Type>),
    /// A key/value pair, only valid as the element type of an array: `{..}`.
    DictEntry(Box<Type>, Box<Type>),
}

impl Type {
    /// The alignment, in bytes, required for this type.
    pub fn alignment(&self) -> usize {
        match self {
            Type::Basic(basic) => basic.alignment(),
            Type::Variant => 1,
            Type::Array(_) => 4,
            Type::Struct(_) => 8,
            Type::DictEntry(..) => 8,
        }
    }

    /// Render this type back into its signature string form.
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        write_type(self, &mut out);
        out
    }
}

fn write_type(ty: &Type, out: &mut String) {
    match ty {
        Type::Basic(basic) => out.push(basic.code() as char),
        Type::Variant => out.push('v'),
        Type::Array(element) => {
            out.push('a');
            write_type(element, out);
        }
        Type::Struct(fields) => {
            out.push('(');
            for field in fields {
                write_type(field, out);
            }
            out.push(')');
        }
        Type::DictEntry(key, value) => {
            out.push('{');
            write_type(key, out);
            write_type(value, out);
            out.push('}');
        }
    }
}

/// Parse a signature string into a sequence of complete types.
///
/// Rejects signatures with an unknown type code, unbalanced brackets, an
/// empty struct, a dict entry outside of an array, a dict entry whose key is
/// not a basic type, nesting deeper than [`MAX_DEPTH`], or a total length
/// greater than [`MAX_SIGNATURE_LEN`].
pub fn parse_signature(signature: &str) -> Result<Vec<Type>, SignatureError> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(SignatureError::new(SignatureErrorKind::TooLong(
            signature.len(),
        )));
    }

    let bytes = signature.as_bytes();
    let mut parser = Parser { bytes, pos: 0 };
    let mut out = Vec::new();

    while parser.pos < parser.bytes.len() {
        out.push(parser.parse_one(0)?);
    }

    Ok(out)
}

/// Render a sequence of complete types back into their signature string.
pub fn print_signature(types: &[Type]) -> String {
    let mut out = String::new();
    for ty in types {
        write_type(ty, &mut out);
    }
    out
}

/// The number of top-level complete types contained in `signature`.
pub fn number_of_complete_types(signature: &str) -> Result<usize, SignatureError> {
    Ok(parse_signature(signature)?.len())
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let code = self.peek()?;
        self.pos += 1;
        Some(code)
    }

    /// Parse one complete type. `in_array` is true only when called directly
    /// by the `a` handler below, which is the one context in which a `{`
    /// dict entry is well-formed.
    fn parse_one(&mut self, depth: usize) -> Result<Type, SignatureError> {
        self.parse_one_inner(depth, false)
    }

    fn parse_one_inner(&mut self, depth: usize, in_array: bool) -> Result<Type, SignatureError> {
        if depth > MAX_DEPTH {
            return Err(SignatureError::new(SignatureErrorKind::TooDeep));
        }

        let code = self
            .bump()
            .ok_or_else(|| SignatureError::new(SignatureErrorKind::UnexpectedEnd))?;

        match code {
            b'v' => Ok(Type::Variant),
            b'a' => {
                let element = self.parse_one_inner(depth + 1, true)?;
                Ok(Type::Array(Box::new(element)))
            }
            b'(' => {
                let mut fields = Vec::new();
                loop {
                    match self.peek() {
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        None => {
                            return Err(SignatureError::new(SignatureErrorKind::UnbalancedBrackets))
                        }
                        _ => fields.push(self.parse_one(depth + 1)?),
                    }
                }
                if fields.is_empty() {
                    return Err(SignatureError::new(SignatureErrorKind::EmptyStruct));
                }
                Ok(Type::Struct(fields))
            }
            b')' => Err(SignatureError::new(SignatureErrorKind::TrailingCloser(
                b')',
            ))),
            b'{' => {
                if !in_array {
                    return Err(SignatureError::new(
                        SignatureErrorKind::DictEntryOutsideArray,
                    ));
                }

                let key = self.parse_one(depth + 1)?;
                if !matches!(key, Type::Basic(_)) {
                    return Err(SignatureError::new(SignatureErrorKind::NonBasicDictKey));
                }
                let value = self.parse_one(depth + 1)?;

                match self.bump() {
                    Some(b'}') => {}
                    _ => return Err(SignatureError::new(SignatureErrorKind::UnbalancedBrackets)),
                }

                Ok(Type::DictEntry(Box::new(key), Box::new(value)))
            }
            b'}' => Err(SignatureError::new(SignatureErrorKind::TrailingCloser(
                b'}',
            ))),
            code => {
                if let Some(basic) = Basic::from_code(code) {
                    Ok(Type::Basic(basic))
                } else {
                    Err(SignatureError::new(SignatureErrorKind::UnknownCode(code)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let sig = "a(ii)aaa{sb}uv(bh(ig))(qat)v";
        let types = parse_signature(sig).unwrap();
        assert_eq!(types.len(), 7);
        assert_eq!(print_signature(&types), sig);

        let reparsed = parse_signature(&print_signature(&types)).unwrap();
        assert_eq!(types, reparsed);
    }

    #[test]
    fn rejects_unknown_code() {
        assert!(parse_signature("z").is_err());
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        assert!(parse_signature("(ii").is_err());
        assert!(parse_signature("ii)").is_err());
    }

    #[test]
    fn rejects_empty_struct() {
        assert!(parse_signature("()").is_err());
    }

    #[test]
    fn rejects_dict_entry_outside_array() {
        assert!(parse_signature("{sv}").is_err());
    }

    #[test]
    fn rejects_non_basic_dict_key() {
        assert!(parse_signature("a{(i)v}").is_err());
    }

    #[test]
    fn accepts_dict_entry_inside_array() {
        assert!(parse_signature("a{sv}").is_ok());
    }

    #[test]
    fn rejects_too_deep() {
        let mut sig = String::new();
        for _ in 0..40 {
            sig.push('a');
        }
        sig.push('y');
        assert!(parse_signature(&sig).is_err());
    }

    #[test]
    fn basic_alignments() {
        assert_eq!(Basic::Byte.alignment(), 1);
        assert_eq!(Basic::Boolean.alignment(), 4);
        assert_eq!(Basic::Int64.alignment(), 8);
        assert_eq!(Basic::String.alignment(), 4);
    }
}
