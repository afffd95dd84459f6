use super::{padding_for, Endianness, MAX_ARRAY_LEN};
use crate::error::{Error, ErrorKind};
use crate::object_path::ObjectPathBuf;
use crate::signature::{self, Basic, Type};
use crate::value::Value;

/// A cursor over a byte slice that tracks alignment and byte order while
/// unmarshalling values, mirroring [`WriteBuf`](super::WriteBuf).
#[derive(Debug, Clone, Copy)]
pub struct ReadCursor<'a> {
    data: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'a> ReadCursor<'a> {
    /// Construct a cursor over `data`, starting at offset 0.
    pub fn new(data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            data,
            pos: 0,
            endianness,
        }
    }

    /// The current read offset into the underlying slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The number of bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn underflow() -> Error {
        ErrorKind::BufferUnderflow.into()
    }

    /// Skip zero bytes until the cursor is aligned to `alignment`.
    pub fn align_to(&mut self, alignment: usize) -> Result<(), Error> {
        let padding = padding_for(self.pos, alignment);
        if self.remaining() < padding {
            return Err(Self::underflow());
        }
        self.pos += padding;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(Self::underflow());
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&mut self) -> Result<u64, Error> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u64::from_le_bytes(bytes),
            Endianness::Big => u64::from_be_bytes(bytes),
        })
    }

    /// Read a raw, 4-byte-aligned `u32`, as used by the fixed message
    /// prefix and header length fields.
    pub fn load_u32(&mut self) -> Result<u32, Error> {
        self.align_to(4)?;
        self.read_u32()
    }

    fn read_string_payload(&mut self) -> Result<String, Error> {
        self.align_to(4)?;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let nul = self.read_u8()?;
        if nul != 0 {
            return Err(ErrorKind::MalformedMessage("string not NUL terminated".into()).into());
        }
        if bytes.contains(&0) {
            return Err(ErrorKind::InvalidData("string contains embedded NUL".into()).into());
        }
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    fn read_signature_payload(&mut self) -> Result<String, Error> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        let nul = self.read_u8()?;
        if nul != 0 {
            return Err(
                ErrorKind::MalformedMessage("signature not NUL terminated".into()).into(),
            );
        }
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    /// Unmarshal a single complete value of type `ty`.
    pub fn read_value(&mut self, ty: &Type) -> Result<Value, Error> {
        self.align_to(ty.alignment())?;

        match ty {
            Type::Basic(Basic::Byte) => Ok(Value::Byte(self.read_u8()?)),
            Type::Basic(Basic::Boolean) => {
                let raw = self.read_u32()?;
                match raw {
                    0 => Ok(Value::Boolean(false)),
                    1 => Ok(Value::Boolean(true)),
                    other => {
                        Err(ErrorKind::InvalidData(format!("invalid boolean wire value {other}"))
                            .into())
                    }
                }
            }
            Type::Basic(Basic::Int16) => Ok(Value::Int16(self.read_u16()? as i16)),
            Type::Basic(Basic::Uint16) => Ok(Value::Uint16(self.read_u16()?)),
            Type::Basic(Basic::Int32) => Ok(Value::Int32(self.read_u32()? as i32)),
            Type::Basic(Basic::Uint32) => Ok(Value::Uint32(self.read_u32()?)),
            Type::Basic(Basic::Int64) => Ok(Value::Int64(self.read_u64()? as i64)),
            Type::Basic(Basic::Uint64) => Ok(Value::Uint64(self.read_u64()?)),
            Type::Basic(Basic::Double) => Ok(Value::Double(f64::from_bits(self.read_u64()?))),
            Type::Basic(Basic::String) => Ok(Value::String(self.read_string_payload()?)),
            Type::Basic(Basic::ObjectPath) => {
                let path = self.read_string_payload()?;
                Ok(Value::ObjectPath(ObjectPathBuf::new(path)?))
            }
            Type::Basic(Basic::Signature) => {
                let sig = self.read_signature_payload()?;
                signature::parse_signature(&sig)?;
                Ok(Value::Signature(sig))
            }
            Type::Basic(Basic::UnixFd) => Ok(Value::UnixFd(self.read_u32()?)),
            Type::Variant => {
                let sig = self.read_signature_payload()?;
                let mut types = signature::parse_signature(&sig)?;
                if types.len() != 1 {
                    return Err(ErrorKind::MalformedMessage(
                        "variant signature must describe exactly one complete type".into(),
                    )
                    .into());
                }
                let inner_ty = types.remove(0);
                self.align_to(inner_ty.alignment())?;
                let inner = self.read_value(&inner_ty)?;
                Ok(Value::Variant(Box::new(inner)))
            }
            Type::Array(element) => {
                let declared_len = self.read_u32()?;
                if declared_len > MAX_ARRAY_LEN {
                    return Err(ErrorKind::MalformedMessage(format!(
                        "array of length {declared_len} exceeds {MAX_ARRAY_LEN}"
                    ))
                    .into());
                }
                self.align_to(element.alignment())?;
                let end = self.pos + declared_len as usize;
                if end > self.data.len() {
                    return Err(Self::underflow());
                }

                let mut elements = Vec::new();
                while self.pos < end {
                    elements.push(self.read_value(element)?);
                }
                if self.pos != end {
                    return Err(ErrorKind::MalformedMessage(
                        "array element did not end on declared boundary".into(),
                    )
                    .into());
                }

                Ok(Value::Array(elements, (**element).clone()))
            }
            Type::Struct(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.read_value(field)?);
                }
                Ok(Value::Struct(values))
            }
            Type::DictEntry(key, value) => {
                let key = self.read_value(key)?;
                let value = self.read_value(value)?;
                Ok(Value::DictEntry(Box::new(key), Box::new(value)))
            }
        }
    }
}
