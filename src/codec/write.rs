use super::{padding_for, Endianness};
use crate::value::Value;

/// A growable, alignment-tracking output buffer used to marshal values and
/// message headers.
///
/// Mirrors the role of `tokio_dbus::OwnedBuf`, but built on a plain `Vec<u8>`
/// rather than a hand-rolled allocator, since this crate is authored without
/// the ability to run the compiler against it.
#[derive(Debug)]
pub struct WriteBuf {
    data: Vec<u8>,
    endianness: Endianness,
}

impl WriteBuf {
    /// Construct a new, empty buffer for the given byte order.
    pub fn new(endianness: Endianness) -> Self {
        Self {
            data: Vec::new(),
            endianness,
        }
    }

    /// The byte order this buffer writes numbers in.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Test whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the buffer, returning the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Pad the buffer with zero bytes until its length is a multiple of
    /// `alignment`.
    pub fn align_to(&mut self, alignment: usize) {
        let padding = padding_for(self.data.len(), alignment);
        self.data.resize(self.data.len() + padding, 0);
    }

    /// Append a raw byte slice, unaligned.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn push_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    fn push_u16(&mut self, value: u16) {
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.data.extend_from_slice(&bytes);
    }

    fn push_u32(&mut self, value: u32) {
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.data.extend_from_slice(&bytes);
    }

    fn push_u64(&mut self, value: u64) {
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.data.extend_from_slice(&bytes);
    }

    /// Write a raw `u32` at alignment 4, as used by the 12-byte message
    /// prefix and header fields that are fixed up after the fact.
    pub fn store_u32(&mut self, value: u32) {
        self.align_to(4);
        self.push_u32(value);
    }

    /// Overwrite the `u32` at byte offset `at` in place, used to patch an
    /// array's declared length back in after its elements are written.
    pub fn patch_u32_at(&mut self, at: usize, value: u32) {
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.data[at..at + 4].copy_from_slice(&bytes);
    }

    fn write_string_payload(&mut self, string: &str) {
        self.align_to(4);
        self.push_u32(string.len() as u32);
        self.data.extend_from_slice(string.as_bytes());
        self.data.push(0);
    }

    fn write_signature_payload(&mut self, signature: &str) {
        self.push_u8(signature.len() as u8);
        self.data.extend_from_slice(signature.as_bytes());
        self.data.push(0);
    }

    /// Marshal a single complete [`Value`], recursing into containers.
    ///
    /// Every call begins by aligning the buffer to the value's own
    /// alignment; this makes the alignment rule for struct fields, array
    /// elements, and dict entry members fall out of one recursive rule
    /// instead of being special cased per container.
    pub fn write_value(&mut self, value: &Value) {
        self.align_to(value.value_type().alignment());

        match value {
            Value::Byte(byte) => self.push_u8(*byte),
            Value::Boolean(value) => self.push_u32(*value as u32),
            Value::Int16(value) => self.push_u16(*value as u16),
            Value::Uint16(value) => self.push_u16(*value),
            Value::Int32(value) => self.push_u32(*value as u32),
            Value::Uint32(value) => self.push_u32(*value),
            Value::Int64(value) => self.push_u64(*value as u64),
            Value::Uint64(value) => self.push_u64(*value),
            Value::Double(value) => self.push_u64(value.to_bits()),
            Value::String(value) => self.write_string_payload(value),
            Value::ObjectPath(value) => self.write_string_payload(value.as_str()),
            Value::Signature(value) => self.write_signature_payload(value),
            Value::UnixFd(value) => self.push_u32(*value),
            Value::Array(elements, element_ty) => {
                let length_at = self.data.len();
                self.push_u32(0);
                self.align_to(element_ty.alignment());
                let start = self.data.len();

                for element in elements {
                    self.write_value(element);
                }

                let written = (self.data.len() - start) as u32;
                self.patch_u32_at(length_at, written);
            }
            Value::Struct(fields) => {
                for field in fields {
                    self.write_value(field);
                }
            }
            Value::DictEntry(key, value) => {
                self.write_value(key);
                self.write_value(value);
            }
            Value::Variant(inner) => {
                let ty = inner.value_type();
                self.write_signature_payload(&ty.to_signature_string());
                self.align_to(ty.alignment());
                self.write_value(inner);
            }
        }
    }
}
