//! Split an inbound byte stream into whole messages, and size outbound
//! frames (§4.3, C3).
//!
//! The framer never yields a partial message: [`Framer::feed`] buffers
//! incomplete reads, and [`Framer::next_frame`] returns `None` until a
//! complete frame is available.

use crate::codec::{Endianness, MAX_MESSAGE_LEN};
use crate::error::{Error, ErrorKind};

/// Accumulates bytes read from a transport and yields out whole message
/// frames as they become available.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    /// Construct an empty framer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append newly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Test whether the currently buffered prefix describes a complete
    /// frame, without consuming anything.
    fn frame_len(&self) -> Result<Option<usize>, Error> {
        if self.buffer.len() < 16 {
            return Ok(None);
        }

        let endianness = Endianness::from_code(self.buffer[0])
            .ok_or_else(|| ErrorKind::MalformedMessage("invalid endianness flag".into()))?;

        let body_length = read_u32(&self.buffer[4..8], endianness);
        let header_array_len = read_u32(&self.buffer[12..16], endianness);

        let header_len = align8(16usize.saturating_add(header_array_len as usize));
        let total = header_len.saturating_add(body_length as usize);

        if total as u64 > MAX_MESSAGE_LEN as u64 {
            return Err(ErrorKind::MalformedMessage(format!(
                "message of length {total} exceeds {MAX_MESSAGE_LEN}"
            ))
            .into());
        }

        if self.buffer.len() < total {
            return Ok(None);
        }

        Ok(Some(total))
    }

    /// Pop the next complete frame out of the buffer, if one is available.
    ///
    /// Returns the raw frame bytes, suitable for [`crate::message::Message::decode`].
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(total) = self.frame_len()? else {
            return Ok(None);
        };

        let frame = self.buffer.drain(..total).collect();
        Ok(Some(frame))
    }

    /// The number of bytes currently buffered but not yet yielded as a
    /// frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn read_u32(bytes: &[u8], endianness: Endianness) -> u32 {
    let array: [u8; 4] = bytes.try_into().unwrap();
    match endianness {
        Endianness::Little => u32::from_le_bytes(array),
        Endianness::Big => u32::from_be_bytes(array),
    }
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}
