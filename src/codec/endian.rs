use std::fmt;

/// The byte order of a message, carried as the first byte of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// `l`: little endian.
    Little,
    /// `B`: big endian.
    Big,
}

impl Endianness {
    /// The endianness native to this platform.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::Little;
    /// The endianness native to this platform.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::Big;

    /// The single-byte wire code for this endianness.
    pub const fn code(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    /// Parse the endianness flag byte from a message header.
    pub fn from_code(code: u8) -> Option<Endianness> {
        match code {
            b'l' => Some(Endianness::Little),
            b'B' => Some(Endianness::Big),
            _ => None,
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => f.write_str("little"),
            Endianness::Big => f.write_str("big"),
        }
    }
}
