//! Byte transforms applied by the bundled servers.

use crate::error::Error;

use std::fmt;
use std::str::FromStr;

/// Transform applied to every byte a server receives before echoing it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Send the bytes back unchanged.
    #[default]
    Echo,

    /// Rotate ASCII letters by 13 places.
    Rot13,
}

impl Transform {
    /// Transforms a single byte.
    pub fn apply_byte(self, byte: u8) -> u8 {
        match self {
            Transform::Echo => byte,
            Transform::Rot13 => rot13(byte),
        }
    }

    /// Transforms `bytes` in place.
    pub fn apply(self, bytes: &mut [u8]) {
        if self == Transform::Echo {
            return;
        }

        for byte in bytes {
            *byte = self.apply_byte(*byte);
        }
    }
}

/// Rotates `a`-`m`/`A`-`M` forward and `n`-`z`/`N`-`Z` backward by 13.
///
/// Every other byte is returned unchanged.
pub fn rot13(byte: u8) -> u8 {
    match byte {
        b'a'..=b'm' | b'A'..=b'M' => byte + 13,
        b'n'..=b'z' | b'N'..=b'Z' => byte - 13,
        _ => byte,
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" | "identity" => Ok(Transform::Echo),
            "rot13" => Ok(Transform::Rot13),
            _ => Err(Error::InvalidTransform(s.to_string())),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Echo => f.write_str("echo"),
            Transform::Rot13 => f.write_str("rot13"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rot13_known_words() {
        let mut hello = *b"Hello";
        Transform::Rot13.apply(&mut hello);
        assert_eq!(&hello, b"Uryyb");

        let mut zoo = *b"Zoo";
        Transform::Rot13.apply(&mut zoo);
        assert_eq!(&zoo, b"Mbb");
    }

    #[test]
    fn test_rot13_is_an_involution_on_printable_ascii() {
        for c in 0x20u8..=0x7e {
            assert_eq!(rot13(rot13(c)), c, "byte {c:#x}");
        }
    }

    #[test]
    fn test_rot13_leaves_non_letters_alone() {
        for c in 0u8..=255 {
            if !c.is_ascii_alphabetic() {
                assert_eq!(rot13(c), c, "byte {c:#x}");
            }
        }
    }

    #[test]
    fn test_echo_is_identity() {
        let mut bytes = *b"Hello, World!";
        Transform::Echo.apply(&mut bytes);
        assert_eq!(&bytes, b"Hello, World!");
    }

    #[test]
    fn test_parse_transform() {
        assert_eq!("rot13".parse::<Transform>().unwrap(), Transform::Rot13);
        assert_eq!("ECHO".parse::<Transform>().unwrap(), Transform::Echo);
        assert!("caesar".parse::<Transform>().is_err());
    }
}
