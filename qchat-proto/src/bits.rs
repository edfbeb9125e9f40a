//! Textual bit strings.
//!
//! Every value that crosses the codec, the key negotiator, and the
//! encryption oracle is a string of `'0'` and `'1'` characters. The
//! [`BitString`] newtype keeps that invariant at the type level so that a
//! stray character is rejected at the boundary instead of deep inside a
//! tree walk.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Error returned when a string contains something other than `'0'`/`'1'`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bit {found:?} at position {position}")]
pub struct BitStringError {
    /// The offending character.
    pub found: char,
    /// Character index of the offending character.
    pub position: usize,
}

/// A validated string of `'0'`/`'1'` characters. May be empty.
///
/// Zeroizing wipes the backing buffer and leaves an empty bit string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Zeroize)]
#[serde(try_from = "String", into = "String")]
pub struct BitString(String);

impl BitString {
    /// Creates an empty bit string.
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Validates and wraps a string.
    ///
    /// # Errors
    ///
    /// Returns [`BitStringError`] on the first character that is not a bit.
    pub fn parse(s: impl Into<String>) -> Result<Self, BitStringError> {
        let s = s.into();
        if let Some((position, found)) = s.chars().enumerate().find(|(_, c)| !matches!(c, '0' | '1')) {
            return Err(BitStringError { found, position });
        }
        Ok(Self(s))
    }

    /// Builds a bit string from boolean values (`true` is `'1'`).
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        Self(bits.into_iter().map(|b| if b { '1' } else { '0' }).collect())
    }

    /// Appends a code fragment that is already known to be valid.
    pub(crate) fn push_code(&mut self, code: &Self) {
        self.0.push_str(&code.0);
    }

    /// Appends a single bit.
    pub fn push(&mut self, bit: bool) {
        self.0.push(if bit { '1' } else { '0' });
    }

    /// Iterates over the bits as booleans.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.bytes().map(|b| b == b'1')
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying `'0'`/`'1'` text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BitString {
    type Error = BitStringError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl std::str::FromStr for BitString {
    type Err = BitStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<BitString> for String {
    fn from(bits: BitString) -> Self {
        bits.0
    }
}

impl std::fmt::Display for BitString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
