//! Ring position: a 128-bit value with byte-lexicographic ordering.
//!
//! The original Go ring (`consistenthash/key.go`) orders keys with
//! `bytes.Compare` over a `[16]byte`. For a big-endian byte layout this is
//! identical to ordering the same bytes as an unsigned 128-bit integer, so
//! `Position` stores a plain `u128` and derives `Ord` from it directly.

use crate::rng::random_u128;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(pub u128);

impl Position {
    /// Minimum possible position, used for ring wraparound.
    pub const MIN: Position = Position(u128::MIN);

    /// Generates a random position from the process-lifetime RNG.
    pub fn random() -> Self {
        Self(random_u128())
    }

    /// Big-endian byte representation, for exposition of the
    /// byte-lexicographic ordering guarantee.
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({:032x})", self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_byte_lexicographic_comparison() {
        let a = Position(100);
        let b = Position(200);
        assert!(a < b);
        assert!(a.to_be_bytes() < b.to_be_bytes());
    }

    #[test]
    fn min_is_smaller_than_any_random_position() {
        assert!(Position::MIN <= Position::random());
    }
}
