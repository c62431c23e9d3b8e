// Copyright 2024-2026 The Varve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content-addressed identifiers.

use std::fmt;
use std::fmt::Debug;

use blake2::Blake2b;
use blake2::Digest as _;
use digest::consts::U20;

use crate::hex_util;

/// Digest length in bytes. Hex renderings are twice this.
pub const DIGEST_LEN: usize = 20;

/// Identifier for a content-addressed payload (a column blob, a commit, a
/// collection label). Two payloads with equal bytes have equal digests, which
/// is what lets independent writers converge without coordination.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Digest of the given payload bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Blake2b::<U20>::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// The all-zero sentinel digest, root of every changelog.
    pub const fn zero() -> Self {
        Self([0; DIGEST_LEN])
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Parses the given hex string. The string must be exactly
    /// [`DIGEST_LEN`] bytes worth of hex digits.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        hex_util::decode_hex(hex).and_then(|bytes| Self::from_bytes(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; DIGEST_LEN]
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("Digest").field(&self.hex()).finish()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.pad(&self.hex())
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            self.hex().serialize(serializer)
        } else {
            self.as_bytes().serialize(serializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_of_is_stable() {
        let a = Digest::of(b"payload");
        let b = Digest::of(b"payload");
        let c = Digest::of(b"other payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hex().len(), DIGEST_LEN * 2);
    }

    #[test]
    fn test_zero_digest() {
        let zero = Digest::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.hex(), "0".repeat(DIGEST_LEN * 2));
        assert!(!Digest::of(b"").is_zero());
    }

    #[test]
    fn test_hex_round_trip() {
        let id = Digest::of(b"some bytes");
        assert_eq!(Digest::try_from_hex(id.hex()), Some(id));

        assert_eq!(Digest::try_from_hex("zz"), None);
        // Wrong length
        assert_eq!(Digest::try_from_hex("ab"), None);
    }

    #[test]
    fn test_display() {
        let id = Digest::zero();
        assert_eq!(format!("{id:.8}"), "00000000");
    }
}
