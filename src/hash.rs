//! Named digest functions used to place virtual nodes and keys on the ring.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use crypto::digest::Digest;
use crypto::md5::Md5;
use crypto::sha1::Sha1;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ShardError;

/// A point on the ring: the raw digest bytes, big-endian.
///
/// All positions within one ring come from the same method and so share a width,
/// which makes byte-wise ordering the same as unsigned integer ordering.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(Vec<u8>);

impl Position {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, zero-padded to the full digest width.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// The leading 64 bits of the digest, used to measure arcs of the ring.
    pub(crate) fn leading_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = self.0.len().min(8);
        buf[..n].copy_from_slice(&self.0[..n]);
        BigEndian::read_u64(&buf) >> (8 * (8 - n) as u32)
    }

    /// Number of significant bits carried by `leading_u64`.
    pub(crate) fn leading_bits(&self) -> u32 {
        (self.0.len().min(8) * 8) as u32
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({})", self.to_hex())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub type DigestFn = fn(&[u8]) -> Position;

/// The supported hash methods.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashMethod {
    Crc32,
    Md5,
    Sha1,
}

/// Name table, fixed at compile time.
const REGISTRY: &[(&str, HashMethod)] = &[
    ("crc32", HashMethod::Crc32),
    ("md5", HashMethod::Md5),
    ("sha1", HashMethod::Sha1),
];

impl HashMethod {
    pub const ALL: [HashMethod; 3] = [HashMethod::Crc32, HashMethod::Md5, HashMethod::Sha1];

    /// Looks up a method by its configured name.
    pub fn lookup(name: &str) -> Result<HashMethod, ShardError> {
        let wanted = name.trim();
        REGISTRY
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(wanted))
            .map(|(_, method)| *method)
            .ok_or_else(|| ShardError::UnknownHashMethod(name.to_owned()))
    }

    pub fn name(self) -> &'static str {
        match self {
            HashMethod::Crc32 => "crc32",
            HashMethod::Md5 => "md5",
            HashMethod::Sha1 => "sha1",
        }
    }

    /// Digest width in bytes.
    pub fn width(self) -> usize {
        match self {
            HashMethod::Crc32 => 4,
            HashMethod::Md5 => 16,
            HashMethod::Sha1 => 20,
        }
    }

    /// The concrete digest function, resolved once by the ring.
    pub fn digest_fn(self) -> DigestFn {
        match self {
            HashMethod::Crc32 => crc32_digest,
            HashMethod::Md5 => md5_digest,
            HashMethod::Sha1 => sha1_digest,
        }
    }

    pub fn digest(self, input: &str) -> Position {
        (self.digest_fn())(input.as_bytes())
    }

    pub fn hex(self, input: &str) -> String {
        self.digest(input).to_hex()
    }
}

fn crc32_digest(input: &[u8]) -> Position {
    let mut buf = vec![0u8; 4];
    BigEndian::write_u32(&mut buf, crc32fast::hash(input));
    Position(buf)
}

fn md5_digest(input: &[u8]) -> Position {
    run_digest(Md5::new(), input)
}

fn sha1_digest(input: &[u8]) -> Position {
    run_digest(Sha1::new(), input)
}

fn run_digest<D: Digest>(mut hasher: D, input: &[u8]) -> Position {
    hasher.input(input);
    let mut out = vec![0u8; hasher.output_bytes()];
    hasher.result(&mut out);
    Position(out)
}

impl FromStr for HashMethod {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashMethod::lookup(s)
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for HashMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for HashMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        HashMethod::lookup(&name).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(HashMethod::lookup("MD5").unwrap(), HashMethod::Md5);
        assert_eq!(" sha1 ".parse::<HashMethod>().unwrap(), HashMethod::Sha1);
        assert_eq!(HashMethod::lookup("crc32").unwrap(), HashMethod::Crc32);
    }

    #[test]
    fn unknown_method_is_rejected() {
        match HashMethod::lookup("fnv") {
            Err(ShardError::UnknownHashMethod(name)) => assert_eq!(name, "fnv"),
            other => panic!("expected UnknownHashMethod, got {:?}", other),
        }
    }

    #[test]
    fn known_digests() {
        assert_eq!(HashMethod::Md5.hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(HashMethod::Sha1.hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(HashMethod::Crc32.hex("123456789"), "cbf43926");
    }

    #[test]
    fn digests_have_fixed_width() {
        for method in HashMethod::ALL.iter() {
            for input in &["", "a", "node:0", "a much longer key with {tags}"] {
                let position = method.digest(input);
                assert_eq!(position.as_bytes().len(), method.width());
                assert_eq!(position.to_hex().len(), method.width() * 2);
            }
        }
    }

    #[test]
    fn crc32_hex_keeps_leading_zeros() {
        // hex ordering must agree with numeric ordering, so short values are padded
        let found = (0..10_000)
            .map(|i| HashMethod::Crc32.digest(&format!("k{}", i)))
            .find(|p| p.as_bytes()[0] == 0)
            .expect("some crc32 in 10k inputs starts with a zero byte");
        assert!(found.to_hex().starts_with("00"));
        assert_eq!(found.to_hex().len(), 8);
    }

    #[test]
    fn leading_u64_matches_prefix() {
        let p = HashMethod::Crc32.digest("123456789");
        assert_eq!(p.leading_u64(), 0xcbf4_3926);
        assert_eq!(p.leading_bits(), 32);

        let p = HashMethod::Md5.digest("");
        assert_eq!(p.leading_u64(), 0xd41d_8cd9_8f00_b204);
        assert_eq!(p.leading_bits(), 64);
    }

    #[test]
    fn serde_by_name() {
        let json = serde_json::to_string(&HashMethod::Sha1).unwrap();
        assert_eq!(json, "\"sha1\"");
        let method: HashMethod = serde_json::from_str("\"crc32\"").unwrap();
        assert_eq!(method, HashMethod::Crc32);
        assert!(serde_json::from_str::<HashMethod>("\"blake\"").is_err());
    }
}
