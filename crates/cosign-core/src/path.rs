//! Derivation paths in the `M/<index>['](/<index>['])*` text form.
//!
//! A path is an ordered list of [`PathSegment`]s, each a 31-bit index plus a
//! hardened flag. The text form is what the ledger service sends and expects
//! (`M/9999'/0/17`), so parsing and formatting must round-trip exactly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{HARDENED_OFFSET, RECEIVE_BRANCH};
use crate::error::DerivationError;

/// One step of a derivation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    index: u32,
    hardened: bool,
}

impl PathSegment {
    /// A non-hardened step. Fails if `index` does not fit in 31 bits.
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        Self::new(index, false)
    }

    /// A hardened step. Fails if `index` does not fit in 31 bits.
    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        Self::new(index, true)
    }

    /// Build a step from an index and hardened flag.
    pub fn new(index: u32, hardened: bool) -> Result<Self, DerivationError> {
        if index >= HARDENED_OFFSET {
            return Err(DerivationError::IndexOutOfRange(index as u64));
        }
        Ok(Self { index, hardened })
    }

    /// Decode a raw BIP32 child number (hardened steps have bit 31 set).
    pub fn from_child_number(child_number: u32) -> Self {
        Self {
            index: child_number & !HARDENED_OFFSET,
            hardened: child_number & HARDENED_OFFSET != 0,
        }
    }

    /// The 31-bit index, without the hardened offset.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this step requires a private parent.
    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    /// Raw BIP32 child number (`index + 2^31` for hardened steps).
    pub fn child_number(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED_OFFSET
        } else {
            self.index
        }
    }

    /// The same index without the hardened flag.
    pub fn to_normal(self) -> Self {
        Self {
            index: self.index,
            hardened: false,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

impl FromStr for PathSegment {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, hardened) = match s.strip_suffix('\'') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DerivationError::InvalidPath(format!("bad segment {s:?}")));
        }
        let index: u64 = digits
            .parse()
            .map_err(|_| DerivationError::IndexOutOfRange(u64::MAX))?;
        if index >= HARDENED_OFFSET as u64 {
            return Err(DerivationError::IndexOutOfRange(index));
        }
        Self::new(index as u32, hardened)
    }
}

/// An ordered derivation path rooted at the master key `M`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    segments: Vec<PathSegment>,
}

impl DerivationPath {
    /// The empty path (the master key itself).
    pub fn master() -> Self {
        Self::default()
    }

    /// Build a path from its steps.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// `M/<key_index>'`: the subtree handed to the server for a key index.
    pub fn key_index_root(key_index: u32) -> Result<Self, DerivationError> {
        Ok(Self::from_segments(vec![PathSegment::hardened(key_index)?]))
    }

    /// `M/<key_index>'/0`: the parent of every receive address for a key index.
    pub fn receive_branch(key_index: u32) -> Result<Self, DerivationError> {
        Ok(Self::key_index_root(key_index)?.child(PathSegment::normal(RECEIVE_BRANCH)?))
    }

    /// `M/<key_index>'/0/<address_index>`.
    pub fn receive(key_index: u32, address_index: u32) -> Result<Self, DerivationError> {
        Ok(Self::receive_branch(key_index)?.child(PathSegment::normal(address_index)?))
    }

    /// A new path with one more step appended.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// The steps of this path, root first.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this path is just `M`.
    pub fn is_master(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any step is hardened.
    pub fn has_hardened(&self) -> bool {
        self.segments.iter().any(PathSegment::is_hardened)
    }

    /// The key index a wallet path lives under (its first step).
    pub fn key_index(&self) -> Option<u32> {
        self.segments.first().map(PathSegment::index)
    }

    /// The same indices with every hardened flag cleared.
    ///
    /// The backup key is held as a master public key, so it walks the
    /// wallet path with hardening removed.
    pub fn without_hardening(&self) -> Self {
        Self {
            segments: self.segments.iter().map(|s| s.to_normal()).collect(),
        }
    }

    /// The path relative to the key-index subtree (first step removed).
    pub fn strip_key_index(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).copied().collect(),
        }
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("M")?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match parts.next() {
            Some("M") | Some("m") => {}
            _ => {
                return Err(DerivationError::InvalidPath(format!(
                    "{s:?} is not rooted at M"
                )));
            }
        }
        let segments = parts
            .map(PathSegment::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_receive_path() {
        let path: DerivationPath = "M/9999'/0/6".parse().unwrap();
        assert_eq!(path.len(), 3);
        assert!(path.segments()[0].is_hardened());
        assert_eq!(path.segments()[0].index(), 9999);
        assert_eq!(path.segments()[0].child_number(), 9999 + HARDENED_OFFSET);
        assert!(!path.segments()[1].is_hardened());
        assert_eq!(path.segments()[2].index(), 6);
        assert_eq!(path.key_index(), Some(9999));
    }

    #[test]
    fn parse_master() {
        let path: DerivationPath = "M".parse().unwrap();
        assert!(path.is_master());
        assert_eq!(path.to_string(), "M");
        assert_eq!("m".parse::<DerivationPath>().unwrap(), DerivationPath::master());
    }

    #[test]
    fn display_matches_wire_form() {
        let path = DerivationPath::receive(9999, 1).unwrap();
        assert_eq!(path.to_string(), "M/9999'/0/1");
        assert_eq!(DerivationPath::receive_branch(3).unwrap().to_string(), "M/3'/0");
    }

    #[test]
    fn reject_missing_root() {
        assert!(matches!(
            "9999'/0".parse::<DerivationPath>(),
            Err(DerivationError::InvalidPath(_))
        ));
        assert!("".parse::<DerivationPath>().is_err());
        assert!("X/1".parse::<DerivationPath>().is_err());
    }

    #[test]
    fn reject_bad_segments() {
        for bad in ["M/", "M//1", "M/-1", "M/1''", "M/a", "M/1h", "M/ 1", "M/+1"] {
            assert!(bad.parse::<DerivationPath>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn reject_out_of_range_index() {
        assert_eq!(
            "M/2147483648".parse::<DerivationPath>(),
            Err(DerivationError::IndexOutOfRange(2_147_483_648))
        );
        assert!("M/2147483647'".parse::<DerivationPath>().is_ok());
        assert!("M/99999999999999999999999".parse::<DerivationPath>().is_err());
        assert!(PathSegment::hardened(HARDENED_OFFSET).is_err());
    }

    #[test]
    fn without_hardening_and_strip() {
        let path: DerivationPath = "M/9999'/0/0".parse().unwrap();
        assert_eq!(path.without_hardening().to_string(), "M/9999/0/0");
        assert_eq!(path.strip_key_index().to_string(), "M/0/0");
        assert!(path.has_hardened());
        assert!(!path.without_hardening().has_hardened());
    }

    #[test]
    fn child_number_roundtrip() {
        let seg = PathSegment::from_child_number(0x8000_0005);
        assert!(seg.is_hardened());
        assert_eq!(seg.index(), 5);
        assert_eq!(seg.child_number(), 0x8000_0005);
    }

    #[test]
    fn serde_as_string() {
        let path = DerivationPath::receive(9999, 44).unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"M/9999'/0/44\"");
        let back: DerivationPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<DerivationPath>("\"Q/1\"").is_err());
    }

    proptest! {
        #[test]
        fn text_form_roundtrips(
            steps in prop::collection::vec((0u32..HARDENED_OFFSET, any::<bool>()), 0..8),
        ) {
            let segments = steps
                .iter()
                .map(|&(i, h)| PathSegment::new(i, h).unwrap())
                .collect();
            let path = DerivationPath::from_segments(segments);
            let parsed: DerivationPath = path.to_string().parse().unwrap();
            prop_assert_eq!(parsed, path);
        }
    }
}
