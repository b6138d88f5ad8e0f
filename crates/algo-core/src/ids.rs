//! Identifiers shared by every layer of the engine.
//!
//! Securities, sub-accounts and users are reference data owned elsewhere;
//! the dispatch core only needs their ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Process-unique algo id. Ids are never reused, including across restarts.
pub type AlgoId = u32;

/// Process-unique order id.
pub type OrderId = u64;

/// Process-unique instrument id.
pub type InstrumentId = u64;

/// Market-data source, packed from up to four ASCII bytes (e.g. `"BBGX"`).
///
/// `DataSrc(0)` is the default source and displays as an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DataSrc(pub u32);

impl DataSrc {
    /// Pack a source code. Returns `None` for codes longer than four bytes
    /// or containing non-alphanumeric characters.
    pub fn new(code: &str) -> Option<Self> {
        if code.len() > 4 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        let packed = code.bytes().fold(0u32, |acc, b| (acc << 8) | b as u32);
        Some(DataSrc(packed))
    }

    pub fn is_default(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DataSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_be_bytes() {
            if b != 0 {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DataSrc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataSrc::new(s.trim()).ok_or_else(|| format!("invalid data source: {s:?}"))
    }
}

impl From<DataSrc> for String {
    fn from(src: DataSrc) -> Self {
        src.to_string()
    }
}

impl TryFrom<String> for DataSrc {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Security reference id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityId(pub u32);

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-account reference id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubAccountId(pub u32);

/// Key of one market-data subscription: (source, security).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MdKey {
    pub src: DataSrc,
    pub sec: SecurityId,
}

impl MdKey {
    pub fn new(src: DataSrc, sec: SecurityId) -> Self {
        MdKey { src, sec }
    }
}

impl fmt::Display for MdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.src.is_default() {
            write!(f, "{}", self.sec)
        } else {
            write!(f, "{}@{}", self.sec, self.src)
        }
    }
}

/// The user that spawned an algo. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        User {
            id,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_src_packs_and_displays() {
        let src = DataSrc::new("BBGX").unwrap();
        assert_eq!(src.0, u32::from_be_bytes(*b"BBGX"));
        assert_eq!(src.to_string(), "BBGX");

        let short: DataSrc = "IB".parse().unwrap();
        assert_eq!(short.to_string(), "IB");
        assert!(DataSrc::default().is_default());
        assert_eq!(DataSrc::default().to_string(), "");
    }

    #[test]
    fn data_src_rejects_long_codes() {
        assert!(DataSrc::new("TOOLONG").is_none());
        assert!(DataSrc::new("A-B").is_none());
    }

    #[test]
    fn data_src_serializes_as_code() {
        let src = DataSrc::new("CTP").unwrap();
        let json = serde_json::to_string(&src).unwrap();
        assert_eq!(json, "\"CTP\"");
        let back: DataSrc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, src);
    }
}
