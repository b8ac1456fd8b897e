use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Server-assigned classification of a scanned URL.
///
/// The client never derives a verdict from the risk score; it only
/// mirrors what the service reported. Parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Safe,
    Suspicious,
    Phishing,
}

impl Verdict {
    pub const ALL: [Self; 3] = [Self::Safe, Self::Suspicious, Self::Phishing];

    /// Wire spelling used by the service.
    pub fn as_wire(self) -> &'static str {
        match self {
            Verdict::Safe => "SAFE",
            Verdict::Suspicious => "SUSPICIOUS",
            Verdict::Phishing => "PHISHING",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Returned when a verdict label is not one of the three known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerdict(pub String);

impl Display for UnknownVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown verdict '{}'", self.0)
    }
}

impl std::error::Error for UnknownVerdict {}

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Verdict::Safe),
            "suspicious" => Ok(Verdict::Suspicious),
            "phishing" => Ok(Verdict::Phishing),
            _ => Err(UnknownVerdict(s.to_string())),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Verdict slot of a batch entry; the service reports `ERROR` for URLs
/// whose individual analysis failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchVerdict {
    Scored(Verdict),
    Error,
}

impl BatchVerdict {
    pub fn verdict(self) -> Option<Verdict> {
        match self {
            BatchVerdict::Scored(verdict) => Some(verdict),
            BatchVerdict::Error => None,
        }
    }
}

impl Serialize for BatchVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BatchVerdict::Scored(verdict) => verdict.serialize(serializer),
            BatchVerdict::Error => serializer.serialize_str("ERROR"),
        }
    }
}

impl<'de> Deserialize<'de> for BatchVerdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().eq_ignore_ascii_case("error") {
            return Ok(BatchVerdict::Error);
        }
        raw.parse()
            .map(BatchVerdict::Scored)
            .map_err(serde::de::Error::custom)
    }
}
