//! Strongly-typed identifiers for Gantry entities
//!
//! Gear uuids and deployment ids are opaque strings assigned by the platform;
//! wrapping them in newtypes keeps the fan-out result maps and the store's
//! id-link bookkeeping from mixing them up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp token format for deployment directories. Lexicographic order of
/// the rendered token matches chronological order.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";

/// Unique identifier for a gear (one execution unit of an application)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GearUuid(String);

impl GearUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GearUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remotely reachable gear address of the form `<uuid>@<host>`.
///
/// The uuid portion keys every aggregate result; the host portion is only
/// meaningful to the remote command transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GearAddress {
    uuid: GearUuid,
    host: String,
}

impl GearAddress {
    pub fn new(uuid: GearUuid, host: impl Into<String>) -> Self {
        Self {
            uuid,
            host: host.into(),
        }
    }

    pub fn uuid(&self) -> &GearUuid {
        &self.uuid
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for GearAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uuid, self.host)
    }
}

/// Error parsing a `<uuid>@<host>` gear address
#[derive(Debug, Error)]
#[error("invalid gear address {0:?}: expected <uuid>@<host>")]
pub struct AddressParseError(pub String);

impl FromStr for GearAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((uuid, host)) if !uuid.is_empty() && !host.is_empty() => {
                Ok(Self::new(GearUuid::new(uuid), host))
            }
            _ => Err(AddressParseError(s.to_string())),
        }
    }
}

/// Content-derived identifier of a prepared deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing timestamp token naming a deployment directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentDatetime(String);

impl DeploymentDatetime {
    /// Wrap an already-rendered token (e.g. read back from disk).
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Render a timestamp into a token.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.format(DATETIME_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentDatetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_address_round_trip() {
        let addr: GearAddress = "5504@node1.example.com".parse().unwrap();
        assert_eq!(addr.uuid().as_str(), "5504");
        assert_eq!(addr.host(), "node1.example.com");
        assert_eq!(addr.to_string(), "5504@node1.example.com");
    }

    #[test]
    fn test_address_rejects_missing_host() {
        assert!("5504".parse::<GearAddress>().is_err());
        assert!("@host".parse::<GearAddress>().is_err());
        assert!("5504@".parse::<GearAddress>().is_err());
    }

    #[test]
    fn test_datetime_token_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2013, 8, 16, 13, 36, 36).unwrap();
        let later = Utc.with_ymd_and_hms(2013, 8, 17, 15, 36, 36).unwrap();
        let a = DeploymentDatetime::from_timestamp(earlier);
        let b = DeploymentDatetime::from_timestamp(later);
        assert!(a < b);
    }
}
