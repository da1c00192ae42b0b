use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ContextError, Result};

/// Discriminator naming which kind of entity a context describes.
///
/// Known kinds get their own variant; anything else is carried verbatim in
/// `Other` so contexts from newer producers still round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    #[default]
    User,
    Session,
    Browser,
    Device,
    Service,
    Organization,
    Request,
    Job,
    Application,
    MobileDevice,
    Multi,
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::User => "user",
            Kind::Session => "session",
            Kind::Browser => "browser",
            Kind::Device => "device",
            Kind::Service => "service",
            Kind::Organization => "organization",
            Kind::Request => "request",
            Kind::Job => "job",
            Kind::Application => "ld_application",
            Kind::MobileDevice => "ld_device",
            Kind::Multi => "multi",
            Kind::Other(s) => s,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Kind::Multi)
    }

    /// Canonical form. An `Other` that spells a known or reserved kind is
    /// re-parsed, so `Other("user")` becomes `User` and `Other("kind")` fails.
    pub fn normalize(self) -> Result<Kind> {
        match self {
            Kind::Other(s) => Kind::parse(&s),
            known => Ok(known),
        }
    }

    /// Parse a kind string. Empty strings and the reserved word `kind` are rejected.
    pub fn parse(s: &str) -> Result<Kind> {
        Ok(match s {
            "" => return Err(ContextError::invalid("kind must not be empty")),
            "kind" => return Err(ContextError::invalid("`kind` is not a valid context kind")),
            "user" => Kind::User,
            "session" => Kind::Session,
            "browser" => Kind::Browser,
            "device" => Kind::Device,
            "service" => Kind::Service,
            "organization" => Kind::Organization,
            "request" => Kind::Request,
            "job" => Kind::Job,
            "ld_application" => Kind::Application,
            "ld_device" => Kind::MobileDevice,
            "multi" => Kind::Multi,
            other => Kind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Kind::parse(s)
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Kind::parse(&s).map_err(serde::de::Error::custom)
    }
}
