//! The wire data model (spec §3): `Tag`, `Credential`, host/port endpoints,
//! and the `Login` result shape.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorCategory, codes};

/// A globally unique, typed identifier for an entity.
///
/// Wire form is `kind-name[-number]` (spec §3), e.g. `machine-0`,
/// `unit-wordpress-1`, `service-mysql`, `user-admin`, `relation-3`. The
/// empty tag (`Tag::Environment`) means "the environment/process itself".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Machine(u64),
    Unit { service: String, number: u32 },
    Service(String),
    User(String),
    Relation(u64),
    Action(String),
    Space(String),
    /// The empty tag: "the environment/process itself".
    Environment,
}

impl Tag {
    /// `true` for `unit-<service>-<n>` tags.
    pub fn is_unit(&self) -> bool {
        matches!(self, Tag::Unit { .. })
    }

    /// `true` for `machine-<n>` tags.
    pub fn is_machine(&self) -> bool {
        matches!(self, Tag::Machine(_))
    }

    /// `true` for `user-<name>` tags.
    pub fn is_user(&self) -> bool {
        matches!(self, Tag::User(_))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Machine(n) => write!(f, "machine-{n}"),
            Tag::Unit { service, number } => write!(f, "unit-{service}-{number}"),
            Tag::Service(name) => write!(f, "service-{name}"),
            Tag::User(name) => write!(f, "user-{name}"),
            Tag::Relation(id) => write!(f, "relation-{id}"),
            Tag::Action(id) => write!(f, "action-{id}"),
            Tag::Space(name) => write!(f, "space-{name}"),
            Tag::Environment => write!(f, ""),
        }
    }
}

impl FromStr for Tag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Tag::Environment);
        }
        let (kind, rest) = s.split_once('-').ok_or_else(malformed(s))?;
        match kind {
            "machine" => rest.parse::<u64>().map(Tag::Machine).map_err(|_| malformed(s)()),
            "unit" => {
                let (service, number) = rest.rsplit_once('-').ok_or_else(malformed(s))?;
                let number = number.parse::<u32>().map_err(|_| malformed(s)())?;
                if service.is_empty() {
                    return Err(malformed(s)());
                }
                Ok(Tag::Unit {
                    service: service.to_string(),
                    number,
                })
            }
            "service" if !rest.is_empty() => Ok(Tag::Service(rest.to_string())),
            "user" if !rest.is_empty() => Ok(Tag::User(rest.to_string())),
            "relation" => rest
                .parse::<u64>()
                .map(Tag::Relation)
                .map_err(|_| malformed(s)()),
            "action" if !rest.is_empty() => Ok(Tag::Action(rest.to_string())),
            "space" if !rest.is_empty() => Ok(Tag::Space(rest.to_string())),
            _ => Err(malformed(s)()),
        }
    }
}

fn malformed(s: &str) -> impl Fn() -> CoreError + '_ {
    move || {
        CoreError::new(
            codes::TAG_MALFORMED,
            ErrorCategory::Internal,
            format!("malformed tag: {s:?}"),
        )
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A password wrapper whose `Debug` impl never prints the secret. Not a
/// cryptographic zeroizing type — it exists purely to stop passwords from
/// leaking into `{:?}`-formatted logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(\"***\")")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `{tag, password, nonce}` (spec §3). `nonce` is mandatory for machine-agent
/// logins; ignored for unit agents and human users.
#[derive(Debug, Clone)]
pub struct Credential {
    pub tag: Tag,
    pub password: SecretString,
    pub nonce: Option<String>,
}

/// A host/port endpoint as persisted by `StateStore` or observed on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// `{servers: [[HostPort]]}` — the reply to a successful `Login` (spec §3):
/// the union of endpoints persisted in `StateStore` and the endpoint the
/// current connection arrived on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub servers: Vec<Vec<HostPort>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_common_tag_kinds() {
        for s in [
            "machine-0",
            "unit-wordpress-1",
            "service-mysql",
            "user-admin",
            "relation-42",
        ] {
            let tag: Tag = s.parse().expect("should parse");
            assert_eq!(tag.to_string(), s);
        }
    }

    #[test]
    fn empty_tag_means_environment() {
        let tag: Tag = "".parse().unwrap();
        assert_eq!(tag, Tag::Environment);
        assert_eq!(tag.to_string(), "");
    }

    #[test]
    fn rejects_malformed_tags() {
        for s in ["nope", "machine-", "unit-noservice", "machine-abc"] {
            assert!(s.parse::<Tag>().is_err(), "expected {s:?} to be rejected");
        }
    }

    #[test]
    fn secret_string_debug_redacts() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(\"***\")");
        assert_eq!(secret.expose(), "hunter2");
    }
}
