//! Identity types used throughout the SDK.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WireError;

/// Identity of a user or a conversation: a UUID scoped to a federation domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedId {
    pub id: Uuid,
    pub domain: String,
}

impl QualifiedId {
    pub fn new(id: Uuid, domain: impl Into<String>) -> Self {
        Self {
            id,
            domain: domain.into(),
        }
    }

    /// The `"<id>@<domain>"` key used to address per-conversation event queues.
    pub fn channel_key(&self) -> String {
        format!("{}@{}", self.id, self.domain)
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.domain)
    }
}

/// Identity of a team; teams are not federation-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub Uuid);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque device identity handed to the crypto engine; storage never parses it.
///
/// Wire format: `"<userUuid>:<deviceId>@<domain>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CryptoClientId(String);

impl CryptoClientId {
    pub fn new(user_id: Uuid, device_id: &str, domain: &str) -> Self {
        Self(format!("{user_id}:{device_id}@{domain}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the `userUuid`, `deviceId` and `domain` components back out.
    ///
    /// Only the crypto engine is expected to need this; storage treats the id as opaque.
    pub fn parse(s: &str) -> Result<(Uuid, String, String), WireError> {
        let (user_and_device, domain) = s
            .rsplit_once('@')
            .ok_or_else(|| WireError::invalid_parameter("crypto client id missing domain"))?;
        let (user, device) = user_and_device
            .split_once(':')
            .ok_or_else(|| WireError::invalid_parameter("crypto client id missing device id"))?;
        let user_id = Uuid::parse_str(user)
            .map_err(|_| WireError::invalid_parameter("crypto client id has invalid user uuid"))?;
        Ok((user_id, device.to_string(), domain.to_string()))
    }
}

impl fmt::Display for CryptoClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque MLS group id, persisted base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MlsGroupId(Vec<u8>);

impl MlsGroupId {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, WireError> {
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| WireError::invalid_parameter("invalid base64 mls group id"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for MlsGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}
