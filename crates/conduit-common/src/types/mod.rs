//! Identifiers carried by every job message
//!
//! These are deliberately small newtypes: they validate once at the edge
//! (CLI arguments, decoded queue messages) and are then passed around freely.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConduitError, Result};

/// Longest accepted tenant id.
///
/// Tenant ids are embedded in queue lane names, which the queue limits to 128
/// characters, so they are kept well below that.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Tenant identifier
///
/// ASCII alphanumerics plus `-` and `_` only, so the id is safe to embed in
/// lane names and URL paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_TENANT_ID_LEN {
            return Err(ConduitError::InvalidTenant(format!(
                "'{}' must be 1..={} characters",
                raw, MAX_TENANT_ID_LEN
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConduitError::InvalidTenant(format!(
                "'{}' may only contain ASCII letters, digits, '-' and '_'",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = ConduitError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl std::str::FromStr for TenantId {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connector identifier
///
/// Discriminates job payloads: a message is decoded, its source resolved to a
/// connector, and only then dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Paginated JSON feed over HTTP
    HttpFeed,
    /// JSON documents in a local directory
    LocalDir,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::HttpFeed, Source::LocalDir];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::HttpFeed => "http_feed",
            Source::LocalDir => "local_dir",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| ConduitError::UnknownSource(s.to_string()))
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact discriminant such as `issue`, `page` or `folder`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into().to_ascii_lowercase();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConduitError::InvalidEntityType(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityType {
    type Error = ConduitError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<EntityType> for String {
    fn from(t: EntityType) -> Self {
        t.0
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier shared by a root backfill run and all of its child jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackfillId(Uuid);

impl BackfillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BackfillId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for BackfillId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for BackfillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
