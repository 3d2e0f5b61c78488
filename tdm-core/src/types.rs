//! Cluster identifiers shared by the codec, the distributor and the planner.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cluster member (broker).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque, totally ordered partition identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a member inside a consensus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MemberType {
    /// Votes and replicates.
    Active = 0,
    /// Replicates only.
    Passive = 1,
    /// Replicates and may be promoted to active.
    Promotable = 2,
}

impl MemberType {
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MemberType {
    type Error = DecodeError;

    fn try_from(value: u8) -> std::result::Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Active),
            1 => Ok(Self::Passive),
            2 => Ok(Self::Promotable),
            _ => Err(DecodeError::UnknownDiscriminator {
                kind: "member type",
                value,
            }),
        }
    }
}

/// A consensus group member as recorded in configuration entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Member {
    pub id: MemberId,
    pub member_type: MemberType,
    /// Unix millis of the last role change.
    pub last_type_change_at: i64,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, member_type: MemberType, last_type_change_at: i64) -> Self {
        Self {
            id: id.into(),
            member_type,
            last_type_change_at,
        }
    }
}
