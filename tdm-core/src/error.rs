use crate::types::{MemberId, PartitionId};
use thiserror::Error;

/// Failures while decoding bytes produced by one of the replication codecs.
///
/// A decode error never comes with a partially populated value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error(
        "Truncated buffer reading {field}: need {needed} bytes at offset {offset}, {available} available"
    )]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown {kind} discriminator: {value:#04x}")]
    UnknownDiscriminator { kind: &'static str, value: u8 },

    #[error("Negative length for {field}: {length}")]
    NegativeLength { field: &'static str, length: i32 },

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("Checksum mismatch for entry at position {position}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        position: i64,
        expected: u32,
        actual: u32,
    },
}

/// Rejections raised while distributing partitions or planning a reconfiguration.
///
/// Planning is all-or-nothing, so one of these replaces the whole result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No members configured for partition {0}")]
    NoMembersConfigured(PartitionId),

    #[error("Partition {partition} references members unknown to the cluster: {}", join_members(.members))]
    UnknownMembers {
        partition: PartitionId,
        members: Vec<MemberId>,
    },

    #[error(
        "Partition {partition} is configured with {actual} members, replication factor requires {expected}"
    )]
    ReplicationFactorMismatch {
        partition: PartitionId,
        expected: usize,
        actual: usize,
    },

    #[error("Replication factor must be greater than zero")]
    ZeroReplicationFactor,

    #[error("Partition count cannot decrease: current {current}, target {target}")]
    PartitionCountDecreased { current: usize, target: usize },

    #[error("Not enough members: {available} available, replication factor {required}")]
    InsufficientMembers { required: usize, available: usize },

    #[error("Partition {0} exists in the current configuration but not in the target distribution")]
    PartitionRemoved(PartitionId),
}

fn join_members(members: &[MemberId]) -> String {
    members
        .iter()
        .map(MemberId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("Length of {field} does not fit the wire format: {length}")]
    LengthOverflow { field: &'static str, length: usize },

    #[error("Entry at position {position} is {size} bytes, exceeding the {capacity} byte buffer")]
    EntryTooLarge {
        position: i64,
        size: usize,
        capacity: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel disconnected: {0}")]
    ChannelDisconnected(&'static str),

    #[error("Executor failed: {0}")]
    Executor(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl TandemError {
    /// True for failures caused by malformed or truncated input bytes.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// True for distribution and planning rejections.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;
