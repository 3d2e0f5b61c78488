#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod buffer;
mod error;
mod types;

pub use buffer::{BufferReader, BufferWriter, length_prefix};
pub use error::{DecodeError, Result, TandemError, ValidationError};
pub use types::{Member, MemberId, MemberType, PartitionId};

/// Encoded width of a boolean flag.
pub const BOOL_LEN: usize = 1;
/// Encoded width of a one-byte discriminator.
pub const DISCRIMINATOR_LEN: usize = 1;
/// Encoded width of an `int32` length or count.
pub const I32_LEN: usize = 4;
/// Encoded width of an `int64` index, position or timestamp.
pub const I64_LEN: usize = 8;

/// Position value meaning "start from the first entry in the log".
pub const FIRST_POSITION_SENTINEL: i64 = -1;
