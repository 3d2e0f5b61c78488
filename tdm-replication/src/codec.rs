//! Binary codec for consensus log records.
//!
//! # Wire Format
//!
//! Every record starts with a one-byte kind discriminator and the record index:
//!
//! ```text
//! [kind: u8][index: i64][kind-specific fields]
//!
//! Initial:        (no fields)
//! Application:    [lowest_position: i64][highest_position: i64][payload_len: i32][payload]
//! Configuration:  [timestamp: i64][joint: u8][old_count: i32][old members..]
//!                 [new_count: i32][new members..]
//! Member:         [id_len: i32][id bytes][type: u8][last_type_change_at: i64]
//! ```
//!
//! All integers are little-endian. Records can be written at any offset of a
//! shared buffer; the `*_serialized_length` functions return exactly the
//! number of bytes the matching write consumes, so callers size buffers
//! before writing.

use bytes::Bytes;
use std::collections::BTreeSet;
use tdm_core::{
    BOOL_LEN, BufferReader, BufferWriter, DISCRIMINATOR_LEN, DecodeError, I32_LEN, I64_LEN,
    Member, MemberId, MemberType, Result, length_prefix,
};

/// Size of the header shared by every record kind.
pub const RECORD_HEADER_LEN: usize = DISCRIMINATOR_LEN + I64_LEN;

const APPLICATION_FIXED_LEN: usize = I64_LEN + I64_LEN + I32_LEN;
const CONFIGURATION_FIXED_LEN: usize = I64_LEN + BOOL_LEN + I32_LEN + I32_LEN;
const MEMBER_FIXED_LEN: usize = I32_LEN + DISCRIMINATOR_LEN + I64_LEN;

/// Record kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// First entry written by a new leader.
    Initial = 0,
    /// Opaque application payload covering a range of stream positions.
    Application = 1,
    /// Membership change, plain or joint.
    Configuration = 2,
}

impl EntryKind {
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for EntryKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> std::result::Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Initial),
            1 => Ok(Self::Application),
            2 => Ok(Self::Configuration),
            _ => Err(DecodeError::UnknownDiscriminator {
                kind: "log entry",
                value,
            }),
        }
    }
}

/// Application payload carried by the consensus log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEntry {
    pub lowest_position: i64,
    pub highest_position: i64,
    pub data: Bytes,
}

impl ApplicationEntry {
    pub fn new(lowest_position: i64, highest_position: i64, data: impl Into<Bytes>) -> Self {
        Self {
            lowest_position,
            highest_position,
            data: data.into(),
        }
    }
}

/// Membership configuration carried by the consensus log.
///
/// `old_members` is only present while transitioning between two member sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEntry {
    /// Unix millis at which the configuration was created.
    pub timestamp: i64,
    pub new_members: BTreeSet<Member>,
    pub old_members: Option<BTreeSet<Member>>,
}

impl ConfigurationEntry {
    /// A configuration that replaces the member set in one step.
    #[must_use]
    pub fn plain(timestamp: i64, new_members: BTreeSet<Member>) -> Self {
        Self {
            timestamp,
            new_members,
            old_members: None,
        }
    }

    /// A configuration spanning both the outgoing and incoming member sets.
    #[must_use]
    pub fn joint(
        timestamp: i64,
        old_members: BTreeSet<Member>,
        new_members: BTreeSet<Member>,
    ) -> Self {
        Self {
            timestamp,
            new_members,
            old_members: Some(old_members),
        }
    }

    /// True iff an old member set is present and differs from the new one.
    #[must_use]
    pub fn requires_joint_consensus(&self) -> bool {
        self.old_members
            .as_ref()
            .is_some_and(|old| *old != self.new_members)
    }
}

/// Kind-specific content of a log record. The set of kinds is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    Initial,
    Application(ApplicationEntry),
    Configuration(ConfigurationEntry),
}

/// A single record in the consensus log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntryRecord {
    pub index: i64,
    pub payload: EntryPayload,
}

impl LogEntryRecord {
    #[must_use]
    pub fn initial(index: i64) -> Self {
        Self {
            index,
            payload: EntryPayload::Initial,
        }
    }

    #[must_use]
    pub fn application(index: i64, entry: ApplicationEntry) -> Self {
        Self {
            index,
            payload: EntryPayload::Application(entry),
        }
    }

    #[must_use]
    pub fn configuration(index: i64, entry: ConfigurationEntry) -> Self {
        Self {
            index,
            payload: EntryPayload::Configuration(entry),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self.payload {
            EntryPayload::Initial => EntryKind::Initial,
            EntryPayload::Application(_) => EntryKind::Application,
            EntryPayload::Configuration(_) => EntryKind::Configuration,
        }
    }
}

/// Stateless encoder/decoder for [`LogEntryRecord`]s.
pub struct LogEntryCodec;

impl LogEntryCodec {
    // === Lengths ===

    #[must_use]
    pub const fn initial_entry_serialized_length() -> usize {
        RECORD_HEADER_LEN
    }

    pub fn application_entry_serialized_length(entry: &ApplicationEntry) -> Result<usize> {
        length_prefix("application payload", entry.data.len())?;
        Ok(RECORD_HEADER_LEN + APPLICATION_FIXED_LEN + entry.data.len())
    }

    pub fn configuration_entry_serialized_length(entry: &ConfigurationEntry) -> Result<usize> {
        let old_len = match &entry.old_members {
            Some(old) => members_length(old)?,
            None => 0,
        };
        let new_len = members_length(&entry.new_members)?;
        Ok(RECORD_HEADER_LEN + CONFIGURATION_FIXED_LEN + old_len + new_len)
    }

    pub fn serialized_length(record: &LogEntryRecord) -> Result<usize> {
        match &record.payload {
            EntryPayload::Initial => Ok(Self::initial_entry_serialized_length()),
            EntryPayload::Application(entry) => Self::application_entry_serialized_length(entry),
            EntryPayload::Configuration(entry) => {
                Self::configuration_entry_serialized_length(entry)
            },
        }
    }

    // === Encoding ===

    /// Write an initial entry at `offset`, returning the bytes written.
    pub fn write_initial_entry(index: i64, buf: &mut [u8], offset: usize) -> Result<usize> {
        let len = Self::initial_entry_serialized_length();
        let mut writer = BufferWriter::reserve(buf, offset, len)?;
        write_header(&mut writer, EntryKind::Initial, index)?;
        Ok(writer.position() - offset)
    }

    /// Write an application entry at `offset`, returning the bytes written.
    pub fn write_application_entry(
        index: i64,
        entry: &ApplicationEntry,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let len = Self::application_entry_serialized_length(entry)?;
        let mut writer = BufferWriter::reserve(buf, offset, len)?;
        write_header(&mut writer, EntryKind::Application, index)?;
        writer.put_i64(entry.lowest_position)?;
        writer.put_i64(entry.highest_position)?;
        writer.put_length_prefixed("application payload", &entry.data)?;
        Ok(writer.position() - offset)
    }

    /// Write a configuration entry at `offset`, returning the bytes written.
    pub fn write_configuration_entry(
        index: i64,
        entry: &ConfigurationEntry,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let len = Self::configuration_entry_serialized_length(entry)?;
        let mut writer = BufferWriter::reserve(buf, offset, len)?;
        write_header(&mut writer, EntryKind::Configuration, index)?;
        writer.put_i64(entry.timestamp)?;
        writer.put_bool(entry.old_members.is_some())?;
        match &entry.old_members {
            Some(old) => write_members(&mut writer, old)?,
            None => writer.put_i32(0)?,
        }
        write_members(&mut writer, &entry.new_members)?;
        Ok(writer.position() - offset)
    }

    /// Write any record at `offset`, returning the bytes written.
    pub fn write(record: &LogEntryRecord, buf: &mut [u8], offset: usize) -> Result<usize> {
        match &record.payload {
            EntryPayload::Initial => Self::write_initial_entry(record.index, buf, offset),
            EntryPayload::Application(entry) => {
                Self::write_application_entry(record.index, entry, buf, offset)
            },
            EntryPayload::Configuration(entry) => {
                Self::write_configuration_entry(record.index, entry, buf, offset)
            },
        }
    }

    /// Encode a record into a freshly allocated, exactly sized buffer.
    pub fn encode(record: &LogEntryRecord) -> Result<Bytes> {
        let mut buf = vec![0u8; Self::serialized_length(record)?];
        Self::write(record, &mut buf, 0)?;
        Ok(Bytes::from(buf))
    }

    // === Decoding ===

    /// Decode the record starting at the beginning of `buf`.
    pub fn read_log_entry(buf: &[u8]) -> std::result::Result<LogEntryRecord, DecodeError> {
        Self::read_log_entry_at(buf, 0).map(|(record, _)| record)
    }

    /// Decode the record starting at `offset`, returning it with the number of
    /// bytes consumed. Trailing bytes after the record are left untouched.
    pub fn read_log_entry_at(
        buf: &[u8],
        offset: usize,
    ) -> std::result::Result<(LogEntryRecord, usize), DecodeError> {
        let mut reader = BufferReader::at(buf, offset)?;
        let kind = EntryKind::try_from(reader.read_u8("entry kind")?)?;
        let index = reader.read_i64("entry index")?;

        let payload = match kind {
            EntryKind::Initial => EntryPayload::Initial,
            EntryKind::Application => EntryPayload::Application(read_application(&mut reader)?),
            EntryKind::Configuration => {
                EntryPayload::Configuration(read_configuration(&mut reader)?)
            },
        };

        Ok((LogEntryRecord { index, payload }, reader.position() - offset))
    }
}

fn members_length(members: &BTreeSet<Member>) -> Result<usize> {
    length_prefix("member count", members.len())?;
    let mut total = 0;
    for member in members {
        length_prefix("member id", member.id.as_str().len())?;
        total += MEMBER_FIXED_LEN + member.id.as_str().len();
    }
    Ok(total)
}

fn write_header(writer: &mut BufferWriter<'_>, kind: EntryKind, index: i64) -> Result<()> {
    writer.put_u8(kind.as_u8())?;
    writer.put_i64(index)
}

fn write_members(writer: &mut BufferWriter<'_>, members: &BTreeSet<Member>) -> Result<()> {
    writer.put_i32(length_prefix("member count", members.len())?)?;
    for member in members {
        writer.put_length_prefixed("member id", member.id.as_str().as_bytes())?;
        writer.put_u8(member.member_type.as_u8())?;
        writer.put_i64(member.last_type_change_at)?;
    }
    Ok(())
}

fn read_application(
    reader: &mut BufferReader<'_>,
) -> std::result::Result<ApplicationEntry, DecodeError> {
    let lowest_position = reader.read_i64("lowest position")?;
    let highest_position = reader.read_i64("highest position")?;
    let data = reader.read_length_prefixed("application payload")?;
    Ok(ApplicationEntry {
        lowest_position,
        highest_position,
        data: Bytes::copy_from_slice(data),
    })
}

fn read_configuration(
    reader: &mut BufferReader<'_>,
) -> std::result::Result<ConfigurationEntry, DecodeError> {
    let timestamp = reader.read_i64("configuration timestamp")?;
    let joint = reader.read_bool("joint consensus flag")?;

    let old_count = reader.read_length("old member count")?;
    let old_members = if joint {
        Some(read_members(reader, old_count)?)
    } else if old_count == 0 {
        None
    } else {
        return Err(DecodeError::Malformed {
            field: "old member count",
            reason: format!("{old_count} old members without joint consensus flag"),
        });
    };

    let new_count = reader.read_length("new member count")?;
    let new_members = read_members(reader, new_count)?;

    Ok(ConfigurationEntry {
        timestamp,
        new_members,
        old_members,
    })
}

fn read_members(
    reader: &mut BufferReader<'_>,
    count: usize,
) -> std::result::Result<BTreeSet<Member>, DecodeError> {
    let mut members = BTreeSet::new();
    let mut ids = BTreeSet::new();
    for _ in 0..count {
        let id = MemberId::new(reader.read_string("member id")?);
        let member_type = MemberType::try_from(reader.read_u8("member type")?)?;
        let last_type_change_at = reader.read_i64("member type change time")?;
        if !ids.insert(id.clone()) {
            return Err(DecodeError::Malformed {
                field: "member set",
                reason: format!("duplicate member id {id}"),
            });
        }
        members.insert(Member::new(id, member_type, last_type_change_at));
    }
    Ok(members)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tdm_core::TandemError;

    fn member(id: &str, member_type: MemberType) -> Member {
        Member::new(id, member_type, 1_700_000_000_000)
    }

    fn members(ids: &[&str]) -> BTreeSet<Member> {
        ids.iter().map(|id| member(id, MemberType::Active)).collect()
    }

    fn sample_records() -> Vec<LogEntryRecord> {
        vec![
            LogEntryRecord::initial(1),
            LogEntryRecord::application(
                2,
                ApplicationEntry::new(100, 104, Bytes::from_static(b"batch of five events")),
            ),
            LogEntryRecord::application(3, ApplicationEntry::new(105, 105, Bytes::new())),
            LogEntryRecord::configuration(
                4,
                ConfigurationEntry::plain(1_700_000_000_123, members(&["0", "1", "2"])),
            ),
            LogEntryRecord::configuration(
                5,
                ConfigurationEntry::joint(
                    1_700_000_000_456,
                    members(&["0", "1", "2"]),
                    [
                        member("1", MemberType::Active),
                        member("2", MemberType::Active),
                        member("3", MemberType::Promotable),
                    ]
                    .into_iter()
                    .collect(),
                ),
            ),
        ]
    }

    #[test]
    fn test_roundtrip_at_offset_zero() {
        for record in sample_records() {
            let encoded = LogEntryCodec::encode(&record).unwrap();
            let decoded = LogEntryCodec::read_log_entry(&encoded).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_roundtrip_relocated_into_shared_buffer() {
        for record in sample_records() {
            let encoded = LogEntryCodec::encode(&record).unwrap();

            let offset = 37;
            let mut shared = vec![0xEEu8; offset + encoded.len() + 11];
            shared[offset..offset + encoded.len()].copy_from_slice(&encoded);

            let (decoded, consumed) = LogEntryCodec::read_log_entry_at(&shared, offset).unwrap();
            assert_eq!(decoded, record);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_records_packed_back_to_back() {
        let records = sample_records();
        let total: usize = records
            .iter()
            .map(|r| LogEntryCodec::serialized_length(r).unwrap())
            .sum();
        let mut buf = vec![0u8; total];

        let mut offset = 0;
        for record in &records {
            offset += LogEntryCodec::write(record, &mut buf, offset).unwrap();
        }
        assert_eq!(offset, total);

        let mut offset = 0;
        for record in &records {
            let (decoded, consumed) = LogEntryCodec::read_log_entry_at(&buf, offset).unwrap();
            assert_eq!(&decoded, record);
            offset += consumed;
        }
    }

    #[test]
    fn test_length_matches_bytes_written() {
        let mut buf = vec![0u8; 512];

        let written = LogEntryCodec::write_initial_entry(9, &mut buf, 3).unwrap();
        assert_eq!(written, LogEntryCodec::initial_entry_serialized_length());

        let app = ApplicationEntry::new(1, 2, Bytes::from_static(b"xyz"));
        let written = LogEntryCodec::write_application_entry(9, &app, &mut buf, 3).unwrap();
        assert_eq!(
            written,
            LogEntryCodec::application_entry_serialized_length(&app).unwrap()
        );

        let plain = ConfigurationEntry::plain(7, members(&["a", "bb"]));
        let written = LogEntryCodec::write_configuration_entry(9, &plain, &mut buf, 3).unwrap();
        assert_eq!(
            written,
            LogEntryCodec::configuration_entry_serialized_length(&plain).unwrap()
        );

        let joint = ConfigurationEntry::joint(7, members(&["a"]), members(&["a", "ccc"]));
        let written = LogEntryCodec::write_configuration_entry(9, &joint, &mut buf, 3).unwrap();
        assert_eq!(
            written,
            LogEntryCodec::configuration_entry_serialized_length(&joint).unwrap()
        );
    }

    #[test]
    fn test_application_length_layout() {
        let app = ApplicationEntry::new(1, 2, Bytes::from_static(b"12345"));
        // kind(1) + index(8) + lowest(8) + highest(8) + len(4) + payload(5)
        assert_eq!(
            LogEntryCodec::application_entry_serialized_length(&app).unwrap(),
            34
        );
    }

    #[test]
    fn test_write_into_small_buffer_leaves_destination_untouched() {
        let record = LogEntryRecord::application(
            1,
            ApplicationEntry::new(1, 1, Bytes::from_static(b"payload")),
        );
        let needed = LogEntryCodec::serialized_length(&record).unwrap();
        let mut buf = vec![0x55u8; needed + 2];

        let err = LogEntryCodec::write(&record, &mut buf, 3).unwrap_err();
        assert!(matches!(err, TandemError::BufferTooSmall { .. }));
        assert!(buf.iter().all(|b| *b == 0x55));
    }

    #[test]
    fn test_joint_consensus_flag() {
        let plain = ConfigurationEntry::plain(0, members(&["a", "b"]));
        assert!(!plain.requires_joint_consensus());

        let unchanged = ConfigurationEntry::joint(0, members(&["a", "b"]), members(&["a", "b"]));
        assert!(!unchanged.requires_joint_consensus());

        let changed = ConfigurationEntry::joint(0, members(&["a", "b"]), members(&["b", "c"]));
        assert!(changed.requires_joint_consensus());

        let decoded = LogEntryCodec::read_log_entry(
            &LogEntryCodec::encode(&LogEntryRecord::configuration(1, changed)).unwrap(),
        )
        .unwrap();
        match decoded.payload {
            EntryPayload::Configuration(entry) => assert!(entry.requires_joint_consensus()),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_unknown_discriminator() {
        let mut encoded = LogEntryCodec::encode(&LogEntryRecord::initial(1))
            .unwrap()
            .to_vec();
        encoded[0] = 0x7F;
        assert_eq!(
            LogEntryCodec::read_log_entry(&encoded),
            Err(DecodeError::UnknownDiscriminator {
                kind: "log entry",
                value: 0x7F
            })
        );
    }

    #[test]
    fn test_truncated_buffers_fail() {
        for record in sample_records() {
            let encoded = LogEntryCodec::encode(&record).unwrap();
            for cut in 0..encoded.len() {
                let result = LogEntryCodec::read_log_entry(&encoded[..cut]);
                assert!(
                    matches!(result, Err(DecodeError::Truncated { .. })),
                    "cut at {cut} of {:?} decoded to {result:?}",
                    record.kind()
                );
            }
        }
    }

    #[test]
    fn test_old_members_without_joint_flag_rejected() {
        let entry = ConfigurationEntry::joint(0, members(&["a"]), members(&["b"]));
        let mut encoded = LogEntryCodec::encode(&LogEntryRecord::configuration(1, entry))
            .unwrap()
            .to_vec();
        // joint flag sits after kind, index and timestamp
        encoded[RECORD_HEADER_LEN + I64_LEN] = 0;
        assert!(matches!(
            LogEntryCodec::read_log_entry(&encoded),
            Err(DecodeError::Malformed {
                field: "old member count",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_member_id_rejected() {
        let set: BTreeSet<Member> = [
            member("a", MemberType::Active),
            member("a", MemberType::Passive),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);

        let entry = ConfigurationEntry::plain(0, set);
        let encoded = LogEntryCodec::encode(&LogEntryRecord::configuration(1, entry)).unwrap();
        let err = LogEntryCodec::read_log_entry(&encoded).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                field: "member set",
                ..
            }
        ));
        assert!(err.to_string().contains("duplicate member id a"));
    }

    #[test]
    fn test_unknown_member_type_rejected() {
        let entry = ConfigurationEntry::plain(0, members(&["a"]));
        let mut encoded = LogEntryCodec::encode(&LogEntryRecord::configuration(1, entry))
            .unwrap()
            .to_vec();
        // header + fixed config fields + id length + "a"
        let type_offset = RECORD_HEADER_LEN + CONFIGURATION_FIXED_LEN + I32_LEN + 1;
        encoded[type_offset] = 9;
        assert!(matches!(
            LogEntryCodec::read_log_entry(&encoded),
            Err(DecodeError::UnknownDiscriminator {
                kind: "member type",
                value: 9
            })
        ));
    }
}
