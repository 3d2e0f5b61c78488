//! Catch-up replication protocol.
//!
//! A replica that is missing log entries asks a source replica for the range
//! `(from_position, to_position]` (or `[from_position, to_position]` when
//! `include_from_position` is set). The source answers with as many
//! consecutive entries as fit into a bounded buffer and says whether more are
//! waiting. The replica keeps asking from the returned `to_position` until
//! `more_available` is false.
//!
//! # Protocol Flow
//!
//! ```text
//! Seek ──► miss ───────────────────────────────► empty response, more=false
//!   │
//!   └───► Drain ──► buffer full ────────────────► more=true
//!                ├─► next position > to_position ► more=false
//!                └─► end of log ────────────────► more=false
//! ```
//!
//! # Wire Format
//!
//! ```text
//! Request:  [from_position: i64][to_position: i64][include_from_position: u8]
//! Response: [to_position: i64][more_available: u8][entries_len: i32][entries]
//! Entry:    [data_len: i32][crc32: u32][position: i64][data]
//! ```
//!
//! The entries carried in a response are application-level frames, not
//! consensus log records; the consensus layer stores them wrapped in
//! application records of its own.

use crate::log_reader::{LogStreamReader, LoggedEntry, MemoryLog};
use bytes::{BufMut, Bytes, BytesMut};
use tdm_core::{
    BOOL_LEN, BufferReader, DecodeError, FIRST_POSITION_SENTINEL, I32_LEN, I64_LEN, Result,
    TandemError, length_prefix,
};
use tracing::{debug, warn};

/// Encoded size of a request.
pub const REQUEST_LEN: usize = I64_LEN + I64_LEN + BOOL_LEN;
/// Encoded size of a response without its entries.
pub const RESPONSE_HEADER_LEN: usize = I64_LEN + BOOL_LEN + I32_LEN;
/// Encoded size of an entry frame without its data.
pub const ENTRY_FRAME_HEADER_LEN: usize = I32_LEN + I32_LEN + I64_LEN;

// ---------------------------------------------------------------------------
// Protocol Messages
// ---------------------------------------------------------------------------

/// Ask a source replica for a range of log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Start of the range; `-1` means the first entry in the log.
    pub from_position: i64,
    /// Last position the caller wants (inclusive).
    pub to_position: i64,
    pub include_from_position: bool,
}

impl ReplicationRequest {
    /// Request everything after `from_position`, up to `to_position`.
    #[must_use]
    pub fn after(from_position: i64, to_position: i64) -> Self {
        Self {
            from_position,
            to_position,
            include_from_position: false,
        }
    }

    /// Request everything from the first entry up to `to_position`.
    #[must_use]
    pub fn from_start(to_position: i64) -> Self {
        Self {
            from_position: FIRST_POSITION_SENTINEL,
            to_position,
            include_from_position: false,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_LEN);
        buf.put_i64_le(self.from_position);
        buf.put_i64_le(self.to_position);
        buf.put_u8(u8::from(self.include_from_position));
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = BufferReader::new(data);
        Ok(Self {
            from_position: reader.read_i64("from position")?,
            to_position: reader.read_i64("to position")?,
            include_from_position: reader.read_bool("include from position")?,
        })
    }
}

/// Batch of entries answering a [`ReplicationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationResponse {
    /// Position of the last entry included, or the request's start position
    /// when nothing was included.
    pub to_position: i64,
    pub more_available: bool,
    /// Concatenated entry frames.
    pub serialized_entries: Bytes,
}

impl ReplicationResponse {
    #[must_use]
    pub fn empty(to_position: i64) -> Self {
        Self {
            to_position,
            more_available: false,
            serialized_entries: Bytes::new(),
        }
    }

    /// Iterate over the entries carried by this response.
    #[must_use]
    pub fn entries(&self) -> EntryFrames<'_> {
        EntryFrames::new(&self.serialized_entries)
    }

    pub fn encode(&self) -> Result<Bytes> {
        let entries_len = length_prefix("serialized entries", self.serialized_entries.len())?;
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + self.serialized_entries.len());
        buf.put_i64_le(self.to_position);
        buf.put_u8(u8::from(self.more_available));
        buf.put_i32_le(entries_len);
        buf.extend_from_slice(&self.serialized_entries);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = BufferReader::new(data);
        let to_position = reader.read_i64("to position")?;
        let more_available = reader.read_bool("more available")?;
        let entries = reader.read_length_prefixed("serialized entries")?;
        Ok(Self {
            to_position,
            more_available,
            serialized_entries: Bytes::copy_from_slice(entries),
        })
    }
}

// ---------------------------------------------------------------------------
// Entry Frames
// ---------------------------------------------------------------------------

/// Application-level entry framing used inside responses.
pub struct EntryFrame;

impl EntryFrame {
    /// Bytes a frame for `entry` occupies.
    pub fn encoded_len(entry: &LoggedEntry) -> Result<usize> {
        length_prefix("entry data", entry.data.len())?;
        Ok(ENTRY_FRAME_HEADER_LEN + entry.data.len())
    }

    /// Append a frame for `entry` to `buf`.
    pub fn write(entry: &LoggedEntry, buf: &mut BytesMut) -> Result<()> {
        let data_len = length_prefix("entry data", entry.data.len())?;
        buf.reserve(ENTRY_FRAME_HEADER_LEN + entry.data.len());
        buf.put_i32_le(data_len);
        buf.put_u32_le(frame_checksum(entry.position, &entry.data));
        buf.put_i64_le(entry.position);
        buf.extend_from_slice(&entry.data);
        Ok(())
    }
}

fn frame_checksum(position: i64, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&position.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

/// Iterator over the frames in a serialized entry buffer.
///
/// Yields a decode error for a truncated or corrupt frame and stops there.
#[derive(Debug)]
pub struct EntryFrames<'a> {
    reader: BufferReader<'a>,
    failed: bool,
}

impl<'a> EntryFrames<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BufferReader::new(data),
            failed: false,
        }
    }

    fn read_frame(&mut self) -> std::result::Result<LoggedEntry, DecodeError> {
        let data_len = self.reader.read_length("entry data")?;
        let checksum = self.reader.read_u32("entry checksum")?;
        let position = self.reader.read_i64("entry position")?;
        let data = self.reader.read_bytes("entry data", data_len)?;

        let actual = frame_checksum(position, data);
        if actual != checksum {
            return Err(DecodeError::ChecksumMismatch {
                position,
                expected: checksum,
                actual,
            });
        }
        Ok(LoggedEntry::new(position, Bytes::copy_from_slice(data)))
    }
}

impl Iterator for EntryFrames<'_> {
    type Item = std::result::Result<LoggedEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }
        let frame = self.read_frame();
        self.failed = frame.is_err();
        Some(frame)
    }
}

// ---------------------------------------------------------------------------
// Source Side
// ---------------------------------------------------------------------------

/// Why a seek found nothing to send.
///
/// Both cases produce the same wire response; the distinction is for the
/// embedder, since only the second can mean the replica needs a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMiss {
    /// The requested position is past the last entry, or the log is empty.
    AheadOfLog,
    /// The requested position precedes the first retained entry.
    BehindRetainedLog { first_retained: i64 },
    /// The requested position falls between two retained entries.
    InGap { next_retained: i64 },
}

impl SeekMiss {
    /// True when the source can no longer serve the replica from its log.
    #[must_use]
    pub fn requires_snapshot(&self) -> bool {
        matches!(self, Self::BehindRetainedLog { .. })
    }
}

/// Outcome of handling one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpReply {
    pub response: ReplicationResponse,
    pub seek_miss: Option<SeekMiss>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainStop {
    BufferFull,
    ReachedTarget,
    EndOfLog,
}

/// Serves catch-up requests from a single log reader.
///
/// The handler owns its reader, and `handle` takes `&mut self`, so one
/// handler processes at most one request at a time.
#[derive(Debug)]
pub struct ReplicationRequestHandler<R> {
    reader: R,
    buffer_capacity: usize,
}

impl<R: LogStreamReader> ReplicationRequestHandler<R> {
    #[must_use]
    pub fn new(reader: R, buffer_capacity: usize) -> Self {
        Self {
            reader,
            buffer_capacity,
        }
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Handle one request.
    ///
    /// A seek miss is not an error. The only failures are an entry that
    /// cannot fit into an empty buffer and an entry too large to frame.
    pub fn handle(&mut self, request: &ReplicationRequest) -> Result<CatchUpReply> {
        if request.from_position == FIRST_POSITION_SENTINEL {
            self.reader.seek_to_first();
        } else if self.reader.seek(request.from_position) {
            if !request.include_from_position {
                self.reader.next_entry();
            }
        } else {
            let miss = self.classify_miss(request.from_position);
            return Ok(CatchUpReply {
                response: ReplicationResponse::empty(request.from_position),
                seek_miss: Some(miss),
            });
        }

        let mut entries = BytesMut::new();
        let mut last_position = request.from_position;
        let mut count = 0usize;

        let stop = loop {
            let Some(entry) = self.reader.next_entry() else {
                break DrainStop::EndOfLog;
            };
            if entry.position > request.to_position {
                break DrainStop::ReachedTarget;
            }

            let frame_len = EntryFrame::encoded_len(&entry)?;
            if entries.len() + frame_len > self.buffer_capacity {
                if entries.is_empty() {
                    return Err(TandemError::EntryTooLarge {
                        position: entry.position,
                        size: frame_len,
                        capacity: self.buffer_capacity,
                    });
                }
                break DrainStop::BufferFull;
            }

            EntryFrame::write(&entry, &mut entries)?;
            last_position = entry.position;
            count += 1;
        };

        let more_available = stop == DrainStop::BufferFull;

        debug!(
            target: "tandem::catchup",
            from_position = request.from_position,
            to_position = request.to_position,
            last_position,
            entries = count,
            bytes = entries.len(),
            more_available,
            stop = ?stop,
            "Served catch-up request"
        );

        Ok(CatchUpReply {
            response: ReplicationResponse {
                to_position: last_position,
                more_available,
                serialized_entries: entries.freeze(),
            },
            seek_miss: None,
        })
    }

    fn classify_miss(&mut self, position: i64) -> SeekMiss {
        self.reader.seek_to_first();
        let mut next = self.reader.next_entry();

        if let Some(first) = &next {
            if position < first.position {
                warn!(
                    target: "tandem::catchup",
                    requested = position,
                    first_retained = first.position,
                    "Requested position precedes the retained log"
                );
                return SeekMiss::BehindRetainedLog {
                    first_retained: first.position,
                };
            }
        }

        while let Some(entry) = next {
            if entry.position > position {
                warn!(
                    target: "tandem::catchup",
                    requested = position,
                    next_retained = entry.position,
                    "Requested position falls in a gap of the log"
                );
                return SeekMiss::InGap {
                    next_retained: entry.position,
                };
            }
            next = self.reader.next_entry();
        }

        debug!(
            target: "tandem::catchup",
            requested = position,
            "Requested position not in log yet"
        );
        SeekMiss::AheadOfLog
    }
}

// ---------------------------------------------------------------------------
// Replica Side
// ---------------------------------------------------------------------------

/// Anything that answers catch-up requests synchronously.
pub trait ReplicationSource {
    fn request(&mut self, request: &ReplicationRequest) -> Result<CatchUpReply>;
}

impl<R: LogStreamReader> ReplicationSource for ReplicationRequestHandler<R> {
    fn request(&mut self, request: &ReplicationRequest) -> Result<CatchUpReply> {
        self.handle(request)
    }
}

/// Destination for entries received during catch-up.
pub trait EntrySink {
    fn append(&mut self, entry: LoggedEntry) -> Result<()>;
}

impl EntrySink for Vec<LoggedEntry> {
    fn append(&mut self, entry: LoggedEntry) -> Result<()> {
        self.push(entry);
        Ok(())
    }
}

impl EntrySink for MemoryLog {
    fn append(&mut self, entry: LoggedEntry) -> Result<()> {
        MemoryLog::append(self, entry.position, entry.data)
    }
}

/// Totals of a finished catch-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpSummary {
    pub rounds: usize,
    pub entries: usize,
    pub last_position: i64,
    /// Set when the source could not seek to the requested position.
    pub seek_miss: Option<SeekMiss>,
}

impl CatchUpSummary {
    /// The replica is not caught up and must be restored from a snapshot.
    #[must_use]
    pub fn requires_snapshot(&self) -> bool {
        self.seek_miss.is_some_and(|miss| miss.requires_snapshot())
    }
}

/// Replica-side driver of the request/response loop.
///
/// Each response must continue exactly where the previous one ended:
/// strictly ascending positions, all within the requested range, and a
/// `to_position` matching the last entry carried.
#[derive(Debug, Clone)]
pub struct CatchUpSession {
    next_from: i64,
    to_position: i64,
    rounds: usize,
    entries: usize,
    seek_miss: Option<SeekMiss>,
    done: bool,
}

impl CatchUpSession {
    /// Catch up on everything after `last_position` up to `to_position`.
    #[must_use]
    pub fn new(last_position: i64, to_position: i64) -> Self {
        Self {
            next_from: last_position,
            to_position,
            rounds: 0,
            entries: 0,
            seek_miss: None,
            done: false,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn next_request(&self) -> ReplicationRequest {
        ReplicationRequest {
            from_position: self.next_from,
            to_position: self.to_position,
            include_from_position: false,
        }
    }

    #[must_use]
    pub fn summary(&self) -> CatchUpSummary {
        CatchUpSummary {
            rounds: self.rounds,
            entries: self.entries,
            last_position: self.next_from,
            seek_miss: self.seek_miss,
        }
    }

    /// Validate a response, append its entries to `sink` and advance.
    ///
    /// The whole response is checked before anything reaches `sink`, so a
    /// rejected response leaves both the sink and the next request as they
    /// were. Returns true once the source reports nothing more is available.
    pub fn accept<S>(&mut self, response: &ReplicationResponse, sink: &mut S) -> Result<bool>
    where
        S: EntrySink + ?Sized,
    {
        self.rounds += 1;

        let mut batch = Vec::new();
        let mut floor = self.next_from;
        for frame in response.entries() {
            let entry = frame?;
            if entry.position <= floor {
                return Err(TandemError::InvalidData(format!(
                    "entry position {} does not follow {floor}",
                    entry.position
                )));
            }
            if entry.position > self.to_position {
                return Err(TandemError::InvalidData(format!(
                    "entry position {} beyond requested {}",
                    entry.position, self.to_position
                )));
            }
            floor = entry.position;
            batch.push(entry);
        }

        match batch.last() {
            Some(last) if last.position != response.to_position => {
                return Err(TandemError::InvalidData(format!(
                    "response ends at {} but reports {}",
                    last.position, response.to_position
                )));
            },
            None if response.more_available => {
                return Err(TandemError::InvalidData(
                    "source reported more entries but sent none".into(),
                ));
            },
            _ => {},
        }

        for entry in batch {
            let position = entry.position;
            sink.append(entry)?;
            self.next_from = position;
            self.entries += 1;
        }

        self.done = !response.more_available;
        Ok(self.done)
    }

    /// Like [`accept`](Self::accept), also recording a seek miss reported by
    /// the source.
    pub fn accept_reply<S>(&mut self, reply: &CatchUpReply, sink: &mut S) -> Result<bool>
    where
        S: EntrySink + ?Sized,
    {
        let done = self.accept(&reply.response, sink)?;
        if let Some(miss) = reply.seek_miss {
            if miss.requires_snapshot() {
                warn!(
                    target: "tandem::catchup",
                    from_position = self.next_from,
                    to_position = self.to_position,
                    seek_miss = ?miss,
                    "Catch-up source no longer retains the requested position"
                );
            }
            self.seek_miss = Some(miss);
        }
        Ok(done)
    }

    /// Drive the session against `source` until it is done.
    pub fn run<Src, S>(&mut self, source: &mut Src, sink: &mut S) -> Result<CatchUpSummary>
    where
        Src: ReplicationSource + ?Sized,
        S: EntrySink + ?Sized,
    {
        while !self.done {
            let reply = source.request(&self.next_request())?;
            self.accept_reply(&reply, sink)?;
        }

        debug!(
            target: "tandem::catchup",
            rounds = self.rounds,
            entries = self.entries,
            last_position = self.next_from,
            seek_miss = ?self.seek_miss,
            "Catch-up complete"
        );
        Ok(self.summary())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn log_with(positions: std::ops::RangeInclusive<i64>) -> MemoryLog {
        let log = MemoryLog::new();
        for p in positions {
            log.append(p, format!("event-{p:04}")).unwrap();
        }
        log
    }

    fn frame_len(position: i64) -> usize {
        ENTRY_FRAME_HEADER_LEN + format!("event-{position:04}").len()
    }

    fn positions(response: &ReplicationResponse) -> Vec<i64> {
        response
            .entries()
            .map(|e| e.unwrap().position)
            .collect()
    }

    #[test]
    fn test_happy_path_exclusive_range() {
        let log = log_with(1..=10);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::after(3, 7)).unwrap();
        assert_eq!(reply.seek_miss, None);
        assert_eq!(positions(&reply.response), vec![4, 5, 6, 7]);
        assert_eq!(reply.response.to_position, 7);
        assert!(!reply.response.more_available);
    }

    #[test]
    fn test_inclusive_range() {
        let log = log_with(1..=10);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler
            .handle(&ReplicationRequest {
                from_position: 3,
                to_position: 5,
                include_from_position: true,
            })
            .unwrap();
        assert_eq!(positions(&reply.response), vec![3, 4, 5]);
    }

    #[test]
    fn test_buffer_bounded_then_follow_up() {
        let log = log_with(1..=10);
        let capacity = frame_len(4) + frame_len(5);
        let mut handler = ReplicationRequestHandler::new(log.reader(), capacity);

        let first = handler.handle(&ReplicationRequest::after(3, 7)).unwrap();
        assert_eq!(positions(&first.response), vec![4, 5]);
        assert_eq!(first.response.to_position, 5);
        assert!(first.response.more_available);

        let second = handler.handle(&ReplicationRequest::after(5, 7)).unwrap();
        assert_eq!(positions(&second.response), vec![6, 7]);
        assert_eq!(second.response.to_position, 7);
        assert!(!second.response.more_available);
    }

    #[test]
    fn test_seek_miss_ahead_of_log() {
        let log = log_with(1..=10);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::after(999, 1_200)).unwrap();
        assert!(reply.response.serialized_entries.is_empty());
        assert!(!reply.response.more_available);
        assert_eq!(reply.response.to_position, 999);
        assert_eq!(reply.seek_miss, Some(SeekMiss::AheadOfLog));
    }

    #[test]
    fn test_seek_miss_behind_compacted_log() {
        let log = log_with(1..=10);
        log.compact_to(4);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::after(2, 10)).unwrap();
        assert!(reply.response.serialized_entries.is_empty());
        assert!(!reply.response.more_available);
        assert_eq!(
            reply.seek_miss,
            Some(SeekMiss::BehindRetainedLog { first_retained: 5 })
        );
    }

    #[test]
    fn test_seek_miss_inside_gap() {
        let log = MemoryLog::new();
        for p in [1, 2, 3, 7, 8] {
            log.append(p, format!("event-{p:04}")).unwrap();
        }
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::after(5, 8)).unwrap();
        assert!(reply.response.serialized_entries.is_empty());
        assert_eq!(reply.response.to_position, 5);
        assert_eq!(reply.seek_miss, Some(SeekMiss::InGap { next_retained: 7 }));
        assert!(!SeekMiss::InGap { next_retained: 7 }.requires_snapshot());
    }

    #[test]
    fn test_seek_miss_on_empty_log_is_ahead() {
        let mut handler = ReplicationRequestHandler::new(MemoryLog::new().reader(), 1024);
        let reply = handler.handle(&ReplicationRequest::after(3, 8)).unwrap();
        assert_eq!(reply.seek_miss, Some(SeekMiss::AheadOfLog));
    }

    #[test]
    fn test_from_start_reads_first_entries() {
        let log = log_with(1..=3);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::from_start(2)).unwrap();
        assert_eq!(positions(&reply.response), vec![1, 2]);
        assert!(!reply.response.more_available);
    }

    #[test]
    fn test_from_start_on_empty_log() {
        let mut handler = ReplicationRequestHandler::new(MemoryLog::new().reader(), 1024);
        let reply = handler.handle(&ReplicationRequest::from_start(100)).unwrap();
        assert_eq!(reply.response, ReplicationResponse::empty(-1));
        assert_eq!(reply.seek_miss, None);
    }

    #[test]
    fn test_end_of_log_is_not_more_available() {
        let log = log_with(1..=5);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);

        let reply = handler.handle(&ReplicationRequest::after(2, 100)).unwrap();
        assert_eq!(positions(&reply.response), vec![3, 4, 5]);
        assert!(!reply.response.more_available);
    }

    #[test]
    fn test_buffer_full_exactly_at_target_is_not_more_available() {
        let log = log_with(1..=10);
        // Room for 4 and 5; entry 6 is past the requested end.
        let capacity = frame_len(4) + frame_len(5);
        let mut handler = ReplicationRequestHandler::new(log.reader(), capacity);

        let reply = handler.handle(&ReplicationRequest::after(3, 5)).unwrap();
        assert_eq!(positions(&reply.response), vec![4, 5]);
        assert!(!reply.response.more_available);
    }

    #[test]
    fn test_oversized_entry_fails() {
        let log = MemoryLog::new();
        log.append(1, vec![0u8; 256]).unwrap();
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64);

        let err = handler.handle(&ReplicationRequest::from_start(1)).unwrap_err();
        assert!(matches!(
            err,
            TandemError::EntryTooLarge {
                position: 1,
                capacity: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_request_and_response_wire_roundtrip() {
        let request = ReplicationRequest::after(41, 99);
        let encoded = request.encode();
        assert_eq!(encoded.len(), REQUEST_LEN);
        assert_eq!(ReplicationRequest::decode(&encoded).unwrap(), request);

        let log = log_with(1..=3);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 64 * 1024);
        let response = handler
            .handle(&ReplicationRequest::from_start(3))
            .unwrap()
            .response;

        let encoded = response.encode().unwrap();
        assert_eq!(
            encoded.len(),
            RESPONSE_HEADER_LEN + response.serialized_entries.len()
        );
        assert_eq!(ReplicationResponse::decode(&encoded).unwrap(), response);
    }

    #[test]
    fn test_truncated_response_fails() {
        let response = ReplicationResponse {
            to_position: 3,
            more_available: true,
            serialized_entries: Bytes::from_static(b"abcdef"),
        };
        let encoded = response.encode().unwrap();
        assert!(matches!(
            ReplicationResponse::decode(&encoded[..encoded.len() - 1]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_corrupt_frame_detected() {
        let mut buf = BytesMut::new();
        EntryFrame::write(&LoggedEntry::new(7, "payload"), &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let frames: Vec<_> = EntryFrames::new(&buf).collect();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0],
            Err(DecodeError::ChecksumMismatch { position: 7, .. })
        ));
    }

    #[test]
    fn test_session_catches_up_in_rounds() {
        let source_log = log_with(1..=10);
        let capacity = frame_len(1) * 3;
        let mut handler = ReplicationRequestHandler::new(source_log.reader(), capacity);

        let replica = log_with(1..=2);
        let mut sink = replica.clone();
        let summary = CatchUpSession::new(2, 10)
            .run(&mut handler, &mut sink)
            .unwrap();

        assert_eq!(summary.entries, 8);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.last_position, 10);
        assert_eq!(replica.last_position(), Some(10));
        assert_eq!(replica.len(), 10);
    }

    #[test]
    fn test_session_rejects_out_of_order_response() {
        let mut entries = BytesMut::new();
        EntryFrame::write(&LoggedEntry::new(6, "b"), &mut entries).unwrap();
        EntryFrame::write(&LoggedEntry::new(5, "a"), &mut entries).unwrap();
        let response = ReplicationResponse {
            to_position: 5,
            more_available: false,
            serialized_entries: entries.freeze(),
        };

        let mut sink = Vec::new();
        let err = CatchUpSession::new(4, 10)
            .accept(&response, &mut sink)
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidData(_)));
    }

    #[test]
    fn test_session_rejects_stalled_source() {
        let response = ReplicationResponse {
            to_position: 4,
            more_available: true,
            serialized_entries: Bytes::new(),
        };
        let mut sink = Vec::new();
        assert!(CatchUpSession::new(4, 10).accept(&response, &mut sink).is_err());
    }

    #[test]
    fn test_session_done_on_seek_miss() {
        let log = log_with(1..=10);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 1024);
        let mut sink = Vec::new();

        let summary = CatchUpSession::new(999, 2_000)
            .run(&mut handler, &mut sink)
            .unwrap();
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.seek_miss, Some(SeekMiss::AheadOfLog));
        assert!(!summary.requires_snapshot());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_session_reports_compacted_source() {
        let log = log_with(1..=10);
        log.compact_to(6);
        let mut handler = ReplicationRequestHandler::new(log.reader(), 1024);
        let mut sink = Vec::new();

        let summary = CatchUpSession::new(2, 10)
            .run(&mut handler, &mut sink)
            .unwrap();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.last_position, 2);
        assert_eq!(
            summary.seek_miss,
            Some(SeekMiss::BehindRetainedLog { first_retained: 7 })
        );
        assert!(summary.requires_snapshot());
    }

    #[test]
    fn test_session_rejected_response_then_retry() {
        let replica = log_with(1..=4);
        let mut sink = replica.clone();
        let mut session = CatchUpSession::new(4, 7);

        // Entries 5 and 6, but the response claims to end at 7.
        let mut entries = BytesMut::new();
        for p in 5..=6 {
            EntryFrame::write(&LoggedEntry::new(p, format!("event-{p:04}")), &mut entries)
                .unwrap();
        }
        let bad = ReplicationResponse {
            to_position: 7,
            more_available: false,
            serialized_entries: entries.freeze(),
        };
        assert!(session.accept(&bad, &mut sink).is_err());
        assert_eq!(replica.len(), 4);
        assert_eq!(session.next_request().from_position, 4);
        assert!(!session.is_done());

        let source = log_with(1..=7);
        let mut handler = ReplicationRequestHandler::new(source.reader(), 64 * 1024);
        let summary = session.run(&mut handler, &mut sink).unwrap();

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.last_position, 7);
        assert_eq!(replica.len(), 7);
    }

    #[test]
    fn test_session_rejects_entry_beyond_target_without_appending() {
        let mut entries = BytesMut::new();
        EntryFrame::write(&LoggedEntry::new(5, "a"), &mut entries).unwrap();
        EntryFrame::write(&LoggedEntry::new(9, "b"), &mut entries).unwrap();
        let response = ReplicationResponse {
            to_position: 9,
            more_available: false,
            serialized_entries: entries.freeze(),
        };

        let mut sink = Vec::new();
        let mut session = CatchUpSession::new(4, 6);
        assert!(session.accept(&response, &mut sink).is_err());
        assert!(sink.is_empty());
        assert_eq!(session.summary().entries, 0);
    }
}
