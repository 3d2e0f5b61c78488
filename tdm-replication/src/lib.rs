#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod actor;
mod catchup;
mod codec;
mod config;
mod distribution;
mod executor;
mod log_reader;
mod reconfigure;

pub use actor::{CatchUpActor, CatchUpCall, CatchUpHandle, create_catch_up_channel};
pub use catchup::{
    CatchUpReply, CatchUpSession, CatchUpSummary, ENTRY_FRAME_HEADER_LEN, EntryFrame, EntryFrames,
    EntrySink, REQUEST_LEN, RESPONSE_HEADER_LEN, ReplicationRequest, ReplicationRequestHandler,
    ReplicationResponse, ReplicationSource, SeekMiss,
};
pub use codec::{
    ApplicationEntry, ConfigurationEntry, EntryKind, EntryPayload, LogEntryCodec, LogEntryRecord,
    RECORD_HEADER_LEN,
};
pub use config::{CatchUpSettings, PartitionSettings, ReplicationSettings};
pub use distribution::{
    Distribution, FixedPartitionDistributor, PartitionDistributor, PartitionMapping,
    PartitionMetadata, select_primary,
};
pub use executor::{
    ClusterConfigurationChangeExecutor, FailedOperation, InMemoryExecutor, MemberDirectory,
    PlanExecution, apply_plan, plan_from_directory,
};
pub use log_reader::{LogStreamReader, LoggedEntry, MemoryLog, MemoryLogReader};
pub use reconfigure::{ClusterConfiguration, ReconfigurationOperation, ReconfigurationPlanner};
