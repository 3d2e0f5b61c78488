//! Reconfiguration planning.
//!
//! Diffs the current cluster configuration against a target distribution
//! and produces the ordered list of membership changes that moves one to the
//! other. Per partition, new members always join before outgoing members
//! leave, so a partition never drops below its replication factor while the
//! plan is applied one operation at a time.
//!
//! ```text
//! new partition:      Bootstrap(primary) , Join(other)...
//! existing partition: Join(target - current)... , Leave(current - target)... ,
//!                     ReconfigurePriority(changed)...
//! ```

use crate::distribution::{Distribution, PartitionMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tdm_core::{MemberId, PartitionId, Result, TandemError, ValidationError};
use tracing::{debug, info};

/// A single membership change for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigurationOperation {
    /// Start a new partition's replication group on `member`.
    Bootstrap {
        member: MemberId,
        partition: PartitionId,
        priority: i32,
    },
    /// Add `member` to an existing replication group.
    Join {
        member: MemberId,
        partition: PartitionId,
        priority: i32,
    },
    /// Remove `member` from a replication group.
    Leave {
        member: MemberId,
        partition: PartitionId,
    },
    /// Change `member`'s priority within a replication group.
    ReconfigurePriority {
        member: MemberId,
        partition: PartitionId,
        priority: i32,
    },
}

impl ReconfigurationOperation {
    #[must_use]
    pub fn member(&self) -> &MemberId {
        match self {
            Self::Bootstrap { member, .. }
            | Self::Join { member, .. }
            | Self::Leave { member, .. }
            | Self::ReconfigurePriority { member, .. } => member,
        }
    }

    #[must_use]
    pub fn partition(&self) -> PartitionId {
        match self {
            Self::Bootstrap { partition, .. }
            | Self::Join { partition, .. }
            | Self::Leave { partition, .. }
            | Self::ReconfigurePriority { partition, .. } => *partition,
        }
    }
}

impl fmt::Display for ReconfigurationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap {
                member,
                partition,
                priority,
            } => write!(f, "BOOTSTRAP({member}, {partition}, priority={priority})"),
            Self::Join {
                member,
                partition,
                priority,
            } => write!(f, "JOIN({member}, {partition}, priority={priority})"),
            Self::Leave { member, partition } => write!(f, "LEAVE({member}, {partition})"),
            Self::ReconfigurePriority {
                member,
                partition,
                priority,
            } => write!(f, "REPRIORITIZE({member}, {partition}, priority={priority})"),
        }
    }
}

/// Membership and priorities currently in effect, per partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfiguration {
    partitions: BTreeMap<PartitionId, BTreeMap<MemberId, i32>>,
}

impl ClusterConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The configuration reached once a distribution is fully applied.
    #[must_use]
    pub fn from_distribution(distribution: &Distribution) -> Self {
        Self {
            partitions: distribution
                .iter()
                .map(|m| (m.partition_id, m.priorities.clone()))
                .collect(),
        }
    }

    #[must_use]
    pub fn with_partition<M>(mut self, partition: PartitionId, priorities: M) -> Self
    where
        M: IntoIterator<Item = (MemberId, i32)>,
    {
        self.partitions
            .insert(partition, priorities.into_iter().collect());
        self
    }

    #[must_use]
    pub fn partition(&self, partition: PartitionId) -> Option<&BTreeMap<MemberId, i32>> {
        self.partitions.get(&partition)
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    #[must_use]
    pub fn replica_count(&self, partition: PartitionId) -> usize {
        self.partitions.get(&partition).map_or(0, BTreeMap::len)
    }

    /// Every member hosting at least one partition.
    #[must_use]
    pub fn members(&self) -> BTreeSet<MemberId> {
        self.partitions
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect()
    }

    /// Apply one operation, rejecting operations that do not fit the
    /// current state.
    pub fn apply(&mut self, operation: &ReconfigurationOperation) -> Result<()> {
        match operation {
            ReconfigurationOperation::Bootstrap {
                member,
                partition,
                priority,
            } => {
                if self.partitions.contains_key(partition) {
                    return Err(TandemError::InvalidData(format!(
                        "cannot bootstrap partition {partition}: already exists"
                    )));
                }
                self.partitions
                    .insert(*partition, BTreeMap::from([(member.clone(), *priority)]));
            },
            ReconfigurationOperation::Join {
                member,
                partition,
                priority,
            } => {
                let members = self.existing_mut(*partition)?;
                if members.contains_key(member) {
                    return Err(TandemError::InvalidData(format!(
                        "member {member} already hosts partition {partition}"
                    )));
                }
                members.insert(member.clone(), *priority);
            },
            ReconfigurationOperation::Leave { member, partition } => {
                let members = self.existing_mut(*partition)?;
                if members.remove(member).is_none() {
                    return Err(TandemError::InvalidData(format!(
                        "member {member} does not host partition {partition}"
                    )));
                }
            },
            ReconfigurationOperation::ReconfigurePriority {
                member,
                partition,
                priority,
            } => {
                let members = self.existing_mut(*partition)?;
                let slot = members.get_mut(member).ok_or_else(|| {
                    TandemError::InvalidData(format!(
                        "member {member} does not host partition {partition}"
                    ))
                })?;
                *slot = *priority;
            },
        }
        Ok(())
    }

    fn existing_mut(&mut self, partition: PartitionId) -> Result<&mut BTreeMap<MemberId, i32>> {
        self.partitions
            .get_mut(&partition)
            .ok_or_else(|| TandemError::InvalidData(format!("unknown partition {partition}")))
    }
}

/// Computes the operations that move a cluster to a target distribution.
#[derive(Debug, Clone, Copy)]
pub struct ReconfigurationPlanner {
    replication_factor: usize,
}

impl ReconfigurationPlanner {
    #[must_use]
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }

    #[must_use]
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Plan the reconfiguration. Either every precondition holds and the
    /// complete plan is returned, or a single validation error is.
    pub fn plan(
        &self,
        current: &ClusterConfiguration,
        target_members: &BTreeSet<MemberId>,
        target: &Distribution,
    ) -> Result<Vec<ReconfigurationOperation>> {
        self.check_preconditions(current, target_members, target)?;

        let mut operations = Vec::new();
        for metadata in target.iter() {
            let before = operations.len();
            match current.partition(metadata.partition_id) {
                None => bootstrap_partition(metadata, &mut operations),
                Some(existing) => reconfigure_partition(existing, metadata, &mut operations),
            }
            debug!(
                target: "tandem::reconfigure",
                partition = metadata.partition_id.get(),
                new = current.partition(metadata.partition_id).is_none(),
                operations = operations.len() - before,
                "Planned partition"
            );
        }

        info!(
            target: "tandem::reconfigure",
            current_partitions = current.partition_count(),
            target_partitions = target.len(),
            target_members = target_members.len(),
            operations = operations.len(),
            "Computed reconfiguration plan"
        );

        Ok(operations)
    }

    fn check_preconditions(
        &self,
        current: &ClusterConfiguration,
        target_members: &BTreeSet<MemberId>,
        target: &Distribution,
    ) -> std::result::Result<(), ValidationError> {
        if self.replication_factor == 0 {
            return Err(ValidationError::ZeroReplicationFactor);
        }
        if target.len() < current.partition_count() {
            return Err(ValidationError::PartitionCountDecreased {
                current: current.partition_count(),
                target: target.len(),
            });
        }
        if target_members.len() < self.replication_factor {
            return Err(ValidationError::InsufficientMembers {
                required: self.replication_factor,
                available: target_members.len(),
            });
        }
        if let Some(removed) = current.partition_ids().find(|p| target.get(*p).is_none()) {
            return Err(ValidationError::PartitionRemoved(removed));
        }
        Ok(())
    }
}

fn bootstrap_partition(metadata: &PartitionMetadata, operations: &mut Vec<ReconfigurationOperation>) {
    // Without a unique primary the lowest member id bootstraps.
    let Some(first) = metadata
        .primary
        .as_ref()
        .or_else(|| metadata.members.first())
    else {
        return;
    };

    operations.push(ReconfigurationOperation::Bootstrap {
        member: first.clone(),
        partition: metadata.partition_id,
        priority: metadata.priority_of(first).unwrap_or_default(),
    });

    for (member, priority) in &metadata.priorities {
        if member != first {
            operations.push(ReconfigurationOperation::Join {
                member: member.clone(),
                partition: metadata.partition_id,
                priority: *priority,
            });
        }
    }
}

fn reconfigure_partition(
    existing: &BTreeMap<MemberId, i32>,
    metadata: &PartitionMetadata,
    operations: &mut Vec<ReconfigurationOperation>,
) {
    let partition = metadata.partition_id;

    for (member, priority) in &metadata.priorities {
        if !existing.contains_key(member) {
            operations.push(ReconfigurationOperation::Join {
                member: member.clone(),
                partition,
                priority: *priority,
            });
        }
    }

    for member in existing.keys() {
        if !metadata.contains(member) {
            operations.push(ReconfigurationOperation::Leave {
                member: member.clone(),
                partition,
            });
        }
    }

    for (member, priority) in &metadata.priorities {
        if let Some(old) = existing.get(member) {
            if old != priority {
                operations.push(ReconfigurationOperation::ReconfigurePriority {
                    member: member.clone(),
                    partition,
                    priority: *priority,
                });
            }
        }
    }
}
