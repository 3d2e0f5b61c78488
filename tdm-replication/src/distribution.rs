//! Partition distribution with priority-based primary election.
//!
//! Distribution is driven by a fixed mapping of partition to member
//! priorities. For every requested partition the distributor validates the
//! configured members against the cluster and the replication factor, and
//! derives the partition's primary: the single member holding the highest
//! priority. A tie at the highest priority leaves the partition without a
//! primary rather than picking one arbitrarily.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use tdm_core::{MemberId, PartitionId, Result, ValidationError};
use tracing::{debug, warn};

/// Fixed assignment of partitions to `{member: priority}` maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMapping {
    partitions: BTreeMap<PartitionId, BTreeMap<MemberId, i32>>,
}

impl PartitionMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of one partition's priorities.
    #[must_use]
    pub fn with_partition<M>(mut self, partition: PartitionId, priorities: M) -> Self
    where
        M: IntoIterator<Item = (MemberId, i32)>,
    {
        self.insert(partition, priorities.into_iter().collect());
        self
    }

    pub fn insert(&mut self, partition: PartitionId, priorities: BTreeMap<MemberId, i32>) {
        self.partitions.insert(partition, priorities);
    }

    #[must_use]
    pub fn priorities(&self, partition: PartitionId) -> Option<&BTreeMap<MemberId, i32>> {
        self.partitions.get(&partition)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PartitionId, BTreeMap<MemberId, i32>> {
        self.partitions.iter()
    }
}

impl FromIterator<(PartitionId, BTreeMap<MemberId, i32>)> for PartitionMapping {
    fn from_iter<T: IntoIterator<Item = (PartitionId, BTreeMap<MemberId, i32>)>>(iter: T) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}

/// Pick the highest priority and its holder from an id-ordered sequence.
///
/// Returns `None` for an empty sequence. The primary is `None` when more than
/// one member holds the highest priority.
pub fn select_primary<'a, I>(priorities: I) -> Option<(i32, Option<&'a MemberId>)>
where
    I: IntoIterator<Item = (&'a MemberId, i32)>,
{
    let mut best: Option<(i32, Option<&'a MemberId>)> = None;
    for (member, priority) in priorities {
        best = match best {
            None => Some((priority, Some(member))),
            Some((top, _)) if priority > top => Some((priority, Some(member))),
            Some((top, _)) if priority == top => Some((top, None)),
            keep => keep,
        };
    }
    best
}

/// Validated placement of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partition_id: PartitionId,
    pub members: BTreeSet<MemberId>,
    pub priorities: BTreeMap<MemberId, i32>,
    /// Highest configured priority (0 when there are no members).
    pub target_priority: i32,
    /// Set iff exactly one member holds `target_priority`.
    pub primary: Option<MemberId>,
}

impl PartitionMetadata {
    #[must_use]
    pub fn new(partition_id: PartitionId, priorities: BTreeMap<MemberId, i32>) -> Self {
        let (target_priority, primary) =
            match select_primary(priorities.iter().map(|(m, p)| (m, *p))) {
                Some((top, primary)) => (top, primary.cloned()),
                None => (0, None),
            };

        Self {
            partition_id,
            members: priorities.keys().cloned().collect(),
            priorities,
            target_priority,
            primary,
        }
    }

    #[must_use]
    pub fn priority_of(&self, member: &MemberId) -> Option<i32> {
        self.priorities.get(member).copied()
    }

    #[must_use]
    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }
}

/// Per-partition metadata keyed and iterated in ascending partition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    partitions: BTreeMap<PartitionId, PartitionMetadata>,
}

impl Distribution {
    #[must_use]
    pub fn get(&self, partition: PartitionId) -> Option<&PartitionMetadata> {
        self.partitions.get(&partition)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionMetadata> {
        self.partitions.values()
    }
}

impl FromIterator<PartitionMetadata> for Distribution {
    fn from_iter<T: IntoIterator<Item = PartitionMetadata>>(iter: T) -> Self {
        Self {
            partitions: iter.into_iter().map(|m| (m.partition_id, m)).collect(),
        }
    }
}

/// Computes partition placement for a set of cluster members.
pub trait PartitionDistributor {
    /// Distribute `partition_ids` over `cluster_members`.
    ///
    /// Fails with the first validation error found, in ascending partition
    /// order; no partial distribution is returned.
    fn distribute_partitions(
        &self,
        cluster_members: &BTreeSet<MemberId>,
        partition_ids: &[PartitionId],
        replication_factor: usize,
    ) -> Result<Distribution>;
}

/// Distributor backed by an immutable [`PartitionMapping`].
#[derive(Debug, Clone)]
pub struct FixedPartitionDistributor {
    mapping: PartitionMapping,
}

impl FixedPartitionDistributor {
    #[must_use]
    pub fn new(mapping: PartitionMapping) -> Self {
        Self { mapping }
    }

    #[must_use]
    pub fn mapping(&self) -> &PartitionMapping {
        &self.mapping
    }

    fn resolve(
        &self,
        partition: PartitionId,
        cluster_members: &BTreeSet<MemberId>,
        replication_factor: usize,
    ) -> std::result::Result<PartitionMetadata, ValidationError> {
        let priorities = self
            .mapping
            .priorities(partition)
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::NoMembersConfigured(partition))?;

        let unknown: Vec<MemberId> = priorities
            .keys()
            .filter(|m| !cluster_members.contains(*m))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ValidationError::UnknownMembers {
                partition,
                members: unknown,
            });
        }

        if priorities.len() != replication_factor {
            return Err(ValidationError::ReplicationFactorMismatch {
                partition,
                expected: replication_factor,
                actual: priorities.len(),
            });
        }

        Ok(PartitionMetadata::new(partition, priorities.clone()))
    }
}

impl PartitionDistributor for FixedPartitionDistributor {
    fn distribute_partitions(
        &self,
        cluster_members: &BTreeSet<MemberId>,
        partition_ids: &[PartitionId],
        replication_factor: usize,
    ) -> Result<Distribution> {
        let mut ordered = partition_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut distribution = BTreeMap::new();
        for partition in ordered {
            let metadata = self
                .resolve(partition, cluster_members, replication_factor)
                .inspect_err(|e| {
                    warn!(
                        target: "tandem::distribution",
                        partition = partition.get(),
                        error = %e,
                        "Rejected partition distribution"
                    );
                })?;

            debug!(
                target: "tandem::distribution",
                partition = partition.get(),
                members = metadata.members.len(),
                target_priority = metadata.target_priority,
                primary = metadata.primary.as_ref().map(MemberId::as_str),
                "Distributed partition"
            );
            distribution.insert(partition, metadata);
        }

        Ok(Distribution {
            partitions: distribution,
        })
    }
}
