//! Collaborators around the planner: the member directory that feeds it and
//! the executor that applies its output.

use crate::distribution::PartitionDistributor;
use crate::reconfigure::{ClusterConfiguration, ReconfigurationOperation, ReconfigurationPlanner};
use std::collections::{BTreeMap, BTreeSet};
use tdm_core::{MemberId, PartitionId, Result, TandemError};
use tracing::{info, warn};

/// Source of the members currently known to the cluster.
pub trait MemberDirectory {
    fn known_members(&self) -> BTreeSet<MemberId>;
}

impl MemberDirectory for BTreeSet<MemberId> {
    fn known_members(&self) -> BTreeSet<MemberId> {
        self.clone()
    }
}

/// Applies a single membership change to the cluster.
pub trait ClusterConfigurationChangeExecutor {
    fn apply(&mut self, operation: &ReconfigurationOperation) -> Result<()>;
}

/// An operation the executor refused, with its error.
#[derive(Debug)]
pub struct FailedOperation {
    pub operation: ReconfigurationOperation,
    pub error: TandemError,
}

/// Result of driving a plan through an executor.
#[derive(Debug)]
pub struct PlanExecution {
    pub applied: usize,
    pub total: usize,
    pub failed: Option<FailedOperation>,
}

impl PlanExecution {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_none() && self.applied == self.total
    }
}

/// Apply `operations` in order, one at a time, stopping at the first failure.
///
/// Nothing is retried here; the caller decides whether to re-plan or resume
/// from `applied`.
pub fn apply_plan<E>(operations: &[ReconfigurationOperation], executor: &mut E) -> PlanExecution
where
    E: ClusterConfigurationChangeExecutor + ?Sized,
{
    let total = operations.len();
    for (applied, operation) in operations.iter().enumerate() {
        if let Err(error) = executor.apply(operation) {
            warn!(
                target: "tandem::executor",
                operation = %operation,
                applied,
                total,
                error = %error,
                "Reconfiguration operation failed"
            );
            return PlanExecution {
                applied,
                total,
                failed: Some(FailedOperation {
                    operation: operation.clone(),
                    error,
                }),
            };
        }
    }

    info!(
        target: "tandem::executor",
        applied = total,
        "Reconfiguration plan applied"
    );
    PlanExecution {
        applied: total,
        total,
        failed: None,
    }
}

/// One planning cycle: read members, distribute, diff against `current`.
pub fn plan_from_directory<D, P>(
    directory: &D,
    distributor: &P,
    current: &ClusterConfiguration,
    partition_ids: &[PartitionId],
    replication_factor: usize,
) -> Result<Vec<ReconfigurationOperation>>
where
    D: MemberDirectory + ?Sized,
    P: PartitionDistributor + ?Sized,
{
    let members = directory.known_members();
    let target = distributor.distribute_partitions(&members, partition_ids, replication_factor)?;
    ReconfigurationPlanner::new(replication_factor).plan(current, &members, &target)
}

/// Executor that applies operations to an in-memory [`ClusterConfiguration`].
///
/// Records every applied operation and the lowest replica count each
/// pre-existing partition reached along the way.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutor {
    configuration: ClusterConfiguration,
    applied: Vec<ReconfigurationOperation>,
    min_replicas: BTreeMap<PartitionId, usize>,
}

impl InMemoryExecutor {
    #[must_use]
    pub fn new(configuration: ClusterConfiguration) -> Self {
        let min_replicas = configuration
            .partition_ids()
            .map(|p| (p, configuration.replica_count(p)))
            .collect();
        Self {
            configuration,
            applied: Vec::new(),
            min_replicas,
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &ClusterConfiguration {
        &self.configuration
    }

    #[must_use]
    pub fn applied(&self) -> &[ReconfigurationOperation] {
        &self.applied
    }

    /// Lowest replica count observed for a partition that existed when the
    /// executor was created.
    #[must_use]
    pub fn min_replicas(&self, partition: PartitionId) -> Option<usize> {
        self.min_replicas.get(&partition).copied()
    }
}

impl ClusterConfigurationChangeExecutor for InMemoryExecutor {
    fn apply(&mut self, operation: &ReconfigurationOperation) -> Result<()> {
        self.configuration.apply(operation)?;
        self.applied.push(operation.clone());

        let partition = operation.partition();
        let count = self.configuration.replica_count(partition);
        if let Some(min) = self.min_replicas.get_mut(&partition) {
            *min = (*min).min(count);
        }
        Ok(())
    }
}
