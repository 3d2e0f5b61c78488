use crate::distribution::{FixedPartitionDistributor, PartitionMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tdm_core::{MemberId, PartitionId, Result, TandemError};
use tracing::info;

/// Replication and partitioning settings for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    pub replication_factor: usize,
    pub partition_count: u32,
    #[serde(default)]
    pub catch_up: CatchUpSettings,
    /// Fixed member priorities per partition.
    #[serde(default)]
    pub partitions: Vec<PartitionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchUpSettings {
    /// Maximum bytes of entries per catch-up response (default: 4 MiB).
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Pending requests queued per catch-up worker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    4 * 1024 * 1024
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for CatchUpSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSettings {
    pub id: PartitionId,
    /// Member id to priority.
    pub members: BTreeMap<MemberId, i32>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            replication_factor: 1,
            partition_count: 1,
            catch_up: CatchUpSettings::default(),
            partitions: Vec::new(),
        }
    }
}

impl ReplicationSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let settings: Self = match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| TandemError::Config(format!("TOML parse error: {e}")))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| TandemError::Config(format!("JSON parse error: {e}")))?,
            _ => {
                return Err(TandemError::Config(format!(
                    "Unknown config file extension: {ext}"
                )));
            },
        };

        settings.validate()?;

        info!(
            target: "tandem::config",
            path = %path.display(),
            replication_factor = settings.replication_factor,
            partition_count = settings.partition_count,
            mapped_partitions = settings.partitions.len(),
            "Loaded replication settings"
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(TandemError::Config(
                "replication_factor must be greater than zero".into(),
            ));
        }
        if self.catch_up.buffer_capacity == 0 {
            return Err(TandemError::Config(
                "catch_up.buffer_capacity must be greater than zero".into(),
            ));
        }
        if self.catch_up.channel_capacity == 0 {
            return Err(TandemError::Config(
                "catch_up.channel_capacity must be greater than zero".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for partition in &self.partitions {
            let id = partition.id.get();
            if id == 0 || id > self.partition_count {
                return Err(TandemError::Config(format!(
                    "partition {id} outside 1..={}",
                    self.partition_count
                )));
            }
            if !seen.insert(id) {
                return Err(TandemError::Config(format!("partition {id} mapped twice")));
            }
        }
        Ok(())
    }

    /// Partition ids `1..=partition_count`.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        (1..=self.partition_count).map(PartitionId::new).collect()
    }

    #[must_use]
    pub fn partition_mapping(&self) -> PartitionMapping {
        self.partitions
            .iter()
            .map(|p| (p.id, p.members.clone()))
            .collect()
    }

    #[must_use]
    pub fn distributor(&self) -> FixedPartitionDistributor {
        FixedPartitionDistributor::new(self.partition_mapping())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TOML_SETTINGS: &str = r#"
replication_factor = 2
partition_count = 2

[catch_up]
buffer_capacity = 65536

[[partitions]]
id = 1
[partitions.members]
broker-0 = 2
broker-1 = 1

[[partitions]]
id = 2
[partitions.members]
broker-1 = 2
broker-2 = 1
"#;

    #[test]
    fn test_settings_default() {
        let settings = ReplicationSettings::default();
        assert_eq!(settings.replication_factor, 1);
        assert_eq!(settings.catch_up.buffer_capacity, 4 * 1024 * 1024);
        assert_eq!(settings.catch_up.channel_capacity, 16);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replication.toml");
        std::fs::write(&path, TOML_SETTINGS).unwrap();

        let settings = ReplicationSettings::from_file(&path).unwrap();
        assert_eq!(settings.replication_factor, 2);
        assert_eq!(settings.catch_up.buffer_capacity, 65536);
        assert_eq!(settings.catch_up.channel_capacity, 16);
        assert_eq!(
            settings.partition_ids(),
            vec![PartitionId::new(1), PartitionId::new(2)]
        );

        let mapping = settings.partition_mapping();
        let p2 = mapping.priorities(PartitionId::new(2)).unwrap();
        assert_eq!(p2.get(&MemberId::from("broker-1")), Some(&2));
    }

    #[test]
    fn test_settings_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replication.json");
        let json = r#"{
            "replication_factor": 1,
            "partition_count": 1,
            "partitions": [{"id": 1, "members": {"broker-0": 1}}]
        }"#;
        std::fs::write(&path, json).unwrap();

        let settings = ReplicationSettings::from_file(&path).unwrap();
        assert_eq!(settings.partitions.len(), 1);
        assert_eq!(settings.catch_up.buffer_capacity, 4 * 1024 * 1024);
    }

    #[test]
    fn test_settings_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replication.yaml");
        std::fs::write(&path, "replication_factor: 1").unwrap();

        assert!(matches!(
            ReplicationSettings::from_file(&path),
            Err(TandemError::Config(_))
        ));
    }

    #[test]
    fn test_settings_rejects_partition_out_of_range() {
        let settings = ReplicationSettings {
            partition_count: 1,
            partitions: vec![PartitionSettings {
                id: PartitionId::new(3),
                members: BTreeMap::new(),
            }],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_rejects_zero_replication_factor() {
        let settings = ReplicationSettings {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
