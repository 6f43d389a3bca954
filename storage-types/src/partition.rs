//! Partition layout models

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::MB_PER_GB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnit {
    #[serde(rename = "MB")]
    Mb,
    #[serde(rename = "GB")]
    Gb,
}

impl SizeUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Mb => "MB",
            Self::Gb => "GB",
        }
    }
}

/// A partition boundary as handed to `parted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionBound {
    pub value: u64,
    pub unit: SizeUnit,
}

impl PartitionBound {
    pub fn mb(value: u64) -> Self {
        Self {
            value,
            unit: SizeUnit::Mb,
        }
    }

    pub fn gb(value: u64) -> Self {
        Self {
            value,
            unit: SizeUnit::Gb,
        }
    }

    pub fn to_mb(self) -> u64 {
        match self.unit {
            SizeUnit::Mb => self.value,
            SizeUnit::Gb => self.value * MB_PER_GB,
        }
    }
}

impl fmt::Display for PartitionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Planned byte range of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpan {
    pub start: PartitionBound,
    pub end: PartitionBound,
}

impl PartitionSpan {
    pub fn size_mb(&self) -> u64 {
        self.end.to_mb().saturating_sub(self.start.to_mb())
    }
}

/// One partition of a physical disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// 1-based partition number.
    pub index: u8,
    /// Kernel node, e.g. `/dev/sda2`.
    pub node: String,
    /// Stable alias pointing at `node`.
    pub link: Option<String>,
    pub start: PartitionBound,
    pub end: PartitionBound,
}

/// Partition layout of one physical disk (at most four entries).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPartitionLayout {
    pub entries: Vec<PartitionEntry>,
}

impl DiskPartitionLayout {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node(&self, partition: usize) -> Option<&str> {
        self.entries.get(partition).map(|entry| entry.node.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.node.as_str())
    }

    /// End of the last partition in MB, zero for an empty layout.
    pub fn end_mb(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.end.to_mb())
            .max()
            .unwrap_or(0)
    }
}

/// Kernel node name of partition `index` (1-based) on `base`.
///
/// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`) take a `p` separator.
pub fn partition_node(base: &str, index: u8) -> String {
    if base.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        format!("{base}p{index}")
    } else {
        format!("{base}{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_render_for_parted() {
        assert_eq!(PartitionBound::mb(100).to_string(), "100MB");
        assert_eq!(PartitionBound::gb(2000).to_string(), "2000GB");
        assert_eq!(PartitionBound::gb(2).to_mb(), 2000);
    }

    #[test]
    fn partition_nodes_follow_kernel_naming() {
        assert_eq!(partition_node("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_node("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_node("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
    }

    #[test]
    fn layout_end_is_last_partition_end() {
        let layout = DiskPartitionLayout {
            entries: vec![
                PartitionEntry {
                    index: 1,
                    node: "/dev/sda1".to_string(),
                    link: None,
                    start: PartitionBound::mb(100),
                    end: PartitionBound::gb(3000),
                },
                PartitionEntry {
                    index: 2,
                    node: "/dev/sda2".to_string(),
                    link: None,
                    start: PartitionBound::gb(3000),
                    end: PartitionBound::gb(6000),
                },
            ],
        };
        assert_eq!(layout.end_mb(), 6_000_000);
        assert_eq!(layout.node(1), Some("/dev/sda2"));
        assert_eq!(layout.nodes().count(), 2);
    }
}
