use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::internal::common::resources::ResourceAmount;

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSpeed {
    Fast,
    Slow,
    #[default]
    Any,
}

impl DiskSpeed {
    pub fn compatible_with(self, other: DiskSpeed) -> bool {
        self == DiskSpeed::Any || other == DiskSpeed::Any || self == other
    }
}

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Remote,
    #[default]
    Any,
}

impl StorageType {
    pub fn compatible_with(self, other: StorageType) -> bool {
        self == StorageType::Any || other == StorageType::Any || self == other
    }
}

/// Resource vector of a node or host.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeResources {
    pub vcpu: ResourceAmount,
    pub memory_gb: ResourceAmount,
    pub disk_gb: ResourceAmount,
    pub bandwidth_gbps: ResourceAmount,
    #[serde(default)]
    pub disk_speed: DiskSpeed,
    #[serde(default)]
    pub storage_type: StorageType,
}

impl NodeResources {
    pub fn new(vcpu: f64, memory_gb: f64, disk_gb: f64, bandwidth_gbps: f64) -> Self {
        NodeResources {
            vcpu: vcpu.into(),
            memory_gb: memory_gb.into(),
            disk_gb: disk_gb.into(),
            bandwidth_gbps: bandwidth_gbps.into(),
            disk_speed: DiskSpeed::Any,
            storage_type: StorageType::Any,
        }
    }

    /// Resources of a request which does not specify anything.
    pub fn unspecified() -> Self {
        NodeResources::default()
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::unspecified()
    }

    pub fn with_disk_speed(mut self, disk_speed: DiskSpeed) -> Self {
        self.disk_speed = disk_speed;
        self
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    /// Returns true if every numeric dimension of `self` is at least that of `other`
    /// and the non-numeric attributes are compatible.
    pub fn satisfies(&self, other: &NodeResources) -> bool {
        self.vcpu >= other.vcpu
            && self.memory_gb >= other.memory_gb
            && self.disk_gb >= other.disk_gb
            && self.bandwidth_gbps >= other.bandwidth_gbps
            && self.disk_speed.compatible_with(other.disk_speed)
            && self.storage_type.compatible_with(other.storage_type)
    }

    /// Exact match: equal numbers and compatible disk speed/storage type.
    pub fn compatible_with(&self, other: &NodeResources) -> bool {
        self.equal_numbers(other)
            && self.disk_speed.compatible_with(other.disk_speed)
            && self.storage_type.compatible_with(other.storage_type)
    }

    pub fn equal_numbers(&self, other: &NodeResources) -> bool {
        self.vcpu == other.vcpu
            && self.memory_gb == other.memory_gb
            && self.disk_gb == other.disk_gb
            && self.bandwidth_gbps == other.bandwidth_gbps
    }

    pub fn add(&self, other: &NodeResources) -> NodeResources {
        NodeResources {
            vcpu: self.vcpu + other.vcpu,
            memory_gb: self.memory_gb + other.memory_gb,
            disk_gb: self.disk_gb + other.disk_gb,
            bandwidth_gbps: self.bandwidth_gbps + other.bandwidth_gbps,
            ..*self
        }
    }

    /// Subtracts numbers, saturating at zero. Attributes of `self` are kept.
    pub fn subtract(&self, other: &NodeResources) -> NodeResources {
        NodeResources {
            vcpu: self.vcpu.saturating_sub(other.vcpu),
            memory_gb: self.memory_gb.saturating_sub(other.memory_gb),
            disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
            bandwidth_gbps: self.bandwidth_gbps.saturating_sub(other.bandwidth_gbps),
            ..*self
        }
    }

    /// Sum of all numeric dimensions; a coarse size used to order hosts by free capacity.
    pub fn magnitude(&self) -> ResourceAmount {
        self.vcpu + self.memory_gb + self.disk_gb + self.bandwidth_gbps
    }
}

impl Display for NodeResources {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[vcpu: {}, memory: {} GB, disk: {} GB, bandwidth: {} Gbps",
            self.vcpu, self.memory_gb, self.disk_gb, self.bandwidth_gbps
        )?;
        if self.disk_speed != DiskSpeed::Any {
            write!(f, ", disk speed: {:?}", self.disk_speed)?;
        }
        if self.storage_type != StorageType::Any {
            write!(f, ", storage type: {:?}", self.storage_type)?;
        }
        f.write_str("]")
    }
}
