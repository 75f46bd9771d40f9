use std::collections::BTreeMap;

use provisioning::{NodeType, Version};

/// Wanted OS versions per host type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OsVersionChange {
    targets: BTreeMap<NodeType, Version>,
}

impl OsVersionChange {
    pub fn new(targets: BTreeMap<NodeType, Version>) -> crate::Result<Self> {
        targets
            .into_iter()
            .try_fold(OsVersionChange::default(), |change, (node_type, version)| {
                change.with_target(node_type, version)
            })
    }

    pub fn targets(&self) -> &BTreeMap<NodeType, Version> {
        &self.targets
    }

    pub fn target_for(&self, host_type: NodeType) -> Option<&Version> {
        self.targets.get(&host_type)
    }

    pub fn with_target(mut self, host_type: NodeType, version: Version) -> crate::Result<Self> {
        if !host_type.is_host() {
            return Err(provisioning::Error::InvalidRequest(format!(
                "Cannot set OS version target for non-host type {host_type}"
            ))
            .into());
        }
        if version.is_empty() {
            self.targets.remove(&host_type);
        } else {
            self.targets.insert(host_type, version);
        }
        Ok(self)
    }

    pub fn without_target(mut self, host_type: NodeType) -> Self {
        self.targets.remove(&host_type);
        self
    }
}
