use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    Admin,
    Container,
    Content,
    Combined,
}

impl ClusterType {
    /// Stateful clusters hold data, so their nodes are never dropped without retirement.
    pub fn is_stateful(self) -> bool {
        matches!(self, ClusterType::Content | ClusterType::Combined)
    }

    pub fn is_content(self) -> bool {
        self.is_stateful()
    }
}

impl Display for ClusterType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClusterType::Admin => "admin",
            ClusterType::Container => "container",
            ClusterType::Content => "content",
            ClusterType::Combined => "combined",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        ClusterId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClusterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a cluster (and optionally one of its groups) of an application.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_type: ClusterType,
    pub id: ClusterId,
    pub group: Option<u32>,
    /// Whether the cluster requires hosts exclusive to its application.
    pub exclusive: bool,
}

impl ClusterSpec {
    pub fn new(cluster_type: ClusterType, id: ClusterId) -> Self {
        ClusterSpec {
            cluster_type,
            id,
            group: None,
            exclusive: false,
        }
    }

    pub fn with_group(mut self, group: Option<u32>) -> Self {
        self.group = group;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Same cluster, ignoring group and exclusivity.
    pub fn satisfies(&self, other: &ClusterSpec) -> bool {
        self.id == other.id && self.cluster_type == other.cluster_type
    }
}

impl Display for ClusterSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} cluster '{}'", self.cluster_type, self.id)?;
        if let Some(group) = self.group {
            write!(f, " group {group}")?;
        }
        Ok(())
    }
}

/// A node's membership in a cluster.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub cluster: ClusterSpec,
    pub index: u32,
    pub retired: bool,
}

impl ClusterMembership {
    pub fn new(cluster: ClusterSpec, index: u32) -> Self {
        ClusterMembership {
            cluster,
            index,
            retired: false,
        }
    }

    pub fn retire(mut self) -> Self {
        self.retired = true;
        self
    }

    pub fn unretire(mut self) -> Self {
        self.retired = false;
        self
    }
}
