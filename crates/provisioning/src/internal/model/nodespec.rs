use derive_builder::Builder;
use std::time::Duration;

use crate::internal::common::ids::CloudAccount;
use crate::internal::common::resources::NodeResources;
use crate::internal::model::cluster::ClusterType;
use crate::internal::model::node::{Node, NodeType};

/// What a cluster (group) asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeSpec {
    /// A number of tenant nodes, optionally with specific resources.
    Count(CountNodeSpec),
    /// All nodes of an infrastructure node type.
    Type(TypeNodeSpec),
}

#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(pattern = "owned")]
pub struct CountNodeSpec {
    pub count: u32,
    #[builder(default = "1")]
    pub groups: u32,
    #[builder(default, setter(strip_option))]
    pub resources: Option<NodeResources>,
    #[builder(default)]
    pub exclusive: bool,
    /// Whether an unfulfilled request should fail rather than be accepted partially.
    #[builder(default = "true")]
    pub can_fail: bool,
    #[builder(default = "true")]
    pub consider_retiring: bool,
    #[builder(default)]
    pub cloud_account: CloudAccount,
    #[builder(default, setter(strip_option))]
    pub host_ttl: Option<Duration>,
}

impl CountNodeSpec {
    pub fn builder(count: u32) -> CountNodeSpecBuilder {
        CountNodeSpecBuilder::default().count(count)
    }

    pub fn can_resize(
        &self,
        current: &NodeResources,
        free_on_host: &NodeResources,
        cluster_type: ClusterType,
        topology_change: bool,
        current_cluster_size: u32,
    ) -> bool {
        let Some(requested) = &self.resources else {
            return false;
        };
        // Exclusive resources must match the host
        if self.exclusive {
            return false;
        }
        if topology_change || self.count < current_cluster_size {
            return false;
        }
        // Growing a content cluster while shrinking its nodes moves data twice
        if cluster_type.is_content()
            && self.count > current_cluster_size
            && !requested.satisfies(current)
        {
            return false;
        }
        free_on_host.add(current).satisfies(requested)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeNodeSpec {
    pub node_type: NodeType,
    pub cloud_account: CloudAccount,
}

impl TypeNodeSpec {
    pub fn new(node_type: NodeType) -> Self {
        TypeNodeSpec {
            node_type,
            cloud_account: CloudAccount::unspecified(),
        }
    }

    /// Number of nodes an infrastructure application of this type should have.
    pub fn wanted_node_count(&self) -> u32 {
        match self.node_type {
            NodeType::Config | NodeType::Controller => 3,
            _ => 0,
        }
    }
}

impl From<CountNodeSpec> for NodeSpec {
    fn from(spec: CountNodeSpec) -> Self {
        NodeSpec::Count(spec)
    }
}

impl From<TypeNodeSpec> for NodeSpec {
    fn from(spec: TypeNodeSpec) -> Self {
        NodeSpec::Type(spec)
    }
}

impl NodeSpec {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeSpec::Count(_) => NodeType::Tenant,
            NodeSpec::Type(spec) => spec.node_type,
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            NodeSpec::Count(spec) => Some(spec.count),
            NodeSpec::Type(_) => None,
        }
    }

    pub fn resources(&self) -> Option<&NodeResources> {
        match self {
            NodeSpec::Count(spec) => spec.resources.as_ref(),
            NodeSpec::Type(_) => None,
        }
    }

    pub fn groups(&self) -> u32 {
        match self {
            NodeSpec::Count(spec) => spec.groups,
            NodeSpec::Type(_) => 1,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        match self {
            NodeSpec::Count(spec) => spec.exclusive,
            NodeSpec::Type(_) => false,
        }
    }

    pub fn can_fail(&self) -> bool {
        match self {
            NodeSpec::Count(spec) => spec.can_fail,
            NodeSpec::Type(_) => false,
        }
    }

    pub fn consider_retiring(&self) -> bool {
        match self {
            NodeSpec::Count(spec) => spec.consider_retiring,
            NodeSpec::Type(_) => true,
        }
    }

    pub fn cloud_account(&self) -> &CloudAccount {
        match self {
            NodeSpec::Count(spec) => &spec.cloud_account,
            NodeSpec::Type(spec) => &spec.cloud_account,
        }
    }

    pub fn host_ttl(&self) -> Option<Duration> {
        match self {
            NodeSpec::Count(spec) => spec.host_ttl,
            NodeSpec::Type(_) => None,
        }
    }

    /// Returns true if a node with these resources can be used without resizing.
    pub fn is_compatible(&self, resources: &NodeResources) -> bool {
        match self.resources() {
            Some(requested) => requested.compatible_with(resources),
            None => true,
        }
    }

    pub fn needs_resize(&self, node: &Node) -> bool {
        !self.is_compatible(&node.resources)
    }

    pub fn can_resize(
        &self,
        current: &NodeResources,
        free_on_host: &NodeResources,
        cluster_type: ClusterType,
        topology_change: bool,
        current_cluster_size: u32,
    ) -> bool {
        match self {
            NodeSpec::Count(spec) => spec.can_resize(
                current,
                free_on_host,
                cluster_type,
                topology_change,
                current_cluster_size,
            ),
            NodeSpec::Type(_) => false,
        }
    }

    /// Returns true if no more nodes are needed once `count` are accepted.
    pub fn saturated_by(&self, count: u32) -> bool {
        match self {
            NodeSpec::Count(spec) => count >= spec.count,
            NodeSpec::Type(_) => false,
        }
    }

    pub fn fulfilled_by(&self, count: u32) -> bool {
        match self {
            NodeSpec::Count(spec) => count >= spec.count,
            NodeSpec::Type(spec) => count >= spec.wanted_node_count(),
        }
    }

    pub fn fulfilled_deficit_count(&self, count: u32) -> u32 {
        match self {
            NodeSpec::Count(spec) => spec.count.saturating_sub(count),
            NodeSpec::Type(spec) => spec.wanted_node_count().saturating_sub(count),
        }
    }

    /// How many more (positive) or fewer (negative) nodes should be retired.
    pub fn ideal_retired_count(
        &self,
        accepted_count: u32,
        want_to_retire_count: u32,
        current_retired_count: u32,
    ) -> i64 {
        match self {
            NodeSpec::Count(spec) => {
                accepted_count as i64 - spec.count as i64 - current_retired_count as i64
            }
            NodeSpec::Type(_) => want_to_retire_count as i64 - current_retired_count as i64,
        }
    }

    /// The same request, but never retiring nodes to satisfy it. Only count specs can
    /// be relaxed this way.
    pub fn without_retiring(&self) -> Option<NodeSpec> {
        match self {
            NodeSpec::Count(spec) => Some(NodeSpec::Count(CountNodeSpec {
                consider_retiring: false,
                ..spec.clone()
            })),
            NodeSpec::Type(_) => None,
        }
    }

    /// The share of this request falling on one of `groups` groups.
    pub fn fraction(&self, groups: u32) -> NodeSpec {
        match self {
            NodeSpec::Count(spec) => NodeSpec::Count(CountNodeSpec {
                count: spec.count / groups.max(1),
                groups: 1,
                ..spec.clone()
            }),
            NodeSpec::Type(_) => self.clone(),
        }
    }
}
