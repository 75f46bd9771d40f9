use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::internal::common::ids::{Agent, ApplicationId, CloudAccount};
use crate::internal::common::resources::NodeResources;
use crate::internal::model::cluster::{ClusterMembership, ClusterSpec, ClusterType};

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Tenant,
    Host,
    Config,
    ConfigHost,
    Controller,
    ControllerHost,
    Proxy,
    ProxyHost,
}

impl NodeType {
    pub fn is_host(self) -> bool {
        matches!(
            self,
            NodeType::Host | NodeType::ConfigHost | NodeType::ControllerHost | NodeType::ProxyHost
        )
    }

    /// Only tenant hosts may run children of several applications.
    pub fn is_sharable(self) -> bool {
        self == NodeType::Host
    }

    pub fn is_config_server_host_like(self) -> bool {
        matches!(self, NodeType::ConfigHost | NodeType::ControllerHost)
    }

    /// The type of host running nodes of this type. Hosts are their own host type.
    pub fn host_type(self) -> NodeType {
        match self {
            NodeType::Tenant => NodeType::Host,
            NodeType::Config => NodeType::ConfigHost,
            NodeType::Controller => NodeType::ControllerHost,
            NodeType::Proxy => NodeType::ProxyHost,
            host => host,
        }
    }

    pub fn child_type(self) -> NodeType {
        match self {
            NodeType::Host => NodeType::Tenant,
            NodeType::ConfigHost => NodeType::Config,
            NodeType::ControllerHost => NodeType::Controller,
            NodeType::ProxyHost => NodeType::Proxy,
            child => child,
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Tenant => "tenant",
            NodeType::Host => "host",
            NodeType::Config => "config",
            NodeType::ConfigHost => "confighost",
            NodeType::Controller => "controller",
            NodeType::ControllerHost => "controllerhost",
            NodeType::Proxy => "proxy",
            NodeType::ProxyHost => "proxyhost",
        };
        f.write_str(name)
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "tenant" => NodeType::Tenant,
            "host" => NodeType::Host,
            "config" => NodeType::Config,
            "confighost" => NodeType::ConfigHost,
            "controller" => NodeType::Controller,
            "controllerhost" => NodeType::ControllerHost,
            "proxy" => NodeType::Proxy,
            "proxyhost" => NodeType::ProxyHost,
            _ => return Err(format!("Unknown node type '{s}'")),
        })
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Host record created, physical host may still be booting.
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Deprovisioned,
}

/// Which application and cluster a node is allocated to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub owner: ApplicationId,
    pub membership: ClusterMembership,
    /// Resources last requested for this node, which may differ from what it has.
    pub requested_resources: NodeResources,
    /// Whether the node may be removed from the application on next activation.
    pub removable: bool,
}

impl Allocation {
    pub fn new(
        owner: ApplicationId,
        membership: ClusterMembership,
        requested_resources: NodeResources,
    ) -> Self {
        Allocation {
            owner,
            membership,
            requested_resources,
            removable: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionMark {
    pub agent: Agent,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub want_to_retire: bool,
    /// Set on hosts whose flavor should be replaced; their children get retired.
    pub want_to_upgrade_flavor: bool,
    pub want_to_deprovision: bool,
    pub deprovision: Option<DeprovisionMark>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct Node {
    pub hostname: String,
    #[builder(default, setter(into, strip_option))]
    pub parent_hostname: Option<String>,
    pub node_type: NodeType,
    pub resources: NodeResources,
    #[builder(default = "NodeState::Ready")]
    pub state: NodeState,
    #[builder(default, setter(into, strip_option))]
    pub allocation: Option<Allocation>,
    #[builder(default)]
    pub cloud_account: CloudAccount,
    /// Hosts only: the application this host is exclusive to.
    #[builder(default, setter(into, strip_option))]
    pub exclusive_to: Option<ApplicationId>,
    #[builder(default, setter(into, strip_option))]
    pub exclusive_to_cluster_type: Option<ClusterType>,
    #[builder(default)]
    pub status: NodeStatus,
    #[builder(default, setter(into, strip_option))]
    pub host_ttl: Option<Duration>,
    #[builder(default, setter(into, strip_option))]
    pub container_image: Option<String>,
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    pub fn owner(&self) -> Option<&ApplicationId> {
        self.allocation.as_ref().map(|a| &a.owner)
    }

    pub fn membership(&self) -> Option<&ClusterMembership> {
        self.allocation.as_ref().map(|a| &a.membership)
    }

    pub fn is_retired(&self) -> bool {
        self.membership().is_some_and(|m| m.retired)
    }

    pub fn is_owned_by(&self, application: &ApplicationId) -> bool {
        self.owner() == Some(application)
    }

    /// Returns true if the node is allocated to `application` in the cluster with the
    /// same id and type as `cluster`, regardless of group.
    pub fn is_member_of(&self, application: &ApplicationId, cluster: &ClusterSpec) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| &a.owner == application && a.membership.cluster.satisfies(cluster))
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub fn allocate(
        mut self,
        owner: ApplicationId,
        membership: ClusterMembership,
        requested_resources: NodeResources,
    ) -> Self {
        self.allocation = Some(Allocation::new(owner, membership, requested_resources));
        self
    }

    pub fn retire(mut self) -> Self {
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.membership.retired = true;
        }
        self
    }

    pub fn unretire(mut self) -> Self {
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.membership.retired = false;
        }
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterSpec) -> Self {
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.membership.cluster = cluster;
        }
        self
    }

    pub fn with_removable(mut self, removable: bool) -> Self {
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.removable = removable;
        }
        self
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} node {}", self.state_name(), self.hostname)?;
        if let Some(allocation) = &self.allocation {
            write!(
                f,
                " ({} {} index {}{})",
                allocation.owner,
                allocation.membership.cluster,
                allocation.membership.index,
                if allocation.membership.retired {
                    ", retired"
                } else {
                    ""
                }
            )?;
        }
        Ok(())
    }
}

impl Node {
    fn state_name(&self) -> &'static str {
        match self.state {
            NodeState::Provisioned => "provisioned",
            NodeState::Ready => "ready",
            NodeState::Reserved => "reserved",
            NodeState::Active => "active",
            NodeState::Inactive => "inactive",
            NodeState::Dirty => "dirty",
            NodeState::Failed => "failed",
            NodeState::Deprovisioned => "deprovisioned",
        }
    }
}
