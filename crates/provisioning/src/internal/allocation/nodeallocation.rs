use std::fmt::{Display, Formatter};

use smallvec::SmallVec;

use crate::internal::allocation::candidate::NodeCandidate;
use crate::internal::allocation::indices::IndexSupply;
use crate::internal::common::error::{NodeAllocationError, Rejection, ShortageReason};
use crate::internal::common::ids::ApplicationId;
use crate::internal::common::resources::{DiskSpeed, NodeResources, StorageType};
use crate::internal::common::utils::trailing_index;
use crate::internal::common::{Map, Set};
use crate::internal::model::cluster::{ClusterMembership, ClusterSpec, ClusterType};
use crate::internal::model::node::{Node, NodeState, NodeType};
use crate::internal::model::nodelist::NodeList;
use crate::internal::model::nodespec::NodeSpec;
use crate::internal::repository::NodeRepository;
use crate::{Error, Result};

pub type ProvisionIndices = SmallVec<[u32; 4]>;

/// Hosts missing for an allocation to be fulfilled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDeficit {
    pub count: u32,
    pub resources: NodeResources,
    /// The deficit is exactly the nodes retired because their host flavor is being replaced.
    pub due_to_flavor_upgrade: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Retirement {
    None,
    AlreadyRetired,
    HardRequest,
    ViolatesExclusivity,
    IncompatibleResources,
    ViolatesHostFlavor,
}

impl Display for Retirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Retirement::None => "not retired",
            Retirement::AlreadyRetired => "already retired",
            Retirement::HardRequest => "node or host wants to retire",
            Retirement::ViolatesExclusivity => "node violates host exclusivity",
            Retirement::IncompatibleResources => "node has incompatible resources",
            Retirement::ViolatesHostFlavor => "host flavor is being upgraded",
        };
        f.write_str(reason)
    }
}

/// Accumulates the nodes accepted for one cluster group.
///
/// Candidates are offered in priority order, possibly in several rounds. Once enough are
/// accepted, further candidates are only taken when they are members which must be kept.
pub struct NodeAllocation<'a, S: IndexSupply> {
    all_nodes: &'a NodeList,
    application: ApplicationId,
    cluster: ClusterSpec,
    requested: NodeSpec,
    /// Whether children of this cluster may not share hosts with other applications.
    exclusive: bool,
    indices: S,

    nodes: Vec<NodeCandidate>,
    positions: Map<String, usize>,
    used_indices: Set<u32>,
    rejections: Vec<Rejection>,

    accepted_and_compatible: u32,
    accepted_and_compatible_or_resizable: u32,
    was_retired_just_now: u32,
    was_retired_due_to_flavor_upgrade: u32,
    finalized: bool,
}

impl<'a, S: IndexSupply> NodeAllocation<'a, S> {
    pub fn new(
        all_nodes: &'a NodeList,
        application: ApplicationId,
        cluster: ClusterSpec,
        requested: NodeSpec,
        exclusive: bool,
        indices: S,
    ) -> Self {
        let exclusive = exclusive || requested.is_exclusive();
        NodeAllocation {
            all_nodes,
            application,
            cluster,
            requested,
            exclusive,
            indices,
            nodes: Vec::new(),
            positions: Map::default(),
            used_indices: Set::default(),
            rejections: Vec::new(),
            accepted_and_compatible: 0,
            accepted_and_compatible_or_resizable: 0,
            was_retired_just_now: 0,
            was_retired_due_to_flavor_upgrade: 0,
            finalized: false,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.requested.node_type()
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    pub fn requested(&self) -> &NodeSpec {
        &self.requested
    }

    pub fn cluster(&self) -> &ClusterSpec {
        &self.cluster
    }

    /// Records candidates which were excluded before being offered.
    pub fn exclude(&mut self, exclusions: impl IntoIterator<Item = Rejection>) {
        self.rejections.extend(exclusions);
    }

    /// Offers candidates in priority order. May be called again with more candidates,
    /// e.g. children of hosts provisioned for this allocation.
    pub fn offer(&mut self, candidates: impl IntoIterator<Item = NodeCandidate>) {
        debug_assert!(!self.finalized, "offer after the allocation was finalized");
        for candidate in candidates {
            if self.positions.contains_key(candidate.hostname()) {
                continue;
            }
            if let Some(allocation) = candidate.allocation() {
                if allocation.owner != self.application {
                    continue;
                }
                if !allocation.membership.cluster.satisfies(&self.cluster) {
                    continue;
                }
                if candidate.state() == NodeState::Active && allocation.removable {
                    continue;
                }
                if self.used_indices.contains(&allocation.membership.index) {
                    continue;
                }
                if !self.account_matches(&candidate) {
                    self.reject(&candidate, ShortageReason::CloudAccount);
                    continue;
                }
                let resizable = self.requested.consider_retiring() && candidate.is_resizable();
                let compatible = self.has_compatible_resources(&candidate);
                if (!self.saturated() && compatible) || self.accept_incompatible(&candidate) {
                    let retirement = self.should_retire(&candidate);
                    self.accept(candidate, retirement, resizable);
                } else if !compatible {
                    self.reject(&candidate, ShortageReason::IncompatibleResources);
                }
            } else if !self.saturated() {
                if !self.has_compatible_resources(&candidate) {
                    self.reject(&candidate, ShortageReason::IncompatibleResources);
                    continue;
                }
                if !self.account_matches(&candidate) {
                    self.reject(&candidate, ShortageReason::CloudAccount);
                    continue;
                }
                if self.violates_exclusivity(&candidate) {
                    self.reject(&candidate, ShortageReason::HostExclusivity);
                    continue;
                }
                if candidate.want_to_retire() {
                    self.reject(&candidate, ShortageReason::WantToRetire);
                    continue;
                }
                let index = self.indices.next_index();
                let resources = self
                    .requested
                    .resources()
                    .copied()
                    .unwrap_or(*candidate.resources());
                let node = candidate.node().clone().allocate(
                    self.application.clone(),
                    ClusterMembership::new(self.cluster.clone(), index),
                    resources,
                );
                let candidate = candidate.with_node(node);
                self.accept(candidate, Retirement::None, false);
            }
        }
    }

    fn reject(&mut self, candidate: &NodeCandidate, reason: ShortageReason) {
        log::debug!("Rejected {candidate}: {reason:?}");
        self.rejections
            .push(Rejection::new(candidate.hostname(), reason));
    }

    fn account_matches(&self, candidate: &NodeCandidate) -> bool {
        let requested = self.requested.cloud_account();
        if requested.is_unspecified() {
            return true;
        }
        let account = candidate
            .parent()
            .map(|p| &p.cloud_account)
            .unwrap_or(&candidate.node().cloud_account);
        account == requested
    }

    /// Whether a member with incompatible resources, or one arriving after saturation,
    /// must still be accepted (and then retired) rather than dropped.
    fn accept_incompatible(&self, candidate: &NodeCandidate) -> bool {
        if candidate.state() != NodeState::Active {
            return false;
        }
        let Some(membership) = candidate.node().membership() else {
            return false;
        };
        if membership.cluster.group != self.cluster.group {
            return false;
        }
        if membership.retired {
            return true;
        }
        if !self.requested.consider_retiring() {
            return true;
        }
        // Stateful nodes are retired so their data can be migrated; stateless ones with
        // the wrong resources are replaced gracefully
        self.cluster.cluster_type.is_stateful()
            || (self.cluster.cluster_type == ClusterType::Container
                && !self.has_compatible_resources(candidate))
    }

    fn has_compatible_resources(&self, candidate: &NodeCandidate) -> bool {
        self.requested.is_compatible(candidate.resources()) || candidate.is_resizable()
    }

    fn should_retire(&self, candidate: &NodeCandidate) -> Retirement {
        if !self.requested.consider_retiring() {
            return if candidate.node().is_retired() {
                Retirement::AlreadyRetired
            } else {
                Retirement::None
            };
        }
        if candidate.want_to_retire() {
            return Retirement::HardRequest;
        }
        if self.violates_exclusivity(candidate) {
            return Retirement::ViolatesExclusivity;
        }
        if !self.has_compatible_resources(candidate) {
            return Retirement::IncompatibleResources;
        }
        if candidate.parent_wants_flavor_upgrade() {
            return Retirement::ViolatesHostFlavor;
        }
        Retirement::None
    }

    /// Whether the candidate would share a host with another application in a way either
    /// side does not allow.
    fn violates_exclusivity(&self, candidate: &NodeCandidate) -> bool {
        if self.requested.node_type() != NodeType::Tenant {
            return false;
        }
        let Some(parent) = candidate.parent() else {
            return false;
        };
        if let Some(owner) = &parent.exclusive_to {
            if owner != &self.application {
                return true;
            }
        }
        if parent
            .exclusive_to_cluster_type
            .is_some_and(|t| t != self.cluster.cluster_type)
        {
            return true;
        }
        self.all_nodes
            .children_of(&parent.hostname)
            .filter(|n| n.hostname != candidate.hostname())
            .filter_map(|n| n.allocation.as_ref())
            .filter(|a| a.owner != self.application)
            .any(|a| self.exclusive || a.membership.cluster.exclusive)
    }

    fn accept(&mut self, candidate: NodeCandidate, retirement: Retirement, resizable: bool) {
        let mut node = candidate.node().clone();
        let requested_resources = self.requested.resources().copied().unwrap_or(node.resources);
        if let Some(allocation) = node.allocation.as_mut() {
            allocation.requested_resources = requested_resources;
        }
        match retirement {
            Retirement::None => {
                let retired = node.is_retired();
                if !(self.requested.needs_resize(&node)
                    && (retired || !self.requested.consider_retiring()))
                {
                    self.accepted_and_compatible += 1;
                }
                if self.has_compatible_resources(&candidate) {
                    self.accepted_and_compatible_or_resizable += 1;
                }
                if resizable && !retired {
                    node.resources = self.resized(&node);
                }
                if node.state != NodeState::Active {
                    // Not active, so not retired for a reason that still holds
                    node = node.unretire().with_removable(false);
                }
            }
            Retirement::AlreadyRetired => {}
            reason => {
                log::info!("Retiring {node}: {reason}");
                self.was_retired_just_now += 1;
                if reason == Retirement::ViolatesHostFlavor {
                    self.was_retired_due_to_flavor_upgrade += 1;
                }
                node = node.retire();
            }
        }
        if node.membership().is_some_and(|m| m.cluster != self.cluster) {
            let retired = node.is_retired();
            node = node.with_cluster(self.cluster.clone());
            if retired {
                node = node.retire();
            }
        }
        if let Some(membership) = node.membership() {
            self.used_indices.insert(membership.index);
        }
        self.positions
            .insert(candidate.hostname().to_string(), self.nodes.len());
        self.nodes.push(candidate.with_node(node));
    }

    /// Requested resources, keeping node properties the request leaves open.
    fn resized(&self, node: &Node) -> NodeResources {
        let Some(requested) = self.requested.resources() else {
            return node.resources;
        };
        let mut resources = *requested;
        if resources.disk_speed == DiskSpeed::Any {
            resources.disk_speed = node.resources.disk_speed;
        }
        if resources.storage_type == StorageType::Any {
            resources.storage_type = node.resources.storage_type;
        }
        resources
    }

    fn accepted_count(&self) -> u32 {
        if self.requested.node_type() == NodeType::Tenant {
            return self.accepted_and_compatible_or_resizable;
        }
        // Infrastructure types want every node of the type
        let node_type = self.requested.node_type();
        let existing = self
            .all_nodes
            .of_type(node_type)
            .filter(|n| !self.positions.contains_key(&n.hostname))
            .filter(|n| !matches!(n.state, NodeState::Deprovisioned | NodeState::Failed))
            .count() as u32;
        let accepted = self.nodes.iter().filter(|c| !c.node().is_retired()).count() as u32;
        existing + accepted
    }

    /// Returns true if no more nodes are needed.
    pub fn saturated(&self) -> bool {
        self.requested.saturated_by(self.accepted_and_compatible)
    }

    pub fn fulfilled(&self) -> bool {
        self.requested.fulfilled_by(self.accepted_count())
    }

    pub fn has_retired_just_now(&self) -> bool {
        self.was_retired_just_now > 0
    }

    /// Returns true if the request is fulfilled by exactly the nodes already allocated,
    /// so nothing needs to be written.
    pub fn fulfilled_and_no_changes(&mut self) -> bool {
        if !self.fulfilled() || self.was_retired_just_now > 0 {
            return false;
        }
        self.finalize();
        self.nodes.iter().all(|c| {
            !c.is_new()
                && c.state() != NodeState::Inactive
                && c.state() != NodeState::Ready
                && self.all_nodes.get(c.hostname()) == Some(c.node())
        })
    }

    /// Hosts needed to fulfill the request, if any. Host types are never provisioned
    /// through a deficit.
    pub fn host_deficit(&self) -> Option<HostDeficit> {
        if self.requested.node_type().is_host() {
            return None;
        }
        let count = self.requested.fulfilled_deficit_count(self.accepted_count());
        (count > 0).then(|| HostDeficit {
            count,
            resources: self
                .requested
                .resources()
                .copied()
                .unwrap_or_else(NodeResources::unspecified),
            due_to_flavor_upgrade: count == self.was_retired_due_to_flavor_upgrade,
        })
    }

    /// Indices for naming `count` hosts to provision for this allocation.
    pub fn provision_indices(
        &self,
        count: u32,
        repository: &dyn NodeRepository,
    ) -> Result<ProvisionIndices> {
        if count < 1 {
            return Err(Error::InvalidRequest(format!(
                "Cannot provision {count} hosts"
            )));
        }
        let host_type = self.requested.node_type().host_type();
        if host_type == NodeType::Host {
            return Ok(repository.next_provision_indices(count).into());
        }
        // Infrastructure hosts reuse the lowest free indices
        let used: Set<u32> = self
            .all_nodes
            .of_type(host_type)
            .filter_map(|h| trailing_index(&h.hostname))
            .collect();
        Ok((1..)
            .filter(|i| !used.contains(i))
            .take(count as usize)
            .collect())
    }

    pub fn allocation_failure_details(&self) -> NodeAllocationError {
        let accepted = self.accepted_count();
        let requested = self
            .requested
            .count()
            .unwrap_or_else(|| self.requested.fulfilled_deficit_count(0));
        let mut reasons = vec![ShortageReason::InsufficientNodes {
            missing: self.requested.fulfilled_deficit_count(accepted).max(1),
            resources: self
                .requested
                .resources()
                .copied()
                .unwrap_or_else(NodeResources::unspecified),
        }];
        if self.was_retired_just_now > 0 {
            reasons.push(ShortageReason::RetiredJustNow);
        }
        NodeAllocationError {
            application: self.application.clone(),
            cluster: self.cluster.clone(),
            requested,
            accepted,
            rejections: self.rejections.clone(),
            reasons,
        }
    }

    /// All accepted nodes, retired ones included.
    pub fn final_nodes(&mut self) -> Vec<Node> {
        self.finalize();
        self.nodes.iter().map(|c| c.node().clone()).collect()
    }

    /// Accepted nodes which exist and need a reservation write.
    pub fn reservable_nodes(&mut self) -> Vec<Node> {
        self.finalize();
        self.nodes
            .iter()
            .filter(|c| !c.is_new())
            .filter(|c| match c.state() {
                NodeState::Inactive | NodeState::Ready => true,
                NodeState::Reserved => self.all_nodes.get(c.hostname()) != Some(c.node()),
                _ => false,
            })
            .map(|c| c.node().clone())
            .collect()
    }

    /// Accepted nodes which do not exist yet.
    pub fn new_nodes(&mut self) -> Vec<Node> {
        self.finalize();
        self.nodes
            .iter()
            .filter(|c| c.is_new())
            .map(|c| c.node().clone())
            .collect()
    }

    /// Balances retirement so that the non-retired count matches the request, then
    /// stamps the cluster on every membership. Runs once.
    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let want_to_retire = self.nodes.iter().filter(|c| c.want_to_retire()).count() as u32;
        let currently_retired = self.nodes.iter().filter(|c| c.node().is_retired()).count() as u32;
        let mut delta = self.requested.ideal_retired_count(
            self.nodes.len() as u32,
            want_to_retire,
            currently_retired,
        );

        if delta > 0 {
            let mut order: Vec<usize> = (0..self.nodes.len()).collect();
            order.sort_by_key(|i| {
                let c = &self.nodes[*i];
                (
                    !c.want_to_retire(),
                    self.requested.is_compatible(c.resources()),
                    std::cmp::Reverse(c.membership_index()),
                )
            });
            for i in order {
                if delta == 0 {
                    break;
                }
                let node = self.nodes[i].node();
                if node.is_retired() || node.state != NodeState::Active {
                    continue;
                }
                let node = node.clone().retire();
                log::info!("Retiring {node}: cluster has more nodes than requested");
                self.replace_node(i, node);
                delta -= 1;
            }
        } else if delta < 0 {
            let mut order: Vec<usize> = (0..self.nodes.len()).collect();
            order.sort_by_key(|i| {
                let c = &self.nodes[*i];
                (
                    !self.requested.is_compatible(c.resources()),
                    c.membership_index(),
                )
            });
            for i in order {
                if delta == 0 {
                    break;
                }
                let candidate = &self.nodes[i];
                if !candidate.node().is_retired() || !self.has_compatible_resources(candidate) {
                    continue;
                }
                // Still has a reason to leave
                if !matches!(
                    self.should_retire(candidate),
                    Retirement::None | Retirement::AlreadyRetired
                ) {
                    continue;
                }
                let mut node = candidate.node().clone().unretire();
                if candidate.is_resizable() {
                    node.resources = self.resized(&node);
                }
                log::info!("Unretiring {node}");
                self.replace_node(i, node);
                delta += 1;
            }
        }

        for i in 0..self.nodes.len() {
            let node = self.nodes[i].node();
            if node
                .membership()
                .is_some_and(|m| m.cluster.exclusive != self.cluster.exclusive)
            {
                let mut node = node.clone();
                if let Some(allocation) = node.allocation.as_mut() {
                    allocation.membership.cluster.exclusive = self.cluster.exclusive;
                }
                self.replace_node(i, node);
            }
        }
    }

    fn replace_node(&mut self, i: usize, node: Node) {
        self.nodes[i].set_node(node);
    }
}
