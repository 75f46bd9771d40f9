use crate::internal::allocation::candidate::{CandidateSource, NodeCandidate};
use crate::internal::allocation::capacity::HostCapacity;
use crate::internal::common::error::{Rejection, ShortageReason};
use crate::internal::common::ids::ApplicationId;
use crate::internal::common::resources::NodeResources;
use crate::internal::common::Set;
use crate::internal::model::cluster::ClusterSpec;
use crate::internal::model::node::{Node, NodeState, NodeType};
use crate::internal::model::nodelist::NodeList;
use crate::internal::model::nodespec::NodeSpec;

/// Candidates in priority order, plus the nodes that were excluded by hard constraints.
#[derive(Debug, Default)]
pub struct Prioritized {
    pub candidates: Vec<NodeCandidate>,
    pub exclusions: Vec<Rejection>,
}

/// Builds a list of all candidates for a cluster and ranks them.
pub struct NodePrioritizer<'a> {
    all_nodes: &'a NodeList,
    capacity: HostCapacity<'a>,
    application: &'a ApplicationId,
    cluster: &'a ClusterSpec,
    requested: &'a NodeSpec,
    dynamic_provisioning: bool,
    exclusive: bool,
    spare_hosts: Set<String>,
    topology_change: bool,
    current_cluster_size: u32,
    can_allocate_new: bool,
    can_allocate_to_spare_hosts: bool,
    added: Set<String>,
    result: Prioritized,
}

impl<'a> NodePrioritizer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        all_nodes: &'a NodeList,
        application: &'a ApplicationId,
        cluster: &'a ClusterSpec,
        requested: &'a NodeSpec,
        dynamic_provisioning: bool,
        spare_count: usize,
        exclusive: bool,
        exclave: bool,
    ) -> Self {
        let capacity = HostCapacity::new(all_nodes);
        let spare_hosts = capacity.find_spare_hosts(spare_count, dynamic_provisioning);

        let members: Vec<&Node> = all_nodes
            .iter()
            .filter(|n| n.is_member_of(application, cluster))
            .collect();
        let active_members = members
            .iter()
            .filter(|n| n.state == NodeState::Active && !n.is_retired());
        let mut current_groups: Vec<Option<u32>> = active_members
            .clone()
            .filter_map(|n| n.membership().map(|m| m.cluster.group))
            .collect();
        current_groups.sort_unstable();
        current_groups.dedup();
        let topology_change = current_groups.len() as u32 != requested.groups();
        let current_cluster_size = active_members
            .filter(|n| n.membership().is_some_and(|m| m.cluster.group == cluster.group))
            .count() as u32;

        // Spare hosts are only touched to replace failed nodes, unless capacity can be
        // provisioned on demand
        let is_replacement = members.iter().any(|n| {
            n.state == NodeState::Failed
                && n.membership().is_some_and(|m| m.cluster.group == cluster.group)
        });
        let can_allocate_to_spare_hosts = dynamic_provisioning || is_replacement;

        // Exclusive clusters in dynamically provisioned zones get new hosts instead
        let exclusive = exclusive || requested.is_exclusive();
        let can_allocate_new = matches!(requested, NodeSpec::Count(_))
            && (!dynamic_provisioning || !exclusive)
            && !exclave;

        NodePrioritizer {
            all_nodes,
            capacity,
            application,
            cluster,
            requested,
            dynamic_provisioning,
            exclusive,
            spare_hosts,
            topology_change,
            current_cluster_size,
            can_allocate_new,
            can_allocate_to_spare_hosts,
            added: Set::default(),
            result: Prioritized::default(),
        }
    }

    /// Collects all candidates for this cluster, most preferred first.
    pub fn collect(mut self, surplus_active: &[Node]) -> Prioritized {
        self.add_application_nodes();
        self.add_surplus_nodes(surplus_active);
        self.add_ready_nodes();
        self.add_candidates_on_existing_hosts();
        self.prioritize();
        log::debug!(
            "Prioritized {} candidates for {} {}, excluded {}",
            self.result.candidates.len(),
            self.application,
            self.cluster,
            self.result.exclusions.len()
        );
        self.result
    }

    fn prioritize(&mut self) {
        let requested = self.requested;
        let application = self.application;
        let prefer_exclusive = self.exclusive;
        self.result.candidates.sort_by_cached_key(|c| {
            let exact_match = requested.is_compatible(c.resources());
            let on_own_exclusive_host = prefer_exclusive
                && c.parent()
                    .and_then(|p| p.exclusive_to.as_ref())
                    .is_some_and(|owner| owner == application);
            let state_rank = match c.state() {
                NodeState::Active => 0,
                NodeState::Reserved => 1,
                NodeState::Inactive => 2,
                NodeState::Ready => 3,
                _ => 4,
            };
            (
                c.source() != CandidateSource::Member,
                !exact_match,
                c.source(),
                !on_own_exclusive_host,
                c.violates_spares(),
                state_rank,
                c.membership_index().unwrap_or(u32::MAX),
                c.hostname().to_string(),
            )
        });
    }

    fn exclude(&mut self, hostname: &str, reason: ShortageReason) {
        self.result.exclusions.push(Rejection::new(hostname, reason));
    }

    fn account_matches(&self, node: &Node) -> bool {
        let requested = self.requested.cloud_account();
        if requested.is_unspecified() {
            return true;
        }
        let account = self
            .all_nodes
            .parent_of(node)
            .map(|p| &p.cloud_account)
            .unwrap_or(&node.cloud_account);
        account == requested
    }

    fn push(&mut self, candidate: NodeCandidate) {
        if self.added.insert(candidate.hostname().to_string()) {
            self.result.candidates.push(candidate);
        }
    }

    /// Nodes already allocated to this cluster group.
    fn add_application_nodes(&mut self) {
        let node_type = self.requested.node_type();
        let candidates: Vec<NodeCandidate> = self
            .all_nodes
            .cluster(self.application, &self.cluster.id)
            .filter(|n| n.node_type == node_type)
            .filter(|n| {
                matches!(
                    n.state,
                    NodeState::Active | NodeState::Inactive | NodeState::Reserved
                )
            })
            .filter(|n| n.membership().is_some_and(|m| m.cluster.group == self.cluster.group))
            .map(|n| {
                let source = if n.is_retired() {
                    CandidateSource::RetiredMember
                } else {
                    CandidateSource::Member
                };
                self.candidate_from(n, source)
            })
            .collect();
        for candidate in candidates {
            self.push(candidate);
        }
    }

    fn add_surplus_nodes(&mut self, surplus_active: &[Node]) {
        for node in surplus_active {
            let candidate = self.candidate_from(node, CandidateSource::Surplus);
            if candidate.violates_spares() && !self.can_allocate_to_spare_hosts {
                self.exclude(&node.hostname, ShortageReason::SpareCapacity);
                continue;
            }
            self.push(candidate);
        }
    }

    /// Unallocated nodes that already exist.
    fn add_ready_nodes(&mut self) {
        let all_nodes = self.all_nodes;
        let node_type = self.requested.node_type();
        let ready: Vec<&Node> = all_nodes
            .in_state(NodeState::Ready)
            .filter(|n| n.node_type == node_type && n.allocation.is_none())
            .collect();
        for node in ready {
            if !self.account_matches(node) {
                self.exclude(&node.hostname, ShortageReason::CloudAccount);
                continue;
            }
            let candidate = self.candidate_from(node, CandidateSource::Ready);
            if candidate.violates_spares() && !self.can_allocate_to_spare_hosts {
                self.exclude(&node.hostname, ShortageReason::SpareCapacity);
                continue;
            }
            self.push(candidate);
        }
    }

    /// One new child on each host with room for the requested resources.
    fn add_candidates_on_existing_hosts(&mut self) {
        if !self.can_allocate_new {
            return;
        }
        let Some(requested) = self.requested.resources().copied() else {
            return;
        };
        let all_nodes = self.all_nodes;
        let requested_account = self.requested.cloud_account().clone();
        let hosts: Vec<&Node> = all_nodes
            .of_type(NodeType::Host)
            .filter(|h| HostCapacity::can_host_children(h, self.dynamic_provisioning))
            .collect();
        for host in hosts {
            if host.exclusive_to.as_ref().is_some_and(|owner| owner != self.application) {
                self.exclude(&host.hostname, ShortageReason::HostExclusivity);
                continue;
            }
            if host
                .exclusive_to_cluster_type
                .is_some_and(|t| t != self.cluster.cluster_type)
            {
                self.exclude(&host.hostname, ShortageReason::HostExclusivity);
                continue;
            }
            if self.spare_hosts.contains(&host.hostname) && !self.can_allocate_to_spare_hosts {
                self.exclude(&host.hostname, ShortageReason::SpareCapacity);
                continue;
            }
            if !requested_account.is_unspecified() && requested_account != host.cloud_account {
                self.exclude(&host.hostname, ShortageReason::CloudAccount);
                continue;
            }
            if !self.capacity.has_capacity(host, &requested) {
                self.exclude(&host.hostname, ShortageReason::InsufficientHostCapacity);
                continue;
            }
            // One node per host and cluster
            if all_nodes
                .children_of(&host.hostname)
                .any(|c| c.is_member_of(self.application, self.cluster))
            {
                continue;
            }
            let node = self.new_child_node(host, requested);
            let candidate = NodeCandidate::new_child(
                node,
                host.clone(),
                self.capacity.free_capacity_of(host),
                self.spare_hosts.contains(&host.hostname),
            );
            self.push(candidate);
        }
    }

    fn new_child_node(&self, host: &Node, resources: NodeResources) -> Node {
        let mut suffix = 1;
        let hostname = loop {
            let hostname = format!("{}-{}", host.hostname, suffix);
            if !self.all_nodes.contains(&hostname) {
                break hostname;
            }
            suffix += 1;
        };
        Node {
            hostname,
            parent_hostname: Some(host.hostname.clone()),
            node_type: host.node_type.child_type(),
            resources,
            state: NodeState::Reserved,
            allocation: None,
            cloud_account: host.cloud_account.clone(),
            exclusive_to: None,
            exclusive_to_cluster_type: None,
            status: Default::default(),
            host_ttl: None,
            container_image: None,
        }
    }

    fn candidate_from(&self, node: &Node, source: CandidateSource) -> NodeCandidate {
        match self.all_nodes.parent_of(node) {
            Some(parent) => {
                let free = self.capacity.free_capacity_of(parent);
                let resizable = node.allocation.is_some()
                    && parent.exclusive_to.is_none()
                    && self.requested.can_resize(
                        &node.resources,
                        &free,
                        self.cluster.cluster_type,
                        self.topology_change,
                        self.current_cluster_size,
                    );
                NodeCandidate::existing(
                    node.clone(),
                    Some(parent.clone()),
                    free,
                    source,
                    self.spare_hosts.contains(&parent.hostname),
                    resizable,
                )
            }
            None => NodeCandidate::existing(
                node.clone(),
                None,
                NodeResources::unspecified(),
                source,
                false,
                false,
            ),
        }
    }
}
