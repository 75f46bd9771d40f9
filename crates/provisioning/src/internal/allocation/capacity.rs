use crate::internal::common::Set;
use crate::internal::common::resources::NodeResources;
use crate::internal::model::node::{Node, NodeState, NodeType};
use crate::internal::model::nodelist::NodeList;

/// Capacity calculations for the hosts of a node snapshot.
pub struct HostCapacity<'a> {
    all_nodes: &'a NodeList,
}

impl<'a> HostCapacity<'a> {
    pub fn new(all_nodes: &'a NodeList) -> Self {
        HostCapacity { all_nodes }
    }

    /// Host resources not used by any of its children.
    pub fn free_capacity_of(&self, host: &Node) -> NodeResources {
        self.all_nodes
            .children_of(&host.hostname)
            .fold(host.resources, |free, child| free.subtract(&child.resources))
    }

    pub fn has_capacity(&self, host: &Node, requested: &NodeResources) -> bool {
        self.free_capacity_of(host).satisfies(requested)
    }

    /// Hosts that may receive new tenant children.
    pub fn can_host_children(host: &Node, dynamic_provisioning: bool) -> bool {
        if host.node_type != NodeType::Host {
            return false;
        }
        if host.status.want_to_retire || host.status.want_to_deprovision {
            return false;
        }
        match host.state {
            NodeState::Active => true,
            NodeState::Provisioned | NodeState::Ready => dynamic_provisioning,
            _ => false,
        }
    }

    /// Spare hosts are the `spare_count` hosts with the most free capacity. They are kept
    /// empty so failed nodes can always be replaced. Zones with dynamic provisioning
    /// create capacity on demand and keep no spares.
    pub fn find_spare_hosts(&self, spare_count: usize, dynamic_provisioning: bool) -> Set<String> {
        if dynamic_provisioning || spare_count == 0 {
            return Set::default();
        }
        let mut hosts: Vec<(&Node, NodeResources)> = self
            .all_nodes
            .of_type(NodeType::Host)
            .filter(|host| Self::can_host_children(host, false))
            .filter(|host| host.exclusive_to.is_none())
            .map(|host| (host, self.free_capacity_of(host)))
            .collect();
        hosts.sort_by(|(a, a_free), (b, b_free)| {
            b_free
                .magnitude()
                .cmp(&a_free.magnitude())
                .then_with(|| a.hostname.cmp(&b.hostname))
        });
        hosts
            .into_iter()
            .take(spare_count)
            .map(|(host, _)| host.hostname.clone())
            .collect()
    }
}
