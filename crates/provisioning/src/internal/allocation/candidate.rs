use std::fmt::{Display, Formatter};

use crate::internal::common::resources::NodeResources;
use crate::internal::model::node::{Allocation, Node, NodeState};

/// Where a candidate comes from. Earlier variants are preferred.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateSource {
    /// Non-retired member of the requested cluster.
    Member,
    /// Retired member of the requested cluster.
    RetiredMember,
    /// Active in another group of the application, free to move here.
    Surplus,
    /// Unallocated node which already exists.
    Ready,
    /// Node that does not exist yet: a new child on an existing or new host.
    New,
}

/// A node considered for allocation, with the metadata needed to rank and accept it.
#[derive(Clone, Debug)]
pub struct NodeCandidate {
    node: Node,
    parent: Option<Node>,
    /// Free capacity on the parent, not counting this node.
    free_parent_capacity: NodeResources,
    source: CandidateSource,
    is_new: bool,
    violates_spares: bool,
    is_resizable: bool,
}

impl NodeCandidate {
    pub fn existing(
        node: Node,
        parent: Option<Node>,
        free_parent_capacity: NodeResources,
        source: CandidateSource,
        violates_spares: bool,
        is_resizable: bool,
    ) -> Self {
        NodeCandidate {
            node,
            parent,
            free_parent_capacity,
            source,
            is_new: false,
            violates_spares,
            is_resizable,
        }
    }

    /// A child which does not exist yet, on an existing host.
    pub fn new_child(
        node: Node,
        host: Node,
        free_parent_capacity: NodeResources,
        violates_spares: bool,
    ) -> Self {
        NodeCandidate {
            node,
            parent: Some(host),
            free_parent_capacity,
            source: CandidateSource::New,
            is_new: true,
            violates_spares,
            is_resizable: false,
        }
    }

    /// A child on a host that was just provisioned for this allocation.
    pub fn new_provisioned_child(node: Node, host: Node) -> Self {
        let free_parent_capacity = host.resources.subtract(&node.resources);
        NodeCandidate {
            node,
            parent: Some(host),
            free_parent_capacity,
            source: CandidateSource::New,
            is_new: true,
            violates_spares: false,
            is_resizable: false,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn parent(&self) -> Option<&Node> {
        self.parent.as_ref()
    }

    pub fn hostname(&self) -> &str {
        &self.node.hostname
    }

    pub fn state(&self) -> NodeState {
        self.node.state
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.node.allocation.as_ref()
    }

    pub fn resources(&self) -> &NodeResources {
        &self.node.resources
    }

    pub fn free_parent_capacity(&self) -> &NodeResources {
        &self.free_parent_capacity
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }

    /// Not yet stored in the repository.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_surplus(&self) -> bool {
        self.source == CandidateSource::Surplus
    }

    pub fn violates_spares(&self) -> bool {
        self.violates_spares
    }

    pub fn is_resizable(&self) -> bool {
        self.is_resizable
    }

    /// The node itself, or its host, has been asked to retire.
    pub fn want_to_retire(&self) -> bool {
        self.node.status.want_to_retire
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.status.want_to_retire || p.status.want_to_deprovision)
    }

    pub fn parent_wants_flavor_upgrade(&self) -> bool {
        self.parent
            .as_ref()
            .is_some_and(|p| p.status.want_to_upgrade_flavor)
    }

    pub fn membership_index(&self) -> Option<u32> {
        self.node.membership().map(|m| m.index)
    }

    pub(crate) fn with_node(mut self, node: Node) -> Self {
        self.set_node(node);
        self
    }

    pub(crate) fn set_node(&mut self, node: Node) {
        debug_assert_eq!(node.hostname, self.node.hostname);
        self.node = node;
    }
}

impl Display for NodeCandidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node)?;
        if let Some(parent) = &self.parent {
            write!(f, " on {}", parent.hostname)?;
        }
        if self.is_new {
            f.write_str(" (new)")?;
        }
        Ok(())
    }
}
