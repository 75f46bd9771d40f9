use crate::internal::common::Map;
use crate::internal::common::ids::ApplicationId;
use crate::internal::model::cluster::ClusterId;
use crate::internal::model::node::{Node, NodeState, NodeType};

/// Immutable snapshot of the nodes in a repository.
///
/// Obtained either without locks (a probe snapshot, possibly stale) or under the unallocated
/// lock; see [`crate::repository::NodeRepository`].
#[derive(Debug, Default, Clone)]
pub struct NodeList {
    nodes: Vec<Node>,
    positions: Map<String, usize>,
    children: Map<String, Vec<usize>>,
}

impl NodeList {
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut positions = Map::with_capacity_and_hasher(nodes.len(), Default::default());
        let mut children: Map<String, Vec<usize>> = Map::default();
        for (i, node) in nodes.iter().enumerate() {
            positions.insert(node.hostname.clone(), i);
            if let Some(parent) = &node.parent_hostname {
                children.entry(parent.clone()).or_default().push(i);
            }
        }
        NodeList {
            nodes,
            positions,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get(&self, hostname: &str) -> Option<&Node> {
        self.positions.get(hostname).map(|i| &self.nodes[*i])
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.positions.contains_key(hostname)
    }

    pub fn parent_of(&self, node: &Node) -> Option<&Node> {
        node.parent_hostname.as_deref().and_then(|p| self.get(p))
    }

    /// Children of the given host which still occupy capacity on it.
    pub fn children_of<'a>(&'a self, hostname: &str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children
            .get(hostname)
            .map(|c| c.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|i| &self.nodes[*i])
            .filter(|n| n.state != NodeState::Deprovisioned)
    }

    pub fn of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    pub fn in_state(&self, state: NodeState) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.state == state)
    }

    pub fn owned_by<'a>(&'a self, application: &'a ApplicationId) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.is_owned_by(application))
    }

    /// Nodes allocated to the application in the cluster with the given id, any group.
    pub fn cluster<'a>(
        &'a self,
        application: &'a ApplicationId,
        cluster_id: &'a ClusterId,
    ) -> impl Iterator<Item = &'a Node> {
        self.owned_by(application)
            .filter(move |n| n.membership().is_some_and(|m| &m.cluster.id == cluster_id))
    }

    /// Membership indices currently in use by the cluster.
    pub fn used_indices(&self, application: &ApplicationId, cluster_id: &ClusterId) -> Vec<u32> {
        self.cluster(application, cluster_id)
            .filter_map(|n| n.membership().map(|m| m.index))
            .collect()
    }

    pub fn into_vec(self) -> Vec<Node> {
        self.nodes
    }
}

impl FromIterator<Node> for NodeList {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        NodeList::new(iter.into_iter().collect())
    }
}
