use crate::internal::allocation::indices::{Committing, NodeIndices};
use crate::internal::allocation::nodeallocation::NodeAllocation;
use crate::internal::allocation::prioritizer::NodePrioritizer;
use crate::internal::common::ids::ApplicationId;
use crate::internal::common::resources::NodeResources;
use crate::internal::model::cluster::{ClusterId, ClusterMembership, ClusterSpec, ClusterType};
use crate::internal::model::node::{Node, NodeState, NodeType};
use crate::internal::model::nodelist::NodeList;
use crate::internal::model::nodespec::{CountNodeSpec, NodeSpec};

pub fn resources(vcpu: f64) -> NodeResources {
    NodeResources::new(vcpu, vcpu * 4.0, vcpu * 25.0, vcpu / 2.0)
}

pub fn app(name: &str) -> ApplicationId {
    ApplicationId::new("tenant", name, "default")
}

pub fn container(id: &str) -> ClusterSpec {
    ClusterSpec::new(ClusterType::Container, ClusterId::new(id)).with_group(Some(0))
}

pub fn content(id: &str) -> ClusterSpec {
    ClusterSpec::new(ClusterType::Content, ClusterId::new(id)).with_group(Some(0))
}

pub fn host(name: &str, vcpu: f64) -> Node {
    Node::builder()
        .hostname(name)
        .node_type(NodeType::Host)
        .resources(resources(vcpu))
        .state(NodeState::Active)
        .build()
        .unwrap()
}

pub fn child(name: &str, parent: &str, vcpu: f64) -> Node {
    Node::builder()
        .hostname(name)
        .parent_hostname(parent)
        .node_type(NodeType::Tenant)
        .resources(resources(vcpu))
        .build()
        .unwrap()
}

/// An active member of the cluster.
pub fn member(node: Node, application: &ApplicationId, cluster: &ClusterSpec, index: u32) -> Node {
    let requested = node.resources;
    node.with_state(NodeState::Active).allocate(
        application.clone(),
        ClusterMembership::new(cluster.clone(), index),
        requested,
    )
}

pub fn count_spec(count: u32, vcpu: f64) -> NodeSpec {
    CountNodeSpec::builder(count)
        .resources(resources(vcpu))
        .build()
        .unwrap()
        .into()
}

/// Prioritizes and offers all candidates, like one locked preparation attempt.
pub fn allocate<'a>(
    nodes: &'a NodeList,
    indices: &'a mut NodeIndices,
    application: &ApplicationId,
    cluster: &ClusterSpec,
    requested: &NodeSpec,
    surplus: &[Node],
) -> NodeAllocation<'a, Committing<'a>> {
    let prioritized =
        NodePrioritizer::new(nodes, application, cluster, requested, false, 0, false, false)
            .collect(surplus);
    let mut allocation = NodeAllocation::new(
        nodes,
        application.clone(),
        cluster.clone(),
        requested.clone(),
        false,
        Committing(indices),
    );
    allocation.exclude(prioritized.exclusions);
    allocation.offer(prioritized.candidates);
    allocation
}

pub fn hostnames(nodes: &[Node]) -> Vec<&str> {
    let mut names: Vec<&str> = nodes.iter().map(|n| n.hostname.as_str()).collect();
    names.sort_unstable();
    names
}
