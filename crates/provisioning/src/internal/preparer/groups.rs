use std::sync::Arc;

use crate::internal::allocation::indices::NodeIndices;
use crate::internal::common::ids::ApplicationId;
use crate::internal::model::cluster::ClusterSpec;
use crate::internal::model::node::{Node, NodeState};
use crate::internal::model::nodelist::NodeList;
use crate::internal::model::nodespec::NodeSpec;
use crate::internal::preparer::group::{GroupPreparer, PreparerConfig};
use crate::internal::preparer::request::HostProvisioner;
use crate::internal::repository::NodeRepository;
use crate::Result;

/// Prepares all groups of a cluster.
pub struct Preparer {
    group_preparer: GroupPreparer,
}

impl Preparer {
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        provisioner: Option<Arc<dyn HostProvisioner>>,
        config: PreparerConfig,
    ) -> Self {
        Preparer {
            group_preparer: GroupPreparer::new(repository, provisioner, config),
        }
    }

    /// Reserves nodes for every wanted group of the cluster and returns them.
    ///
    /// Active nodes in groups which are no longer wanted are moved to other groups when
    /// possible, and returned retired otherwise.
    pub fn prepare(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
    ) -> Result<Vec<Node>> {
        let groups = requested.groups().max(1);
        let all_nodes = self.group_preparer.repository().list();
        let mut surplus = find_nodes_in_removable_groups(&all_nodes, application, cluster, groups);
        let mut indices = NodeIndices::new(all_nodes.used_indices(application, &cluster.id));
        let group_spec = requested.fraction(groups);

        let mut accepted = Vec::new();
        for group in 0..groups {
            let group_cluster = cluster.clone().with_group(Some(group));
            let nodes = self.group_preparer.prepare(
                application,
                &group_cluster,
                &group_spec,
                &mut surplus,
                &mut indices,
            )?;
            accepted.extend(nodes);
        }

        if !surplus.is_empty() {
            log::info!(
                "Retiring {} nodes of {application} {cluster} in removed groups",
                surplus.len()
            );
        }
        accepted.extend(surplus.into_iter().map(|n| n.retire()));
        Ok(accepted)
    }
}

/// Active nodes of the cluster in groups with an index of at least `wanted_groups`.
fn find_nodes_in_removable_groups(
    all_nodes: &NodeList,
    application: &ApplicationId,
    cluster: &ClusterSpec,
    wanted_groups: u32,
) -> Vec<Node> {
    all_nodes
        .owned_by(application)
        .filter(|n| n.state == NodeState::Active)
        .filter(|n| {
            n.membership().is_some_and(|m| {
                m.cluster.satisfies(cluster) && m.cluster.group.is_some_and(|g| g >= wanted_groups)
            })
        })
        .cloned()
        .collect()
}
