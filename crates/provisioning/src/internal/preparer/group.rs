use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::internal::allocation::candidate::NodeCandidate;
use crate::internal::allocation::indices::{Committing, IndexSupply, NodeIndices, Probing};
use crate::internal::allocation::nodeallocation::{HostDeficit, NodeAllocation};
use crate::internal::allocation::prioritizer::NodePrioritizer;
use crate::internal::common::ids::{Agent, ApplicationId};
use crate::internal::common::version::Version;
use crate::internal::common::{Map, Set};
use crate::internal::model::cluster::ClusterSpec;
use crate::internal::model::node::{Node, NodeType};
use crate::internal::model::nodelist::NodeList;
use crate::internal::model::nodespec::NodeSpec;
use crate::internal::preparer::request::{
    HostProvisionRequest, HostProvisioner, HostSharing, ProvisionedHost,
};
use crate::internal::repository::{NodeRepository, UnallocatedLock};
use crate::Result;

#[derive(Clone, Debug)]
pub struct PreparerConfig {
    /// Provisioning calls holding the allocation locks longer than this are reported.
    pub slow_provisioning_warning: Duration,
}

impl Default for PreparerConfig {
    fn default() -> Self {
        PreparerConfig {
            slow_provisioning_warning: Duration::from_secs(30),
        }
    }
}

/// Result of one locked allocation attempt.
enum AttemptOutcome {
    Committed(Vec<Node>),
    /// The request fell short because this attempt retired nodes; try again keeping them.
    RetryWithoutRetirement(NodeSpec),
}

/// Prepares nodes for one group of a cluster.
///
/// A first pass runs without locks against a possibly stale snapshot. If it shows that the
/// nodes already allocated satisfy the request unchanged, they are returned as they are.
/// Otherwise the allocation is redone under the application lock and the unallocated lock,
/// provisioning hosts if needed, and the result is reserved.
pub struct GroupPreparer {
    repository: Arc<dyn NodeRepository>,
    provisioner: Option<Arc<dyn HostProvisioner>>,
    config: PreparerConfig,
}

impl GroupPreparer {
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        provisioner: Option<Arc<dyn HostProvisioner>>,
        config: PreparerConfig,
    ) -> Self {
        GroupPreparer {
            repository,
            provisioner,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<dyn NodeRepository> {
        &self.repository
    }

    /// Ensures the group has the requested nodes reserved and returns all nodes accepted
    /// for it, including retired ones. Accepted nodes are removed from `surplus_active`.
    pub fn prepare(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
        surplus_active: &mut Vec<Node>,
        indices: &mut NodeIndices,
    ) -> Result<Vec<Node>> {
        let probe_nodes = self.repository.list();
        let unchanged = {
            let mut allocation = self.prepare_allocation(
                application,
                cluster,
                requested,
                surplus_active,
                &probe_nodes,
                Probing(indices),
            );
            if allocation.fulfilled_and_no_changes() {
                Some(allocation.final_nodes())
            } else {
                None
            }
        };
        if let Some(accepted) = unchanged {
            indices.commit_probe();
            log::debug!(
                "{} nodes of {application} {cluster} are unchanged, no locking needed",
                accepted.len()
            );
            remove_accepted(surplus_active, &accepted);
            return Ok(accepted);
        }
        indices.reset_probe();
        log::debug!("Preparing {application} {cluster} under lock");
        self.prepare_with_locks(application, cluster, requested, surplus_active, indices)
    }

    fn prepare_with_locks(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
        surplus_active: &mut Vec<Node>,
        indices: &mut NodeIndices,
    ) -> Result<Vec<Node>> {
        let application_lock = self.repository.lock_application(application)?;
        let lock = self.repository.lock_unallocated(&application_lock)?;

        let mut requested = requested.clone();
        let mut allow_retry = true;
        loop {
            let all_nodes = self.repository.list_locked(&lock);
            // Indices handed out by a failed attempt are never kept
            *indices = NodeIndices::new(all_nodes.used_indices(application, &cluster.id));
            let outcome = self.allocate_locked(
                application,
                cluster,
                &requested,
                surplus_active,
                &all_nodes,
                indices,
                &lock,
                allow_retry,
            )?;
            match outcome {
                AttemptOutcome::Committed(accepted) => {
                    remove_accepted(surplus_active, &accepted);
                    return Ok(accepted);
                }
                AttemptOutcome::RetryWithoutRetirement(relaxed) => {
                    log::info!(
                        "Not enough capacity for {application} {cluster} after retiring nodes, retrying without retirement"
                    );
                    requested = relaxed;
                    allow_retry = false;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_locked(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
        surplus_active: &[Node],
        all_nodes: &NodeList,
        indices: &mut NodeIndices,
        lock: &UnallocatedLock<'_>,
        allow_retry: bool,
    ) -> Result<AttemptOutcome> {
        let mut allocation = self.prepare_allocation(
            application,
            cluster,
            requested,
            surplus_active,
            all_nodes,
            Committing(indices),
        );

        if let Some(deficit) = allocation.host_deficit() {
            if let Some(provisioner) = self.provisioner_for(allocation.node_type()) {
                self.provision_hosts(provisioner, &mut allocation, &deficit, lock)?;
            } else if allow_retry && requested.can_fail() && allocation.has_retired_just_now() {
                // Only zones which cannot provision keep nodes they wanted to retire
                if let Some(relaxed) = requested.without_retiring() {
                    return Ok(AttemptOutcome::RetryWithoutRetirement(relaxed));
                }
            }
        }

        if !allocation.fulfilled() && requested.can_fail() {
            let details = allocation.allocation_failure_details();
            log::warn!("{details}");
            return Err(details.into());
        }

        let reserved = self.repository.reserve(allocation.reservable_nodes(), lock)?;
        let added = self
            .repository
            .add_reserved_nodes(allocation.new_nodes(), lock)?;
        let mut written: Map<String, Node> = reserved
            .into_iter()
            .chain(added)
            .map(|n| (n.hostname.clone(), n))
            .collect();
        let accepted = allocation
            .final_nodes()
            .into_iter()
            .map(|n| written.remove(&n.hostname).unwrap_or(n))
            .collect::<Vec<_>>();
        log::debug!(
            "Reserved {} nodes for {application} {cluster}",
            accepted.len()
        );
        Ok(AttemptOutcome::Committed(accepted))
    }

    /// Builds candidates from `all_nodes` and offers them to a fresh allocation. Used both
    /// for the unlocked probe and for the locked attempts, which only differ in how
    /// indices are handed out.
    pub fn prepare_allocation<'n, S: IndexSupply>(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
        surplus_active: &[Node],
        all_nodes: &'n NodeList,
        indices: S,
    ) -> NodeAllocation<'n, S> {
        let exclusive = self.repository.exclusive_allocation(cluster);
        let exclave = self.repository.is_exclave(requested.cloud_account());
        let prioritized = NodePrioritizer::new(
            all_nodes,
            application,
            cluster,
            requested,
            self.repository.dynamic_provisioning(),
            self.repository.spare_count(),
            exclusive,
            exclave,
        )
        .collect(surplus_active);

        let mut allocation = NodeAllocation::new(
            all_nodes,
            application.clone(),
            cluster.clone(),
            requested.clone(),
            exclusive,
            indices,
        );
        allocation.exclude(prioritized.exclusions);
        allocation.offer(prioritized.candidates);
        allocation
    }

    fn provisioner_for(&self, node_type: NodeType) -> Option<&dyn HostProvisioner> {
        if !self.repository.dynamic_provisioning() {
            return None;
        }
        let host_type = node_type.host_type();
        if host_type != NodeType::Host && !host_type.is_config_server_host_like() {
            return None;
        }
        self.provisioner.as_deref()
    }

    /// Provisions hosts for the deficit and offers their children to `allocation`.
    ///
    /// Hosts are stored as they are delivered. If provisioning fails, every host stored
    /// for this request is marked for deprovisioning and the failure is returned.
    fn provision_hosts<S: IndexSupply>(
        &self,
        provisioner: &dyn HostProvisioner,
        allocation: &mut NodeAllocation<'_, S>,
        deficit: &HostDeficit,
        lock: &UnallocatedLock<'_>,
    ) -> Result<()> {
        let cluster = allocation.cluster().clone();
        let requested = allocation.requested().clone();
        let host_type = allocation.node_type().host_type();
        let sharing = if host_type.is_sharable() && self.repository.exclusive_allocation(&cluster)
        {
            HostSharing::Exclusive
        } else {
            HostSharing::Any
        };
        let indices = allocation.provision_indices(deficit.count, self.repository.as_ref())?;
        let request = HostProvisionRequest::new(
            indices,
            host_type,
            deficit.resources,
            allocation.application().clone(),
            self.repository
                .os_version_target(host_type)
                .unwrap_or(Version::EMPTY),
            sharing,
        )?
        .with_cluster(cluster.cluster_type, cluster.id.clone())
        .with_cloud_account(requested.cloud_account().clone())
        .with_flavor_upgrade(deficit.due_to_flavor_upgrade);

        log::info!(
            "Provisioning {} {} host(s) with {} for {} {cluster}",
            request.count(),
            host_type,
            deficit.resources,
            request.owner()
        );

        let host_ttl = requested.host_ttl();
        let repository = self.repository.as_ref();
        let mut persisted: Vec<String> = Vec::new();
        let started = Instant::now();
        let result = provisioner.provision_hosts(&request, &mut |hosts: Vec<ProvisionedHost>| {
            let host_nodes = hosts.iter().map(|h| h.generate_host(host_ttl)).collect();
            let added = repository.add_nodes(host_nodes, Agent::Application, lock)?;
            persisted.extend(added.into_iter().map(|h| h.hostname));
            allocation.offer(hosts.iter().map(|h| {
                NodeCandidate::new_provisioned_child(h.generate_node(), h.generate_host(host_ttl))
            }));
            Ok(())
        });

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_provisioning_warning {
            log::warn!(
                "Provisioning hosts for {} {cluster} held the allocation locks for {elapsed:?}",
                request.owner()
            );
        }

        if let Err(error) = result {
            log::error!(
                "Provisioning hosts for {} {cluster} failed: {error}",
                request.owner()
            );
            let now = repository.now();
            for hostname in &persisted {
                if let Err(e) = repository.deprovision(hostname, Agent::System, now, lock) {
                    log::error!("Could not mark {hostname} for deprovisioning: {e}");
                }
            }
            return Err(error);
        }
        Ok(())
    }
}

fn remove_accepted(surplus_active: &mut Vec<Node>, accepted: &[Node]) {
    let accepted: Set<&str> = accepted.iter().map(|n| n.hostname.as_str()).collect();
    surplus_active.retain(|n| !accepted.contains(n.hostname.as_str()));
}
