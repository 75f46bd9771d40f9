use std::time::Duration;

use crate::internal::allocation::nodeallocation::ProvisionIndices;
use crate::internal::common::ids::{ApplicationId, CloudAccount};
use crate::internal::common::resources::NodeResources;
use crate::internal::common::version::Version;
use crate::internal::model::cluster::{ClusterId, ClusterType};
use crate::internal::model::node::{Node, NodeState, NodeType};
use crate::{Error, Result};

/// Whether provisioned hosts may be shared with other applications.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HostSharing {
    /// Whatever the provisioner prefers.
    #[default]
    Any,
    /// Hosts are dedicated to the requesting application.
    Exclusive,
    /// Hosts may run children of other applications.
    Shared,
}

/// A request to create hosts, answered through a callback.
#[derive(Clone, Debug, PartialEq)]
pub struct HostProvisionRequest {
    indices: ProvisionIndices,
    host_type: NodeType,
    resources: NodeResources,
    owner: ApplicationId,
    os_version: Version,
    sharing: HostSharing,
    cluster_type: Option<ClusterType>,
    cluster_id: Option<ClusterId>,
    cloud_account: CloudAccount,
    due_to_flavor_upgrade: bool,
}

impl HostProvisionRequest {
    pub fn new(
        indices: ProvisionIndices,
        host_type: NodeType,
        resources: NodeResources,
        owner: ApplicationId,
        os_version: Version,
        sharing: HostSharing,
    ) -> Result<Self> {
        if indices.is_empty() {
            return Err(Error::InvalidRequest(
                "At least one host index is required".to_string(),
            ));
        }
        if !host_type.is_host() {
            return Err(Error::InvalidRequest(format!(
                "Cannot provision hosts of non-host type {host_type}"
            )));
        }
        if sharing != HostSharing::Any && !host_type.is_sharable() {
            return Err(Error::InvalidRequest(format!(
                "Sharing mode {sharing:?} is not supported for {host_type} hosts"
            )));
        }
        Ok(HostProvisionRequest {
            indices,
            host_type,
            resources,
            owner,
            os_version,
            sharing,
            cluster_type: None,
            cluster_id: None,
            cloud_account: CloudAccount::unspecified(),
            due_to_flavor_upgrade: false,
        })
    }

    pub fn with_cluster(mut self, cluster_type: ClusterType, cluster_id: ClusterId) -> Self {
        self.cluster_type = Some(cluster_type);
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn with_cloud_account(mut self, cloud_account: CloudAccount) -> Self {
        self.cloud_account = cloud_account;
        self
    }

    pub fn with_flavor_upgrade(mut self, due_to_flavor_upgrade: bool) -> Self {
        self.due_to_flavor_upgrade = due_to_flavor_upgrade;
        self
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn host_type(&self) -> NodeType {
        self.host_type
    }

    pub fn resources(&self) -> &NodeResources {
        &self.resources
    }

    pub fn owner(&self) -> &ApplicationId {
        &self.owner
    }

    pub fn os_version(&self) -> &Version {
        &self.os_version
    }

    pub fn sharing(&self) -> HostSharing {
        self.sharing
    }

    pub fn cluster_type(&self) -> Option<ClusterType> {
        self.cluster_type
    }

    pub fn cluster_id(&self) -> Option<&ClusterId> {
        self.cluster_id.as_ref()
    }

    pub fn cloud_account(&self) -> &CloudAccount {
        &self.cloud_account
    }

    pub fn is_due_to_flavor_upgrade(&self) -> bool {
        self.due_to_flavor_upgrade
    }
}

/// A host created by a [`HostProvisioner`], with the one child it was created for.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionedHost {
    pub hostname: String,
    pub host_type: NodeType,
    pub host_resources: NodeResources,
    pub child_hostname: String,
    pub child_resources: NodeResources,
    pub exclusive_to: Option<ApplicationId>,
    pub exclusive_to_cluster_type: Option<ClusterType>,
    pub cloud_account: CloudAccount,
}

impl ProvisionedHost {
    /// The host record to store, in provisioned state.
    pub fn generate_host(&self, host_ttl: Option<Duration>) -> Node {
        Node {
            hostname: self.hostname.clone(),
            parent_hostname: None,
            node_type: self.host_type,
            resources: self.host_resources,
            state: NodeState::Provisioned,
            allocation: None,
            cloud_account: self.cloud_account.clone(),
            exclusive_to: self.exclusive_to.clone(),
            exclusive_to_cluster_type: self.exclusive_to_cluster_type,
            status: Default::default(),
            host_ttl,
            container_image: None,
        }
    }

    /// The not yet allocated child node this host was created for.
    pub fn generate_node(&self) -> Node {
        Node {
            hostname: self.child_hostname.clone(),
            parent_hostname: Some(self.hostname.clone()),
            node_type: self.host_type.child_type(),
            resources: self.child_resources,
            state: NodeState::Reserved,
            allocation: None,
            cloud_account: self.cloud_account.clone(),
            exclusive_to: None,
            exclusive_to_cluster_type: None,
            status: Default::default(),
            host_ttl: None,
            container_image: None,
        }
    }
}

/// Receives hosts as they are provisioned. May be called several times per request.
pub type ProvisionCallback<'c> = dyn FnMut(Vec<ProvisionedHost>) -> Result<()> + 'c;

/// Creates hosts on demand.
///
/// Called while the allocation locks are held; the call blocks until all hosts are
/// delivered through `when_provisioned` or provisioning fails.
pub trait HostProvisioner: Send + Sync {
    fn provision_hosts(
        &self,
        request: &HostProvisionRequest,
        when_provisioned: &mut ProvisionCallback<'_>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn request(host_type: NodeType, sharing: HostSharing) -> Result<HostProvisionRequest> {
        HostProvisionRequest::new(
            smallvec![1, 2],
            host_type,
            NodeResources::new(2.0, 8.0, 50.0, 1.0),
            ApplicationId::new("t", "a", "default"),
            Version::EMPTY,
            sharing,
        )
    }

    #[test]
    fn test_sharing_requires_sharable_host_type() {
        assert!(request(NodeType::Host, HostSharing::Exclusive).is_ok());
        assert!(request(NodeType::ProxyHost, HostSharing::Any).is_ok());
        assert!(matches!(
            request(NodeType::ProxyHost, HostSharing::Exclusive),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            request(NodeType::ConfigHost, HostSharing::Shared),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_invalid_host_type_or_indices() {
        assert!(matches!(
            request(NodeType::Tenant, HostSharing::Any),
            Err(Error::InvalidRequest(_))
        ));
        let empty = HostProvisionRequest::new(
            ProvisionIndices::new(),
            NodeType::Host,
            NodeResources::unspecified(),
            ApplicationId::new("t", "a", "default"),
            Version::EMPTY,
            HostSharing::Any,
        );
        assert!(matches!(empty, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_generated_nodes() {
        let host = ProvisionedHost {
            hostname: "host7".to_string(),
            host_type: NodeType::Host,
            host_resources: NodeResources::new(8.0, 32.0, 200.0, 4.0),
            child_hostname: "host7-1".to_string(),
            child_resources: NodeResources::new(2.0, 8.0, 50.0, 1.0),
            exclusive_to: None,
            exclusive_to_cluster_type: None,
            cloud_account: CloudAccount::unspecified(),
        };
        let node = host.generate_host(Some(Duration::from_secs(60)));
        assert_eq!(node.state, NodeState::Provisioned);
        assert_eq!(node.host_ttl, Some(Duration::from_secs(60)));
        let child = host.generate_node();
        assert_eq!(child.node_type, NodeType::Tenant);
        assert_eq!(child.parent_hostname.as_deref(), Some("host7"));
        assert!(child.allocation.is_none());
    }
}
