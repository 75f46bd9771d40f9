use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use log::LevelFilter;
use parking_lot::Mutex;

use provisioning::preparer::{
    GroupPreparer, HostProvisionRequest, HostProvisioner, Preparer, ProvisionCallback,
    ProvisionedHost,
};
use provisioning::resources::NodeResources;
use provisioning::{
    Allocation, ApplicationId, ClusterId, ClusterMembership, ClusterSpec, ClusterType,
    CountNodeSpec, Node, NodeAllocationError, NodeSpec, NodeState, NodeType,
};

use crate::config::FleetConfig;
use crate::provisioner::{Flavor, InventoryProvisioner};
use crate::repository::InMemoryNodeRepository;

pub fn init_test_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn resources(vcpu: f64) -> NodeResources {
    NodeResources::new(vcpu, vcpu * 4.0, vcpu * 25.0, vcpu / 2.0)
}

pub fn app(name: &str) -> ApplicationId {
    ApplicationId::new("tenant", name, "default")
}

/// Container cluster, without a group; the preparer assigns groups.
pub fn container(id: &str) -> ClusterSpec {
    ClusterSpec::new(ClusterType::Container, ClusterId::new(id))
}

pub fn content(id: &str) -> ClusterSpec {
    ClusterSpec::new(ClusterType::Content, ClusterId::new(id))
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

/// An active member of `cluster` in `group`, on `parent`.
pub fn member(
    name: &str,
    parent: &str,
    vcpu: f64,
    application: &ApplicationId,
    cluster: &ClusterSpec,
    group: u32,
    index: u32,
) -> Node {
    let membership = ClusterMembership::new(cluster.clone().with_group(Some(group)), index);
    Node::builder()
        .hostname(name)
        .parent_hostname(parent)
        .node_type(NodeType::Tenant)
        .resources(resources(vcpu))
        .state(NodeState::Active)
        .allocation(Allocation::new(
            application.clone(),
            membership,
            resources(vcpu),
        ))
        .build()
        .unwrap()
}

pub fn count_spec(count: u32, vcpu: f64) -> NodeSpec {
    CountNodeSpec::builder(count)
        .resources(resources(vcpu))
        .build()
        .unwrap()
        .into()
}

pub fn allocation_error(result: provisioning::Result<Vec<Node>>) -> NodeAllocationError {
    match result {
        Err(provisioning::Error::NodeAllocation(error)) => error,
        other => panic!("Expected allocation failure, got {other:?}"),
    }
}

pub fn want_to_retire(mut node: Node) -> Node {
    node.status.want_to_retire = true;
    node
}

pub fn hostnames(nodes: &[Node]) -> Vec<&str> {
    let mut names: Vec<&str> = nodes.iter().map(|n| n.hostname.as_str()).collect();
    names.sort_unstable();
    names
}

pub fn indices(nodes: &[Node]) -> Vec<u32> {
    let mut indices: Vec<u32> = nodes
        .iter()
        .filter_map(|n| n.membership().map(|m| m.index))
        .collect();
    indices.sort_unstable();
    indices
}

pub fn retired(nodes: &[Node]) -> Vec<&str> {
    let mut names: Vec<&str> = nodes
        .iter()
        .filter(|n| n.is_retired())
        .map(|n| n.hostname.as_str())
        .collect();
    names.sort_unstable();
    names
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct Zone {
    #[builder(default)]
    dynamic_provisioning: bool,
    #[builder(default = "true")]
    host_sharing: bool,
    #[builder(default)]
    spare_count: usize,
    #[builder(default = "Duration::from_secs(5)")]
    lock_timeout: Duration,
    #[builder(default = "Duration::from_secs(1)")]
    slow_provisioning_warning: Duration,
    #[builder(default)]
    nodes: Vec<Node>,
    #[builder(default, setter(strip_option))]
    inventory: Option<Vec<Flavor>>,
    #[builder(default = "1")]
    batch_size: usize,
    #[builder(default, setter(strip_option))]
    provisioning_delay: Option<Duration>,
    #[builder(default, setter(strip_option))]
    fail_after: Option<usize>,
    #[builder(default, setter(strip_option))]
    deliver_at_most: Option<usize>,
}

/// Records every request and optionally hands fewer hosts to the preparer than it made.
pub struct RecordingProvisioner {
    inner: InventoryProvisioner,
    requests: Mutex<Vec<HostProvisionRequest>>,
    deliver_at_most: Option<usize>,
}

impl RecordingProvisioner {
    pub fn requests(&self) -> Vec<HostProvisionRequest> {
        self.requests.lock().clone()
    }
}

impl Deref for RecordingProvisioner {
    type Target = InventoryProvisioner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl HostProvisioner for RecordingProvisioner {
    fn provision_hosts(
        &self,
        request: &HostProvisionRequest,
        when_provisioned: &mut ProvisionCallback<'_>,
    ) -> provisioning::Result<()> {
        self.requests.lock().push(request.clone());
        let Some(mut remaining) = self.deliver_at_most else {
            return self.inner.provision_hosts(request, when_provisioned);
        };
        self.inner
            .provision_hosts(request, &mut |mut hosts: Vec<ProvisionedHost>| {
                hosts.truncate(remaining);
                remaining -= hosts.len();
                if hosts.is_empty() {
                    return Ok(());
                }
                when_provisioned(hosts)
            })
    }
}

/// A repository with its provisioner and preparers, wired as a zone would be.
pub struct TestZone {
    pub repository: Arc<InMemoryNodeRepository>,
    pub provisioner: Option<Arc<RecordingProvisioner>>,
    pub preparer: Preparer,
    pub group_preparer: GroupPreparer,
}

impl ZoneBuilder {
    pub fn build(self) -> TestZone {
        init_test_logging();
        let Zone {
            dynamic_provisioning,
            host_sharing,
            spare_count,
            lock_timeout,
            slow_provisioning_warning,
            nodes,
            inventory,
            batch_size,
            provisioning_delay,
            fail_after,
            deliver_at_most,
        } = self.finish().unwrap();

        let mut config = FleetConfig::default();
        config.zone.dynamic_provisioning = dynamic_provisioning;
        config.zone.host_sharing = host_sharing;
        config.zone.spare_count = spare_count;
        config.locks.timeout = lock_timeout;
        config.preparer.slow_provisioning_warning = slow_provisioning_warning;

        let repository = Arc::new(InMemoryNodeRepository::new(&config).unwrap());
        repository.add_existing(nodes);

        let provisioner = inventory.map(|inventory| {
            let mut provisioner = InventoryProvisioner::new(inventory).with_batch_size(batch_size);
            if let Some(delay) = provisioning_delay {
                provisioner = provisioner.with_delay(delay);
            }
            if let Some(hosts) = fail_after {
                provisioner = provisioner.with_failure_after(hosts);
            }
            Arc::new(RecordingProvisioner {
                inner: provisioner,
                requests: Mutex::new(Vec::new()),
                deliver_at_most,
            })
        });
        let dyn_provisioner = provisioner
            .clone()
            .map(|p| p as Arc<dyn HostProvisioner>);
        let preparer = Preparer::new(
            repository.clone(),
            dyn_provisioner.clone(),
            config.preparer_config(),
        );
        let group_preparer =
            GroupPreparer::new(repository.clone(), dyn_provisioner, config.preparer_config());
        TestZone {
            repository,
            provisioner,
            preparer,
            group_preparer,
        }
    }
}

impl TestZone {
    pub fn prepare(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        requested: &NodeSpec,
    ) -> provisioning::Result<Vec<Node>> {
        self.preparer.prepare(application, cluster, requested)
    }

    pub fn provision_calls(&self) -> usize {
        self.provisioner.as_ref().map_or(0, |p| p.call_count())
    }

    pub fn provision_requests(&self) -> Vec<HostProvisionRequest> {
        self.provisioner
            .as_ref()
            .map(|p| p.requests())
            .unwrap_or_default()
    }
}

pub fn flavor(name: &str, vcpu: f64, available: u32) -> Flavor {
    Flavor::new(name, resources(vcpu), available)
}
