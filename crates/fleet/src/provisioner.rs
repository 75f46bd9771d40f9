use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use smallvec::SmallVec;

use provisioning::preparer::{
    HostProvisionRequest, HostProvisioner, HostSharing, ProvisionCallback, ProvisionedHost,
};
use provisioning::resources::NodeResources;

/// A kind of machine the provisioner can create, with the number still available.
#[derive(Clone, Debug, PartialEq)]
pub struct Flavor {
    pub name: String,
    pub resources: NodeResources,
    pub available: u32,
}

impl Flavor {
    pub fn new(name: impl Into<String>, resources: NodeResources, available: u32) -> Self {
        Flavor {
            name: name.into(),
            resources,
            available,
        }
    }
}

type Batch = SmallVec<[ProvisionedHost; 4]>;

/// Provisions hosts out of a finite inventory of flavors.
///
/// Each host gets the smallest flavor satisfying the requested resources. Hosts are
/// delivered in batches, so a failure may happen after some hosts were already handed out.
pub struct InventoryProvisioner {
    inventory: Mutex<Vec<Flavor>>,
    batch_size: usize,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    delivered: AtomicUsize,
}

impl InventoryProvisioner {
    pub fn new(inventory: Vec<Flavor>) -> Self {
        InventoryProvisioner {
            inventory: Mutex::new(inventory),
            batch_size: 1,
            fail_after: None,
            delay: None,
            calls: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fails every request once this many hosts have been delivered in total.
    pub fn with_failure_after(mut self, hosts: usize) -> Self {
        self.fail_after = Some(hosts);
        self
    }

    /// Waits this long before each batch is delivered.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn available(&self, flavor: &str) -> u32 {
        self.inventory
            .lock()
            .iter()
            .find(|f| f.name == flavor)
            .map(|f| f.available)
            .unwrap_or(0)
    }

    /// Takes one machine of the smallest flavor satisfying `resources` out of the inventory.
    fn take_flavor(&self, resources: &NodeResources) -> Option<Flavor> {
        let mut inventory = self.inventory.lock();
        let flavor = inventory
            .iter_mut()
            .filter(|f| f.available > 0 && f.resources.satisfies(resources))
            .min_by_key(|f| f.resources.magnitude())?;
        flavor.available -= 1;
        Some(flavor.clone())
    }

    fn create_host(
        &self,
        request: &HostProvisionRequest,
        index: u32,
    ) -> provisioning::Result<ProvisionedHost> {
        if self
            .fail_after
            .is_some_and(|limit| self.delivered.load(Ordering::SeqCst) >= limit)
        {
            return Err(anyhow!("Provider refused to create more hosts").into());
        }
        let flavor = self.take_flavor(request.resources()).ok_or_else(|| {
            anyhow!(
                "No flavor with {} available for {} host {index}",
                request.resources(),
                request.host_type()
            )
        })?;
        let hostname = format!("{}{index}", request.host_type());
        let child_resources = if request.resources().is_unspecified() {
            flavor.resources
        } else {
            *request.resources()
        };
        let exclusive = request.sharing() == HostSharing::Exclusive;
        log::debug!("Creating {hostname} of flavor {}", flavor.name);
        Ok(ProvisionedHost {
            child_hostname: format!("{hostname}-1"),
            hostname,
            host_type: request.host_type(),
            host_resources: flavor.resources,
            child_resources,
            exclusive_to: exclusive.then(|| request.owner().clone()),
            exclusive_to_cluster_type: if exclusive {
                request.cluster_type()
            } else {
                None
            },
            cloud_account: request.cloud_account().clone(),
        })
    }
}

impl HostProvisioner for InventoryProvisioner {
    fn provision_hosts(
        &self,
        request: &HostProvisionRequest,
        when_provisioned: &mut ProvisionCallback<'_>,
    ) -> provisioning::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for chunk in request.indices().chunks(self.batch_size) {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            let batch = chunk
                .iter()
                .map(|&index| self.create_host(request, index))
                .collect::<provisioning::Result<Batch>>()?;
            self.delivered.fetch_add(batch.len(), Ordering::SeqCst);
            when_provisioned(batch.into_vec())?;
        }
        Ok(())
    }
}
