use chrono::{DateTime, Utc};

use crate::internal::common::ids::{Agent, ApplicationId, CloudAccount};
use crate::internal::common::version::Version;
use crate::internal::model::cluster::ClusterSpec;
use crate::internal::model::node::{Node, NodeType};
use crate::internal::model::nodelist::NodeList;
use crate::Result;

/// Anything kept alive by a lock token, usually a mutex guard.
pub trait Held {}

impl<T> Held for T {}

/// Proof that the per-application lock is held. Released when dropped.
pub struct ApplicationLock<'a> {
    application: ApplicationId,
    _guard: Box<dyn Held + 'a>,
}

impl<'a> ApplicationLock<'a> {
    pub fn new(application: ApplicationId, guard: impl Held + 'a) -> Self {
        ApplicationLock {
            application,
            _guard: Box::new(guard),
        }
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }
}

/// Proof that the global unallocated-nodes lock is held. Released when dropped.
///
/// Can only be obtained while holding an [`ApplicationLock`], which fixes the lock order.
pub struct UnallocatedLock<'a> {
    _guard: Box<dyn Held + 'a>,
}

impl<'a> UnallocatedLock<'a> {
    pub fn new(guard: impl Held + 'a) -> Self {
        UnallocatedLock {
            _guard: Box::new(guard),
        }
    }
}

/// The node store used by preparation.
///
/// Node records are only written through methods taking an [`UnallocatedLock`].
pub trait NodeRepository: Send + Sync {
    /// Snapshot of all nodes, read without locks. May be stale.
    fn list(&self) -> NodeList;

    fn lock_application(&self, application: &ApplicationId) -> Result<ApplicationLock<'_>>;

    fn lock_unallocated<'a>(
        &'a self,
        application_lock: &ApplicationLock<'_>,
    ) -> Result<UnallocatedLock<'a>>;

    /// Snapshot of all nodes, consistent while `lock` is held.
    fn list_locked(&self, lock: &UnallocatedLock<'_>) -> NodeList;

    /// Moves existing nodes to reserved, writing their new allocation.
    fn reserve(&self, nodes: Vec<Node>, lock: &UnallocatedLock<'_>) -> Result<Vec<Node>>;

    /// Stores nodes which did not exist before, in reserved state.
    fn add_reserved_nodes(&self, nodes: Vec<Node>, lock: &UnallocatedLock<'_>)
    -> Result<Vec<Node>>;

    /// Stores newly provisioned hosts.
    fn add_nodes(&self, nodes: Vec<Node>, agent: Agent, lock: &UnallocatedLock<'_>)
    -> Result<Vec<Node>>;

    /// Marks a host to be deprovisioned later. The record is kept.
    fn deprovision(
        &self,
        hostname: &str,
        agent: Agent,
        at: DateTime<Utc>,
        lock: &UnallocatedLock<'_>,
    ) -> Result<()>;

    /// Reserves `count` fresh indices for naming tenant hosts.
    fn next_provision_indices(&self, count: u32) -> Vec<u32>;

    fn os_version_target(&self, host_type: NodeType) -> Option<Version>;

    fn dynamic_provisioning(&self) -> bool;

    fn spare_count(&self) -> usize;

    fn is_exclave(&self, account: &CloudAccount) -> bool;

    /// Whether the cluster must run on hosts exclusive to its application.
    fn exclusive_allocation(&self, cluster: &ClusterSpec) -> bool;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
