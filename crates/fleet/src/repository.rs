use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};

use provisioning::repository::{ApplicationLock, NodeRepository, UnallocatedLock};
use provisioning::{
    Agent, ApplicationId, CloudAccount, ClusterSpec, DeprovisionMark, Map, Node, NodeList,
    NodeState, NodeType, Version, trailing_index,
};

use crate::config::{FleetConfig, ZoneConfig};
use crate::images::ContainerImages;
use crate::os::OsVersionChange;

/// Number of times each lock tier has been taken.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LockStats {
    pub application_locks: usize,
    pub unallocated_locks: usize,
}

#[derive(Default)]
struct LockCounters {
    application_locks: AtomicUsize,
    unallocated_locks: AtomicUsize,
}

type ApplicationMutexes = Mutex<Map<ApplicationId, Arc<Mutex<()>>>>;

/// Holds the mutex of one application. The map entry is dropped with the last user.
struct ApplicationGuard<'a> {
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    mutexes: &'a ApplicationMutexes,
    application: ApplicationId,
}

impl Drop for ApplicationGuard<'_> {
    fn drop(&mut self) {
        let mut mutexes = self.mutexes.lock();
        drop(self.guard.take());
        // Waiters hold a clone of the Arc
        if mutexes
            .get(&self.application)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            mutexes.remove(&self.application);
        }
    }
}

/// A node repository kept in memory, with the two lock tiers implemented by mutexes.
pub struct InMemoryNodeRepository {
    nodes: RwLock<BTreeMap<String, Node>>,
    application_locks: ApplicationMutexes,
    unallocated_lock: Mutex<()>,
    lock_timeout: Duration,
    lock_counters: LockCounters,
    next_host_index: AtomicU32,
    zone: ZoneConfig,
    os_versions: RwLock<OsVersionChange>,
    images: ContainerImages,
}

impl InMemoryNodeRepository {
    pub fn new(config: &FleetConfig) -> crate::Result<Self> {
        Ok(InMemoryNodeRepository {
            nodes: RwLock::new(BTreeMap::new()),
            application_locks: Mutex::new(Map::default()),
            unallocated_lock: Mutex::new(()),
            lock_timeout: config.locks.timeout,
            lock_counters: LockCounters::default(),
            next_host_index: AtomicU32::new(1),
            zone: config.zone.clone(),
            os_versions: RwLock::new(OsVersionChange::new(config.os_targets()?)?),
            images: ContainerImages::new(
                config.images.default_image.clone(),
                config.images.cache_ttl,
            ),
        })
    }

    /// Stores nodes as they are, without locking. Meant for bootstrapping a fleet.
    ///
    /// Hosts provisioned later are numbered above every existing host.
    pub fn add_existing(&self, nodes: impl IntoIterator<Item = Node>) {
        let mut stored = self.nodes.write();
        for node in nodes {
            if node.node_type == NodeType::Host {
                if let Some(index) = trailing_index(&node.hostname) {
                    self.next_host_index
                        .fetch_max(index.saturating_add(1), Ordering::SeqCst);
                }
            }
            stored.insert(node.hostname.clone(), node);
        }
    }

    /// Moves nodes to active, as activating an application would.
    pub fn activate(&self, nodes: &[Node]) -> provisioning::Result<()> {
        let mut stored = self.nodes.write();
        for node in nodes {
            if node.allocation.is_none() {
                return Err(provisioning::Error::Repository(format!(
                    "Cannot activate {} without an allocation",
                    node.hostname
                )));
            }
            stored.insert(
                node.hostname.clone(),
                node.clone().with_state(NodeState::Active),
            );
        }
        Ok(())
    }

    pub fn get(&self, hostname: &str) -> Option<Node> {
        self.nodes.read().get(hostname).cloned()
    }

    pub fn lock_stats(&self) -> LockStats {
        LockStats {
            application_locks: self.lock_counters.application_locks.load(Ordering::SeqCst),
            unallocated_locks: self.lock_counters.unallocated_locks.load(Ordering::SeqCst),
        }
    }

    pub fn images(&self) -> &ContainerImages {
        &self.images
    }

    pub fn set_os_target(&self, host_type: NodeType, version: Version) -> crate::Result<()> {
        let mut os_versions = self.os_versions.write();
        *os_versions = os_versions.clone().with_target(host_type, version)?;
        Ok(())
    }

    pub fn remove_os_target(&self, host_type: NodeType) {
        let mut os_versions = self.os_versions.write();
        *os_versions = os_versions.clone().without_target(host_type);
    }

    fn insert_new(
        &self,
        nodes: Vec<Node>,
        state: Option<NodeState>,
    ) -> provisioning::Result<Vec<Node>> {
        let mut stored = self.nodes.write();
        if let Some(existing) = nodes.iter().find(|n| stored.contains_key(&n.hostname)) {
            return Err(provisioning::Error::Repository(format!(
                "Node {} already exists",
                existing.hostname
            )));
        }
        let mut added = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if let Some(state) = state {
                node.state = state;
            }
            stored.insert(node.hostname.clone(), node.clone());
            added.push(node);
        }
        Ok(added)
    }
}

impl NodeRepository for InMemoryNodeRepository {
    fn list(&self) -> NodeList {
        self.nodes.read().values().cloned().collect()
    }

    fn lock_application(
        &self,
        application: &ApplicationId,
    ) -> provisioning::Result<ApplicationLock<'_>> {
        let mutex = self
            .application_locks
            .lock()
            .entry(application.clone())
            .or_default()
            .clone();
        let guard = mutex.try_lock_arc_for(self.lock_timeout).ok_or_else(|| {
            provisioning::Error::LockTimeout(format!("application lock of {application}"))
        })?;
        self.lock_counters
            .application_locks
            .fetch_add(1, Ordering::SeqCst);
        log::debug!("Acquired application lock of {application}");
        let guard = ApplicationGuard {
            guard: Some(guard),
            mutexes: &self.application_locks,
            application: application.clone(),
        };
        Ok(ApplicationLock::new(application.clone(), guard))
    }

    fn lock_unallocated<'a>(
        &'a self,
        application_lock: &ApplicationLock<'_>,
    ) -> provisioning::Result<UnallocatedLock<'a>> {
        let guard = self
            .unallocated_lock
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| {
                provisioning::Error::LockTimeout(format!(
                    "unallocated lock, holding application lock of {}",
                    application_lock.application()
                ))
            })?;
        self.lock_counters
            .unallocated_locks
            .fetch_add(1, Ordering::SeqCst);
        Ok(UnallocatedLock::new(guard))
    }

    fn list_locked(&self, _lock: &UnallocatedLock<'_>) -> NodeList {
        self.list()
    }

    fn reserve(
        &self,
        nodes: Vec<Node>,
        _lock: &UnallocatedLock<'_>,
    ) -> provisioning::Result<Vec<Node>> {
        let mut stored = self.nodes.write();
        if let Some(missing) = nodes.iter().find(|n| !stored.contains_key(&n.hostname)) {
            return Err(provisioning::Error::Repository(format!(
                "Cannot reserve {}, it does not exist",
                missing.hostname
            )));
        }
        let reserved: Vec<Node> = nodes
            .into_iter()
            .map(|n| n.with_state(NodeState::Reserved))
            .collect();
        for node in &reserved {
            stored.insert(node.hostname.clone(), node.clone());
        }
        Ok(reserved)
    }

    fn add_reserved_nodes(
        &self,
        nodes: Vec<Node>,
        _lock: &UnallocatedLock<'_>,
    ) -> provisioning::Result<Vec<Node>> {
        let nodes = nodes
            .into_iter()
            .map(|mut n| {
                if n.container_image.is_none() {
                    n.container_image = Some(self.images.image_for(n.node_type));
                }
                n
            })
            .collect();
        self.insert_new(nodes, Some(NodeState::Reserved))
    }

    fn add_nodes(
        &self,
        nodes: Vec<Node>,
        agent: Agent,
        _lock: &UnallocatedLock<'_>,
    ) -> provisioning::Result<Vec<Node>> {
        let added = self.insert_new(nodes, None)?;
        log::info!(
            "Added {} by {agent:?}",
            provisioning::format_comma_delimited(added.iter().map(|n| &n.hostname))
        );
        Ok(added)
    }

    fn deprovision(
        &self,
        hostname: &str,
        agent: Agent,
        at: DateTime<Utc>,
        _lock: &UnallocatedLock<'_>,
    ) -> provisioning::Result<()> {
        let mut stored = self.nodes.write();
        let node = stored.get_mut(hostname).ok_or_else(|| {
            provisioning::Error::Repository(format!("Cannot deprovision unknown host {hostname}"))
        })?;
        node.status.want_to_retire = true;
        node.status.want_to_deprovision = true;
        node.status.deprovision = Some(DeprovisionMark { agent, at });
        log::info!("Marked {hostname} for deprovisioning by {agent:?}");
        Ok(())
    }

    fn next_provision_indices(&self, count: u32) -> Vec<u32> {
        let first = self.next_host_index.fetch_add(count, Ordering::SeqCst);
        (first..first + count).collect()
    }

    fn os_version_target(&self, host_type: NodeType) -> Option<Version> {
        self.os_versions.read().target_for(host_type).copied()
    }

    fn dynamic_provisioning(&self) -> bool {
        self.zone.dynamic_provisioning
    }

    fn spare_count(&self) -> usize {
        self.zone.spare_count
    }

    fn is_exclave(&self, account: &CloudAccount) -> bool {
        !account.is_unspecified() && self.zone.exclave_accounts.contains(account)
    }

    fn exclusive_allocation(&self, cluster: &ClusterSpec) -> bool {
        self.zone.exclusive_allocation(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::{app, container, host, member};

    fn repository() -> InMemoryNodeRepository {
        let mut config = FleetConfig::default();
        config.locks.timeout = Duration::from_millis(10);
        config.zone.exclave_accounts = vec![CloudAccount::new("exclave-1")];
        InMemoryNodeRepository::new(&config).unwrap()
    }

    #[test]
    fn test_application_lock_times_out() {
        let repository = repository();
        let app1 = app("app1");
        let lock = repository.lock_application(&app1).unwrap();
        assert!(matches!(
            repository.lock_application(&app1),
            Err(provisioning::Error::LockTimeout(_))
        ));
        // Other applications are not blocked
        let other = repository.lock_application(&app("app2")).unwrap();
        drop(other);
        drop(lock);
        assert!(repository.lock_application(&app1).is_ok());
        assert_eq!(repository.lock_stats().application_locks, 3);
    }

    #[test]
    fn test_released_application_locks_are_forgotten() {
        let repository = repository();
        let app1 = app("app1");
        let lock = repository.lock_application(&app1).unwrap();
        let other = repository.lock_application(&app("app2")).unwrap();
        assert_eq!(repository.application_locks.lock().len(), 2);
        drop(other);
        assert_eq!(repository.application_locks.lock().len(), 1);

        // A timed out attempt does not remove the entry of the holder
        assert!(repository.lock_application(&app1).is_err());
        assert_eq!(repository.application_locks.lock().len(), 1);
        drop(lock);
        assert!(repository.application_locks.lock().is_empty());
    }

    #[test]
    fn test_unallocated_lock_times_out() {
        let repository = repository();
        let app1 = app("app1");
        let app2 = app("app2");
        let lock1 = repository.lock_application(&app1).unwrap();
        let lock2 = repository.lock_application(&app2).unwrap();
        let unallocated = repository.lock_unallocated(&lock1).unwrap();
        assert!(matches!(
            repository.lock_unallocated(&lock2),
            Err(provisioning::Error::LockTimeout(_))
        ));
        drop(unallocated);
        assert!(repository.lock_unallocated(&lock2).is_ok());
    }

    #[test]
    fn test_writes() {
        let repository = repository();
        repository.add_existing([host("host1", 8.0)]);
        let app1 = app("app1");
        let application_lock = repository.lock_application(&app1).unwrap();
        let lock = repository.lock_unallocated(&application_lock).unwrap();

        let child = member("host1-1", "host1", 2.0, &app1, &container("web"), 0, 0);
        let added = repository
            .add_reserved_nodes(vec![child.clone()], &lock)
            .unwrap();
        assert_eq!(added[0].state, NodeState::Reserved);
        assert_eq!(
            added[0].container_image.as_deref(),
            Some(repository.images().default_image())
        );
        assert!(matches!(
            repository.add_reserved_nodes(vec![child.clone()], &lock),
            Err(provisioning::Error::Repository(_))
        ));

        let unknown = member("host2-1", "host2", 2.0, &app1, &container("web"), 0, 1);
        assert!(repository.reserve(vec![unknown], &lock).is_err());

        let at = Utc::now();
        repository.deprovision("host1", Agent::Operator, at, &lock).unwrap();
        let host1 = repository.get("host1").unwrap();
        assert!(host1.status.want_to_deprovision);
        assert_eq!(
            host1.status.deprovision,
            Some(DeprovisionMark {
                agent: Agent::Operator,
                at
            })
        );
        assert!(
            repository
                .deprovision("host9", Agent::Operator, at, &lock)
                .is_err()
        );
    }

    #[test]
    fn test_activate_requires_allocation() {
        let repository = repository();
        assert!(repository.activate(&[host("host1", 8.0)]).is_err());
        let node = member("host1-1", "host1", 2.0, &app("app1"), &container("web"), 0, 0)
            .with_state(NodeState::Reserved);
        repository.activate(&[node]).unwrap();
        assert_eq!(
            repository.get("host1-1").unwrap().state,
            NodeState::Active
        );
    }

    #[test]
    fn test_provision_indices_are_unique() {
        let repository = repository();
        assert_eq!(repository.next_provision_indices(2), vec![1, 2]);
        assert_eq!(repository.next_provision_indices(3), vec![3, 4, 5]);
    }

    #[test]
    fn test_provision_indices_skip_existing_hosts() {
        let repository = repository();
        repository.add_existing([
            host("host4", 8.0),
            host("host2", 8.0),
            member("host4-7", "host4", 2.0, &app("app1"), &container("web"), 0, 0),
        ]);
        assert_eq!(repository.next_provision_indices(2), vec![5, 6]);
        // Lower hosts added later do not move the counter back
        repository.add_existing([host("host1", 8.0)]);
        assert_eq!(repository.next_provision_indices(1), vec![7]);
    }

    #[test]
    fn test_zone_policies() {
        let repository = repository();
        assert!(repository.is_exclave(&CloudAccount::new("exclave-1")));
        assert!(!repository.is_exclave(&CloudAccount::new("other")));
        assert!(!repository.is_exclave(&CloudAccount::unspecified()));
        assert!(!repository.exclusive_allocation(&container("web")));
        assert!(repository.exclusive_allocation(&container("web").with_exclusive(true)));
        assert!(!repository.dynamic_provisioning());
        assert_eq!(repository.spare_count(), 0);
    }

    #[test]
    fn test_os_targets() {
        let repository = repository();
        assert_eq!(repository.os_version_target(NodeType::Host), None);
        repository
            .set_os_target(NodeType::Host, Version::new(8, 2, 1))
            .unwrap();
        assert_eq!(
            repository.os_version_target(NodeType::Host),
            Some(Version::new(8, 2, 1))
        );
        assert!(
            repository
                .set_os_target(NodeType::Tenant, Version::new(8, 2, 1))
                .is_err()
        );
        repository.remove_os_target(NodeType::Host);
        assert_eq!(repository.os_version_target(NodeType::Host), None);
    }
}
