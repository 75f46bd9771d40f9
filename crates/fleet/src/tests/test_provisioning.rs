use std::time::{Duration, Instant};

use provisioning::preparer::HostSharing;
use provisioning::{Agent, ClusterId, ClusterType, NodeType, Version};

use crate::repository::LockStats;
use crate::tests::utils::{
    ZoneBuilder, allocation_error, app, container, content, count_spec, flavor, host, hostnames,
    member, resources, retired, want_to_retire,
};

#[test]
fn test_failed_provisioning_marks_hosts_for_deprovisioning() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .inventory(vec![flavor("standard", 4.0, 1)])
        .build();

    let result = zone.prepare(&app("app1"), &container("web"), &count_spec(2, 2.0));

    assert!(matches!(result, Err(provisioning::Error::Provisioning(_))));
    assert!(!result.unwrap_err().is_capacity_failure());
    let host1 = zone.repository.get("host1").unwrap();
    assert!(host1.status.want_to_deprovision);
    assert_eq!(host1.status.deprovision.unwrap().agent, Agent::System);
    // The child was never reserved
    assert!(zone.repository.get("host1-1").is_none());
    assert!(zone.repository.get("host2").is_none());
}

#[test]
fn test_failure_after_first_batch() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .inventory(vec![flavor("standard", 4.0, 5)])
        .batch_size(2)
        .fail_after(2)
        .build();

    let result = zone.prepare(&app("app1"), &container("web"), &count_spec(3, 2.0));

    assert!(result.is_err());
    for hostname in ["host1", "host2"] {
        let host = zone.repository.get(hostname).unwrap();
        assert!(host.status.want_to_deprovision, "{hostname} is not marked");
    }
    assert!(zone.repository.get("host3").is_none());
    assert_eq!(zone.provisioner.as_ref().unwrap().delivered_count(), 2);
}

#[test]
fn test_exclusive_zone_provisions_dedicated_hosts() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .host_sharing(false)
        .inventory(vec![flavor("large", 8.0, 5)])
        .build();
    let app1 = app("app1");
    let app2 = app("app2");

    let nodes = zone
        .prepare(&app1, &container("web"), &count_spec(2, 2.0))
        .unwrap();
    assert_eq!(hostnames(&nodes), vec!["host1-1", "host2-1"]);
    for hostname in ["host1", "host2"] {
        let host = zone.repository.get(hostname).unwrap();
        assert_eq!(host.exclusive_to.as_ref(), Some(&app1));
        assert_eq!(host.exclusive_to_cluster_type, Some(ClusterType::Container));
    }

    // Free capacity on app1's hosts is not used by app2
    let nodes = zone
        .prepare(&app2, &container("web"), &count_spec(1, 2.0))
        .unwrap();
    assert_eq!(hostnames(&nodes), vec!["host3-1"]);
    assert_eq!(zone.provision_calls(), 2);
}

#[test]
fn test_shared_hosts_are_reused() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .inventory(vec![flavor("large", 8.0, 5)])
        .build();

    let nodes = zone
        .prepare(&app("app1"), &container("web"), &count_spec(2, 2.0))
        .unwrap();
    assert_eq!(hostnames(&nodes), vec!["host1-1", "host2-1"]);
    assert_eq!(zone.repository.get("host1").unwrap().exclusive_to, None);

    let nodes = zone
        .prepare(&app("app2"), &container("web"), &count_spec(1, 2.0))
        .unwrap();
    assert_eq!(hostnames(&nodes), vec!["host1-2"]);
    assert_eq!(zone.provision_calls(), 1);
}

#[test]
fn test_provisioning_delays_other_preparations() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .slow_provisioning_warning(Duration::from_millis(1))
        .provisioning_delay(Duration::from_millis(300))
        .inventory(vec![flavor("standard", 4.0, 5)])
        .build();

    let (slow, blocked, waited) = std::thread::scope(|scope| {
        let slow =
            scope.spawn(|| zone.prepare(&app("app1"), &container("web"), &count_spec(1, 2.0)));
        std::thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        let blocked = zone.prepare(&app("app2"), &container("web"), &count_spec(1, 2.0));
        (slow.join().unwrap(), blocked, started.elapsed())
    });

    assert_eq!(hostnames(&slow.unwrap()), vec!["host1-1"]);
    // Waits for the unallocated lock, then uses what is left of host1
    assert!(waited >= Duration::from_millis(100), "waited only {waited:?}");
    assert_eq!(hostnames(&blocked.unwrap()), vec!["host1-2"]);
    assert_eq!(zone.provision_calls(), 1);
}

#[test]
fn test_provisioned_hosts_get_unused_names() {
    let app1 = app("app1");
    let web = container("web");
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .nodes(vec![
            host("host1", 2.0),
            member("host1-1", "host1", 2.0, &app1, &web, 0, 0),
        ])
        .inventory(vec![flavor("standard", 4.0, 3)])
        .build();

    let nodes = zone.prepare(&app("app2"), &web, &count_spec(1, 2.0)).unwrap();

    assert_eq!(hostnames(&nodes), vec!["host2-1"]);
    assert_eq!(zone.provision_requests()[0].indices(), &[2]);
    assert_eq!(
        zone.repository.get("host1-1").unwrap().membership().unwrap().index,
        0
    );
}

#[test]
fn test_request_carries_os_target_and_cluster() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .inventory(vec![flavor("standard", 4.0, 5)])
        .build();
    zone.repository
        .set_os_target(NodeType::Host, Version::new(8, 2, 1))
        .unwrap();
    let app1 = app("app1");

    zone.prepare(&app1, &content("store"), &count_spec(2, 2.0)).unwrap();

    let requests = zone.provision_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.indices(), &[1, 2]);
    assert_eq!(request.host_type(), NodeType::Host);
    assert_eq!(request.resources(), &resources(2.0));
    assert_eq!(request.owner(), &app1);
    assert_eq!(request.os_version(), &Version::new(8, 2, 1));
    assert_eq!(request.sharing(), HostSharing::Any);
    assert_eq!(request.cluster_type(), Some(ClusterType::Content));
    assert_eq!(request.cluster_id(), Some(&ClusterId::new("store")));
    assert!(!request.is_due_to_flavor_upgrade());
}

#[test]
fn test_request_marks_flavor_upgrade() {
    let app1 = app("app1");
    let store = content("store");
    let mut upgrading = host("host1", 2.0);
    upgrading.status.want_to_upgrade_flavor = true;
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .nodes(vec![
            upgrading,
            host("host2", 2.0),
            member("host1-1", "host1", 2.0, &app1, &store, 0, 0),
            member("host2-1", "host2", 2.0, &app1, &store, 0, 1),
        ])
        .inventory(vec![flavor("standard", 4.0, 5)])
        .build();

    let nodes = zone.prepare(&app1, &store, &count_spec(2, 2.0)).unwrap();

    assert_eq!(hostnames(&nodes), vec!["host1-1", "host2-1", "host3-1"]);
    assert_eq!(retired(&nodes), vec!["host1-1"]);
    let requests = zone.provision_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].indices(), &[3]);
    assert_eq!(requests[0].os_version(), &Version::EMPTY);
    assert!(requests[0].is_due_to_flavor_upgrade());
}

#[test]
fn test_dynamic_zone_does_not_keep_retiring_nodes() {
    let app1 = app("app1");
    let store = content("store");
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .deliver_at_most(0)
        .nodes(vec![
            host("host1", 2.0),
            host("host2", 2.0),
            want_to_retire(member("host1-1", "host1", 2.0, &app1, &store, 0, 0)),
            member("host2-1", "host2", 2.0, &app1, &store, 0, 1),
        ])
        .inventory(vec![flavor("standard", 4.0, 5)])
        .build();

    let result = zone.prepare(&app1, &store, &count_spec(2, 2.0));

    // The provisioner came up short; host1-1 is not taken back
    let error = allocation_error(result);
    assert_eq!(error.accepted, 1);
    assert_eq!(zone.provision_calls(), 1);
    assert_eq!(
        zone.repository.lock_stats(),
        LockStats {
            application_locks: 1,
            unallocated_locks: 1,
        }
    );
    assert!(zone.repository.get("host3").is_none());
}

#[test]
fn test_new_nodes_get_container_image() {
    let zone = ZoneBuilder::default()
        .nodes(vec![host("host1", 8.0)])
        .build();
    zone.repository
        .images()
        .set_image(NodeType::Tenant, "registry/tenant:2")
        .unwrap();

    let nodes = zone
        .prepare(&app("app1"), &container("web"), &count_spec(1, 2.0))
        .unwrap();

    assert_eq!(nodes[0].container_image.as_deref(), Some("registry/tenant:2"));
    assert_eq!(
        zone.repository.get("host1-1").unwrap().container_image.as_deref(),
        Some("registry/tenant:2")
    );
}
