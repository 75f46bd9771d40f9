use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use provisioning::repository::NodeRepository;
use provisioning::resources::NodeResources;
use provisioning::{ApplicationId, Node, NodeType};

use crate::tests::utils::{
    TestZone, ZoneBuilder, app, container, count_spec, flavor, host, hostnames, indices,
};

const APPLICATIONS: usize = 6;
const NODES_PER_APPLICATION: u32 = 3;

fn assert_no_overcommit(nodes: &[Node]) {
    let mut used: BTreeMap<&str, NodeResources> = BTreeMap::new();
    for node in nodes.iter().filter(|n| n.node_type == NodeType::Tenant) {
        let parent = node.parent_hostname.as_deref().unwrap();
        let total = used.entry(parent).or_default();
        *total = total.add(&node.resources);
    }
    for (parent, total) in used {
        let host = nodes.iter().find(|n| n.hostname == parent).unwrap();
        assert!(
            host.resources.satisfies(&total),
            "{parent} is overcommitted with {total}"
        );
    }
}

/// Every application is prepared twice at the same time, from threads started in random order.
fn prepare_concurrently(zone: &TestZone) -> Vec<(ApplicationId, Vec<Node>)> {
    let mut requests: Vec<ApplicationId> = (0..APPLICATIONS)
        .flat_map(|i| {
            let application = app(&format!("app{i}"));
            [application.clone(), application]
        })
        .collect();
    let mut rng = rand::rng();
    requests.shuffle(&mut rng);
    let delays: Vec<u64> = requests.iter().map(|_| rng.random_range(0..5)).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .into_iter()
            .zip(delays)
            .map(|(application, delay)| {
                scope.spawn(move || {
                    std::thread::sleep(Duration::from_millis(delay));
                    let nodes = zone
                        .prepare(
                            &application,
                            &container("web"),
                            &count_spec(NODES_PER_APPLICATION, 2.0),
                        )
                        .unwrap();
                    (application, nodes)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn check_results(zone: &TestZone, results: Vec<(ApplicationId, Vec<Node>)>) {
    let mut by_application: BTreeMap<ApplicationId, Vec<Vec<Node>>> = BTreeMap::new();
    for (application, nodes) in results {
        assert_eq!(indices(&nodes), vec![0, 1, 2], "{application} got bad indices");
        by_application.entry(application).or_default().push(nodes);
    }
    assert_eq!(by_application.len(), APPLICATIONS);
    for (application, results) in &by_application {
        assert_eq!(
            hostnames(&results[0]),
            hostnames(&results[1]),
            "{application} got different nodes"
        );
    }

    let all_nodes = zone.repository.list().into_vec();
    let children = all_nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Tenant)
        .count();
    assert_eq!(children, APPLICATIONS * NODES_PER_APPLICATION as usize);
    assert_no_overcommit(&all_nodes);
}

#[test]
fn test_concurrent_preparations_on_static_hosts() {
    let hosts = (1..=8).map(|i| host(&format!("host{i}"), 8.0)).collect();
    let zone = ZoneBuilder::default().nodes(hosts).build();

    let results = prepare_concurrently(&zone);
    check_results(&zone, results);
}

#[test]
fn test_concurrent_preparations_with_provisioning() {
    let zone = ZoneBuilder::default()
        .dynamic_provisioning(true)
        .batch_size(2)
        .inventory(vec![flavor("large", 8.0, 50)])
        .build();

    let results = prepare_concurrently(&zone);
    check_results(&zone, results);

    let host_indices: Vec<u32> = zone
        .repository
        .list()
        .of_type(NodeType::Host)
        .filter_map(|h| provisioning::trailing_index(&h.hostname))
        .collect();
    let mut unique = host_indices.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), host_indices.len());
}
