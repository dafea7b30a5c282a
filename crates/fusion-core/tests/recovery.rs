// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persist, encode, and rebuild fused applications.
#![allow(clippy::unwrap_used)]

use fusion_core::{
    ContainerIndex, ContainerSpecification, FuseError, FusedApplication, FuserConfig,
    PersistedApplication, PhysicalModel,
};
use fusion_dry_tests::{spec, split, APP};
use fusion_topology::{AppId, Topology};

const JOB: AppId = AppId(42);

fn specs(groups: &[&[u64]]) -> Vec<ContainerSpecification> {
    groups.iter().map(|g| spec(g)).collect()
}

fn fused(groups: &[&[u64]]) -> (Topology, FusedApplication) {
    let mut topo = split(2);
    let app =
        FusedApplication::construct(&mut topo, JOB, &specs(groups), FuserConfig::default())
            .unwrap();
    (topo, app)
}

fn digest(app: &FusedApplication, topology: &Topology) -> [u8; 32] {
    PhysicalModel::capture(app, topology).unwrap().digest().unwrap()
}

#[test]
fn restore_on_the_live_topology_reproduces_the_application() {
    let (mut topo, app) = fused(&[&[0], &[1], &[2], &[3]]);
    let expected = digest(&app, &topo);

    let bytes = app.persist().to_cbor().unwrap();
    let persisted = PersistedApplication::from_cbor(&bytes).unwrap();
    let restored = FusedApplication::restore(&mut topo, &persisted, FuserConfig::default()).unwrap();

    assert_eq!(restored, app);
    assert_eq!(digest(&restored, &topo), expected);
}

#[test]
fn restore_on_a_fresh_topology_recomputes_every_derived_field() {
    let partitions: [&[&[u64]]; 3] = [
        &[&[0], &[1], &[2], &[3]],
        &[&[0, 1, 2], &[3]],
        &[&[0, 1, 2, 3]],
    ];
    for groups in partitions {
        let (topo, app) = fused(groups);
        let expected = digest(&app, &topo);

        let persisted = PersistedApplication::from_cbor(&app.persist().to_cbor().unwrap()).unwrap();
        let mut fresh = split(2);
        let restored =
            FusedApplication::restore(&mut fresh, &persisted, FuserConfig::default()).unwrap();
        assert_eq!(digest(&restored, &fresh), expected, "groups {groups:?}");
    }
}

#[test]
fn restore_keeps_the_index_allocator_after_fission() {
    let (mut topo, mut app) = fused(&[&[0, 1, 2], &[3]]);
    app.remove_container(&mut topo, ContainerIndex(0)).unwrap();
    app.add_containers(&mut topo, &specs(&[&[0], &[1, 2]])).unwrap();
    assert_eq!(app.next_container_index(), ContainerIndex(4));

    let persisted = app.persist();
    assert_eq!(persisted.containers.len(), 3);
    let restored = FusedApplication::restore(&mut topo, &persisted, FuserConfig::default()).unwrap();
    assert_eq!(restored.next_container_index(), ContainerIndex(4));
    assert_eq!(
        restored.container_indices(),
        app.container_indices()
    );
    assert_eq!(restored.connections().count(), app.connections().count());
}

#[test]
fn refusing_matches_a_fresh_build_of_the_new_partition() {
    let moves: [(&[&[u64]], &[&[u64]]); 3] = [
        (&[&[0, 1, 2, 3]], &[&[0], &[1], &[2], &[3]]),
        (&[&[0], &[1], &[2], &[3]], &[&[0, 1, 2, 3]]),
        (&[&[0], &[1], &[2], &[3]], &[&[0], &[1, 2], &[3]]),
    ];
    for (before, after) in moves {
        let (mut topo, mut app) = fused(before);
        let retired: Vec<ContainerIndex> = app.container_indices().into_iter().collect();
        app.refuse(&mut topo, &retired, &specs(after)).unwrap();

        let mut fresh = split(2);
        let rebuilt =
            FusedApplication::restore(&mut fresh, &app.persist(), FuserConfig::default()).unwrap();
        assert_eq!(
            digest(&app, &topo),
            digest(&rebuilt, &fresh),
            "{before:?} -> {after:?}"
        );
    }
}

#[test]
fn retiring_a_container_drops_the_queues_it_injected() {
    let injected = |topo: &Topology| {
        topo.application(APP)
            .unwrap()
            .nodes()
            .flat_map(|n| n.input_ports.values())
            .filter(|p| p.threaded_port.as_ref().is_some_and(|t| t.injected))
            .count()
    };
    let (mut topo, mut app) = fused(&[&[0, 1, 2, 3]]);
    assert_eq!(injected(&topo), 2);

    app.remove_container(&mut topo, ContainerIndex(0)).unwrap();
    assert_eq!(injected(&topo), 0);
}

#[test]
fn tampered_port_table_fails_recovery() {
    let (mut topo, app) = fused(&[&[0], &[1], &[2], &[3]]);
    let mut persisted = app.persist();
    persisted.containers[0].output_ports.pop();

    let err = FusedApplication::restore(&mut topo, &persisted, FuserConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        FuseError::RecoveryMismatch {
            container: ContainerIndex(0),
            ..
        }
    ));
}

#[test]
fn garbage_bytes_fail_to_decode() {
    let err = PersistedApplication::from_cbor(&[0xff, 0x00, 0x13]).unwrap_err();
    assert!(matches!(err, FuseError::Decode(_)));
}
