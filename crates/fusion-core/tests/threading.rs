// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Thread classification of operators, queued ports, and container output ports.
#![allow(clippy::unwrap_used)]

use fusion_core::{
    AnomalyPolicy, ContainerIndex, Diagnostics, FusedApplication, FuserConfig, OutputSource,
    ThreadPropagator,
};
use fusion_dry_tests::{chain, cycle, fan_in, fan_in_queued, spec, split, TopologyBuilder, APP};
use fusion_topology::{
    AppId, ChannelRef, NodeIndex, PortRef, ThreadingState, Topology, TopologyInputPort,
};
use tracing_subscriber::EnvFilter;

const JOB: AppId = AppId(100);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fuse(topology: &mut Topology, groups: &[&[u64]]) -> FusedApplication {
    let specs: Vec<_> = groups.iter().map(|g| spec(g)).collect();
    FusedApplication::construct(topology, JOB, &specs, FuserConfig::default()).unwrap()
}

fn state(topology: &Topology, node: u64) -> ThreadingState {
    topology
        .application(APP)
        .unwrap()
        .node(NodeIndex(node))
        .unwrap()
        .threading
}

fn input(topology: &Topology, node: u64) -> &TopologyInputPort {
    topology
        .application(APP)
        .unwrap()
        .input_port(PortRef::new(node, 0))
        .unwrap()
}

const SINGLE: ThreadingState = ThreadingState {
    single_threaded_on_inputs: true,
    single_threaded_on_outputs: true,
};
const MULTI: ThreadingState = ThreadingState {
    single_threaded_on_inputs: false,
    single_threaded_on_outputs: false,
};

#[test]
fn straight_chain_is_single_threaded_everywhere() {
    init_tracing();
    let mut topo = chain(3);
    fuse(&mut topo, &[&[0, 1, 2]]);
    for node in 0..3 {
        assert_eq!(state(&topo, node), SINGLE, "node {node}");
    }
}

#[test]
fn chain_split_across_containers_stays_single_threaded() {
    let mut topo = chain(3);
    let app = fuse(&mut topo, &[&[0], &[1], &[2]]);
    for node in 0..3 {
        assert_eq!(state(&topo, node), SINGLE, "node {node}");
    }
    let middle = app.container(ContainerIndex(1)).unwrap();
    assert!(middle.output_ports().all(|p| p.single_threaded));
}

#[test]
fn fan_in_without_a_queue_is_multi_threaded_downstream() {
    let mut topo = fan_in();
    fuse(&mut topo, &[&[0, 1, 2, 3]]);
    assert_eq!(state(&topo, 0), SINGLE);
    assert_eq!(state(&topo, 1), SINGLE);
    assert_eq!(state(&topo, 2), MULTI);
    assert_eq!(state(&topo, 3), MULTI);
}

#[test]
fn queue_absorbs_fan_in() {
    let mut topo = fan_in_queued();
    fuse(&mut topo, &[&[0, 1, 2, 3]]);
    assert_eq!(state(&topo, 2), SINGLE);
    assert_eq!(state(&topo, 3), SINGLE);
    let queue = input(&topo, 2).threaded_port.as_ref().unwrap();
    assert!(!queue.injected);
    assert!(!queue.single_threaded_on_input);
}

#[test]
fn fan_in_over_one_container_input_port_counts_one_thread() {
    let mut topo = fan_in();
    fuse(&mut topo, &[&[0], &[1], &[2, 3]]);
    assert_eq!(state(&topo, 2), SINGLE);
    assert_eq!(state(&topo, 3), SINGLE);
}

#[test]
fn cycles_terminate_and_count_each_thread_once() {
    let mut topo = cycle();
    fuse(&mut topo, &[&[0, 1, 2]]);
    for node in 0..3 {
        assert_eq!(state(&topo, node), SINGLE, "node {node}");
    }
}

#[test]
fn dynamic_operator_is_a_threading_boundary() {
    let mut topo = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 1, 1)
        .operator(2, 1, 0)
        .connect(0, 1)
        .connect(1, 2)
        .threading(1, "dynamic")
        .into_topology()
        .unwrap();
    fuse(&mut topo, &[&[0, 1, 2]]);
    assert_eq!(state(&topo, 1), MULTI);
    assert_eq!(state(&topo, 2), SINGLE);
}

#[test]
fn manual_operator_with_two_inputs_and_one_feed_stays_single_threaded() {
    let mut annotated = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 2, 0)
        .connect(0, 1)
        .threading(1, "manual")
        .into_topology()
        .unwrap();
    fuse(&mut annotated, &[&[0, 1]]);
    assert_eq!(state(&annotated, 1), SINGLE);
}

#[test]
fn declared_multi_threaded_outputs_spread_downstream() {
    let mut topo = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 1, 1)
        .operator(2, 1, 0)
        .connect(0, 1)
        .connect(1, 2)
        .multi_threaded_outputs(1)
        .into_topology()
        .unwrap();
    fuse(&mut topo, &[&[0, 1, 2]]);
    assert_eq!(
        state(&topo, 1),
        ThreadingState {
            single_threaded_on_inputs: true,
            single_threaded_on_outputs: false,
        }
    );
    assert_eq!(state(&topo, 2), MULTI);
}

#[test]
fn dedicated_threading_injects_a_single_producer_queue() {
    let mut topo = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 1, 1)
        .operator(2, 1, 0)
        .connect(0, 1)
        .connect(1, 2)
        .threading(2, "dedicated")
        .into_topology()
        .unwrap();
    fuse(&mut topo, &[&[0, 1, 2]]);
    let queue = input(&topo, 2).threaded_port.as_ref().unwrap();
    assert!(queue.injected);
    assert!(queue.single_threaded_on_input);
    assert!(input(&topo, 1).threaded_port.is_none());
    assert_eq!(state(&topo, 2), SINGLE);
}

#[test]
fn intra_container_channels_get_queues_and_merge_sees_every_replica() {
    let mut topo = split(2);
    fuse(&mut topo, &[&[0, 1, 2, 3]]);
    for replica in [1, 2] {
        let queue = input(&topo, replica).threaded_port.as_ref().unwrap();
        assert!(queue.injected);
        assert!(queue.single_threaded_on_input);
        assert_eq!(state(&topo, replica), SINGLE);
    }
    assert_eq!(state(&topo, 3), MULTI);
}

#[test]
fn each_channel_port_only_sees_its_own_threads() {
    let mut topo = split(2);
    let app = fuse(&mut topo, &[&[0], &[1], &[2], &[3]]);
    let source = app.container(ContainerIndex(0)).unwrap();
    assert_eq!(source.output_ports().count(), 2);
    assert!(source.output_ports().all(|p| p.single_threaded));
    let c1 = source
        .output_port_for_source(OutputSource::Channel(
            PortRef::new(0, 0),
            ChannelRef::new(0, 1),
        ))
        .unwrap();
    assert_eq!(source.output_port(c1).unwrap().channel, Some(ChannelRef::new(0, 1)));
}

#[test]
fn unknown_threading_model_is_recorded_and_treated_as_absent() {
    let mut topo = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 1, 0)
        .connect(0, 1)
        .threading(1, "turbo")
        .into_topology()
        .unwrap();
    let app = fuse(&mut topo, &[&[0, 1]]);
    assert_eq!(state(&topo, 1), SINGLE);
    assert!(!app.diagnostics().is_empty());
}

#[test]
fn rerunning_propagation_is_idempotent() {
    let mut topo = fan_in_queued();
    fuse(&mut topo, &[&[0, 1, 2, 3]]);
    let first: Vec<_> = (0..4).map(|n| state(&topo, n)).collect();
    fuse(&mut topo, &[&[0, 1, 2, 3]]);
    let second: Vec<_> = (0..4).map(|n| state(&topo, n)).collect();
    assert_eq!(first, second);
}

#[test]
fn propagator_counts_queue_producers_and_drain_thread() {
    let mut topo = fan_in_queued();
    let app = fuse(&mut topo, &[&[0, 1, 2, 3]]);
    let container = app.container(ContainerIndex(0)).unwrap();
    let tapp = topo.application(APP).unwrap();
    let classification = ThreadPropagator::new(container, tapp)
        .run(&mut Diagnostics::new(), AnomalyPolicy::Strict)
        .unwrap();
    assert_eq!(classification.threads_minted(), 3);
    assert_eq!(classification.queued_port_thread_count(PortRef::new(2, 0)), Some(2));
    assert_eq!(classification.queued_port(PortRef::new(2, 0)), Some(false));
    assert_eq!(classification.node_thread_count(NodeIndex(2)), Some(0));
    assert_eq!(classification.node_thread_count(NodeIndex(3)), Some(1));
    assert_eq!(classification.node(NodeIndex(3)), Some(SINGLE));
}

#[test]
fn fan_in_leaving_the_container_makes_its_output_port_multi_threaded() {
    let mut topo = fan_in();
    let app = fuse(&mut topo, &[&[0, 1, 2], &[3]]);
    let container = app.container(ContainerIndex(0)).unwrap();
    let port = container
        .output_port_for_source(OutputSource::Port(PortRef::new(2, 0)))
        .unwrap();
    assert!(!container.output_port(port).unwrap().single_threaded);

    let tapp = topo.application(APP).unwrap();
    let classification = ThreadPropagator::new(container, tapp)
        .run(&mut Diagnostics::new(), AnomalyPolicy::Strict)
        .unwrap();
    assert_eq!(classification.output_port(port), Some(false));
    assert_eq!(classification.output_port_thread_count(port), Some(2));
    assert_eq!(state(&topo, 2), MULTI);
    assert_eq!(state(&topo, 3), SINGLE);
}

#[test]
fn exported_port_fed_by_two_sources_is_multi_threaded() {
    let mut topo = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 0, 1)
        .operator(2, 1, 1)
        .connect(0, 2)
        .connect(1, 2)
        .export(2, 0, "out")
        .into_topology()
        .unwrap();
    let app = fuse(&mut topo, &[&[0, 1, 2]]);
    let container = app.container(ContainerIndex(0)).unwrap();
    assert_eq!(container.output_ports().count(), 1);
    let exported = container.output_ports().next().unwrap();
    assert_eq!(exported.logical, PortRef::new(2, 0));
    assert!(!exported.single_threaded);
    assert!(exported.port.connections().is_empty());
}
