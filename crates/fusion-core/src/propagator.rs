// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single/multi-threaded classification of a container's operators and ports.
//!
//! Every independent origin of execution gets a fresh thread id. Ids are
//! pushed depth-first along intra-container connections; queued ports and
//! dynamically scheduled operators absorb them. An operator or port is
//! single-threaded when it observes at most one distinct id.
//!
//! The working state lives only for one [`ThreadPropagator::run`]; the
//! returned [`Classification`] is what gets written back.
use std::collections::{BTreeMap, BTreeSet};

use fusion_topology::{
    NodeIndex, PortRef, ThreadingModel, ThreadingState, TopologyApplication, TopologyNode,
};
use tracing::{debug, instrument, trace};

use crate::config::AnomalyPolicy;
use crate::container::FusedContainer;
use crate::error::{Diagnostics, FuseError};
use crate::ident::{ContainerPortIndex, OutputSource};

type ThreadId = u64;

/// Computes threading flags for one container.
pub struct ThreadPropagator<'a> {
    container: &'a FusedContainer,
    tapp: &'a TopologyApplication,
    models: BTreeMap<NodeIndex, Option<ThreadingModel>>,
    next_thread: ThreadId,
    node_threads: BTreeMap<NodeIndex, BTreeSet<ThreadId>>,
    output_threads: BTreeMap<ContainerPortIndex, BTreeSet<ThreadId>>,
    queued_threads: BTreeMap<PortRef, BTreeSet<ThreadId>>,
}

impl<'a> ThreadPropagator<'a> {
    /// Prepares a run over `container`'s nodes in `tapp`.
    pub fn new(container: &'a FusedContainer, tapp: &'a TopologyApplication) -> Self {
        Self {
            container,
            tapp,
            models: BTreeMap::new(),
            next_thread: 0,
            node_threads: BTreeMap::new(),
            output_threads: BTreeMap::new(),
            queued_threads: BTreeMap::new(),
        }
    }

    /// Enumerates thread origins, propagates them, and classifies.
    #[instrument(skip_all, fields(container = %self.container.index()))]
    pub fn run(
        mut self,
        diags: &mut Diagnostics,
        policy: AnomalyPolicy,
    ) -> Result<Classification, FuseError> {
        let container = self.container;
        let tapp = self.tapp;
        let nodes = self.owned_nodes();
        for node in &nodes {
            let model = match node.threading_model() {
                Ok(model) => model,
                Err(err) => {
                    let context = format!("thread propagation: node {}", node.index);
                    diags.record(policy, err.into(), context)?;
                    None
                }
            };
            self.models.insert(node.index, model);
        }

        for port in container.input_ports() {
            let id = self.mint();
            match tapp.input_port(port.logical) {
                Ok(logical) if logical.is_queued() => self.record_queued(port.logical, id),
                Ok(_) => self.bump(port.logical.node, id, false),
                Err(err) => diags.record(
                    policy,
                    err.into(),
                    format!("thread propagation: container input port {}", port.port.index),
                )?,
            }
        }

        for node in nodes.iter().filter(|n| n.is_source()) {
            let id = self.mint();
            self.bump(node.index, id, true);
        }

        for node in nodes
            .iter()
            .filter(|n| !n.deployment.single_threaded_on_outputs)
        {
            let id = self.mint();
            self.bump(node.index, id, true);
        }

        let dynamic: Vec<&TopologyNode> = nodes
            .iter()
            .copied()
            .filter(|n| self.permits_dynamic(n.index))
            .collect();
        for node in dynamic {
            for port in node.input_ports.values() {
                let logical = PortRef {
                    node: node.index,
                    port: port.index,
                };
                let id = self.mint();
                if port.is_queued() {
                    self.record_queued(logical, id);
                } else {
                    self.node_threads.entry(node.index).or_default().insert(id);
                    self.bump(node.index, id, true);
                }
            }
        }

        for node in &nodes {
            for port in node.input_ports.values().filter(|p| p.is_queued()) {
                trace!(node = %node.index, port = %port.index, "queue drain thread");
                let id = self.mint();
                self.bump(node.index, id, true);
            }
        }

        let classification = self.finalize(&nodes);
        debug!(
            threads = classification.threads_minted,
            multi_threaded_nodes = classification
                .nodes
                .values()
                .filter(|s| !s.single_threaded_on_inputs)
                .count(),
            "thread propagation finished"
        );
        Ok(classification)
    }

    fn owned_nodes(&self) -> Vec<&'a TopologyNode> {
        let tapp = self.tapp;
        self.container
            .nodes()
            .iter()
            .filter_map(|n| tapp.node(*n).ok())
            .collect()
    }

    fn mint(&mut self) -> ThreadId {
        let id = self.next_thread;
        self.next_thread += 1;
        id
    }

    fn model(&self, node: NodeIndex) -> Option<ThreadingModel> {
        self.models.get(&node).copied().flatten()
    }

    fn permits_dynamic(&self, node: NodeIndex) -> bool {
        self.model(node)
            .is_some_and(ThreadingModel::permits_dynamic_scheduling)
    }

    fn record_queued(&mut self, port: PortRef, id: ThreadId) {
        self.queued_threads.entry(port).or_default().insert(id);
    }

    fn record_output(&mut self, port: Option<ContainerPortIndex>, id: ThreadId) {
        if let Some(port) = port {
            self.output_threads.entry(port).or_default().insert(id);
        }
    }

    /// Pushes `id` downstream from `start`.
    ///
    /// `owned` means the thread originates at `start`, so `start` itself does
    /// not count it. The visited set is local to one call.
    fn bump(&mut self, start: NodeIndex, id: ThreadId, owned: bool) {
        let tapp = self.tapp;
        let container = self.container;
        let mut visited = BTreeSet::new();
        let mut stack = vec![(start, owned)];
        while let Some((index, owned)) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }
            let Ok(node) = tapp.node(index) else {
                continue;
            };
            if !owned {
                self.node_threads.entry(index).or_default().insert(id);
                if self.model(index) == Some(ThreadingModel::Dynamic) {
                    continue;
                }
            }
            for port in node.output_ports.values() {
                let logical = PortRef {
                    node: index,
                    port: port.index,
                };
                if port.is_exported() {
                    self.record_output(
                        container.output_port_for_source(OutputSource::Port(logical)),
                        id,
                    );
                }
                for conn in &port.connections {
                    let dst = conn.destination;
                    if !container.owns(dst.node) {
                        self.record_output(container.output_port_for(conn), id);
                        continue;
                    }
                    match tapp.input_port(dst) {
                        Ok(input) if input.is_queued() => self.record_queued(dst, id),
                        Ok(_) => stack.push((dst.node, false)),
                        Err(_) => {}
                    }
                }
            }
        }
    }

    fn finalize(self, nodes: &[&TopologyNode]) -> Classification {
        let mut classification = Classification {
            threads_minted: self.next_thread,
            ..Classification::default()
        };
        for node in nodes {
            let count = self.node_threads.get(&node.index).map_or(0, BTreeSet::len);
            let single_in =
                count <= 1 && (node.input_ports.len() <= 1 || !self.permits_dynamic(node.index));
            classification.nodes.insert(
                node.index,
                ThreadingState {
                    single_threaded_on_inputs: single_in,
                    single_threaded_on_outputs: single_in
                        && node.deployment.single_threaded_on_outputs,
                },
            );
            classification.node_threads.insert(node.index, count);
            for port in node.input_ports.values().filter(|p| p.is_queued()) {
                let logical = PortRef {
                    node: node.index,
                    port: port.index,
                };
                let count = self.queued_threads.get(&logical).map_or(0, BTreeSet::len);
                classification.queued_ports.insert(logical, count);
            }
        }
        for port in self.container.output_ports() {
            let count = self
                .output_threads
                .get(&port.port.index)
                .map_or(0, BTreeSet::len);
            classification.output_ports.insert(port.port.index, count);
        }
        classification
    }
}

/// Result of one propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    threads_minted: u64,
    nodes: BTreeMap<NodeIndex, ThreadingState>,
    node_threads: BTreeMap<NodeIndex, usize>,
    output_ports: BTreeMap<ContainerPortIndex, usize>,
    queued_ports: BTreeMap<PortRef, usize>,
}

impl Classification {
    /// Computed state of an owned node.
    pub fn node(&self, node: NodeIndex) -> Option<ThreadingState> {
        self.nodes.get(&node).copied()
    }

    /// Distinct thread ids that reached `node`.
    pub fn node_thread_count(&self, node: NodeIndex) -> Option<usize> {
        self.node_threads.get(&node).copied()
    }

    /// Whether at most one thread submits through a container output port.
    pub fn output_port(&self, port: ContainerPortIndex) -> Option<bool> {
        self.output_ports.get(&port).map(|n| *n <= 1)
    }

    /// Distinct thread ids that reached a container output port.
    pub fn output_port_thread_count(&self, port: ContainerPortIndex) -> Option<usize> {
        self.output_ports.get(&port).copied()
    }

    /// Whether at most one thread enqueues into the queued port of `port`.
    pub fn queued_port(&self, port: PortRef) -> Option<bool> {
        self.queued_ports.get(&port).map(|n| *n <= 1)
    }

    /// Distinct thread ids that reached the queued port of `port`.
    pub fn queued_port_thread_count(&self, port: PortRef) -> Option<usize> {
        self.queued_ports.get(&port).copied()
    }

    /// Number of thread ids minted during the run.
    pub fn threads_minted(&self) -> u64 {
        self.threads_minted
    }

    /// Writes the flags onto the topology and the container's output ports.
    pub fn apply(
        &self,
        container: &mut FusedContainer,
        tapp: &mut TopologyApplication,
    ) -> Result<(), FuseError> {
        for (node, state) in &self.nodes {
            tapp.node_mut(*node)?.threading = *state;
        }
        for (port, count) in &self.queued_ports {
            if let Some(queue) = tapp.input_port_mut(*port)?.threaded_port.as_mut() {
                queue.single_threaded_on_input = *count <= 1;
            }
        }
        for (port, count) in &self.output_ports {
            container.output_port_mut(*port)?.single_threaded = *count <= 1;
        }
        Ok(())
    }
}
