// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fused containers: one physical process hosting a group of operators.
//!
//! Construction is a fixed pipeline. Owned nodes are folded into a
//! [`ContainerSummary`], their connections are split into intra- and
//! inter-container sets, container ports are synthesized for everything that
//! crosses the boundary, queued ports are injected where fan-in or dedicated
//! threading calls for them, and finally the [`ThreadPropagator`] classifies
//! every operator and port.
use std::collections::{BTreeMap, BTreeSet};

use fusion_topology::{
    AppId, NodeIndex, PortRef, ThreadedPort, ThreadingModel, Topology, TopologyApplication,
    TopologyConnectionId, TopologyNode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::config::{AnomalyPolicy, FuserConfig};
use crate::error::{Diagnostics, FuseError};
use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId, OutputSource};
use crate::port::{FusedContainerInputPort, FusedContainerOutputPort, FusedContainerPort};
use crate::propagator::ThreadPropagator;
use crate::summary::ContainerSummary;

/// Assignment of a group of nodes to one container, as produced by the partitioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpecification {
    /// Identity string of the partition.
    pub id: String,
    /// Topology application the nodes belong to.
    pub topology_app_id: AppId,
    /// Nodes hosted by the container.
    pub nodes: BTreeSet<NodeIndex>,
}

impl ContainerSpecification {
    /// Builds a specification from raw node indices.
    pub fn new(
        id: impl Into<String>,
        topology_app_id: AppId,
        nodes: impl IntoIterator<Item = u64>,
    ) -> Self {
        Self {
            id: id.into(),
            topology_app_id,
            nodes: nodes.into_iter().map(NodeIndex).collect(),
        }
    }
}

/// A processing element: owned nodes plus everything derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedContainer {
    index: ContainerIndex,
    app_id: AppId,
    specification: ContainerSpecification,
    nodes: BTreeSet<NodeIndex>,
    summary: ContainerSummary,
    input_ports: BTreeMap<ContainerPortIndex, FusedContainerInputPort>,
    output_ports: BTreeMap<ContainerPortIndex, FusedContainerOutputPort>,
    next_input_port: ContainerPortIndex,
    next_output_port: ContainerPortIndex,
    all_connections: BTreeSet<TopologyConnectionId>,
    intra_connections: BTreeSet<TopologyConnectionId>,
    inter_connections: BTreeSet<TopologyConnectionId>,
    input_port_by_logical: BTreeMap<PortRef, ContainerPortIndex>,
    output_port_by_source: BTreeMap<OutputSource, ContainerPortIndex>,
}

impl FusedContainer {
    fn empty(app_id: AppId, index: ContainerIndex, spec: &ContainerSpecification) -> Self {
        Self {
            index,
            app_id,
            specification: spec.clone(),
            nodes: BTreeSet::new(),
            summary: ContainerSummary::default(),
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
            next_input_port: ContainerPortIndex(0),
            next_output_port: ContainerPortIndex(0),
            all_connections: BTreeSet::new(),
            intra_connections: BTreeSet::new(),
            inter_connections: BTreeSet::new(),
            input_port_by_logical: BTreeMap::new(),
            output_port_by_source: BTreeMap::new(),
        }
    }

    /// Builds the container for `spec` and classifies its threading.
    ///
    /// Writes injected queued ports and computed threading flags back onto
    /// the topology. Anomalies are handled per `config.anomaly_policy`.
    #[instrument(skip(topology, spec, config, diags), fields(app = %app_id, container = %index))]
    pub fn build(
        topology: &mut Topology,
        app_id: AppId,
        index: ContainerIndex,
        spec: &ContainerSpecification,
        config: &FuserConfig,
        diags: &mut Diagnostics,
    ) -> Result<Self, FuseError> {
        let policy = config.anomaly_policy;
        let mut container = Self::empty(app_id, index, spec);
        if spec.nodes.is_empty() {
            diags.record(
                policy,
                FuseError::EmptySpecification(spec.id.clone()),
                container.context("build"),
            )?;
            return Ok(container);
        }
        let tapp = match topology.application_mut(spec.topology_app_id) {
            Ok(tapp) => tapp,
            Err(err) => {
                diags.record(policy, err.into(), container.context("build"))?;
                return Ok(container);
            }
        };

        container.resolve_nodes(tapp, diags, policy)?;
        container.summary = ContainerSummary::fold(
            container.nodes.iter().filter_map(|n| tapp.node(*n).ok()),
            diags,
            policy,
        )?;
        container.collect_connections(tapp)?;
        container.synthesize_ports(tapp, diags, policy)?;
        container.inject_threaded_ports(tapp, config, diags)?;

        let classification = ThreadPropagator::new(&container, tapp).run(diags, policy)?;
        classification.apply(&mut container, tapp)?;

        debug!(
            nodes = container.nodes.len(),
            intra = container.intra_connections.len(),
            inter = container.inter_connections.len(),
            input_ports = container.input_ports.len(),
            output_ports = container.output_ports.len(),
            "container built"
        );
        Ok(container)
    }

    fn context(&self, step: &str) -> String {
        format!("container {} ({}): {step}", self.index, self.specification.id)
    }

    fn resolve_nodes(
        &mut self,
        tapp: &TopologyApplication,
        diags: &mut Diagnostics,
        policy: AnomalyPolicy,
    ) -> Result<(), FuseError> {
        for &node in &self.specification.nodes {
            match tapp.node(node) {
                Ok(_) => {
                    self.nodes.insert(node);
                }
                Err(err) => diags.record(policy, err.into(), self.context("resolve nodes"))?,
            }
        }
        Ok(())
    }

    fn collect_connections(&mut self, tapp: &TopologyApplication) -> Result<(), FuseError> {
        for &node in &self.nodes {
            self.all_connections.extend(tapp.connections_of(node)?);
        }
        for conn in &self.all_connections {
            if self.nodes.contains(&conn.source.node) && self.nodes.contains(&conn.destination.node)
            {
                self.intra_connections.insert(*conn);
            } else {
                self.inter_connections.insert(*conn);
            }
        }
        debug_assert_eq!(
            self.intra_connections.len() + self.inter_connections.len(),
            self.all_connections.len(),
            "intra and inter connections must partition all connections"
        );
        Ok(())
    }

    fn synthesize_ports(
        &mut self,
        tapp: &TopologyApplication,
        diags: &mut Diagnostics,
        policy: AnomalyPolicy,
    ) -> Result<(), FuseError> {
        let inter: Vec<TopologyConnectionId> = self.inter_connections.iter().copied().collect();
        for conn in inter {
            if self.owns(conn.source.node) {
                let source = match conn.channel {
                    Some(channel) => match tapp.channel(conn.source, channel) {
                        Ok(_) => OutputSource::Channel(conn.source, channel),
                        Err(err) => {
                            diags.record(policy, err.into(), self.context("synthesize ports"))?;
                            continue;
                        }
                    },
                    None => OutputSource::Port(conn.source),
                };
                self.ensure_output_port(source);
            }
            if self.owns(conn.destination.node) {
                self.ensure_input_port(conn.destination);
            }
        }

        let owned: Vec<&TopologyNode> = self
            .nodes
            .iter()
            .filter_map(|n| tapp.node(*n).ok())
            .collect();
        for node in owned {
            for port in node.output_ports.values() {
                if port.is_exported() {
                    self.ensure_output_port(OutputSource::Port(PortRef {
                        node: node.index,
                        port: port.index,
                    }));
                }
            }
            for port in node.input_ports.values() {
                if port.is_imported() {
                    self.ensure_input_port(PortRef {
                        node: node.index,
                        port: port.index,
                    });
                }
            }
        }
        Ok(())
    }

    fn ensure_output_port(&mut self, source: OutputSource) -> ContainerPortIndex {
        if let Some(index) = self.output_port_by_source.get(&source) {
            return *index;
        }
        let index = self.next_output_port;
        self.next_output_port = index.next();
        trace!(port = %index, logical = %source.port(), "container output port");
        self.output_ports.insert(
            index,
            FusedContainerOutputPort {
                port: FusedContainerPort::new(index, self.index, self.app_id),
                logical: source.port(),
                channel: source.channel(),
                single_threaded: true,
            },
        );
        self.output_port_by_source.insert(source, index);
        index
    }

    fn ensure_input_port(&mut self, logical: PortRef) -> ContainerPortIndex {
        if let Some(index) = self.input_port_by_logical.get(&logical) {
            return *index;
        }
        let index = self.next_input_port;
        self.next_input_port = index.next();
        trace!(port = %index, %logical, "container input port");
        self.input_ports.insert(
            index,
            FusedContainerInputPort {
                port: FusedContainerPort::new(index, self.index, self.app_id),
                logical,
            },
        );
        self.input_port_by_logical.insert(logical, index);
        index
    }

    fn inject_threaded_ports(
        &self,
        tapp: &mut TopologyApplication,
        config: &FuserConfig,
        diags: &mut Diagnostics,
    ) -> Result<(), FuseError> {
        let policy = config.anomaly_policy;
        for conn in &self.intra_connections {
            let model = match tapp.node(conn.destination.node)?.threading_model() {
                Ok(model) => model,
                Err(err) => {
                    diags.record(policy, err.into(), self.context("inject threaded ports"))?;
                    None
                }
            };
            let port = tapp.input_port_mut(conn.destination)?;
            if port.threaded_port.is_some() {
                continue;
            }
            if conn.channel.is_some() || model == Some(ThreadingModel::Dedicated) {
                debug!(port = %conn.destination, via = %conn, "injecting threaded port");
                port.threaded_port = Some(ThreadedPort::injected(
                    config.injected_congestion_policy,
                    config.queue_capacity,
                ));
            }
        }
        Ok(())
    }

    /// Container index.
    pub fn index(&self) -> ContainerIndex {
        self.index
    }

    /// Owning fused application.
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Topology application the nodes belong to.
    pub fn topology_app_id(&self) -> AppId {
        self.specification.topology_app_id
    }

    /// Specification the container was built from.
    pub fn specification(&self) -> &ContainerSpecification {
        &self.specification
    }

    /// Nodes hosted by the container (those of the specification that resolved).
    pub fn nodes(&self) -> &BTreeSet<NodeIndex> {
        &self.nodes
    }

    /// Whether the container hosts `node`.
    pub fn owns(&self, node: NodeIndex) -> bool {
        self.nodes.contains(&node)
    }

    /// Summarized deployment properties.
    pub fn summary(&self) -> &ContainerSummary {
        &self.summary
    }

    /// Every logical connection touching an owned node.
    pub fn all_connections(&self) -> &BTreeSet<TopologyConnectionId> {
        &self.all_connections
    }

    /// Connections with both endpoints owned.
    pub fn intra_connections(&self) -> &BTreeSet<TopologyConnectionId> {
        &self.intra_connections
    }

    /// Connections crossing the container boundary.
    pub fn inter_connections(&self) -> &BTreeSet<TopologyConnectionId> {
        &self.inter_connections
    }

    /// Input ports in index order.
    pub fn input_ports(&self) -> impl Iterator<Item = &FusedContainerInputPort> {
        self.input_ports.values()
    }

    /// Output ports in index order.
    pub fn output_ports(&self) -> impl Iterator<Item = &FusedContainerOutputPort> {
        self.output_ports.values()
    }

    /// Looks up an input port.
    pub fn input_port(
        &self,
        index: ContainerPortIndex,
    ) -> Result<&FusedContainerInputPort, FuseError> {
        self.input_ports
            .get(&index)
            .ok_or(FuseError::InputPortNotFound {
                container: self.index,
                port: index,
            })
    }

    /// Looks up an output port.
    pub fn output_port(
        &self,
        index: ContainerPortIndex,
    ) -> Result<&FusedContainerOutputPort, FuseError> {
        self.output_ports
            .get(&index)
            .ok_or(FuseError::OutputPortNotFound {
                container: self.index,
                port: index,
            })
    }

    pub(crate) fn input_port_mut(
        &mut self,
        index: ContainerPortIndex,
    ) -> Result<&mut FusedContainerInputPort, FuseError> {
        let container = self.index;
        self.input_ports
            .get_mut(&index)
            .ok_or(FuseError::InputPortNotFound {
                container,
                port: index,
            })
    }

    pub(crate) fn output_port_mut(
        &mut self,
        index: ContainerPortIndex,
    ) -> Result<&mut FusedContainerOutputPort, FuseError> {
        let container = self.index;
        self.output_ports
            .get_mut(&index)
            .ok_or(FuseError::OutputPortNotFound {
                container,
                port: index,
            })
    }

    /// Container input port summarizing the logical input port `logical`.
    pub fn input_port_for(&self, logical: PortRef) -> Option<ContainerPortIndex> {
        self.input_port_by_logical.get(&logical).copied()
    }

    /// Container output port a connection leaves through.
    ///
    /// Channel-associated connections resolve to the port of their channel.
    pub fn output_port_for(&self, conn: &TopologyConnectionId) -> Option<ContainerPortIndex> {
        let source = match conn.channel {
            Some(channel) => OutputSource::Channel(conn.source, channel),
            None => OutputSource::Port(conn.source),
        };
        self.output_port_for_source(source)
    }

    /// Container output port registered for `source`.
    pub fn output_port_for_source(&self, source: OutputSource) -> Option<ContainerPortIndex> {
        self.output_port_by_source.get(&source).copied()
    }

    /// Container connections leaving through any output port.
    pub fn outgoing_connections(&self) -> BTreeSet<FusedContainerConnectionId> {
        self.output_ports
            .values()
            .flat_map(|p| p.port.connections().iter().copied())
            .collect()
    }

    /// Container connections arriving at any input port.
    pub fn incoming_connections(&self) -> BTreeSet<FusedContainerConnectionId> {
        self.input_ports
            .values()
            .flat_map(|p| p.port.connections().iter().copied())
            .collect()
    }

    /// Detaches a container connection from whichever endpoint port is ours.
    pub(crate) fn unlink(&mut self, id: &FusedContainerConnectionId) {
        if id.source_container == self.index {
            if let Some(port) = self.output_ports.get_mut(&id.source_port) {
                port.port.unlink(id);
            }
        }
        if id.destination_container == self.index {
            if let Some(port) = self.input_ports.get_mut(&id.destination_port) {
                port.port.unlink(id);
            }
        }
    }

    /// Drops the queued ports this container injected in front of its nodes.
    ///
    /// Declared queues are left alone. Returns how many ports were cleared.
    pub(crate) fn clear_injected_queues(
        &self,
        topology: &mut Topology,
    ) -> Result<usize, FuseError> {
        let Ok(tapp) = topology.application_mut(self.topology_app_id()) else {
            return Ok(0);
        };
        let mut cleared = 0;
        for index in &self.nodes {
            let node = tapp.node_mut(*index)?;
            for port in node.input_ports.values_mut() {
                if port.threaded_port.as_ref().is_some_and(|t| t.injected) {
                    port.threaded_port = None;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use fusion_topology::{
        Annotation, ChannelRef, PortIndex, Splitter, SplitterIndex, StreamExport,
        TopologyInputPort, TopologyOutputPort, THREADING_TAG,
    };

    const APP: AppId = AppId(7);

    fn op(index: u64, inputs: u64, outputs: u64) -> TopologyNode {
        let mut node = TopologyNode::new(APP, NodeIndex(index), format!("op{index}"));
        for p in 0..inputs {
            node.input_ports
                .insert(PortIndex(p), TopologyInputPort::new(PortIndex(p), format!("i{p}")));
        }
        for p in 0..outputs {
            node.output_ports.insert(
                PortIndex(p),
                TopologyOutputPort::new(PortIndex(p), format!("op{index}.o{p}")),
            );
        }
        node
    }

    fn topology(nodes: Vec<TopologyNode>, edges: &[(u64, u64, Option<(u64, u64)>)]) -> Topology {
        let mut tapp = TopologyApplication::new(APP);
        for node in nodes {
            tapp.add_node(node).unwrap();
        }
        for &(src, dst, ch) in edges {
            tapp.connect(
                PortRef::new(src, 0),
                PortRef::new(dst, 0),
                ch.map(|(s, c)| ChannelRef::new(s, c)),
            )
            .unwrap();
        }
        let mut topo = Topology::new();
        topo.insert(tapp);
        topo
    }

    fn build(topo: &mut Topology, nodes: &[u64]) -> (FusedContainer, Diagnostics) {
        let spec = ContainerSpecification::new("pe", APP, nodes.iter().copied());
        let mut diags = Diagnostics::new();
        let c = FusedContainer::build(
            topo,
            AppId(1),
            ContainerIndex(0),
            &spec,
            &FuserConfig::default(),
            &mut diags,
        )
        .unwrap();
        (c, diags)
    }

    #[test]
    fn intra_and_inter_partition_all_connections() {
        let mut topo = topology(
            vec![op(0, 0, 1), op(1, 1, 1), op(2, 1, 0)],
            &[(0, 1, None), (1, 2, None)],
        );
        let (c, _) = build(&mut topo, &[0, 1]);
        assert_eq!(c.all_connections().len(), 2);
        assert_eq!(c.intra_connections().len(), 1);
        assert_eq!(c.inter_connections().len(), 1);
        assert!(c.intra_connections().is_disjoint(c.inter_connections()));
        assert_eq!(c.output_ports().count(), 1);
        assert_eq!(c.input_ports().count(), 0);
        assert_eq!(c.output_ports().next().unwrap().logical, PortRef::new(1, 0));
    }

    #[test]
    fn channels_of_one_port_get_distinct_output_ports() {
        let mut src = op(0, 0, 1);
        src.output_ports
            .get_mut(&PortIndex(0))
            .unwrap()
            .splitters
            .insert(SplitterIndex(0), Splitter::with_width(SplitterIndex(0), 2));
        let mut topo = topology(
            vec![src, op(1, 1, 0), op(2, 1, 0)],
            &[(0, 1, Some((0, 0))), (0, 2, Some((0, 1)))],
        );
        let (c, _) = build(&mut topo, &[0]);
        let channels: Vec<_> = c.output_ports().map(|p| p.channel).collect();
        assert_eq!(
            channels,
            vec![Some(ChannelRef::new(0, 0)), Some(ChannelRef::new(0, 1))]
        );
    }

    #[test]
    fn exported_ports_get_container_ports_without_connections() {
        let mut a = op(0, 0, 1);
        a.output_ports.get_mut(&PortIndex(0)).unwrap().export = Some(StreamExport {
            stream_name: Some("Ticks".to_owned()),
            ..StreamExport::default()
        });
        let mut topo = topology(vec![a], &[]);
        let (c, _) = build(&mut topo, &[0]);
        assert_eq!(c.output_ports().count(), 1);
        assert!(c
            .output_port_for_source(OutputSource::Port(PortRef::new(0, 0)))
            .is_some());
    }

    #[test]
    fn dedicated_destination_gets_an_injected_queue() {
        let mut b = op(1, 1, 0);
        b.annotations
            .push(Annotation::new(THREADING_TAG, [("model", "dedicated")]));
        let mut topo = topology(vec![op(0, 0, 1), b], &[(0, 1, None)]);
        build(&mut topo, &[0, 1]);
        let port = topo
            .application(APP)
            .unwrap()
            .input_port(PortRef::new(1, 0))
            .unwrap();
        assert!(port.threaded_port.as_ref().is_some_and(|t| t.injected));
    }

    #[test]
    fn empty_specification_is_rejected_under_strict_policy() {
        let mut topo = topology(vec![op(0, 0, 1)], &[]);
        let spec = ContainerSpecification::new("empty", APP, Vec::new());
        let mut diags = Diagnostics::new();
        let err = FusedContainer::build(
            &mut topo,
            AppId(1),
            ContainerIndex(0),
            &spec,
            &FuserConfig::default(),
            &mut diags,
        )
        .unwrap_err();
        assert_eq!(err, FuseError::EmptySpecification("empty".to_owned()));
    }

    #[test]
    fn missing_nodes_are_skipped_under_best_effort() {
        let mut topo = topology(vec![op(0, 0, 1)], &[]);
        let spec = ContainerSpecification::new("pe", APP, [0, 9]);
        let mut diags = Diagnostics::new();
        let config = FuserConfig::default().with_policy(AnomalyPolicy::BestEffort);
        let c = FusedContainer::build(
            &mut topo,
            AppId(1),
            ContainerIndex(0),
            &spec,
            &config,
            &mut diags,
        )
        .unwrap();
        assert_eq!(c.nodes().len(), 1);
        assert_eq!(diags.len(), 1);
    }
}
