// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fluent topology builder for tests.

use fusion_topology::{
    Annotation, AppId, ChannelRef, CongestionPolicy, Language, NodeIndex, ParallelRegion,
    PortIndex, PortRef, Splitter, SplitterIndex, StreamExport, StreamImport, ThreadedPort,
    Topology, TopologyApplication, TopologyError, TopologyInputPort, TopologyNode,
    TopologyOutputPort, THREADING_TAG,
};

/// Builder for one topology application.
///
/// Operators are named `op{index}`; output port `p` of operator `i` carries
/// the stream `op{i}.o{p}`. Node mutators on unknown indices are no-ops, and
/// dangling connections surface as errors from [`TopologyBuilder::build`].
///
/// # Example
///
/// ```
/// use fusion_dry_tests::TopologyBuilder;
///
/// let tapp = TopologyBuilder::new(1)
///     .operator(0, 0, 1)
///     .operator(1, 1, 0)
///     .connect(0, 1)
///     .build()
///     .unwrap();
/// assert_eq!(tapp.connections().count(), 1);
/// ```
pub struct TopologyBuilder {
    app: AppId,
    nodes: Vec<TopologyNode>,
    edges: Vec<(PortRef, PortRef, Option<ChannelRef>)>,
}

impl TopologyBuilder {
    /// Starts an empty application.
    pub fn new(app: u64) -> Self {
        Self {
            app: AppId(app),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds operator `index` with `inputs` input ports and `outputs` output ports.
    pub fn operator(mut self, index: u64, inputs: u64, outputs: u64) -> Self {
        let mut node = TopologyNode::new(self.app, NodeIndex(index), format!("op{index}"));
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
        self.nodes.push(node);
        self
    }

    /// Applies `f` to operator `index`.
    pub fn with_node(mut self, index: u64, f: impl FnOnce(&mut TopologyNode)) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.index == NodeIndex(index)) {
            f(node);
        }
        self
    }

    /// Renames operator `index` as a parallel-region replica.
    pub fn replica(self, index: u64, name: &str, logical: &str, channel: Option<u64>) -> Self {
        self.with_node(index, |n| {
            n.name = name.to_owned();
            n.logical_name = logical.to_owned();
            n.parallel_regions = vec![ParallelRegion {
                name: logical.to_owned(),
                global_channel_index: channel,
            }];
        })
    }

    /// Sets the implementation language.
    pub fn language(self, index: u64, language: Language) -> Self {
        self.with_node(index, |n| n.deployment.language = language)
    }

    /// Sets the raw tracing level string.
    pub fn tracing(self, index: u64, level: &str) -> Self {
        self.with_node(index, |n| n.deployment.tracing = Some(level.to_owned()))
    }

    /// Adds a `threading` annotation with the given model value.
    pub fn threading(self, index: u64, model: &str) -> Self {
        self.with_node(index, |n| {
            n.annotations
                .push(Annotation::new(THREADING_TAG, [("model", model)]));
        })
    }

    /// Declares that the operator may submit from several threads.
    pub fn multi_threaded_outputs(self, index: u64) -> Self {
        self.with_node(index, |n| n.deployment.single_threaded_on_outputs = false)
    }

    /// Declares a queued port in front of input `port`.
    pub fn queued(self, index: u64, port: u64) -> Self {
        self.with_node(index, |n| {
            if let Some(p) = n.input_ports.get_mut(&PortIndex(port)) {
                p.threaded_port = Some(ThreadedPort::declared(CongestionPolicy::Wait, Some(1000)));
            }
        })
    }

    /// Attaches a splitter of `width` channels to output `port`.
    pub fn splitter(self, index: u64, port: u64, splitter: u64, width: u64) -> Self {
        self.with_node(index, |n| {
            if let Some(p) = n.output_ports.get_mut(&PortIndex(port)) {
                p.splitters.insert(
                    SplitterIndex(splitter),
                    Splitter::with_width(SplitterIndex(splitter), width),
                );
            }
        })
    }

    /// Exports output `port` by name.
    pub fn export(self, index: u64, port: u64, name: &str) -> Self {
        self.with_node(index, |n| {
            if let Some(p) = n.output_ports.get_mut(&PortIndex(port)) {
                p.export = Some(StreamExport {
                    stream_name: Some(name.to_owned()),
                    ..StreamExport::default()
                });
            }
        })
    }

    /// Imports a named stream into input `port`.
    pub fn import(self, index: u64, port: u64, name: &str) -> Self {
        self.with_node(index, |n| {
            if let Some(p) = n.input_ports.get_mut(&PortIndex(port)) {
                p.imports = Some(StreamImport {
                    property_based: None,
                    name_based: vec![name.to_owned()],
                });
            }
        })
    }

    /// Marks output `port` as not viewable.
    pub fn hidden(self, index: u64, port: u64) -> Self {
        self.with_node(index, |n| {
            if let Some(p) = n.output_ports.get_mut(&PortIndex(port)) {
                p.viewable = Some(false);
            }
        })
    }

    /// Connects output 0 of `src` to input 0 of `dst`.
    pub fn connect(self, src: u64, dst: u64) -> Self {
        self.connect_ports(src, 0, dst, 0)
    }

    /// Connects output `src_port` of `src` to input `dst_port` of `dst`.
    pub fn connect_ports(mut self, src: u64, src_port: u64, dst: u64, dst_port: u64) -> Self {
        self.edges.push((
            PortRef::new(src, src_port),
            PortRef::new(dst, dst_port),
            None,
        ));
        self
    }

    /// Connects output 0 of `src` through one parallel channel to input 0 of `dst`.
    pub fn connect_channel(mut self, src: u64, dst: u64, splitter: u64, channel: u64) -> Self {
        self.edges.push((
            PortRef::new(src, 0),
            PortRef::new(dst, 0),
            Some(ChannelRef::new(splitter, channel)),
        ));
        self
    }

    /// Reverses node and connection insertion order.
    pub fn reversed(mut self) -> Self {
        self.nodes.reverse();
        self.edges.reverse();
        self
    }

    /// Builds the application.
    pub fn build(self) -> Result<TopologyApplication, TopologyError> {
        let mut tapp = TopologyApplication::new(self.app);
        for node in self.nodes {
            tapp.add_node(node)?;
        }
        for (source, destination, channel) in self.edges {
            tapp.connect(source, destination, channel)?;
        }
        Ok(tapp)
    }

    /// Builds the application and wraps it in a [`Topology`].
    pub fn into_topology(self) -> Result<Topology, TopologyError> {
        let mut topology = Topology::new();
        topology.insert(self.build()?);
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn dangling_connection_fails_the_build() {
        let err = TopologyBuilder::new(1)
            .operator(0, 0, 1)
            .connect(0, 5)
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::NodeNotFound { .. }));
    }

    #[test]
    fn mutators_shape_the_node() {
        let tapp = TopologyBuilder::new(1)
            .operator(0, 1, 1)
            .queued(0, 0)
            .splitter(0, 0, 0, 3)
            .threading(0, "dynamic")
            .build()
            .unwrap();
        let node = tapp.node(NodeIndex(0)).unwrap();
        assert!(node.input_ports[&PortIndex(0)].is_queued());
        assert_eq!(node.output_ports[&PortIndex(0)].splitters.len(), 1);
        assert!(node.threading_model().unwrap().is_some());
    }
}
