// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topology applications and the multi-application [`Topology`] store.
use std::collections::{BTreeMap, BTreeSet};

use crate::error::TopologyError;
use crate::ident::{AppId, ChannelRef, NodeIndex, PortRef, SplitterIndex, TopologyConnectionId};
use crate::node::TopologyNode;
use crate::port::{ParallelChannel, Splitter, TopologyInputPort, TopologyOutputPort};

/// Logical graph of one submitted application.
///
/// Nodes and connections live in `BTreeMap`/`BTreeSet`s so every iteration is
/// in ascending index order regardless of insertion order.
#[derive(Debug, Clone)]
pub struct TopologyApplication {
    id: AppId,
    nodes: BTreeMap<NodeIndex, TopologyNode>,
    connections: BTreeSet<TopologyConnectionId>,
}

impl TopologyApplication {
    /// Creates an empty application.
    #[must_use]
    pub fn new(id: AppId) -> Self {
        Self {
            id,
            nodes: BTreeMap::new(),
            connections: BTreeSet::new(),
        }
    }

    /// Returns the application id.
    #[must_use]
    pub fn id(&self) -> AppId {
        self.id
    }

    /// Inserts a node; its `app_id` is rewritten to this application.
    ///
    /// Ports carried by `node` must not reference connections yet; use
    /// [`TopologyApplication::connect`] after all nodes are present.
    pub fn add_node(&mut self, mut node: TopologyNode) -> Result<(), TopologyError> {
        if self.nodes.contains_key(&node.index) {
            return Err(TopologyError::DuplicateNode(node.index));
        }
        node.app_id = self.id;
        self.nodes.insert(node.index, node);
        Ok(())
    }

    /// Connects an output port to an input port, optionally through a channel.
    ///
    /// Both ports must exist, and the channel (if given) must exist on the
    /// source port. Connecting the same triple twice returns the existing id.
    pub fn connect(
        &mut self,
        source: PortRef,
        destination: PortRef,
        channel: Option<ChannelRef>,
    ) -> Result<TopologyConnectionId, TopologyError> {
        self.input_port(destination)?;
        self.output_port(source)?;
        if let Some(ch) = channel {
            self.channel(source, ch)?;
        }
        let id = TopologyConnectionId {
            source,
            destination,
            channel,
        };
        self.output_port_mut(source)?.connections.insert(id);
        self.input_port_mut(destination)?.connections.insert(id);
        self.connections.insert(id);
        Ok(id)
    }

    /// Iterates nodes in ascending index order.
    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.nodes.values()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates all logical connections in ascending id order.
    pub fn connections(&self) -> impl Iterator<Item = &TopologyConnectionId> {
        self.connections.iter()
    }

    /// Looks up a node.
    pub fn node(&self, index: NodeIndex) -> Result<&TopologyNode, TopologyError> {
        self.nodes.get(&index).ok_or(TopologyError::NodeNotFound {
            app: self.id,
            node: index,
        })
    }

    /// Looks up a node mutably.
    pub fn node_mut(&mut self, index: NodeIndex) -> Result<&mut TopologyNode, TopologyError> {
        let app = self.id;
        self.nodes
            .get_mut(&index)
            .ok_or(TopologyError::NodeNotFound { app, node: index })
    }

    /// Looks up an input port.
    pub fn input_port(&self, port: PortRef) -> Result<&TopologyInputPort, TopologyError> {
        self.node(port.node)?
            .input_ports
            .get(&port.port)
            .ok_or(TopologyError::InputPortNotFound(port))
    }

    /// Looks up an input port mutably.
    pub fn input_port_mut(
        &mut self,
        port: PortRef,
    ) -> Result<&mut TopologyInputPort, TopologyError> {
        self.node_mut(port.node)?
            .input_ports
            .get_mut(&port.port)
            .ok_or(TopologyError::InputPortNotFound(port))
    }

    /// Looks up an output port.
    pub fn output_port(&self, port: PortRef) -> Result<&TopologyOutputPort, TopologyError> {
        self.node(port.node)?
            .output_ports
            .get(&port.port)
            .ok_or(TopologyError::OutputPortNotFound(port))
    }

    /// Looks up an output port mutably.
    pub fn output_port_mut(
        &mut self,
        port: PortRef,
    ) -> Result<&mut TopologyOutputPort, TopologyError> {
        self.node_mut(port.node)?
            .output_ports
            .get_mut(&port.port)
            .ok_or(TopologyError::OutputPortNotFound(port))
    }

    /// Confirms that a logical connection exists.
    pub fn connection(
        &self,
        id: TopologyConnectionId,
    ) -> Result<TopologyConnectionId, TopologyError> {
        self.connections
            .get(&id)
            .copied()
            .ok_or(TopologyError::ConnectionNotFound(id))
    }

    /// Looks up a splitter on an output port.
    pub fn splitter(
        &self,
        port: PortRef,
        splitter: SplitterIndex,
    ) -> Result<&Splitter, TopologyError> {
        self.output_port(port)?
            .splitters
            .get(&splitter)
            .ok_or(TopologyError::SplitterNotFound { port, splitter })
    }

    /// Looks up a parallel channel on an output port.
    pub fn channel(
        &self,
        port: PortRef,
        channel: ChannelRef,
    ) -> Result<&ParallelChannel, TopologyError> {
        self.splitter(port, channel.splitter)?
            .channels
            .get(&channel.channel)
            .ok_or(TopologyError::ChannelNotFound { port, channel })
    }

    /// Every connection touching any port of `node`.
    pub fn connections_of(
        &self,
        node: NodeIndex,
    ) -> Result<BTreeSet<TopologyConnectionId>, TopologyError> {
        let n = self.node(node)?;
        Ok(n.output_ports
            .values()
            .flat_map(|p| p.connections.iter())
            .chain(n.input_ports.values().flat_map(|p| p.connections.iter()))
            .copied()
            .collect())
    }
}

/// All topology applications known to the process, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    applications: BTreeMap<AppId, TopologyApplication>,
}

impl Topology {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an application.
    pub fn insert(&mut self, application: TopologyApplication) {
        self.applications.insert(application.id(), application);
    }

    /// Looks up an application.
    pub fn application(&self, id: AppId) -> Result<&TopologyApplication, TopologyError> {
        self.applications
            .get(&id)
            .ok_or(TopologyError::ApplicationNotFound(id))
    }

    /// Looks up an application mutably.
    pub fn application_mut(
        &mut self,
        id: AppId,
    ) -> Result<&mut TopologyApplication, TopologyError> {
        self.applications
            .get_mut(&id)
            .ok_or(TopologyError::ApplicationNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::ident::PortIndex;

    fn two_node_app() -> TopologyApplication {
        let mut app = TopologyApplication::new(AppId(1));
        let mut a = TopologyNode::new(AppId(1), NodeIndex(0), "a");
        a.output_ports
            .insert(PortIndex(0), TopologyOutputPort::new(PortIndex(0), "out"));
        let mut b = TopologyNode::new(AppId(1), NodeIndex(1), "b");
        b.input_ports
            .insert(PortIndex(0), TopologyInputPort::new(PortIndex(0), "in"));
        app.add_node(a).unwrap();
        app.add_node(b).unwrap();
        app
    }

    #[test]
    fn connect_links_both_ports() {
        let mut app = two_node_app();
        let id = app
            .connect(PortRef::new(0, 0), PortRef::new(1, 0), None)
            .unwrap();
        assert!(app
            .output_port(PortRef::new(0, 0))
            .unwrap()
            .connections
            .contains(&id));
        assert!(app
            .input_port(PortRef::new(1, 0))
            .unwrap()
            .connections
            .contains(&id));
        assert_eq!(app.connections_of(NodeIndex(1)).unwrap().len(), 1);
    }

    #[test]
    fn connect_rejects_missing_ports_and_channels() {
        let mut app = two_node_app();
        assert_eq!(
            app.connect(PortRef::new(0, 0), PortRef::new(1, 5), None),
            Err(TopologyError::InputPortNotFound(PortRef::new(1, 5)))
        );
        assert_eq!(
            app.connect(
                PortRef::new(0, 0),
                PortRef::new(1, 0),
                Some(ChannelRef::new(0, 0))
            ),
            Err(TopologyError::SplitterNotFound {
                port: PortRef::new(0, 0),
                splitter: SplitterIndex(0),
            })
        );
        assert_eq!(app.connections().count(), 0);
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let mut app = two_node_app();
        let err = app
            .add_node(TopologyNode::new(AppId(1), NodeIndex(0), "again"))
            .unwrap_err();
        assert_eq!(err, TopologyError::DuplicateNode(NodeIndex(0)));
    }

    #[test]
    fn lookup_failures_name_the_application() {
        let topo = Topology::new();
        assert_eq!(
            topo.application(AppId(4)).unwrap_err(),
            TopologyError::ApplicationNotFound(AppId(4))
        );
        let app = two_node_app();
        assert_eq!(
            app.node(NodeIndex(7)).unwrap_err(),
            TopologyError::NodeNotFound {
                app: AppId(1),
                node: NodeIndex(7),
            }
        );
    }
}
