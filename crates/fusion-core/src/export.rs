// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Physical deployment model handed to the runtime.
use blake3::Hash;
use ciborium::ser::into_writer;
use fusion_topology::{
    AppId, ChannelRef, NodeIndex, PortIndex, PortRef, Topology, TopologyConnectionId,
};
use serde::{Deserialize, Serialize};

use crate::application::FusedApplication;
use crate::error::FuseError;
use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId};
use crate::summary::ContainerSummary;

/// Blake3 digest of a canonical encoding (32 bytes).
pub type Hash32 = [u8; 32];

/// Queued port in front of an operator input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalQueuedPort {
    /// Input port index on the operator.
    pub port: PortIndex,
    /// Whether fusion injected the queue.
    pub injected: bool,
    /// At most one producer thread enqueues.
    pub single_threaded_on_input: bool,
}

/// Operator as deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalOperator {
    /// Node index.
    pub index: NodeIndex,
    /// Physical operator name.
    pub name: String,
    /// At most one thread calls the operator's inputs.
    pub single_threaded_on_inputs: bool,
    /// At most one thread submits from the operator's outputs.
    pub single_threaded_on_outputs: bool,
    /// Queued input ports in port order.
    pub queued_ports: Vec<PhysicalQueuedPort>,
}

/// Container input port as deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalInputPort {
    /// Container port index.
    pub index: ContainerPortIndex,
    /// Logical input port.
    pub logical: PortRef,
    /// Attached container connections.
    pub connections: Vec<FusedContainerConnectionId>,
}

/// Container output port as deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalOutputPort {
    /// Container port index.
    pub index: ContainerPortIndex,
    /// Logical output port.
    pub logical: PortRef,
    /// Channel, for channel-specific ports.
    pub channel: Option<ChannelRef>,
    /// At most one thread submits through the port.
    pub single_threaded: bool,
    /// Attached container connections.
    pub connections: Vec<FusedContainerConnectionId>,
}

/// One processing element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalContainer {
    /// Container index.
    pub index: ContainerIndex,
    /// Topology application of the operators.
    pub topology_app_id: AppId,
    /// Partition identity string.
    pub specification_id: String,
    /// Hosted operators in index order.
    pub operators: Vec<PhysicalOperator>,
    /// Summarized deployment properties.
    pub summary: ContainerSummary,
    /// Input ports in index order.
    pub input_ports: Vec<PhysicalInputPort>,
    /// Output ports in index order.
    pub output_ports: Vec<PhysicalOutputPort>,
    /// Union of input-port connections.
    pub incoming: Vec<FusedContainerConnectionId>,
    /// Union of output-port connections.
    pub outgoing: Vec<FusedContainerConnectionId>,
}

/// Container connection as deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalConnection {
    /// Natural key.
    pub id: FusedContainerConnectionId,
    /// Logical connection it was derived from.
    pub topology_connection: TopologyConnectionId,
}

/// Ordered snapshot of a fused application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalModel {
    /// Fused application id.
    pub app_id: AppId,
    /// Containers in index order.
    pub containers: Vec<PhysicalContainer>,
    /// Connections in id order.
    pub connections: Vec<PhysicalConnection>,
}

impl PhysicalModel {
    /// Snapshots `app`, reading computed operator flags from `topology`.
    pub fn capture(app: &FusedApplication, topology: &Topology) -> Result<Self, FuseError> {
        let mut containers = Vec::new();
        for c in app.containers() {
            let tapp = topology.application(c.topology_app_id())?;
            let mut operators = Vec::new();
            for index in c.nodes() {
                let node = tapp.node(*index)?;
                operators.push(PhysicalOperator {
                    index: node.index,
                    name: node.name.clone(),
                    single_threaded_on_inputs: node.threading.single_threaded_on_inputs,
                    single_threaded_on_outputs: node.threading.single_threaded_on_outputs,
                    queued_ports: node
                        .input_ports
                        .values()
                        .filter_map(|p| {
                            p.threaded_port.as_ref().map(|t| PhysicalQueuedPort {
                                port: p.index,
                                injected: t.injected,
                                single_threaded_on_input: t.single_threaded_on_input,
                            })
                        })
                        .collect(),
                });
            }
            containers.push(PhysicalContainer {
                index: c.index(),
                topology_app_id: c.topology_app_id(),
                specification_id: c.specification().id.clone(),
                operators,
                summary: c.summary().clone(),
                input_ports: c
                    .input_ports()
                    .map(|p| PhysicalInputPort {
                        index: p.port.index,
                        logical: p.logical,
                        connections: p.port.connections().iter().copied().collect(),
                    })
                    .collect(),
                output_ports: c
                    .output_ports()
                    .map(|p| PhysicalOutputPort {
                        index: p.port.index,
                        logical: p.logical,
                        channel: p.channel,
                        single_threaded: p.single_threaded,
                        connections: p.port.connections().iter().copied().collect(),
                    })
                    .collect(),
                incoming: c.incoming_connections().into_iter().collect(),
                outgoing: c.outgoing_connections().into_iter().collect(),
            });
        }
        Ok(Self {
            app_id: app.id(),
            containers,
            connections: app
                .connections()
                .map(|c| PhysicalConnection {
                    id: c.id(),
                    topology_connection: c.topology_connection(),
                })
                .collect(),
        })
    }

    /// Canonical CBOR encoding.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, FuseError> {
        let mut bytes = Vec::new();
        into_writer(self, &mut bytes).map_err(|e| FuseError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Blake3 hash of the canonical form.
    pub fn digest(&self) -> Result<Hash32, FuseError> {
        let h: Hash = blake3::hash(&self.to_canonical_bytes()?);
        Ok(h.into())
    }
}
