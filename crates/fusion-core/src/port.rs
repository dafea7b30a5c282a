// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Physical ports on the boundary of a fused container.
use std::collections::BTreeSet;

use fusion_topology::{AppId, ChannelRef, PortRef};
use serde::{Deserialize, Serialize};

use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId, OutputSource};

/// Identity and connection set shared by container input and output ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedContainerPort {
    /// Port index, sequential per container and direction.
    pub index: ContainerPortIndex,
    /// Owning container.
    pub container: ContainerIndex,
    /// Owning fused application.
    pub app_id: AppId,
    connections: BTreeSet<FusedContainerConnectionId>,
}

impl FusedContainerPort {
    pub(crate) fn new(index: ContainerPortIndex, container: ContainerIndex, app_id: AppId) -> Self {
        Self {
            index,
            container,
            app_id,
            connections: BTreeSet::new(),
        }
    }

    /// Container connections attached to this port.
    pub fn connections(&self) -> &BTreeSet<FusedContainerConnectionId> {
        &self.connections
    }

    pub(crate) fn link(&mut self, id: FusedContainerConnectionId) -> bool {
        self.connections.insert(id)
    }

    pub(crate) fn unlink(&mut self, id: &FusedContainerConnectionId) -> bool {
        self.connections.remove(id)
    }

}

/// Container input port summarizing one logical input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedContainerInputPort {
    /// Identity and connections.
    pub port: FusedContainerPort,
    /// Logical input port fed through this port.
    pub logical: PortRef,
}

/// Container output port summarizing one logical output port or one of its channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedContainerOutputPort {
    /// Identity and connections.
    pub port: FusedContainerPort,
    /// Logical output port behind this port.
    pub logical: PortRef,
    /// Channel, when the port carries one parallel channel only.
    pub channel: Option<ChannelRef>,
    /// Computed by thread propagation: at most one thread submits here.
    pub single_threaded: bool,
}

impl FusedContainerOutputPort {
    /// The key under which the container indexes this port.
    pub fn source(&self) -> OutputSource {
        match self.channel {
            Some(c) => OutputSource::Channel(self.logical, c),
            None => OutputSource::Port(self.logical),
        }
    }
}
