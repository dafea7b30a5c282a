// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Container connections.
use fusion_topology::TopologyConnectionId;
use serde::{Deserialize, Serialize};

use crate::ident::FusedContainerConnectionId;

/// Deduplicated edge between a container output port and a container input port.
///
/// Immutable once built. Several logical connections may map to the same id;
/// the first one wired is kept as the back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedContainerConnection {
    id: FusedContainerConnectionId,
    topology_connection: TopologyConnectionId,
}

impl FusedContainerConnection {
    pub(crate) fn new(
        id: FusedContainerConnectionId,
        topology_connection: TopologyConnectionId,
    ) -> Self {
        Self {
            id,
            topology_connection,
        }
    }

    /// Natural key.
    pub fn id(&self) -> FusedContainerConnectionId {
        self.id
    }

    /// Logical connection this edge was first derived from.
    pub fn topology_connection(&self) -> TopologyConnectionId {
        self.topology_connection
    }
}
