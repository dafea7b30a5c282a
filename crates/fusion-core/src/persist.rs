// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted identity of fused applications.
//!
//! Only the fields that cannot be re-derived are stored: indices, the
//! specification, and the port tables used to check a rebuild. Encoding
//! is CBOR.
use std::collections::BTreeSet;

use fusion_topology::{AppId, ChannelRef, NodeIndex, PortRef};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerSpecification, FusedContainer};
use crate::error::FuseError;
use crate::ident::{ContainerIndex, ContainerPortIndex};

/// One row of a persisted port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPort {
    /// Container port index.
    pub index: ContainerPortIndex,
    /// Logical port behind it.
    pub logical: PortRef,
    /// Channel, for channel-specific output ports.
    pub channel: Option<ChannelRef>,
}

/// Identity fields of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContainer {
    /// Container index.
    pub index: ContainerIndex,
    /// Owning fused application.
    pub app_id: AppId,
    /// Topology application of the nodes.
    pub topology_app_id: AppId,
    /// Partition identity string.
    pub specification_id: String,
    /// Nodes assigned by the specification.
    pub nodes: BTreeSet<NodeIndex>,
    /// Input port table in index order.
    pub input_ports: Vec<PersistedPort>,
    /// Output port table in index order.
    pub output_ports: Vec<PersistedPort>,
}

impl PersistedContainer {
    /// Captures the identity of a live container.
    pub fn capture(container: &FusedContainer) -> Self {
        let spec = container.specification();
        Self {
            index: container.index(),
            app_id: container.app_id(),
            topology_app_id: spec.topology_app_id,
            specification_id: spec.id.clone(),
            nodes: spec.nodes.clone(),
            input_ports: input_table(container),
            output_ports: output_table(container),
        }
    }

    /// Specification to rebuild the container from.
    pub fn specification(&self) -> ContainerSpecification {
        ContainerSpecification {
            id: self.specification_id.clone(),
            topology_app_id: self.topology_app_id,
            nodes: self.nodes.clone(),
        }
    }

    /// Checks that a rebuilt container matches what was stored.
    pub fn verify(&self, rebuilt: &FusedContainer) -> Result<(), FuseError> {
        let mismatch = |detail: String| FuseError::RecoveryMismatch {
            container: self.index,
            detail,
        };
        if rebuilt.index() != self.index || rebuilt.app_id() != self.app_id {
            return Err(mismatch(format!(
                "identity {}/{} rebuilt as {}/{}",
                self.app_id,
                self.index,
                rebuilt.app_id(),
                rebuilt.index()
            )));
        }
        let inputs = input_table(rebuilt);
        if inputs != self.input_ports {
            return Err(mismatch(format!(
                "{} input ports stored, {} derived",
                self.input_ports.len(),
                inputs.len()
            )));
        }
        let outputs = output_table(rebuilt);
        if outputs != self.output_ports {
            return Err(mismatch(format!(
                "{} output ports stored, {} derived",
                self.output_ports.len(),
                outputs.len()
            )));
        }
        Ok(())
    }
}

fn input_table(container: &FusedContainer) -> Vec<PersistedPort> {
    container
        .input_ports()
        .map(|p| PersistedPort {
            index: p.port.index,
            logical: p.logical,
            channel: None,
        })
        .collect()
}

fn output_table(container: &FusedContainer) -> Vec<PersistedPort> {
    container
        .output_ports()
        .map(|p| PersistedPort {
            index: p.port.index,
            logical: p.logical,
            channel: p.channel,
        })
        .collect()
}

/// Identity fields of one fused application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedApplication {
    /// Application id.
    pub id: AppId,
    /// Next container index to allocate.
    pub next_container_index: ContainerIndex,
    /// Live containers in index order.
    pub containers: Vec<PersistedContainer>,
}

impl PersistedApplication {
    /// Encodes as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, FuseError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| FuseError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, FuseError> {
        ciborium::de::from_reader(bytes).map_err(|e| FuseError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn cbor_round_trip_preserves_identity_fields() {
        let persisted = PersistedApplication {
            id: AppId(3),
            next_container_index: ContainerIndex(2),
            containers: vec![PersistedContainer {
                index: ContainerIndex(1),
                app_id: AppId(3),
                topology_app_id: AppId(9),
                specification_id: "pe-1".to_owned(),
                nodes: [NodeIndex(4), NodeIndex(5)].into_iter().collect(),
                input_ports: vec![],
                output_ports: vec![PersistedPort {
                    index: ContainerPortIndex(0),
                    logical: PortRef::new(5, 0),
                    channel: Some(ChannelRef::new(0, 1)),
                }],
            }],
        };
        let bytes = persisted.to_cbor().unwrap();
        assert_eq!(PersistedApplication::from_cbor(&bytes).unwrap(), persisted);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = PersistedApplication::from_cbor(&[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, FuseError::Decode(_)));
    }
}
