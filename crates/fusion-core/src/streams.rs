// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Viewable streams produced by a container.
//!
//! Every viewable output port yields a physical stream. Replicas inside
//! parallel regions additionally contribute to logical streams that merge
//! all channels of the region under the logical operator name.
use std::collections::BTreeMap;

use fusion_topology::{NodeIndex, PortIndex, Topology};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::container::FusedContainer;
use crate::error::FuseError;

/// Key of a viewable stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId {
    /// Job the stream belongs to.
    pub job_id: u64,
    /// Physical or logical operator name.
    pub operator_name: String,
    /// Output port index.
    pub port: PortIndex,
}

/// A stream the runtime may attach viewers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStream {
    /// Key.
    pub id: StreamId,
    /// Hosting container, for physical streams.
    pub pe_id: Option<u64>,
    /// Producing operator, for physical streams.
    pub operator_index: Option<NodeIndex>,
    /// Operator name (logical name for logical streams).
    pub operator_name: String,
    /// Output port name.
    pub port_name: String,
    /// Stream name.
    pub stream_name: String,
    /// Tuple type of the stream.
    pub tuple_type_index: Option<u64>,
    /// Whether this is a merged logical view.
    pub is_logical: bool,
    /// Logical operator name of a replica.
    pub logical_operator_name: Option<String>,
    /// Logical stream name of a replica.
    pub logical_stream_name: Option<String>,
    /// Channel of a replica.
    pub channel: Option<u64>,
    /// Number of channels merged into a logical view.
    pub channel_count: u64,
}

impl FusedContainer {
    /// Enumerates the viewable streams of every owned node.
    pub fn viewable_streams(
        &self,
        topology: &Topology,
        job_id: u64,
        pe_id: u64,
    ) -> Result<BTreeMap<StreamId, RuntimeStream>, FuseError> {
        let tapp = topology.application(self.topology_app_id())?;
        let mut streams = BTreeMap::new();
        for index in self.nodes() {
            let node = tapp.node(*index)?;
            for port in node.output_ports.values().filter(|p| p.is_viewable()) {
                let id = StreamId {
                    job_id,
                    operator_name: node.name.clone(),
                    port: port.index,
                };
                let mut stream = RuntimeStream {
                    id: id.clone(),
                    pe_id: Some(pe_id),
                    operator_index: Some(node.index),
                    operator_name: node.name.clone(),
                    port_name: port.name.clone(),
                    stream_name: port.stream_name.clone(),
                    tuple_type_index: port.tuple_type_index,
                    is_logical: false,
                    logical_operator_name: None,
                    logical_stream_name: None,
                    channel: None,
                    channel_count: 0,
                };
                if node.is_replica() {
                    stream.logical_operator_name = Some(node.logical_name.clone());
                    stream.logical_stream_name = Some(port.logical_stream_name.clone());
                    stream.channel = Some(
                        node.parallel_regions
                            .first()
                            .and_then(|r| r.global_channel_index)
                            .unwrap_or(0),
                    );
                    for name in logical_names(&node.name, &node.logical_name) {
                        let logical_id = StreamId {
                            job_id,
                            operator_name: name,
                            port: port.index,
                        };
                        trace!(
                            operator = %logical_id.operator_name,
                            port = %port.index,
                            "logical view"
                        );
                        streams
                            .entry(logical_id.clone())
                            .and_modify(|s: &mut RuntimeStream| s.channel_count += 1)
                            .or_insert_with(|| RuntimeStream {
                                id: logical_id,
                                pe_id: None,
                                operator_index: None,
                                operator_name: node.logical_name.clone(),
                                port_name: port.name.clone(),
                                stream_name: port.stream_name.clone(),
                                tuple_type_index: port.tuple_type_index,
                                is_logical: true,
                                logical_operator_name: None,
                                logical_stream_name: None,
                                channel: None,
                                channel_count: 1,
                            });
                    }
                }
                streams.insert(id, stream);
            }
        }
        Ok(streams)
    }
}

/// Candidate logical names under which a replica's stream is merged.
///
/// `Outer[1].Mid[2].Op` with logical name `Outer.Mid.Op` yields
/// `Outer.Mid.Op` and `Outer[1].Mid.Op`.
pub fn logical_names(physical: &str, logical: &str) -> Vec<String> {
    if physical.starts_with(logical) {
        return vec![logical.to_owned()];
    }
    let phy: Vec<&str> = physical.split('.').collect();
    let log: Vec<&str> = logical.split('.').collect();
    if phy.len() != log.len() {
        warn!(
            physical,
            logical,
            "replica name does not follow its logical name; no logical view"
        );
        return Vec::new();
    }
    let mut names = Vec::new();
    for (i, (p, l)) in phy.iter().zip(&log).enumerate() {
        if p.find('[').is_some_and(|at| at > 0) && p.starts_with(l) {
            let suffix = log[i..].join(".");
            if i == 0 {
                names.push(suffix);
            } else {
                names.push(format!("{}.{suffix}", phy[..i].join(".")));
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_region_replica_maps_to_its_logical_name() {
        assert_eq!(logical_names("Op[2]", "Op"), vec!["Op".to_owned()]);
    }

    #[test]
    fn nested_regions_yield_one_view_per_replicated_segment() {
        assert_eq!(
            logical_names("Outer[0].Middle[1].Inner", "Outer.Middle.Inner"),
            vec![
                "Outer.Middle.Inner".to_owned(),
                "Outer[0].Middle.Inner".to_owned()
            ]
        );
    }

    #[test]
    fn mismatched_segment_counts_yield_nothing() {
        assert!(logical_names("A[0].B", "X.Y.Z").is_empty());
    }
}
