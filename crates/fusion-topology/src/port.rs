// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operator ports, queued (threaded) ports, splitters, and stream import/export.
use std::collections::{BTreeMap, BTreeSet};

use crate::ident::{ChannelIndex, PortIndex, SplitterIndex, TopologyConnectionId};

/// Behavior of a queued port when its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionPolicy {
    /// Block the producer until space is available.
    #[default]
    Wait,
    /// Drop the incoming tuple.
    DropFirst,
    /// Evict the oldest queued tuple.
    DropLast,
}

/// Buffering boundary in front of an input port.
///
/// Each queued port is drained by its own thread, so upstream callers never
/// run the operator directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedPort {
    /// Policy applied when the queue is full.
    pub congestion_policy: CongestionPolicy,
    /// Queue capacity; `None` selects the runtime default.
    pub queue_size: Option<u64>,
    /// Whether fusion injected the port rather than the application author.
    pub injected: bool,
    /// Computed by thread propagation: at most one producer thread enqueues.
    pub single_threaded_on_input: bool,
}

impl ThreadedPort {
    /// Port as injected by the fuser for parallel fan-in or dedicated threading.
    #[must_use]
    pub const fn injected(congestion_policy: CongestionPolicy, queue_size: Option<u64>) -> Self {
        Self {
            congestion_policy,
            queue_size,
            injected: true,
            single_threaded_on_input: true,
        }
    }

    /// Port declared by the application.
    #[must_use]
    pub const fn declared(congestion_policy: CongestionPolicy, queue_size: Option<u64>) -> Self {
        Self {
            congestion_policy,
            queue_size,
            injected: false,
            single_threaded_on_input: true,
        }
    }
}

/// Stream import subscription on an input port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamImport {
    /// Property-based subscription expression.
    pub property_based: Option<String>,
    /// Names of exported streams imported by name.
    pub name_based: Vec<String>,
}

impl StreamImport {
    /// An import only crosses the container boundary when it subscribes to something.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.property_based.is_some() || !self.name_based.is_empty()
    }
}

/// Stream export declaration on an output port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamExport {
    /// Export name, when exported by name.
    pub stream_name: Option<String>,
    /// Export properties, when exported by properties.
    pub properties: BTreeMap<String, String>,
}

/// One parallel channel fed by a [`Splitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelChannel {
    /// Channel index within the splitter.
    pub index: ChannelIndex,
}

/// Fans one output port into parallel channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splitter {
    /// Splitter index within the output port.
    pub index: SplitterIndex,
    /// Channels keyed by channel index.
    pub channels: BTreeMap<ChannelIndex, ParallelChannel>,
}

impl Splitter {
    /// Builds a splitter with channels `0..width`.
    #[must_use]
    pub fn with_width(index: SplitterIndex, width: u64) -> Self {
        Self {
            index,
            channels: (0..width)
                .map(|c| (ChannelIndex(c), ParallelChannel { index: ChannelIndex(c) }))
                .collect(),
        }
    }
}

/// Input port of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyInputPort {
    /// Port index within the node.
    pub index: PortIndex,
    /// Port name.
    pub name: String,
    /// Incoming logical connections.
    pub connections: BTreeSet<TopologyConnectionId>,
    /// Stream import subscription, if any.
    pub imports: Option<StreamImport>,
    /// Queued port in front of this input, if any.
    pub threaded_port: Option<ThreadedPort>,
}

impl TopologyInputPort {
    /// Creates an unconnected, unqueued input port.
    pub fn new(index: PortIndex, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            connections: BTreeSet::new(),
            imports: None,
            threaded_port: None,
        }
    }

    /// Whether the port is fed through a queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.threaded_port.is_some()
    }

    /// Whether the port imports streams from outside the application.
    #[must_use]
    pub fn is_imported(&self) -> bool {
        self.imports.as_ref().is_some_and(StreamImport::is_active)
    }
}

/// Output port of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyOutputPort {
    /// Port index within the node.
    pub index: PortIndex,
    /// Port name.
    pub name: String,
    /// Physical stream name.
    pub stream_name: String,
    /// Logical stream name (differs for parallel replicas).
    pub logical_stream_name: String,
    /// Outgoing logical connections.
    pub connections: BTreeSet<TopologyConnectionId>,
    /// Export declaration, if the stream is exported.
    pub export: Option<StreamExport>,
    /// Splitters keyed by splitter index.
    pub splitters: BTreeMap<SplitterIndex, Splitter>,
    /// Viewability flag; `None` means viewable.
    pub viewable: Option<bool>,
    /// Tuple type of the stream.
    pub tuple_type_index: Option<u64>,
}

impl TopologyOutputPort {
    /// Creates an unconnected output port whose stream is named after the port.
    pub fn new(index: PortIndex, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            index,
            stream_name: name.clone(),
            logical_stream_name: name.clone(),
            name,
            connections: BTreeSet::new(),
            export: None,
            splitters: BTreeMap::new(),
            viewable: None,
            tuple_type_index: None,
        }
    }

    /// Whether the stream is exported outside the application.
    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.export.is_some()
    }

    /// Whether the stream may be viewed.
    #[must_use]
    pub fn is_viewable(&self) -> bool {
        self.viewable.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_import_does_not_count_as_imported() {
        let mut port = TopologyInputPort::new(PortIndex(0), "in");
        port.imports = Some(StreamImport::default());
        assert!(!port.is_imported());
        port.imports = Some(StreamImport {
            property_based: None,
            name_based: vec!["Trades".to_owned()],
        });
        assert!(port.is_imported());
    }

    #[test]
    fn splitter_width_creates_contiguous_channels() {
        let s = Splitter::with_width(SplitterIndex(0), 3);
        let keys: Vec<u64> = s.channels.keys().map(|c| c.value()).collect();
        assert_eq!(keys, vec![0, 1, 2]);
    }
}
