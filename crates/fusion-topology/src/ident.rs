// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Index newtypes and composite identities for the logical topology.
//!
//! Every index is an opaque non-negative integer. Distinct wrappers keep node,
//! port, splitter, and channel indices from being mixed up; ordering is the
//! numeric order of the wrapped value.

use serde::{Deserialize, Serialize};

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the underlying raw value.
            #[must_use]
            pub const fn value(self) -> u64 {
                self.0
            }

            /// Returns the index immediately after this one.
            #[must_use]
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

index_type!(
    /// Identifier of a topology application (one per submitted job).
    AppId
);
index_type!(
    /// Index of an operator node within its topology application.
    NodeIndex
);
index_type!(
    /// Index of an input or output port within its owning node.
    PortIndex
);
index_type!(
    /// Index of a splitter attached to an output port.
    SplitterIndex
);
index_type!(
    /// Index of a parallel channel within a splitter.
    ChannelIndex
);

/// Reference to one port of one node: `(node, port)`.
///
/// Direction is implied by context; the same `PortRef` value may name an
/// input port or an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node.
    pub node: NodeIndex,
    /// Port index within the node.
    pub port: PortIndex,
}

impl PortRef {
    /// Builds a port reference from raw indices.
    #[must_use]
    pub const fn new(node: u64, port: u64) -> Self {
        Self {
            node: NodeIndex(node),
            port: PortIndex(port),
        }
    }
}

impl core::fmt::Display for PortRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

/// Identity of one parallel channel: `(splitter, channel)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Splitter on the source output port.
    pub splitter: SplitterIndex,
    /// Channel within the splitter.
    pub channel: ChannelIndex,
}

impl ChannelRef {
    /// Builds a channel reference from raw indices.
    #[must_use]
    pub const fn new(splitter: u64, channel: u64) -> Self {
        Self {
            splitter: SplitterIndex(splitter),
            channel: ChannelIndex(channel),
        }
    }
}

/// Natural key of a logical connection.
///
/// Two connections between the same ports that belong to different parallel
/// channels are distinct connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopologyConnectionId {
    /// Source output port.
    pub source: PortRef,
    /// Destination input port.
    pub destination: PortRef,
    /// Parallel channel the connection belongs to, if any.
    pub channel: Option<ChannelRef>,
}

impl core::fmt::Display for TopologyConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}->{}", self.source, self.destination)?;
        if let Some(ch) = self.channel {
            write!(f, "[s{}c{}]", ch.splitter, ch.channel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_order_by_source_then_destination_then_channel() {
        let plain = TopologyConnectionId {
            source: PortRef::new(1, 0),
            destination: PortRef::new(2, 0),
            channel: None,
        };
        let channelled = TopologyConnectionId {
            channel: Some(ChannelRef::new(0, 1)),
            ..plain
        };
        let later_source = TopologyConnectionId {
            source: PortRef::new(1, 1),
            ..plain
        };
        assert!(plain < channelled);
        assert!(channelled < later_source);
        assert_eq!(channelled.to_string(), "1.0->2.0[s0c1]");
    }
}
