// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lookup and construction errors for the topology model.
use thiserror::Error;

use crate::ident::{AppId, ChannelRef, NodeIndex, PortRef, SplitterIndex, TopologyConnectionId};

/// Error returned by topology lookups and builders.
///
/// Every lookup in this crate may fail with "not found"; fusion decides
/// whether that aborts or is recorded and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// No application with this id.
    #[error("topology application not found: {0}")]
    ApplicationNotFound(AppId),
    /// No node with this index in the application.
    #[error("node not found: {node} (application {app})")]
    NodeNotFound {
        /// Application searched.
        app: AppId,
        /// Missing node.
        node: NodeIndex,
    },
    /// A node with this index already exists.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeIndex),
    /// The node has no input port with this index.
    #[error("input port not found: {0}")]
    InputPortNotFound(PortRef),
    /// The node has no output port with this index.
    #[error("output port not found: {0}")]
    OutputPortNotFound(PortRef),
    /// No logical connection with this id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(TopologyConnectionId),
    /// The output port has no splitter with this index.
    #[error("splitter {splitter} not found on output port {port}")]
    SplitterNotFound {
        /// Output port searched.
        port: PortRef,
        /// Missing splitter.
        splitter: SplitterIndex,
    },
    /// The splitter has no channel with this index.
    #[error("channel {} not found on splitter {} of output port {port}", .channel.channel, .channel.splitter)]
    ChannelNotFound {
        /// Output port searched.
        port: PortRef,
        /// Missing channel.
        channel: ChannelRef,
    },
    /// A `threading` annotation names an unknown model.
    #[error("node {node}: unknown threading model '{value}'")]
    UnknownThreadingModel {
        /// Annotated node.
        node: NodeIndex,
        /// Raw annotation value.
        value: String,
    },
}
