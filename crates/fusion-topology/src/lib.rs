// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Logical topology model for streaming applications.
//!
//! Operators (nodes) own input and output ports; ports are joined by logical
//! connections, and output ports may fan out into parallel channels through
//! splitters. Every lookup returns a [`TopologyError`] on a missing reference
//! so callers choose between recording the anomaly and aborting.
#![forbid(unsafe_code)]

mod application;
mod error;
mod ident;
mod node;
mod port;

pub use application::{Topology, TopologyApplication};
pub use error::TopologyError;
pub use ident::{
    AppId, ChannelIndex, ChannelRef, NodeIndex, PortIndex, PortRef, SplitterIndex,
    TopologyConnectionId,
};
pub use node::{
    Annotation, AnnotationKeyValue, DeploymentDescriptor, Language, ParallelRegion,
    ThreadingModel, ThreadingState, TopologyNode, THREADING_MODEL_KEY, THREADING_TAG,
};
pub use port::{
    CongestionPolicy, ParallelChannel, Splitter, StreamExport, StreamImport, ThreadedPort,
    TopologyInputPort, TopologyOutputPort,
};
