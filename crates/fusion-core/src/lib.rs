// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Container fusion and thread propagation.
//!
//! Turns a logical topology plus a partition of its nodes into the physical
//! deployment model: fused containers, the ports on their boundaries, the
//! connections between them, and for each operator and port whether it can
//! be reached by more than one thread.
//!
//! ```text
//! ContainerSpecification ─► FusedContainer::build ─► FusedApplication (wiring)
//!                                   │
//!                                   └─► ThreadPropagator ─► flags on topology
//! ```
#![forbid(unsafe_code)]

mod application;
mod config;
mod connection;
mod container;
mod error;
mod export;
mod ident;
mod persist;
mod port;
mod propagator;
mod registry;
mod streams;
mod summary;

pub use application::FusedApplication;
pub use config::{
    AnomalyPolicy, ConfigError, ConfigService, ConfigStore, FuserConfig, FUSER_CONFIG_KEY,
};
pub use connection::FusedContainerConnection;
pub use container::{ContainerSpecification, FusedContainer};
pub use error::{Anomaly, Diagnostics, FuseError, Severity};
pub use export::{
    Hash32, PhysicalConnection, PhysicalContainer, PhysicalInputPort, PhysicalModel,
    PhysicalOperator, PhysicalOutputPort, PhysicalQueuedPort,
};
pub use ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId, OutputSource};
pub use persist::{PersistedApplication, PersistedContainer, PersistedPort};
pub use port::{FusedContainerInputPort, FusedContainerOutputPort, FusedContainerPort};
pub use propagator::{Classification, ThreadPropagator};
pub use registry::FusionRegistry;
pub use streams::{logical_names, RuntimeStream, StreamId};
pub use summary::{ContainerSummary, TraceLevel};
