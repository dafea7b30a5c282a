// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Container-level identifiers.
use fusion_topology::{AppId, ChannelRef, PortRef};
use serde::{Deserialize, Serialize};

/// Index of a fused container within its application.
///
/// Allocated sequentially by [`crate::FusedApplication`] and never reused
/// while the container is live.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContainerIndex(pub u64);

impl ContainerIndex {
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

impl core::fmt::Display for ContainerIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a container port, unique per container and direction.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContainerPortIndex(pub u64);

impl ContainerPortIndex {
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

impl core::fmt::Display for ContainerPortIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a container output port stands for.
///
/// Output ports are shared by every inter-container connection leaving the
/// same logical port, except that each parallel channel gets its own port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutputSource {
    /// The whole logical output port.
    Port(PortRef),
    /// One parallel channel of a logical output port.
    Channel(PortRef, ChannelRef),
}

impl OutputSource {
    /// The logical output port behind this source.
    #[must_use]
    pub const fn port(self) -> PortRef {
        match self {
            Self::Port(p) | Self::Channel(p, _) => p,
        }
    }

    /// The channel, when the source is channel-specific.
    #[must_use]
    pub const fn channel(self) -> Option<ChannelRef> {
        match self {
            Self::Port(_) => None,
            Self::Channel(_, c) => Some(c),
        }
    }
}

/// Natural key of a container connection.
///
/// Equality and ordering are defined entirely by the five endpoint fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FusedContainerConnectionId {
    /// Owning fused application.
    pub app_id: AppId,
    /// Container of the source output port.
    pub source_container: ContainerIndex,
    /// Source container output port.
    pub source_port: ContainerPortIndex,
    /// Container of the destination input port.
    pub destination_container: ContainerIndex,
    /// Destination container input port.
    pub destination_port: ContainerPortIndex,
}

impl core::fmt::Display for FusedContainerConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "app{}:pe{}.o{}->pe{}.i{}",
            self.app_id,
            self.source_container,
            self.source_port,
            self.destination_container,
            self.destination_port
        )
    }
}
