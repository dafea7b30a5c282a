// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fusion errors and the anomaly ledger.
//!
//! Missing references and malformed values are *anomalies*: depending on the
//! configured [`AnomalyPolicy`] they either abort the operation or are
//! recorded in [`Diagnostics`] while fusion carries on with the rest of the
//! application. Contract violations always abort.
use fusion_topology::{AppId, NodeIndex, TopologyConnectionId, TopologyError};
use thiserror::Error;
use tracing::warn;

use crate::config::AnomalyPolicy;
use crate::ident::{ContainerIndex, ContainerPortIndex, FusedContainerConnectionId};

/// How serious a [`FuseError`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Ignorable input noise; always recorded, never aborts.
    Cosmetic,
    /// A missing or inconsistent reference; aborts under [`AnomalyPolicy::Strict`].
    Structural,
    /// Broken engine invariant; always aborts.
    Contract,
}

/// Error type for fusion operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FuseError {
    /// A topology lookup failed.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// A container specification named no nodes.
    #[error("container specification '{0}' has no nodes")]
    EmptySpecification(String),
    /// A node's tracing level string is not a known level.
    #[error("node {node}: unrecognized tracing level '{value}'")]
    UnknownTraceLevel {
        /// Offending node.
        node: NodeIndex,
        /// Raw tracing string.
        value: String,
    },
    /// The peer endpoint of an inter-container connection is in no live container.
    #[error("connection {connection}: node {node} belongs to no live container")]
    UnassignedPeer {
        /// Connection being wired.
        connection: TopologyConnectionId,
        /// Unowned endpoint node.
        node: NodeIndex,
    },
    /// A container has no port for a connection it should carry.
    #[error("container {container}: no container port resolves connection {connection}")]
    UnresolvedPort {
        /// Container searched.
        container: ContainerIndex,
        /// Connection without a port.
        connection: TopologyConnectionId,
    },
    /// No fused application with this id is registered.
    #[error("fused application not registered: {0}")]
    ApplicationNotFound(AppId),
    /// A fused application with this id is already registered.
    #[error("fused application already registered: {0}")]
    DuplicateApplication(AppId),
    /// No live container with this index.
    #[error("container {container} not found in application {app}")]
    ContainerNotFound {
        /// Application searched.
        app: AppId,
        /// Missing container.
        container: ContainerIndex,
    },
    /// The container has no input port with this index.
    #[error("container {container} has no input port {port}")]
    InputPortNotFound {
        /// Container searched.
        container: ContainerIndex,
        /// Missing port.
        port: ContainerPortIndex,
    },
    /// The container has no output port with this index.
    #[error("container {container} has no output port {port}")]
    OutputPortNotFound {
        /// Container searched.
        container: ContainerIndex,
        /// Missing port.
        port: ContainerPortIndex,
    },
    /// No container connection with this id.
    #[error("container connection not found: {0}")]
    ConnectionNotFound(FusedContainerConnectionId),
    /// A node is owned by two live containers.
    #[error("node {node} is owned by both container {first} and container {second}")]
    NodeOwnedTwice {
        /// Doubly-owned node.
        node: NodeIndex,
        /// Lower-indexed owner.
        first: ContainerIndex,
        /// Higher-indexed owner.
        second: ContainerIndex,
    },
    /// Re-derived container state differs from what was persisted.
    #[error("container {container} does not match its persisted state: {detail}")]
    RecoveryMismatch {
        /// Recovered container.
        container: ContainerIndex,
        /// What differed.
        detail: String,
    },
    /// Encoding the physical model or persisted state failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// Decoding persisted state failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FuseError {
    /// Classifies the error.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Topology(TopologyError::UnknownThreadingModel { .. })
            | Self::UnknownTraceLevel { .. }
            | Self::UnassignedPeer { .. } => Severity::Cosmetic,
            Self::Topology(_) | Self::EmptySpecification(_) | Self::UnresolvedPort { .. } => {
                Severity::Structural
            }
            Self::ApplicationNotFound(_)
            | Self::DuplicateApplication(_)
            | Self::ContainerNotFound { .. }
            | Self::InputPortNotFound { .. }
            | Self::OutputPortNotFound { .. }
            | Self::ConnectionNotFound(_)
            | Self::NodeOwnedTwice { .. }
            | Self::RecoveryMismatch { .. }
            | Self::Encode(_)
            | Self::Decode(_) => Severity::Contract,
        }
    }

    /// Whether the error signals a broken engine invariant.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        self.severity() == Severity::Contract
    }
}

/// One recorded anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// What went wrong.
    pub error: FuseError,
    /// Where it happened (container, step).
    pub context: String,
}

/// Ordered ledger of anomalies recorded during fusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    anomalies: Vec<Anomaly>,
}

impl Diagnostics {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `error` or returns it, depending on `policy` and its severity.
    ///
    /// Returns `Err(error)` for contract violations, and for structural
    /// anomalies under [`AnomalyPolicy::Strict`]. Otherwise logs at `warn`,
    /// appends the anomaly, and returns `Ok(())` so the caller can skip the
    /// offending step.
    pub fn record(
        &mut self,
        policy: AnomalyPolicy,
        error: FuseError,
        context: impl Into<String>,
    ) -> Result<(), FuseError> {
        let abort = match error.severity() {
            Severity::Contract => true,
            Severity::Structural => policy == AnomalyPolicy::Strict,
            Severity::Cosmetic => false,
        };
        if abort {
            return Err(error);
        }
        let context = context.into();
        warn!(%error, %context, "fusion anomaly recorded");
        self.anomalies.push(Anomaly { error, context });
        Ok(())
    }

    /// Recorded anomalies in the order they occurred.
    #[must_use]
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Number of recorded anomalies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Moves all anomalies from `other` to the end of this ledger.
    pub fn absorb(&mut self, other: Diagnostics) {
        self.anomalies.extend(other.anomalies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_node() -> FuseError {
        FuseError::Topology(TopologyError::NodeNotFound {
            app: AppId(0),
            node: NodeIndex(4),
        })
    }

    #[test]
    fn strict_policy_aborts_on_structural_anomalies() {
        let mut diags = Diagnostics::new();
        let err = diags
            .record(AnomalyPolicy::Strict, missing_node(), "collect")
            .unwrap_err();
        assert_eq!(err, missing_node());
        assert!(diags.is_empty());
    }

    #[test]
    fn best_effort_records_structural_anomalies() {
        let mut diags = Diagnostics::new();
        assert!(diags
            .record(AnomalyPolicy::BestEffort, missing_node(), "collect")
            .is_ok());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.anomalies()[0].context, "collect");
    }

    #[test]
    fn cosmetic_anomalies_never_abort_and_contract_violations_always_do() {
        let mut diags = Diagnostics::new();
        let trace = FuseError::UnknownTraceLevel {
            node: NodeIndex(1),
            value: "loud".to_owned(),
        };
        assert!(diags.record(AnomalyPolicy::Strict, trace, "summary").is_ok());

        let twice = FuseError::NodeOwnedTwice {
            node: NodeIndex(1),
            first: ContainerIndex(0),
            second: ContainerIndex(1),
        };
        assert!(twice.is_contract_violation());
        assert!(diags
            .record(AnomalyPolicy::BestEffort, twice, "wire")
            .is_err());
        assert_eq!(diags.len(), 1);
    }
}
