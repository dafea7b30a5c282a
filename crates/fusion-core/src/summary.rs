// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deployment properties summarized over the nodes of one container.
use std::collections::{BTreeMap, BTreeSet};

use fusion_topology::{Language, TopologyNode};
use serde::{Deserialize, Serialize};

use crate::config::AnomalyPolicy;
use crate::error::{Diagnostics, FuseError};

/// Operator tracing verbosity, ordered from quietest to loudest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// No tracing.
    #[default]
    Off,
    /// Errors only.
    Error,
    /// Warnings and above.
    Warn,
    /// Informational and above.
    Info,
    /// Debug and above.
    Debug,
    /// Everything.
    Trace,
}

impl TraceLevel {
    /// Parses a level name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

/// Container-level view of the owned nodes' deployment descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// `Cpp` as soon as one node is native.
    pub language: Language,
    /// All nodes optimized.
    pub optimized: bool,
    /// All nodes restartable.
    pub restartable: bool,
    /// All nodes relocatable.
    pub relocatable: bool,
    /// Loudest tracing level among the nodes.
    pub tracing: TraceLevel,
    /// Union of environment variables; later nodes override earlier ones.
    pub env_vars: BTreeMap<String, String>,
    /// Union of custom metric indices.
    pub custom_metric_indices: BTreeSet<u64>,
    /// Required capabilities in node order.
    pub capabilities: Vec<String>,
}

impl Default for ContainerSummary {
    fn default() -> Self {
        Self {
            language: Language::Java,
            optimized: true,
            restartable: true,
            relocatable: true,
            tracing: TraceLevel::Off,
            env_vars: BTreeMap::new(),
            custom_metric_indices: BTreeSet::new(),
            capabilities: Vec::new(),
        }
    }
}

impl ContainerSummary {
    /// Folds `nodes` (in ascending index order) into one summary.
    ///
    /// Unparseable tracing strings are recorded in `diags` and otherwise
    /// ignored.
    pub fn fold<'a>(
        nodes: impl IntoIterator<Item = &'a TopologyNode>,
        diags: &mut Diagnostics,
        policy: AnomalyPolicy,
    ) -> Result<Self, FuseError> {
        let mut summary = Self::default();
        for node in nodes {
            let d = &node.deployment;
            if d.language == Language::Cpp {
                summary.language = Language::Cpp;
            }
            summary.optimized &= d.optimized;
            summary.restartable &= d.restartable;
            summary.relocatable &= d.relocatable;
            if let Some(raw) = d.tracing.as_deref() {
                match TraceLevel::parse(raw) {
                    Some(level) => summary.tracing = summary.tracing.max(level),
                    None => diags.record(
                        policy,
                        FuseError::UnknownTraceLevel {
                            node: node.index,
                            value: raw.to_owned(),
                        },
                        format!("summary of node {}", node.index),
                    )?,
                }
            }
            summary
                .env_vars
                .extend(d.env_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            summary
                .custom_metric_indices
                .extend(d.custom_metrics.iter().copied());
            summary.capabilities.extend(d.capabilities.iter().cloned());
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use fusion_topology::{AppId, NodeIndex};

    fn node(index: u64) -> TopologyNode {
        TopologyNode::new(AppId(0), NodeIndex(index), format!("op{index}"))
    }

    #[test]
    fn one_native_node_makes_the_container_native_and_flags_are_anded() {
        let a = node(0);
        let mut b = node(1);
        b.deployment.language = Language::Cpp;
        b.deployment.relocatable = false;
        let mut diags = Diagnostics::new();
        let s = ContainerSummary::fold([&a, &b], &mut diags, AnomalyPolicy::Strict).unwrap();
        assert_eq!(s.language, Language::Cpp);
        assert!(s.optimized);
        assert!(s.restartable);
        assert!(!s.relocatable);
    }

    #[test]
    fn tracing_takes_the_loudest_level_and_skips_garbage() {
        let mut a = node(0);
        a.deployment.tracing = Some("INFO".to_owned());
        let mut b = node(1);
        b.deployment.tracing = Some("chatty".to_owned());
        let mut c = node(2);
        c.deployment.tracing = Some("warn".to_owned());
        let mut diags = Diagnostics::new();
        let s =
            ContainerSummary::fold([&a, &b, &c], &mut diags, AnomalyPolicy::Strict).unwrap();
        assert_eq!(s.tracing, TraceLevel::Info);
        assert_eq!(diags.len(), 1);
        assert!(matches!(
            diags.anomalies()[0].error,
            FuseError::UnknownTraceLevel { node: NodeIndex(1), .. }
        ));
    }

    #[test]
    fn env_vars_are_last_writer_wins_and_metrics_are_sorted() {
        let mut a = node(0);
        a.deployment.env_vars.insert("MODE".into(), "a".into());
        a.deployment.custom_metrics = vec![9, 2];
        a.deployment.capabilities = vec!["gpu".into()];
        let mut b = node(1);
        b.deployment.env_vars.insert("MODE".into(), "b".into());
        b.deployment.custom_metrics = vec![2, 5];
        b.deployment.capabilities = vec!["fpga".into()];
        let mut diags = Diagnostics::new();
        let s = ContainerSummary::fold([&a, &b], &mut diags, AnomalyPolicy::Strict).unwrap();
        assert_eq!(s.env_vars.get("MODE").map(String::as_str), Some("b"));
        assert_eq!(
            s.custom_metric_indices.into_iter().collect::<Vec<_>>(),
            vec![2, 5, 9]
        );
        assert_eq!(s.capabilities, vec!["gpu".to_owned(), "fpga".to_owned()]);
    }
}
