// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operator nodes, their deployment descriptors, and annotations.
use std::collections::BTreeMap;

use crate::error::TopologyError;
use crate::ident::{AppId, NodeIndex, PortIndex};
use crate::port::{TopologyInputPort, TopologyOutputPort};

/// Implementation language of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Language {
    /// Managed-runtime operator (the container default).
    #[default]
    Java,
    /// Native operator; one native node makes the whole container native.
    Cpp,
}

/// Per-node deployment flags read by fusion.
///
/// Everything here is *declared* input. Computed threading results live in
/// [`ThreadingState`] so re-running propagation never reads its own output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    /// Operator implementation language.
    pub language: Language,
    /// Whether the operator was compiled optimized.
    pub optimized: bool,
    /// Whether the operator may be restarted.
    pub restartable: bool,
    /// Whether the operator may be relocated to another host.
    pub relocatable: bool,
    /// Whether the operator promises to submit on a single thread.
    pub single_threaded_on_outputs: bool,
    /// Raw tracing level string (`off`, `error`, `warn`, `info`, `debug`, `trace`).
    pub tracing: Option<String>,
    /// Host capabilities the operator requires.
    pub capabilities: Vec<String>,
    /// Environment variables to set in the hosting process.
    pub env_vars: BTreeMap<String, String>,
    /// Custom metric indices declared by the operator.
    pub custom_metrics: Vec<u64>,
}

impl Default for DeploymentDescriptor {
    fn default() -> Self {
        Self {
            language: Language::Java,
            optimized: true,
            restartable: true,
            relocatable: true,
            single_threaded_on_outputs: true,
            tracing: None,
            capabilities: Vec::new(),
            env_vars: BTreeMap::new(),
            custom_metrics: Vec::new(),
        }
    }
}

/// Single `key = value` pair inside an [`Annotation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeyValue {
    /// Key name.
    pub key: String,
    /// Raw value text.
    pub value: String,
}

/// Tagged annotation attached to an operator (e.g. `@threading(model=dynamic)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Annotation tag, e.g. `threading`.
    pub tag: String,
    /// Key/value pairs in declaration order.
    pub key_values: Vec<AnnotationKeyValue>,
}

impl Annotation {
    /// Builds an annotation from a tag and `(key, value)` pairs.
    pub fn new<'a>(tag: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            tag: tag.to_owned(),
            key_values: pairs
                .into_iter()
                .map(|(key, value)| AnnotationKeyValue {
                    key: key.to_owned(),
                    value: value.to_owned(),
                })
                .collect(),
        }
    }

    /// Returns the value stored under `key`, if present.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.key_values
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

/// Annotation tag that carries the threading model.
pub const THREADING_TAG: &str = "threading";
/// Key of the threading model inside a `threading` annotation.
pub const THREADING_MODEL_KEY: &str = "model";

/// Threading model requested by a `threading` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadingModel {
    /// Operator threads are managed by the operator author.
    Manual,
    /// The runtime may add threads where it sees fit.
    Automatic,
    /// The runtime schedules the operator on a dynamic thread pool.
    Dynamic,
    /// Each input port gets its own dedicated thread.
    Dedicated,
}

impl ThreadingModel {
    /// Parses the annotation value (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            "dynamic" => Some(Self::Dynamic),
            "dedicated" => Some(Self::Dedicated),
            _ => None,
        }
    }

    /// Whether the runtime may schedule this operator off its callers' threads.
    #[must_use]
    pub const fn permits_dynamic_scheduling(self) -> bool {
        matches!(self, Self::Automatic | Self::Dynamic)
    }
}

/// Enclosing parallel region of a replicated operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelRegion {
    /// Region name.
    pub name: String,
    /// Channel of this replica across all nested regions, when known.
    pub global_channel_index: Option<u64>,
}

/// Computed concurrency classification written back by thread propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadingState {
    /// At most one thread ever calls into the operator's input ports.
    pub single_threaded_on_inputs: bool,
    /// At most one thread ever submits from the operator's output ports.
    pub single_threaded_on_outputs: bool,
}

impl Default for ThreadingState {
    fn default() -> Self {
        Self {
            single_threaded_on_inputs: true,
            single_threaded_on_outputs: true,
        }
    }
}

/// One operator instance in the logical topology.
#[derive(Debug, Clone)]
pub struct TopologyNode {
    /// Node index (unique within the application).
    pub index: NodeIndex,
    /// Owning topology application.
    pub app_id: AppId,
    /// Physical operator name (replicas carry `[i]` channel suffixes).
    pub name: String,
    /// Logical operator name (equal to `name` outside parallel regions).
    pub logical_name: String,
    /// Declared deployment flags.
    pub deployment: DeploymentDescriptor,
    /// Annotations in declaration order.
    pub annotations: Vec<Annotation>,
    /// Enclosing parallel regions, innermost first.
    pub parallel_regions: Vec<ParallelRegion>,
    /// Input ports keyed by port index.
    pub input_ports: BTreeMap<PortIndex, TopologyInputPort>,
    /// Output ports keyed by port index.
    pub output_ports: BTreeMap<PortIndex, TopologyOutputPort>,
    /// Classification computed by thread propagation.
    pub threading: ThreadingState,
}

impl TopologyNode {
    /// Creates a node with default deployment flags and no ports.
    pub fn new(app_id: AppId, index: NodeIndex, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            index,
            app_id,
            logical_name: name.clone(),
            name,
            deployment: DeploymentDescriptor::default(),
            annotations: Vec::new(),
            parallel_regions: Vec::new(),
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
            threading: ThreadingState::default(),
        }
    }

    /// Returns the threading model declared by a `threading` annotation.
    ///
    /// `Ok(None)` means no such annotation. An annotation whose `model` value
    /// is not a known model yields [`TopologyError::UnknownThreadingModel`].
    pub fn threading_model(&self) -> Result<Option<ThreadingModel>, TopologyError> {
        let Some(raw) = self
            .annotations
            .iter()
            .filter(|a| a.tag == THREADING_TAG)
            .find_map(|a| a.value(THREADING_MODEL_KEY))
        else {
            return Ok(None);
        };
        ThreadingModel::parse(raw)
            .map(Some)
            .ok_or_else(|| TopologyError::UnknownThreadingModel {
                node: self.index,
                value: raw.to_owned(),
            })
    }

    /// Whether the node is a source operator (no inputs, at least one output).
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.input_ports.is_empty() && !self.output_ports.is_empty()
    }

    /// Whether the node is a parallel-region replica.
    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.name != self.logical_name
    }
}
