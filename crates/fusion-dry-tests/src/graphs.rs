// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canned topologies used across the fusion test suite.
//!
//! Every graph lives in topology application [`APP`].

use fusion_core::ContainerSpecification;
use fusion_topology::{AppId, Topology};

use crate::builder::TopologyBuilder;

/// Topology application id of every canned graph.
pub const APP: AppId = AppId(1);

/// Specification named `pe-{first node}` over `nodes` of [`APP`].
pub fn spec(nodes: &[u64]) -> ContainerSpecification {
    let name = nodes
        .first()
        .map_or_else(|| "pe-empty".to_owned(), |n| format!("pe-{n}"));
    ContainerSpecification::new(name, APP, nodes.iter().copied())
}

/// `op0 → op1 → … → op{len-1}`.
#[allow(clippy::expect_used)]
pub fn chain(len: u64) -> Topology {
    let mut b = TopologyBuilder::new(APP.value());
    for i in 0..len {
        let inputs = u64::from(i > 0);
        let outputs = u64::from(i + 1 < len);
        b = b.operator(i, inputs, outputs);
    }
    for i in 1..len {
        b = b.connect(i - 1, i);
    }
    b.into_topology().expect("chain topology should build")
}

/// `op0` and `op1` both feed input 0 of `op2`, which feeds `op3`.
pub fn fan_in() -> Topology {
    fan_in_builder(false)
}

/// [`fan_in`] with a declared queue in front of `op2`'s input.
pub fn fan_in_queued() -> Topology {
    fan_in_builder(true)
}

#[allow(clippy::expect_used)]
fn fan_in_builder(queued: bool) -> Topology {
    let mut b = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 0, 1)
        .operator(2, 1, 1)
        .operator(3, 1, 0)
        .connect(0, 2)
        .connect(1, 2)
        .connect(2, 3);
    if queued {
        b = b.queued(2, 0);
    }
    b.into_topology().expect("fan-in topology should build")
}

/// `op0` splits into `width` replicas `op1..=op{width}` (`Work[c]`), each feeding `op{width+1}`.
#[allow(clippy::expect_used)]
pub fn split(width: u64) -> Topology {
    split_builder(width)
        .into_topology()
        .expect("split topology should build")
}

/// Builder behind [`split`], for callers that reorder or extend it.
pub fn split_builder(width: u64) -> TopologyBuilder {
    let merge = width + 1;
    let mut b = TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .splitter(0, 0, 0, width)
        .operator(merge, 1, 0);
    for c in 0..width {
        let replica = c + 1;
        b = b
            .operator(replica, 1, 1)
            .replica(replica, &format!("Work[{c}]"), "Work", Some(c))
            .connect_channel(0, replica, 0, c)
            .connect(replica, merge);
    }
    b
}

/// `op0 → op1 → op2 → op1` where the back edge enters `op1` on input 1.
#[allow(clippy::expect_used)]
pub fn cycle() -> Topology {
    TopologyBuilder::new(APP.value())
        .operator(0, 0, 1)
        .operator(1, 2, 1)
        .operator(2, 1, 1)
        .connect(0, 1)
        .connect(1, 2)
        .connect_ports(2, 0, 1, 1)
        .into_topology()
        .expect("cycle topology should build")
}
