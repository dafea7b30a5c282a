// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for fusion crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`builder`] - Fluent topology builder
//! - [`graphs`] - Canned topologies (chains, fan-in, splits, cycles)

pub mod builder;
pub mod config;
pub mod graphs;

pub use builder::TopologyBuilder;
pub use config::InMemoryConfigStore;
pub use graphs::{chain, cycle, fan_in, fan_in_queued, spec, split, split_builder, APP};
