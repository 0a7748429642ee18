// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration types for the chanplex channel layer.
//!
//! This crate holds the declarative side of the system: validated name
//! newtypes (channel and group names are only ever constructed through a
//! validating parser) and the policy structs a backend is configured with.
//! No runtime behavior lives here.

pub mod channel;

pub use channel::{ChannelKind, ChannelName, GroupName};
