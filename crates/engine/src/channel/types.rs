// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared across the crate.
//!
//! Payloads are opaque [`Bytes`]: the backend never inspects message
//! content, and the cheap clone keeps group fan-out free of per-member
//! payload copies.

use crate::error::Error;
use bytes::Bytes;
use chanplex_config::ChannelName;

/// A dequeued message together with the channel it came from.
///
/// Dequeue is destructive: once a `Delivery` is handed out, no other
/// receive call will ever observe the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The channel the message was dequeued from.
    pub channel: ChannelName,
    /// The opaque message payload.
    pub payload: Bytes,
}

/// One failed member delivery within a group send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSendFailure {
    /// The member channel that rejected the message.
    pub channel: ChannelName,
    /// Why the send failed.
    pub error: Error,
}

/// Aggregated result of a group send.
///
/// A failure sending to one member never aborts the remaining members;
/// every outcome is accounted for here, never silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupSendReport {
    /// Number of live members resolved at send time.
    pub attempted: usize,
    /// Number of member queues that accepted the message.
    pub delivered: usize,
    /// Per-member failures, in member resolution order.
    pub failures: Vec<GroupSendFailure>,
}

impl GroupSendReport {
    /// Returns `true` when at least one member delivery failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
