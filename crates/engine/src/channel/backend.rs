// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Backend trait abstraction for the channel layer.
//!
//! `ChannelBackend` is the seven-operation contract every storage
//! technology must satisfy: four queue operations (`send`, `receive_many`,
//! `receive_many_blocking`, `send_group`) and three group-membership
//! operations (`group_add`, `group_discard`, `group_members`).
//!
//! The dispatch mechanism uses trait objects: [`ChannelLayer`] stores
//! `Arc<dyn ChannelBackend>`, keeping the public types free of backend type
//! parameters and letting a sharded deployment mix backend instances.
//!
//! [`ChannelLayer`]: crate::channel::ChannelLayer

use std::time::Duration;

use crate::channel::types::{Delivery, GroupSendFailure, GroupSendReport};
use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use chanplex_config::channel::{ChannelOnFullPolicy, ChannelPolicies};
use chanplex_config::{ChannelName, GroupName};

/// Backend capability contract.
///
/// Consulted when a backend is configured, so unsupported policy values are
/// rejected up front rather than surfacing as runtime surprises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Backend identifier.
    pub backend_name: &'static str,
    /// Support for suspending receivers via `receive_many_blocking`.
    pub supports_blocking_receive: bool,
    /// Support for `on_full: reject_new`.
    pub supports_on_full_reject_new: bool,
    /// Support for `on_full: drop_newest`.
    pub supports_on_full_drop_newest: bool,
}

impl BackendCapabilities {
    /// Returns whether this backend supports the given on-full policy.
    #[must_use]
    pub const fn supports_on_full(&self, policy: &ChannelOnFullPolicy) -> bool {
        match policy {
            ChannelOnFullPolicy::RejectNew => self.supports_on_full_reject_new,
            ChannelOnFullPolicy::DropNewest => self.supports_on_full_drop_newest,
        }
    }
}

/// Validates that a policy set only asks for behaviors the backend declares.
pub fn validate_policy_support(
    policies: &ChannelPolicies,
    capabilities: BackendCapabilities,
) -> Result<(), Error> {
    if !capabilities.supports_on_full(&policies.on_full) {
        return Err(Error::InvalidConfiguration {
            reason: format!(
                "backend `{}` does not support on_full policy `{:?}`",
                capabilities.backend_name, policies.on_full
            ),
        });
    }
    Ok(())
}

/// The channel backend contract.
///
/// Implementations must support safe concurrent use without external
/// locking: every mutating operation is atomic with respect to other
/// callers, per-channel FIFO order is strict, and dequeue is destructive
/// (at-most-once hand-off). Only `receive_many_blocking` may suspend the
/// caller; every other operation completes in bounded time.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Returns backend capability declarations.
    fn capabilities(&self) -> BackendCapabilities;

    /// Appends a message to the named channel's queue.
    ///
    /// Expiry is `now + ttl`, falling back to the backend's configured
    /// default TTL when `ttl` is `None`. Never blocks: a full queue fails
    /// with [`Error::ChannelFull`] (or silently drops, per policy) rather
    /// than suspending the sender.
    async fn send(
        &self,
        channel: &ChannelName,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    /// Atomically dequeues at most one non-expired message from the given
    /// candidate channels.
    ///
    /// Returns `Ok(None)` promptly when every candidate queue is empty or
    /// expired — including for an empty candidate list. Never blocks.
    async fn receive_many(&self, channels: &[ChannelName]) -> Result<Option<Delivery>, Error>;

    /// As [`receive_many`](Self::receive_many), but suspends the caller
    /// until a message becomes available or `timeout` elapses.
    ///
    /// A timeout is a defined empty result (`Ok(None)`), not an error.
    /// Suspension is push-notified rather than polled, and cancellable:
    /// dropping the call releases any waiter registration.
    async fn receive_many_blocking(
        &self,
        channels: &[ChannelName],
        timeout: Duration,
    ) -> Result<Option<Delivery>, Error>;

    /// Upserts `channel` into `group`, setting its membership expiry to
    /// `now + ttl` (backend default TTL when `None`).
    ///
    /// Idempotent; repeated calls are the intended keepalive mechanism.
    async fn group_add(
        &self,
        group: &GroupName,
        channel: &ChannelName,
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    /// Removes `channel` from `group`. A no-op, not an error, when the
    /// membership does not exist.
    async fn group_discard(&self, group: &GroupName, channel: &ChannelName) -> Result<(), Error>;

    /// Returns the channel names whose membership has not expired, as of
    /// call time. A member exactly at its expiry boundary is expired.
    ///
    /// A group with zero live members is an empty set, not an error.
    async fn group_members(&self, group: &GroupName) -> Result<Vec<ChannelName>, Error>;

    /// Sends one message to every live member of `group`.
    ///
    /// Partial failure never aborts the fan-out: each member is attempted,
    /// failures are aggregated into the report, and the call itself only
    /// errors when the group cannot be resolved at all.
    async fn send_group(
        &self,
        group: &GroupName,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<GroupSendReport, Error> {
        let members = self.group_members(group).await?;
        let mut report = GroupSendReport {
            attempted: members.len(),
            ..GroupSendReport::default()
        };
        for member in members {
            match self.send(&member, payload.clone(), ttl).await {
                Ok(()) => report.delivered += 1,
                Err(error) => report.failures.push(GroupSendFailure {
                    channel: member,
                    error,
                }),
            }
        }
        Ok(report)
    }
}
