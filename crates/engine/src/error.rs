// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for channel backend operations.
//!
//! A blocking-receive timeout is deliberately absent: timing out is a
//! defined empty result (`Ok(None)`), not an error.

use chanplex_config::ChannelName;

/// Errors produced by channel backend operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Channel name failed format or length validation. Rejected before any
    /// state change.
    #[error("invalid channel name `{name}`: {reason}")]
    InvalidChannelName {
        /// The rejected raw name.
        name: String,
        /// Validation error details.
        reason: String,
    },
    /// Group name failed format or length validation.
    #[error("invalid group name `{name}`: {reason}")]
    InvalidGroupName {
        /// The rejected raw name.
        name: String,
        /// Validation error details.
        reason: String,
    },
    /// Payload exceeds the backend's declared size limit. Rejected before
    /// enqueue.
    #[error("message of {size} bytes for channel `{channel}` exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// Destination channel.
        channel: ChannelName,
        /// Rejected payload size in bytes.
        size: usize,
        /// The backend's payload limit in bytes.
        limit: usize,
    },
    /// Channel queue is at capacity. The message was dropped; the sender is
    /// never blocked.
    #[error("channel `{channel}` is at capacity")]
    ChannelFull {
        /// The full channel.
        channel: ChannelName,
    },
    /// Operation against a backend that has been shut down. Blocked
    /// receivers are woken with this error.
    #[error("channel backend is closed")]
    BackendClosed,
    /// Transport or storage failure in the backing store.
    #[error("channel backend unavailable: {reason}")]
    BackendUnavailable {
        /// Failure details.
        reason: String,
    },
    /// Backend configuration failed validation at construction.
    #[error("invalid channel backend configuration: {reason}")]
    InvalidConfiguration {
        /// Validation error details.
        reason: String,
    },
}
