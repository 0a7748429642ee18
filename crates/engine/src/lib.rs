// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Chanplex engine: a network-transparent channel backend.
//!
//! The engine provides named, ordered, at-most-once FIFO queues
//! ("channels") with per-message expiry, plus TTL-managed groups of channel
//! names used for fan-out sends. Producers and consumers interact only
//! through the backend operations — no direct coordination, no persistent
//! connections between them.
//!
//! Layering:
//!
//! ```text
//!   ChannelLayer                 -- user-facing facade: validation + kind routing
//!        │ delegates to
//!        ▼
//!   dyn ChannelBackend           -- the seven-operation backend contract
//!        │ implemented by
//!        ▼
//!   InMemoryChannelLayer         -- process-local queues, groups, expiry sweep
//! ```
//!
//! The backend is pluggable: `ChannelLayer` holds `Arc<dyn ChannelBackend>`
//! and a sharded deployment may route response channels to a dedicated
//! backend instance.

pub mod channel;
pub mod error;

pub use channel::{
    BackendCapabilities, ChannelBackend, ChannelLayer, Delivery, GroupSendFailure,
    GroupSendReport, InMemoryChannelLayer,
};
pub use error::Error;
