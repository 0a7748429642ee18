// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! User-facing channel layer facade.
//!
//! `ChannelLayer` is intentionally thin: it validates raw string names once
//! at the boundary (everything past this point works with the validated
//! newtypes) and routes each operation to a backend. All queueing logic
//! lives behind the [`ChannelBackend`] trait object.
//!
//! # Sharded routing
//!
//! [`with_response_backend`](ChannelLayer::with_response_backend) builds a
//! two-backend layer where response channels (leading `!`) live on a
//! dedicated backend instance. The channel-kind discriminator is a routing
//! hint only — group membership state always lives on the primary backend,
//! while group fan-out deliveries follow each member's kind.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::backend::ChannelBackend;
use crate::channel::types::{Delivery, GroupSendFailure, GroupSendReport};
use crate::error::Error;
use bytes::Bytes;
use chanplex_config::{ChannelKind, ChannelName, GroupName};

/// The user-facing entry point for channel operations.
///
/// Thread-safe and cheaply cloneable.
#[derive(Clone)]
pub struct ChannelLayer {
    inner: Arc<LayerInner>,
}

struct LayerInner {
    normal: Arc<dyn ChannelBackend>,
    response: Option<Arc<dyn ChannelBackend>>,
}

fn parse_channel(raw: &str) -> Result<ChannelName, Error> {
    ChannelName::parse(raw).map_err(|reason| Error::InvalidChannelName {
        name: raw.to_owned(),
        reason,
    })
}

fn parse_group(raw: &str) -> Result<GroupName, Error> {
    GroupName::parse(raw).map_err(|reason| Error::InvalidGroupName {
        name: raw.to_owned(),
        reason,
    })
}

fn parse_channels(raw: &[&str]) -> Result<Vec<ChannelName>, Error> {
    raw.iter().map(|name| parse_channel(name)).collect()
}

impl ChannelLayer {
    /// Creates a layer over a single backend.
    pub fn new(backend: Arc<dyn ChannelBackend>) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                normal: backend,
                response: None,
            }),
        }
    }

    /// Creates a sharded layer: response channels route to `response`,
    /// everything else — including all group membership state — to
    /// `normal`.
    pub fn with_response_backend(
        normal: Arc<dyn ChannelBackend>,
        response: Arc<dyn ChannelBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                normal,
                response: Some(response),
            }),
        }
    }

    fn backend_for(&self, kind: ChannelKind) -> &Arc<dyn ChannelBackend> {
        match (kind, &self.inner.response) {
            (ChannelKind::Response, Some(response)) => response,
            _ => &self.inner.normal,
        }
    }

    /// Sends one message to a channel. Never blocks.
    pub async fn send(
        &self,
        channel: &str,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let channel = parse_channel(channel)?;
        self.backend_for(channel.kind())
            .send(&channel, payload, ttl)
            .await
    }

    /// Dequeues at most one message from the candidate channels, without
    /// blocking. `Ok(None)` when nothing is ready.
    pub async fn receive_many(&self, channels: &[&str]) -> Result<Option<Delivery>, Error> {
        let parsed = parse_channels(channels)?;
        let Some(response_backend) = &self.inner.response else {
            return self.inner.normal.receive_many(&parsed).await;
        };
        let first_kind = parsed.first().map(ChannelName::kind);
        let (normal, response) = partition_by_kind(parsed);
        // Candidate order is the caller's priority hint: poll the backend
        // owning the first candidate first.
        if first_kind == Some(ChannelKind::Response) {
            if let Some(delivery) = response_backend.receive_many(&response).await? {
                return Ok(Some(delivery));
            }
            return self.inner.normal.receive_many(&normal).await;
        }
        if let Some(delivery) = self.inner.normal.receive_many(&normal).await? {
            return Ok(Some(delivery));
        }
        response_backend.receive_many(&response).await
    }

    /// As [`receive_many`](Self::receive_many), but suspends until a
    /// message arrives or `timeout` elapses (`Ok(None)`).
    ///
    /// On a sharded layer whose candidates span both backends, both are
    /// raced and the first delivery wins; the losing call is dropped,
    /// which releases its waiter registration.
    pub async fn receive_many_blocking(
        &self,
        channels: &[&str],
        timeout: Duration,
    ) -> Result<Option<Delivery>, Error> {
        let parsed = parse_channels(channels)?;
        let Some(response_backend) = &self.inner.response else {
            return self
                .inner
                .normal
                .receive_many_blocking(&parsed, timeout)
                .await;
        };
        let (normal, response) = partition_by_kind(parsed);
        if response.is_empty() {
            return self
                .inner
                .normal
                .receive_many_blocking(&normal, timeout)
                .await;
        }
        if normal.is_empty() {
            return response_backend
                .receive_many_blocking(&response, timeout)
                .await;
        }
        let mut normal_wait = pin!(self.inner.normal.receive_many_blocking(&normal, timeout));
        let mut response_wait = pin!(response_backend.receive_many_blocking(&response, timeout));
        tokio::select! {
            result = &mut normal_wait => match result? {
                Some(delivery) => Ok(Some(delivery)),
                None => response_wait.await,
            },
            result = &mut response_wait => match result? {
                Some(delivery) => Ok(Some(delivery)),
                None => normal_wait.await,
            },
        }
    }

    /// Upserts a channel into a group with a fresh membership TTL.
    pub async fn group_add(
        &self,
        group: &str,
        channel: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let group = parse_group(group)?;
        let channel = parse_channel(channel)?;
        self.inner.normal.group_add(&group, &channel, ttl).await
    }

    /// Removes a channel from a group; a no-op when absent.
    pub async fn group_discard(&self, group: &str, channel: &str) -> Result<(), Error> {
        let group = parse_group(group)?;
        let channel = parse_channel(channel)?;
        self.inner.normal.group_discard(&group, &channel).await
    }

    /// Returns the group's live member channels as of call time.
    pub async fn group_members(&self, group: &str) -> Result<Vec<ChannelName>, Error> {
        let group = parse_group(group)?;
        self.inner.normal.group_members(&group).await
    }

    /// Sends one message to every live member of a group, aggregating
    /// per-member failures. One member failing never aborts the rest.
    pub async fn send_group(
        &self,
        group: &str,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<GroupSendReport, Error> {
        let group = parse_group(group)?;
        if self.inner.response.is_none() {
            return self.inner.normal.send_group(&group, payload, ttl).await;
        }
        // Membership lives on the primary; each delivery follows its
        // member's kind across the shard split.
        let members = self.inner.normal.group_members(&group).await?;
        let mut report = GroupSendReport {
            attempted: members.len(),
            ..GroupSendReport::default()
        };
        for member in members {
            match self
                .backend_for(member.kind())
                .send(&member, payload.clone(), ttl)
                .await
            {
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

fn partition_by_kind(channels: Vec<ChannelName>) -> (Vec<ChannelName>, Vec<ChannelName>) {
    channels
        .into_iter()
        .partition(|channel| channel.kind() == ChannelKind::Normal)
}
