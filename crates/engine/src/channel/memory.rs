// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory channel backend — the performance-critical core of the crate.
//!
//! # Registries
//!
//! Queues and groups live in `parking_lot::RwLock<HashMap<Name, Arc<...>>>`
//! registries. Entries are created lazily on first use and retired by the
//! sweep when empty — callers never construct or destroy them explicitly.
//! No lock is held across unrelated channels: after the registry lookup,
//! all contention is scoped to the one channel or group being touched.
//!
//! # Retirement
//!
//! The sweep removes an empty entry only under the registry write lock AND
//! the entry's own mutex, setting its `retired` flag inside that critical
//! section. A writer that raced the sweep (it resolved the `Arc` before
//! removal) observes `retired` under the entry mutex and re-resolves from
//! the registry, so no message or membership can land in a detached entry.
//!
//! # WakerSet
//!
//! Minimal multi-waker notification. The `has_waiters` atomic lets
//! `wake_all()` skip the Mutex entirely when no receiver is blocked, which
//! is the common case on a busy send path. `register()` deduplicates via
//! `Waker::will_wake()` to prevent unbounded `Vec` growth when a receiver
//! is polled repeatedly between sends.
//!
//! # Fairness
//!
//! Every enqueue is stamped from one process-wide sequence. `receive_many`
//! dequeues the candidate whose live head carries the smallest sequence,
//! approximating global FIFO across candidate channels so a high-traffic
//! channel cannot starve a low-traffic one. This is a soft ordering goal;
//! at-most-once and per-channel FIFO never depend on it.
//!
//! # Expiry
//!
//! All expiry math uses `tokio::time::Instant`, so tests under a paused
//! clock exercise exact boundaries. An item is live iff `now < expires_at`:
//! exactly at the boundary it is expired, for messages and group members
//! alike. Expired messages are pruned before they are ever observable; to
//! every receiver they are indistinguishable from messages that never
//! existed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::channel::backend::{BackendCapabilities, ChannelBackend, validate_policy_support};
use crate::channel::types::Delivery;
use crate::error::Error;
use async_trait::async_trait;
use bytes::Bytes;
use chanplex_config::channel::{ChannelOnFullPolicy, ChannelPolicies};
use chanplex_config::{ChannelName, GroupName};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// WakerSet — lightweight multi-waker notification
// ---------------------------------------------------------------------------

struct WakerSet {
    has_waiters: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl WakerSet {
    fn new() -> Self {
        Self {
            has_waiters: AtomicBool::new(false),
            wakers: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.wakers.lock();
        // Deduplicate: if this waker is already registered, replace it in
        // place instead of pushing a duplicate.
        for existing in wakers.iter_mut() {
            if existing.will_wake(waker) {
                existing.clone_from(waker);
                return;
            }
        }
        wakers.push(waker.clone());
        self.has_waiters.store(true, Ordering::Release);
    }

    fn wake_all(&self) {
        if !self.has_waiters.load(Ordering::Acquire) {
            return;
        }
        let wakers = std::mem::take(&mut *self.wakers.lock());
        self.has_waiters.store(false, Ordering::Release);
        for waker in wakers {
            waker.wake();
        }
    }

    fn has_waiters(&self) -> bool {
        self.has_waiters.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Per-channel queue state
// ---------------------------------------------------------------------------

struct QueuedMessage {
    /// Process-wide enqueue sequence; the cross-channel fairness key.
    seq: u64,
    payload: Bytes,
    expires_at: Instant,
}

struct ChannelQueue {
    messages: Mutex<VecDeque<QueuedMessage>>,
    wakers: WakerSet,
    /// Set by the sweep inside the removal critical section. A writer that
    /// observes this under the messages lock must re-resolve the queue.
    retired: AtomicBool,
}

impl ChannelQueue {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            wakers: WakerSet::new(),
            retired: AtomicBool::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-group membership state
// ---------------------------------------------------------------------------

struct GroupState {
    /// Member channel -> membership expiry.
    members: Mutex<HashMap<ChannelName, Instant>>,
    retired: AtomicBool,
}

impl GroupState {
    fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            retired: AtomicBool::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryChannelLayer
// ---------------------------------------------------------------------------

/// The process-local in-memory channel backend.
///
/// An explicitly constructed service object: create it, optionally start
/// the background sweep with [`start_sweeper`](Self::start_sweeper), share
/// it behind an `Arc`, and call [`close`](Self::close) on shutdown. No
/// ambient globals.
pub struct InMemoryChannelLayer {
    policies: ChannelPolicies,
    queues: RwLock<HashMap<ChannelName, Arc<ChannelQueue>>>,
    groups: RwLock<HashMap<GroupName, Arc<GroupState>>>,
    enqueue_seq: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for InMemoryChannelLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannelLayer")
            .field("policies", &self.policies)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl InMemoryChannelLayer {
    const CAPABILITIES: BackendCapabilities = BackendCapabilities {
        backend_name: "in_memory",
        supports_blocking_receive: true,
        supports_on_full_reject_new: true,
        supports_on_full_drop_newest: true,
    };

    /// Creates a backend with the given policies.
    ///
    /// Fails with [`Error::InvalidConfiguration`] when the policy set is
    /// invalid or asks for behavior this backend does not declare.
    pub fn new(policies: ChannelPolicies) -> Result<Self, Error> {
        let errors = policies.validation_errors("policies");
        if !errors.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: errors.join("; "),
            });
        }
        validate_policy_support(&policies, Self::CAPABILITIES)?;
        Ok(Self {
            policies,
            queues: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            enqueue_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// The policies this backend was created with.
    #[must_use]
    pub fn policies(&self) -> &ChannelPolicies {
        &self.policies
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts the backend down.
    ///
    /// Further sends and receives fail with [`Error::BackendClosed`];
    /// blocked receivers are woken and observe the same error; a running
    /// sweeper exits on its next tick. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let queues = self.queues.read();
        for queue in queues.values() {
            queue.wakers.wake_all();
        }
        debug!("in-memory channel backend closed");
    }

    /// Spawns the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference: it exits when the backend is
    /// closed or dropped. The period comes from `policies.sweep_interval`.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let layer = Arc::downgrade(self);
        let period = self.policies.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                _ = ticker.tick().await;
                let Some(layer) = layer.upgrade() else { break };
                if layer.is_closed() {
                    break;
                }
                layer.sweep_once();
            }
        })
    }

    /// Snapshot of all channel names currently holding queue state.
    #[must_use]
    pub fn channel_names(&self) -> Vec<ChannelName> {
        self.queues.read().keys().cloned().collect()
    }

    /// Snapshot of all group names currently holding membership state.
    #[must_use]
    pub fn group_names(&self) -> Vec<GroupName> {
        self.groups.read().keys().cloned().collect()
    }

    fn queue(&self, name: &ChannelName) -> Arc<ChannelQueue> {
        {
            let queues = self.queues.read();
            if let Some(queue) = queues.get(name) {
                return Arc::clone(queue);
            }
        }
        let mut queues = self.queues.write();
        Arc::clone(
            queues
                .entry(name.clone())
                .or_insert_with(|| Arc::new(ChannelQueue::new())),
        )
    }

    fn group(&self, name: &GroupName) -> Arc<GroupState> {
        {
            let groups = self.groups.read();
            if let Some(group) = groups.get(name) {
                return Arc::clone(group);
            }
        }
        let mut groups = self.groups.write();
        Arc::clone(
            groups
                .entry(name.clone())
                .or_insert_with(|| Arc::new(GroupState::new())),
        )
    }

    /// Drops expired messages from the queue head so `front()` is the
    /// oldest live message. Interior expired messages are dropped when they
    /// surface, or by the sweep — either way before they are observable.
    fn drop_expired_front(messages: &mut VecDeque<QueuedMessage>, now: Instant) {
        while messages.front().is_some_and(|m| now >= m.expires_at) {
            _ = messages.pop_front();
        }
    }

    fn do_send(
        &self,
        channel: &ChannelName,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::BackendClosed);
        }
        if payload.len() > self.policies.max_payload_bytes {
            return Err(Error::MessageTooLarge {
                channel: channel.clone(),
                size: payload.len(),
                limit: self.policies.max_payload_bytes,
            });
        }
        let ttl = ttl.unwrap_or(self.policies.message_ttl);
        loop {
            let queue = self.queue(channel);
            let now = Instant::now();
            let mut messages = queue.messages.lock();
            if queue.retired.load(Ordering::Acquire) {
                // Raced with the sweep; the registry no longer holds this
                // queue. Re-resolve.
                continue;
            }
            if messages.len() >= self.policies.capacity {
                // Expired entries do not count toward capacity.
                messages.retain(|m| now < m.expires_at);
            }
            if messages.len() >= self.policies.capacity {
                return match self.policies.on_full {
                    ChannelOnFullPolicy::RejectNew => Err(Error::ChannelFull {
                        channel: channel.clone(),
                    }),
                    ChannelOnFullPolicy::DropNewest => {
                        debug!(channel = %channel, "queue at capacity, dropping incoming message");
                        Ok(())
                    }
                };
            }
            messages.push_back(QueuedMessage {
                seq: self.enqueue_seq.fetch_add(1, Ordering::Relaxed),
                payload,
                expires_at: now + ttl,
            });
            drop(messages);
            queue.wakers.wake_all();
            return Ok(());
        }
    }

    /// One non-blocking dequeue attempt across the candidate channels.
    ///
    /// Pops under the owning queue's mutex after re-validating the chosen
    /// head, so two overlapping calls can never pop the same message.
    fn try_receive(&self, channels: &[ChannelName]) -> Result<Option<Delivery>, Error> {
        if self.is_closed() {
            return Err(Error::BackendClosed);
        }
        if channels.is_empty() {
            return Ok(None);
        }
        let candidates: Vec<(ChannelName, Arc<ChannelQueue>)> = {
            let queues = self.queues.read();
            channels
                .iter()
                .filter_map(|name| queues.get(name).map(|q| (name.clone(), Arc::clone(q))))
                .collect()
        };
        loop {
            let now = Instant::now();
            // Pick the candidate whose live head is globally oldest.
            let mut best: Option<(usize, u64)> = None;
            for (index, (_, queue)) in candidates.iter().enumerate() {
                let mut messages = queue.messages.lock();
                Self::drop_expired_front(&mut messages, now);
                if let Some(head) = messages.front() {
                    if best.map_or(true, |(_, seq)| head.seq < seq) {
                        best = Some((index, head.seq));
                    }
                }
            }
            let Some((index, seq)) = best else {
                return Ok(None);
            };
            let (name, queue) = &candidates[index];
            let mut messages = queue.messages.lock();
            Self::drop_expired_front(&mut messages, Instant::now());
            let popped = match messages.front() {
                Some(head) if head.seq == seq => messages.pop_front(),
                // Another receiver won the race for this head; rescan.
                _ => None,
            };
            drop(messages);
            if let Some(message) = popped {
                return Ok(Some(Delivery {
                    channel: name.clone(),
                    payload: message.payload,
                }));
            }
        }
    }

    /// Poll-shaped receive used by the blocking variant.
    ///
    /// Registers the waker in every candidate queue BEFORE the final
    /// re-check, so a send racing the miss cannot slip through unnoticed.
    fn poll_receive(
        &self,
        channels: &[ChannelName],
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Delivery>, Error>> {
        loop {
            match self.try_receive(channels) {
                Ok(None) => {}
                ready => return Poll::Ready(ready),
            }
            // Waiting on a channel nobody has sent to yet still needs a
            // queue entry to park the waker in; create lazily like a send.
            let registered: Vec<Arc<ChannelQueue>> =
                channels.iter().map(|name| self.queue(name)).collect();
            for queue in &registered {
                queue.wakers.register(cx.waker());
            }
            // A queue retired between resolution and registration would
            // never wake us; detect and re-resolve.
            let stale = {
                let queues = self.queues.read();
                channels.iter().zip(&registered).any(|(name, queue)| {
                    queues
                        .get(name)
                        .map_or(true, |current| !Arc::ptr_eq(current, queue))
                })
            };
            if stale {
                continue;
            }
            match self.try_receive(channels) {
                Ok(None) => return Poll::Pending,
                ready => return Poll::Ready(ready),
            }
        }
    }

    async fn blocking_receive(
        &self,
        channels: &[ChannelName],
        timeout: Duration,
    ) -> Result<Option<Delivery>, Error> {
        if channels.is_empty() {
            return Ok(None);
        }
        let wait = std::future::poll_fn(|cx| self.poll_receive(channels, cx));
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            // Timing out is a defined empty result, not an error.
            Err(_elapsed) => Ok(None),
        }
    }

    fn do_group_add(
        &self,
        group: &GroupName,
        channel: &ChannelName,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::BackendClosed);
        }
        let ttl = ttl.unwrap_or(self.policies.group_member_ttl);
        loop {
            let state = self.group(group);
            let mut members = state.members.lock();
            if state.retired.load(Ordering::Acquire) {
                continue;
            }
            _ = members.insert(channel.clone(), Instant::now() + ttl);
            return Ok(());
        }
    }

    fn do_group_discard(&self, group: &GroupName, channel: &ChannelName) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::BackendClosed);
        }
        let state = self.groups.read().get(group).cloned();
        if let Some(state) = state {
            _ = state.members.lock().remove(channel);
        }
        Ok(())
    }

    fn do_group_members(&self, group: &GroupName) -> Result<Vec<ChannelName>, Error> {
        if self.is_closed() {
            return Err(Error::BackendClosed);
        }
        let state = self.groups.read().get(group).cloned();
        let Some(state) = state else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        let mut members = state.members.lock();
        members.retain(|_, expires_at| now < *expires_at);
        Ok(members.keys().cloned().collect())
    }

    /// One expiry sweep pass: prune expired messages and memberships, then
    /// retire empty queues and groups.
    ///
    /// Exposed so tests (and embedders without a running sweeper task) can
    /// drive reaping deterministically.
    pub fn sweep_once(&self) {
        let now = Instant::now();
        let mut expired_messages = 0usize;
        let mut retired_queues = 0usize;

        let names: Vec<ChannelName> = self.queues.read().keys().cloned().collect();
        for name in names {
            let Some(queue) = self.queues.read().get(&name).cloned() else {
                continue;
            };
            let mut messages = queue.messages.lock();
            let before = messages.len();
            messages.retain(|m| now < m.expires_at);
            expired_messages += before - messages.len();
            let empty = messages.is_empty();
            drop(messages);
            if !empty {
                continue;
            }
            if queue.wakers.has_waiters() {
                // Flush stale waiters; live ones re-register immediately and
                // hold off retirement until a later pass.
                queue.wakers.wake_all();
                continue;
            }
            let mut queues = self.queues.write();
            let still_registered = queues
                .get(&name)
                .is_some_and(|current| Arc::ptr_eq(current, &queue));
            if still_registered {
                let messages = queue.messages.lock();
                if messages.is_empty() && !queue.wakers.has_waiters() {
                    queue.retired.store(true, Ordering::Release);
                    drop(messages);
                    _ = queues.remove(&name);
                    retired_queues += 1;
                }
            }
        }

        let mut expired_members = 0usize;
        let mut retired_groups = 0usize;

        let names: Vec<GroupName> = self.groups.read().keys().cloned().collect();
        for name in names {
            let Some(state) = self.groups.read().get(&name).cloned() else {
                continue;
            };
            let mut members = state.members.lock();
            let before = members.len();
            members.retain(|_, expires_at| now < *expires_at);
            expired_members += before - members.len();
            let empty = members.is_empty();
            drop(members);
            if !empty {
                continue;
            }
            let mut groups = self.groups.write();
            let still_registered = groups
                .get(&name)
                .is_some_and(|current| Arc::ptr_eq(current, &state));
            if still_registered {
                let members = state.members.lock();
                if members.is_empty() {
                    state.retired.store(true, Ordering::Release);
                    drop(members);
                    _ = groups.remove(&name);
                    retired_groups += 1;
                }
            }
        }

        if expired_messages > 0 || retired_queues > 0 || expired_members > 0 || retired_groups > 0 {
            debug!(
                expired_messages,
                retired_queues, expired_members, retired_groups, "expiry sweep"
            );
        }
    }
}

#[async_trait]
impl ChannelBackend for InMemoryChannelLayer {
    fn capabilities(&self) -> BackendCapabilities {
        Self::CAPABILITIES
    }

    async fn send(
        &self,
        channel: &ChannelName,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        self.do_send(channel, payload, ttl)
    }

    async fn receive_many(&self, channels: &[ChannelName]) -> Result<Option<Delivery>, Error> {
        self.try_receive(channels)
    }

    async fn receive_many_blocking(
        &self,
        channels: &[ChannelName],
        timeout: Duration,
    ) -> Result<Option<Delivery>, Error> {
        self.blocking_receive(channels, timeout).await
    }

    async fn group_add(
        &self,
        group: &GroupName,
        channel: &ChannelName,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        self.do_group_add(group, channel, ttl)
    }

    async fn group_discard(&self, group: &GroupName, channel: &ChannelName) -> Result<(), Error> {
        self.do_group_discard(group, channel)
    }

    async fn group_members(&self, group: &GroupName) -> Result<Vec<ChannelName>, Error> {
        self.do_group_members(group)
    }
}
