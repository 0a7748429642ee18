// Copyright The Chanplex Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel and group declarations for the channel layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;

/// The reserved leading character marking a response channel.
pub const RESPONSE_PREFIX: char = '!';

/// Maximum accepted name length; names must be strictly shorter than this.
pub const MAX_NAME_LEN: usize = 200;

/// Classification of a channel name, derived solely from its leading
/// character. A routing hint only — never used for access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A regular, possibly multi-consumer channel.
    Normal,
    /// A channel dedicated to a single consumer, named with a leading `!`.
    Response,
}

fn validate_name(raw: &str, allow_response_prefix: bool) -> Result<(), String> {
    if raw.is_empty() {
        return Err("name must be non-empty".to_owned());
    }
    if raw.len() >= MAX_NAME_LEN {
        return Err(format!(
            "name must be shorter than {MAX_NAME_LEN} characters (got {})",
            raw.len()
        ));
    }
    let body = match raw.strip_prefix(RESPONSE_PREFIX) {
        Some(rest) if allow_response_prefix => rest,
        Some(_) => {
            return Err(format!(
                "`{RESPONSE_PREFIX}` prefix is reserved for response channel names"
            ));
        }
        None => raw,
    };
    if body.is_empty() {
        return Err(format!(
            "name must contain at least one character after `{RESPONSE_PREFIX}`"
        ));
    }
    if let Some(c) = body
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!(
            "invalid character `{c}`: only ASCII alphanumerics, `_` and `-` are allowed"
        ));
    }
    Ok(())
}

/// Name of a channel.
///
/// Channels are not pre-declared: a channel exists by virtue of being named
/// by a send, receive or group membership. Names are 1–199 characters from
/// `[A-Za-z0-9_-]`, with an optional single leading `!` marking a response
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Parses and validates a channel name.
    pub fn parse(raw: &str) -> Result<Self, String> {
        validate_name(raw, true)?;
        Ok(Self(raw.to_owned()))
    }

    /// Returns the channel name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the owned channel name.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Classifies this channel from its leading character alone.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        if self.0.starts_with(RESPONSE_PREFIX) {
            ChannelKind::Response
        } else {
            ChannelKind::Normal
        }
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::borrow::Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ChannelName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl From<ChannelName> for Cow<'static, str> {
    fn from(value: ChannelName) -> Self {
        Cow::Owned(value.0)
    }
}

impl From<&'static str> for ChannelName {
    fn from(value: &'static str) -> Self {
        Self::parse(value).expect("invalid static channel name literal")
    }
}

/// Name of a group: a TTL-managed set of channel names used for fan-out.
///
/// Same alphabet and length rules as [`ChannelName`], minus the `!`
/// discriminator, which is reserved for response channels.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Parses and validates a group name.
    pub fn parse(raw: &str) -> Result<Self, String> {
        validate_name(raw, false)?;
        Ok(Self(raw.to_owned()))
    }

    /// Returns the group name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the owned group name.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::borrow::Borrow<str> for GroupName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for GroupName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<GroupName> for String {
    fn from(value: GroupName) -> Self {
        value.0
    }
}

impl From<&'static str> for GroupName {
    fn from(value: &'static str) -> Self {
        Self::parse(value).expect("invalid static group name literal")
    }
}

/// Backend selector used by a channel layer declaration.
///
/// Only `in_memory` is implemented at this stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local in-memory backend.
    #[default]
    InMemory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::InMemory => "in_memory",
        };
        f.write_str(value)
    }
}

/// Behavior when a channel queue reaches `capacity`.
///
/// Both variants drop the incoming message; neither ever blocks the sender.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOnFullPolicy {
    /// Reject the incoming message with a `ChannelFull` error.
    #[default]
    RejectNew,
    /// Silently discard the incoming message and keep queued items untouched.
    DropNewest,
}

/// Policies governing a channel backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChannelPolicies {
    /// Maximum number of queued messages per channel.
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
    /// Behavior when a channel queue reaches `capacity`.
    #[serde(default)]
    pub on_full: ChannelOnFullPolicy,
    /// Hard cap on accepted payload size, in bytes. The contract requires
    /// payloads of at least 5 MiB to be supported.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Default message expiry applied when a send carries no explicit TTL.
    #[serde(default = "default_message_ttl", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub message_ttl: Duration,
    /// Default group membership expiry applied when a group add carries no
    /// explicit TTL. Repeated adds are the keepalive mechanism.
    #[serde(default = "default_group_member_ttl", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub group_member_ttl: Duration,
    /// Period of the background sweep reaping expired messages and members.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub sweep_interval: Duration,
}

impl Default for ChannelPolicies {
    fn default() -> Self {
        Self {
            capacity: default_channel_capacity(),
            on_full: ChannelOnFullPolicy::default(),
            max_payload_bytes: default_max_payload_bytes(),
            message_ttl: default_message_ttl(),
            group_member_ttl: default_group_member_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl ChannelPolicies {
    /// Returns validation errors for this policy set.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.capacity == 0 {
            errors.push(format!("{path_prefix}.capacity must be greater than 0"));
        }
        if self.max_payload_bytes < MIN_PAYLOAD_CAP_BYTES {
            errors.push(format!(
                "{path_prefix}.max_payload_bytes must be at least {MIN_PAYLOAD_CAP_BYTES} \
                 (the contract requires payloads of at least 5 MiB to be supported)"
            ));
        }
        if self.sweep_interval.is_zero() {
            errors.push(format!("{path_prefix}.sweep_interval must be non-zero"));
        }
        errors
    }
}

/// Smallest permitted value for `max_payload_bytes`.
pub const MIN_PAYLOAD_CAP_BYTES: usize = 5 * 1024 * 1024;

const fn default_channel_capacity() -> usize {
    100
}

const fn default_max_payload_bytes() -> usize {
    16 * 1024 * 1024
}

const fn default_message_ttl() -> Duration {
    Duration::from_secs(60)
}

const fn default_group_member_ttl() -> Duration {
    Duration::from_secs(86_400)
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::{
        BackendKind, ChannelKind, ChannelName, ChannelOnFullPolicy, ChannelPolicies, GroupName,
    };
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn defaults_match_expected_values() {
        let policies = ChannelPolicies::default();
        assert_eq!(policies.capacity, 100);
        assert_eq!(policies.on_full, ChannelOnFullPolicy::RejectNew);
        assert_eq!(policies.max_payload_bytes, 16 * 1024 * 1024);
        assert_eq!(policies.message_ttl, Duration::from_secs(60));
        assert_eq!(policies.group_member_ttl, Duration::from_secs(86_400));
        assert_eq!(policies.sweep_interval, Duration::from_secs(5));
        assert!(policies.validation_errors("policies").is_empty());
    }

    #[test]
    fn validates_capacity_payload_cap_and_sweep_interval() {
        let policies = ChannelPolicies {
            capacity: 0,
            max_payload_bytes: 1024,
            sweep_interval: Duration::ZERO,
            ..ChannelPolicies::default()
        };

        let errors = policies.validation_errors("layers.default");
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|error| error.contains(".capacity")));
        assert!(
            errors
                .iter()
                .any(|error| error.contains(".max_payload_bytes"))
        );
        assert!(errors.iter().any(|error| error.contains(".sweep_interval")));
    }

    #[test]
    fn deserializes_policy_values() {
        let yaml = r#"
capacity: 10
on_full: drop_newest
max_payload_bytes: 8388608
message_ttl: 30s
group_member_ttl: 1h
sweep_interval: 250ms
"#;

        let policies: ChannelPolicies = serde_yaml::from_str(yaml).expect("policies should parse");
        assert_eq!(policies.capacity, 10);
        assert_eq!(policies.on_full, ChannelOnFullPolicy::DropNewest);
        assert_eq!(policies.max_payload_bytes, 8 * 1024 * 1024);
        assert_eq!(policies.message_ttl, Duration::from_secs(30));
        assert_eq!(policies.group_member_ttl, Duration::from_secs(3600));
        assert_eq!(policies.sweep_interval, Duration::from_millis(250));
    }

    #[test]
    fn backend_kind_defaults_to_in_memory() {
        let backend: BackendKind = serde_yaml::from_str("in_memory").expect("should parse");
        assert_eq!(backend, BackendKind::InMemory);
        assert_eq!(BackendKind::default(), BackendKind::InMemory);
    }

    #[test]
    fn channel_name_accepts_full_alphabet() {
        let name = ChannelName::parse("chat_room-7").expect("valid name");
        assert_eq!(name.as_str(), "chat_room-7");
        assert_eq!(name.kind(), ChannelKind::Normal);
    }

    #[test]
    fn channel_name_classifies_response_prefix() {
        let name = ChannelName::parse("!AbCdEf123").expect("valid response name");
        assert_eq!(name.kind(), ChannelKind::Response);
    }

    #[test]
    fn channel_name_rejects_empty_values() {
        let err = ChannelName::parse("").expect_err("empty names should fail");
        assert!(err.contains("non-empty"));
    }

    #[test]
    fn channel_name_rejects_bare_prefix() {
        let err = ChannelName::parse("!").expect_err("`!` alone should fail");
        assert!(err.contains("at least one character"));
    }

    #[test]
    fn channel_name_rejects_interior_prefix_character() {
        let err = ChannelName::parse("chat!room").expect_err("interior `!` should fail");
        assert!(err.contains("invalid character"));
    }

    #[test]
    fn channel_name_rejects_disallowed_characters() {
        for raw in ["chat room", "chat.room", "chät", "chat/room"] {
            assert!(
                ChannelName::parse(raw).is_err(),
                "`{raw}` should be rejected"
            );
        }
    }

    #[test]
    fn channel_name_enforces_length_boundary() {
        let longest = "c".repeat(199);
        assert!(ChannelName::parse(&longest).is_ok());

        let too_long = "c".repeat(200);
        let err = ChannelName::parse(&too_long).expect_err("200 chars should fail");
        assert!(err.contains("shorter than 200"));
    }

    #[test]
    fn group_name_rejects_response_prefix() {
        let err = GroupName::parse("!resp").expect_err("groups may not use `!`");
        assert!(err.contains("reserved"));
    }

    #[test]
    fn channel_name_supports_hash_map_lookup_by_str() {
        #[derive(Debug, Deserialize)]
        struct LayerDoc {
            channels: HashMap<ChannelName, ChannelPolicies>,
        }

        let yaml = r#"
channels:
  chat:
    capacity: 1
"#;

        let doc: LayerDoc = serde_yaml::from_str(yaml).expect("channels should parse");
        assert!(doc.channels.contains_key("chat"));
    }

    #[test]
    fn channel_name_round_trips_through_serde() {
        let name = ChannelName::parse("!reply-7").expect("valid name");
        let yaml = serde_yaml::to_string(&name).expect("serializes");
        let back: ChannelName = serde_yaml::from_str(&yaml).expect("deserializes");
        assert_eq!(name, back);
    }

    #[test]
    fn invalid_channel_name_fails_deserialization() {
        let result: Result<ChannelName, _> = serde_yaml::from_str("\"bad name\"");
        assert!(result.is_err());
    }
}
