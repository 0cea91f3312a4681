//! Unique topic names for per-test namespaces.
//!
//! Tests sharing a broker (or re-running against a leftover one) must never
//! collide on topic names. [`TopicName::unique`] appends a random UUID to a
//! caller-chosen prefix and replaces every character outside
//! `[A-Za-z0-9._-]` with `_`, so the result is always a legal topic name.
//!
//! # Validation Rules
//!
//! Topic names accepted by the embedded coordinator must:
//! - Not be empty
//! - Be at most 249 characters (Kafka's MAX_NAME_LENGTH)
//! - Contain only ASCII alphanumeric characters, dots, underscores, and hyphens
//! - Not be "." or ".."

use std::fmt;

use uuid::Uuid;

use crate::constants::{MAX_TOPIC_NAME_LENGTH, TOPIC_NAME_REPLACEMENT};
use crate::error::{Error, Result};

/// A generated topic name together with its partition layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName {
    name: String,
    partitions: u32,
}

impl TopicName {
    /// Generate `prefix` + random suffix, sanitized.
    ///
    /// The prefix is truncated if needed so the whole name fits
    /// [`MAX_TOPIC_NAME_LENGTH`]; the random suffix is never truncated.
    pub fn unique(prefix: &str, partitions: u32) -> Result<Self> {
        if partitions == 0 {
            return Err(Error::InvalidTopic(format!(
                "topic with prefix '{}' needs at least one partition",
                prefix
            )));
        }

        let suffix = Uuid::new_v4().to_string();
        let budget = MAX_TOPIC_NAME_LENGTH - suffix.len();
        let prefix: String = prefix.chars().take(budget).collect();

        Ok(Self {
            name: sanitize(&format!("{}{}", prefix, suffix)),
            partitions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn into_name(self) -> String {
        self.name
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Whether `c` may appear in a topic name.
pub fn is_valid_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if is_valid_topic_char(c) {
                c
            } else {
                TOPIC_NAME_REPLACEMENT
            }
        })
        .collect()
}

/// Validate a topic name following Apache Kafka's naming conventions.
///
/// ```
/// use kafkaesque_testkit::topic::validate_topic_name;
///
/// assert!(validate_topic_name("my-topic").is_ok());
/// assert!(validate_topic_name("topic.prod").is_ok());
/// assert!(validate_topic_name("").is_err());
/// assert!(validate_topic_name("..").is_err());
/// assert!(validate_topic_name("topic/name").is_err());
/// ```
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("topic name cannot be empty".to_string()));
    }

    if topic.len() > MAX_TOPIC_NAME_LENGTH {
        return Err(Error::InvalidTopic(format!(
            "topic name too long ({} chars, max {})",
            topic.len(),
            MAX_TOPIC_NAME_LENGTH
        )));
    }

    if topic == "." || topic == ".." {
        return Err(Error::InvalidTopic(format!(
            "topic name '{}' is reserved",
            topic
        )));
    }

    if let Some(c) = topic.chars().find(|c| !is_valid_topic_char(*c)) {
        return Err(Error::InvalidTopic(format!(
            "topic name '{}' contains invalid character {:?}",
            topic, c
        )));
    }

    Ok(())
}
