//! Centralized harness constants.
//!
//! # Categories
//!
//! - **Polling**: RetryPoller defaults
//! - **Broker**: embedded broker identity and internal topic layout
//! - **Topics**: naming limits
//! - **Worker**: verbatim configuration keys forwarded to the connect worker

use std::time::Duration;

// =============================================================================
// Polling
// =============================================================================

/// Fixed sleep between two check attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default budget for a broker readiness check.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Budget for every partition of a freshly created topic to elect a leader.
pub const DEFAULT_TOPIC_LEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on joining the background tasks of a stopping service.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Broker
// =============================================================================

/// Broker id used by single-node fixtures.
pub const DEFAULT_BROKER_ID: i32 = 1;

/// Delay between the broker binding its port and registering with the
/// coordinator. The health indicator stays empty until registration.
pub const DEFAULT_REGISTRATION_DELAY: Duration = Duration::from_millis(200);

/// Tick of the embedded controller that assigns partition leaders.
pub const DEFAULT_ELECTION_INTERVAL: Duration = Duration::from_millis(100);

/// Internal topic that stores committed consumer offsets.
pub const OFFSETS_TOPIC: &str = "__consumer_offsets";

/// Partition count of [`OFFSETS_TOPIC`] for single-node fixtures.
pub const DEFAULT_OFFSETS_TOPIC_PARTITIONS: u32 = 1;

/// Bound on the broker's `ruok` ping of its coordinator at startup.
pub const COORDINATOR_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed `accept` before the listener tries again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on reading a request from an admin or REST connection.
pub const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// File written into the broker log directory at startup.
pub const BROKER_META_FILE: &str = "meta.properties";

/// File written into the coordinator data directory on every topic change.
pub const COORDINATOR_SNAPSHOT_FILE: &str = "snapshot.json";

// =============================================================================
// Topics
// =============================================================================

/// Maximum length for topic names (Kafka's MAX_NAME_LENGTH).
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Replacement for characters outside `[A-Za-z0-9._-]` in generated names.
pub const TOPIC_NAME_REPLACEMENT: char = '_';

// =============================================================================
// Worker
// =============================================================================

pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const KEY_CONVERTER: &str = "key.converter";
pub const VALUE_CONVERTER: &str = "value.converter";
pub const INTERNAL_KEY_CONVERTER: &str = "internal.key.converter";
pub const INTERNAL_VALUE_CONVERTER: &str = "internal.value.converter";
pub const INTERNAL_KEY_CONVERTER_SCHEMAS_ENABLE: &str = "internal.key.converter.schemas.enable";
pub const INTERNAL_VALUE_CONVERTER_SCHEMAS_ENABLE: &str =
    "internal.value.converter.schemas.enable";
pub const OFFSET_STORAGE_FILE: &str = "offset.storage.file.filename";
pub const OFFSET_FLUSH_INTERVAL_MS: &str = "offset.flush.interval.ms";
pub const CONSUMER_METADATA_MAX_AGE_MS: &str = "consumer.metadata.max.age.ms";
pub const REST_PORT: &str = "rest.port";
pub const REST_HOST_NAME: &str = "rest.host.name";

/// Offset flush interval of test workers.
pub const DEFAULT_OFFSET_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Consumer metadata refresh interval of test workers.
pub const DEFAULT_METADATA_MAX_AGE: Duration = Duration::from_secs(1);

/// How long a worker waits for a single bootstrap connection attempt.
pub const BOOTSTRAP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Retries after a refused bootstrap connection.
pub const BOOTSTRAP_CONNECT_RETRIES: usize = 3;

/// Delay between bootstrap connection retries.
pub const BOOTSTRAP_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Worker id of the single standalone worker.
pub const STANDALONE_WORKER_ID: &str = "1";

/// Connector config key naming the connector implementation.
pub const CONNECTOR_CLASS: &str = "connector.class";

/// Connector config key bounding its task count.
pub const TASKS_MAX: &str = "tasks.max";
