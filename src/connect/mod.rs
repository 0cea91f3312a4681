//! Standalone connect worker.
//!
//! Enough of a Kafka Connect standalone worker for integration tests that
//! need a control plane next to a broker:
//!
//! - [`WorkerConfig`]: the verbatim property map and its typed view
//! - [`converter`]: `bytes`, `json` and `string` converters
//! - [`FileOffsetStore`]: source offsets persisted to a file
//! - [`Herder`] / [`StandaloneHerder`]: connector registration and state
//! - [`RestServer`]: read-only HTTP view of the herder
//! - [`Connect`]: the runtime tying them together
//! - [`WorkerHandle`]: scoped ownership for tests
//!
//! Connector tasks are not executed; the herder tracks configs, task layout
//! and pause/resume state.

mod config;
pub mod converter;
mod handle;
mod herder;
mod offsets;
mod rest;
mod worker;

pub use config::WorkerConfig;
pub use converter::{Converter, ConverterKind};
pub use handle::WorkerHandle;
pub use herder::{
    ConnectorConfig, ConnectorInfo, ConnectorState, ConnectorStatus, Created, Herder,
    StandaloneHerder, StateInfo, TaskId, TaskState,
};
pub use offsets::FileOffsetStore;
pub use rest::RestServer;
pub use worker::Connect;
