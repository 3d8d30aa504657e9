//! Selkie Core
//!
//! Core types, errors, and constants for the selkie object adapter.
//!
//! # Overview
//!
//! Selkie is a server-side object adapter lifecycle engine: it tracks,
//! activates, deactivates and destroys remote-invocable servants named by
//! opaque byte identities, under concurrent invocation traffic. This crate
//! carries the leaf types the engine is built from; the engine itself
//! lives in `selkie-adapter`.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `OBJECT_ID_LENGTH_BYTES_MAX`)
//! - Assertions on invariants, no silent clamping

pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod object_id;
pub mod policy;
pub mod runtime;
pub mod servant;
pub mod telemetry;

pub use config::AdapterConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use object_id::ObjectId;
pub use policy::{IdAssignment, IdUniqueness, Policies, RequestProcessing, ServantRetention};
pub use runtime::{
    current_runtime, CurrentRuntime, Instant, JoinError, JoinHandle, Runtime, TokioRuntime,
};
pub use servant::{
    ForwardTarget, Resolution, Servant, ServantActivator, ServantHandle, ServantKey, ServantLocator,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
