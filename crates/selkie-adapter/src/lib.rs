//! Selkie Adapter
//!
//! The servant lifecycle engine of the selkie object adapter.
//!
//! # Overview
//!
//! An inbound invocation is gated by an [`AdapterManager`] (admission:
//! Holding/Active/Discarding/Inactive), resolved to a servant by the
//! adapter's policy-selected mediation strategy, executed, and signalled
//! back out. Administrative calls - explicit activation, deactivation,
//! manager state changes - are serialized with invocation traffic by the
//! adapter lock and the manager lock respectively.
//!
//! Per identity, a six-state entry machine tracks the activation slot:
//! incarnation, invocation residency, deferred etherealization and final
//! destruction. Deactivation never blocks on teardown; etherealize hooks
//! run on fire-and-forget tasks.
//!
//! # TigerStyle
//!
//! - Closed enums and explicit transition tables, no open dispatch
//! - Locks are never held across an `.await`
//! - Waiters register before the lock is released and re-check their
//!   predicate after every broadcast

pub mod adapter;
pub mod aom;
pub mod entry;
pub mod manager;
pub mod mediator;

pub use adapter::{Adapter, AdapterHooks};
pub use aom::{ActiveObjectMap, Detached, EntryId, Unbound};
pub use entry::{Applied, EntryEvent, EntryState, EtherealizeTask, ObjectEntry};
pub use manager::{AdapterManager, ManagerFactory, ManagerState};
pub use mediator::Mediator;
