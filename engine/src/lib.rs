//! # Outbox Engine
//!
//! The deterministic core of an offline mutation engine for collaborative
//! boards.
//!
//! Every local edit is recorded as an [`Operation`] that later gets reconciled
//! with the remote source of truth. This crate holds the pure pieces of that
//! process; the durable store, encryption and drain loop live in
//! `outbox-runtime`.
//!
//! ## Design Principles
//!
//! - **No IO**: The engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Immutable records**: Changes go through [`OperationPatch::apply`], which
//!   returns a new value
//!
//! ## Core Concepts
//!
//! ### Vector Clock
//!
//! [`VectorClock`] tracks per-node logical time. [`VectorClock::compare`]
//! yields a [`ClockOrdering`]: ahead, behind, equal, or concurrent.
//!
//! ### Conflict Policies
//!
//! [`conflict::resolve`] reconciles a local operation with a divergent remote
//! state using one of six [`ConflictPolicy`] strategies:
//! - [`ConflictPolicy::LastWriterWins`] - causally newer side wins (default)
//! - [`ConflictPolicy::SetUnion`] / [`ConflictPolicy::SetIntersection`]
//! - [`ConflictPolicy::NumericMax`] / [`ConflictPolicy::NumericMin`] /
//!   [`ConflictPolicy::NumericSum`]
//!
//! ### Dependencies
//!
//! [`DependencyGraph`] records "must apply before" edges. An operation whose
//! dependencies are not all resolved is never handed to a synchronizer.
//!
//! ## Quick Start
//!
//! ```rust
//! use outbox_engine::{
//!     conflict, ConflictPolicy, NewOperation, Payload, QueueDomain, RemoteState,
//!     Resolution, VectorClock,
//! };
//! use serde_json::json;
//!
//! let clock = VectorClock::new().increment("device-1");
//! let op = NewOperation::new(
//!     "board-1",
//!     "item-1",
//!     Payload::Patch { changes: json!({"estimate": 5}).as_object().cloned().unwrap() },
//! )
//! .with_policy(ConflictPolicy::numeric_sum("estimate"))
//! .into_operation(QueueDomain::Item, "op-1".into(), 1706745600000, clock);
//!
//! let remote = RemoteState::new(
//!     json!({"estimate": 3}),
//!     VectorClock::new().increment("server"),
//! );
//!
//! assert_eq!(
//!     conflict::resolve(&op, &remote),
//!     Resolution::Merge(json!({"estimate": 8}))
//! );
//! ```

pub mod clock;
pub mod conflict;
pub mod deps;
pub mod error;
pub mod operation;
pub mod policy;
pub mod snapshot;

// Re-export main types at crate root
pub use clock::{ClockOrdering, VectorClock};
pub use conflict::{ConflictPolicy, Preference, Resolution};
pub use deps::{DependencyGraph, DependencyRecord};
pub use error::Error;
pub use operation::{
    CapturedConflict, NewOperation, OpStatus, Operation, OperationPatch, Payload, QueueDomain,
    RemoteState,
};
pub use policy::{OfflinePolicy, RemoteWipe, WipeTarget};
pub use snapshot::{CollectionSnapshot, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_NAMESPACE};

/// Type aliases for clarity
pub type OperationId = String;
pub type NodeId = String;
pub type ScopeId = String;
pub type Timestamp = u64;
