//! Broadcasting modules for real-time event streaming.
//!
//! Lifecycle events leave the ledger through the [`LifecycleSink`] trait so
//! the notification transport can be swapped without touching the ledger.

pub mod lifecycle;

pub use lifecycle::{
    LifecycleBroadcaster, LifecycleEvent, LifecycleKind, LifecycleSink, RecordingSink,
};
