//! Case lifecycle events for the notification collaborator.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Effect, Movement};

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Created,
    Transferred,
    Finalized,
    Returned,
    Reopened,
}

impl From<Effect> for LifecycleKind {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Create => LifecycleKind::Created,
            Effect::Transfer => LifecycleKind::Transferred,
            Effect::Finalize => LifecycleKind::Finalized,
            Effect::Return => LifecycleKind::Returned,
            Effect::Reopen => LifecycleKind::Reopened,
        }
    }
}

impl std::fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleKind::Created => write!(f, "Created"),
            LifecycleKind::Transferred => write!(f, "Transferred"),
            LifecycleKind::Finalized => write!(f, "Finalized"),
            LifecycleKind::Returned => write!(f, "Returned"),
            LifecycleKind::Reopened => write!(f, "Reopened"),
        }
    }
}

/// A committed change to a case, as seen by subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub case_id: String,
    /// Unit the case left; absent on creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_unit: Option<String>,
    pub to_unit: String,
    pub actor_id: String,
    /// Sequence index of the movement that caused the event.
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&Movement> for LifecycleEvent {
    fn from(m: &Movement) -> Self {
        Self {
            kind: m.effect.into(),
            case_id: m.case_id.clone(),
            from_unit: m.from_unit.clone(),
            to_unit: m.to_unit.clone(),
            actor_id: m.actor_id.clone(),
            sequence: m.sequence,
            timestamp: m.occurred_at,
        }
    }
}

/// Receives lifecycle events after the change they describe is committed.
pub trait LifecycleSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Broadcasts lifecycle events to any number of subscribers.
#[derive(Clone)]
pub struct LifecycleBroadcaster {
    sender: Arc<broadcast::Sender<LifecycleEvent>>,
}

impl LifecycleBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a new subscriber for lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for LifecycleBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LifecycleSink for LifecycleBroadcaster {
    fn emit(&self, event: LifecycleEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }
}

/// Keeps every emitted event in memory; handy for assertions and audits.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl LifecycleSink for RecordingSink {
    fn emit(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
