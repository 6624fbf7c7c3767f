//! Case and movement types shared by the ledger, permissions and import.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a movement does to its case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Create,
    Transfer,
    Return,
    Finalize,
    Reopen,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Create => "create",
            Effect::Transfer => "transfer",
            Effect::Return => "return",
            Effect::Finalize => "finalize",
            Effect::Reopen => "reopen",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Effect::Create),
            "transfer" => Some(Effect::Transfer),
            "return" => Some(Effect::Return),
            "finalize" => Some(Effect::Finalize),
            "reopen" => Some(Effect::Reopen),
            _ => None,
        }
    }

    /// Status a case is in right after a movement with this effect.
    pub fn resulting_status(self) -> CaseStatus {
        match self {
            Effect::Create | Effect::Transfer | Effect::Reopen => CaseStatus::Active,
            Effect::Return => CaseStatus::Returned,
            Effect::Finalize => CaseStatus::Finalized,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status of a case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    Finalized,
    Returned,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Active => "active",
            CaseStatus::Finalized => "finalized",
            CaseStatus::Returned => "returned",
        }
    }

    /// Movement effects that leave a case in this status.
    pub fn effects(self) -> &'static [Effect] {
        match self {
            CaseStatus::Active => &[Effect::Create, Effect::Transfer, Effect::Reopen],
            CaseStatus::Finalized => &[Effect::Finalize],
            CaseStatus::Returned => &[Effect::Return],
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition of a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub case_id: String,
    /// Position in the case history, starting at 0 with no gaps.
    pub sequence: u32,
    /// `None` only for the creating movement.
    pub from_unit: Option<String>,
    pub to_unit: String,
    pub effect: Effect,
    pub actor_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A case as read from the ledger.
///
/// `current_unit`, `status` and `last_sequence` are taken from the latest
/// movement when the case is loaded; they are not stored on the case row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    pub title: String,
    pub current_unit: String,
    pub status: CaseStatus,
    pub extra_fields: BTreeMap<String, String>,
    /// Optimistic concurrency token, bumped by every mutation.
    pub version: u32,
    pub last_sequence: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn is_finalized(&self) -> bool {
        self.status == CaseStatus::Finalized
    }
}

/// Input for [`crate::ledger::CaseLedger::create_case`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCase {
    /// Raw identifier; canonicalized by the ledger.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Timestamp for the creating movement; defaults to now.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewCase {
    pub fn new(identifier: &str, title: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.extra_fields
            .insert(name.to_string(), value.to_string());
        self
    }
}

/// Input for [`crate::ledger::CaseLedger::edit`]. Extra fields are merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseEdit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}
