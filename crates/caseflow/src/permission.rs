//! Role and unit-scope based authorization.
//!
//! Decisions are pure: the same actor, action, unit and case always give the
//! same answer and nothing is read from storage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CaseflowError, Result};
use crate::model::Case;

/// Role of an actor; bounds the set of actions it may ever perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Administrator,
    UnitManager,
    Operator,
    Viewer,
}

/// An authenticated caller, as supplied by the authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: Role,
    pub home_unit: String,
    #[serde(default)]
    pub scoped_units: Vec<String>,
}

impl Actor {
    pub fn new(id: &str, role: Role, home_unit: &str) -> Self {
        Self {
            id: id.to_string(),
            role,
            home_unit: home_unit.to_string(),
            scoped_units: Vec::new(),
        }
    }

    /// Adds a unit to the actor's scope beyond its home unit.
    pub fn with_scope(mut self, unit: &str) -> Self {
        self.scoped_units.push(unit.to_string());
        self
    }

    pub fn in_scope(&self, unit: &str) -> bool {
        self.home_unit == unit || self.scoped_units.iter().any(|u| u == unit)
    }

    /// Home unit followed by the additional scoped units.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.home_unit.as_str()).chain(self.scoped_units.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Create,
    Edit,
    Transfer,
    Finalize,
    Return,
    Reopen,
    Delete,
    ConfigureFields,
    ViewHistory,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Transfer => "transfer",
            Action::Finalize => "finalize",
            Action::Return => "return",
            Action::Reopen => "reopen",
            Action::Delete => "delete",
            Action::ConfigureFields => "configure-fields",
            Action::ViewHistory => "view-history",
        };
        f.write_str(name)
    }
}

/// Decides whether an actor may perform an action.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    /// Returns whether `actor` may perform `action`.
    ///
    /// `target_unit` is the unit the action lands on: the destination for
    /// transfer and return, otherwise the unit being acted on. When a case is
    /// given, its current unit is the unit the action starts from.
    pub fn can_perform(
        &self,
        actor: &Actor,
        action: Action,
        target_unit: &str,
        target_case: Option<&Case>,
    ) -> bool {
        let source_unit = target_case
            .map(|c| c.current_unit.as_str())
            .unwrap_or(target_unit);

        match actor.role {
            Role::Administrator => true,
            Role::UnitManager => match action {
                // Managers may also pull cases into their own units.
                Action::Transfer | Action::Return => {
                    actor.in_scope(source_unit) || actor.in_scope(target_unit)
                }
                Action::Create
                | Action::Edit
                | Action::Finalize
                | Action::Reopen
                | Action::ViewHistory => actor.in_scope(source_unit),
                Action::Delete | Action::ConfigureFields => false,
            },
            Role::Operator => match action {
                Action::Create | Action::Edit | Action::ViewHistory => actor.in_scope(source_unit),
                Action::Transfer
                | Action::Finalize
                | Action::Return
                | Action::Reopen
                | Action::Delete
                | Action::ConfigureFields => false,
            },
            Role::Viewer => action == Action::ViewHistory && actor.in_scope(source_unit),
        }
    }

    /// Like [`can_perform`](Self::can_perform) but fails with `PermissionDenied`.
    pub fn require(
        &self,
        actor: &Actor,
        action: Action,
        target_unit: &str,
        target_case: Option<&Case>,
    ) -> Result<()> {
        if self.can_perform(actor, action, target_unit, target_case) {
            Ok(())
        } else {
            let unit = target_case
                .map(|c| c.current_unit.clone())
                .unwrap_or_else(|| target_unit.to_string());
            Err(CaseflowError::PermissionDenied {
                actor: actor.id.clone(),
                action,
                unit,
            })
        }
    }

    /// Whether the actor may create cases in at least one of its units.
    pub fn can_create_anywhere(&self, actor: &Actor) -> bool {
        actor
            .units()
            .any(|unit| self.can_perform(actor, Action::Create, unit, None))
    }
}
