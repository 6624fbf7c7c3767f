//! Test harness for isolated test execution.
//!
//! Each `TestHarness` owns a temporary directory holding its own SQLite file,
//! so tests never share state.

#![allow(dead_code)]

use tempfile::TempDir;

use caseflow::config::Config;
use caseflow::import::{ColumnMapping, CommitReport, ImportStagingBatch};
use caseflow::model::{Case, Movement, NewCase};
use caseflow::permission::{Actor, Role};
use caseflow::Caseflow;

use super::builders::ConfigBuilder;

pub struct TestHarness {
    /// Keeps the database directory alive for the harness lifetime.
    temp_dir: TempDir,
    pub app: Caseflow,
    /// Administrator homed in `Protocol`.
    pub admin: Actor,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new())
    }

    /// Uses the builder's units and limits; the database path is replaced.
    pub fn with_config(builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("caseflow.db");
        let config: Config = builder
            .database_path(&db_path.to_string_lossy())
            .build();
        let app = Caseflow::initialize(&config).expect("Failed to initialize caseflow");
        Self {
            temp_dir,
            app,
            admin: Actor::new("admin", Role::Administrator, "Protocol"),
        }
    }

    pub fn actor(&self, id: &str, role: Role, home_unit: &str) -> Actor {
        Actor::new(id, role, home_unit)
    }

    /// Creates a case as the administrator.
    pub fn create(&self, id: &str, unit: &str) -> Case {
        self.app
            .ledger
            .create_case(&self.admin, unit, NewCase::new(id, &format!("Case {}", id)))
            .expect("Failed to create case")
    }

    /// Transfers the current state of a case as the administrator.
    pub fn transfer(&self, id: &str, unit: &str) -> Movement {
        let case = self.app.ledger.get(id).expect("case exists");
        self.app
            .ledger
            .transfer(&self.admin, &case, unit, None)
            .expect("Failed to transfer case")
    }

    pub fn history(&self, id: &str) -> Vec<Movement> {
        self.app.ledger.history(None, id).expect("history")
    }

    /// Stages an upload and confirms the proposed mapping.
    pub fn stage_confirmed(&self, actor: &Actor, bytes: &[u8]) -> ImportStagingBatch {
        let batch = self.app.imports.stage(actor, bytes).expect("stage");
        let mapping: ColumnMapping = batch.proposal.mapping.clone();
        self.app
            .imports
            .confirm_mapping(actor, &batch.id, mapping)
            .expect("confirm mapping")
    }

    /// Stages, confirms and commits as the administrator.
    pub fn import(&self, bytes: &[u8]) -> CommitReport {
        let batch = self.stage_confirmed(&self.admin, bytes);
        self.app
            .imports
            .commit(&self.admin, &batch.id)
            .expect("commit")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
