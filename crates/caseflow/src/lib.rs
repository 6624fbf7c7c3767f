pub mod app;
pub mod broadcast;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod import;
pub mod ledger;
pub mod model;
pub mod normalize;
pub mod permission;
pub mod telemetry;
pub mod units;

pub use app::Caseflow;
pub use broadcast::{LifecycleBroadcaster, LifecycleEvent, LifecycleKind, LifecycleSink};
pub use config::{load_config, load_config_from_str, Config, ImportConfig, LimitsConfig};
pub use db::{Database, DatabaseError};
pub use error::{CaseflowError, ConfigError, Result};
pub use import::{
    BatchStatus, CaseField, ColumnMapping, CommitReport, ImportBatchCommitter,
    ImportMappingEngine, ImportSanitizer, ImportStagingBatch, MappingProposal, RowOutcome,
};
pub use ledger::{CaseFilter, CaseLedger, ImportApplication};
pub use model::{Case, CaseEdit, CaseStatus, Effect, Movement, NewCase};
pub use permission::{Action, Actor, PermissionEvaluator, Role};
pub use telemetry::init_tracing;
pub use units::{FieldDefinition, FieldType, StaticUnitDirectory, UnitConfig, UnitDirectory};
