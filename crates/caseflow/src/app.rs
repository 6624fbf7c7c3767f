//! Wiring of the ledger, the import pipeline and event fan-out.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::broadcast::{LifecycleBroadcaster, LifecycleEvent};
use crate::config::Config;
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Result};
use crate::import::ImportBatchCommitter;
use crate::ledger::CaseLedger;
use crate::units::{StaticUnitDirectory, UnitDirectory};

/// Shared handles for one configured case store.
#[derive(Clone)]
pub struct Caseflow {
    /// Case operations and history.
    pub ledger: CaseLedger,

    /// Spreadsheet staging and commit.
    pub imports: ImportBatchCommitter,

    /// Lifecycle events for listeners.
    pub events: Arc<LifecycleBroadcaster>,

    pub units: Arc<StaticUnitDirectory>,
}

impl Caseflow {
    /// Opens (or creates) the configured database and builds the services.
    pub fn initialize(config: &Config) -> Result<Self> {
        let path = match &config.database_path {
            Some(path) => PathBuf::from(path),
            None => default_database_path().ok_or_else(|| {
                ConfigError::Validation {
                    message: "no home directory for the default database path".to_string(),
                }
            })?,
        };
        info!(path = %path.display(), "Opening case database");
        let db = Database::open(&path)?;
        Ok(Self::with_database(db, config))
    }

    /// Same services over a private in-memory database.
    pub fn in_memory(config: &Config) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(db, config))
    }

    fn with_database(db: Database, config: &Config) -> Self {
        let units = Arc::new(StaticUnitDirectory::new(config.units.clone()));
        let events = Arc::new(LifecycleBroadcaster::default());
        let directory: Arc<dyn UnitDirectory> = units.clone();

        let ledger = CaseLedger::new(
            db.clone(),
            directory.clone(),
            events.clone(),
            config.limits.clone(),
            config.import.date_formats.clone(),
        );
        let imports = ImportBatchCommitter::new(
            db,
            ledger.clone(),
            directory,
            config.limits.clone(),
            config.import.clone(),
        );

        Self {
            ledger,
            imports,
            events,
            units,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
