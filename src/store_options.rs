use std::any::Any;
use std::sync::Arc;

use delayed_worker_dialect::{ClaimStrategy, Dialect, DialectError};
use delayed_worker_migrations::{migrate, MigrateError};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use thiserror::Error;
use tracing::info;

use crate::context::Registry;
use crate::handler_id::HandlerIdSequence;
use crate::store::{JobStore, StoreInner, TimeSource};

pub const DEFAULT_TABLE_NAME: &str = "delayed_jobs";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Configuration of a [`JobStore`].
#[derive(Default)]
pub struct StoreOptions {
    database_url: Option<String>,
    pool: Option<AnyPool>,
    dialect: Option<Dialect>,
    max_connections: Option<u32>,
    table_name: Option<String>,
    time_source: TimeSource,
    delay_jobs: Option<bool>,
    claim_strategy: Option<ClaimStrategy>,
    auto_migrate: Option<bool>,
    registry: Option<Arc<Registry>>,
    handler_ids: Option<Arc<HandlerIdSequence>>,
    app_state: Option<Arc<dyn Any + Send + Sync>>,
}

#[derive(Error, Debug)]
pub enum StoreBuildError {
    #[error("Error occurred while connecting to the database: {0}")]
    ConnectError(#[from] sqlx::Error),

    #[error("Missing database_url configuration - must provide either database_url or pool")]
    MissingDatabaseUrl,

    #[error("Invalid dialect or table configuration: {0}")]
    DialectError(#[from] DialectError),

    #[error("The {dialect} dialect cannot claim jobs with {strategy:?}: it has no UPDATE ... RETURNING")]
    UnsupportedClaimStrategy {
        dialect: Dialect,
        strategy: ClaimStrategy,
    },

    #[error("Error occurred while migrating the jobs table: {0}")]
    MigrationError(#[from] MigrateError),
}

impl StoreOptions {
    pub async fn init(self) -> Result<JobStore, StoreBuildError> {
        install_default_drivers();

        let (pool, dialect) = match self.pool {
            Some(pool) => {
                let dialect = match self.dialect {
                    Some(dialect) => dialect,
                    None => Dialect::from_url(pool.connect_options().database_url.as_str())?,
                };
                (pool, dialect)
            }
            None => {
                let database_url = self
                    .database_url
                    .ok_or(StoreBuildError::MissingDatabaseUrl)?;
                let dialect = match self.dialect {
                    Some(dialect) => dialect,
                    None => Dialect::from_url(&database_url)?,
                };
                let pool = AnyPoolOptions::new()
                    .max_connections(self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
                    .connect(&database_url)
                    .await?;
                (pool, dialect)
            }
        };

        let table_name = self
            .table_name
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        let quoted_table = dialect.quote_identifier(&table_name)?;

        let profile = dialect.profile();
        let claim_strategy = match self.claim_strategy {
            Some(ClaimStrategy::AtomicClaim) if !profile.supports_returning => {
                return Err(StoreBuildError::UnsupportedClaimStrategy {
                    dialect,
                    strategy: ClaimStrategy::AtomicClaim,
                })
            }
            Some(strategy) => strategy,
            None => profile.claim_strategy,
        };

        if self.auto_migrate.unwrap_or(true) {
            migrate(&pool, dialect, &table_name).await?;
        }

        info!(%dialect, table_name, ?claim_strategy, time_source = ?self.time_source, "Job store ready");

        Ok(JobStore::from_inner(StoreInner {
            pool,
            dialect,
            table_name,
            quoted_table,
            time_source: self.time_source,
            delay_jobs: self.delay_jobs.unwrap_or(true),
            claim_strategy,
            registry: self.registry.unwrap_or_default(),
            handler_ids: self.handler_ids.unwrap_or_default(),
            app_state: self.app_state,
        }))
    }

    pub fn database_url(mut self, value: &str) -> Self {
        self.database_url = Some(value.into());
        self
    }

    /// Uses an existing pool. The dialect is inferred from the pool's url
    /// unless set with [`StoreOptions::dialect`].
    pub fn pool(mut self, value: AnyPool) -> Self {
        self.pool = Some(value);
        self
    }

    /// Overrides the dialect, required to select [`Dialect::MySqlLegacy`].
    pub fn dialect(mut self, value: Dialect) -> Self {
        self.dialect = Some(value);
        self
    }

    pub fn max_connections(mut self, value: u32) -> Self {
        self.max_connections = Some(value);
        self
    }

    /// Jobs table name, optionally schema qualified. Defaults to `delayed_jobs`.
    pub fn table_name(mut self, value: &str) -> Self {
        self.table_name = Some(value.into());
        self
    }

    pub fn time_source(mut self, value: TimeSource) -> Self {
        self.time_source = value;
        self
    }

    /// Shorthand for [`TimeSource::Local`] (`true`) or [`TimeSource::Database`].
    pub fn use_local_time(self, value: bool) -> Self {
        self.time_source(if value {
            TimeSource::Local
        } else {
            TimeSource::Database
        })
    }

    /// When `false`, `enqueue` runs jobs synchronously instead of storing them.
    pub fn delay_jobs(mut self, value: bool) -> Self {
        self.delay_jobs = Some(value);
        self
    }

    /// Forces a reservation protocol instead of the dialect's default.
    pub fn claim_strategy(mut self, value: ClaimStrategy) -> Self {
        self.claim_strategy = Some(value);
        self
    }

    /// Whether `init` installs or upgrades the jobs table. Defaults to `true`.
    pub fn auto_migrate(mut self, value: bool) -> Self {
        self.auto_migrate = Some(value);
        self
    }

    pub fn registry(mut self, value: impl Into<Arc<Registry>>) -> Self {
        self.registry = Some(value.into());
        self
    }

    pub fn handler_ids(mut self, value: impl Into<Arc<HandlerIdSequence>>) -> Self {
        self.handler_ids = Some(value.into());
        self
    }

    /// State made available to handler factories through
    /// [`HandlerContext::app_state`](crate::HandlerContext::app_state).
    pub fn app_state<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.app_state = Some(Arc::new(value));
        self
    }
}
