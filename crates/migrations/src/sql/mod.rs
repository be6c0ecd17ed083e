use delayed_worker_dialect::Dialect;
use sqlx::{Any, Transaction};

pub mod m000001;
pub mod m000002;

/// Placeholder for the quoted jobs table in migration statements
pub(crate) const TABLE_TOKEN: &str = ":DELAYED_JOBS_TABLE";
/// Placeholder for the bare table name, used to derive index names
pub(crate) const NAME_TOKEN: &str = ":DELAYED_JOBS_NAME";

pub struct DelayedWorkerMigration {
    name: &'static str,
    number: u32,
    postgres: &'static [&'static str],
    sqlite: &'static [&'static str],
    mysql: &'static [&'static str],
}

impl DelayedWorkerMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn migration_number(&self) -> u32 {
        self.number
    }

    pub fn statements(&self, dialect: Dialect) -> &'static [&'static str] {
        match dialect {
            Dialect::Postgres => self.postgres,
            Dialect::Sqlite => self.sqlite,
            Dialect::MySql | Dialect::MySqlLegacy => self.mysql,
        }
    }

    pub async fn execute(
        &self,
        tx: &mut Transaction<'_, Any>,
        dialect: Dialect,
        quoted_table: &str,
        index_prefix: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.statements(dialect) {
            let stmt = render(stmt, quoted_table, index_prefix);
            sqlx::raw_sql(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub(crate) fn render(stmt: &str, quoted_table: &str, index_prefix: &str) -> String {
    stmt.replace(TABLE_TOKEN, quoted_table)
        .replace(NAME_TOKEN, index_prefix)
}

pub const DELAYED_WORKER_MIGRATIONS: &[DelayedWorkerMigration] = &[
    m000001::M000001_MIGRATION,
    m000002::M000002_MIGRATION,
];
