pub mod sql;

use delayed_worker_dialect::{Dialect, DialectError};
use sql::DELAYED_WORKER_MIGRATIONS;
use sqlx::{query, query_scalar, AnyPool};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Invalid jobs table name: {0}")]
    InvalidTableName(#[from] DialectError),
    #[error("Database is at delayed_worker schema revision {latest_migration}, but this worker only knows revisions up to {highest_migration}")]
    UnknownRevision {
        latest_migration: i64,
        highest_migration: u32,
    },
    #[error("Error occured while migrate: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Name of the bookkeeping table recording applied migrations for `table_name`.
pub fn migrations_table_name(table_name: &str) -> String {
    format!("{table_name}_migrations")
}

fn index_prefix(table_name: &str) -> String {
    table_name.replace('.', "_")
}

/// Creates the migrations bookkeeping table if needed and returns the last
/// applied migration number.
async fn get_last_migration(
    pool: &AnyPool,
    quoted_migrations_table: &str,
) -> Result<Option<i64>, MigrateError> {
    let create_sql = format!(
        "create table if not exists {quoted_migrations_table} (id bigint primary key, ts bigint not null)"
    );
    sqlx::raw_sql(&create_sql).execute(pool).await?;

    let last_sql = format!("select max(id) from {quoted_migrations_table}");
    let last: Option<i64> = query_scalar(&last_sql).fetch_one(pool).await?;

    Ok(last)
}

/// Installs or upgrades the jobs table `table_name` for `dialect`.
///
/// Every migration runs in its own transaction and is recorded in
/// `<table_name>_migrations`, so calling this on an up to date database is a
/// no-op.
pub async fn migrate(pool: &AnyPool, dialect: Dialect, table_name: &str) -> Result<(), MigrateError> {
    let quoted_table = dialect.quote_identifier(table_name)?;
    let quoted_migrations_table = dialect.quote_identifier(&migrations_table_name(table_name))?;
    let index_prefix = index_prefix(table_name);

    let latest_migration = get_last_migration(pool, &quoted_migrations_table).await?;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in DELAYED_WORKER_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();
        highest_migration = highest_migration.max(migration_number);

        if latest_migration.is_some_and(|latest| i64::from(migration_number) <= latest) {
            continue;
        }

        migrated = true;
        info!(
            migration_number,
            migration_name = migration.name(),
            %dialect,
            table_name,
            "Running migration {}",
            migration.name(),
        );

        let mut tx = pool.begin().await?;
        migration
            .execute(&mut tx, dialect, &quoted_table, &index_prefix)
            .await?;

        let mut placeholders = dialect.placeholders();
        let sql = format!(
            "insert into {quoted_migrations_table} (id, ts) values ({}, {})",
            placeholders.next_placeholder(),
            placeholders.next_placeholder(),
        );
        query(&sql)
            .bind(i64::from(migration_number))
            .bind(now_millis())
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
    }

    if migrated {
        info!(table_name, "Migrations complete");
    }

    if let Some(latest_migration) = latest_migration {
        if latest_migration > i64::from(highest_migration) {
            warn!(
                latest_migration,
                highest_migration, "Jobs table was migrated by a newer delayed_worker version"
            );
            return Err(MigrateError::UnknownRevision {
                latest_migration,
                highest_migration,
            });
        }
    }

    Ok(())
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
