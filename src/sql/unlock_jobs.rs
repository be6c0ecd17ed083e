use delayed_worker_dialect::Dialect;
use indoc::formatdoc;
use sqlx::{query_with, AnyPool};

use crate::errors::{Result, SqlResultExt};

use super::args::SqlArgs;

/// Releases every lock held by `worker_name`, returning the number of rows.
#[tracing::instrument(skip_all, err, fields(db.system = %dialect, worker_name = %worker_name))]
pub(crate) async fn clear_locks(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    worker_name: &str,
    now: i64,
) -> Result<u64> {
    let mut args = SqlArgs::new(dialect);
    let updated_at = args.bind(now);
    let locked_by = args.bind(worker_name.to_string());
    let sql = formatdoc!(
        r#"
            update {table}
                set locked_at = null, locked_by = null, updated_at = {updated_at}
                where locked_by = {locked_by}
        "#
    );

    let result = query_with(&sql, args.finish().in_dialect(dialect)?)
        .execute(pool)
        .await
        .in_dialect(dialect)?;

    Ok(result.rows_affected())
}

/// Clears the failure and lock of job `id` and makes it due at `now`.
#[tracing::instrument(skip_all, err, fields(db.system = %dialect, job_id = id))]
pub(crate) async fn retry_job(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    id: i64,
    now: i64,
) -> Result<bool> {
    let mut args = SqlArgs::new(dialect);
    let run_at = args.bind(now);
    let updated_at = args.bind(now);
    let id = args.bind(id);
    let sql = formatdoc!(
        r#"
            update {table}
                set failed_at = null, locked_at = null, locked_by = null,
                    run_at = {run_at}, updated_at = {updated_at}
                where id = {id}
        "#
    );

    let result = query_with(&sql, args.finish().in_dialect(dialect)?)
        .execute(pool)
        .await
        .in_dialect(dialect)?;

    Ok(result.rows_affected() > 0)
}
