use delayed_worker_dialect::Dialect;
use sqlx::{query_with, AnyPool};

use crate::errors::{Result, SqlResultExt};

use super::args::SqlArgs;

/// Deletes job `id`. Deleting a missing job is not an error.
#[tracing::instrument(skip_all, err, fields(db.system = %dialect, job_id = id))]
pub(crate) async fn complete_job(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    id: i64,
) -> Result<()> {
    let mut args = SqlArgs::new(dialect);
    let sql = format!("delete from {table} where id = {}", args.bind(id));

    query_with(&sql, args.finish().in_dialect(dialect)?)
        .execute(pool)
        .await
        .in_dialect(dialect)?;

    Ok(())
}
