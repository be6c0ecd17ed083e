use delayed_worker_dialect::Dialect;
use indoc::formatdoc;
use sqlx::{query_scalar_with, query_with, AnyPool};

use crate::errors::{DelayedWorkerError, Result, SqlResultExt};
use crate::job::Job;
use crate::utils::to_millis;

use super::args::SqlArgs;

/// Persists `jobs` in one transaction, replacing rows that share their `handler_id`.
///
/// Returns the new ids in input order.
#[tracing::instrument(skip_all, err, fields(db.system = %dialect, jobs = jobs.len()))]
pub(crate) async fn add_jobs(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    jobs: &[Job],
    now: i64,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await.in_dialect(dialect)?;
    let mut ids = Vec::with_capacity(jobs.len());

    for job in jobs {
        let mut args = SqlArgs::new(dialect);
        let handler_id = args.bind(job.handler_id().clone());
        let sql = format!("delete from {table} where handler_id = {handler_id}");
        query_with(&sql, args.finish().in_dialect(dialect)?)
            .execute(tx.as_mut())
            .await
            .in_dialect(dialect)?;

        let mut args = SqlArgs::new(dialect);
        let values = [
            args.bind(*job.priority()),
            args.bind(*job.repeat_count()),
            args.bind(job.repeat_interval().clone()),
            args.bind(0_i64),
            args.bind(*job.max_attempts()),
            args.bind(job.queue().clone()),
            args.bind(job.handler().clone()),
            args.bind(job.handler_id().clone()),
            args.bind(job.run_at().map(to_millis)),
            args.bind(now),
            args.bind(now),
        ]
        .join(", ");
        let returning = if dialect.profile().supports_returning {
            "returning id"
        } else {
            ""
        };
        let sql = formatdoc!(
            r#"
                insert into {table} (
                    priority, repeat_count, repeat_interval, attempts, max_attempts,
                    queue, handler, handler_id, run_at, created_at, updated_at
                )
                values ({values})
                {returning}
            "#
        );
        let arguments = args.finish().in_dialect(dialect)?;

        let id = if dialect.profile().supports_returning {
            query_scalar_with(&sql, arguments)
                .fetch_one(tx.as_mut())
                .await
                .in_dialect(dialect)?
        } else {
            query_with(&sql, arguments)
                .execute(tx.as_mut())
                .await
                .in_dialect(dialect)?
                .last_insert_id()
                .ok_or_else(|| {
                    DelayedWorkerError::sql(
                        dialect,
                        sqlx::Error::Protocol(format!(
                            "no insert id reported for job '{}'",
                            job.handler_id()
                        )),
                    )
                })?
        };
        ids.push(id);
    }

    tx.commit().await.in_dialect(dialect)?;
    Ok(ids)
}
