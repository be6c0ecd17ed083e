use delayed_worker_dialect::Dialect;
use indoc::formatdoc;
use sqlx::{query_with, AnyPool};
use tracing::debug;

use crate::errors::{Result, SqlResultExt};
use crate::job_update::JobUpdate;

use super::args::SqlArgs;

/// Applies `update` to job `id` and stamps `updated_at`.
///
/// Returns whether a row was found.
#[tracing::instrument(skip_all, err, fields(db.system = %dialect, job_id = id))]
pub(crate) async fn update_job(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    id: i64,
    update: &JobUpdate,
    now: i64,
) -> Result<bool> {
    update.validate()?;

    let mut args = SqlArgs::new(dialect);
    let mut assignments: Vec<String> = update
        .assignments()
        .iter()
        .map(|(column, value)| format!("{column} = {}", args.bind_value(value.clone())))
        .collect();
    assignments.push(format!("updated_at = {}", args.bind(now)));
    let assignments = assignments.join(", ");
    let id_placeholder = args.bind(id);

    let sql = formatdoc!(
        r#"
            update {table}
                set {assignments}
                where id = {id_placeholder}
        "#
    );

    let result = query_with(&sql, args.finish().in_dialect(dialect)?)
        .execute(pool)
        .await
        .in_dialect(dialect)?;

    let found = result.rows_affected() > 0;
    if !found {
        debug!(job_id = id, "No job to update");
    }
    Ok(found)
}
