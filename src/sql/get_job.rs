use delayed_worker_dialect::{ClaimStrategy, Dialect};
use indoc::formatdoc;
use sqlx::{query_as_with, query_with, AnyPool};
use tracing::{debug, trace};

use crate::errors::{Result, SqlResultExt};
use crate::job::DbJob;
use crate::store::ReserveRequest;

use super::args::SqlArgs;
use super::job_query_helpers::{eligibility_clause, RESERVE_ORDER};

/// Candidates examined per reservation by the select-then-update protocol.
pub(crate) const FALLBACK_CANDIDATES: i64 = 10;

/// Locks the first eligible job for `request.worker_name`.
///
/// `now` and the staleness cutoff derived from it are shared by every
/// statement of the attempt.
pub(crate) async fn get_job(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    strategy: ClaimStrategy,
    request: &ReserveRequest,
    now: i64,
) -> Result<Option<DbJob>> {
    let stale_before = now.saturating_sub(crate::utils::duration_millis(*request.get_max_run_time()));
    match strategy {
        ClaimStrategy::AtomicClaim => {
            claim_atomically(pool, dialect, table, request, now, stale_before).await
        }
        ClaimStrategy::SelectThenUpdate => {
            claim_with_fallback(pool, dialect, table, request, now, stale_before).await
        }
    }
}

async fn claim_atomically(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    request: &ReserveRequest,
    now: i64,
    stale_before: i64,
) -> Result<Option<DbJob>> {
    let mut args = SqlArgs::new(dialect);
    let locked_at = args.bind(now);
    let locked_by = args.bind(request.worker_name().clone());
    let eligible = eligibility_clause(&mut args, now, stale_before, request);
    let row_lock = dialect.profile().row_lock_suffix.unwrap_or_default();

    let sql = formatdoc!(
        r#"
            update {table}
                set locked_at = {locked_at}, locked_by = {locked_by}
                where id in (
                    select id
                        from {table}
                        where {eligible}
                        {RESERVE_ORDER}
                        limit 1
                        {row_lock}
                )
                returning *
        "#
    );

    let job: Option<DbJob> = query_as_with(&sql, args.finish().in_dialect(dialect)?)
        .fetch_optional(pool)
        .await
        .in_dialect(dialect)?;
    Ok(job)
}

async fn claim_with_fallback(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    request: &ReserveRequest,
    now: i64,
    stale_before: i64,
) -> Result<Option<DbJob>> {
    let mut args = SqlArgs::new(dialect);
    let eligible = eligibility_clause(&mut args, now, stale_before, request);
    let limit = args.bind(FALLBACK_CANDIDATES);
    let sql = formatdoc!(
        r#"
            select *
                from {table}
                where {eligible}
                {RESERVE_ORDER}
                limit {limit}
        "#
    );
    let candidates: Vec<DbJob> = query_as_with(&sql, args.finish().in_dialect(dialect)?)
        .fetch_all(pool)
        .await
        .in_dialect(dialect)?;

    for mut candidate in candidates {
        let mut args = SqlArgs::new(dialect);
        let locked_at = args.bind(now);
        let locked_by = args.bind(request.worker_name().clone());
        let id = args.bind(candidate.id);
        // The eligibility predicate is re-checked so a job claimed by someone
        // else since the select is left alone
        let eligible = eligibility_clause(&mut args, now, stale_before, request);
        let sql = formatdoc!(
            r#"
                update {table}
                    set locked_at = {locked_at}, locked_by = {locked_by}
                    where id = {id} and {eligible}
            "#
        );

        let result = query_with(&sql, args.finish().in_dialect(dialect)?)
            .execute(pool)
            .await
            .in_dialect(dialect)?;

        if result.rows_affected() == 1 {
            candidate.locked_at = Some(now);
            candidate.locked_by = Some(request.worker_name().clone());
            return Ok(Some(candidate));
        }
        debug!(
            job_id = candidate.id,
            worker_name = %request.worker_name(),
            "Job was claimed by another worker, trying next candidate"
        );
    }

    trace!(worker_name = %request.worker_name(), "No candidate could be claimed");
    Ok(None)
}
