use crate::store::{ReserveRequest, UNBOUNDED_PRIORITY};

use super::args::SqlArgs;

/// Rank order of reservations.
pub(crate) const RESERVE_ORDER: &str = "order by priority asc, run_at asc";

/// `where` body selecting the rows `request` may reserve at `now`.
///
/// A row is eligible when it is not failed, is due, and is either unlocked,
/// locked before `stale_before`, or already locked by the requesting worker.
pub(crate) fn eligibility_clause(
    args: &mut SqlArgs<'_>,
    now: i64,
    stale_before: i64,
    request: &ReserveRequest,
) -> String {
    let now = args.bind(now);
    let stale_before = args.bind(stale_before);
    let worker_name = args.bind(request.worker_name().clone());

    let mut clause = format!(
        "failed_at is null \
            and (run_at is null or run_at <= {now}) \
            and (locked_at is null or locked_at < {stale_before} or locked_by = {worker_name})"
    );
    if *request.get_min_priority() != UNBOUNDED_PRIORITY {
        let min_priority = args.bind(*request.get_min_priority());
        clause.push_str(&format!(" and priority >= {min_priority}"));
    }
    if *request.get_max_priority() != UNBOUNDED_PRIORITY {
        let max_priority = args.bind(*request.get_max_priority());
        clause.push_str(&format!(" and priority <= {max_priority}"));
    }
    if !request.get_queues().is_empty() {
        let queues = args.bind_list(request.get_queues().iter().cloned());
        clause.push_str(&format!(" and queue in {queues}"));
    }
    clause
}
