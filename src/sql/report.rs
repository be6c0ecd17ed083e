use delayed_worker_dialect::Dialect;
use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::{query_as_with, query_scalar_with, query_with, AnyPool, Row};

use crate::columns::{ColumnKind, JobColumn, SqlValue};
use crate::errors::{DelayedWorkerError, Result, SqlResultExt};
use crate::filter::JobFilter;
use crate::job::DbJob;

use super::args::SqlArgs;

/// Alias of the group size column of grouped `find` results.
pub(crate) const COUNT_COLUMN: &str = "count";

fn where_clause(args: &mut SqlArgs<'_>, filter: &JobFilter) -> String {
    let conditions: Vec<String> = filter
        .equals
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{column} is null")
            } else {
                format!("{column} = {}", args.bind_value(value.clone()))
            }
        })
        .collect();

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" where {}", conditions.join(" and "))
    }
}

fn group_clause(args: &mut SqlArgs<'_>, filter: &JobFilter) -> String {
    if !filter.is_grouped() {
        return String::new();
    }
    let columns = join_columns(&filter.group_by);
    let mut clause = format!(" group by {columns}");
    if let Some(having) = &filter.having {
        let value = args.bind(having.value);
        clause.push_str(&format!(
            " having {} {} {value}",
            having.aggregate,
            having.op.as_sql()
        ));
    }
    clause
}

fn order_clause(filter: &JobFilter) -> String {
    if filter.order_by.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filter
        .order_by
        .iter()
        .map(|order| {
            let direction = if order.descending { "desc" } else { "asc" };
            format!("{} {direction}", order.column)
        })
        .collect();
    format!(" order by {}", terms.join(", "))
}

fn page_clause(args: &mut SqlArgs<'_>, filter: &JobFilter) -> String {
    let mut clause = String::new();
    if let Some(limit) = filter.limit {
        clause.push_str(&format!(" limit {}", args.bind(limit)));
    }
    if let Some(offset) = filter.offset {
        clause.push_str(&format!(" offset {}", args.bind(offset)));
    }
    clause
}

fn join_columns(columns: &[JobColumn]) -> String {
    columns
        .iter()
        .map(|column| column.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the `select` of `find`, binding into `args` in textual order.
pub(crate) fn find_sql(args: &mut SqlArgs<'_>, table: &str, filter: &JobFilter) -> String {
    let projection = if filter.is_grouped() {
        format!("{}, count(*) as {COUNT_COLUMN}", join_columns(&filter.group_by))
    } else {
        "*".to_string()
    };
    let where_clause = where_clause(args, filter);
    let group_clause = group_clause(args, filter);
    let order_clause = order_clause(filter);
    let page_clause = page_clause(args, filter);
    format!("select {projection} from {table}{where_clause}{group_clause}{order_clause}{page_clause}")
}

/// Builds the `select count(*)` of `count`: rows, or groups when grouped.
pub(crate) fn count_sql(args: &mut SqlArgs<'_>, table: &str, filter: &JobFilter) -> String {
    if !filter.is_grouped() && filter.limit.is_none() {
        let where_clause = where_clause(args, filter);
        return format!("select count(*) from {table}{where_clause}");
    }

    let projection = if filter.is_grouped() {
        join_columns(&filter.group_by)
    } else {
        "id".to_string()
    };
    let where_clause = where_clause(args, filter);
    let group_clause = group_clause(args, filter);
    let order_clause = order_clause(filter);
    let page_clause = page_clause(args, filter);
    format!(
        "select count(*) from (select {projection} from {table}{where_clause}{group_clause}{order_clause}{page_clause}) as matched"
    )
}

fn read_column(row: &AnyRow, column: JobColumn) -> std::result::Result<Value, sqlx::Error> {
    let value = match column.kind() {
        ColumnKind::Integer | ColumnKind::Timestamp => {
            SqlValue::Int(row.try_get::<Option<i64>, _>(column.as_str())?)
        }
        ColumnKind::Text => SqlValue::Text(row.try_get::<Option<String>, _>(column.as_str())?),
    };
    Ok(value.into_json(column))
}

fn row_to_object(
    row: &AnyRow,
    columns: &[JobColumn],
    with_count: bool,
) -> std::result::Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::new();
    for column in columns {
        object.insert(column.as_str().to_string(), read_column(row, *column)?);
    }
    if with_count {
        let count: i64 = row.try_get(COUNT_COLUMN)?;
        object.insert(COUNT_COLUMN.to_string(), Value::from(count));
    }
    Ok(object)
}

#[tracing::instrument(skip_all, err, fields(db.system = %dialect))]
pub(crate) async fn count_jobs(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    filter: &JobFilter,
) -> Result<i64> {
    filter.validate()?;
    let mut args = SqlArgs::new(dialect);
    let sql = count_sql(&mut args, table, filter);
    let count: i64 = query_scalar_with(&sql, args.finish().in_dialect(dialect)?)
        .fetch_one(pool)
        .await
        .in_dialect(dialect)?;
    Ok(count)
}

#[tracing::instrument(skip_all, err, fields(db.system = %dialect))]
pub(crate) async fn find_rows(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    filter: &JobFilter,
) -> Result<Vec<Map<String, Value>>> {
    filter.validate()?;
    let mut args = SqlArgs::new(dialect);
    let sql = find_sql(&mut args, table, filter);
    let rows = query_with(&sql, args.finish().in_dialect(dialect)?)
        .fetch_all(pool)
        .await
        .in_dialect(dialect)?;

    let (columns, with_count) = if filter.is_grouped() {
        (filter.group_by.as_slice(), true)
    } else {
        (JobColumn::ALL.as_slice(), false)
    };
    rows.iter()
        .map(|row| row_to_object(row, columns, with_count).in_dialect(dialect))
        .collect()
}

#[tracing::instrument(skip_all, err, fields(db.system = %dialect))]
pub(crate) async fn find_db_jobs(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
    filter: &JobFilter,
) -> Result<Vec<DbJob>> {
    if filter.is_grouped() {
        return Err(DelayedWorkerError::InvalidFilter(
            "grouped filters return groups, not jobs".to_string(),
        ));
    }
    filter.validate()?;
    let mut args = SqlArgs::new(dialect);
    let sql = find_sql(&mut args, table, filter);
    let jobs: Vec<DbJob> = query_as_with(&sql, args.finish().in_dialect(dialect)?)
        .fetch_all(pool)
        .await
        .in_dialect(dialect)?;
    Ok(jobs)
}
