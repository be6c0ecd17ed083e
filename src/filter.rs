use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use crate::columns::{ColumnKind, JobColumn, SqlValue};
use crate::errors::{DelayedWorkerError, Result};

/// Comparison operator of a `having` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// Aggregate of a `having` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `count(*)` or `count(column)`
    Count(Option<JobColumn>),
    Sum(JobColumn),
    Min(JobColumn),
    Max(JobColumn),
}

impl Display for Aggregate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregate::Count(None) => write!(f, "count(*)"),
            Aggregate::Count(Some(column)) => write!(f, "count({column})"),
            Aggregate::Sum(column) => write!(f, "sum({column})"),
            Aggregate::Min(column) => write!(f, "min({column})"),
            Aggregate::Max(column) => write!(f, "max({column})"),
        }
    }
}

/// A `having` condition: `<aggregate> <op> <integer>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Having {
    pub aggregate: Aggregate,
    pub op: CompareOp,
    pub value: i64,
}

impl Having {
    pub fn new(aggregate: Aggregate, op: CompareOp, value: i64) -> Self {
        Having {
            aggregate,
            op,
            value,
        }
    }

    /// Parses `count(*) > 1`, `max(attempts) >= 3`, ...
    pub fn parse(input: &str) -> Result<Having> {
        let malformed = || {
            DelayedWorkerError::InvalidFilter(format!(
                "having must look like 'count(*) > 1', got '{input}'"
            ))
        };
        let (function, rest) = input.trim().split_once('(').ok_or_else(malformed)?;
        let (argument, rest) = rest.split_once(')').ok_or_else(malformed)?;
        let argument = argument.trim();

        let column = || -> Result<JobColumn> {
            let column: JobColumn = argument
                .parse()
                .map_err(|e| DelayedWorkerError::InvalidFilter(format!("having: {e}")))?;
            if column.kind() == ColumnKind::Text {
                return Err(DelayedWorkerError::InvalidFilter(format!(
                    "having: cannot aggregate text column '{column}'"
                )));
            }
            Ok(column)
        };
        let aggregate = match function.trim().to_ascii_lowercase().as_str() {
            "count" if argument == "*" => Aggregate::Count(None),
            "count" => Aggregate::Count(Some(argument.parse().map_err(
                |e| DelayedWorkerError::InvalidFilter(format!("having: {e}")),
            )?)),
            "sum" => Aggregate::Sum(column()?),
            "min" => Aggregate::Min(column()?),
            "max" => Aggregate::Max(column()?),
            _ => return Err(malformed()),
        };

        let rest = rest.trim();
        let (op, value) = [
            (">=", CompareOp::GtEq),
            ("<=", CompareOp::LtEq),
            ("!=", CompareOp::NotEq),
            ("<>", CompareOp::NotEq),
            ("=", CompareOp::Eq),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
        ]
        .into_iter()
        .find_map(|(token, op)| rest.strip_prefix(token).map(|value| (op, value)))
        .ok_or_else(malformed)?;
        let value = value.trim().parse().map_err(|_| malformed())?;

        Ok(Having::new(aggregate, op, value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: JobColumn,
    pub descending: bool,
}

impl OrderBy {
    fn parse(input: &str) -> Result<OrderBy> {
        let mut parts = input.split_whitespace();
        let column = parts
            .next()
            .ok_or_else(|| DelayedWorkerError::InvalidFilter("order_by: empty column".into()))?;
        let column: JobColumn = column
            .parse()
            .map_err(|e| DelayedWorkerError::InvalidFilter(format!("order_by: {e}")))?;
        let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(DelayedWorkerError::InvalidFilter(format!(
                    "order_by: expected asc or desc, got '{other}'"
                )))
            }
        };
        if parts.next().is_some() {
            return Err(DelayedWorkerError::InvalidFilter(format!(
                "order_by: malformed term '{input}'"
            )));
        }
        Ok(OrderBy { column, descending })
    }
}

/// Ad hoc reporting filter for [`JobStore::count`](crate::JobStore::count)
/// and [`JobStore::find`](crate::JobStore::find).
///
/// Identifiers only come from [`JobColumn`]; every value is a bound parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub(crate) equals: Vec<(JobColumn, SqlValue)>,
    pub(crate) group_by: Vec<JobColumn>,
    pub(crate) having: Option<Having>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches rows where `column` equals `value`; a null value matches `IS NULL`.
    pub fn eq(mut self, column: JobColumn, value: impl Into<SqlValue>) -> Self {
        self.equals.push((column, value.into()));
        self
    }

    pub fn group_by(mut self, columns: impl IntoIterator<Item = JobColumn>) -> Self {
        self.group_by.extend(columns);
        self
    }

    pub fn having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    pub fn order_by(mut self, column: JobColumn, descending: bool) -> Self {
        self.order_by.push(OrderBy { column, descending });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Parses a filter from request parameters.
    ///
    /// `limit`, `offset`, `group_by`, `having` and `order_by` are options;
    /// every other key is a column equality. `group_by` and `order_by`
    /// accept a comma separated string or an array of strings.
    pub fn from_params(params: &Map<String, Value>) -> Result<JobFilter> {
        let mut filter = JobFilter::new();
        for (key, value) in params {
            match key.as_str() {
                "limit" => filter.limit = Some(positive_integer("limit", value, 1)?),
                "offset" => filter.offset = Some(positive_integer("offset", value, 0)?),
                "group_by" => {
                    filter.group_by = string_list("group_by", value)?
                        .iter()
                        .map(|name| {
                            name.parse().map_err(|e| {
                                DelayedWorkerError::InvalidFilter(format!("group_by: {e}"))
                            })
                        })
                        .collect::<Result<_>>()?;
                }
                "having" => match value {
                    Value::String(s) if !s.trim().is_empty() => {
                        filter.having = Some(Having::parse(s)?)
                    }
                    other => {
                        return Err(DelayedWorkerError::InvalidFilter(format!(
                            "having must be a non-empty string, got {other}"
                        )))
                    }
                },
                "order_by" => {
                    filter.order_by = string_list("order_by", value)?
                        .iter()
                        .map(|term| OrderBy::parse(term))
                        .collect::<Result<_>>()?;
                }
                name => {
                    let column: JobColumn = name
                        .parse()
                        .map_err(|e| DelayedWorkerError::InvalidFilter(format!("{e}")))?;
                    let value =
                        SqlValue::from_json(column, value).map_err(DelayedWorkerError::InvalidFilter)?;
                    filter.equals.push((column, value));
                }
            }
        }
        filter.validate()?;
        Ok(filter)
    }

    /// Checks the combination of options is expressible on every dialect.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(DelayedWorkerError::InvalidFilter(message));
        if let Some(limit) = self.limit {
            if limit <= 0 {
                return invalid(format!("limit must be a positive integer, got {limit}"));
            }
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return invalid(format!("offset must not be negative, got {offset}"));
            }
            if self.limit.is_none() {
                return invalid("offset requires a limit".to_string());
            }
        }
        for (column, value) in &self.equals {
            if !value.fits(*column) {
                return invalid(format!("value {value:?} does not fit column '{column}'"));
            }
        }
        if self.having.is_some() && !self.is_grouped() {
            return invalid("having requires group_by".to_string());
        }
        if self.is_grouped() {
            if let Some(order) = self
                .order_by
                .iter()
                .find(|order| !self.group_by.contains(&order.column))
            {
                return invalid(format!(
                    "order_by column '{}' must be one of the group_by columns",
                    order.column
                ));
            }
        }
        Ok(())
    }
}

fn positive_integer(option: &str, value: &Value, min: i64) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= min => Ok(n),
        _ if min > 0 => Err(DelayedWorkerError::InvalidFilter(format!(
            "{option} must be a positive integer, got {value}"
        ))),
        _ => Err(DelayedWorkerError::InvalidFilter(format!(
            "{option} must be a non-negative integer, got {value}"
        ))),
    }
}

fn string_list(option: &str, value: &Value) -> Result<Vec<String>> {
    let items: Vec<String> = match value {
        Value::String(s) => s.split(',').map(|item| item.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(DelayedWorkerError::InvalidFilter(format!(
                    "{option} entries must be strings, got {other}"
                ))),
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(DelayedWorkerError::InvalidFilter(format!(
                "{option} must be a string or an array of strings, got {other}"
            )))
        }
    };
    if items.is_empty() || items.iter().any(String::is_empty) {
        return Err(DelayedWorkerError::InvalidFilter(format!(
            "{option} contains an empty column"
        )));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<JobFilter> {
        JobFilter::from_params(value.as_object().expect("Params must be an object"))
    }

    fn invalid_message(value: Value) -> String {
        match parse(value) {
            Err(DelayedWorkerError::InvalidFilter(message)) => message,
            other => panic!("Expected an invalid filter, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_filter() {
        let filter = parse(json!({
            "queue": "mailers",
            "failed_at": null,
            "group_by": "queue, priority",
            "having": "count(*) >= 2",
            "order_by": ["priority desc"],
            "limit": "10",
            "offset": 5,
        }))
        .expect("Filter should parse");

        assert_eq!(
            filter.equals,
            vec![
                (JobColumn::FailedAt, SqlValue::Int(None)),
                (JobColumn::Queue, SqlValue::Text(Some("mailers".into()))),
            ]
        );
        assert_eq!(filter.group_by, vec![JobColumn::Queue, JobColumn::Priority]);
        assert_eq!(
            filter.having,
            Some(Having::new(Aggregate::Count(None), CompareOp::GtEq, 2))
        );
        assert_eq!(
            filter.order_by,
            vec![OrderBy {
                column: JobColumn::Priority,
                descending: true
            }]
        );
        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.offset, Some(5));
    }

    #[test]
    fn test_limit_must_be_positive_integer() {
        for limit in [json!(null), json!(""), json!(0), json!(-1), json!("abc"), json!(1.5)] {
            let message = invalid_message(json!({ "limit": limit }));
            assert!(message.starts_with("limit must be a positive integer"), "{message}");
        }
    }

    #[test]
    fn test_offset_rules() {
        assert!(invalid_message(json!({"limit": 1, "offset": -1})).starts_with("offset"));
        assert_eq!(invalid_message(json!({"offset": 1})), "offset requires a limit");
        assert!(parse(json!({"limit": 1, "offset": 0})).is_ok());
    }

    #[test]
    fn test_group_and_order_columns_are_validated() {
        assert!(invalid_message(json!({"group_by": ""})).contains("empty column"));
        assert!(invalid_message(json!({"group_by": []})).contains("empty column"));
        assert!(invalid_message(json!({"group_by": "queue, nope"})).contains("unknown column"));
        assert!(invalid_message(json!({"order_by": "priority sideways"})).contains("asc or desc"));
        assert!(invalid_message(json!({"group_by": "queue", "order_by": "priority"}))
            .contains("group_by columns"));
        assert!(invalid_message(json!({"handler_id); --": 1})).contains("unknown column"));
    }

    #[test]
    fn test_having_parsing() {
        assert_eq!(
            Having::parse("max(attempts) < 3").ok(),
            Some(Having::new(
                Aggregate::Max(JobColumn::Attempts),
                CompareOp::Lt,
                3
            ))
        );
        assert_eq!(
            Having::parse("COUNT(id) <> 0").ok(),
            Some(Having::new(
                Aggregate::Count(Some(JobColumn::Id)),
                CompareOp::NotEq,
                0
            ))
        );
        assert!(Having::parse("count(*)").is_err());
        assert!(Having::parse("count(*) > many").is_err());
        assert!(Having::parse("sum(queue) > 1").is_err());
        assert!(Having::parse("avg(priority) > 1").is_err());
        assert!(invalid_message(json!({"having": "count(*) > 1"})).contains("requires group_by"));
    }
}
