use delayed_worker_dialect::{Dialect, Placeholders};
use sqlx::any::AnyArguments;
use sqlx::error::BoxDynError;
use sqlx::{Any, Arguments, Encode, Type};

use crate::columns::SqlValue;

/// Collects bound values while the SQL text is assembled.
///
/// Every `bind` returns the placeholder to splice into the statement, so
/// placeholders and values can never drift apart, whatever the dialect's
/// placeholder style.
pub(crate) struct SqlArgs<'q> {
    placeholders: Placeholders,
    arguments: AnyArguments<'q>,
    error: Option<BoxDynError>,
}

impl<'q> SqlArgs<'q> {
    pub(crate) fn new(dialect: Dialect) -> Self {
        SqlArgs {
            placeholders: dialect.placeholders(),
            arguments: AnyArguments::default(),
            error: None,
        }
    }

    pub(crate) fn bind<T>(&mut self, value: T) -> String
    where
        T: 'q + Encode<'q, Any> + Type<Any>,
    {
        if let Err(e) = self.arguments.add(value) {
            self.error.get_or_insert(e);
        }
        self.placeholders.next_placeholder()
    }

    pub(crate) fn bind_value(&mut self, value: SqlValue) -> String {
        match value {
            SqlValue::Int(value) => self.bind(value),
            SqlValue::Text(value) => self.bind(value),
        }
    }

    /// Binds every value of `values`, returning `(p1, p2, ...)`.
    pub(crate) fn bind_list<T>(&mut self, values: impl IntoIterator<Item = T>) -> String
    where
        T: 'q + Encode<'q, Any> + Type<Any>,
    {
        let placeholders: Vec<String> = values.into_iter().map(|value| self.bind(value)).collect();
        format!("({})", placeholders.join(", "))
    }

    pub(crate) fn len(&self) -> usize {
        self.placeholders.issued()
    }

    pub(crate) fn finish(self) -> Result<AnyArguments<'q>, sqlx::Error> {
        match self.error {
            Some(e) => Err(sqlx::Error::Encode(e)),
            None => Ok(self.arguments),
        }
    }
}
