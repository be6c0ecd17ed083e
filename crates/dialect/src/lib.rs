use std::fmt::{Display, Formatter};
use std::str::FromStr;

use encoding_rs::Encoding;
use thiserror::Error;

/// The SQL engines a job store can sit on.
///
/// Everything that differs between engines (parameter style, whether a single
/// statement can claim and return a row, how to read the engine clock, how
/// driver errors are encoded) is resolved through [`Dialect::profile`] so the
/// store never branches on driver names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
    MySql,
    /// MySQL 5.x servers running a GBK national character set. Same SQL as
    /// [`Dialect::MySql`], but driver error messages need transcoding.
    MySqlLegacy,
}

/// How bound parameters are spelled in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, bound strictly in textual order
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

/// How a reservation hands one row to exactly one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStrategy {
    /// One `UPDATE ... WHERE id IN (SELECT ... LIMIT 1) RETURNING *` statement.
    AtomicClaim,
    /// Select candidates, then a conditional single-row update per candidate
    /// until one reports an affected row.
    SelectThenUpdate,
}

/// Capabilities of one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectProfile {
    pub placeholder_style: PlaceholderStyle,
    /// Supports `RETURNING` on `INSERT` / `UPDATE`
    pub supports_returning: bool,
    pub claim_strategy: ClaimStrategy,
    /// Appended to the candidate sub-select of an atomic claim
    pub row_lock_suffix: Option<&'static str>,
    /// Single-row, single-column query yielding the engine clock as BIGINT
    /// milliseconds since the Unix epoch
    pub now_millis_sql: &'static str,
    pub identifier_quote: char,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DialectError {
    #[error("Cannot infer a SQL dialect from database url '{0}'")]
    UnknownUrlScheme(String),
    #[error("Unknown dialect name '{0}'")]
    UnknownName(String),
    #[error("Invalid SQL identifier '{0}': expected [A-Za-z_][A-Za-z0-9_]*, optionally schema qualified")]
    InvalidIdentifier(String),
}

impl Dialect {
    pub fn profile(self) -> DialectProfile {
        match self {
            Dialect::Postgres => DialectProfile {
                placeholder_style: PlaceholderStyle::Dollar,
                supports_returning: true,
                claim_strategy: ClaimStrategy::AtomicClaim,
                row_lock_suffix: Some("for update skip locked"),
                now_millis_sql: "select cast(extract(epoch from now()) * 1000 as bigint)",
                identifier_quote: '"',
            },
            Dialect::Sqlite => DialectProfile {
                placeholder_style: PlaceholderStyle::Question,
                supports_returning: true,
                claim_strategy: ClaimStrategy::AtomicClaim,
                row_lock_suffix: None,
                now_millis_sql:
                    "select cast((julianday('now') - 2440587.5) * 86400000.0 as integer)",
                identifier_quote: '"',
            },
            Dialect::MySql | Dialect::MySqlLegacy => DialectProfile {
                placeholder_style: PlaceholderStyle::Question,
                supports_returning: false,
                claim_strategy: ClaimStrategy::SelectThenUpdate,
                row_lock_suffix: None,
                now_millis_sql: "select cast(unix_timestamp(now(3)) * 1000 as signed)",
                identifier_quote: '`',
            },
        }
    }

    /// Infers the dialect from a connection url scheme.
    ///
    /// The legacy MySQL dialect shares its scheme with [`Dialect::MySql`] and
    /// must be selected explicitly.
    pub fn from_url(url: &str) -> Result<Dialect, DialectError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            _ => Err(DialectError::UnknownUrlScheme(url.to_string())),
        }
    }

    /// Encoding the driver uses for error messages, when it is not UTF-8.
    pub fn error_encoding(self) -> Option<&'static Encoding> {
        match self {
            Dialect::MySqlLegacy => Some(encoding_rs::GBK),
            _ => None,
        }
    }

    pub fn placeholders(self) -> Placeholders {
        Placeholders {
            style: self.profile().placeholder_style,
            issued: 0,
        }
    }

    /// Quotes a table name, accepting an optional `schema.` prefix.
    pub fn quote_identifier(self, identifier: &str) -> Result<String, DialectError> {
        let quote = self.profile().identifier_quote;
        let parts: Vec<&str> = identifier.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|part| is_plain_identifier(part)) {
            return Err(DialectError::InvalidIdentifier(identifier.to_string()));
        }

        Ok(parts
            .iter()
            .map(|part| format!("{quote}{part}{quote}"))
            .collect::<Vec<_>>()
            .join("."))
    }

    /// Repairs a driver error message for dialects with a legacy encoding.
    ///
    /// Drivers that do not know the server charset hand the raw bytes over as
    /// Latin-1 code points. When every char of the message fits in one byte and
    /// those bytes decode cleanly in the dialect encoding, the decoded text is
    /// returned. Anything else is already proper Unicode and passes through.
    pub fn transcode_error_message(self, message: &str) -> String {
        let Some(encoding) = self.error_encoding() else {
            return message.to_string();
        };
        if message.is_ascii() {
            return message.to_string();
        }

        let raw: Option<Vec<u8>> = message
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect();
        let Some(raw) = raw else {
            return message.to_string();
        };

        let (decoded, had_errors) = encoding.decode_without_bom_handling(&raw);
        if had_errors {
            message.to_string()
        } else {
            decoded.into_owned()
        }
    }
}

fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
            Dialect::MySqlLegacy => "mysql_legacy",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Dialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::MySql),
            "mysql_legacy" => Ok(Dialect::MySqlLegacy),
            _ => Err(DialectError::UnknownName(s.to_string())),
        }
    }
}

/// Hands out placeholders in textual order.
#[derive(Debug, Clone)]
pub struct Placeholders {
    style: PlaceholderStyle,
    issued: usize,
}

impl Placeholders {
    pub fn next_placeholder(&mut self) -> String {
        self.issued += 1;
        match self.style {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${}", self.issued),
        }
    }

    /// Number of placeholders issued so far
    pub fn issued(&self) -> usize {
        self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_follow_dialect_style() {
        let mut pg = Dialect::Postgres.placeholders();
        assert_eq!(pg.next_placeholder(), "$1");
        assert_eq!(pg.next_placeholder(), "$2");
        assert_eq!(pg.issued(), 2);

        let mut mysql = Dialect::MySql.placeholders();
        assert_eq!(mysql.next_placeholder(), "?");
        assert_eq!(mysql.next_placeholder(), "?");
        assert_eq!(mysql.issued(), 2);
    }

    #[test]
    fn test_claim_capabilities() {
        assert_eq!(
            Dialect::Postgres.profile().claim_strategy,
            ClaimStrategy::AtomicClaim
        );
        assert_eq!(
            Dialect::Sqlite.profile().claim_strategy,
            ClaimStrategy::AtomicClaim
        );
        assert_eq!(
            Dialect::MySql.profile().claim_strategy,
            ClaimStrategy::SelectThenUpdate
        );
        assert!(!Dialect::MySqlLegacy.profile().supports_returning);
        assert!(Dialect::Postgres.profile().row_lock_suffix.is_some());
    }

    #[test]
    fn test_from_url() {
        assert_eq!(
            Dialect::from_url("postgres://localhost/db"),
            Ok(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_url("postgresql://localhost/db"),
            Ok(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_url("sqlite:///tmp/jobs.db"),
            Ok(Dialect::Sqlite)
        );
        assert_eq!(Dialect::from_url("mysql://root@db/jobs"), Ok(Dialect::MySql));
        assert!(matches!(
            Dialect::from_url("oracle://scott@db"),
            Err(DialectError::UnknownUrlScheme(_))
        ));
    }

    #[test]
    fn test_name_round_trip() {
        for dialect in [
            Dialect::Postgres,
            Dialect::Sqlite,
            Dialect::MySql,
            Dialect::MySqlLegacy,
        ] {
            assert_eq!(dialect.to_string().parse::<Dialect>(), Ok(dialect));
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(
            Dialect::Postgres.quote_identifier("delayed_jobs"),
            Ok("\"delayed_jobs\"".to_string())
        );
        assert_eq!(
            Dialect::Postgres.quote_identifier("app.delayed_jobs"),
            Ok("\"app\".\"delayed_jobs\"".to_string())
        );
        assert_eq!(
            Dialect::MySql.quote_identifier("delayed_jobs"),
            Ok("`delayed_jobs`".to_string())
        );
        assert!(Dialect::Sqlite.quote_identifier("jobs; drop table x").is_err());
        assert!(Dialect::Sqlite.quote_identifier("1jobs").is_err());
        assert!(Dialect::Sqlite.quote_identifier("a.b.c").is_err());
        assert!(Dialect::Sqlite.quote_identifier("").is_err());
    }

    #[test]
    fn test_legacy_error_message_is_transcoded() {
        // "中文" in GBK is D6 D0 CE C4, surfaced by the driver as Latin-1
        let mojibake = "Unknown column '\u{d6}\u{d0}\u{ce}\u{c4}'";
        assert_eq!(
            Dialect::MySqlLegacy.transcode_error_message(mojibake),
            "Unknown column '中文'"
        );
    }

    #[test]
    fn test_non_legacy_or_unicode_messages_pass_through() {
        let mojibake = "\u{d6}\u{d0}\u{ce}\u{c4}";
        assert_eq!(Dialect::MySql.transcode_error_message(mojibake), mojibake);
        assert_eq!(
            Dialect::MySqlLegacy.transcode_error_message("table is locked"),
            "table is locked"
        );
        assert_eq!(
            Dialect::MySqlLegacy.transcode_error_message("表已锁定"),
            "表已锁定"
        );
    }
}
