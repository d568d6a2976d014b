//! Thin sqlparser wrapper: dialect selection plus the single-SELECT parse
//! contract every caller relies on.

use qrx_common::{QrxError, Result, SqlDialect};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{Dialect, GenericDialect, HiveDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

fn dialect_impl(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::Generic => Box::new(GenericDialect {}),
        SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        SqlDialect::MySql => Box::new(MySqlDialect {}),
        SqlDialect::Hive => Box::new(HiveDialect {}),
    }
}

/// Parse SQL text into statements under the given dialect.
pub fn parse_sql(sql: &str, dialect: SqlDialect) -> Result<Vec<Statement>> {
    let dialect = dialect_impl(dialect);
    Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| QrxError::Parse(e.to_string()))
}

/// Parse exactly one `SELECT` statement.
///
/// Contract:
/// - exactly one statement must be present;
/// - the statement must be a plain `SELECT` (no set operations, no DML/DDL).
///
/// Error taxonomy:
/// - `Parse`: text is not a valid statement
/// - `Unsupported`: valid statement outside the routed subset
pub fn parse_single_select(sql: &str, dialect: SqlDialect) -> Result<Query> {
    let mut stmts = parse_sql(sql, dialect)?;
    if stmts.len() != 1 {
        return Err(QrxError::Unsupported(
            "only single-statement SQL is supported".to_string(),
        ));
    }
    match stmts.remove(0) {
        Statement::Query(q) => {
            if matches!(*q.body, SetExpr::Select(_)) {
                Ok(*q)
            } else {
                Err(QrxError::Unsupported(
                    "only plain SELECT is supported (no UNION/EXCEPT/INTERSECT)".to_string(),
                ))
            }
        }
        other => Err(QrxError::Unsupported(format!(
            "only SELECT statements are routed, got: {}",
            statement_kind(&other)
        ))),
    }
}

fn statement_kind(stmt: &Statement) -> &'static str {
    match stmt {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::Drop { .. } => "DROP",
        _ => "non-SELECT statement",
    }
}

#[cfg(test)]
mod tests {
    use qrx_common::{QrxError, SqlDialect};

    use super::parse_single_select;

    #[test]
    fn accepts_single_select() {
        let q = parse_single_select("SELECT a FROM t WHERE a > 1", SqlDialect::Generic)
            .expect("parse select");
        assert!(q.order_by.is_empty());
    }

    #[test]
    fn rejects_multiple_statements() {
        let err = parse_single_select("SELECT 1; SELECT 2", SqlDialect::Generic)
            .expect_err("two statements");
        assert!(matches!(err, QrxError::Unsupported(_)), "{err}");
    }

    #[test]
    fn rejects_non_select() {
        let err = parse_single_select("DELETE FROM t", SqlDialect::Generic).expect_err("delete");
        assert!(matches!(err, QrxError::Unsupported(_)), "{err}");
        let err = parse_single_select("SELECT 1 UNION SELECT 2", SqlDialect::Generic)
            .expect_err("union");
        assert!(matches!(err, QrxError::Unsupported(_)), "{err}");
    }

    #[test]
    fn surfaces_parse_errors() {
        let err = parse_single_select("SELEC a FROM t", SqlDialect::Generic).expect_err("typo");
        assert!(matches!(err, QrxError::Parse(_)), "{err}");
    }
}
