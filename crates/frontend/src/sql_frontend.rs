//! Lowering from the sqlparser AST into the closed [`QueryAst`].
//!
//! Anything outside the routed subset fails with `Unsupported` here, before
//! any pipeline stage runs. `BETWEEN` is rewritten into its comparison form
//! during lowering so downstream passes see one shape per meaning.

use qrx_common::{Literal, QrxError, Result};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, DataType as SqlDataType, Distinct, Expr as SqlExpr,
    FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, JoinOperator, ObjectName,
    Query, SelectItem as SqlSelectItem, SetExpr, TableFactor, UnaryOperator, Value, WindowType,
};

use crate::ast::{
    ArithOp, ColumnRef, CompareOp, JoinClause, JoinType, OrderKey, QueryAst, ScalarExpr,
    SelectItem, TableRef,
};

/// Convert one parsed `SELECT` query into a [`QueryAst`].
pub fn lower_query(q: &Query) -> Result<QueryAst> {
    if q.with.is_some() {
        return Err(QrxError::Unsupported(
            "WITH/CTE is not supported".to_string(),
        ));
    }
    if q.offset.is_some() || q.fetch.is_some() {
        return Err(QrxError::Unsupported(
            "OFFSET/FETCH is not supported; use LIMIT".to_string(),
        ));
    }

    let select = match &*q.body {
        SetExpr::Select(s) => s.as_ref(),
        _ => {
            return Err(QrxError::Unsupported(
                "only plain SELECT is supported (no UNION/EXCEPT/INTERSECT)".to_string(),
            ));
        }
    };

    if !select.named_window.is_empty() {
        return Err(QrxError::Unsupported(
            "named WINDOW definitions are not supported".to_string(),
        ));
    }

    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => {
            return Err(QrxError::Unsupported(
                "DISTINCT ON is not supported".to_string(),
            ));
        }
    };

    // FROM + JOINs
    if select.from.len() != 1 {
        return Err(QrxError::Unsupported(
            "exactly one FROM source is supported (use explicit JOIN)".to_string(),
        ));
    }
    let twj = &select.from[0];
    let from = table_factor_to_ref(&twj.relation)?;
    let mut joins = Vec::with_capacity(twj.joins.len());
    for j in &twj.joins {
        let relation = table_factor_to_ref(&j.relation)?;
        let (constraint, join_type) = match &j.join_operator {
            JoinOperator::Inner(c) => (c, JoinType::Inner),
            JoinOperator::LeftOuter(c) => (c, JoinType::Left),
            JoinOperator::RightOuter(c) => (c, JoinType::Right),
            JoinOperator::FullOuter(c) => (c, JoinType::Full),
            _ => {
                return Err(QrxError::Unsupported(
                    "only INNER/LEFT/RIGHT/FULL OUTER JOIN are supported".to_string(),
                ));
            }
        };
        let on = match constraint {
            sqlparser::ast::JoinConstraint::On(e) => lower_expr(e)?,
            _ => {
                return Err(QrxError::Unsupported(
                    "JOIN requires an explicit ON condition".to_string(),
                ));
            }
        };
        joins.push(JoinClause {
            relation,
            join_type,
            on,
        });
    }

    // SELECT list
    let mut projection = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SqlSelectItem::UnnamedExpr(e) => projection.push(SelectItem {
                expr: lower_expr(e)?,
                alias: None,
            }),
            SqlSelectItem::ExprWithAlias { expr, alias } => projection.push(SelectItem {
                expr: lower_expr(expr)?,
                alias: Some(norm_ident(alias)),
            }),
            SqlSelectItem::Wildcard(_) => projection.push(SelectItem {
                expr: ScalarExpr::Wildcard,
                alias: None,
            }),
            SqlSelectItem::QualifiedWildcard(_, _) => {
                return Err(QrxError::Unsupported(
                    "qualified wildcard projection is not supported".to_string(),
                ));
            }
        }
    }

    let filter = select.selection.as_ref().map(lower_expr).transpose()?;

    let group_by = match &select.group_by {
        GroupByExpr::Expressions(es) => {
            es.iter().map(lower_expr).collect::<Result<Vec<_>>>()?
        }
        GroupByExpr::All => {
            return Err(QrxError::Unsupported(
                "GROUP BY ALL is not supported".to_string(),
            ));
        }
    };

    let having = select.having.as_ref().map(lower_expr).transpose()?;

    let mut order_by = Vec::new();
    for item in &q.order_by {
        if item.nulls_first.is_some() {
            return Err(QrxError::Unsupported(
                "NULLS FIRST/LAST is not supported".to_string(),
            ));
        }
        order_by.push(OrderKey {
            expr: lower_expr(&item.expr)?,
            asc: item.asc.unwrap_or(true),
        });
    }

    let limit = match &q.limit {
        None => None,
        Some(SqlExpr::Value(Value::Number(n, _))) => Some(n.parse::<u64>().map_err(|_| {
            QrxError::Unsupported(format!("LIMIT must be a non-negative integer, got {n}"))
        })?),
        Some(other) => {
            return Err(QrxError::Unsupported(format!(
                "LIMIT must be a constant, got {other}"
            )));
        }
    };

    Ok(QueryAst {
        projection,
        distinct,
        from,
        joins,
        filter,
        group_by,
        having,
        order_by,
        limit,
    })
}

fn table_factor_to_ref(tf: &TableFactor) -> Result<TableRef> {
    match tf {
        TableFactor::Table { name, alias, .. } => Ok(TableRef::new(
            object_name_to_string(name),
            alias.as_ref().map(|a| norm_ident(&a.name)),
        )),
        _ => Err(QrxError::Unsupported(
            "only simple table names in FROM are supported".to_string(),
        )),
    }
}

/// Lower one sqlparser expression into a [`ScalarExpr`].
pub fn lower_expr(e: &SqlExpr) -> Result<ScalarExpr> {
    match e {
        SqlExpr::Identifier(id) => Ok(ScalarExpr::Column(ColumnRef::bare(norm_ident(id)))),
        SqlExpr::CompoundIdentifier(ids) => {
            if ids.len() != 2 {
                return Err(QrxError::Unsupported(format!(
                    "only table.column references are supported, got {e}"
                )));
            }
            Ok(ScalarExpr::Column(ColumnRef::qualified(
                norm_ident(&ids[0]),
                norm_ident(&ids[1]),
            )))
        }
        SqlExpr::Value(v) => lower_value(v),
        SqlExpr::TypedString { data_type, value } => lower_typed_string(data_type, value),
        SqlExpr::Nested(inner) => lower_expr(inner),
        SqlExpr::IsNull(inner) => Ok(ScalarExpr::IsNull(Box::new(lower_expr(inner)?))),
        SqlExpr::IsNotNull(inner) => Ok(ScalarExpr::IsNotNull(Box::new(lower_expr(inner)?))),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(ScalarExpr::InList {
            expr: Box::new(lower_expr(expr)?),
            list: list.iter().map(lower_expr).collect::<Result<Vec<_>>>()?,
            negated: *negated,
        }),
        SqlExpr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let probe = lower_expr(expr)?;
            let low = lower_expr(low)?;
            let high = lower_expr(high)?;
            let ge = ScalarExpr::Compare {
                left: Box::new(probe.clone()),
                op: CompareOp::GtEq,
                right: Box::new(low.clone()),
            };
            let le = ScalarExpr::Compare {
                left: Box::new(probe.clone()),
                op: CompareOp::LtEq,
                right: Box::new(high.clone()),
            };
            if *negated {
                // NOT BETWEEN => below the interval or above it.
                Ok(ScalarExpr::Or(
                    Box::new(ScalarExpr::Compare {
                        left: Box::new(probe.clone()),
                        op: CompareOp::Lt,
                        right: Box::new(low),
                    }),
                    Box::new(ScalarExpr::Compare {
                        left: Box::new(probe),
                        op: CompareOp::Gt,
                        right: Box::new(high),
                    }),
                ))
            } else {
                Ok(ScalarExpr::And(Box::new(ge), Box::new(le)))
            }
        }
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => Ok(ScalarExpr::Not(Box::new(lower_expr(expr)?))),
            UnaryOperator::Minus => match lower_expr(expr)? {
                ScalarExpr::Literal(Literal::Int64(v)) => {
                    Ok(ScalarExpr::Literal(Literal::Int64(-v)))
                }
                ScalarExpr::Literal(Literal::Float64(v)) => {
                    Ok(ScalarExpr::Literal(Literal::Float64(-v)))
                }
                _ => Err(QrxError::Unsupported(
                    "unary minus is only supported on numeric literals".to_string(),
                )),
            },
            UnaryOperator::Plus => lower_expr(expr),
            _ => Err(QrxError::Unsupported(format!(
                "unsupported unary operator: {op}"
            ))),
        },
        SqlExpr::BinaryOp { left, op, right } => {
            let l = lower_expr(left)?;
            let r = lower_expr(right)?;
            match op {
                SqlBinaryOp::And => Ok(ScalarExpr::And(Box::new(l), Box::new(r))),
                SqlBinaryOp::Or => Ok(ScalarExpr::Or(Box::new(l), Box::new(r))),
                SqlBinaryOp::Eq => compare(l, CompareOp::Eq, r),
                SqlBinaryOp::NotEq => compare(l, CompareOp::NotEq, r),
                SqlBinaryOp::Lt => compare(l, CompareOp::Lt, r),
                SqlBinaryOp::LtEq => compare(l, CompareOp::LtEq, r),
                SqlBinaryOp::Gt => compare(l, CompareOp::Gt, r),
                SqlBinaryOp::GtEq => compare(l, CompareOp::GtEq, r),
                SqlBinaryOp::Plus => arith(l, ArithOp::Plus, r),
                SqlBinaryOp::Minus => arith(l, ArithOp::Minus, r),
                SqlBinaryOp::Multiply => arith(l, ArithOp::Multiply, r),
                SqlBinaryOp::Divide => arith(l, ArithOp::Divide, r),
                other => Err(QrxError::Unsupported(format!(
                    "unsupported binary operator: {other}"
                ))),
            }
        }
        SqlExpr::Function(f) => lower_function(f),
        SqlExpr::Subquery(_) | SqlExpr::Exists { .. } | SqlExpr::InSubquery { .. } => Err(
            QrxError::Unsupported("subqueries are not supported".to_string()),
        ),
        other => Err(QrxError::Unsupported(format!(
            "unsupported expression: {other}"
        ))),
    }
}

fn compare(l: ScalarExpr, op: CompareOp, r: ScalarExpr) -> Result<ScalarExpr> {
    Ok(ScalarExpr::Compare {
        left: Box::new(l),
        op,
        right: Box::new(r),
    })
}

fn arith(l: ScalarExpr, op: ArithOp, r: ScalarExpr) -> Result<ScalarExpr> {
    Ok(ScalarExpr::Arith {
        left: Box::new(l),
        op,
        right: Box::new(r),
    })
}

fn lower_value(v: &Value) -> Result<ScalarExpr> {
    match v {
        Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(ScalarExpr::Literal(Literal::Int64(i)))
            } else {
                n.parse::<f64>()
                    .map(|f| ScalarExpr::Literal(Literal::Float64(f)))
                    .map_err(|_| QrxError::Parse(format!("invalid numeric literal: {n}")))
            }
        }
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            Ok(ScalarExpr::Literal(Literal::Utf8(s.clone())))
        }
        Value::Boolean(b) => Ok(ScalarExpr::Literal(Literal::Boolean(*b))),
        Value::Null => Err(QrxError::Unsupported(
            "NULL literals are not supported; use IS NULL / IS NOT NULL".to_string(),
        )),
        other => Err(QrxError::Unsupported(format!(
            "unsupported literal: {other}"
        ))),
    }
}

fn lower_typed_string(data_type: &SqlDataType, value: &str) -> Result<ScalarExpr> {
    match data_type {
        SqlDataType::Date => qrx_common::parse_date(value)
            .map(|d| ScalarExpr::Literal(Literal::Date32(d)))
            .ok_or_else(|| QrxError::Parse(format!("invalid DATE literal: '{value}'"))),
        SqlDataType::Timestamp(_, _) => {
            if let Ok(ns) = value.parse::<i64>() {
                return Ok(ScalarExpr::Literal(Literal::TimestampNanos(ns)));
            }
            qrx_common::parse_date(value)
                .map(|d| {
                    ScalarExpr::Literal(Literal::TimestampNanos(
                        i64::from(d) * 86_400_000_000_000,
                    ))
                })
                .ok_or_else(|| QrxError::Parse(format!("invalid TIMESTAMP literal: '{value}'")))
        }
        other => Err(QrxError::Unsupported(format!(
            "unsupported typed literal: {other} '{value}'"
        ))),
    }
}

fn lower_function(f: &sqlparser::ast::Function) -> Result<ScalarExpr> {
    let name = object_name_to_string(&f.name);
    let (args, distinct) = lower_function_args(&f.args, &name)?;

    if let Some(over) = &f.over {
        let spec = match over {
            WindowType::WindowSpec(spec) => spec,
            WindowType::NamedWindow(_) => {
                return Err(QrxError::Unsupported(
                    "named windows in OVER are not supported".to_string(),
                ));
            }
        };
        if spec.window_frame.is_some() {
            return Err(QrxError::Unsupported(
                "window frames are not supported".to_string(),
            ));
        }
        if spec.window_name.is_some() {
            return Err(QrxError::Unsupported(
                "named windows in OVER are not supported".to_string(),
            ));
        }
        if distinct {
            return Err(QrxError::Unsupported(format!(
                "{name}(DISTINCT ...) OVER is not supported"
            )));
        }
        let partition_by = spec
            .partition_by
            .iter()
            .map(lower_expr)
            .collect::<Result<Vec<_>>>()?;
        let mut order_by = Vec::new();
        for item in &spec.order_by {
            order_by.push(OrderKey {
                expr: lower_expr(&item.expr)?,
                asc: item.asc.unwrap_or(true),
            });
        }
        return Ok(ScalarExpr::WindowFunction {
            name,
            args,
            partition_by,
            order_by,
        });
    }

    Ok(ScalarExpr::Function {
        name,
        args,
        distinct,
    })
}

fn lower_function_args(
    args: &FunctionArguments,
    fname: &str,
) -> Result<(Vec<ScalarExpr>, bool)> {
    match args {
        FunctionArguments::None => Ok((Vec::new(), false)),
        FunctionArguments::Subquery(_) => Err(QrxError::Unsupported(format!(
            "{fname}(<subquery>) is not supported"
        ))),
        FunctionArguments::List(list) => {
            if !list.clauses.is_empty() {
                return Err(QrxError::Unsupported(format!(
                    "{fname}(...) argument clauses are not supported"
                )));
            }
            let distinct = matches!(
                list.duplicate_treatment,
                Some(sqlparser::ast::DuplicateTreatment::Distinct)
            );
            let mut out = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => out.push(lower_expr(e)?),
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                        out.push(ScalarExpr::Wildcard)
                    }
                    _ => {
                        return Err(QrxError::Unsupported(format!(
                            "unsupported argument form in {fname}(...)"
                        )));
                    }
                }
            }
            Ok((out, distinct))
        }
    }
}

fn norm_ident(id: &Ident) -> String {
    id.value.to_ascii_lowercase()
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(norm_ident)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use qrx_common::{Literal, QrxError, SqlDialect};

    use super::lower_query;
    use crate::ast::{CompareOp, ScalarExpr};

    fn lower(sql: &str) -> crate::ast::QueryAst {
        let q = qrx_sql::parse_single_select(sql, SqlDialect::Generic).expect("parse");
        lower_query(&q).expect("lower")
    }

    fn lower_err(sql: &str) -> QrxError {
        let q = qrx_sql::parse_single_select(sql, SqlDialect::Generic).expect("parse");
        lower_query(&q).expect_err("should not lower")
    }

    #[test]
    fn lowers_aggregate_query() {
        let ast = lower(
            "SELECT region, SUM(amount) AS total FROM sales \
             WHERE date >= '2024-11-01' GROUP BY region",
        );
        assert_eq!(ast.from.table, "sales");
        assert_eq!(ast.projection.len(), 2);
        assert_eq!(ast.projection[1].alias.as_deref(), Some("total"));
        assert_eq!(ast.group_by.len(), 1);
        assert!(ast.filter.is_some());
    }

    #[test]
    fn between_lowers_to_inclusive_range() {
        let ast = lower("SELECT a FROM t WHERE a BETWEEN 1 AND 5");
        let Some(ScalarExpr::And(lo, hi)) = ast.filter else {
            panic!("expected AND of comparisons");
        };
        assert!(
            matches!(*lo, ScalarExpr::Compare { op: CompareOp::GtEq, .. }),
            "{lo:?}"
        );
        assert!(
            matches!(*hi, ScalarExpr::Compare { op: CompareOp::LtEq, .. }),
            "{hi:?}"
        );
    }

    #[test]
    fn count_star_keeps_wildcard_argument() {
        let ast = lower("SELECT COUNT(*) FROM t");
        let ScalarExpr::Function { name, args, .. } = &ast.projection[0].expr else {
            panic!("expected function");
        };
        assert_eq!(name, "count");
        assert_eq!(args, &vec![ScalarExpr::Wildcard]);
    }

    #[test]
    fn identifiers_are_lowercased() {
        let ast = lower("SELECT S.Amount FROM Sales AS S");
        assert_eq!(ast.from.table, "sales");
        assert_eq!(ast.from.alias.as_deref(), Some("s"));
        let ScalarExpr::Column(c) = &ast.projection[0].expr else {
            panic!("expected column");
        };
        assert_eq!(c.relation.as_deref(), Some("s"));
        assert_eq!(c.name, "amount");
    }

    #[test]
    fn rejects_out_of_subset_shapes() {
        assert!(matches!(
            lower_err("WITH x AS (SELECT 1) SELECT * FROM x"),
            QrxError::Unsupported(_)
        ));
        assert!(matches!(
            lower_err("SELECT a FROM t WHERE b IN (SELECT b FROM u)"),
            QrxError::Unsupported(_)
        ));
        assert!(matches!(
            lower_err("SELECT a FROM t LIMIT a"),
            QrxError::Unsupported(_)
        ));
    }

    #[test]
    fn window_function_lowering_keeps_partition_and_order() {
        let ast = lower(
            "SELECT region, ROW_NUMBER() OVER (PARTITION BY region ORDER BY amount DESC) \
             FROM sales",
        );
        let ScalarExpr::WindowFunction {
            name,
            partition_by,
            order_by,
            ..
        } = &ast.projection[1].expr
        else {
            panic!("expected window function");
        };
        assert_eq!(name, "row_number");
        assert_eq!(partition_by.len(), 1);
        assert!(!order_by[0].asc);
    }

    #[test]
    fn date_typed_literal_parses_to_days() {
        let ast = lower("SELECT a FROM t WHERE d = DATE '2024-11-01'");
        let Some(ScalarExpr::Compare { right, .. }) = ast.filter else {
            panic!("expected comparison");
        };
        let ScalarExpr::Literal(Literal::Date32(days)) = *right else {
            panic!("expected date literal");
        };
        assert_eq!(days, qrx_common::parse_date("2024-11-01").unwrap());
    }
}
