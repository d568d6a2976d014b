//! Name resolution and assembly of the [`AnalyzedQuery`] the engine
//! consumes.

use std::collections::BTreeMap;

use arrow_schema::{DataType, SchemaRef, TimeUnit};
use qrx_common::{Literal, Predicate, QrxError, Result, SqlDialect};

use crate::ast::{ColumnRef, QueryAst, ScalarExpr};
use crate::canonical::canonical_text;
use crate::features::{extract_features, QueryFeatures};
use crate::optimizer::optimize;
use crate::predicate::extract_predicates;
use crate::sql_frontend::lower_query;

/// The analyzer needs schemas to resolve columns.
/// The engine provides this from its Catalog.
pub trait SchemaProvider {
    /// Declared schema for a registered table; `Ok(None)` when the table is
    /// registered without one, `Err(UnknownTable)` when it is not registered.
    fn table_schema(&self, table: &str) -> Result<Option<SchemaRef>>;
}

/// Provider for contexts without a catalog: every table exists, none has a
/// declared schema.
#[derive(Debug, Default)]
pub struct NoSchemas;

impl SchemaProvider for NoSchemas {
    fn table_schema(&self, _table: &str) -> Result<Option<SchemaRef>> {
        Ok(None)
    }
}

/// One resolved FROM-clause relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    /// Catalog table name.
    pub table: String,
    /// Name columns are qualified with (alias, or the table name).
    pub binding: String,
}

/// Everything the engine needs from the SQL front-end, produced by one
/// analyzer call and alive for a single engine call.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    /// The caller's SQL text, untouched.
    pub original_text: String,
    /// Deterministic canonical rendering; the cache-key component.
    pub canonical_text: String,
    /// Optimized AST handed to the executor.
    pub ast: QueryAst,
    /// Referenced relations in FROM order.
    pub tables: Vec<TableBinding>,
    /// Per-table pruning predicates, keyed by table name.
    pub predicates: BTreeMap<String, Vec<Predicate>>,
    /// Shape features for the cost model.
    pub features: QueryFeatures,
    /// Dialect the text was parsed under.
    pub dialect: SqlDialect,
}

/// SQL front-end: parse, lower, resolve, optimize, extract.
#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    dialect: SqlDialect,
}

impl Analyzer {
    /// Analyzer for the given dialect.
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Run the whole front-end over one SQL string.
    ///
    /// Error taxonomy:
    /// - `Parse` / `Unsupported`: text outside the routed subset
    /// - `UnknownTable`: a FROM relation is not registered
    /// - `AmbiguousColumn`: schemas are registered and a bare column resolves
    ///   to more than one of them
    pub fn analyze(&self, sql: &str, provider: &dyn SchemaProvider) -> Result<AnalyzedQuery> {
        let query = qrx_sql::parse_single_select(sql, self.dialect)?;
        let mut ast = lower_query(&query)?;

        let mut bindings: Vec<(String, Option<SchemaRef>)> = Vec::new();
        let mut tables = Vec::new();
        for t in ast.table_refs() {
            let schema = provider.table_schema(&t.table)?;
            let binding = t.binding().to_string();
            if bindings.iter().any(|(b, _)| *b == binding) {
                return Err(QrxError::Unsupported(format!(
                    "duplicate table binding '{binding}'; alias one of the references"
                )));
            }
            tables.push(TableBinding {
                table: t.table.clone(),
                binding: binding.clone(),
            });
            bindings.push((binding, schema));
        }

        let aliases: Vec<String> = ast
            .projection
            .iter()
            .filter_map(|item| item.alias.clone())
            .collect();
        qualify_ast(&mut ast, &bindings, &aliases)?;
        coerce_temporal_literals(&mut ast, &bindings);

        let ast = optimize(ast);
        let canonical_text = canonical_text(&ast);
        let features = extract_features(&ast);
        let predicates = extract_predicates(&ast);

        Ok(AnalyzedQuery {
            original_text: sql.to_string(),
            canonical_text,
            ast,
            tables,
            predicates,
            features,
            dialect: self.dialect,
        })
    }
}

fn qualify_ast(
    ast: &mut QueryAst,
    bindings: &[(String, Option<SchemaRef>)],
    aliases: &[String],
) -> Result<()> {
    let mut items = std::mem::take(&mut ast.projection);
    for item in &mut items {
        qualify_expr(&mut item.expr, bindings, aliases)?;
    }
    ast.projection = items;

    let mut joins = std::mem::take(&mut ast.joins);
    for j in &mut joins {
        qualify_expr(&mut j.on, bindings, aliases)?;
    }
    ast.joins = joins;

    if let Some(f) = &mut ast.filter {
        qualify_expr(f, bindings, aliases)?;
    }
    if let Some(h) = &mut ast.having {
        qualify_expr(h, bindings, aliases)?;
    }
    for g in &mut ast.group_by {
        qualify_expr(g, bindings, aliases)?;
    }
    let mut order_by = std::mem::take(&mut ast.order_by);
    for k in &mut order_by {
        qualify_expr(&mut k.expr, bindings, aliases)?;
    }
    ast.order_by = order_by;
    Ok(())
}

fn qualify_expr(
    e: &mut ScalarExpr,
    bindings: &[(String, Option<SchemaRef>)],
    aliases: &[String],
) -> Result<()> {
    match e {
        ScalarExpr::Column(c) => qualify_column(c, bindings, aliases),
        ScalarExpr::Literal(_) | ScalarExpr::Wildcard => Ok(()),
        ScalarExpr::Compare { left, right, .. } | ScalarExpr::Arith { left, right, .. } => {
            qualify_expr(left, bindings, aliases)?;
            qualify_expr(right, bindings, aliases)
        }
        ScalarExpr::And(a, b) | ScalarExpr::Or(a, b) => {
            qualify_expr(a, bindings, aliases)?;
            qualify_expr(b, bindings, aliases)
        }
        ScalarExpr::Not(x) | ScalarExpr::IsNull(x) | ScalarExpr::IsNotNull(x) => {
            qualify_expr(x, bindings, aliases)
        }
        ScalarExpr::InList { expr, list, .. } => {
            qualify_expr(expr, bindings, aliases)?;
            for m in list {
                qualify_expr(m, bindings, aliases)?;
            }
            Ok(())
        }
        ScalarExpr::Function { args, .. } => {
            for a in args {
                qualify_expr(a, bindings, aliases)?;
            }
            Ok(())
        }
        ScalarExpr::WindowFunction {
            args,
            partition_by,
            order_by,
            ..
        } => {
            for a in args.iter_mut().chain(partition_by.iter_mut()) {
                qualify_expr(a, bindings, aliases)?;
            }
            for k in order_by {
                qualify_expr(&mut k.expr, bindings, aliases)?;
            }
            Ok(())
        }
    }
}

fn qualify_column(
    c: &mut ColumnRef,
    bindings: &[(String, Option<SchemaRef>)],
    aliases: &[String],
) -> Result<()> {
    if c.relation.is_some() {
        return Ok(());
    }
    // Bare names matching an output alias denote the projected column.
    if aliases.iter().any(|a| *a == c.name) {
        return Ok(());
    }
    if bindings.len() == 1 {
        c.relation = Some(bindings[0].0.clone());
        return Ok(());
    }
    let owners: Vec<&str> = bindings
        .iter()
        .filter(|(_, schema)| {
            schema
                .as_ref()
                .is_some_and(|s| s.fields().iter().any(|f| f.name() == &c.name))
        })
        .map(|(b, _)| b.as_str())
        .collect();
    match owners.as_slice() {
        [only] => {
            c.relation = Some((*only).to_string());
            Ok(())
        }
        [] => Ok(()), // no schema claims it; leave for the executor
        _ => Err(QrxError::AmbiguousColumn(format!(
            "'{}' matches tables {}",
            c.name,
            owners.join(", ")
        ))),
    }
}

/// With a declared schema, string literals compared against date/timestamp
/// columns are re-tagged so pruning compares typed values.
fn coerce_temporal_literals(ast: &mut QueryAst, bindings: &[(String, Option<SchemaRef>)]) {
    if let Some(f) = &mut ast.filter {
        coerce_expr(f, bindings);
    }
    if let Some(h) = &mut ast.having {
        coerce_expr(h, bindings);
    }
}

fn coerce_expr(e: &mut ScalarExpr, bindings: &[(String, Option<SchemaRef>)]) {
    match e {
        ScalarExpr::Compare { left, right, .. } => match (left.as_mut(), right.as_mut()) {
            (ScalarExpr::Column(c), ScalarExpr::Literal(v)) => {
                let c = c.clone();
                coerce_literal(&c, v, bindings);
            }
            (ScalarExpr::Literal(v), ScalarExpr::Column(c)) => {
                let c = c.clone();
                coerce_literal(&c, v, bindings);
            }
            (l, r) => {
                coerce_expr(l, bindings);
                coerce_expr(r, bindings);
            }
        },
        ScalarExpr::InList { expr, list, .. } => {
            if let ScalarExpr::Column(c) = expr.as_ref() {
                let c = c.clone();
                for m in list.iter_mut() {
                    if let ScalarExpr::Literal(v) = m {
                        coerce_literal(&c, v, bindings);
                    }
                }
            }
        }
        ScalarExpr::And(a, b) | ScalarExpr::Or(a, b) => {
            coerce_expr(a, bindings);
            coerce_expr(b, bindings);
        }
        ScalarExpr::Not(x) => coerce_expr(x, bindings),
        _ => {}
    }
}

fn coerce_literal(c: &ColumnRef, v: &mut Literal, bindings: &[(String, Option<SchemaRef>)]) {
    let Literal::Utf8(text) = &*v else {
        return;
    };
    let Some(rel) = &c.relation else {
        return;
    };
    let Some((_, Some(schema))) = bindings.iter().find(|(b, _)| b == rel) else {
        return;
    };
    let Ok(field) = schema.field_with_name(&c.name) else {
        return;
    };
    match field.data_type() {
        DataType::Date32 => {
            if let Some(days) = qrx_common::parse_date(text) {
                *v = Literal::Date32(days);
            }
        }
        DataType::Timestamp(TimeUnit::Nanosecond, None) => {
            if let Some(days) = qrx_common::parse_date(text) {
                *v = Literal::TimestampNanos(i64::from(days) * 86_400_000_000_000);
            }
        }
        _ => {}
    }
}
