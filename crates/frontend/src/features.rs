//! Query-shape feature extraction for the cost model.

use crate::ast::{QueryAst, ScalarExpr};

/// Aggregate function names recognized when counting aggregations.
const AGGREGATE_FNS: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "stddev",
    "variance",
    "group_concat",
    "array_agg",
];

/// Counts and heuristics describing a query's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    /// JOIN clause count.
    pub num_joins: u32,
    /// Aggregate call count (at least 1 when GROUP BY is present).
    pub num_aggregations: u32,
    /// Window function count.
    pub num_windows: u32,
    /// `SELECT DISTINCT` or `agg(DISTINCT ...)`.
    pub has_distinct: bool,
    /// ORDER BY present.
    pub has_order_by: bool,
    /// Constant LIMIT, when given.
    pub limit: Option<u64>,
    /// SELECT-list item count.
    pub projected_columns: u32,
    /// Estimated fraction of input rows retained by WHERE, in [0, 1].
    pub selectivity: f64,
}

impl QueryFeatures {
    /// Integer complexity summary used as a cost multiplier:
    /// `joins*3 + aggregations*2 + windows*4 + distinct + order_by`.
    pub fn complexity_score(&self) -> u32 {
        self.num_joins * 3
            + self.num_aggregations * 2
            + self.num_windows * 4
            + u32::from(self.has_distinct)
            + u32::from(self.has_order_by)
    }
}

/// Walk the AST once and accumulate the feature tuple.
pub fn extract_features(ast: &QueryAst) -> QueryFeatures {
    let mut num_aggregations = 0u32;
    let mut num_windows = 0u32;
    let mut agg_distinct = false;

    let mut scan = |e: &ScalarExpr| {
        count_calls(e, &mut num_aggregations, &mut num_windows, &mut agg_distinct);
    };
    for item in &ast.projection {
        scan(&item.expr);
    }
    if let Some(h) = &ast.having {
        scan(h);
    }
    for k in &ast.order_by {
        scan(&k.expr);
    }

    if !ast.group_by.is_empty() && num_aggregations == 0 {
        // GROUP BY without aggregate calls still aggregates.
        num_aggregations = 1;
    }

    QueryFeatures {
        num_joins: ast.joins.len() as u32,
        num_aggregations,
        num_windows,
        has_distinct: ast.distinct || agg_distinct,
        has_order_by: !ast.order_by.is_empty(),
        limit: ast.limit,
        projected_columns: ast.projection.len() as u32,
        selectivity: query_selectivity(ast),
    }
}

fn count_calls(e: &ScalarExpr, aggs: &mut u32, windows: &mut u32, agg_distinct: &mut bool) {
    match e {
        ScalarExpr::Function {
            name,
            args,
            distinct,
        } => {
            if AGGREGATE_FNS.contains(&name.as_str()) {
                *aggs += 1;
                *agg_distinct |= *distinct;
            }
            for a in args {
                count_calls(a, aggs, windows, agg_distinct);
            }
        }
        ScalarExpr::WindowFunction {
            args,
            partition_by,
            order_by,
            ..
        } => {
            *windows += 1;
            for a in args.iter().chain(partition_by) {
                count_calls(a, aggs, windows, agg_distinct);
            }
            for k in order_by {
                count_calls(&k.expr, aggs, windows, agg_distinct);
            }
        }
        ScalarExpr::Compare { left, right, .. } | ScalarExpr::Arith { left, right, .. } => {
            count_calls(left, aggs, windows, agg_distinct);
            count_calls(right, aggs, windows, agg_distinct);
        }
        ScalarExpr::And(a, b) | ScalarExpr::Or(a, b) => {
            count_calls(a, aggs, windows, agg_distinct);
            count_calls(b, aggs, windows, agg_distinct);
        }
        ScalarExpr::Not(x) | ScalarExpr::IsNull(x) | ScalarExpr::IsNotNull(x) => {
            count_calls(x, aggs, windows, agg_distinct)
        }
        ScalarExpr::InList { expr, list, .. } => {
            count_calls(expr, aggs, windows, agg_distinct);
            for m in list {
                count_calls(m, aggs, windows, agg_distinct);
            }
        }
        ScalarExpr::Column(_) | ScalarExpr::Literal(_) | ScalarExpr::Wildcard => {}
    }
}

/// Heuristic WHERE selectivity: equality 1/100, range 1/10, `IN(k)` k/100
/// capped at 1, `IS NULL` 1/1000; conjunction multiplies, disjunction adds
/// (clamped to 1).
fn query_selectivity(ast: &QueryAst) -> f64 {
    let mut s = 1.0;
    for t in ast.table_refs() {
        for f in &t.filters {
            s *= expr_selectivity(f);
        }
    }
    if let Some(f) = &ast.filter {
        s *= expr_selectivity(f);
    }
    s.clamp(0.0, 1.0)
}

fn expr_selectivity(e: &ScalarExpr) -> f64 {
    match e {
        ScalarExpr::And(a, b) => expr_selectivity(a) * expr_selectivity(b),
        ScalarExpr::Or(a, b) => (expr_selectivity(a) + expr_selectivity(b)).min(1.0),
        ScalarExpr::Not(x) => (1.0 - expr_selectivity(x)).clamp(0.0, 1.0),
        ScalarExpr::Compare { op, .. } => match op {
            crate::ast::CompareOp::Eq => 0.01,
            _ => 0.1,
        },
        ScalarExpr::InList { list, negated, .. } => {
            let s = (list.len() as f64 / 100.0).min(1.0);
            if *negated {
                (1.0 - s).clamp(0.0, 1.0)
            } else {
                s
            }
        }
        ScalarExpr::IsNull(_) => 0.001,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use qrx_common::SqlDialect;

    use super::extract_features;
    use crate::optimizer::optimize;
    use crate::sql_frontend::lower_query;

    fn features(sql: &str) -> super::QueryFeatures {
        let q = qrx_sql::parse_single_select(sql, SqlDialect::Generic).expect("parse");
        extract_features(&optimize(lower_query(&q).expect("lower")))
    }

    #[test]
    fn counts_shape_features() {
        let f = features(
            "SELECT s.region, SUM(s.amount) FROM sales AS s \
             INNER JOIN regions AS r ON s.region = r.name \
             GROUP BY s.region ORDER BY s.region LIMIT 10",
        );
        assert_eq!(f.num_joins, 1);
        assert_eq!(f.num_aggregations, 1);
        assert_eq!(f.num_windows, 0);
        assert!(f.has_order_by);
        assert_eq!(f.limit, Some(10));
        assert_eq!(f.projected_columns, 2);
        assert_eq!(f.complexity_score(), 3 + 2 + 1);
    }

    #[test]
    fn group_by_without_aggregates_counts_once() {
        let f = features("SELECT region FROM sales GROUP BY region");
        assert_eq!(f.num_aggregations, 1);
    }

    #[test]
    fn selectivity_combines_conjuncts_multiplicatively() {
        let f = features("SELECT a FROM t WHERE a = 1 AND b > 2");
        assert!((f.selectivity - 0.001).abs() < 1e-12, "{}", f.selectivity);
    }

    #[test]
    fn selectivity_of_disjunction_adds_clamped() {
        let f = features("SELECT a FROM t WHERE a = 1 OR b = 2");
        assert!((f.selectivity - 0.02).abs() < 1e-12, "{}", f.selectivity);
    }

    #[test]
    fn in_list_selectivity_scales_with_size() {
        let f = features("SELECT a FROM t WHERE a IN (1, 2, 3, 4, 5)");
        assert!((f.selectivity - 0.05).abs() < 1e-12, "{}", f.selectivity);
    }

    #[test]
    fn window_functions_weigh_heaviest() {
        let f = features(
            "SELECT region, ROW_NUMBER() OVER (PARTITION BY region ORDER BY amount) FROM sales",
        );
        assert_eq!(f.num_windows, 1);
        assert_eq!(f.complexity_score(), 4);
    }
}
