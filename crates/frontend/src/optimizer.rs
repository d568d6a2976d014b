//! Logical rewrites over the closed AST.
//!
//! Pass order: constant folding, `NOT` de Morgan normalization, conjunction
//! flattening (with sorted, deduplicated operands), predicate pushdown onto
//! table scans, projection pruning, and trivially-true branch removal.
//! The whole pipeline is idempotent: optimizing an optimized AST returns an
//! equal AST.

use std::collections::{BTreeSet, HashMap, HashSet};

use qrx_common::Literal;

use crate::ast::{
    conjoin, split_conjuncts, split_disjuncts, ArithOp, ColumnRef, CompareOp, JoinType, QueryAst,
    ScalarExpr,
};
use crate::canonical::expr_text;

/// Run every rewrite over the query.
pub fn optimize(mut ast: QueryAst) -> QueryAst {
    for item in &mut ast.projection {
        item.expr = normalize(item.expr.clone());
    }
    for j in &mut ast.joins {
        j.on = normalize(j.on.clone());
    }
    ast.filter = ast.filter.take().map(normalize);
    ast.having = ast.having.take().map(normalize);
    for g in &mut ast.group_by {
        *g = normalize(g.clone());
    }
    for k in &mut ast.order_by {
        k.expr = normalize(k.expr.clone());
    }
    for t in ast.table_refs_mut() {
        let filters = std::mem::take(&mut t.filters);
        t.filters = filters.into_iter().map(normalize).collect();
    }

    push_down_predicates(&mut ast);
    prune_projections(&mut ast);

    if ast.filter.as_ref().is_some_and(ScalarExpr::is_true) {
        ast.filter = None;
    }
    if ast.having.as_ref().is_some_and(ScalarExpr::is_true) {
        ast.having = None;
    }
    ast
}

/// Normalize one expression: fold constants, push `NOT` inward, flatten and
/// sort `AND`/`OR` chains, sort `IN` lists, and put literals on the right of
/// comparisons.
pub fn normalize(e: ScalarExpr) -> ScalarExpr {
    match e {
        ScalarExpr::Not(inner) => negate(normalize(*inner)),
        ScalarExpr::And(_, _) => {
            let mut parts = Vec::new();
            split_conjuncts(&e, &mut parts);
            rebuild_and(parts.into_iter().map(normalize).collect())
        }
        ScalarExpr::Or(_, _) => {
            let mut parts = Vec::new();
            split_disjuncts(&e, &mut parts);
            rebuild_or(parts.into_iter().map(normalize).collect())
        }
        ScalarExpr::Compare { left, op, right } => {
            let l = normalize(*left);
            let r = normalize(*right);
            // Literals read better (and compare stably) on the right.
            let (l, op, r) = if matches!(l, ScalarExpr::Literal(_))
                && !matches!(r, ScalarExpr::Literal(_))
            {
                (r, op.flip(), l)
            } else {
                (l, op, r)
            };
            if let (ScalarExpr::Literal(a), ScalarExpr::Literal(b)) = (&l, &r) {
                if let Some(ord) = a.compare(b) {
                    return ScalarExpr::boolean(match op {
                        CompareOp::Eq => ord.is_eq(),
                        CompareOp::NotEq => ord.is_ne(),
                        CompareOp::Lt => ord.is_lt(),
                        CompareOp::LtEq => ord.is_le(),
                        CompareOp::Gt => ord.is_gt(),
                        CompareOp::GtEq => ord.is_ge(),
                    });
                }
            }
            ScalarExpr::Compare {
                left: Box::new(l),
                op,
                right: Box::new(r),
            }
        }
        ScalarExpr::Arith { left, op, right } => {
            let l = normalize(*left);
            let r = normalize(*right);
            if let (ScalarExpr::Literal(a), ScalarExpr::Literal(b)) = (&l, &r) {
                if let Some(folded) = fold_arith(a, op, b) {
                    return ScalarExpr::Literal(folded);
                }
            }
            ScalarExpr::Arith {
                left: Box::new(l),
                op,
                right: Box::new(r),
            }
        }
        ScalarExpr::IsNull(inner) => ScalarExpr::IsNull(Box::new(normalize(*inner))),
        ScalarExpr::IsNotNull(inner) => ScalarExpr::IsNotNull(Box::new(normalize(*inner))),
        ScalarExpr::InList {
            expr,
            list,
            negated,
        } => {
            let expr = Box::new(normalize(*expr));
            let mut list: Vec<ScalarExpr> = list.into_iter().map(normalize).collect();
            list.sort_by_key(expr_text);
            list.dedup();
            ScalarExpr::InList {
                expr,
                list,
                negated,
            }
        }
        ScalarExpr::Function {
            name,
            args,
            distinct,
        } => ScalarExpr::Function {
            name,
            args: args.into_iter().map(normalize).collect(),
            distinct,
        },
        ScalarExpr::WindowFunction {
            name,
            args,
            partition_by,
            order_by,
        } => ScalarExpr::WindowFunction {
            name,
            args: args.into_iter().map(normalize).collect(),
            partition_by: partition_by.into_iter().map(normalize).collect(),
            order_by: order_by
                .into_iter()
                .map(|mut k| {
                    k.expr = normalize(k.expr);
                    k
                })
                .collect(),
        },
        atom @ (ScalarExpr::Column(_) | ScalarExpr::Literal(_) | ScalarExpr::Wildcard) => atom,
    }
}

/// Normalized negation of an already-normalized expression.
fn negate(e: ScalarExpr) -> ScalarExpr {
    match e {
        ScalarExpr::Not(inner) => *inner,
        ScalarExpr::Literal(Literal::Boolean(b)) => ScalarExpr::boolean(!b),
        ScalarExpr::And(_, _) => {
            let mut parts = Vec::new();
            split_conjuncts(&e, &mut parts);
            rebuild_or(parts.into_iter().map(negate).collect())
        }
        ScalarExpr::Or(_, _) => {
            let mut parts = Vec::new();
            split_disjuncts(&e, &mut parts);
            rebuild_and(parts.into_iter().map(negate).collect())
        }
        ScalarExpr::Compare { left, op, right } => ScalarExpr::Compare {
            left,
            op: op.negate(),
            right,
        },
        ScalarExpr::IsNull(inner) => ScalarExpr::IsNotNull(inner),
        ScalarExpr::IsNotNull(inner) => ScalarExpr::IsNull(inner),
        ScalarExpr::InList {
            expr,
            list,
            negated,
        } => ScalarExpr::InList {
            expr,
            list,
            negated: !negated,
        },
        other => ScalarExpr::Not(Box::new(other)),
    }
}

fn rebuild_and(parts: Vec<ScalarExpr>) -> ScalarExpr {
    if parts.iter().any(ScalarExpr::is_false) {
        return ScalarExpr::boolean(false);
    }
    let mut kept: Vec<ScalarExpr> = parts.into_iter().filter(|p| !p.is_true()).collect();
    kept.sort_by_key(expr_text);
    kept.dedup();
    match kept.len() {
        0 => ScalarExpr::boolean(true),
        _ => conjoin(kept).expect("non-empty"),
    }
}

fn rebuild_or(parts: Vec<ScalarExpr>) -> ScalarExpr {
    if parts.iter().any(ScalarExpr::is_true) {
        return ScalarExpr::boolean(true);
    }
    let mut kept: Vec<ScalarExpr> = parts.into_iter().filter(|p| !p.is_false()).collect();
    kept.sort_by_key(expr_text);
    kept.dedup();
    match kept.len() {
        0 => ScalarExpr::boolean(false),
        1 => kept.into_iter().next().expect("one"),
        _ => {
            let mut iter = kept.into_iter();
            let first = iter.next().expect("non-empty");
            iter.fold(first, |acc, e| ScalarExpr::Or(Box::new(acc), Box::new(e)))
        }
    }
}

fn fold_arith(a: &Literal, op: ArithOp, b: &Literal) -> Option<Literal> {
    match (a, b) {
        (Literal::Int64(x), Literal::Int64(y)) => match op {
            ArithOp::Plus => x.checked_add(*y).map(Literal::Int64),
            ArithOp::Minus => x.checked_sub(*y).map(Literal::Int64),
            ArithOp::Multiply => x.checked_mul(*y).map(Literal::Int64),
            ArithOp::Divide => (*y != 0).then(|| Literal::Int64(x / y)),
        },
        (Literal::Float64(x), Literal::Float64(y)) => match op {
            ArithOp::Plus => Some(Literal::Float64(x + y)),
            ArithOp::Minus => Some(Literal::Float64(x - y)),
            ArithOp::Multiply => Some(Literal::Float64(x * y)),
            ArithOp::Divide => (*y != 0.0).then(|| Literal::Float64(x / y)),
        },
        _ => None,
    }
}

/// Move single-table WHERE conjuncts onto the owning scan.
///
/// Pooling the already-pushed scan filters back first makes the pass
/// idempotent. A conjunct is pushed only when every column it references is
/// qualified with one binding and that binding's rows cannot be
/// null-supplied by an outer join.
fn push_down_predicates(ast: &mut QueryAst) {
    let null_supplying = null_supplying_bindings(ast);

    let mut pool = Vec::new();
    for t in ast.table_refs_mut() {
        pool.append(&mut t.filters);
    }
    if let Some(f) = ast.filter.take() {
        split_conjuncts(&f, &mut pool);
    }

    if pool.iter().any(ScalarExpr::is_false) {
        ast.filter = Some(ScalarExpr::boolean(false));
        return;
    }

    let mut pushed: HashMap<String, Vec<ScalarExpr>> = HashMap::new();
    let mut residual = Vec::new();
    for conjunct in pool {
        if conjunct.is_true() {
            continue;
        }
        let mut cols = Vec::new();
        conjunct.columns(&mut cols);
        let has_unqualified = cols.iter().any(|c| c.relation.is_none());
        let bindings = conjunct.referenced_bindings();
        let pushable = !has_unqualified
            && !cols.is_empty()
            && bindings.len() == 1
            && !null_supplying.contains(&bindings[0]);
        if pushable {
            pushed.entry(bindings[0].clone()).or_default().push(conjunct);
        } else {
            residual.push(conjunct);
        }
    }

    for t in ast.table_refs_mut() {
        if let Some(mut filters) = pushed.remove(t.binding()) {
            filters.sort_by_key(expr_text);
            filters.dedup();
            t.filters = filters;
        }
    }
    // Conjuncts naming an unknown binding stay residual.
    for (_, mut leftover) in pushed {
        residual.append(&mut leftover);
    }
    residual.sort_by_key(expr_text);
    residual.dedup();
    ast.filter = conjoin(residual);
}

/// Bindings whose rows may be null-extended by an outer join; predicates on
/// them must stay above the join.
fn null_supplying_bindings(ast: &QueryAst) -> HashSet<String> {
    let mut out = HashSet::new();
    for (i, j) in ast.joins.iter().enumerate() {
        match j.join_type {
            JoinType::Inner => {}
            JoinType::Left => {
                out.insert(j.relation.binding().to_string());
            }
            JoinType::Right => {
                out.insert(ast.from.binding().to_string());
                for prev in &ast.joins[..i] {
                    out.insert(prev.relation.binding().to_string());
                }
            }
            JoinType::Full => {
                out.insert(j.relation.binding().to_string());
                out.insert(ast.from.binding().to_string());
                for prev in &ast.joins[..i] {
                    out.insert(prev.relation.binding().to_string());
                }
            }
        }
    }
    out
}

/// Record the referenced-column set on each scan. A wildcard or an
/// unattributable column anywhere disables pruning for every scan.
fn prune_projections(ast: &mut QueryAst) {
    let mut exprs: Vec<ScalarExpr> = Vec::new();
    for item in &ast.projection {
        exprs.push(item.expr.clone());
    }
    for j in &ast.joins {
        exprs.push(j.on.clone());
    }
    if let Some(f) = &ast.filter {
        exprs.push(f.clone());
    }
    if let Some(h) = &ast.having {
        exprs.push(h.clone());
    }
    exprs.extend(ast.group_by.iter().cloned());
    exprs.extend(ast.order_by.iter().map(|k| k.expr.clone()));
    for t in ast.table_refs() {
        exprs.extend(t.filters.iter().cloned());
    }

    let single_binding = ast.joins.is_empty().then(|| ast.from.binding().to_string());
    let mut by_binding: HashMap<String, BTreeSet<String>> = HashMap::new();
    for e in &exprs {
        if contains_wildcard(e) {
            for t in ast.table_refs_mut() {
                t.projection = None;
            }
            return;
        }
        let mut cols: Vec<&ColumnRef> = Vec::new();
        e.columns(&mut cols);
        for c in cols {
            let binding = match (&c.relation, &single_binding) {
                (Some(rel), _) => rel.clone(),
                (None, Some(only)) => only.clone(),
                (None, None) => {
                    for t in ast.table_refs_mut() {
                        t.projection = None;
                    }
                    return;
                }
            };
            by_binding.entry(binding).or_default().insert(c.name.clone());
        }
    }

    for t in ast.table_refs_mut() {
        let cols = by_binding.remove(t.binding()).unwrap_or_default();
        t.projection = Some(cols.into_iter().collect());
    }
}

fn contains_wildcard(e: &ScalarExpr) -> bool {
    match e {
        ScalarExpr::Wildcard => true,
        ScalarExpr::Column(_) | ScalarExpr::Literal(_) => false,
        ScalarExpr::Compare { left, right, .. } | ScalarExpr::Arith { left, right, .. } => {
            contains_wildcard(left) || contains_wildcard(right)
        }
        ScalarExpr::And(a, b) | ScalarExpr::Or(a, b) => {
            contains_wildcard(a) || contains_wildcard(b)
        }
        ScalarExpr::Not(x) | ScalarExpr::IsNull(x) | ScalarExpr::IsNotNull(x) => {
            contains_wildcard(x)
        }
        ScalarExpr::InList { expr, list, .. } => {
            contains_wildcard(expr) || list.iter().any(contains_wildcard)
        }
        // COUNT(*) reads no specific column; it must not disable pruning.
        ScalarExpr::Function { args, .. } => args
            .iter()
            .any(|a| !matches!(a, ScalarExpr::Wildcard) && contains_wildcard(a)),
        ScalarExpr::WindowFunction {
            args,
            partition_by,
            order_by,
            ..
        } => {
            args.iter()
                .any(|a| !matches!(a, ScalarExpr::Wildcard) && contains_wildcard(a))
                || partition_by.iter().any(contains_wildcard)
                || order_by.iter().any(|k| contains_wildcard(&k.expr))
        }
    }
}

#[cfg(test)]
mod tests {
    use qrx_common::SqlDialect;

    use super::{normalize, optimize};
    use crate::ast::{ColumnRef, CompareOp, ScalarExpr};
    use crate::sql_frontend::lower_query;

    fn lower(sql: &str) -> crate::ast::QueryAst {
        let q = qrx_sql::parse_single_select(sql, SqlDialect::Generic).expect("parse");
        lower_query(&q).expect("lower")
    }

    fn qualify_single(mut ast: crate::ast::QueryAst) -> crate::ast::QueryAst {
        // Tests below run without a catalog; qualify bare columns by hand.
        let binding = ast.from.binding().to_string();
        fn walk(e: &mut ScalarExpr, b: &str) {
            match e {
                ScalarExpr::Column(c) => {
                    if c.relation.is_none() {
                        c.relation = Some(b.to_string());
                    }
                }
                ScalarExpr::Compare { left, right, .. }
                | ScalarExpr::Arith { left, right, .. } => {
                    walk(left, b);
                    walk(right, b);
                }
                ScalarExpr::And(x, y) | ScalarExpr::Or(x, y) => {
                    walk(x, b);
                    walk(y, b);
                }
                ScalarExpr::Not(x) | ScalarExpr::IsNull(x) | ScalarExpr::IsNotNull(x) => {
                    walk(x, b)
                }
                ScalarExpr::InList { expr, list, .. } => {
                    walk(expr, b);
                    list.iter_mut().for_each(|m| walk(m, b));
                }
                ScalarExpr::Function { args, .. } => args.iter_mut().for_each(|a| walk(a, b)),
                ScalarExpr::WindowFunction {
                    args,
                    partition_by,
                    order_by,
                    ..
                } => {
                    args.iter_mut().for_each(|a| walk(a, b));
                    partition_by.iter_mut().for_each(|a| walk(a, b));
                    order_by.iter_mut().for_each(|k| walk(&mut k.expr, b));
                }
                ScalarExpr::Literal(_) | ScalarExpr::Wildcard => {}
            }
        }
        if let Some(f) = &mut ast.filter {
            walk(f, &binding);
        }
        for item in &mut ast.projection {
            walk(&mut item.expr, &binding);
        }
        for g in &mut ast.group_by {
            walk(g, &binding);
        }
        ast
    }

    #[test]
    fn optimizer_is_idempotent() {
        for sql in [
            "SELECT region, SUM(amount) FROM sales \
             WHERE date >= '2024-11-01' AND date <= '2024-11-07' GROUP BY region",
            "SELECT a FROM t WHERE NOT (a = 1 OR b < 2) AND c IN (3, 1, 2, 1)",
            "SELECT a FROM t WHERE 1 = 1 AND a > 2 + 3",
        ] {
            let once = optimize(qualify_single(lower(sql)));
            let twice = optimize(once.clone());
            assert_eq!(once, twice, "not idempotent for {sql}");
        }
    }

    #[test]
    fn folds_constants_and_trivial_branches() {
        let ast = optimize(qualify_single(lower(
            "SELECT a FROM t WHERE 1 = 1 AND a > 2 + 3",
        )));
        assert!(ast.filter.is_none(), "trivial TRUE conjunct must vanish");
        assert_eq!(ast.from.filters.len(), 1);
        let ScalarExpr::Compare { op, right, .. } = &ast.from.filters[0] else {
            panic!("expected comparison");
        };
        assert_eq!(*op, CompareOp::Gt);
        assert_eq!(
            **right,
            ScalarExpr::Literal(qrx_common::Literal::Int64(5))
        );
    }

    #[test]
    fn de_morgan_pushes_not_inward() {
        let e = normalize(ScalarExpr::Not(Box::new(ScalarExpr::And(
            Box::new(ScalarExpr::Compare {
                left: Box::new(ScalarExpr::Column(ColumnRef::bare("a"))),
                op: CompareOp::Eq,
                right: Box::new(ScalarExpr::Literal(qrx_common::Literal::Int64(1))),
            }),
            Box::new(ScalarExpr::IsNull(Box::new(ScalarExpr::Column(
                ColumnRef::bare("b"),
            )))),
        ))));
        let ScalarExpr::Or(l, r) = e else {
            panic!("expected OR after de Morgan");
        };
        assert!(matches!(
            *l,
            ScalarExpr::Compare {
                op: CompareOp::NotEq,
                ..
            }
        ));
        assert!(matches!(*r, ScalarExpr::IsNotNull(_)));
    }

    #[test]
    fn pushes_single_table_conjuncts_to_scans() {
        let ast = optimize(qualify_single(lower(
            "SELECT s.region FROM sales AS s INNER JOIN regions AS r ON s.region = r.name \
             WHERE s.qty > 2 AND s.region = r.name",
        )));
        assert_eq!(ast.from.filters.len(), 1, "{ast:?}");
        assert!(ast.filter.is_some(), "cross-table conjunct stays residual");
    }

    #[test]
    fn outer_join_inner_side_is_not_pushed() {
        let ast = optimize(lower(
            "SELECT s.region FROM sales AS s LEFT JOIN regions AS r ON s.region = r.name \
             WHERE r.name IS NULL",
        ));
        assert!(ast.joins[0].relation.filters.is_empty());
        assert!(ast.filter.is_some());
    }

    #[test]
    fn projection_pruning_records_scan_columns() {
        let ast = optimize(qualify_single(lower(
            "SELECT region, SUM(amount) FROM sales WHERE date > '2024-11-01' GROUP BY region",
        )));
        assert_eq!(
            ast.from.projection,
            Some(vec![
                "amount".to_string(),
                "date".to_string(),
                "region".to_string()
            ])
        );
    }

    #[test]
    fn wildcard_disables_projection_pruning() {
        let ast = optimize(lower("SELECT * FROM sales WHERE date > '2024-11-01'"));
        assert_eq!(ast.from.projection, None);
    }

    #[test]
    fn in_lists_are_sorted_and_deduped() {
        let ast = optimize(qualify_single(lower(
            "SELECT a FROM t WHERE a IN (3, 1, 2, 1)",
        )));
        let ScalarExpr::InList { list, .. } = &ast.from.filters[0] else {
            panic!("expected IN");
        };
        let rendered: Vec<String> = list.iter().map(crate::canonical::expr_text).collect();
        assert_eq!(rendered, vec!["1", "2", "3"]);
    }
}
