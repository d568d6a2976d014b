//! Reshaping WHERE conjuncts into the normalized [`Predicate`] form the
//! pruner evaluates.

use std::collections::BTreeMap;

use qrx_common::{Literal, Predicate};

use crate::ast::{split_conjuncts, ColumnRef, CompareOp, QueryAst, ScalarExpr};
use crate::canonical::expr_text;

/// Collect per-table predicates from a query whose single-table conjuncts
/// have been pushed onto their scans.
///
/// Keys are catalog table names. Tables referenced more than once (self
/// joins) get no predicates: conjuncts from different bindings of the same
/// table would over-constrain a shared scan.
pub fn extract_predicates(ast: &QueryAst) -> BTreeMap<String, Vec<Predicate>> {
    let refs = ast.table_refs();
    let mut count_by_table: BTreeMap<&str, usize> = BTreeMap::new();
    for t in &refs {
        *count_by_table.entry(t.table.as_str()).or_default() += 1;
    }

    let single_binding = ast.joins.is_empty().then(|| ast.from.binding().to_string());
    let mut out: BTreeMap<String, Vec<Predicate>> = BTreeMap::new();

    for t in &refs {
        if count_by_table[t.table.as_str()] > 1 {
            continue;
        }
        let preds: &mut Vec<Predicate> = out.entry(t.table.clone()).or_default();
        for f in &t.filters {
            preds.push(to_predicate(f));
        }
    }

    // Residual conjuncts may still belong to one table (e.g. unqualified
    // columns in a single-table query, or disjunctions the pushdown skipped).
    if let Some(filter) = &ast.filter {
        let mut conjuncts = Vec::new();
        split_conjuncts(filter, &mut conjuncts);
        for c in conjuncts {
            let Some(binding) = owning_binding(&c, single_binding.as_deref()) else {
                continue;
            };
            let Some(table_ref) = ast.table_for_binding(&binding) else {
                continue;
            };
            if count_by_table[table_ref.table.as_str()] > 1 {
                continue;
            }
            out.entry(table_ref.table.clone())
                .or_default()
                .push(to_predicate(&c));
        }
    }

    out.retain(|_, v| !v.is_empty());
    out
}

/// The one binding a conjunct constrains, when exactly one.
fn owning_binding(e: &ScalarExpr, single_binding: Option<&str>) -> Option<String> {
    let mut cols: Vec<&ColumnRef> = Vec::new();
    e.columns(&mut cols);
    if cols.is_empty() {
        return None;
    }
    let mut bindings: Vec<&str> = Vec::new();
    for c in &cols {
        match (&c.relation, single_binding) {
            (Some(rel), _) => bindings.push(rel),
            (None, Some(only)) => bindings.push(only),
            (None, None) => return None,
        }
    }
    bindings.sort_unstable();
    bindings.dedup();
    (bindings.len() == 1).then(|| bindings[0].to_string())
}

/// Reshape one conjunct; anything outside the recognized shapes becomes
/// [`Predicate::Other`].
pub fn to_predicate(e: &ScalarExpr) -> Predicate {
    match e {
        ScalarExpr::Compare { left, op, right } => match (left.as_ref(), right.as_ref()) {
            (ScalarExpr::Column(c), ScalarExpr::Literal(v)) => shape(*op, c, v.clone()),
            (ScalarExpr::Literal(v), ScalarExpr::Column(c)) => {
                shape(op.flip(), c, v.clone())
            }
            _ => other(e),
        },
        ScalarExpr::InList {
            expr,
            list,
            negated: false,
        } => {
            let ScalarExpr::Column(c) = expr.as_ref() else {
                return other(e);
            };
            let mut values = Vec::with_capacity(list.len());
            for m in list {
                let ScalarExpr::Literal(v) = m else {
                    return other(e);
                };
                values.push(v.clone());
            }
            Predicate::In {
                column: c.name.clone(),
                values,
            }
        }
        ScalarExpr::IsNull(inner) => match inner.as_ref() {
            ScalarExpr::Column(c) => Predicate::IsNull {
                column: c.name.clone(),
            },
            _ => other(e),
        },
        ScalarExpr::IsNotNull(inner) => match inner.as_ref() {
            ScalarExpr::Column(c) => Predicate::IsNotNull {
                column: c.name.clone(),
            },
            _ => other(e),
        },
        _ => other(e),
    }
}

fn shape(op: CompareOp, c: &ColumnRef, v: Literal) -> Predicate {
    let column = c.name.clone();
    match op {
        CompareOp::Eq => Predicate::Eq { column, value: v },
        CompareOp::NotEq => Predicate::Neq { column, value: v },
        CompareOp::Lt => Predicate::Range {
            column,
            lo: None,
            hi: Some(v),
            lo_inclusive: false,
            hi_inclusive: false,
        },
        CompareOp::LtEq => Predicate::Range {
            column,
            lo: None,
            hi: Some(v),
            lo_inclusive: false,
            hi_inclusive: true,
        },
        CompareOp::Gt => Predicate::Range {
            column,
            lo: Some(v),
            hi: None,
            lo_inclusive: false,
            hi_inclusive: false,
        },
        CompareOp::GtEq => Predicate::Range {
            column,
            lo: Some(v),
            hi: None,
            lo_inclusive: true,
            hi_inclusive: false,
        },
    }
}

fn other(e: &ScalarExpr) -> Predicate {
    Predicate::Other { text: expr_text(e) }
}

#[cfg(test)]
mod tests {
    use qrx_common::{Literal, Predicate, SqlDialect};

    use super::extract_predicates;
    use crate::analyzer::Analyzer;
    use crate::NoSchemas;

    fn predicates(sql: &str) -> std::collections::BTreeMap<String, Vec<Predicate>> {
        let analyzed = Analyzer::new(SqlDialect::Generic)
            .analyze(sql, &NoSchemas)
            .expect("analyze");
        analyzed.predicates
    }

    #[test]
    fn range_conjuncts_become_bounds() {
        let p = predicates(
            "SELECT region FROM sales WHERE date >= '2024-11-01' AND date <= '2024-11-07'",
        );
        let sales = &p["sales"];
        assert_eq!(sales.len(), 2);
        assert!(sales.iter().all(|p| p.column() == Some("date")));
        assert!(sales.iter().any(|p| matches!(
            p,
            Predicate::Range {
                lo: Some(Literal::Utf8(v)),
                lo_inclusive: true,
                ..
            } if v == "2024-11-01"
        )));
    }

    #[test]
    fn eq_in_and_null_shapes() {
        let p = predicates(
            "SELECT a FROM t WHERE a = 1 AND b IN ('x', 'y') AND c IS NOT NULL AND d <> 4",
        );
        let t = &p["t"];
        assert!(t.contains(&Predicate::Eq {
            column: "a".into(),
            value: Literal::Int64(1)
        }));
        assert!(t.contains(&Predicate::Neq {
            column: "d".into(),
            value: Literal::Int64(4)
        }));
        assert!(t.iter().any(|p| matches!(p, Predicate::In { column, values }
            if column == "b" && values.len() == 2)));
        assert!(t.contains(&Predicate::IsNotNull { column: "c".into() }));
    }

    #[test]
    fn multi_column_conjuncts_are_other() {
        let p = predicates("SELECT a FROM t WHERE a = b");
        assert!(matches!(p["t"].as_slice(), [Predicate::Other { .. }]));
    }

    #[test]
    fn disjunctions_are_other() {
        let p = predicates("SELECT a FROM t WHERE a = 1 OR a = 2");
        assert!(matches!(p["t"].as_slice(), [Predicate::Other { .. }]));
    }

    #[test]
    fn cross_table_conjuncts_are_skipped() {
        let p = predicates(
            "SELECT s.a FROM s INNER JOIN r ON s.k = r.k WHERE s.a = 1 AND s.b = r.b",
        );
        let s = &p["s"];
        assert_eq!(s.len(), 1, "{s:?}");
        assert!(matches!(s[0], Predicate::Eq { .. }));
        assert!(!p.contains_key("r"));
    }

    #[test]
    fn self_joined_tables_get_no_predicates() {
        let p = predicates(
            "SELECT a.x FROM t AS a INNER JOIN t AS b ON a.k = b.k WHERE a.x = 1",
        );
        assert!(p.is_empty(), "{p:?}");
    }
}
