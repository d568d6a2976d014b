//! Deterministic canonical text rendering.
//!
//! The canonical text is the cache-key component, so the rendering must be a
//! function of the query's equivalence class: columns are alias-qualified,
//! `AND`/`OR` operands render in sorted order, whitespace is single spaces,
//! keywords are uppercase, identifiers lowercase, and literal spellings come
//! from [`qrx_common::Literal::canonical`].

use crate::ast::{
    split_conjuncts, split_disjuncts, OrderKey, QueryAst, ScalarExpr, SelectItem, TableRef,
};

// Precedence levels for paren-free rendering of nested expressions.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_CMP: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_ATOM: u8 = 7;

/// Render a whole query in canonical form.
pub fn canonical_text(ast: &QueryAst) -> String {
    let mut out = String::from("SELECT ");
    if ast.distinct {
        out.push_str("DISTINCT ");
    }
    out.push_str(
        &ast.projection
            .iter()
            .map(select_item_text)
            .collect::<Vec<_>>()
            .join(", "),
    );

    out.push_str(" FROM ");
    out.push_str(&table_text(&ast.from));
    for j in &ast.joins {
        out.push(' ');
        out.push_str(j.join_type.sql());
        out.push(' ');
        out.push_str(&table_text(&j.relation));
        out.push_str(" ON ");
        out.push_str(&expr_text(&j.on));
    }

    let conjuncts = all_where_conjuncts(ast);
    if !conjuncts.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&conjuncts.join(" AND "));
    }

    if !ast.group_by.is_empty() {
        out.push_str(" GROUP BY ");
        out.push_str(
            &ast.group_by
                .iter()
                .map(expr_text)
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    if let Some(h) = &ast.having {
        out.push_str(" HAVING ");
        out.push_str(&expr_text(h));
    }
    if !ast.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        out.push_str(
            &ast.order_by
                .iter()
                .map(order_key_text)
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    if let Some(n) = ast.limit {
        out.push_str(&format!(" LIMIT {n}"));
    }
    out
}

/// Every WHERE conjunct of the query — scan-pushed and residual — rendered
/// and sorted. Sorting here makes the text independent of how far the
/// optimizer has already rewritten the tree.
fn all_where_conjuncts(ast: &QueryAst) -> Vec<String> {
    let mut parts = Vec::new();
    for t in ast.table_refs() {
        for f in &t.filters {
            parts.push(f.clone());
        }
    }
    if let Some(filter) = &ast.filter {
        split_conjuncts(filter, &mut parts);
    }
    // Conjuncts render in AND context so a disjunction keeps its parens.
    let mut rendered: Vec<String> = parts.iter().map(|p| render(p, PREC_AND + 1)).collect();
    rendered.sort();
    rendered.dedup();
    rendered
}

fn select_item_text(item: &SelectItem) -> String {
    match &item.alias {
        Some(a) => format!("{} AS {a}", expr_text(&item.expr)),
        None => expr_text(&item.expr),
    }
}

fn table_text(t: &TableRef) -> String {
    match &t.alias {
        Some(a) => format!("{} AS {a}", t.table),
        None => t.table.clone(),
    }
}

fn order_key_text(k: &OrderKey) -> String {
    format!(
        "{} {}",
        expr_text(&k.expr),
        if k.asc { "ASC" } else { "DESC" }
    )
}

/// Render one expression in canonical form.
pub fn expr_text(e: &ScalarExpr) -> String {
    render(e, 0)
}

fn render(e: &ScalarExpr, parent_prec: u8) -> String {
    let (text, prec) = match e {
        ScalarExpr::Column(c) => (
            match &c.relation {
                Some(rel) => format!("{rel}.{}", c.name),
                None => c.name.clone(),
            },
            PREC_ATOM,
        ),
        ScalarExpr::Literal(v) => (v.canonical(), PREC_ATOM),
        ScalarExpr::Wildcard => ("*".to_string(), PREC_ATOM),
        ScalarExpr::Compare { left, op, right } => (
            format!(
                "{} {} {}",
                render(left, PREC_CMP + 1),
                op.sql(),
                render(right, PREC_CMP + 1)
            ),
            PREC_CMP,
        ),
        ScalarExpr::Arith { left, op, right } => {
            let prec = match op {
                crate::ast::ArithOp::Plus | crate::ast::ArithOp::Minus => PREC_ADD,
                crate::ast::ArithOp::Multiply | crate::ast::ArithOp::Divide => PREC_MUL,
            };
            // Left-associative chains render paren-free; the right operand of
            // `-` and `/` keeps parens at equal precedence.
            let assoc = matches!(
                op,
                crate::ast::ArithOp::Plus | crate::ast::ArithOp::Multiply
            );
            let right_prec = if assoc { prec } else { prec + 1 };
            (
                format!(
                    "{} {} {}",
                    render(left, prec),
                    op.sql(),
                    render(right, right_prec)
                ),
                prec,
            )
        }
        ScalarExpr::And(_, _) => {
            let mut parts = Vec::new();
            split_conjuncts(e, &mut parts);
            let mut rendered: Vec<String> =
                parts.iter().map(|p| render(p, PREC_AND + 1)).collect();
            rendered.sort();
            rendered.dedup();
            (rendered.join(" AND "), PREC_AND)
        }
        ScalarExpr::Or(_, _) => {
            let mut parts = Vec::new();
            split_disjuncts(e, &mut parts);
            let mut rendered: Vec<String> = parts.iter().map(|p| render(p, PREC_OR + 1)).collect();
            rendered.sort();
            rendered.dedup();
            (rendered.join(" OR "), PREC_OR)
        }
        ScalarExpr::Not(inner) => (format!("NOT {}", render(inner, PREC_NOT + 1)), PREC_NOT),
        ScalarExpr::IsNull(inner) => {
            (format!("{} IS NULL", render(inner, PREC_ATOM)), PREC_CMP)
        }
        ScalarExpr::IsNotNull(inner) => (
            format!("{} IS NOT NULL", render(inner, PREC_ATOM)),
            PREC_CMP,
        ),
        ScalarExpr::InList {
            expr,
            list,
            negated,
        } => {
            let members = list
                .iter()
                .map(|m| render(m, 0))
                .collect::<Vec<_>>()
                .join(", ");
            (
                format!(
                    "{} {}IN ({members})",
                    render(expr, PREC_ATOM),
                    if *negated { "NOT " } else { "" }
                ),
                PREC_CMP,
            )
        }
        ScalarExpr::Function {
            name,
            args,
            distinct,
        } => (
            format!(
                "{}({}{})",
                name.to_ascii_uppercase(),
                if *distinct { "DISTINCT " } else { "" },
                args.iter().map(|a| render(a, 0)).collect::<Vec<_>>().join(", ")
            ),
            PREC_ATOM,
        ),
        ScalarExpr::WindowFunction {
            name,
            args,
            partition_by,
            order_by,
        } => {
            let mut over = String::new();
            if !partition_by.is_empty() {
                over.push_str("PARTITION BY ");
                over.push_str(
                    &partition_by
                        .iter()
                        .map(|p| render(p, 0))
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            if !order_by.is_empty() {
                if !over.is_empty() {
                    over.push(' ');
                }
                over.push_str("ORDER BY ");
                over.push_str(
                    &order_by
                        .iter()
                        .map(order_key_text)
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            (
                format!(
                    "{}({}) OVER ({over})",
                    name.to_ascii_uppercase(),
                    args.iter().map(|a| render(a, 0)).collect::<Vec<_>>().join(", ")
                ),
                PREC_ATOM,
            )
        }
    };
    if prec < parent_prec {
        format!("({text})")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use qrx_common::SqlDialect;

    use crate::analyzer::Analyzer;
    use crate::NoSchemas;

    fn canon(sql: &str) -> String {
        let analyzed = Analyzer::new(SqlDialect::Generic)
            .analyze(sql, &NoSchemas)
            .expect("analyze");
        analyzed.canonical_text
    }

    #[test]
    fn whitespace_and_case_do_not_matter() {
        let a = canon("select  Region, SUM(Amount)   from Sales where Date >= '2024-11-01'");
        let b = canon("SELECT region, sum(amount) FROM sales WHERE date >= '2024-11-01'");
        assert_eq!(a, b);
        assert!(a.contains("SUM(sales.amount)"), "{a}");
    }

    #[test]
    fn conjunct_order_does_not_matter() {
        let a = canon(
            "SELECT region FROM sales WHERE date >= '2024-11-01' AND date <= '2024-11-07'",
        );
        let b = canon(
            "SELECT region FROM sales WHERE date <= '2024-11-07' AND date >= '2024-11-01'",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn associative_parenthesization_does_not_matter() {
        let a = canon("SELECT a FROM t WHERE (a = 1 AND b = 2) AND c = 3");
        let b = canon("SELECT a FROM t WHERE a = 1 AND (b = 2 AND c = 3)");
        assert_eq!(a, b);
        let c = canon("SELECT a FROM t WHERE (a = 1 OR b = 2) OR c = 3");
        let d = canon("SELECT a FROM t WHERE a = 1 OR (b = 2 OR c = 3)");
        assert_eq!(c, d);
    }

    #[test]
    fn columns_are_qualified_and_literals_normalized() {
        let text = canon("SELECT amount FROM sales WHERE qty = 007");
        assert_eq!(
            text,
            "SELECT sales.amount FROM sales WHERE sales.qty = 7"
        );
    }

    #[test]
    fn between_and_explicit_range_share_canonical_text() {
        let a = canon("SELECT a FROM t WHERE a BETWEEN 1 AND 5");
        let b = canon("SELECT a FROM t WHERE a >= 1 AND a <= 5");
        assert_eq!(a, b);
    }

    #[test]
    fn alias_qualification_uses_the_alias() {
        let text = canon("SELECT s.region FROM sales AS s WHERE s.qty > 2");
        assert_eq!(text, "SELECT s.region FROM sales AS s WHERE s.qty > 2");
    }
}
