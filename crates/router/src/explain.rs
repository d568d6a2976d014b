//! Human-readable rendering of an [`Explanation`].

use crate::engine::Explanation;

/// Render the query plan, pruning stats, and backend ranking as multiline
/// text.
pub fn render_explanation(ex: &Explanation) -> String {
    let mut out = String::new();
    out.push_str("Query\n");
    out.push_str(&format!("  tables=[{}]\n", ex.tables.join(", ")));
    out.push_str(&format!("  canonical: {}\n", ex.canonical_text));

    out.push_str("Features\n");
    out.push_str(&format!(
        "  joins={} aggregations={} windows={} distinct={} order_by={} limit={}\n",
        ex.features.num_joins,
        ex.features.num_aggregations,
        ex.features.num_windows,
        ex.features.has_distinct,
        ex.features.has_order_by,
        ex.features
            .limit
            .map_or("none".to_string(), |n| n.to_string()),
    ));
    out.push_str(&format!(
        "  projected_columns={} selectivity={:.4} complexity={}\n",
        ex.features.projected_columns,
        ex.features.selectivity,
        ex.features.complexity_score()
    ));

    out.push_str("Pruning\n");
    out.push_str(&format!(
        "  partitions_total={} partitions_scanned={} fraction_pruned={:.4}\n",
        ex.scan.partitions_total, ex.scan.partitions_scanned, ex.scan.fraction_pruned
    ));
    out.push_str(&format!("  bytes_scanned={}\n", ex.scan.bytes_scanned));
    for w in &ex.scan.warnings {
        out.push_str(&format!("  warning: {w}\n"));
    }

    out.push_str("Backend\n");
    out.push_str(&format!("  selected={}\n", ex.backend));
    out.push_str(&format!("  reason: {}\n", ex.reason));
    out.push_str("  candidates:\n");
    for c in &ex.candidates {
        if c.feasible {
            out.push_str(&format!(
                "    {} estimated_ms={:.1} ({})\n",
                c.kind, c.estimated_ms, c.reason
            ));
        } else {
            out.push_str(&format!("    {} INFEASIBLE ({})\n", c.kind, c.reason));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use qrx_common::BackendKind;
    use qrx_frontend::QueryFeatures;
    use qrx_selector::BackendCandidate;

    use super::render_explanation;
    use crate::engine::{Explanation, ScanSummary};

    #[test]
    fn renders_every_section() {
        let ex = Explanation {
            tables: vec!["sales".into()],
            canonical_text: "SELECT sales.region FROM sales".into(),
            features: QueryFeatures {
                num_joins: 0,
                num_aggregations: 1,
                num_windows: 0,
                has_distinct: false,
                has_order_by: false,
                limit: None,
                projected_columns: 1,
                selectivity: 0.01,
            },
            scan: ScanSummary {
                partitions_total: 30,
                partitions_scanned: 7,
                fraction_pruned: 23.0 / 30.0,
                bytes_scanned: 7 * 1024 * 1024,
                warnings: vec!["type_coercion_warning: sales.date='oops'".into()],
            },
            candidates: vec![BackendCandidate {
                kind: BackendKind::Vectorized,
                estimated_ms: 101.0,
                feasible: true,
                reason: "scan 0.01 GB".into(),
            }],
            backend: BackendKind::Vectorized,
            reason: "vectorized: scan 0.01 GB".into(),
        };
        let text = render_explanation(&ex);
        assert!(text.contains("tables=[sales]"), "{text}");
        assert!(text.contains("canonical: SELECT sales.region FROM sales"));
        assert!(text.contains("partitions_scanned=7"));
        assert!(text.contains("selected=vectorized"));
        assert!(text.contains("warning: type_coercion_warning"));
    }
}
