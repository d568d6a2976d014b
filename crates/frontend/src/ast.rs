//! Closed AST for the routed SELECT subset.
//!
//! The dynamic expression typing of general SQL is replaced by one tagged
//! variant per node kind; every downstream pass (optimizer, canonicalizer,
//! feature and predicate extraction) is an exhaustive match over these types.

use qrx_common::Literal;

/// Column reference, optionally qualified by a table binding (alias or table
/// name). The analyzer qualifies every resolvable column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Binding the column belongs to, once resolved.
    pub relation: Option<String>,
    /// Lowercased column name.
    pub name: String,
}

impl ColumnRef {
    /// Unqualified column.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            relation: None,
            name: name.into(),
        }
    }

    /// Column qualified with a binding.
    pub fn qualified(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            name: name.into(),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Logical negation of the operator, used by `NOT` normalization.
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Lt => Self::GtEq,
            Self::LtEq => Self::Gt,
            Self::Gt => Self::LtEq,
            Self::GtEq => Self::Lt,
        }
    }

    /// Mirror of the operator with its operands swapped.
    pub fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    /// Canonical SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
}

impl ArithOp {
    /// Canonical SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// Sort expression.
    pub expr: ScalarExpr,
    /// Ascending when true.
    pub asc: bool,
}

/// Scalar expression over the routed subset.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    /// Column reference.
    Column(ColumnRef),
    /// Typed literal.
    Literal(Literal),
    /// `*` (only valid as a projection item or COUNT argument).
    Wildcard,
    /// Comparison between two scalars.
    Compare {
        /// Left operand.
        left: Box<ScalarExpr>,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        right: Box<ScalarExpr>,
    },
    /// Arithmetic between two scalars.
    Arith {
        /// Left operand.
        left: Box<ScalarExpr>,
        /// Operator.
        op: ArithOp,
        /// Right operand.
        right: Box<ScalarExpr>,
    },
    /// Logical conjunction.
    And(Box<ScalarExpr>, Box<ScalarExpr>),
    /// Logical disjunction.
    Or(Box<ScalarExpr>, Box<ScalarExpr>),
    /// Logical negation.
    Not(Box<ScalarExpr>),
    /// `expr IS NULL`.
    IsNull(Box<ScalarExpr>),
    /// `expr IS NOT NULL`.
    IsNotNull(Box<ScalarExpr>),
    /// `expr IN (list)` / `expr NOT IN (list)`.
    InList {
        /// Probe expression.
        expr: Box<ScalarExpr>,
        /// Member expressions.
        list: Vec<ScalarExpr>,
        /// Negated form.
        negated: bool,
    },
    /// Scalar or aggregate function call.
    Function {
        /// Lowercased function name.
        name: String,
        /// Argument expressions.
        args: Vec<ScalarExpr>,
        /// `DISTINCT` argument qualifier (aggregates only).
        distinct: bool,
    },
    /// Function call with an `OVER` clause.
    WindowFunction {
        /// Lowercased function name.
        name: String,
        /// Argument expressions.
        args: Vec<ScalarExpr>,
        /// `PARTITION BY` expressions.
        partition_by: Vec<ScalarExpr>,
        /// `ORDER BY` keys inside the window.
        order_by: Vec<OrderKey>,
    },
}

impl ScalarExpr {
    /// Boolean literal shorthand.
    pub fn boolean(v: bool) -> Self {
        Self::Literal(Literal::Boolean(v))
    }

    /// Whether this is the literal `TRUE`.
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Literal(Literal::Boolean(true)))
    }

    /// Whether this is the literal `FALSE`.
    pub fn is_false(&self) -> bool {
        matches!(self, Self::Literal(Literal::Boolean(false)))
    }

    /// Collect every column reference in the expression.
    pub fn columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Self::Column(c) => out.push(c),
            Self::Literal(_) | Self::Wildcard => {}
            Self::Compare { left, right, .. } | Self::Arith { left, right, .. } => {
                left.columns(out);
                right.columns(out);
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.columns(out);
                b.columns(out);
            }
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.columns(out),
            Self::InList { expr, list, .. } => {
                expr.columns(out);
                for e in list {
                    e.columns(out);
                }
            }
            Self::Function { args, .. } => {
                for a in args {
                    a.columns(out);
                }
            }
            Self::WindowFunction {
                args,
                partition_by,
                order_by,
                ..
            } => {
                for a in args {
                    a.columns(out);
                }
                for p in partition_by {
                    p.columns(out);
                }
                for k in order_by {
                    k.expr.columns(out);
                }
            }
        }
    }

    /// Distinct bindings referenced by the expression's columns, where known.
    pub fn referenced_bindings(&self) -> Vec<String> {
        let mut cols = Vec::new();
        self.columns(&mut cols);
        let mut out: Vec<String> = cols
            .into_iter()
            .filter_map(|c| c.relation.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// One SELECT-list item.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// Projected expression.
    pub expr: ScalarExpr,
    /// Optional output alias.
    pub alias: Option<String>,
}

/// Join types the router accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL JOIN`
    Full,
}

impl JoinType {
    /// Canonical SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

/// A scanned relation plus the scan-level rewrites the optimizer attaches.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Lowercased catalog table name.
    pub table: String,
    /// Optional binding alias.
    pub alias: Option<String>,
    /// Single-table conjuncts pushed down onto this scan.
    pub filters: Vec<ScalarExpr>,
    /// Columns this scan must produce, when projection pruning resolved them.
    pub projection: Option<Vec<String>>,
}

impl TableRef {
    /// New unannotated reference.
    pub fn new(table: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            table: table.into(),
            alias,
            filters: Vec::new(),
            projection: None,
        }
    }

    /// The name columns are qualified with: the alias when present, the table
    /// name otherwise.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// One JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    /// Joined relation.
    pub relation: TableRef,
    /// Join type.
    pub join_type: JoinType,
    /// `ON` condition.
    pub on: ScalarExpr,
}

/// Routed query shape:
/// `SELECT ... FROM t [JOIN ...] [WHERE] [GROUP BY] [HAVING] [ORDER BY] [LIMIT]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAst {
    /// SELECT-list items.
    pub projection: Vec<SelectItem>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// First FROM relation.
    pub from: TableRef,
    /// Remaining joined relations, in declaration order.
    pub joins: Vec<JoinClause>,
    /// Residual WHERE conjuncts not pushed onto a scan.
    pub filter: Option<ScalarExpr>,
    /// GROUP BY expressions.
    pub group_by: Vec<ScalarExpr>,
    /// HAVING condition.
    pub having: Option<ScalarExpr>,
    /// ORDER BY keys.
    pub order_by: Vec<OrderKey>,
    /// Constant LIMIT.
    pub limit: Option<u64>,
}

impl QueryAst {
    /// All table references in FROM order.
    pub fn table_refs(&self) -> Vec<&TableRef> {
        let mut v = vec![&self.from];
        v.extend(self.joins.iter().map(|j| &j.relation));
        v
    }

    /// Mutable variant of [`QueryAst::table_refs`].
    pub fn table_refs_mut(&mut self) -> Vec<&mut TableRef> {
        let mut v = vec![&mut self.from];
        v.extend(self.joins.iter_mut().map(|j| &mut j.relation));
        v
    }

    /// Binding for a table reference by binding name.
    pub fn table_for_binding(&self, binding: &str) -> Option<&TableRef> {
        self.table_refs().into_iter().find(|t| t.binding() == binding)
    }
}

/// Append the conjuncts of an `AND` chain to `out`, left to right.
pub fn split_conjuncts(e: &ScalarExpr, out: &mut Vec<ScalarExpr>) {
    match e {
        ScalarExpr::And(a, b) => {
            split_conjuncts(a, out);
            split_conjuncts(b, out);
        }
        other => out.push(other.clone()),
    }
}

/// Append the disjuncts of an `OR` chain to `out`, left to right.
pub fn split_disjuncts(e: &ScalarExpr, out: &mut Vec<ScalarExpr>) {
    match e {
        ScalarExpr::Or(a, b) => {
            split_disjuncts(a, out);
            split_disjuncts(b, out);
        }
        other => out.push(other.clone()),
    }
}

/// Rebuild a left-deep `AND` chain from conjuncts; `None` when empty.
pub fn conjoin(parts: Vec<ScalarExpr>) -> Option<ScalarExpr> {
    let mut iter = parts.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, e| ScalarExpr::And(Box::new(acc), Box::new(e))))
}

/// Rebuild a left-deep `OR` chain from disjuncts; `None` when empty.
pub fn disjoin(parts: Vec<ScalarExpr>) -> Option<ScalarExpr> {
    let mut iter = parts.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, e| ScalarExpr::Or(Box::new(acc), Box::new(e))))
}
