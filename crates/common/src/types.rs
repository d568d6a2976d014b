//! Shared value, type, and predicate model used by the frontend, pruner,
//! selector, and cache layers.

use std::cmp::Ordering;
use std::fmt;

use arrow_schema::{DataType, TimeUnit};
use serde::{Deserialize, Serialize};

/// Logical column types surfaced in catalog schemas and result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating value.
    Float64,
    /// Boolean value.
    Bool,
    /// UTF-8 text value.
    String,
    /// Calendar date stored as days since the Unix epoch.
    Date,
    /// Timestamp stored as nanoseconds since the Unix epoch.
    TimestampNs,
    /// Absent value.
    Null,
}

impl LogicalType {
    /// Arrow representation for this logical type.
    pub fn to_arrow(self) -> DataType {
        match self {
            Self::Int64 => DataType::Int64,
            Self::Float64 => DataType::Float64,
            Self::Bool => DataType::Boolean,
            Self::String => DataType::Utf8,
            Self::Date => DataType::Date32,
            Self::TimestampNs => DataType::Timestamp(TimeUnit::Nanosecond, None),
            Self::Null => DataType::Null,
        }
    }

    /// Logical type for an arrow type, if it maps onto one.
    pub fn from_arrow(dt: &DataType) -> Option<Self> {
        match dt {
            DataType::Int64 => Some(Self::Int64),
            DataType::Float64 => Some(Self::Float64),
            DataType::Boolean => Some(Self::Bool),
            DataType::Utf8 | DataType::LargeUtf8 => Some(Self::String),
            DataType::Date32 => Some(Self::Date),
            DataType::Timestamp(TimeUnit::Nanosecond, None) => Some(Self::TimestampNs),
            DataType::Null => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Date => "date",
            Self::TimestampNs => "timestamp_ns",
            Self::Null => "null",
        };
        write!(f, "{s}")
    }
}

/// Typed literal value carried by predicates and canonical query text.
///
/// Ordering is defined only within a tag; [`Literal::compare`] returns `None`
/// across tags so mixed-type comparisons never silently coerce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating value.
    Float64(f64),
    /// Boolean value.
    Boolean(bool),
    /// UTF-8 text value.
    Utf8(String),
    /// Days since the Unix epoch.
    Date32(i32),
    /// Nanoseconds since the Unix epoch.
    TimestampNanos(i64),
}

impl Literal {
    /// The logical type tag of this literal.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Int64(_) => LogicalType::Int64,
            Self::Float64(_) => LogicalType::Float64,
            Self::Boolean(_) => LogicalType::Bool,
            Self::Utf8(_) => LogicalType::String,
            Self::Date32(_) => LogicalType::Date,
            Self::TimestampNanos(_) => LogicalType::TimestampNs,
        }
    }

    /// Parse a partition string value into the given tag.
    ///
    /// Returns `None` when the text does not form a value of that type; the
    /// pruner then retains the partition and records a coercion warning.
    pub fn parse_as(tag: LogicalType, s: &str) -> Option<Literal> {
        match tag {
            LogicalType::Int64 => s.parse::<i64>().ok().map(Literal::Int64),
            LogicalType::Float64 => s.parse::<f64>().ok().map(Literal::Float64),
            LogicalType::Bool => match s.to_ascii_lowercase().as_str() {
                "true" => Some(Literal::Boolean(true)),
                "false" => Some(Literal::Boolean(false)),
                _ => None,
            },
            LogicalType::String => Some(Literal::Utf8(s.to_string())),
            LogicalType::Date => parse_date(s).map(Literal::Date32),
            LogicalType::TimestampNs => s
                .parse::<i64>()
                .ok()
                .map(Literal::TimestampNanos)
                .or_else(|| {
                    parse_date(s).map(|d| Literal::TimestampNanos(i64::from(d) * NANOS_PER_DAY))
                }),
            LogicalType::Null => None,
        }
    }

    /// Compare two literals of the same tag; `None` across tags.
    pub fn compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::Date32(a), Self::Date32(b)) => Some(a.cmp(b)),
            (Self::TimestampNanos(a), Self::TimestampNanos(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Canonical SQL spelling: integers without leading zeros, dates as
    /// `'YYYY-MM-DD'`, strings single-quoted with doubled internal quotes.
    pub fn canonical(&self) -> String {
        match self {
            Self::Int64(v) => v.to_string(),
            Self::Float64(v) => v.to_string(),
            Self::Boolean(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Self::Utf8(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Date32(d) => format!("'{}'", format_date(*d)),
            Self::TimestampNanos(ns) => ns.to_string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Parse `YYYY-MM-DD` into days since the Unix epoch.
pub fn parse_date(s: &str) -> Option<i32> {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let y: i32 = s[0..4].parse().ok()?;
    let m: u32 = s[5..7].parse().ok()?;
    let d: u32 = s[8..10].parse().ok()?;
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    Some(days_from_civil(y, m, d))
}

/// Render days since the Unix epoch as `YYYY-MM-DD`.
pub fn format_date(days: i32) -> String {
    let (y, m, d) = civil_from_days(days);
    format!("{y:04}-{m:02}-{d:02}")
}

// Proleptic Gregorian conversions (Howard Hinnant's civil-days algorithm).
fn days_from_civil(mut y: i32, m: u32, d: u32) -> i32 {
    y -= i32::from(m <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i32 - 719_468
}

fn civil_from_days(z: i32) -> (i32, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i32 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (y + i32::from(m <= 2), m, d)
}

/// A normalized WHERE conjunct as seen by the partition pruner.
///
/// Each variant names exactly one column of exactly one referenced table;
/// conjuncts that do not fit (multiple columns, functions, subqueries) are
/// preserved as [`Predicate::Other`] and ignored during pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`.
    Eq {
        /// Unqualified column name.
        column: String,
        /// Right-hand literal.
        value: Literal,
    },
    /// `column <> value`.
    Neq {
        /// Unqualified column name.
        column: String,
        /// Right-hand literal.
        value: Literal,
    },
    /// `column` constrained to an interval; either bound may be absent.
    Range {
        /// Unqualified column name.
        column: String,
        /// Lower bound, if any.
        lo: Option<Literal>,
        /// Upper bound, if any.
        hi: Option<Literal>,
        /// Whether the lower bound is inclusive.
        lo_inclusive: bool,
        /// Whether the upper bound is inclusive.
        hi_inclusive: bool,
    },
    /// `column IN (...)`.
    In {
        /// Unqualified column name.
        column: String,
        /// Member literals; tags may be mixed, comparisons stay same-tag.
        values: Vec<Literal>,
    },
    /// `column IS NULL`.
    IsNull {
        /// Unqualified column name.
        column: String,
    },
    /// `column IS NOT NULL`.
    IsNotNull {
        /// Unqualified column name.
        column: String,
    },
    /// Conjunct preserved for the executor but opaque to pruning.
    Other {
        /// Display text of the original conjunct.
        text: String,
    },
}

impl Predicate {
    /// Column this predicate constrains, if it constrains exactly one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::Range { column, .. }
            | Self::In { column, .. }
            | Self::IsNull { column }
            | Self::IsNotNull { column } => Some(column),
            Self::Other { .. } => None,
        }
    }

    /// Whether the pruner can evaluate this predicate against partition keys.
    pub fn prunable(&self) -> bool {
        !matches!(self, Self::Other { .. })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { column, value } => write!(f, "{column} = {value}"),
            Self::Neq { column, value } => write!(f, "{column} <> {value}"),
            Self::Range {
                column,
                lo,
                hi,
                lo_inclusive,
                hi_inclusive,
            } => {
                let mut parts = Vec::new();
                if let Some(lo) = lo {
                    parts.push(format!(
                        "{column} {} {lo}",
                        if *lo_inclusive { ">=" } else { ">" }
                    ));
                }
                if let Some(hi) = hi {
                    parts.push(format!(
                        "{column} {} {hi}",
                        if *hi_inclusive { "<=" } else { "<" }
                    ));
                }
                write!(f, "{}", parts.join(" AND "))
            }
            Self::In { column, values } => {
                let vals = values
                    .iter()
                    .map(Literal::canonical)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{column} IN ({vals})")
            }
            Self::IsNull { column } => write!(f, "{column} IS NULL"),
            Self::IsNotNull { column } => write!(f, "{column} IS NOT NULL"),
            Self::Other { text } => write!(f, "{text}"),
        }
    }
}

/// The execution backends the router can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vectorized single-node engine: lowest startup, tightest memory.
    Vectorized,
    /// Parallel single-node engine.
    Parallel,
    /// Distributed cluster engine: high startup, unbounded memory.
    Distributed,
}

impl BackendKind {
    /// All kinds in selection tie-break order.
    pub const ALL: [BackendKind; 3] = [Self::Vectorized, Self::Parallel, Self::Distributed];

    /// Stable lowercase name used in metrics labels and reasons.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vectorized => "vectorized",
            Self::Parallel => "parallel",
            Self::Distributed => "distributed",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{format_date, parse_date, Literal, LogicalType, Predicate};

    #[test]
    fn date_round_trip() {
        for s in ["1970-01-01", "2024-11-01", "2024-02-29", "1969-12-31"] {
            let days = parse_date(s).expect("parse");
            assert_eq!(format_date(days), s);
        }
        assert_eq!(parse_date("1970-01-01"), Some(0));
        assert_eq!(parse_date("1970-01-02"), Some(1));
        assert_eq!(parse_date("1969-12-31"), Some(-1));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_date("2024-13-01"), None);
        assert_eq!(parse_date("2024-11-1"), None);
        assert_eq!(parse_date("not-a-date"), None);
    }

    #[test]
    fn comparison_is_within_tag_only() {
        let a = Literal::Int64(3);
        let b = Literal::Float64(3.0);
        assert_eq!(a.compare(&b), None);
        assert_eq!(a.compare(&Literal::Int64(4)), Some(Ordering::Less));
        assert_eq!(
            Literal::Utf8("2024-11-03".into()).compare(&Literal::Utf8("2024-11-07".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn typed_parse_follows_predicate_tag() {
        assert_eq!(
            Literal::parse_as(LogicalType::Int64, "42"),
            Some(Literal::Int64(42))
        );
        assert_eq!(Literal::parse_as(LogicalType::Int64, "forty-two"), None);
        assert_eq!(
            Literal::parse_as(LogicalType::Date, "2024-11-05"),
            Some(Literal::Date32(parse_date("2024-11-05").unwrap()))
        );
    }

    #[test]
    fn canonical_literal_spellings() {
        assert_eq!(Literal::Int64(7).canonical(), "7");
        assert_eq!(Literal::Boolean(true).canonical(), "TRUE");
        assert_eq!(Literal::Utf8("o'neil".into()).canonical(), "'o''neil'");
        assert_eq!(
            Literal::Date32(parse_date("2024-11-01").unwrap()).canonical(),
            "'2024-11-01'"
        );
    }

    #[test]
    fn range_predicate_displays_both_bounds() {
        let p = Predicate::Range {
            column: "date".into(),
            lo: Some(Literal::Utf8("2024-11-01".into())),
            hi: Some(Literal::Utf8("2024-11-07".into())),
            lo_inclusive: true,
            hi_inclusive: true,
        };
        assert_eq!(format!("{p}"), "date >= '2024-11-01' AND date <= '2024-11-07'");
    }
}
