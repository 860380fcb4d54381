//! Logical operator tree consumed by the learned estimator.
//!
//! The engine's planner produces these nodes during query compilation. Only
//! the details the estimator reads are modeled: operator kind, per-kind
//! payload, the engine's cardinality estimate and the preserved baseline the
//! optimizer hook writes before rewriting estimates in place.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a planner node.
///
/// Collector maps are keyed by operator identity; an id issued from a global
/// counter stays stable when the tree is moved, which a raw address would not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId(pub u64);

static NEXT_OPERATOR_ID: AtomicU64 = AtomicU64::new(1);

impl OperatorId {
    /// Issue a fresh id.
    pub fn next() -> Self {
        Self(NEXT_OPERATOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Join type for comparison joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Mark,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
            JoinType::Semi => write!(f, "SEMI"),
            JoinType::Anti => write!(f, "ANTI"),
            JoinType::Mark => write!(f, "MARK"),
        }
    }
}

/// Comparison operator appearing in filters and join conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKind {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqualTo,
    GreaterThanOrEqualTo,
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonKind::Equal => write!(f, "EQUAL"),
            ComparisonKind::NotEqual => write!(f, "NOTEQUAL"),
            ComparisonKind::LessThan => write!(f, "LESSTHAN"),
            ComparisonKind::GreaterThan => write!(f, "GREATERTHAN"),
            ComparisonKind::LessThanOrEqualTo => write!(f, "LESSTHANOREQUALTO"),
            ComparisonKind::GreaterThanOrEqualTo => write!(f, "GREATERTHANOREQUALTO"),
        }
    }
}

/// Kind of a filter predicate expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterExpressionKind {
    Comparison(ComparisonKind),
    ConjunctionAnd,
    ConjunctionOr,
    IsNull,
    IsNotNull,
    Between,
    InList,
    Like,
    Other,
}

impl fmt::Display for FilterExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpressionKind::Comparison(cmp) => write!(f, "COMPARE_{cmp}"),
            FilterExpressionKind::ConjunctionAnd => write!(f, "CONJUNCTION_AND"),
            FilterExpressionKind::ConjunctionOr => write!(f, "CONJUNCTION_OR"),
            FilterExpressionKind::IsNull => write!(f, "IS_NULL"),
            FilterExpressionKind::IsNotNull => write!(f, "IS_NOT_NULL"),
            FilterExpressionKind::Between => write!(f, "BETWEEN"),
            FilterExpressionKind::InList => write!(f, "IN_LIST"),
            FilterExpressionKind::Like => write!(f, "LIKE"),
            FilterExpressionKind::Other => write!(f, "OTHER"),
        }
    }
}

/// A single join condition: comparison kind plus whether both sides are
/// simple column references of the same type.
#[derive(Debug, Clone, Copy)]
pub struct JoinCondition {
    pub comparison: ComparisonKind,
    /// Both sides resolve to plain column references.
    pub simple_references: bool,
    /// Left and right key expressions have the same data type.
    pub same_types: bool,
}

impl JoinCondition {
    /// An equality condition between two plain columns of the same type.
    pub fn equality() -> Self {
        Self {
            comparison: ComparisonKind::Equal,
            simple_references: true,
            same_types: true,
        }
    }
}

/// Per-kind payload of a logical operator.
#[derive(Debug, Clone)]
pub enum LogicalOperatorKind {
    /// Base table scan, possibly with pushed-down filters
    TableScan {
        table: String,
        /// Row count reported by the table function, if any
        base_cardinality: Option<u64>,
        /// Number of pushed-down table filters
        filter_count: usize,
    },
    /// Standalone filter over a child
    Filter { predicates: Vec<FilterExpressionKind> },
    /// Join with explicit comparison conditions
    ComparisonJoin {
        join_type: JoinType,
        conditions: Vec<JoinCondition>,
    },
    /// Hash aggregate / GROUP BY
    Aggregate {
        group_count: usize,
        aggregate_count: usize,
        grouping_set_count: usize,
    },
    Projection,
    Order,
    TopN { limit: u64 },
    Limit { limit: u64 },
    CrossProduct,
    Union,
    Window,
    Distinct,
}

impl LogicalOperatorKind {
    /// Stable name used in fingerprints and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalOperatorKind::TableScan { .. } => "LOGICAL_GET",
            LogicalOperatorKind::Filter { .. } => "LOGICAL_FILTER",
            LogicalOperatorKind::ComparisonJoin { .. } => "LOGICAL_COMPARISON_JOIN",
            LogicalOperatorKind::Aggregate { .. } => "LOGICAL_AGGREGATE_AND_GROUP_BY",
            LogicalOperatorKind::Projection => "LOGICAL_PROJECTION",
            LogicalOperatorKind::Order => "LOGICAL_ORDER_BY",
            LogicalOperatorKind::TopN { .. } => "LOGICAL_TOP_N",
            LogicalOperatorKind::Limit { .. } => "LOGICAL_LIMIT",
            LogicalOperatorKind::CrossProduct => "LOGICAL_CROSS_PRODUCT",
            LogicalOperatorKind::Union => "LOGICAL_UNION",
            LogicalOperatorKind::Window => "LOGICAL_WINDOW",
            LogicalOperatorKind::Distinct => "LOGICAL_DISTINCT",
        }
    }
}

/// A node of the logical plan.
#[derive(Debug, Clone)]
pub struct LogicalOperator {
    /// Identity used to key collector entries for this node
    pub id: OperatorId,
    pub kind: LogicalOperatorKind,
    /// The engine's current cardinality estimate for this node
    pub estimated_cardinality: u64,
    /// The engine's original estimate, preserved the first time the optimizer
    /// hook overwrites `estimated_cardinality`
    pub baseline_cardinality: Option<u64>,
    pub children: Vec<LogicalOperator>,
}

impl LogicalOperator {
    /// Create a leaf node with the given kind and engine estimate.
    pub fn new(kind: LogicalOperatorKind, estimated_cardinality: u64) -> Self {
        Self {
            id: OperatorId::next(),
            kind,
            estimated_cardinality,
            baseline_cardinality: None,
            children: Vec::new(),
        }
    }

    /// Attach children, builder style.
    pub fn with_children(mut self, children: Vec<LogicalOperator>) -> Self {
        self.children = children;
        self
    }

    /// The estimate planning decisions should compare against: the preserved
    /// baseline if the optimizer hook already rewrote this node, otherwise
    /// the current estimate.
    pub fn baseline_estimate(&self) -> u64 {
        self.baseline_cardinality
            .unwrap_or(self.estimated_cardinality)
    }

    /// Number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(LogicalOperator::node_count)
            .sum::<usize>()
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (est={})",
            self.kind.name(),
            self.estimated_cardinality
        )
    }
}
