// crates/fleet-checkin-core/src/core/query.rs
// ============================================================================
// Module: Fleet Check-in Filter Query Translator
// Description: Translates validated filters into aggregate predicates.
// Purpose: Define one predicate per filter, rendered to SQL or evaluated in memory.
// Dependencies: crate::core::{filter, time}
// ============================================================================

//! ## Overview
//! A [`FilterPredicate`] is a conjunction of strict inequalities over the
//! per-cluster aggregates of the check-in store: first check-in (`MIN`),
//! last check-in (`MAX`), and check-in count. The same predicate renders to a
//! parameterized `HAVING` clause for relational stores and evaluates against
//! [`CheckinStats`] for in-memory stores, so both backends share one
//! definition of every bound. A cluster without check-ins has no aggregates
//! and never matches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use crate::core::filter::ClusterAgeFilter;
use crate::core::filter::ClusterCheckinsFilter;
use crate::core::filter::PersistentClustersFilter;
use crate::core::filter::TimeFilter;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Check-in Store Layout
// ============================================================================

/// Check-in table name.
pub const CHECKINS_TABLE: &str = "checkins";
/// Check-in column holding the cluster identifier.
pub const CHECKIN_CLUSTER_COLUMN: &str = "cluster_id";
/// Check-in column holding the observation instant (unix nanoseconds).
pub const CHECKIN_TIME_COLUMN: &str = "created_at";

// ============================================================================
// SECTION: Predicate Terms
// ============================================================================

/// Per-cluster aggregate over check-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Earliest check-in instant.
    FirstCheckin,
    /// Latest check-in instant.
    LastCheckin,
    /// Number of check-ins.
    CheckinCount,
}

impl Aggregate {
    /// Returns the SQL aggregate expression.
    #[must_use]
    pub fn sql(self) -> String {
        match self {
            Self::FirstCheckin => format!("MIN({CHECKIN_TIME_COLUMN})"),
            Self::LastCheckin => format!("MAX({CHECKIN_TIME_COLUMN})"),
            Self::CheckinCount => "COUNT(*)".to_string(),
        }
    }
}

/// Strict comparison between an aggregate and its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `aggregate > operand`.
    GreaterThan,
    /// `aggregate < operand`.
    LessThan,
}

impl Comparison {
    /// Returns the SQL operator.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
        }
    }

    /// Applies the comparison.
    #[must_use]
    pub fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::LessThan => left < right,
        }
    }
}

/// Right-hand side of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// An instant bound.
    Instant(Timestamp),
    /// A count bound.
    Count(i64),
}

impl Operand {
    /// Returns the value bound as a SQL parameter.
    #[must_use]
    pub const fn sql_value(self) -> i64 {
        match self {
            Self::Instant(at) => at.unix_nanos(),
            Self::Count(count) => count,
        }
    }
}

/// One inequality of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateTerm {
    /// Aggregate on the left-hand side.
    pub aggregate: Aggregate,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Bound on the right-hand side.
    pub operand: Operand,
}

impl AggregateTerm {
    /// Builds a term.
    #[must_use]
    pub const fn new(aggregate: Aggregate, comparison: Comparison, operand: Operand) -> Self {
        Self {
            aggregate,
            comparison,
            operand,
        }
    }
}

// ============================================================================
// SECTION: Check-in Aggregates
// ============================================================================

/// Aggregates of one cluster's check-ins.
///
/// # Invariants
/// - `first <= last` and `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckinStats {
    /// Earliest check-in.
    pub first: Timestamp,
    /// Latest check-in.
    pub last: Timestamp,
    /// Number of check-ins.
    pub count: u64,
}

impl CheckinStats {
    /// Folds check-in instants into aggregates; `None` when there are none.
    pub fn from_instants<I: IntoIterator<Item = Timestamp>>(instants: I) -> Option<Self> {
        instants.into_iter().fold(None, |stats, at| {
            Some(match stats {
                None => Self {
                    first: at,
                    last: at,
                    count: 1,
                },
                Some(stats) => Self {
                    first: stats.first.min(at),
                    last: stats.last.max(at),
                    count: stats.count.saturating_add(1),
                },
            })
        })
    }

    /// Returns the value of an aggregate.
    #[must_use]
    pub fn value(&self, aggregate: Aggregate) -> i64 {
        match aggregate {
            Aggregate::FirstCheckin => self.first.unix_nanos(),
            Aggregate::LastCheckin => self.last.unix_nanos(),
            Aggregate::CheckinCount => i64::try_from(self.count).unwrap_or(i64::MAX),
        }
    }
}

// ============================================================================
// SECTION: Filter Predicate
// ============================================================================

/// Conjunction of aggregate terms for one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPredicate {
    /// Terms joined by `AND`.
    terms: Vec<AggregateTerm>,
}

impl FilterPredicate {
    /// Returns the terms in parameter order.
    #[must_use]
    pub fn terms(&self) -> &[AggregateTerm] {
        &self.terms
    }

    /// Renders the `HAVING` condition with numbered parameters starting at
    /// `first_param`.
    #[must_use]
    pub fn having_clause(&self, first_param: usize) -> String {
        let mut clause = String::new();
        for (offset, term) in self.terms.iter().enumerate() {
            if offset > 0 {
                clause.push_str(" AND ");
            }
            let _ = write!(
                clause,
                "{} {} ?{}",
                term.aggregate.sql(),
                term.comparison.sql(),
                first_param + offset
            );
        }
        clause
    }

    /// Returns the bound parameter values in term order.
    #[must_use]
    pub fn sql_params(&self) -> Vec<i64> {
        self.terms.iter().map(|term| term.operand.sql_value()).collect()
    }

    /// Renders a query selecting the matching cluster identifiers.
    #[must_use]
    pub fn matching_clusters_sql(&self) -> String {
        format!(
            "SELECT {CHECKIN_CLUSTER_COLUMN} FROM {CHECKINS_TABLE} GROUP BY \
             {CHECKIN_CLUSTER_COLUMN} HAVING {}",
            self.having_clause(1)
        )
    }

    /// Evaluates the predicate against a cluster's aggregates.
    ///
    /// `None` (no check-ins) never matches.
    #[must_use]
    pub fn matches(&self, stats: Option<&CheckinStats>) -> bool {
        let Some(stats) = stats else {
            return false;
        };
        self.terms.iter().all(|term| {
            term.comparison.holds(stats.value(term.aggregate), term.operand.sql_value())
        })
    }
}

/// Translation of a filter into its predicate.
pub trait ToPredicate {
    /// Builds the predicate.
    fn predicate(&self) -> FilterPredicate;
}

impl ToPredicate for ClusterAgeFilter {
    fn predicate(&self) -> FilterPredicate {
        FilterPredicate {
            terms: vec![
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::GreaterThan,
                    Operand::Instant(self.created_after()),
                ),
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::LessThan,
                    Operand::Instant(self.created_before()),
                ),
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::GreaterThan,
                    Operand::Instant(self.checked_in_after()),
                ),
                AggregateTerm::new(
                    Aggregate::LastCheckin,
                    Comparison::LessThan,
                    Operand::Instant(self.checked_in_before()),
                ),
            ],
        }
    }
}

impl ToPredicate for ClusterCheckinsFilter {
    fn predicate(&self) -> FilterPredicate {
        FilterPredicate {
            terms: vec![
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::GreaterThan,
                    Operand::Instant(self.created_after()),
                ),
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::LessThan,
                    Operand::Instant(self.created_before()),
                ),
            ],
        }
    }
}

impl ToPredicate for PersistentClustersFilter {
    fn predicate(&self) -> FilterPredicate {
        FilterPredicate {
            terms: vec![
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::GreaterThan,
                    Operand::Instant(self.epoch()),
                ),
                AggregateTerm::new(
                    Aggregate::FirstCheckin,
                    Comparison::LessThan,
                    Operand::Instant(self.timestamp()),
                ),
                AggregateTerm::new(Aggregate::CheckinCount, Comparison::GreaterThan, Operand::Count(1)),
                AggregateTerm::new(
                    Aggregate::LastCheckin,
                    Comparison::GreaterThan,
                    Operand::Instant(self.relative_yesterday()),
                ),
            ],
        }
    }
}

impl ToPredicate for TimeFilter {
    fn predicate(&self) -> FilterPredicate {
        match self {
            Self::ClusterAge(filter) => filter.predicate(),
            Self::ClusterCheckins(filter) => filter.predicate(),
            Self::PersistentClusters(filter) => filter.predicate(),
        }
    }
}
