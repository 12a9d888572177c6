//! Join optimizer.
//!
//! Outer joins are the default for joins coming out of the query parser. When a where
//! clause declared after an outer join can never hold for a row in which the joined
//! side is missing (all of its members NULL), the outer join returns exactly the rows
//! an inner join would, and it is promoted.
//!
//! Predicates are evaluated abstractly: every subexpression is mapped to the set of
//! values it might take, out of TRUE, FALSE, NULL and "some non-boolean value". A
//! where clause whose possible values exclude TRUE filters out every NULL-extended
//! row.

use crate::clause::BodyClause;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::model::QueryModel;
use crate::source::QuerySourceId;
use quarry_core::Value;
use tracing::debug;

/// Set of values an expression may evaluate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Possible(u8);

impl Possible {
    const TRUE: Self = Self(0b0001);
    const FALSE: Self = Self(0b0010);
    const NULL: Self = Self(0b0100);
    const OTHER: Self = Self(0b1000);

    const BOOLEAN: Self = Self(Self::TRUE.0 | Self::FALSE.0);
    const UNKNOWN_BOOLEAN: Self = Self(Self::BOOLEAN.0 | Self::NULL.0);
    const ANYTHING: Self = Self(Self::UNKNOWN_BOOLEAN.0 | Self::OTHER.0);

    const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn may_be_null(self) -> bool {
        self.contains(Self::NULL)
    }

    const fn is_only_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    /// Read as a truth value: a non-boolean could be anything once coerced.
    fn as_logical(self) -> Self {
        if self.contains(Self::OTHER) {
            Self::UNKNOWN_BOOLEAN
        } else {
            self
        }
    }

    fn truth_values(self) -> impl Iterator<Item = Truth> {
        let logical = self.as_logical();
        [
            (Self::TRUE, Truth::True),
            (Self::FALSE, Truth::False),
            (Self::NULL, Truth::Unknown),
        ]
        .into_iter()
        .filter(move |(bit, _)| logical.contains(*bit))
        .map(|(_, t)| t)
    }

    fn from_truths(truths: impl IntoIterator<Item = Truth>) -> Self {
        truths
            .into_iter()
            .fold(Self(0), |acc, t| acc.union(t.possible()))
    }

    /// Result of a NULL-propagating operator over `operands`.
    fn propagate(operands: &[Self], result: Self) -> Self {
        if operands.iter().any(|p| p.is_only_null()) {
            Self::NULL
        } else if operands.iter().any(|p| p.may_be_null()) {
            result.union(Self::NULL)
        } else {
            result
        }
    }
}

/// SQL three-valued logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn and(self, other: Self) -> Self {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Self) -> Self {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    fn possible(self) -> Possible {
        match self {
            Truth::True => Possible::TRUE,
            Truth::False => Possible::FALSE,
            Truth::Unknown => Possible::NULL,
        }
    }
}

/// Evaluate `expr` assuming every member of `nulled` is NULL.
fn evaluate(expr: &Expr, nulled: QuerySourceId) -> Possible {
    match expr {
        Expr::Source(id) | Expr::Member { source: id, .. } => {
            if *id == nulled {
                Possible::NULL
            } else {
                Possible::ANYTHING
            }
        }
        Expr::Column { .. } => Possible::ANYTHING,
        Expr::Literal(value) => match value {
            Value::Null => Possible::NULL,
            Value::Bool(true) => Possible::TRUE,
            Value::Bool(false) => Possible::FALSE,
            _ => Possible::OTHER,
        },
        Expr::Binary { left, op, right } => {
            let l = evaluate(left, nulled);
            let r = evaluate(right, nulled);
            match op {
                BinaryOp::And | BinaryOp::Or => {
                    let mut truths = Vec::new();
                    for a in l.truth_values() {
                        for b in r.truth_values() {
                            truths.push(if *op == BinaryOp::And { a.and(b) } else { a.or(b) });
                        }
                    }
                    Possible::from_truths(truths)
                }
                op if op.is_comparison() => Possible::propagate(&[l, r], Possible::BOOLEAN),
                _ => Possible::propagate(&[l, r], Possible::OTHER),
            }
        }
        Expr::Unary { op, expr } => {
            let inner = evaluate(expr, nulled);
            match op {
                UnaryOp::Not => Possible::from_truths(inner.truth_values().map(Truth::not)),
                UnaryOp::Neg => Possible::propagate(&[inner], Possible::OTHER),
            }
        }
        Expr::IsNull { expr, negated } => {
            let inner = evaluate(expr, nulled);
            let is_null = if inner.is_only_null() {
                Possible::TRUE
            } else if inner.may_be_null() {
                Possible::BOOLEAN
            } else {
                Possible::FALSE
            };
            if *negated {
                Possible::from_truths(is_null.truth_values().map(Truth::not))
            } else {
                is_null
            }
        }
        Expr::In { expr, .. } | Expr::Between { expr, .. } | Expr::Like { expr, .. } => {
            // the other operands may be NULL themselves
            Possible::propagate(&[evaluate(expr, nulled)], Possible::UNKNOWN_BOOLEAN)
        }
        Expr::Cast { expr, .. } => Possible::propagate(&[evaluate(expr, nulled)], Possible::ANYTHING),
        Expr::Paren(expr) => evaluate(expr, nulled),
        Expr::Function { .. }
        | Expr::Case { .. }
        | Expr::IsDistinctFrom { .. }
        | Expr::Subquery(_)
        | Expr::Raw(_)
        | Expr::CountStar => Possible::ANYTHING,
    }
}

/// Whether `predicate` can never be TRUE for a row whose `source` side is missing.
pub fn rejects_missing_source(predicate: &Expr, source: QuerySourceId) -> bool {
    !evaluate(predicate, source).contains(Possible::TRUE)
}

/// Promotes outer joins to inner joins when a later where clause makes the outer
/// semantics unobservable.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhereJoinDetector;

impl WhereJoinDetector {
    pub fn new() -> Self {
        Self
    }

    /// Promote every eligible join of `model`; returns how many were promoted.
    ///
    /// Running it again on the result promotes nothing.
    pub fn optimize(&self, model: &mut QueryModel) -> usize {
        let clauses = model.body_clauses_mut();
        let mut promoted = 0;

        for index in 0..clauses.len() {
            let (head, tail) = clauses.split_at_mut(index + 1);
            let BodyClause::Join(join) = &mut head[index] else {
                continue;
            };
            if join.is_inner() {
                continue;
            }
            let id = join.id();
            let disqualifying = tail.iter().position(|clause| match clause {
                BodyClause::Where(w) => rejects_missing_source(w.predicate(), id),
                _ => false,
            });
            if let Some(offset) = disqualifying {
                join.make_inner();
                promoted += 1;
                debug!(
                    join = %join,
                    where_index = index + 1 + offset,
                    "Promoted outer join to inner join"
                );
            }
        }
        promoted
    }
}
