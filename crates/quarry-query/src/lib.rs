//! Query model and query text generation for Quarry.
//!
//! `quarry-query` is the **query translation layer**. It holds the clause-structured
//! model a parsed query is turned into, rewrites it, and serializes it.
//!
//! # Role In The Architecture
//!
//! - **Query model**: [`QueryModel`] with a main [`FromClause`], ordered body clauses
//!   ([`JoinClause`], [`WhereClause`], [`OrderByClause`], ...), a [`SelectClause`] and
//!   result operators. Clauses refer to each other through [`QuerySourceId`].
//! - **Join optimizer**: [`WhereJoinDetector`] promotes outer joins that a later where
//!   clause turns into inner joins anyway.
//! - **Serialization**: [`QueryTextGenerator`] walks the model as a
//!   [`QueryModelVisitor`] and emits query text plus bound parameters.
//!
//! [`compile`] runs the optimizer and the generator; [`run_query`] executes the result
//! through the `Connection` trait from `quarry-core`.

pub mod clause;
pub mod expr;
pub mod join;
pub mod model;
pub mod optimizer;
pub mod source;
pub mod visitor;

pub use clause::{
    BodyClause, FromClause, GroupJoinClause, OrderByClause, OrderDirection, Ordering,
    ResultOperator, SelectClause, WhereClause, WithClause,
};
pub use expr::{BinaryOp, BuildContext, Expr, UnaryOp};
pub use join::JoinClause;
pub use model::QueryModel;
pub use optimizer::{WhereJoinDetector, rejects_missing_source};
pub use source::{CloneContext, ItemType, QuerySourceId};
pub use visitor::{CompiledQuery, QueryModelVisitor, QueryTextGenerator, compile};

use asupersync::{Cx, Outcome};
use quarry_core::{Connection, Row};

/// Execute a compiled query.
pub async fn run_query<C: Connection>(
    cx: &Cx,
    conn: &C,
    query: &CompiledQuery,
) -> Outcome<Vec<Row>, quarry_core::Error> {
    conn.query(cx, &query.text, &query.params).await
}
