//! Quarry - a query translation and unit-of-work layer over pluggable stores.
//!
//! Quarry provides:
//!
//! - A clause-structured query model with outer joins that can be restricted,
//!   cloned and rewritten
//! - An optimizer that turns outer joins into inner joins when a later where clause
//!   rejects the rows the outer join would add
//! - Query text generation for HQL and SQL dialects with bound parameters
//! - Sessions whose transactions notify an interceptor and registered
//!   synchronizations in a fixed order
//! - Connection pooling with structured concurrency
//!
//! # Quick Start
//!
//! ```ignore
//! use quarry::prelude::*;
//!
//! async fn open_orders(cx: &Cx, factory: &SessionFactory<Pool<MyFactory>>) -> Result<usize> {
//!     let customers = FromClause::entities("c", ItemType::new("Customer")?)?;
//!     let orders = JoinClause::new("o", ItemType::new("Order")?, customers.member("orders"))?;
//!     let filter = WhereClause::new(orders.member("status").eq("open"))?;
//!
//!     let mut model = QueryModel::select_items(customers)
//!         .with_body_clause(orders)
//!         .with_body_clause(filter);
//!
//!     let mut session = factory.open_session(cx).await?;
//!     session.begin_transaction(cx).await?;
//!     // the where clause promotes the join: "... inner join c.orders o where ..."
//!     let rows = session.list(cx, &mut model).await?;
//!     session.commit(cx).await?;
//!     session.close(cx).await?;
//!     Ok(rows.len())
//! }
//! ```

pub use quarry_core::{
    // asupersync re-exports
    Budget,
    // Core types
    Connection,
    ConnectionProvider,
    Cx,
    Dialect,
    Error,
    IsolationLevel,
    Outcome,
    RegionId,
    Result,
    Row,
    TaskId,
    Value,
};

pub use quarry_query::{
    BodyClause, CloneContext, CompiledQuery, Expr, FromClause, GroupJoinClause, ItemType,
    JoinClause, OrderByClause, OrderDirection, Ordering, QueryModel, QueryModelVisitor,
    QuerySourceId, QueryTextGenerator, ResultOperator, SelectClause, WhereClause,
    WhereJoinDetector, WithClause, compile, run_query,
};

pub use quarry_session::{
    EmptyInterceptor, Interceptor, Session, SessionBuilder, SessionConfig, SessionFactory,
    TransactionCompletionSynchronization, TransactionCoordinator, TransactionState,
};

pub use quarry_pool::{ConnectionFactory, Pool, PoolConfig, PoolStats};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use quarry::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        Outcome,
        // Core
        Connection,
        ConnectionProvider,
        Dialect,
        Error,
        IsolationLevel,
        Result,
        Row,
        Value,
        // Query model
        Expr,
        FromClause,
        ItemType,
        JoinClause,
        OrderByClause,
        QueryModel,
        WhereClause,
        WithClause,
        compile,
        // Session
        Interceptor,
        Session,
        SessionConfig,
        SessionFactory,
        TransactionCompletionSynchronization,
        // Pool
        Pool,
        PoolConfig,
    };
}
