//! Session and transaction management for Quarry.
//!
//! `quarry-session` is the **unit-of-work layer**. A [`Session`] owns or borrows exactly
//! one connection, runs compiled queries on it and drives at most one transaction at a
//! time through a [`TransactionCoordinator`].
//!
//! # Notifications
//!
//! Every transaction notifies, in this order:
//!
//! 1. the session's [`Interceptor`] after the store transaction began;
//! 2. the interceptor, then each registered [`TransactionCompletionSynchronization`]
//!    (registration order) before completion, on commit only;
//! 3. the interceptor, then each synchronization, after completion with the final
//!    outcome. This round fires exactly once per transaction, including when the
//!    session is closed or dropped with the transaction still open.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::new(pool);
//! let mut session = factory.open_session(&cx).await?;
//! session.begin_transaction(&cx).await?;
//! session.register_synchronization(Arc::new(CacheInvalidation::default()))?;
//! let rows = session.list(&cx, &mut model).await?;
//! session.commit(&cx).await?;
//! session.close(&cx).await?;
//! ```

pub mod session;
pub mod transaction;

pub use session::{ConnectionHolder, Session, SessionBuilder, SessionConfig, SessionFactory};
pub use transaction::{
    EmptyInterceptor, Interceptor, TransactionCompletionSynchronization, TransactionCoordinator,
    TransactionState,
};
