//! Transaction coordination and completion notifications.
//!
//! A [`TransactionCoordinator`] drives one store transaction through
//! `Idle -> Active -> (Committing | RollingBack) -> Completed` and notifies two kinds
//! of observers:
//!
//! - the session's [`Interceptor`], once after begin and around completion;
//! - the [`TransactionCompletionSynchronization`]s registered while the transaction
//!   was active, in registration order.
//!
//! Whatever way the transaction ends (commit, rollback, failed commit, session close,
//! session drop), the after-completion round fires exactly once. Before-completion
//! only fires on the commit path. Callbacks are synchronous, so the store call is the
//! only place a completion can suspend.

use asupersync::{Cx, Outcome};
use quarry_core::{Connection, Error, IsolationLevel, Result};
use std::fmt;
use std::sync::Arc;

/// Session-wide hooks around transaction boundaries.
///
/// All methods default to doing nothing.
pub trait Interceptor: Send + Sync {
    fn after_transaction_begin(&self) {}

    /// Called on the commit path before any synchronization's `before_completion`.
    fn before_transaction_completion(&self) {}

    fn after_transaction_completion(&self, _success: bool) {}
}

/// Interceptor that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyInterceptor;

impl Interceptor for EmptyInterceptor {}

/// Observer registered with a single transaction.
pub trait TransactionCompletionSynchronization: Send + Sync {
    /// Called before the store commit. An error aborts the commit and rolls back.
    fn before_completion(&self) -> Result<()> {
        Ok(())
    }

    /// Called once the transaction is over. Errors are logged and do not stop the
    /// remaining observers from being notified.
    fn after_completion(&self, success: bool) -> Result<()>;
}

/// Lifecycle state of a [`TransactionCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committing,
    RollingBack,
    Completed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::Committing => "committing",
            TransactionState::RollingBack => "rolling back",
            TransactionState::Completed => "completed",
        })
    }
}

/// Drives one store transaction and its completion notifications.
pub struct TransactionCoordinator {
    state: TransactionState,
    isolation: IsolationLevel,
    interceptor: Arc<dyn Interceptor>,
    synchronizations: Vec<Arc<dyn TransactionCompletionSynchronization>>,
    after_completion_fired: bool,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("state", &self.state)
            .field("isolation", &self.isolation)
            .field("synchronizations", &self.synchronizations.len())
            .field("after_completion_fired", &self.after_completion_fired)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    pub fn new(interceptor: Arc<dyn Interceptor>, isolation: IsolationLevel) -> Self {
        Self {
            state: TransactionState::Idle,
            isolation,
            interceptor,
            synchronizations: Vec::new(),
            after_completion_fired: false,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.len()
    }

    fn require(&self, operation: &'static str, expected: TransactionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::illegal_state(operation, self.state))
        }
    }

    /// Start the store transaction, then notify the interceptor.
    ///
    /// If the store refuses, the coordinator stays idle and nothing is notified.
    pub async fn begin<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        if let Err(e) = self.require("begin", TransactionState::Idle) {
            return Outcome::Err(e);
        }
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        match conn.begin(cx, self.isolation).await {
            Outcome::Ok(()) => {
                self.state = TransactionState::Active;
                tracing::debug!(isolation = self.isolation.as_sql(), "Transaction begun");
                self.interceptor.after_transaction_begin();
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Register an observer for the current transaction. Only allowed while active.
    pub fn register_synchronization(
        &mut self,
        synchronization: Arc<dyn TransactionCompletionSynchronization>,
    ) -> Result<()> {
        self.require("register synchronization", TransactionState::Active)?;
        self.synchronizations.push(synchronization);
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// Notification order: interceptor before, synchronizations before, store commit,
    /// interceptor after, synchronizations after. A failing before-completion
    /// synchronization or store commit rolls the store back and fires the after round
    /// with `success = false` before the error is returned.
    pub async fn commit<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        if let Err(e) = self.require("commit", TransactionState::Active) {
            return Outcome::Err(e);
        }
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        self.state = TransactionState::Committing;

        self.interceptor.before_transaction_completion();
        let before = self
            .synchronizations
            .iter()
            .try_for_each(|s| s.before_completion());
        if let Err(e) = before {
            tracing::debug!(error = %e, "Before-completion synchronization failed; rolling back");
            self.rollback_store_best_effort(cx, conn).await;
            self.finish(false);
            return Outcome::Err(e);
        }

        match conn.commit(cx).await {
            Outcome::Ok(()) => {
                tracing::debug!("Transaction committed");
                self.finish(true);
                Outcome::Ok(())
            }
            Outcome::Err(e) => {
                tracing::debug!(error = %e, "Commit failed; rolling back");
                self.rollback_store_best_effort(cx, conn).await;
                self.finish(false);
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                self.finish(false);
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                self.finish(false);
                Outcome::Panicked(p)
            }
        }
    }

    /// Roll the transaction back.
    ///
    /// No before-completion notifications. The after round fires with
    /// `success = false` even if the store rollback fails; the failure is returned
    /// afterwards.
    pub async fn rollback<C: Connection>(&mut self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        if let Err(e) = self.require("rollback", TransactionState::Active) {
            return Outcome::Err(e);
        }
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        self.state = TransactionState::RollingBack;

        let outcome = conn.rollback(cx).await;
        match &outcome {
            Outcome::Ok(()) => tracing::debug!("Transaction rolled back"),
            Outcome::Err(e) => tracing::error!(error = %e, "Store rollback failed"),
            Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                tracing::error!("Store rollback did not complete");
            }
        }
        self.finish(false);
        outcome
    }

    /// End the transaction without reaching the store, as a rollback.
    ///
    /// Used when the owner goes away while the transaction is still open. Returns
    /// whether the after round fired; a transaction that already completed, or never
    /// began, is left alone.
    pub fn complete_without_store(&mut self) -> bool {
        match self.state {
            TransactionState::Active
            | TransactionState::Committing
            | TransactionState::RollingBack => {
                tracing::debug!(state = %self.state, "Completing transaction without the store");
                self.finish(false);
                true
            }
            TransactionState::Idle | TransactionState::Completed => false,
        }
    }

    async fn rollback_store_best_effort<C: Connection>(&mut self, cx: &Cx, conn: &C) {
        self.state = TransactionState::RollingBack;
        match conn.rollback(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => tracing::error!(error = %e, "Store rollback after failed commit failed"),
            Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                tracing::error!("Store rollback after failed commit did not complete");
            }
        }
    }

    /// Enter `Completed` and fire the after round, at most once.
    fn finish(&mut self, success: bool) {
        self.state = TransactionState::Completed;
        if self.after_completion_fired {
            return;
        }
        self.after_completion_fired = true;

        self.interceptor.after_transaction_completion(success);
        for (index, synchronization) in self.synchronizations.iter().enumerate() {
            if let Err(e) = synchronization.after_completion(success) {
                tracing::warn!(
                    synchronization = index,
                    error = %e,
                    "After-completion synchronization failed"
                );
            }
        }
    }
}
