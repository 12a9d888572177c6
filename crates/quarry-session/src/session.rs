//! Sessions and the factory that opens them.

use crate::transaction::{
    EmptyInterceptor, Interceptor, TransactionCompletionSynchronization, TransactionCoordinator,
};
use asupersync::{Cx, Outcome};
use quarry_core::{Connection, ConnectionProvider, Dialect, Error, IsolationLevel, Row, Value};
use quarry_query::{QueryModel, compile};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Isolation level of transactions begun by the session.
    pub isolation: IsolationLevel,
    /// Dialect used to compile queries instead of the connection's own.
    pub dialect_override: Option<Dialect>,
    /// Whether closing a session with an open transaction issues a store rollback.
    /// When false the transaction is completed without reaching the store.
    pub rollback_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            dialect_override: None,
            rollback_on_close: true,
        }
    }
}

impl SessionConfig {
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect_override = Some(dialect);
        self
    }

    pub fn rollback_on_close(mut self, enabled: bool) -> Self {
        self.rollback_on_close = enabled;
        self
    }
}

// ============================================================================
// Connection Ownership
// ============================================================================

/// The connection a session works on.
///
/// Owned connections came from the provider and go back to it when the session ends;
/// borrowed ones belong to the caller and are never released by the session.
#[derive(Debug)]
pub enum ConnectionHolder<'a, C> {
    Borrowed(&'a C),
    Owned(C),
}

impl<C> ConnectionHolder<'_, C> {
    pub fn get(&self) -> &C {
        match self {
            ConnectionHolder::Borrowed(c) => c,
            ConnectionHolder::Owned(c) => c,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ConnectionHolder::Owned(_))
    }
}

// ============================================================================
// Session Factory
// ============================================================================

/// Opens sessions over connections from a [`ConnectionProvider`].
pub struct SessionFactory<P: ConnectionProvider> {
    provider: Arc<P>,
    config: SessionConfig,
    interceptor: Arc<dyn Interceptor>,
}

impl<P: ConnectionProvider> fmt::Debug for SessionFactory<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionProvider> SessionFactory<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, SessionConfig::default())
    }

    pub fn with_config(provider: P, config: SessionConfig) -> Self {
        Self {
            provider: Arc::new(provider),
            config,
            interceptor: Arc::new(EmptyInterceptor),
        }
    }

    /// Default interceptor for sessions opened without one.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Start configuring a session.
    pub fn with_options<'a>(&self) -> SessionBuilder<'a, P>
    where
        P::Connection: 'a,
    {
        SessionBuilder {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            interceptor: Arc::clone(&self.interceptor),
            connection: None,
        }
    }

    /// Open a session on a connection acquired from the provider.
    pub async fn open_session<'a>(&self, cx: &Cx) -> Outcome<Session<'a, P>, Error>
    where
        P::Connection: 'a,
    {
        self.with_options().open(cx).await
    }
}

/// Options for a session about to be opened.
pub struct SessionBuilder<'a, P: ConnectionProvider> {
    provider: Arc<P>,
    config: SessionConfig,
    interceptor: Arc<dyn Interceptor>,
    connection: Option<&'a P::Connection>,
}

impl<P: ConnectionProvider> fmt::Debug for SessionBuilder<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("borrowed_connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a, P: ConnectionProvider> SessionBuilder<'a, P> {
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Work on the caller's connection instead of acquiring one.
    pub fn connection(mut self, connection: &'a P::Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.config.isolation = isolation;
        self
    }

    /// Open the session, acquiring a connection if none was supplied.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn open(self, cx: &Cx) -> Outcome<Session<'a, P>, Error> {
        let connection = match self.connection {
            Some(conn) => ConnectionHolder::Borrowed(conn),
            None => match self.provider.acquire(cx).await {
                Outcome::Ok(conn) => ConnectionHolder::Owned(conn),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            },
        };
        tracing::debug!(owned = connection.is_owned(), "Session opened");
        Outcome::Ok(Session {
            provider: self.provider,
            connection: Some(connection),
            interceptor: self.interceptor,
            config: self.config,
            transaction: None,
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work bound to exactly one connection.
///
/// Dropping an open session completes any open transaction as a rollback (without
/// reaching the store) and returns an owned connection to the provider. Prefer
/// [`close`](Session::close), which can roll the store back.
pub struct Session<'a, P: ConnectionProvider> {
    provider: Arc<P>,
    /// `None` once the session is closed.
    connection: Option<ConnectionHolder<'a, P::Connection>>,
    interceptor: Arc<dyn Interceptor>,
    config: SessionConfig,
    transaction: Option<TransactionCoordinator>,
}

impl<P: ConnectionProvider> fmt::Debug for Session<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("config", &self.config)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

impl<'a, P: ConnectionProvider> Session<'a, P> {
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's connection. Fails once the session is closed.
    pub fn connection(&self) -> quarry_core::Result<&P::Connection> {
        self.connection
            .as_ref()
            .map(ConnectionHolder::get)
            .ok_or_else(|| Error::illegal_state("use connection", "session closed"))
    }

    pub fn owns_connection(&self) -> bool {
        self.connection.as_ref().is_some_and(ConnectionHolder::is_owned)
    }

    /// The current (or last) transaction of this session.
    pub fn transaction(&self) -> Option<&TransactionCoordinator> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(TransactionCoordinator::is_active)
    }

    /// Begin a transaction on the session's connection.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn begin_transaction(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(holder) = self.connection.as_ref() else {
            return Outcome::Err(Error::illegal_state("begin transaction", "session closed"));
        };
        if self.in_transaction() {
            return Outcome::Err(Error::illegal_state(
                "begin transaction",
                "a transaction is active",
            ));
        }
        if let Some(previous) = self.transaction.as_mut() {
            if previous.complete_without_store() {
                tracing::warn!(
                    "Previous transaction was abandoned mid-completion; treated as rolled back"
                );
            }
        }

        let mut coordinator =
            TransactionCoordinator::new(Arc::clone(&self.interceptor), self.config.isolation);
        match coordinator.begin(cx, holder.get()).await {
            Outcome::Ok(()) => {
                self.transaction = Some(coordinator);
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Register an observer with the active transaction.
    pub fn register_synchronization(
        &mut self,
        synchronization: Arc<dyn TransactionCompletionSynchronization>,
    ) -> quarry_core::Result<()> {
        match self.transaction.as_mut() {
            Some(tx) => tx.register_synchronization(synchronization),
            None => Err(Error::illegal_state(
                "register synchronization",
                "no transaction",
            )),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let (conn, tx) = match self.parts("commit") {
            Ok(parts) => parts,
            Err(e) => return Outcome::Err(e),
        };
        tx.commit(cx, conn).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let (conn, tx) = match self.parts("rollback") {
            Ok(parts) => parts,
            Err(e) => return Outcome::Err(e),
        };
        tx.rollback(cx, conn).await
    }

    fn parts(
        &mut self,
        operation: &'static str,
    ) -> quarry_core::Result<(&P::Connection, &mut TransactionCoordinator)> {
        let Some(holder) = self.connection.as_ref() else {
            return Err(Error::illegal_state(operation, "session closed"));
        };
        let Some(tx) = self.transaction.as_mut() else {
            return Err(Error::illegal_state(operation, "no transaction"));
        };
        Ok((holder.get(), tx))
    }

    /// Optimize and compile `model`, then run it on the session's connection.
    #[tracing::instrument(level = "debug", skip(self, cx, model))]
    pub async fn list(&self, cx: &Cx, model: &mut QueryModel) -> Outcome<Vec<Row>, Error> {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let dialect = self.config.dialect_override.unwrap_or_else(|| conn.dialect());
        let query = match compile(model, dialect) {
            Ok(query) => query,
            Err(e) => return Outcome::Err(e),
        };
        tracing::trace!(sql = %query.text, "Executing query");
        conn.query(cx, &query.text, &query.params).await
    }

    /// Run a raw statement on the session's connection.
    #[tracing::instrument(level = "debug", skip(self, cx, params))]
    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        let conn = match self.connection() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        conn.execute(cx, sql, params).await
    }

    /// Close the session.
    ///
    /// An active transaction is rolled back and its after round fires with
    /// `success = false`; then an owned connection goes back to the provider. A
    /// failing store rollback does not stop either step and is returned afterwards.
    /// A transaction whose commit or rollback was abandoned mid-flight is completed
    /// without the store. Closing a closed session does nothing.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn close(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(holder) = self.connection.as_ref() else {
            return Outcome::Ok(());
        };

        let mut result = Outcome::Ok(());
        if let Some(tx) = self.transaction.as_mut() {
            if tx.is_active() && self.config.rollback_on_close {
                result = tx.rollback(cx, holder.get()).await;
            }
            // still open if the rollback was cancelled before it was issued, if no
            // store rollback was wanted, or if an earlier commit or rollback was
            // abandoned mid-flight
            tx.complete_without_store();
        }

        self.release_connection();
        tracing::debug!("Session closed");
        result
    }

    fn release_connection(&mut self) {
        if let Some(ConnectionHolder::Owned(conn)) = self.connection.take() {
            self.provider.release(conn);
        }
    }
}

impl<P: ConnectionProvider> Drop for Session<'_, P> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        if let Some(tx) = self.transaction.as_mut() {
            if tx.complete_without_store() {
                tracing::warn!("Session dropped with an open transaction; treated as rolled back");
            }
        }
        self.release_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionState;
    use asupersync::runtime::RuntimeBuilder;
    use quarry_core::{StoreErrorKind, Value};
    use quarry_query::{FromClause, ItemType, JoinClause, WhereClause};
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Waker};

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            other => std::panic::panic_any(format!("expected error, got: {other:?}")),
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        begins: usize,
        commits: usize,
        rollbacks: usize,
        queries: Vec<(String, Vec<Value>)>,
        fail_rollback: bool,
        hang_commit: bool,
    }

    #[derive(Debug, Clone)]
    struct MockConnection {
        id: usize,
        state: Arc<Mutex<MockState>>,
    }

    impl Connection for MockConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.state
                .lock()
                .expect("lock poisoned")
                .queries
                .push((sql.to_string(), params.to_vec()));
            async { Outcome::Ok(vec![Row::new(vec!["id".into()], vec![Value::BigInt(1)])]) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.state
                .lock()
                .expect("lock poisoned")
                .queries
                .push((sql.to_string(), params.to_vec()));
            async { Outcome::Ok(1) }
        }

        fn begin(
            &self,
            _cx: &Cx,
            _isolation: IsolationLevel,
        ) -> impl Future<Output = Outcome<(), Error>> + Send {
            self.state.lock().expect("lock poisoned").begins += 1;
            async { Outcome::Ok(()) }
        }

        fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            let hang = {
                let mut state = self.state.lock().expect("lock poisoned");
                state.commits += 1;
                state.hang_commit
            };
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                Outcome::Ok(())
            }
        }

        fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            let mut state = self.state.lock().expect("lock poisoned");
            state.rollbacks += 1;
            let result = if state.fail_rollback {
                Outcome::Err(Error::store(StoreErrorKind::Rollback, "connection lost"))
            } else {
                Outcome::Ok(())
            };
            async move { result }
        }

        fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            async { Outcome::Ok(()) }
        }
    }

    #[derive(Default)]
    struct MockProvider {
        state: Arc<Mutex<MockState>>,
        acquired: AtomicUsize,
        released: Mutex<Vec<usize>>,
    }

    impl ConnectionProvider for MockProvider {
        type Connection = MockConnection;

        fn acquire(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, Error>> + Send {
            let conn = MockConnection {
                id: self.acquired.fetch_add(1, Ordering::SeqCst),
                state: Arc::clone(&self.state),
            };
            async move { Outcome::Ok(conn) }
        }

        fn release(&self, conn: MockConnection) {
            self.released.lock().expect("lock poisoned").push(conn.id);
        }
    }

    #[derive(Default)]
    struct CountingSync {
        after_false: AtomicUsize,
        after_true: AtomicUsize,
    }

    impl TransactionCompletionSynchronization for CountingSync {
        fn after_completion(&self, success: bool) -> quarry_core::Result<()> {
            if success {
                self.after_true.fetch_add(1, Ordering::SeqCst);
            } else {
                self.after_false.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.isolation, IsolationLevel::ReadCommitted);
        assert!(config.dialect_override.is_none());
        assert!(config.rollback_on_close);
    }

    #[test]
    fn test_open_close_releases_owned_connection() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            assert!(session.is_open());
            assert!(session.owns_connection());

            unwrap_outcome(session.close(&cx).await);
            assert!(!session.is_open());
            assert!(session.connection().unwrap_err().is_illegal_state());

            // closing twice is a no-op
            unwrap_outcome(session.close(&cx).await);
        });

        assert_eq!(*factory.provider().released.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_borrowed_connection_is_not_released() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        let conn = MockConnection {
            id: 42,
            state: Arc::clone(&factory.provider().state),
        };

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.with_options().connection(&conn).open(&cx).await);
            assert!(!session.owns_connection());
            unwrap_outcome(session.close(&cx).await);
        });

        assert!(factory.provider().released.lock().unwrap().is_empty());
        assert_eq!(factory.provider().acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transaction_lifecycle_through_session() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            assert!(session.register_synchronization(sync.clone()).is_err());

            unwrap_outcome(session.begin_transaction(&cx).await);
            assert!(expect_err(session.begin_transaction(&cx).await).is_illegal_state());
            session.register_synchronization(sync.clone()).unwrap();
            unwrap_outcome(session.commit(&cx).await);
            assert!(!session.in_transaction());

            // a new transaction may follow a completed one
            unwrap_outcome(session.begin_transaction(&cx).await);
            unwrap_outcome(session.rollback(&cx).await);
            unwrap_outcome(session.close(&cx).await);
        });

        assert_eq!(sync.after_true.load(Ordering::SeqCst), 1);
        assert_eq!(sync.after_false.load(Ordering::SeqCst), 0);
        let state = factory.provider().state.lock().unwrap();
        assert_eq!((state.begins, state.commits, state.rollbacks), (2, 1, 1));
    }

    #[test]
    fn test_close_with_active_transaction_rolls_back() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            unwrap_outcome(session.close(&cx).await);
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().state.lock().unwrap().rollbacks, 1);
    }

    #[test]
    fn test_close_without_store_rollback() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let config = SessionConfig::default().rollback_on_close(false);
        let factory = SessionFactory::with_config(MockProvider::default(), config);
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            unwrap_outcome(session.close(&cx).await);
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().state.lock().unwrap().rollbacks, 0);
    }

    #[test]
    fn test_close_reports_failed_rollback_after_teardown() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        factory.provider().state.lock().unwrap().fail_rollback = true;
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            let err = expect_err(session.close(&cx).await);
            assert!(err.is_store_failure());
            assert!(!session.is_open());
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_without_close_completes_transaction() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            drop(session);
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().released.lock().unwrap().len(), 1);
        // no store round trip from drop
        assert_eq!(factory.provider().state.lock().unwrap().rollbacks, 0);
    }

    #[test]
    fn test_closed_session_rejects_operations() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.close(&cx).await);
            assert!(expect_err(session.begin_transaction(&cx).await).is_illegal_state());
            assert!(expect_err(session.commit(&cx).await).is_illegal_state());
            assert!(expect_err(session.execute(&cx, "delete from t", &[]).await).is_illegal_state());
        });
    }

    #[test]
    fn test_list_compiles_with_dialect_override() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let config = SessionConfig::default().dialect(Dialect::Postgres);
        let factory = SessionFactory::with_config(MockProvider::default(), config);

        let customers = FromClause::entities("c", ItemType::new("Customer").unwrap()).unwrap();
        let join =
            JoinClause::new("o", ItemType::new("Order").unwrap(), customers.member("orders")).unwrap();
        let predicate = join.member("total").gt(5);
        let mut model = QueryModel::select_items(customers);
        model.add_body_clause(join);
        model.add_body_clause(WhereClause::new(predicate).unwrap());

        rt.block_on(async {
            let session = unwrap_outcome(factory.open_session(&cx).await);
            let rows = unwrap_outcome(session.list(&cx, &mut model).await);
            assert_eq!(rows.len(), 1);
        });

        let state = factory.provider().state.lock().unwrap();
        let (sql, params) = &state.queries[0];
        assert!(sql.contains("INNER JOIN"), "{sql}");
        assert!(sql.contains("$1"));
        assert_eq!(params, &vec![Value::Int(5)]);
    }

    /// Poll `session.commit` once, leaving the store commit in flight, then drop it.
    async fn abandon_commit(session: &mut Session<'_, MockProvider>, cx: &Cx) {
        let mut commit = std::pin::pin!(session.commit(cx));
        let mut task_cx = Context::from_waker(Waker::noop());
        assert!(commit.as_mut().poll(&mut task_cx).is_pending());
    }

    #[test]
    fn test_close_after_abandoned_commit_notifies_once() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        factory.provider().state.lock().unwrap().hang_commit = true;
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            abandon_commit(&mut session, &cx).await;
            assert_eq!(
                session.transaction().map(TransactionCoordinator::state),
                Some(TransactionState::Committing)
            );

            unwrap_outcome(session.close(&cx).await);
            assert!(!session.is_open());
            assert_eq!(
                session.transaction().map(TransactionCoordinator::state),
                Some(TransactionState::Completed)
            );
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(sync.after_true.load(Ordering::SeqCst), 0);
        assert_eq!(factory.provider().released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_begin_after_abandoned_commit_completes_previous() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        factory.provider().state.lock().unwrap().hang_commit = true;
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();
            abandon_commit(&mut session, &cx).await;
            assert_eq!(sync.after_false.load(Ordering::SeqCst), 0);

            unwrap_outcome(session.begin_transaction(&cx).await);
            assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
            assert!(session.in_transaction());
            unwrap_outcome(session.close(&cx).await);
        });

        // the new transaction had no observers of its own
        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().state.lock().unwrap().begins, 2);
    }

    #[test]
    fn test_close_completes_transaction_when_rollback_is_cancelled() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let factory = SessionFactory::new(MockProvider::default());
        let sync = Arc::new(CountingSync::default());

        rt.block_on(async {
            let mut session = unwrap_outcome(factory.open_session(&cx).await);
            unwrap_outcome(session.begin_transaction(&cx).await);
            session.register_synchronization(sync.clone()).unwrap();

            cx.cancel_with(asupersync::CancelKind::User, Some("shutting down"));
            assert!(session.close(&cx).await.is_cancelled());
            assert!(!session.is_open());
        });

        assert_eq!(sync.after_false.load(Ordering::SeqCst), 1);
        assert_eq!(factory.provider().state.lock().unwrap().rollbacks, 0);
        assert_eq!(factory.provider().released.lock().unwrap().len(), 1);
    }
}
