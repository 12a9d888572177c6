//! Connection pooling for Quarry using asupersync.
//!
//! [`Pool`] is the default [`ConnectionProvider`] handed to a session factory. It keeps
//! released connections idle for reuse, opens new ones through a
//! [`ConnectionFactory`] up to `max_connections`, and optionally pings idle
//! connections before handing them out again.

use asupersync::{Cx, Outcome};
use quarry_core::{Connection, ConnectionProvider, Error, PoolError, PoolErrorKind};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections allowed
    pub max_connections: usize,
    /// Test connections before giving them out
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    /// Enable/disable test on checkout.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of active connections
    pub active_connections: usize,
    /// Connections dropped because they failed validation on checkout
    pub discarded_connections: usize,
}

/// Opens new store connections for a [`Pool`].
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    /// Open a new connection. May suspend.
    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;
}

/// A bounded connection pool.
pub struct Pool<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<Vec<F::Connection>>,
    total_connections: AtomicUsize,
    discarded_connections: AtomicUsize,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new connection pool.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            idle: Mutex::new(Vec::new()),
            total_connections: AtomicUsize::new(0),
            discarded_connections: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let total = self.total_connections.load(Ordering::Acquire);
        let idle = self.lock_idle().len();
        PoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            discarded_connections: self.discarded_connections.load(Ordering::Relaxed),
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        self.total_connections.load(Ordering::Acquire) >= self.config.max_connections
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the pool: idle connections are dropped, and connections released later
    /// are dropped instead of kept. Further acquires fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.lock_idle().drain(..).collect();
        self.total_connections
            .fetch_sub(drained.len(), Ordering::AcqRel);
        tracing::debug!(dropped = drained.len(), "Pool closed");
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<F::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for a new connection, if under capacity.
    fn try_reserve(&self) -> bool {
        self.total_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.config.max_connections).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.total_connections.fetch_sub(1, Ordering::AcqRel);
    }

    fn closed_error() -> Error {
        Error::Pool(PoolError {
            kind: PoolErrorKind::Closed,
            message: "pool is closed".to_string(),
            source: None,
        })
    }
}

/// Gives a reserved connection slot back unless [`keep`](SlotGuard::keep) is called.
///
/// Dropping an `acquire` future mid-validation or mid-connect drops the guard too.
struct SlotGuard<'a> {
    total: &'a AtomicUsize,
    armed: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(total: &'a AtomicUsize) -> Self {
        Self { total, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.total.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<F: ConnectionFactory> ConnectionProvider for Pool<F> {
    type Connection = F::Connection;

    fn acquire(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send {
        async move {
            if self.is_closed() {
                return Outcome::Err(Self::closed_error());
            }

            loop {
                let candidate = self.lock_idle().pop();
                let Some(conn) = candidate else {
                    break;
                };
                if !self.config.test_on_checkout {
                    tracing::trace!("Reusing idle connection");
                    return Outcome::Ok(conn);
                }
                // the popped connection owns its slot until validation settles
                let slot = SlotGuard::new(&self.total_connections);
                if conn.is_valid(cx).await {
                    slot.keep();
                    tracing::trace!("Reusing idle connection");
                    return Outcome::Ok(conn);
                }
                drop(slot);
                self.discarded_connections.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Discarded idle connection that failed validation");
            }

            if !self.try_reserve() {
                return Outcome::Err(Error::Pool(PoolError {
                    kind: PoolErrorKind::Exhausted,
                    message: format!(
                        "all {} connections are in use",
                        self.config.max_connections
                    ),
                    source: None,
                }));
            }

            let slot = SlotGuard::new(&self.total_connections);
            match self.factory.connect(cx).await {
                Outcome::Ok(conn) => {
                    slot.keep();
                    tracing::debug!(
                        total = self.total_connections.load(Ordering::Relaxed),
                        "Opened new pooled connection"
                    );
                    Outcome::Ok(conn)
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn release(&self, conn: Self::Connection) {
        if self.is_closed() {
            self.release_slot();
            drop(conn);
            return;
        }
        self.lock_idle().push(conn);
    }
}
