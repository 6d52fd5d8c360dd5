//! [`Provider`] implementation over a bb8 pool of `AsyncPgConnection`s.
//!
//! An open transaction owns one pooled connection. The connection is shared
//! between the handle (commit/rollback) and the callback (queries) through the
//! transaction's scope, and code resolves where to run its statements with
//! [`DieselProvider::executor`] without knowing whether a transaction is open.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};
use txrun_core::{
    BoxTransaction, Driver, Provider, RunOptions, Scope, Transaction, TxOptions, TxScope, run,
};

use crate::connection::{DbConnection, DbPool};
use crate::driver::PostgresDriver;
use crate::error::DbResult;

/// Pooled connection held by an open transaction.
pub struct TxConnection {
    conn: Mutex<DbConnection<'static>>,
}

impl TxConnection {
    pub async fn lock(&self) -> MutexGuard<'_, DbConnection<'static>> {
        self.conn.lock().await
    }
}

struct DieselTransaction {
    conn: Arc<TxConnection>,
    scope: TxScope,
}

impl DieselTransaction {
    fn settle(&self, action: &str) {
        if !self.scope.resolve() {
            tracing::debug!(action, "Transaction scope already resolved");
        }
    }
}

impl Transaction for DieselTransaction {
    fn scope(&self) -> Scope {
        self.scope.current()
    }

    fn commit(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.settle("commit");

            let mut conn = self.conn.lock().await;
            <AnsiTransactionManager as TransactionManager<_>>::commit_transaction(&mut **conn)
                .await?;

            tracing::debug!("Transaction committed");
            Ok(())
        })
    }

    fn rollback(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.settle("rollback");

            let mut conn = self.conn.lock().await;
            <AnsiTransactionManager as TransactionManager<_>>::rollback_transaction(&mut **conn)
                .await?;

            tracing::debug!("Transaction rolled back");
            Ok(())
        })
    }
}

/// Where statements run: the open transaction's connection, or the pool.
#[derive(Clone)]
pub enum Executor {
    Transaction(Arc<TxConnection>),
    Pool(DbPool),
}

impl Executor {
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    /// ## Summary
    /// Acquires a connection to run statements on.
    ///
    /// ## Errors
    /// Returns an error if a connection cannot be checked out of the pool.
    pub async fn connection(&self) -> DbResult<ExecutorConnection<'_>> {
        match self {
            Self::Transaction(conn) => Ok(ExecutorConnection::Transaction(conn.lock().await)),
            Self::Pool(pool) => Ok(ExecutorConnection::Pool(pool.get().await?)),
        }
    }
}

pub enum ExecutorConnection<'a> {
    Transaction(MutexGuard<'a, DbConnection<'static>>),
    Pool(DbConnection<'a>),
}

impl Deref for ExecutorConnection<'_> {
    type Target = AsyncPgConnection;

    fn deref(&self) -> &AsyncPgConnection {
        match self {
            Self::Transaction(conn) => conn,
            Self::Pool(conn) => conn,
        }
    }
}

impl DerefMut for ExecutorConnection<'_> {
    fn deref_mut(&mut self) -> &mut AsyncPgConnection {
        match self {
            Self::Transaction(conn) => conn,
            Self::Pool(conn) => conn,
        }
    }
}

#[derive(Clone)]
pub struct DieselProvider {
    pool: DbPool,
    driver: Option<Arc<dyn Driver>>,
}

impl DieselProvider {
    /// ## Summary
    /// Creates a provider without an error classifier: no error is treated
    /// as a serialization conflict.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool, driver: None }
    }

    #[must_use]
    pub fn with_driver<D>(mut self, driver: D) -> Self
    where
        D: Driver + 'static,
    {
        self.driver = Some(Arc::new(driver));
        self
    }

    #[must_use]
    pub fn with_postgres_driver(self) -> Self {
        self.with_driver(PostgresDriver)
    }

    #[must_use]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// ## Summary
    /// Resolves the executor for `scope`: the transaction's connection when
    /// the scope is marked and carries one, the pool otherwise.
    #[must_use]
    pub fn executor(&self, scope: &Scope) -> Executor {
        self.tx_connection(scope)
            .map_or_else(|| Executor::Pool(self.pool.clone()), Executor::Transaction)
    }

    /// ## Summary
    /// Runs `callback` inside a transaction, handing it the transaction's
    /// scope and executor.
    ///
    /// ## Errors
    /// Same as [`txrun_core::run`].
    pub async fn with_tx<F, Fut, T>(
        &self,
        scope: &Scope,
        options: &RunOptions,
        mut callback: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut(Scope, Executor) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        run(scope, self, options, |scope| {
            let executor = self.executor(&scope);
            callback(scope, executor)
        })
        .await
    }

    fn tx_connection(&self, scope: &Scope) -> Option<Arc<TxConnection>> {
        if !scope.enabled() {
            return None;
        }

        scope.resource::<TxConnection>()
    }

    #[tracing::instrument(skip(self, scope))]
    async fn open(&self, scope: &Scope, options: Option<TxOptions>) -> DbResult<DieselTransaction> {
        let mut conn = self.pool.get_owned().await?;

        match options {
            Some(options) => {
                AnsiTransactionManager::begin_transaction_sql(&mut *conn, &begin_sql(options))
                    .await?;
            }
            None => {
                <AnsiTransactionManager as TransactionManager<_>>::begin_transaction(&mut *conn)
                    .await?;
            }
        }

        let conn = Arc::new(TxConnection {
            conn: Mutex::new(conn),
        });
        let scope = TxScope::new(&scope.with_resource(Arc::clone(&conn)));

        tracing::debug!("Transaction opened");

        Ok(DieselTransaction { conn, scope })
    }
}

impl Provider for DieselProvider {
    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        Box::pin(async move {
            let tx = self.open(scope, options).await?;
            Ok(Box::new(tx) as BoxTransaction)
        })
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        self.tx_connection(scope).is_some()
    }

    fn driver(&self) -> Option<&dyn Driver> {
        self.driver.as_deref()
    }
}

fn begin_sql(options: TxOptions) -> String {
    let access = if options.read_only {
        "READ ONLY"
    } else {
        "READ WRITE"
    };

    match options.isolation {
        Some(level) => format!(
            "BEGIN TRANSACTION ISOLATION LEVEL {}, {access}",
            level.as_sql()
        ),
        None => format!("BEGIN TRANSACTION {access}"),
    }
}
