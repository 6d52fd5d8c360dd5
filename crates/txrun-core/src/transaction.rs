use std::sync::OnceLock;

use futures::future::BoxFuture;

use crate::scope::Scope;

/// One in-flight database transaction.
///
/// The handle exclusively owns the driver transaction. `commit` and
/// `rollback` delegate to the driver and resolve the handle's scope exactly
/// once, whichever of them runs first; later calls still reach the driver.
pub trait Transaction: Send + Sync {
    /// ## Summary
    /// Returns the scope bound to this transaction: marked while the
    /// transaction is open, unmarked once it has been resolved.
    fn scope(&self) -> Scope;

    /// ## Summary
    /// Commits the driver transaction.
    ///
    /// ## Errors
    /// Returns whatever the driver reports, unchanged.
    fn commit(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// ## Summary
    /// Rolls back the driver transaction.
    ///
    /// ## Errors
    /// Returns whatever the driver reports, unchanged.
    fn rollback(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}

pub type BoxTransaction = Box<dyn Transaction>;

/// One-shot scope guard embedded by transaction handles.
#[derive(Debug)]
pub struct TxScope {
    active: Scope,
    resolved: OnceLock<Scope>,
}

impl TxScope {
    /// ## Summary
    /// Wraps `scope`, marking it as running inside a transaction.
    #[must_use]
    pub fn new(scope: &Scope) -> Self {
        Self {
            active: scope.mark(true),
            resolved: OnceLock::new(),
        }
    }

    /// ## Summary
    /// Returns the active scope until [`TxScope::resolve`] has run, and the
    /// resolved (unmarked, resource-free) scope afterwards.
    #[must_use]
    pub fn current(&self) -> Scope {
        self.resolved.get().unwrap_or(&self.active).clone()
    }

    /// ## Summary
    /// Derives the resolved scope. Only the first call performs the
    /// transition; the return value tells whether this call was it.
    #[must_use]
    pub fn resolve(&self) -> bool {
        let mut transitioned = false;
        self.resolved.get_or_init(|| {
            transitioned = true;
            self.active.without_resource().mark(false)
        });
        transitioned
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}
