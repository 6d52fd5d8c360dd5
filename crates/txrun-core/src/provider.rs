use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::driver::Driver;
use crate::run::{RunOptions, run};
use crate::scope::Scope;
use crate::transaction::BoxTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// ## Summary
    /// Returns the SQL keyword sequence naming this level.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for [`Provider::begin_tx`]. An unset isolation level means the
/// backend default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    #[serde(default)]
    pub read_only: bool,
}

impl TxOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            isolation: None,
            read_only: false,
        }
    }

    #[must_use]
    pub const fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Opens transactions against one underlying resource.
pub trait Provider: Send + Sync {
    /// ## Summary
    /// Opens a transaction with the backend's default options.
    ///
    /// ## Errors
    /// Returns the driver's error when the transaction cannot be opened.
    fn begin<'a>(&'a self, scope: &'a Scope) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        self.begin_tx(scope, None)
    }

    /// ## Summary
    /// Opens a transaction with the given options, or backend defaults when
    /// `options` is `None`.
    ///
    /// ## Errors
    /// Returns the driver's error when the transaction cannot be opened.
    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>>;

    /// ## Summary
    /// Returns true iff `scope` is marked AND carries a transaction opened by
    /// this provider.
    fn tx_enabled(&self, scope: &Scope) -> bool;

    /// ## Summary
    /// Returns the error classifier bound to this provider, if any.
    fn driver(&self) -> Option<&dyn Driver> {
        None
    }
}

impl<P> Provider for &P
where
    P: Provider + ?Sized,
{
    fn begin<'a>(&'a self, scope: &'a Scope) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin(scope)
    }

    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin_tx(scope, options)
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        (**self).tx_enabled(scope)
    }

    fn driver(&self) -> Option<&dyn Driver> {
        (**self).driver()
    }
}

impl<P> Provider for Arc<P>
where
    P: Provider + ?Sized,
{
    fn begin<'a>(&'a self, scope: &'a Scope) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin(scope)
    }

    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin_tx(scope, options)
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        (**self).tx_enabled(scope)
    }

    fn driver(&self) -> Option<&dyn Driver> {
        (**self).driver()
    }
}

impl<P> Provider for Box<P>
where
    P: Provider + ?Sized,
{
    fn begin<'a>(&'a self, scope: &'a Scope) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin(scope)
    }

    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        (**self).begin_tx(scope, options)
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        (**self).tx_enabled(scope)
    }

    fn driver(&self) -> Option<&dyn Driver> {
        (**self).driver()
    }
}

/// A provider decorated with an error classifier at construction time.
#[derive(Debug, Clone)]
pub struct WithDriver<P, D> {
    provider: P,
    driver: D,
}

impl<P, D> WithDriver<P, D> {
    #[must_use]
    pub const fn new(provider: P, driver: D) -> Self {
        Self { provider, driver }
    }

    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn into_inner(self) -> P {
        self.provider
    }
}

impl<P, D> Provider for WithDriver<P, D>
where
    P: Provider,
    D: Driver,
{
    fn begin<'a>(&'a self, scope: &'a Scope) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        self.provider.begin(scope)
    }

    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        self.provider.begin_tx(scope, options)
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        self.provider.tx_enabled(scope)
    }

    fn driver(&self) -> Option<&dyn Driver> {
        Some(&self.driver)
    }
}

pub trait ProviderExt: Provider {
    /// ## Summary
    /// Binds `driver` as this provider's error classifier.
    #[must_use]
    fn with_driver<D>(self, driver: D) -> WithDriver<Self, D>
    where
        Self: Sized,
        D: Driver,
    {
        WithDriver::new(self, driver)
    }

    /// ## Summary
    /// Runs `callback` inside a transaction opened by this provider.
    /// See [`run`](crate::run::run).
    ///
    /// ## Errors
    /// Same as [`run`](crate::run::run).
    fn run<'a, F, Fut, T>(
        &'a self,
        scope: &'a Scope,
        options: &'a RunOptions,
        callback: F,
    ) -> impl Future<Output = anyhow::Result<T>> + 'a
    where
        Self: Sized,
        F: FnMut(Scope) -> Fut + 'a,
        Fut: Future<Output = anyhow::Result<T>> + 'a,
        T: 'a,
    {
        run(scope, self, options, callback)
    }
}

impl<P> ProviderExt for P where P: Provider + ?Sized {}
