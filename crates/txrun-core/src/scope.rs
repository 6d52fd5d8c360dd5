//! Execution scope threaded through transactional call trees.
//!
//! A [`Scope`] replaces a request-scoped key/value side channel: it carries the
//! "transaction active" marker and, optionally, the transaction-scoped
//! executor an adapter embedded when the transaction was opened. Scopes are
//! immutable snapshots; every operation returns a derived value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

type Resource = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct Scope {
    enabled: bool,
    resource: Option<Resource>,
}

impl Scope {
    /// ## Summary
    /// Returns an empty scope: no transaction marker, no embedded resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// ## Summary
    /// Returns whether this scope is marked as running inside a transaction.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// ## Summary
    /// Derives a scope carrying the given transaction marker.
    #[must_use]
    pub fn mark(&self, enabled: bool) -> Self {
        Self {
            enabled,
            resource: self.resource.clone(),
        }
    }

    /// ## Summary
    /// Derives a scope embedding `resource` as the transaction-scoped executor.
    ///
    /// The marker is left untouched; adapters combine this with [`Scope::mark`].
    #[must_use]
    pub fn with_resource<R>(&self, resource: Arc<R>) -> Self
    where
        R: Any + Send + Sync,
    {
        Self {
            enabled: self.enabled,
            resource: Some(resource),
        }
    }

    /// ## Summary
    /// Derives a scope with no embedded resource.
    #[must_use]
    pub fn without_resource(&self) -> Self {
        Self {
            enabled: self.enabled,
            resource: None,
        }
    }

    /// ## Summary
    /// Looks up the embedded resource as `R`.
    ///
    /// Returns `None` when nothing is embedded or the embedded value has a
    /// different type.
    #[must_use]
    pub fn resource<R>(&self) -> Option<Arc<R>>
    where
        R: Any + Send + Sync,
    {
        self.resource.clone()?.downcast::<R>().ok()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("enabled", &self.enabled)
            .field("resource", &self.resource.is_some())
            .finish()
    }
}
