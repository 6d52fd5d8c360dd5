//! Scripted test doubles for the transaction orchestrator.
//!
//! A [`MockProvider`] plays back a script of [`Begin`] steps, one per
//! `begin`/`begin_tx` call, and records every call in a shared [`Journal`] so
//! tests can assert on exactly what reached the "driver".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use thiserror::Error;
use txrun_core::driver::serialization;
use txrun_core::{BoxTransaction, Driver, Provider, Scope, Transaction, TxOptions, TxScope};

/// Backend-native conflict report, as a driver would surface SQLSTATE `40001`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pq: could not serialize access due to concurrent update (SQLSTATE {code})")]
pub struct RawConflict {
    pub code: &'static str,
}

impl Default for RawConflict {
    fn default() -> Self {
        Self { code: "40001" }
    }
}

/// ## Summary
/// Returns a classifier mapping [`RawConflict`] to the serialization sentinel.
#[must_use]
pub fn conflict_driver() -> impl Driver {
    |err: anyhow::Error| {
        if err.is::<RawConflict>() {
            serialization(err)
        } else {
            err
        }
    }
}

/// Locks a mutex and recovers from poisoning; a panicking callback must not
/// hide what the journal recorded.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            mutex.clear_poison();
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin {
        attempt: usize,
        options: Option<TxOptions>,
    },
    Commit {
        attempt: usize,
    },
    Rollback {
        attempt: usize,
    },
}

#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<Event>>,
    transitions: AtomicUsize,
    resolved_markers: Mutex<Vec<bool>>,
}

impl Journal {
    fn record(&self, event: Event) {
        tracing::trace!(?event, "Mock call");
        lock(&self.events).push(event);
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn begins(&self) -> usize {
        self.count(|event| matches!(event, Event::Begin { .. }))
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(|event| matches!(event, Event::Commit { .. }))
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(|event| matches!(event, Event::Rollback { .. }))
    }

    /// Number of marker true-to-false transitions performed by handles.
    #[must_use]
    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::SeqCst)
    }

    /// Marker observed on the handle's scope after each commit/rollback call.
    #[must_use]
    pub fn resolved_markers(&self) -> Vec<bool> {
        lock(&self.resolved_markers).clone()
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        lock(&self.events).iter().filter(|event| predicate(event)).count()
    }
}

/// Scripted outcome of one `begin` call.
pub enum Begin {
    Fail(anyhow::Error),
    Open(TxPlan),
}

impl Begin {
    /// Opens a transaction whose commit and rollback succeed.
    #[must_use]
    pub fn ok() -> Self {
        Self::Open(TxPlan::default())
    }

    #[must_use]
    pub fn fail(err: impl Into<anyhow::Error>) -> Self {
        Self::Fail(err.into())
    }

    #[must_use]
    pub fn commit_fails(err: impl Into<anyhow::Error>) -> Self {
        Self::Open(TxPlan::default().commit_error(err))
    }
}

/// Errors the opened transaction reports, each returned once.
#[derive(Default)]
pub struct TxPlan {
    commit: Option<anyhow::Error>,
    rollback: Option<anyhow::Error>,
}

impl TxPlan {
    #[must_use]
    pub fn commit_error(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.commit = Some(err.into());
        self
    }

    #[must_use]
    pub fn rollback_error(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.rollback = Some(err.into());
        self
    }
}

/// Resource embedded in a mock transaction's scope.
#[derive(Debug)]
pub struct MockConn {
    pub attempt: usize,
}

pub struct MockTx {
    attempt: usize,
    scope: TxScope,
    plan: Mutex<TxPlan>,
    journal: Arc<Journal>,
}

impl MockTx {
    fn resolve(&self) {
        if self.scope.resolve() {
            self.journal.transitions.fetch_add(1, Ordering::SeqCst);
        }
        lock(&self.journal.resolved_markers).push(self.scope.current().enabled());
    }
}

impl Transaction for MockTx {
    fn scope(&self) -> Scope {
        self.scope.current()
    }

    fn commit(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.resolve();
            self.journal.record(Event::Commit {
                attempt: self.attempt,
            });

            lock(&self.plan).commit.take().map_or(Ok(()), Err)
        })
    }

    fn rollback(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.resolve();
            self.journal.record(Event::Rollback {
                attempt: self.attempt,
            });

            lock(&self.plan).rollback.take().map_or(Ok(()), Err)
        })
    }
}

pub struct MockProvider {
    script: Mutex<VecDeque<Begin>>,
    journal: Arc<Journal>,
}

impl MockProvider {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Begin>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            journal: Arc::default(),
        }
    }

    #[must_use]
    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }

    /// Script steps not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

impl Provider for MockProvider {
    fn begin_tx<'a>(
        &'a self,
        scope: &'a Scope,
        options: Option<TxOptions>,
    ) -> BoxFuture<'a, anyhow::Result<BoxTransaction>> {
        Box::pin(async move {
            let attempt = self.journal.begins() + 1;
            self.journal.record(Event::Begin { attempt, options });

            let Some(step) = lock(&self.script).pop_front() else {
                anyhow::bail!("unexpected begin #{attempt}: script exhausted");
            };

            match step {
                Begin::Fail(err) => Err(err),
                Begin::Open(plan) => {
                    let scope = TxScope::new(&scope.with_resource(Arc::new(MockConn { attempt })));
                    Ok(Box::new(MockTx {
                        attempt,
                        scope,
                        plan: Mutex::new(plan),
                        journal: Arc::clone(&self.journal),
                    }) as BoxTransaction)
                }
            }
        })
    }

    fn tx_enabled(&self, scope: &Scope) -> bool {
        scope.enabled() && scope.resource::<MockConn>().is_some()
    }
}
