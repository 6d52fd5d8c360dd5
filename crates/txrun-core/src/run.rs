//! The begin/callback/commit orchestrator.
//!
//! Each attempt opens a fresh transaction, hands its scope to the callback
//! and resolves it: commit on success, rollback on callback error or panic.
//! When the provider carries a [`Driver`], errors from every phase are
//! classified and serialization conflicts restart the whole attempt as long
//! as the [`RetryPolicy`] allows.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use serde::Deserialize;

use crate::driver::{Driver, classify};
use crate::error::{BeginTxError, CommitError, RetriesExhausted};
use crate::provider::{Provider, TxOptions};
use crate::scope::Scope;
use crate::transaction::Transaction;

/// How many additional attempts a serialization conflict may trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum RetryPolicy {
    #[default]
    Disabled,
    /// Up to `n` attempts after the first one; `Bounded(0)` behaves as
    /// [`RetryPolicy::Disabled`].
    Bounded(u32),
    Unbounded,
}

impl RetryPolicy {
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled | Self::Bounded(0))
    }

    /// ## Summary
    /// Returns whether another attempt may start after `retries` retries.
    #[must_use]
    pub const fn allows(self, retries: u32) -> bool {
        match self {
            Self::Disabled => false,
            Self::Bounded(limit) => retries < limit,
            Self::Unbounded => true,
        }
    }
}

/// `0` disables retries, a positive count bounds them, a negative count
/// retries until the conflict goes away.
impl From<i64> for RetryPolicy {
    fn from(times: i64) -> Self {
        match times {
            0 => Self::Disabled,
            n if n < 0 => Self::Unbounded,
            n => Self::Bounded(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

impl From<u32> for RetryPolicy {
    fn from(times: u32) -> Self {
        if times == 0 {
            Self::Disabled
        } else {
            Self::Bounded(times)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub tx: Option<TxOptions>,
    pub retry: RetryPolicy,
}

impl RunOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tx: None,
            retry: RetryPolicy::Disabled,
        }
    }

    #[must_use]
    pub const fn tx_options(mut self, options: TxOptions) -> Self {
        self.tx = Some(options);
        self
    }

    #[must_use]
    pub fn retry_serialization(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = retry.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Callback,
    Commit,
}

impl Phase {
    /// Callback errors are returned undecorated.
    fn wrap(self, err: anyhow::Error) -> anyhow::Error {
        match self {
            Self::Begin => err.context(BeginTxError),
            Self::Callback => err,
            Self::Commit => err.context(CommitError),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::Callback => "callback",
            Self::Commit => "commit",
        })
    }
}

enum Failure {
    /// Final, already wrapped for its phase.
    Fatal(anyhow::Error),
    /// Serialization conflict, not yet wrapped.
    Conflict { phase: Phase, error: anyhow::Error },
}

impl Failure {
    fn new(phase: Phase, driver: Option<&dyn Driver>, err: anyhow::Error) -> Self {
        let classified = classify(driver, err);
        if classified.conflict {
            Self::Conflict {
                phase,
                error: classified.error,
            }
        } else {
            Self::Fatal(phase.wrap(classified.error))
        }
    }
}

/// ## Summary
/// Runs `callback` inside a transaction opened by `provider`.
///
/// The callback receives the transaction's scope (marked as transactional)
/// and may run several times when retries are enabled, so it must be safe to
/// re-execute. The transaction is rolled back when the callback fails or
/// panics; a panic is re-raised unchanged once the rollback has completed.
///
/// ## Errors
/// - Begin failures carry [`BeginTxError`] over the (classified) driver error.
/// - Callback errors are returned as produced.
/// - Commit failures carry [`CommitError`] over the (classified) driver error.
/// - When a bounded retry budget runs out, the last conflict is returned with
///   [`RetriesExhausted`] attached.
#[tracing::instrument(skip_all, fields(retry = ?options.retry))]
pub async fn run<P, F, Fut, T>(
    scope: &Scope,
    provider: &P,
    options: &RunOptions,
    mut callback: F,
) -> anyhow::Result<T>
where
    P: Provider + ?Sized,
    F: FnMut(Scope) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let driver = provider.driver();
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let outcome = attempt(scope, provider, driver, options.tx, &mut callback).await;
        let (phase, error) = match outcome {
            Ok(value) => {
                tracing::debug!(attempts, "Transaction committed");
                return Ok(value);
            }
            Err(Failure::Fatal(err)) => return Err(err),
            Err(Failure::Conflict { phase, error }) => (phase, error),
        };

        if !options.retry.is_enabled() {
            return Err(phase.wrap(error));
        }

        if !options.retry.allows(attempts - 1) {
            tracing::debug!(attempts, %phase, "Serialization retries exhausted");
            return Err(phase.wrap(error).context(RetriesExhausted { attempts }));
        }

        tracing::debug!(
            attempts,
            %phase,
            error = %error,
            "Serialization conflict, retrying transaction"
        );
    }
}

async fn attempt<P, F, Fut, T>(
    scope: &Scope,
    provider: &P,
    driver: Option<&dyn Driver>,
    tx_options: Option<TxOptions>,
    callback: &mut F,
) -> Result<T, Failure>
where
    P: Provider + ?Sized,
    F: FnMut(Scope) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let tx = match provider.begin_tx(scope, tx_options).await {
        Ok(tx) => tx,
        Err(err) => return Err(Failure::new(Phase::Begin, driver, err)),
    };

    // The closure itself may panic before handing back its future.
    let outcome = AssertUnwindSafe(async { callback(tx.scope()).await })
        .catch_unwind()
        .await;

    let value = match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            rollback(tx.as_ref()).await;
            return Err(Failure::new(Phase::Callback, driver, err));
        }
        Err(payload) => {
            rollback(tx.as_ref()).await;
            panic::resume_unwind(payload);
        }
    };

    // A failed commit leaves the driver transaction terminal; no rollback.
    if let Err(err) = tx.commit().await {
        return Err(Failure::new(Phase::Commit, driver, err));
    }

    Ok(value)
}

/// Best effort; the error that caused the rollback is the one reported.
async fn rollback(tx: &dyn Transaction) {
    if let Err(err) = tx.rollback().await {
        tracing::debug!(error = %err, "Discarding rollback failure");
    }
}
