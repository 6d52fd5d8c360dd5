//! Tests for serialization-conflict retries.
//!
//! Verifies retry bounds, restart from a fresh begin, strict attempt
//! ordering, and that nothing is retried without a classifier.

use std::io;

use txrun_core::{
    ProviderExt, RetriesExhausted, RetryPolicy, RunOptions, Scope, SerializationError,
    TxErrorExt, run,
};
use txrun_test::{Begin, Event, MockProvider, RawConflict, conflict_driver};

use super::helpers::{InsufficientFunds, conflict, succeed};

// ============================================================================
// Budget
// ============================================================================

/// ## Summary
/// With a bounded budget of N and a conflict on every attempt, exactly N+1
/// attempts run and the last conflict comes back marked as exhausted.
#[test_log::test(tokio::test)]
async fn bounded_budget_runs_n_plus_one_attempts() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok(), Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(RetryPolicy::Bounded(2)),
        conflict,
    )
    .await
    .expect_err("budget should run out");

    assert!(err.is_retries_exhausted());
    assert!(err.is_serialization());
    assert_eq!(
        err.downcast_ref::<RetriesExhausted>(),
        Some(&RetriesExhausted { attempts: 3 })
    );
    assert_eq!(err.downcast_ref::<RawConflict>(), Some(&RawConflict::default()));
    assert_eq!(journal.begins(), 3);
    assert_eq!(journal.rollbacks(), 3);
    assert_eq!(journal.commits(), 0);
}

/// ## Summary
/// Commit-time conflicts restart the attempt; when the budget runs out the
/// error carries the exhausted, commit and serialization markers.
#[test_log::test(tokio::test)]
async fn commit_conflicts_exhaust_the_budget() {
    let provider = MockProvider::new([
        Begin::commit_fails(RawConflict::default()),
        Begin::commit_fails(RawConflict::default()),
        Begin::commit_fails(RawConflict::default()),
    ]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = provider
        .run(
            &Scope::new(),
            &RunOptions::new().retry_serialization(2_u32),
            succeed,
        )
        .await
        .expect_err("budget should run out");

    assert!(err.is_retries_exhausted());
    assert!(err.is_serialization());
    assert!(err.is_commit_failure());
    assert_eq!(journal.begins(), 3);
    assert_eq!(journal.commits(), 3);
    assert_eq!(journal.rollbacks(), 0);
}

/// ## Summary
/// Conflicts on the first k attempts followed by success commit on attempt
/// k+1; every attempt is resolved before the next one begins.
#[test_log::test(tokio::test)]
async fn eventual_success_commits_on_the_next_attempt() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok(), Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let mut calls = 0;
    let value = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(3_u32),
        |_scope| {
            calls += 1;
            let call = calls;
            async move {
                if call <= 2 {
                    return Err(anyhow::Error::new(RawConflict::default()));
                }
                Ok(call)
            }
        },
    )
    .await
    .expect("third attempt should commit");

    assert_eq!(value, 3);
    assert_eq!(
        journal.events(),
        vec![
            Event::Begin {
                attempt: 1,
                options: None
            },
            Event::Rollback { attempt: 1 },
            Event::Begin {
                attempt: 2,
                options: None
            },
            Event::Rollback { attempt: 2 },
            Event::Begin {
                attempt: 3,
                options: None
            },
            Event::Commit { attempt: 3 },
        ]
    );
}

/// ## Summary
/// An unbounded budget keeps retrying until the conflict goes away.
#[test_log::test(tokio::test)]
async fn unbounded_budget_retries_until_success() {
    let provider = MockProvider::new((0..6).map(|_| Begin::ok()));
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let mut calls = 0;
    run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(-1_i64),
        |_scope| {
            calls += 1;
            let call = calls;
            async move {
                if call <= 5 {
                    return Err(anyhow::Error::new(RawConflict::default()));
                }
                Ok(())
            }
        },
    )
    .await
    .expect("sixth attempt should commit");

    assert_eq!(journal.begins(), 6);
    assert_eq!(journal.rollbacks(), 5);
    assert_eq!(journal.commits(), 1);
}

// ============================================================================
// Begin phase
// ============================================================================

/// ## Summary
/// A conflict reported while opening the transaction restarts the attempt.
#[test_log::test(tokio::test)]
async fn begin_conflict_is_retried() {
    let provider = MockProvider::new([Begin::fail(RawConflict::default()), Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(1_u32),
        succeed,
    )
    .await
    .expect("second attempt should commit");

    assert_eq!(journal.begins(), 2);
    assert_eq!(journal.commits(), 1);
}

/// ## Summary
/// Begin conflicts that outlast the budget are begin failures.
#[test_log::test(tokio::test)]
async fn begin_conflicts_exhaust_the_budget() {
    let provider = MockProvider::new([
        Begin::fail(RawConflict::default()),
        Begin::fail(RawConflict::default()),
    ]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(1_u32),
        succeed,
    )
    .await
    .expect_err("budget should run out");

    assert!(err.is_begin_failure());
    assert!(err.is_serialization());
    assert!(err.is_retries_exhausted());
    assert_eq!(journal.begins(), 2);
}

/// ## Summary
/// A non-conflict begin failure during a retry ends the run.
#[test_log::test(tokio::test)]
async fn begin_failure_during_retry_is_final() {
    let provider = MockProvider::new([
        Begin::ok(),
        Begin::fail(io::Error::from(io::ErrorKind::ConnectionRefused)),
    ]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(5_u32),
        conflict,
    )
    .await
    .expect_err("begin should fail");

    assert!(err.is_begin_failure());
    assert!(!err.is_retries_exhausted());
    assert_eq!(
        err.downcast_ref::<io::Error>().map(io::Error::kind),
        Some(io::ErrorKind::ConnectionRefused)
    );
    assert_eq!(journal.begins(), 2);
    assert_eq!(journal.rollbacks(), 1);
}

/// ## Summary
/// A business error on a retry is returned unchanged and stops retrying.
#[test_log::test(tokio::test)]
async fn callback_error_during_retry_is_final() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok(), Begin::ok()]);
    let provider = provider.with_driver(conflict_driver());

    let mut calls = 0;
    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(5_u32),
        |_scope| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    return Err(anyhow::Error::new(RawConflict::default()));
                }
                Err::<(), _>(anyhow::Error::new(InsufficientFunds))
            }
        },
    )
    .await
    .expect_err("business error should propagate");

    assert_eq!(format!("{err:#}"), "insufficient funds");
    assert!(!err.is_retries_exhausted());
    assert_eq!(calls, 2);
    assert_eq!(provider.inner().remaining(), 1);
}

// ============================================================================
// Disabled retries
// ============================================================================

/// ## Summary
/// With a classifier but no budget, a conflict is classified and returned
/// after a single attempt.
#[test_log::test(tokio::test)]
async fn disabled_budget_returns_the_classified_conflict() {
    let provider = MockProvider::new([Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = run(&Scope::new(), &provider, &RunOptions::new(), conflict)
        .await
        .expect_err("conflict should propagate");

    assert!(err.is_serialization());
    assert!(!err.is_retries_exhausted());
    assert!(err.is::<RawConflict>());
    assert_eq!(journal.begins(), 1);
    assert_eq!(journal.rollbacks(), 1);
}

/// ## Summary
/// An empty bound behaves like no budget at all: the conflict comes back
/// classified, without the exhausted marker.
#[test_log::test(tokio::test)]
async fn empty_bound_returns_the_classified_conflict() {
    let provider = MockProvider::new([Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(conflict_driver());

    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(RetryPolicy::Bounded(0)),
        conflict,
    )
    .await
    .expect_err("conflict should propagate");

    assert!(err.is_serialization());
    assert!(!err.is_retries_exhausted());
    assert!(err.downcast_ref::<RetriesExhausted>().is_none());
    assert_eq!(journal.begins(), 1);
}

/// ## Summary
/// A commit conflict without a budget is a commit failure marked as a
/// serialization conflict.
#[test_log::test(tokio::test)]
async fn disabled_budget_wraps_commit_conflicts() {
    let provider = MockProvider::new([Begin::commit_fails(RawConflict::default())]);
    let provider = provider.with_driver(conflict_driver());

    let err = run(&Scope::new(), &provider, &RunOptions::new(), succeed)
        .await
        .expect_err("commit should fail");

    assert!(err.is_commit_failure());
    assert!(err.is_serialization());
    assert_eq!(
        format!("{err:#}"),
        "commit tx: serialization error: pq: could not serialize access due to concurrent update (SQLSTATE 40001)"
    );
}

/// ## Summary
/// Without a classifier nothing is a conflict: a raw conflict, or even the
/// sentinel itself, is an ordinary callback failure whatever the budget.
#[test_log::test(tokio::test)]
async fn no_classifier_means_no_retry() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok()]);
    let journal = provider.journal();
    let options = RunOptions::new().retry_serialization(RetryPolicy::Unbounded);

    let err = run(&Scope::new(), &provider, &options, conflict)
        .await
        .expect_err("conflict should propagate");

    assert!(err.is::<RawConflict>());
    assert!(!err.is_serialization());

    let err = run(&Scope::new(), &provider, &options, |_scope| async {
        Err::<(), _>(anyhow::Error::new(SerializationError))
    })
    .await
    .expect_err("sentinel should propagate");

    assert!(err.is_serialization());
    assert!(!err.is_retries_exhausted());
    assert_eq!(journal.begins(), 2);
    assert_eq!(journal.rollbacks(), 2);
}
