//! Tests for the Postgres classifier driving retries.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use txrun_core::{ProviderExt, RunOptions, Scope, TxErrorExt, run};
use txrun_diesel::{DbError, PostgresDriver};
use txrun_test::{Begin, MockProvider};

fn database_error(kind: DatabaseErrorKind, message: &str) -> DieselError {
    DieselError::DatabaseError(kind, Box::new(message.to_owned()))
}

/// ## Summary
/// SQLSTATE 40001 raised by a query inside the callback restarts the attempt.
#[test_log::test(tokio::test)]
async fn serialization_failure_in_callback_is_retried() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(PostgresDriver);

    let mut calls = 0;
    run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(1_u32),
        |_scope| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    return Err(anyhow::Error::new(DbError::from(database_error(
                        DatabaseErrorKind::SerializationFailure,
                        "could not serialize access due to read/write dependencies among transactions",
                    ))));
                }
                Ok(())
            }
        },
    )
    .await
    .expect("second attempt should commit");

    assert_eq!(journal.begins(), 2);
    assert_eq!(journal.rollbacks(), 1);
    assert_eq!(journal.commits(), 1);
}

/// ## Summary
/// SQLSTATE 40P01 reported by commit restarts the attempt.
#[test_log::test(tokio::test)]
async fn deadlock_on_commit_is_retried() {
    let provider = MockProvider::new([
        Begin::commit_fails(database_error(
            DatabaseErrorKind::Unknown,
            "deadlock detected",
        )),
        Begin::ok(),
    ]);
    let journal = provider.journal();
    let provider = provider.with_driver(PostgresDriver);

    provider
        .run(
            &Scope::new(),
            &RunOptions::new().retry_serialization(1_u32),
            |_scope| async { Ok::<_, anyhow::Error>(()) },
        )
        .await
        .expect("second attempt should commit");

    assert_eq!(journal.begins(), 2);
    assert_eq!(journal.commits(), 2);
}

/// ## Summary
/// Constraint violations are not conflicts and come back unchanged.
#[test_log::test(tokio::test)]
async fn unique_violation_is_not_retried() {
    let provider = MockProvider::new([Begin::ok(), Begin::ok()]);
    let journal = provider.journal();
    let provider = provider.with_driver(PostgresDriver);

    let err = run(
        &Scope::new(),
        &provider,
        &RunOptions::new().retry_serialization(3_u32),
        |_scope| async {
            Err::<(), _>(anyhow::Error::new(database_error(
                DatabaseErrorKind::UniqueViolation,
                "duplicate key value violates unique constraint \"accounts_pkey\"",
            )))
        },
    )
    .await
    .expect_err("violation should propagate");

    assert!(!err.is_serialization());
    assert!(matches!(
        err.downcast_ref::<DieselError>(),
        Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
    ));
    assert_eq!(journal.begins(), 1);
}
