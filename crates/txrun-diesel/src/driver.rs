//! Postgres conflict classification.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use txrun_core::Driver;
use txrun_core::driver::serialization;

const DEADLOCK_MESSAGE: &str = "deadlock detected";

/// Classifies Postgres' retryable ordering violations as serialization
/// conflicts: SQLSTATE `40001` (`serialization_failure`) and `40P01`
/// (`deadlock_detected`).
///
/// Diesel maps `40001` to [`DatabaseErrorKind::SerializationFailure`] but
/// folds `40P01` into an unknown kind without exposing the SQLSTATE, so
/// deadlocks are recognised by the server's message. That match only holds
/// while the server reports messages in English (`lc_messages`); with a
/// localized server deadlocks are returned unclassified and not retried.
///
/// Conflicts reported by `COMMIT` are found whether diesel-async returns the
/// commit error as is (its internal rollback succeeded) or inside
/// [`DieselError::RollbackErrorOnCommit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl Driver for PostgresDriver {
    fn error(&self, err: anyhow::Error) -> anyhow::Error {
        let conflict = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<DieselError>())
            .any(is_conflict);

        if conflict { serialization(err) } else { err }
    }
}

fn is_conflict(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => true,
        DieselError::DatabaseError(_, info) => info.message().starts_with(DEADLOCK_MESSAGE),
        DieselError::RollbackErrorOnCommit { commit_error, .. } => is_conflict(commit_error),
        _ => false,
    }
}
