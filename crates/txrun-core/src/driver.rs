//! Backend-specific error classification.

use crate::error::SerializationError;

/// Normalizes backend errors into the generic [`SerializationError`].
///
/// Implementations must never swallow an error: a conflict is returned with
/// [`SerializationError`] attached as context (so the original error stays
/// reachable through `downcast_ref`), anything else is returned unchanged.
pub trait Driver: Send + Sync {
    fn error(&self, err: anyhow::Error) -> anyhow::Error;
}

impl<F> Driver for F
where
    F: Fn(anyhow::Error) -> anyhow::Error + Send + Sync,
{
    fn error(&self, err: anyhow::Error) -> anyhow::Error {
        self(err)
    }
}

/// ## Summary
/// Marks `err` as a serialization conflict unless it already is one.
#[must_use]
pub fn serialization(err: anyhow::Error) -> anyhow::Error {
    if err.is::<SerializationError>() {
        err
    } else {
        err.context(SerializationError)
    }
}

/// Outcome of passing an error through an optional classifier.
pub(crate) struct Classified {
    pub error: anyhow::Error,
    pub conflict: bool,
}

/// Without a driver nothing is ever a conflict, whatever the error carries.
pub(crate) fn classify(driver: Option<&dyn Driver>, err: anyhow::Error) -> Classified {
    match driver {
        Some(driver) => {
            let error = driver.error(err);
            let conflict = error.is::<SerializationError>();
            Classified { error, conflict }
        }
        None => Classified {
            error: err,
            conflict: false,
        },
    }
}
