//! Transaction orchestration over SQL resources.
//!
//! A [`Provider`] opens [`Transaction`] handles, the [`run`] orchestrator
//! drives one begin/callback/commit cycle per attempt and, when the provider
//! carries a [`Driver`] classifier, retries the whole cycle on serialization
//! conflicts according to a [`RetryPolicy`].

pub mod config;
pub mod driver;
pub mod error;
pub mod provider;
pub mod run;
pub mod scope;
pub mod transaction;

pub use driver::Driver;
pub use error::{BeginTxError, CommitError, RetriesExhausted, SerializationError, TxErrorExt};
pub use provider::{IsolationLevel, Provider, ProviderExt, TxOptions, WithDriver};
pub use run::{RetryPolicy, RunOptions, run};
pub use scope::Scope;
pub use transaction::{BoxTransaction, Transaction, TxScope};
