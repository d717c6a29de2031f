//! Typed error kinds for the ingestion/aggregation/doctrine pipeline.
//!
//! Every variant corresponds to one of the error kinds named in the
//! specification, together with its propagation policy (see call sites in
//! `pipeline.rs`): `AuthError` and `RateBudgetExhausted` abort the cycle
//! before any write; `FetchError` transient/fatal variants degrade to
//! partial data; `StoreError` retries a bounded number of times before
//! aborting; `CatalogMiss` is logged, not propagated; `CycleBusy` and
//! `Cancelled` are reported directly to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("fetch failed (transient): {detail}")]
    FetchTransient { detail: String },

    #[error("fetch failed (fatal): {detail}")]
    FetchFatal { detail: String },

    #[error("rate budget exhausted: error-limit-remain reached 0")]
    RateBudgetExhausted,

    #[error("store error: {0}")]
    Store(String),

    #[error("cycle already in progress")]
    CycleBusy,

    #[error("cycle cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Store(e.to_string())
    }
}
