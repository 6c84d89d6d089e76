//! Error types shared by the inflow runtime.
//!
//! The taxonomy is small by design:
//!
//! - [`InflowError::Load`] — the loader failed; carries the [`LoadError`]
//!   also published on the state stream.
//! - [`InflowError::Cache`] — the upstream cache stream failed; routed to
//!   every active subscriber of the shared cache view.
//! - [`InflowError::Cancelled`] — the owning scope was cancelled; surfaced
//!   on subscriber streams and in-flight deferreds instead of hanging.
//!
//! Build-time misconfiguration (missing data, invalid numeric ranges) is a
//! programmer error and panics in the builder rather than appearing here.

use std::sync::Arc;

use thiserror::Error;

use crate::state::LoadError;

/// Boxed error type returned by user-supplied loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared error type produced by cache source streams.
///
/// Cache-read failures fan out to every subscriber of the shared view, so
/// the error must be cheaply cloneable.
pub type SourceError = Arc<dyn std::error::Error + Send + Sync>;

/// Error type observed on data streams and deferred results.
#[derive(Debug, Clone, Error)]
pub enum InflowError {
    /// The loader call failed.
    #[error("load failed: {0}")]
    Load(LoadError),

    /// The upstream cache stream failed.
    #[error("cache stream failed: {0}")]
    Cache(SourceError),

    /// The owning scope was cancelled.
    #[error("inflow scope cancelled")]
    Cancelled,
}

impl InflowError {
    /// Returns the loader error, if this is a load failure.
    pub fn as_load_error(&self) -> Option<&LoadError> {
        match self {
            InflowError::Load(error) => Some(error),
            _ => None,
        }
    }

    /// Whether this error is a scope cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InflowError::Cancelled)
    }
}
