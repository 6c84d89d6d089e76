//! The loading state machine.
//!
//! Every inflow publishes a [`LoadState`] stream describing its loader:
//!
//! ```text
//! Idle(Initial) ──► Loading(Started) ──► Loading(Progress)* ──► Idle(Success)
//!       ▲                                                 └──► Idle(Error)
//!       └──────────────── next load ──────────────────────────────┘
//! ```
//!
//! Within one inflow the sequence is serialized: every `Loading` run ends
//! in exactly one `Idle` before the next `Loading` begins. The only
//! exception is a forced repeat, which suppresses the intermediate `Idle`
//! entirely and keeps the state in `Loading` across both runs.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SourceError;

/// State of an inflow's loader.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    /// No load is running.
    Idle(Idle),
    /// A load is running.
    Loading(Loading),
}

impl LoadState {
    /// The state every inflow starts in.
    pub fn initial() -> Self {
        LoadState::Idle(Idle::Initial)
    }

    /// Whether a load is currently running.
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading(_))
    }

    /// Returns the error of an `Idle(Error)` state.
    pub fn error(&self) -> Option<&LoadError> {
        match self {
            LoadState::Idle(Idle::Error(error)) => Some(error),
            _ => None,
        }
    }
}

/// Idle sub-states.
#[derive(Debug, Clone, PartialEq)]
pub enum Idle {
    /// Nothing was loaded yet.
    Initial,
    /// The last load succeeded.
    Success,
    /// The last load failed.
    Error(LoadError),
}

/// Loading sub-states.
#[derive(Debug, Clone, PartialEq)]
pub enum Loading {
    /// The loader was invoked but reported no progress yet.
    Started,
    /// The loader reported progress.
    Progress {
        /// Units of work done so far.
        current: f64,
        /// Total units of work, if known.
        total: f64,
    },
}

/// A loader failure as observed on the state stream.
///
/// Clones share one identity (`id`) and one handled flag, so several
/// observers of the same state stream can coordinate exactly-once error
/// handling via [`LoadError::mark_handled`].
#[derive(Clone)]
pub struct LoadError {
    error: SourceError,
    id: u64,
    handled: Arc<AtomicBool>,
}

impl LoadError {
    /// Wraps a loader error under a unique ascending id.
    pub fn new(error: SourceError, id: u64) -> Self {
        LoadError { error, id, handled: Arc::new(AtomicBool::new(false)) }
    }

    /// The underlying loader error.
    pub fn error(&self) -> &SourceError {
        &self.error
    }

    /// Unique ascending id of this failure.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the error as handled.
    ///
    /// Returns `true` for exactly one caller across all clones of this
    /// error, enabling "show the toast exactly once" semantics among
    /// several collectors.
    pub fn mark_handled(&self) -> bool {
        !self.handled.swap(true, Ordering::AcqRel)
    }

    /// Whether some observer already handled this error.
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadError")
            .field("id", &self.id)
            .field("error", &self.error)
            .field("handled", &self.is_handled())
            .finish()
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}
