#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Builder for configuring and creating [`Inflow`] instances.
pub mod builder;

/// Task dispatchers for cache and loader work.
pub mod dispatch;

/// Bounded LRU retention for parametrized inflow families.
pub mod family;

/// The [`Inflow`] facade: `data`, `state`, and `load`.
pub mod inflow;

/// Parameter-driven inflow composition (`merge-by` semantics).
pub mod merged;

/// Parameter enums accepted by the facade operations.
pub mod params;

/// Serializable runtime knobs (retry timer, quiet-period timeout).
pub mod settings;

mod invalidation;
mod loading;
mod replay;
mod scheduler;
mod shared;

pub use builder::InflowBuilder;
pub use family::{InflowFamily, LruCache};
pub use inflow::{DataStream, Inflow, StateStream};
pub use merged::{MergedBuilder, MergedInflow};
pub use params::{DataParam, LoadParam, StateParam};
pub use settings::InflowSettings;

pub use inflow_core::{
    After, AlwaysConnected, At, BoxError, CacheSource, CacheStream, CacheWriter, Connectivity,
    Deferred, Expiration, FnLoader, FnSource, Idle, IfEmpty, IfExpired, InflowError, LoadError,
    LoadState, Loader, Loading, ManualConnectivity, MemoryCache, Never, ProgressTracker,
    SourceError,
};

/// The `inflow` prelude.
///
/// ```rust
/// use inflow::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        DataParam, Deferred, Expiration, FnLoader, IfEmpty, Inflow, InflowError, LoadParam,
        LoadState, Loader, MemoryCache, Never, StateParam,
    };
    pub use futures::StreamExt as _;
}
