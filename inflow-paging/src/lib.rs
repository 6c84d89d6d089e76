#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Builder wiring a pager into an `Inflow<Paged<T>>`.
pub mod builder;

/// The paging cache protocol and the in-memory reference implementation.
pub mod cache;

/// Identity providers for deduplicating overlapping pages.
pub mod identity;

/// Merge strategies placing fresh pages against the local list.
pub mod merge;

/// Page parameters, results, and the remote page loader seam.
pub mod page;

/// Paged snapshots shown to observers.
pub mod paged;

/// The pager: local list + cache + remote coordination.
pub mod pager;

pub use builder::PagedInflowBuilder;
pub use cache::{InvalidationListener, MemoryPagingCache, PagingCache};
pub use identity::{IdentityProvider, KeyIdentity};
pub use merge::{MergeByKeys, MergeStrategy, MergeWithComparator};
pub use page::{FnPageLoader, PageLoader, PageParams, PageResult, PagingRemoteState};
pub use paged::Paged;
pub use pager::{Pager, PagerBuilder};

/// The `inflow-paging` prelude.
pub mod prelude {
    pub use crate::{
        FnPageLoader, MergeByKeys, MergeWithComparator, Paged, PagedInflowBuilder, Pager,
        PagingCache,
    };
    pub use inflow::prelude::*;
}
