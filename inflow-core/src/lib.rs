#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod connectivity;
pub mod deferred;
pub mod error;
pub mod expiration;
pub mod loader;
pub mod progress;
pub mod source;
pub mod state;

pub use connectivity::{AlwaysConnected, Connectivity, ManualConnectivity, signals};
pub use deferred::Deferred;
pub use error::{BoxError, InflowError, SourceError};
pub use expiration::{After, At, Expiration, IfEmpty, IfExpired, Never};
pub use loader::{FnLoader, Loader};
pub use progress::ProgressTracker;
pub use source::{CacheSource, CacheStream, CacheWriter, FnSource, MemoryCache};
pub use state::{Idle, LoadError, LoadState, Loading};
