//! Connectivity signal.
//!
//! An optional capability letting inflows retry failed loads as soon as a
//! connection comes back instead of waiting out the retry timer. The
//! runtime consumes it through [`signals`], which converts the boolean
//! watch into a signal stream emitting once immediately and then on every
//! rising edge (disconnected → connected).

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use tokio::sync::watch;

/// Provider of a boolean connectivity watch.
pub trait Connectivity: Send + Sync {
    /// Subscribes to the connectivity flag.
    fn connected(&self) -> watch::Receiver<bool>;
}

impl<C> Connectivity for Arc<C>
where
    C: Connectivity + ?Sized,
{
    fn connected(&self) -> watch::Receiver<bool> {
        self.as_ref().connected()
    }
}

impl<C> Connectivity for Box<C>
where
    C: Connectivity + ?Sized,
{
    fn connected(&self) -> watch::Receiver<bool> {
        self.as_ref().connected()
    }
}

/// Connectivity that is always on. The default provider.
#[derive(Debug)]
pub struct AlwaysConnected {
    tx: watch::Sender<bool>,
}

impl AlwaysConnected {
    /// Creates the provider.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        AlwaysConnected { tx }
    }
}

impl Default for AlwaysConnected {
    fn default() -> Self {
        AlwaysConnected::new()
    }
}

impl Connectivity for AlwaysConnected {
    fn connected(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Manually switched connectivity, for adapters and tests.
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    /// Creates the provider with an initial flag.
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        ManualConnectivity { tx: Arc::new(tx) }
    }

    /// Sets the connectivity flag.
    pub fn set(&self, connected: bool) {
        self.tx.send_replace(connected);
    }
}

impl Connectivity for ManualConnectivity {
    fn connected(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

struct SignalState {
    rx: watch::Receiver<bool>,
    emitted_initial: bool,
    prev: bool,
}

/// Converts a connectivity provider into a signal stream.
///
/// Emits `()` once immediately (so a consumer's first iteration always
/// runs) and then on every rising edge of the flag. Ends if the provider
/// is dropped.
pub fn signals(connectivity: &dyn Connectivity) -> BoxStream<'static, ()> {
    let mut rx = connectivity.connected();
    let prev = *rx.borrow_and_update();
    let state = SignalState { rx, emitted_initial: false, prev };

    Box::pin(stream::unfold(state, |mut state| async move {
        if !state.emitted_initial {
            state.emitted_initial = true;
            return Some(((), state));
        }
        loop {
            if state.rx.changed().await.is_err() {
                return None;
            }
            let now = *state.rx.borrow_and_update();
            let rising = now && !state.prev;
            state.prev = now;
            if rising {
                return Some(((), state));
            }
        }
    }))
}
