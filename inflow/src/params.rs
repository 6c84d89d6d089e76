//! Parameter enums accepted by [`Inflow`](crate::Inflow) operations.

/// Selects the behavior of `data(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataParam {
    /// Cache stream bound to the background refresh scheduler: while at
    /// least one such stream is polled, expired values are reloaded
    /// automatically.
    AutoRefresh,
    /// Cache stream alone, no scheduling.
    CacheOnly,
}

/// Selects the state stream returned by `state(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateParam {
    /// State of refresh loads.
    Refresh,
    /// State of load-next calls. Only meaningful for paged inflows;
    /// otherwise it mirrors the refresh state.
    LoadNext,
}

/// Selects the behavior of `load(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadParam {
    /// Run the loader, joining an already-running call if any.
    Refresh,
    /// Complete immediately with the cached value unless it expires within
    /// the given number of milliseconds; otherwise refresh.
    ///
    /// Construct through [`LoadParam::refresh_if_expired`], which checks
    /// the bound.
    RefreshIfExpired(i64),
    /// Run the loader; if a call is already running, run one more time
    /// after it finishes (no intermediate idle state is published).
    RefreshForced,
    /// Load the next page. Only meaningful for paged inflows; otherwise it
    /// behaves as [`LoadParam::Refresh`].
    LoadNext,
}

impl LoadParam {
    /// `RefreshIfExpired` with a validated bound.
    ///
    /// A bound of `0` refreshes only when the cached value is already
    /// expired; `i64::MAX` never invokes the loader.
    ///
    /// # Panics
    ///
    /// Panics if `expires_in_bound < 0`.
    pub fn refresh_if_expired(expires_in_bound: i64) -> Self {
        assert!(expires_in_bound >= 0, "expiration bound must not be negative");
        LoadParam::RefreshIfExpired(expires_in_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_bound_is_kept() {
        assert_eq!(LoadParam::refresh_if_expired(0), LoadParam::RefreshIfExpired(0));
        assert_eq!(
            LoadParam::refresh_if_expired(i64::MAX),
            LoadParam::RefreshIfExpired(i64::MAX)
        );
    }

    #[test]
    #[should_panic(expected = "must not be negative")]
    fn negative_bound_is_rejected() {
        let _ = LoadParam::refresh_if_expired(-1);
    }
}
