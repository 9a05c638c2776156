//! Fault injection for the reference remote.

use offsync_protocol::{EntityId, RemoteError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// Groups of remote calls that faults and call counters apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `get_latest_cursor`, also used as the health check.
    Cursor,
    /// `list` and `get`.
    Read,
    /// Creates, updates, deletes and batch creates.
    Write,
    /// `get_changes`.
    Changes,
}

/// Scripted failures applied to incoming calls.
///
/// Faults are consumed in order: latency, offline, queued errors, then
/// lost responses (applied after the write takes effect).
#[derive(Debug, Default)]
pub struct FaultPlan {
    inner: Mutex<FaultState>,
}

#[derive(Debug, Default)]
struct FaultState {
    offline: bool,
    latency: Duration,
    queued: HashMap<Endpoint, VecDeque<RemoteError>>,
    lost_responses: HashMap<Endpoint, u32>,
    rejected: HashSet<EntityId>,
    calls: HashMap<Endpoint, u64>,
}

impl FaultPlan {
    /// Creates a plan with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a network error until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Fails the next `times` calls to `endpoint` with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: RemoteError, times: u32) {
        let mut state = self.inner.lock();
        let queue = state.queued.entry(endpoint).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Rate limits the next `times` calls to `endpoint`.
    pub fn rate_limit_next(&self, endpoint: Endpoint, times: u32) {
        self.fail_next(
            endpoint,
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            },
            times,
        );
    }

    /// Applies the next `times` calls to `endpoint` but reports a network
    /// error instead of the response.
    pub fn lose_next_responses(&self, endpoint: Endpoint, times: u32) {
        *self.inner.lock().lost_responses.entry(endpoint).or_default() += times;
    }

    /// Rejects every write of `id` with a 422.
    pub fn reject_entity(&self, id: EntityId) {
        self.inner.lock().rejected.insert(id);
    }

    /// Clears every scripted fault. Call counters are kept.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let calls = std::mem::take(&mut state.calls);
        *state = FaultState {
            calls,
            ..Default::default()
        };
    }

    /// Returns how many calls `endpoint` has received.
    pub fn calls(&self, endpoint: Endpoint) -> u64 {
        self.inner.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Returns the total number of calls received.
    pub fn total_calls(&self) -> u64 {
        self.inner.lock().calls.values().sum()
    }

    pub(crate) fn is_rejected(&self, id: EntityId) -> bool {
        self.inner.lock().rejected.contains(&id)
    }

    /// Counts the call, then returns the latency to apply and the fault, if any.
    pub(crate) fn admit(&self, endpoint: Endpoint) -> (Duration, Option<RemoteError>) {
        let mut state = self.inner.lock();
        *state.calls.entry(endpoint).or_default() += 1;
        let latency = state.latency;
        if state.offline {
            return (
                latency,
                Some(RemoteError::Network("connection refused".into())),
            );
        }
        let fault = state.queued.get_mut(&endpoint).and_then(VecDeque::pop_front);
        (latency, fault)
    }

    /// Returns true if this call's response should be dropped.
    pub(crate) fn take_lost_response(&self, endpoint: Endpoint) -> bool {
        let mut state = self.inner.lock();
        match state.lost_responses.get_mut(&endpoint) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}
