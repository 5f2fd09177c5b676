use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cooperative rebalance barrier.
///
/// While a [`RebalanceHold`] is alive the group rebalance waits, so the
/// records of the batch being handled stay owned by this member until their
/// offsets are committed. Dropping the hold releases the barrier on every
/// exit path of batch handling.
#[derive(Clone, Default)]
pub struct RebalanceGate {
    inner: Arc<GateState>,
}

#[derive(Default)]
struct GateState {
    holds: Mutex<usize>,
    released: Condvar,
}

impl RebalanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block rebalances until the returned hold is dropped.
    pub fn hold(&self) -> RebalanceHold {
        *self.inner.holds.lock() += 1;
        RebalanceHold {
            gate: self.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        *self.inner.holds.lock() > 0
    }

    /// Wait (blocking) until no hold is outstanding or `max_wait` passes.
    ///
    /// Rebalance callbacks run inside the client's `recv()`, and a batch drops
    /// its hold before the next poll, so in the normal loop this returns at
    /// once. It only blocks if a hold is kept across a poll, and then parks
    /// the polling thread for at most `max_wait`.
    /// Returns false if the wait timed out with holds still outstanding.
    pub fn wait_released(&self, max_wait: Duration) -> bool {
        let mut holds = self.inner.holds.lock();
        if *holds > 0 {
            debug!(holds = *holds, "Rebalance waiting for in-flight batch");
        }
        while *holds > 0 {
            if self.inner.released.wait_for(&mut holds, max_wait).timed_out() {
                warn!(
                    holds = *holds,
                    "Rebalance barrier not released within {:?}, proceeding", max_wait
                );
                return false;
            }
        }
        true
    }

    fn release(&self) {
        let mut holds = self.inner.holds.lock();
        *holds = holds.saturating_sub(1);
        if *holds == 0 {
            self.inner.released.notify_all();
        }
    }
}

/// Scoped right to keep partitions through a batch. Released on drop.
pub struct RebalanceHold {
    gate: RebalanceGate,
}

impl Drop for RebalanceHold {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl std::fmt::Debug for RebalanceHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebalanceHold").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_hold_released_on_drop() {
        let gate = RebalanceGate::new();
        assert!(!gate.is_held());

        let hold = gate.hold();
        assert!(gate.is_held());

        drop(hold);
        assert!(!gate.is_held());
        assert!(gate.wait_released(Duration::from_millis(1)));
    }

    #[test]
    fn test_nested_holds_release_last() {
        let gate = RebalanceGate::new();
        let first = gate.hold();
        let second = gate.hold();

        drop(first);
        assert!(gate.is_held());
        drop(second);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_rebalance_waits_for_batch() {
        let gate = RebalanceGate::new();
        let hold = gate.hold();
        let proceeded = Arc::new(AtomicBool::new(false));

        let waiter = {
            let gate = gate.clone();
            let proceeded = proceeded.clone();
            std::thread::spawn(move || {
                let released = gate.wait_released(Duration::from_secs(5));
                proceeded.store(true, Ordering::SeqCst);
                released
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!proceeded.load(Ordering::SeqCst));

        drop(hold);
        assert!(waiter.join().unwrap());
        assert!(proceeded.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_times_out_when_never_released() {
        let gate = RebalanceGate::new();
        let _hold = gate.hold();
        assert!(!gate.wait_released(Duration::from_millis(20)));
    }
}
