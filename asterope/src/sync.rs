//! A reusable rendezvous barrier with failure propagation.
//!
//! `std::sync::Barrier` has no notion of a peer dying, which would strand
//! the remaining pipeline threads forever. This barrier can be broken: every
//! current and future waiter then returns an error, which the pipeline
//! treats as termination.

use std::sync::{Condvar, Mutex};

/// A peer left the rendezvous; the pipeline is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierBroken;

#[derive(Debug)]
struct BarrierState {
    waiting: usize,
    generation: u64,
    broken: bool,
}

/// Reusable barrier for a fixed set of parties.
#[derive(Debug)]
pub struct CyclicBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
    parties: usize,
}

impl CyclicBarrier {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier needs at least one party");
        CyclicBarrier {
            state: Mutex::new(BarrierState {
                waiting: 0,
                generation: 0,
                broken: false,
            }),
            cond: Condvar::new(),
            parties,
        }
    }

    /// Block until all parties have arrived, or the barrier is broken.
    pub fn wait(&self) -> Result<(), BarrierBroken> {
        let mut state = self.state.lock().expect("barrier mutex");
        if state.broken {
            return Err(BarrierBroken);
        }
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.parties {
            state.waiting = 0;
            state.generation += 1;
            self.cond.notify_all();
            return Ok(());
        }
        while state.generation == generation && !state.broken {
            state = self.cond.wait(state).expect("barrier mutex");
        }
        if state.broken {
            Err(BarrierBroken)
        } else {
            Ok(())
        }
    }

    /// Break the barrier, waking every waiter with an error.
    pub fn break_barrier(&self) {
        let mut state = self.state.lock().expect("barrier mutex");
        state.broken = true;
        self.cond.notify_all();
    }
}

/// Breaks the barrier if the owning thread unwinds, so peers terminate
/// instead of waiting forever.
#[derive(Debug)]
pub struct BreakOnPanic<'a>(pub &'a CyclicBarrier);

impl Drop for BreakOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.break_barrier();
        }
    }
}
