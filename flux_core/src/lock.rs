//! The global state lock.
//!
//! One coarse lock serializes structural edits (registering voices, adding or
//! removing modules, reading multi-field snapshots) against the scheduler's
//! per-step evaluation and publication.
//!
//! Properties:
//! - Reentrant: the owning thread may lock again; it must drop as many guards
//!   as it took.
//! - Fair: waiters acquire in arrival order (ticket ordering, no barging).
//! - Scoped: release happens when the guard drops, including on unwinding.

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    next_ticket: u64,
    now_serving: u64,
}

#[derive(Debug)]
pub struct GlobalStateLock {
    state: Mutex<LockState>,
    turn: Condvar,
}

impl GlobalStateLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
                next_ticket: 0,
                now_serving: 0,
            }),
            turn: Condvar::new(),
        }
    }

    /// Block until this thread holds the lock.
    pub fn lock(&self) -> StateGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            return StateGuard::new(self);
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        while state.now_serving != ticket {
            self.turn.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
        StateGuard::new(self)
    }

    /// Take the lock only if that needs no waiting.
    pub fn try_lock(&self) -> Option<StateGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            return Some(StateGuard::new(self));
        }
        // free and nobody queued
        if state.owner.is_none() && state.now_serving == state.next_ticket {
            state.next_ticket = state.next_ticket.wrapping_add(1);
            state.owner = Some(me);
            state.depth = 1;
            return Some(StateGuard::new(self));
        }
        None
    }

    /// How many times the calling thread currently holds the lock.
    pub fn hold_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.depth
        } else {
            0
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.hold_count() > 0
    }

    /// Holder plus waiters.
    pub fn queue_len(&self) -> u64 {
        let state = self.state.lock();
        state.next_ticket.wrapping_sub(state.now_serving)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            state.now_serving = state.now_serving.wrapping_add(1);
            drop(state);
            // every waiter re-checks its ticket; only the next one proceeds
            self.turn.notify_all();
        }
    }
}

impl Default for GlobalStateLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the [`GlobalStateLock`]. Not `Send`: it must be dropped on
/// the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct StateGuard<'a> {
    lock: &'a GlobalStateLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> StateGuard<'a> {
    fn new(lock: &'a GlobalStateLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl StateGuard<'_> {
    /// Whether this guard was taken on `lock`.
    pub fn guards(&self, lock: &GlobalStateLock) -> bool {
        std::ptr::eq(self.lock, lock)
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentrant_hold_count() {
        let lock = GlobalStateLock::new();
        assert_eq!(lock.hold_count(), 0);
        {
            let _a = lock.lock();
            let _b = lock.lock();
            assert_eq!(lock.hold_count(), 2);
            drop(_b);
            assert_eq!(lock.hold_count(), 1);
        }
        assert_eq!(lock.hold_count(), 0);
        assert_eq!(lock.queue_len(), 0);
    }

    #[test]
    fn test_guard_knows_its_lock() {
        let lock = GlobalStateLock::new();
        let other = GlobalStateLock::new();
        let guard = lock.lock();
        assert!(guard.guards(&lock));
        assert!(!guard.guards(&other));
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(GlobalStateLock::new());
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let got = thread::spawn(move || other.try_lock().is_some()).join().unwrap();
        assert!(!got);

        // reentrant try_lock from the owner succeeds
        assert!(lock.try_lock().is_some());
        drop(guard);

        let other = Arc::clone(&lock);
        let got = thread::spawn(move || other.try_lock().is_some()).join().unwrap();
        assert!(got);
    }

    #[test]
    fn test_released_on_panic() {
        let lock = Arc::new(GlobalStateLock::new());
        let inner = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let _guard = inner.lock();
            panic!("editing failed");
        })
        .join();
        assert!(result.is_err());

        // the guard dropped during unwinding
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_waiters_acquire_in_arrival_order() {
        let lock = Arc::new(GlobalStateLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = lock.lock();

        let mut handles = Vec::new();
        for id in 0..4u64 {
            let lock_c = Arc::clone(&lock);
            let order_c = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _g = lock_c.lock();
                order_c.lock().push(id);
            }));
            // wait until this thread has taken its ticket before starting the next
            while lock.queue_len() < id + 2 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        drop(guard);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
