//! Fixed-capacity voice pool.
//!
//! Slots are allocated once, at engine construction. Registration fills the
//! next free slot and hands the voice its stable index. Voices are never
//! removed, so a slot index stays valid for the life of the bank.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::lock::{GlobalStateLock, StateGuard};
use crate::voice::Voice;

pub struct VoiceBank {
    slots: Box<[OnceLock<Mutex<Voice>>]>,
    len: AtomicUsize,
    seed: u64,
    lock: Arc<GlobalStateLock>,
}

impl VoiceBank {
    /// Registration is serialized by `lock`, the engine's global state lock.
    pub fn new(capacity: usize, seed: u64, lock: Arc<GlobalStateLock>) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            len: AtomicUsize::new(0),
            seed,
            lock,
        }
    }

    pub fn state_lock(&self) -> &Arc<GlobalStateLock> {
        &self.lock
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of registered voices.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a voice. Requires a guard of this bank's state lock so indices
    /// are handed out by one writer at a time.
    pub fn register(&self, held: &StateGuard<'_>, mut voice: Voice) -> CoreResult<usize> {
        debug_assert!(
            held.guards(&self.lock),
            "voice registered under a lock other than the bank's"
        );
        let index = self.len.load(Ordering::Acquire);
        let capacity = self.capacity();
        if index >= capacity {
            return Err(CoreError::VoicePoolExhausted { capacity });
        }

        voice.assign_index(index, self.seed);
        self.slots[index]
            .set(Mutex::new(voice))
            .map_err(|_| CoreError::VoicePoolExhausted { capacity })?;
        self.len.store(index + 1, Ordering::Release);

        debug!(index, capacity, "voice registered");
        Ok(index)
    }

    /// The slot of a registered voice.
    pub fn get(&self, index: usize) -> Option<&Mutex<Voice>> {
        if index >= self.len() {
            return None;
        }
        self.slots[index].get()
    }

    /// Lock a registered voice.
    pub fn voice(&self, index: usize) -> CoreResult<MutexGuard<'_, Voice>> {
        self.get(index)
            .map(|slot| slot.lock())
            .ok_or(CoreError::VoiceIndex {
                index,
                registered: self.len(),
            })
    }

    /// Registered voice slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutex<Voice>> {
        self.slots[..self.len()].iter().filter_map(|s| s.get())
    }
}

impl std::fmt::Debug for VoiceBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBank")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_sequential_indices() {
        let lock = Arc::new(GlobalStateLock::new());
        let bank = VoiceBank::new(2, 7, Arc::clone(&lock));
        let guard = lock.lock();

        assert_eq!(bank.register(&guard, Voice::new(44_100)).unwrap(), 0);
        assert_eq!(bank.register(&guard, Voice::new(44_100)).unwrap(), 1);
        assert_eq!(
            bank.register(&guard, Voice::new(44_100)).unwrap_err(),
            CoreError::VoicePoolExhausted { capacity: 2 }
        );

        assert_eq!(bank.len(), 2);
        assert_eq!(bank.voice(1).unwrap().index(), Some(1));
        assert_eq!(bank.iter().count(), 2);
    }

    #[test]
    fn test_unregistered_index_is_an_error() {
        let bank = VoiceBank::new(4, 0, Arc::new(GlobalStateLock::new()));
        assert!(bank.get(0).is_none());
        assert!(matches!(
            bank.voice(3),
            Err(CoreError::VoiceIndex {
                index: 3,
                registered: 0
            })
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock other than the bank's")]
    fn test_register_rejects_a_foreign_guard() {
        let bank = VoiceBank::new(1, 0, Arc::new(GlobalStateLock::new()));
        let foreign = GlobalStateLock::new();
        let guard = foreign.lock();
        let _ = bank.register(&guard, Voice::new(44_100));
    }
}
