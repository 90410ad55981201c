//! Persistent evaluation workers.
//!
//! Voices are split into static groups of `voices_per_worker` consecutive
//! indices; group `g` covers `g * vpw .. (g + 1) * vpw`. Each group has one
//! worker thread parked on its job channel between steps. Membership is fixed
//! by index, so registering more voices only ever adds groups at the end.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use crossbeam::sync::WaitGroup;
use flux_core::{Tick, VoiceBank};
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};

struct Job {
    tick: Tick,
    // dropped when the group is done, on every path
    _done: WaitGroup,
}

struct Worker {
    jobs: Sender<Job>,
    handle: JoinHandle<()>,
}

/// Number of groups needed for `voices`.
pub fn group_count(voices: usize, voices_per_worker: usize) -> usize {
    voices.div_ceil(voices_per_worker.max(1))
}

pub struct WorkerPool {
    bank: Arc<VoiceBank>,
    voices_per_worker: usize,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(bank: Arc<VoiceBank>, voices_per_worker: usize) -> Self {
        Self {
            bank,
            voices_per_worker: voices_per_worker.max(1),
            workers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawn workers for any group of `voices` that has none yet.
    pub fn ensure_workers(&mut self, voices: usize) -> EngineResult<usize> {
        let needed = group_count(voices, self.voices_per_worker);
        while self.workers.len() < needed {
            let group = self.workers.len();
            let worker = self.spawn_worker(group)?;
            self.workers.push(worker);
        }
        Ok(self.workers.len())
    }

    fn spawn_worker(&self, group: usize) -> EngineResult<Worker> {
        let start = group * self.voices_per_worker;
        let range = start..start + self.voices_per_worker;
        let bank = Arc::clone(&self.bank);
        let (jobs, rx) = channel::unbounded::<Job>();

        let handle = thread::Builder::new()
            .name(format!("flux-worker-{group}"))
            .spawn(move || {
                for job in rx {
                    evaluate_voices(&bank, range.clone(), job.tick);
                }
            })
            .map_err(|source| EngineError::Spawn {
                role: "worker",
                source,
            })?;

        debug!(group, start, voices_per_worker = self.voices_per_worker, "worker spawned");
        Ok(Worker { jobs, handle })
    }

    /// Release every worker for `tick` and block until all have finished.
    pub fn run(&self, tick: Tick) {
        let done = WaitGroup::new();
        for (group, worker) in self.workers.iter().enumerate() {
            let job = Job {
                tick,
                _done: done.clone(),
            };
            if worker.jobs.send(job).is_err() {
                error!(group, "worker is gone; its voices were not evaluated");
            }
        }
        done.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            drop(worker.jobs);
            let _ = worker.handle.join();
        }
    }
}

/// Evaluate the registered voices in `range`.
///
/// A voice whose module panics is logged and left as it was; the remaining
/// voices still run, so one broken graph degrades the mix instead of stopping
/// the step.
pub(crate) fn evaluate_voices(bank: &VoiceBank, range: Range<usize>, tick: Tick) {
    let end = range.end.min(bank.len());
    for index in range.start..end {
        let Some(slot) = bank.get(index) else {
            continue;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| slot.lock().evaluate(tick)));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(voice = index, tick, %message, "voice evaluation panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::modules::{Harmonics, Out};
    use flux_core::{GlobalStateLock, Module, PartialSet, StepContext, Voice};

    struct Faulty {
        partials: PartialSet,
    }

    impl Module for Faulty {
        fn name(&self) -> &'static str {
            "Faulty"
        }

        fn advance(&mut self, _ctx: &mut StepContext<'_>) {
            panic!("module failed");
        }

        fn partials(&self) -> &PartialSet {
            &self.partials
        }
    }

    fn register(lock: &GlobalStateLock, bank: &VoiceBank, voice: Voice) {
        let guard = lock.lock();
        bank.register(&guard, voice).unwrap();
    }

    fn sine_voice() -> Voice {
        let mut voice = Voice::new(44_100)
            .with_module(Box::new(Harmonics::sine()))
            .with_module(Box::new(Out::new(0)));
        voice.set_emits(1).unwrap();
        voice
    }

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(group_count(0, 2), 0);
        assert_eq!(group_count(1, 2), 1);
        assert_eq!(group_count(4, 2), 2);
        assert_eq!(group_count(5, 2), 3);
        assert_eq!(group_count(7, 1), 7);
        assert_eq!(group_count(3, 0), 3);
    }

    #[test]
    fn test_workers_only_added_for_new_groups() {
        let bank = Arc::new(VoiceBank::new(8, 0, Arc::new(GlobalStateLock::new())));
        let mut pool = WorkerPool::new(bank, 3);
        assert!(pool.is_empty());

        assert_eq!(pool.ensure_workers(4).unwrap(), 2);
        assert_eq!(pool.ensure_workers(6).unwrap(), 2);
        assert_eq!(pool.ensure_workers(7).unwrap(), 3);
        // never shrinks
        assert_eq!(pool.ensure_workers(1).unwrap(), 3);
        pool.run(0);
    }

    #[test]
    fn test_panicking_voice_still_releases_the_step() {
        let lock = Arc::new(GlobalStateLock::new());
        let bank = Arc::new(VoiceBank::new(3, 0, Arc::clone(&lock)));
        register(&lock, &bank, sine_voice());
        let faulty = Voice::new(44_100).with_module(Box::new(Faulty {
            partials: PartialSet::silent(),
        }));
        register(&lock, &bank, faulty);
        register(&lock, &bank, sine_voice());

        let mut pool = WorkerPool::new(Arc::clone(&bank), 1);
        assert_eq!(pool.ensure_workers(3).unwrap(), 3);
        // returns only once every worker dropped its completion handle
        pool.run(0);
        pool.run(1);

        for index in [0, 2] {
            let voice = bank.voice(index).unwrap();
            assert_eq!(voice.emitted().unwrap().amplitudes()[0], 1.0);
        }
    }

    #[test]
    fn test_inline_helper_survives_a_panicking_voice() {
        let lock = Arc::new(GlobalStateLock::new());
        let bank = VoiceBank::new(2, 0, Arc::clone(&lock));
        let faulty = Voice::new(44_100).with_module(Box::new(Faulty {
            partials: PartialSet::silent(),
        }));
        register(&lock, &bank, faulty);
        register(&lock, &bank, sine_voice());

        evaluate_voices(&bank, 0..2, 0);
        assert_eq!(bank.voice(1).unwrap().emitted().unwrap().amplitudes()[0], 1.0);
    }
}
