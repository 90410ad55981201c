//! Control-step scheduling: evaluate every voice once, then publish a frame.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flux_core::{GlobalStateLock, Tick, VoiceBank};
use tracing::{debug, error, info};

use super::clock::TickClock;
use super::diagnostics::Diagnostics;
use super::frame::FrameExchange;
use super::workers::{WorkerPool, evaluate_voices};
use crate::error::{EngineError, EngineResult};

/// Steps between periodic statistics lines.
pub const STATS_INTERVAL: u64 = 5120;

/// Collaborator that drives voice parameters from the clock, such as
/// sequencers or parameter automation. Runs under the global state lock
/// before any voice is evaluated.
pub trait Automation: Send {
    fn step(&mut self, tick: Tick, voices: &VoiceBank);
}

impl<F> Automation for F
where
    F: FnMut(Tick, &VoiceBank) + Send,
{
    fn step(&mut self, tick: Tick, voices: &VoiceBank) {
        self(tick, voices)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Voices evaluated on the scheduling thread.
    Inline,
    /// Voices evaluated by this many workers.
    FanOut { workers: usize },
}

/// Outcome of one control step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Clock snapshot every module saw.
    pub tick: Tick,
    pub voices: usize,
    pub mode: EvaluationMode,
    /// The previous frame was still unread and the step had to wait for it.
    pub waited: bool,
    pub generation: u64,
}

pub struct VoiceScheduler {
    lock: Arc<GlobalStateLock>,
    bank: Arc<VoiceBank>,
    clock: Arc<TickClock>,
    exchange: Arc<FrameExchange>,
    diagnostics: Arc<Diagnostics>,
    pool: WorkerPool,
    voices_per_worker: usize,
    automation: Option<Box<dyn Automation>>,
    initialized: bool,
    steps: u64,
    waits: u64,
}

impl VoiceScheduler {
    pub fn new(
        lock: Arc<GlobalStateLock>,
        bank: Arc<VoiceBank>,
        clock: Arc<TickClock>,
        exchange: Arc<FrameExchange>,
        diagnostics: Arc<Diagnostics>,
        voices_per_worker: usize,
    ) -> Self {
        let voices_per_worker = voices_per_worker.max(1);
        Self {
            pool: WorkerPool::new(Arc::clone(&bank), voices_per_worker),
            lock,
            bank,
            clock,
            exchange,
            diagnostics,
            voices_per_worker,
            automation: None,
            initialized: false,
            steps: 0,
            waits: 0,
        }
    }

    pub fn set_automation(&mut self, automation: Box<dyn Automation>) {
        self.automation = Some(automation);
    }

    pub fn clear_automation(&mut self) {
        self.automation = None;
    }

    /// Workers spawned so far.
    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run one control step and publish its frame.
    pub fn step(&mut self) -> EngineResult<StepReport> {
        let (tick, voices, mode) = {
            let _guard = self.lock.lock();
            let voices = self.bank.len();
            if voices == 0 {
                return Err(EngineError::NoVoices);
            }
            let fan_out = voices > self.voices_per_worker;

            let tick = self.clock.snapshot();
            if let Some(automation) = self.automation.as_mut() {
                automation.step(tick, &self.bank);
            }

            if !self.initialized || (fan_out && self.pool.is_empty()) {
                for slot in self.bank.iter() {
                    slot.lock().reinitialize();
                }
                self.initialized = true;
            }

            let mode = if fan_out {
                let workers = self.pool.ensure_workers(voices)?;
                self.pool.run(tick);
                EvaluationMode::FanOut { workers }
            } else {
                evaluate_voices(&self.bank, 0..voices, tick);
                EvaluationMode::Inline
            };
            (tick, voices, mode)
        };

        let waited = self.exchange.wait_until_consumed();

        let generation = {
            let _guard = self.lock.lock();
            self.publish()
        };

        self.diagnostics.record_step(waited);
        self.steps += 1;
        if waited {
            self.waits += 1;
        }
        if self.steps % STATS_INTERVAL == 0 {
            debug!(
                steps = self.steps,
                waits = self.waits,
                wait_ratio = self.waits as f64 / self.steps as f64,
                voices,
                workers = self.pool.len(),
                "scheduler stats"
            );
        }

        Ok(StepReport {
            tick,
            voices,
            mode,
            waited,
            generation,
        })
    }

    /// Copy every voice's emitted partials and controls into the back buffer.
    /// Caller holds the global state lock.
    fn publish(&self) -> u64 {
        let bank = &self.bank;
        self.exchange.publish(|frame| {
            let voices = bank.len().min(frame.capacity());
            frame.gain = 1.0;
            for (index, slot) in bank.iter().take(voices).enumerate() {
                let voice = slot.lock();
                if index == 0 {
                    frame.gain = voice.output_gain();
                }
                if let Some(out) = frame.voice_mut(index) {
                    match voice.emitted() {
                        Some(partials) => out.partials.copy_from(partials),
                        None => out.partials.clear(),
                    }
                    out.pitch = voice.control().pitch();
                    out.velocity = voice.control().velocity();
                }
            }
            frame.set_voice_count(voices);
        })
    }

    /// Run [`step`](Self::step) forever on a named thread.
    ///
    /// Steps that fail (for example before any voice is registered) are
    /// logged and retried after a short pause.
    pub fn spawn(mut self) -> EngineResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("flux-voice-scheduler".to_string())
            .spawn(move || {
                info!(voices_per_worker = self.voices_per_worker, "voice scheduler started");
                let mut last_error: Option<String> = None;
                loop {
                    match self.step() {
                        Ok(_) => last_error = None,
                        Err(e) => {
                            let message = e.to_string();
                            if last_error.as_deref() != Some(message.as_str()) {
                                error!(error = %message, "control step failed");
                                last_error = Some(message);
                            }
                            thread::sleep(std::time::Duration::from_millis(1));
                        }
                    }
                }
            })
            .map_err(|source| EngineError::Spawn {
                role: "voice scheduler",
                source,
            })
    }
}
