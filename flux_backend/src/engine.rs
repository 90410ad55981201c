//! Engine facade: owns the shared pipeline state and hands out the scheduler
//! and renderer roles.

use std::ops::Deref;
use std::sync::Arc;
use std::thread::JoinHandle;

use flux_core::{
    CoreError, EngineConfig, GlobalStateLock, StateGuard, Tick, Voice, VoiceBank,
};
use parking_lot::MutexGuard;
use tracing::{info, warn};

use crate::audio_device::AudioSink;
use crate::error::{EngineError, EngineResult};
use crate::rt_processing::{
    Automation, Diagnostics, DiagnosticsSnapshot, FrameExchange, Renderer, SoloControl,
    StepReport, TickClock, VoiceScheduler,
};

const TIMING_EMA_ALPHA: f64 = 0.1;

/// Cloneable access to a running engine for collaborators on any thread.
#[derive(Clone)]
pub struct EngineHandle {
    config: Arc<EngineConfig>,
    lock: Arc<GlobalStateLock>,
    bank: Arc<VoiceBank>,
    clock: Arc<TickClock>,
    exchange: Arc<FrameExchange>,
    diagnostics: Arc<Diagnostics>,
    solo: Arc<SoloControl>,
}

impl EngineHandle {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the global state lock, for example to read several voices as one
    /// consistent snapshot. Reentrant.
    pub fn lock(&self) -> StateGuard<'_> {
        self.lock.lock()
    }

    pub fn state_lock(&self) -> &Arc<GlobalStateLock> {
        &self.lock
    }

    pub fn voices(&self) -> &VoiceBank {
        &self.bank
    }

    pub fn voice_count(&self) -> usize {
        self.bank.len()
    }

    /// A voice at the engine's sample rate, ready to be authored.
    pub fn new_voice(&self) -> Voice {
        Voice::new(self.config.sample_rate)
    }

    /// Add a voice to the pool; returns its index.
    pub fn register_voice(&self, voice: Voice) -> EngineResult<usize> {
        if voice.sample_rate() != self.config.sample_rate {
            return Err(CoreError::InvalidConfig(format!(
                "voice sample rate {} does not match engine sample rate {}",
                voice.sample_rate(),
                self.config.sample_rate
            ))
            .into());
        }
        let guard = self.lock.lock();
        let index = self.bank.register(&guard, voice)?;
        info!(index, voices = self.bank.len(), "voice added");
        Ok(index)
    }

    /// Edit voice `index` under the global state lock, between control steps.
    pub fn with_voice<R>(&self, index: usize, f: impl FnOnce(&mut Voice) -> R) -> EngineResult<R> {
        let _guard = self.lock.lock();
        let mut voice = self.bank.voice(index)?;
        Ok(f(&mut voice))
    }

    /// Lock voice `index` without the global state lock.
    ///
    /// Only for a collaborator that is the sole editor of the engine (for
    /// example a single UI thread reading values for display). The read is not
    /// coordinated with control steps and may block behind a worker.
    pub fn voice_unlocked(&self, index: usize) -> EngineResult<MutexGuard<'_, Voice>> {
        Ok(self.bank.voice(index)?)
    }

    pub fn note_on(&self, index: usize) -> EngineResult<()> {
        self.with_voice(index, |voice| voice.note_on())
    }

    pub fn note_off(&self, index: usize) -> EngineResult<()> {
        self.with_voice(index, |voice| voice.note_off())
    }

    /// Tell every module an external clock (re)started.
    pub fn resync_clock(&self) {
        let _guard = self.lock.lock();
        for slot in self.bank.iter() {
            slot.lock().resync_clock();
        }
    }

    /// Clock snapshot of the latest control step.
    pub fn tick(&self) -> Tick {
        self.clock.read()
    }

    /// Samples rendered so far (wrapping).
    pub fn ticks_rendered(&self) -> Tick {
        self.clock.raw()
    }

    /// Hear only `voice`, or every voice with `None`.
    pub fn set_solo(&self, voice: Option<usize>) {
        self.solo.set(voice);
    }

    pub fn solo(&self) -> Option<usize> {
        self.solo.get()
    }

    /// Whether any sample clipped since the last call.
    pub fn take_clipped(&self) -> bool {
        self.diagnostics.take_clipped()
    }

    /// Whether the sink ran nearly dry since the last call.
    pub fn take_glitched(&self) -> bool {
        self.diagnostics.take_glitched()
    }

    pub fn diagnostics(&self, reset_peaks: bool) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot(&self.exchange, reset_peaks)
    }
}

/// Threads of a started engine.
pub struct RunningEngine {
    pub handle: EngineHandle,
    pub renderer: JoinHandle<()>,
    pub scheduler: JoinHandle<()>,
}

pub struct Engine {
    handle: EngineHandle,
    scheduler: VoiceScheduler,
    renderer: Option<Renderer>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        info!(%config, "creating engine");

        let lock = Arc::new(GlobalStateLock::new());
        let bank = Arc::new(VoiceBank::new(config.voices, config.seed, Arc::clone(&lock)));
        let clock = Arc::new(TickClock::new());
        let (exchange, reader) = FrameExchange::pair(config.voices);
        let diagnostics = Arc::new(Diagnostics::new(
            config.block_size,
            config.sample_rate,
            TIMING_EMA_ALPHA,
        ));
        let solo = Arc::new(SoloControl::new());

        let scheduler = VoiceScheduler::new(
            Arc::clone(&lock),
            Arc::clone(&bank),
            Arc::clone(&clock),
            Arc::clone(&exchange),
            Arc::clone(&diagnostics),
            config.voices_per_worker,
        );
        let renderer = Renderer::new(
            &config,
            reader,
            Arc::clone(&clock),
            Arc::clone(&diagnostics),
            Arc::clone(&solo),
        );

        Ok(Self {
            handle: EngineHandle {
                config: Arc::new(config),
                lock,
                bank,
                clock,
                exchange,
                diagnostics,
                solo,
            },
            scheduler,
            renderer: Some(renderer),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn set_automation(&mut self, automation: impl Automation + 'static) {
        self.scheduler.set_automation(Box::new(automation));
    }

    /// Workers spawned by the scheduler so far.
    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    /// Run one control step on the calling thread.
    pub fn step(&mut self) -> EngineResult<StepReport> {
        self.scheduler.step()
    }

    /// Render one block on the calling thread.
    pub fn render_block<S: AudioSink + ?Sized>(&mut self, sink: &mut S) -> EngineResult<()> {
        let renderer = self.renderer.as_mut().ok_or(EngineError::RendererStarted)?;
        renderer.render_block(sink)?;
        Ok(())
    }

    /// Render at least `samples` samples into `sink` without any extra
    /// threads, alternating one control step with one block.
    pub fn render_offline<S: AudioSink + ?Sized>(
        &mut self,
        sink: &mut S,
        samples: usize,
    ) -> EngineResult<StepReport> {
        let config = &self.handle.config;
        sink.open(config.sample_rate, config.sink_buffer_size)?;
        sink.start()?;

        let blocks = samples.div_ceil(config.block_size).max(1);
        let mut last = None;
        for _ in 0..blocks {
            last = Some(self.step()?);
            self.render_block(sink)?;
        }
        sink.stop()?;
        info!(blocks, samples = blocks * self.handle.config.block_size, "offline render finished");
        last.ok_or(EngineError::NoVoices)
    }

    /// Start the renderer thread writing into `sink`.
    pub fn start_renderer<S: AudioSink + 'static>(&mut self, sink: S) -> EngineResult<JoinHandle<()>> {
        let renderer = self.renderer.take().ok_or(EngineError::RendererStarted)?;
        renderer.spawn(sink, self.handle.config.sink_buffer_size)
    }

    /// Hand the scheduling role to its own thread.
    pub fn spawn_scheduler_thread(self) -> EngineResult<(EngineHandle, JoinHandle<()>)> {
        if self.renderer.is_some() {
            warn!("scheduler started before the renderer; frames will not be consumed");
        }
        let Self {
            handle, scheduler, ..
        } = self;
        let thread = scheduler.spawn()?;
        Ok((handle, thread))
    }

    /// Start the renderer on `sink` and the scheduler, each on its own thread.
    pub fn start<S: AudioSink + 'static>(mut self, sink: S) -> EngineResult<RunningEngine> {
        let renderer = self.start_renderer(sink)?;
        let (handle, scheduler) = self.spawn_scheduler_thread()?;
        info!(voices = handle.voice_count(), "engine running");
        Ok(RunningEngine {
            handle,
            renderer,
            scheduler,
        })
    }
}

impl Deref for Engine {
    type Target = EngineHandle;

    fn deref(&self) -> &EngineHandle {
        &self.handle
    }
}
