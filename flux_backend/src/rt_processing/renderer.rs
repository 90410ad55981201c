//! Block renderer: turns published frames into 16-bit PCM.
//!
//! Each block starts with a sink headroom check and one attempt to swap in a
//! new frame, then builds `block_size` samples from whatever frame is current
//! and writes them to the sink in one blocking call. The blocking write is
//! what paces the whole pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use flux_core::EngineConfig;
use tracing::{error, info, warn};

use super::clock::TickClock;
use super::diagnostics::Diagnostics;
use super::frame::FrameReader;
use super::oscillators::PartialOscillators;
use super::tables::init_tables;
use crate::audio_device::{AudioSink, BYTES_PER_SAMPLE, SinkError, SinkResult};
use crate::error::{EngineError, EngineResult};

/// A sink with at least this little queued audio is close to running dry.
pub const GLITCH_MARGIN_BYTES: usize = 128;

/// Which voice, if any, is the only one heard.
#[derive(Debug, Default)]
pub struct SoloControl {
    enabled: AtomicBool,
    voice: AtomicUsize,
}

impl SoloControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` lets every voice through.
    pub fn set(&self, voice: Option<usize>) {
        match voice {
            Some(index) => {
                self.voice.store(index, Ordering::Relaxed);
                self.enabled.store(true, Ordering::Release);
            }
            None => self.enabled.store(false, Ordering::Release),
        }
    }

    pub fn get(&self) -> Option<usize> {
        self.enabled
            .load(Ordering::Acquire)
            .then(|| self.voice.load(Ordering::Relaxed))
    }

    #[inline(always)]
    fn admits(solo: Option<usize>, voice: usize) -> bool {
        solo.is_none_or(|s| s == voice)
    }
}

pub struct Renderer {
    reader: FrameReader,
    clock: Arc<TickClock>,
    diagnostics: Arc<Diagnostics>,
    solo: Arc<SoloControl>,
    oscillators: Vec<PartialOscillators>,
    block: Vec<u8>,
    block_size: usize,
    sample_rate: f64,
    nyquist: f64,
    volume_multiplier: f64,
}

impl Renderer {
    pub fn new(
        config: &EngineConfig,
        reader: FrameReader,
        clock: Arc<TickClock>,
        diagnostics: Arc<Diagnostics>,
        solo: Arc<SoloControl>,
    ) -> Self {
        init_tables();
        let voices = reader.front().capacity();
        Self {
            reader,
            clock,
            diagnostics,
            solo,
            oscillators: (0..voices).map(|_| PartialOscillators::new()).collect(),
            block: vec![0; config.block_size * BYTES_PER_SAMPLE],
            block_size: config.block_size,
            sample_rate: config.sample_rate as f64,
            nyquist: config.nyquist(),
            volume_multiplier: config.volume_multiplier,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Oscillator state of `voice`.
    pub fn oscillators(&self, voice: usize) -> Option<&PartialOscillators> {
        self.oscillators.get(voice)
    }

    /// Render one block into `sink`.
    pub fn render_block<S: AudioSink + ?Sized>(&mut self, sink: &mut S) -> SinkResult<()> {
        {
            let diagnostics = Arc::clone(&self.diagnostics);
            let _timer = diagnostics.time_block();

            let headroom_floor = sink.buffer_size().saturating_sub(GLITCH_MARGIN_BYTES);
            let available = sink.available();
            if available >= headroom_floor {
                diagnostics.flag_glitch();
                warn!(available, buffer_size = sink.buffer_size(), "audio sink nearly empty");
            }

            let swapped = self.reader.check_and_swap();
            diagnostics.record_block(swapped);
            if !swapped {
                thread::yield_now();
            }

            for i in 0..self.block_size {
                let sample = self.build_sample();
                let at = i * BYTES_PER_SAMPLE;
                self.block[at..at + BYTES_PER_SAMPLE].copy_from_slice(&sample.to_le_bytes());
                self.clock.advance();
            }
        }

        let mut written = 0;
        while written < self.block.len() {
            written += sink.write(&self.block[written..])?;
        }
        Ok(())
    }

    /// Mix one sample from the current frame and advance every oscillator.
    fn build_sample(&mut self) -> i16 {
        let frame = self.reader.front();
        let solo = self.solo.get();
        let mut mix = 0.0;

        for (index, voice) in frame.voices().iter().enumerate() {
            let Some(oscillators) = self.oscillators.get_mut(index) else {
                break;
            };
            let sample = oscillators.next_sample(voice, frame.gain, self.sample_rate, self.nyquist);
            if SoloControl::admits(solo, index) {
                mix += sample;
            }
        }

        let scaled = mix * self.volume_multiplier;
        if scaled > i16::MAX as f64 {
            self.diagnostics.flag_clip();
            i16::MAX
        } else if scaled < i16::MIN as f64 {
            self.diagnostics.flag_clip();
            i16::MIN
        } else {
            scaled as i16
        }
    }

    /// Render forever into `sink` on a named thread. The sink is opened and
    /// started first; the thread ends only when the sink reports it is closed.
    pub fn spawn<S>(mut self, mut sink: S, buffer_size: usize) -> EngineResult<JoinHandle<()>>
    where
        S: AudioSink + 'static,
    {
        sink.open(self.sample_rate as u32, buffer_size)?;
        sink.start()?;

        thread::Builder::new()
            .name("flux-renderer".to_string())
            .spawn(move || {
                info!(block_size = self.block_size, sample_rate = self.sample_rate, "renderer started");
                loop {
                    match self.render_block(&mut sink) {
                        Ok(()) => {}
                        Err(SinkError::Closed) => break,
                        Err(e) => {
                            error!(error = %e, "failed to write audio block");
                            thread::yield_now();
                        }
                    }
                }
                if let Err(e) = sink.stop() {
                    warn!(error = %e, "failed to stop audio sink");
                }
                info!(ticks = self.clock.raw(), "renderer stopped: sink closed");
            })
            .map_err(|source| EngineError::Spawn {
                role: "renderer",
                source,
            })
    }
}
