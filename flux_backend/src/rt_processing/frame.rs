//! Double-buffered frame exchange between the scheduler and the renderer.
//!
//! Protocol:
//! - The scheduler owns the *back* buffer and the renderer owns the *front*.
//! - The scheduler fills the back buffer only while `ready` is clear, then
//!   raises `ready`.
//! - The renderer polls `ready`; when set, it swaps its front box with the
//!   back box (pointer swap, never a copy) and clears `ready`.
//!
//! `ready` is the only synchronization between the two threads. The spin lock
//! around the back slot is never contended under this protocol; it makes the
//! hand-off of the box itself safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::utils::Backoff;
use flux_core::PartialSet;
use spin::Mutex;

/// One voice's share of a published frame.
#[derive(Debug, Clone)]
pub struct VoiceFrame {
    pub partials: PartialSet,
    /// Absolute pitch in Hz.
    pub pitch: f64,
    pub velocity: f64,
}

impl VoiceFrame {
    fn silent() -> Self {
        Self {
            partials: PartialSet::silent(),
            pitch: 0.0,
            velocity: 0.0,
        }
    }
}

/// A complete snapshot of every voice, ready to render.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    voices: Vec<VoiceFrame>,
    voice_count: usize,
    /// Mix gain taken from voice 0's emitter.
    pub gain: f64,
    generation: u64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            voices: (0..capacity).map(|_| VoiceFrame::silent()).collect(),
            voice_count: 0,
            gain: 1.0,
            generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    /// Voices carried by this frame.
    pub fn voice_count(&self) -> usize {
        self.voice_count
    }

    /// Clamped to capacity.
    pub fn set_voice_count(&mut self, count: usize) {
        self.voice_count = count.min(self.voices.len());
    }

    pub fn voices(&self) -> &[VoiceFrame] {
        &self.voices[..self.voice_count]
    }

    pub fn voice_mut(&mut self, index: usize) -> Option<&mut VoiceFrame> {
        self.voices.get_mut(index)
    }

    /// Publication number stamped when the scheduler handed this frame over.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct FrameExchange {
    back: Mutex<Box<FrameBuffer>>,
    ready: AtomicBool,
    published: AtomicU64,
    consumed: AtomicU64,
}

impl FrameExchange {
    /// Build the exchange and the renderer's end of it.
    pub fn pair(capacity: usize) -> (Arc<FrameExchange>, FrameReader) {
        let exchange = Arc::new(Self {
            back: Mutex::new(Box::new(FrameBuffer::new(capacity))),
            ready: AtomicBool::new(false),
            published: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        });
        let reader = FrameReader {
            exchange: Arc::clone(&exchange),
            front: Box::new(FrameBuffer::new(capacity)),
        };
        (exchange, reader)
    }

    /// True while a published frame waits for the renderer.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Yield until the renderer has taken the last published frame.
    /// Returns whether any waiting was needed.
    pub fn wait_until_consumed(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let backoff = Backoff::new();
        while self.is_ready() {
            backoff.snooze();
        }
        true
    }

    /// Fill the back buffer and hand it to the renderer.
    ///
    /// Callers must have seen `ready` clear (see [`wait_until_consumed`](Self::wait_until_consumed));
    /// otherwise this waits first. Returns the new generation.
    pub fn publish<F>(&self, fill: F) -> u64
    where
        F: FnOnce(&mut FrameBuffer),
    {
        self.wait_until_consumed();

        let generation = self.published.load(Ordering::Relaxed) + 1;
        {
            let mut back = self.back.lock();
            fill(&mut **back);
            back.generation = generation;
        }
        self.published.store(generation, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
        generation
    }

    /// Frames handed over so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames the renderer has swapped in so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// The renderer's end of the exchange. Owns the front buffer.
#[derive(Debug)]
pub struct FrameReader {
    exchange: Arc<FrameExchange>,
    front: Box<FrameBuffer>,
}

impl FrameReader {
    /// Swap in a newly published frame if there is one.
    /// Returns `false` when the previous frame must be reused.
    pub fn check_and_swap(&mut self) -> bool {
        if !self.exchange.ready.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut back = self.exchange.back.lock();
            std::mem::swap(&mut self.front, &mut *back);
        }
        self.exchange.consumed.fetch_add(1, Ordering::Relaxed);
        self.exchange.ready.store(false, Ordering::Release);
        true
    }

    pub fn front(&self) -> &FrameBuffer {
        &self.front
    }

    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }
}
