use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use quanta::{Clock, Instant as QuantaInstant};

use super::frame::FrameExchange;

/// Snapshot of pipeline health for a monitoring collaborator (non-RT).
#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    /// Control steps run by the scheduler.
    pub producer_steps: u64,
    /// Steps that found the previous frame still unread and had to wait.
    pub producer_waits: u64,
    /// Renderer blocks emitted.
    pub renderer_blocks: u64,
    /// Blocks that found no new frame and reused the previous one.
    pub renderer_waits: u64,
    pub frames_published: u64,
    pub frames_consumed: u64,
    /// Total clip events since creation.
    pub clip_events: u64,
    /// Total glitch events since creation.
    pub glitch_events: u64,
    /// Minimum block render duration observed (ns).
    pub min_block_nanos: Option<u64>,
    /// Maximum block render duration observed (ns) (peak).
    pub max_block_nanos: Option<u64>,
    /// EMA of block render duration in nanoseconds.
    pub ema_block_nanos: f64,
    /// Real time one block represents, in nanoseconds.
    pub expected_block_nanos: f64,
    pub avg_load_percent: f64,
    /// Time when snapshot was taken.
    pub timestamp: Instant,
}

impl DiagnosticsSnapshot {
    /// Fraction of steps that had to wait on the renderer.
    pub fn producer_wait_ratio(&self) -> f64 {
        ratio(self.producer_waits, self.producer_steps)
    }

    /// Fraction of blocks rendered from a stale frame.
    pub fn renderer_wait_ratio(&self) -> f64 {
        ratio(self.renderer_waits, self.renderer_blocks)
    }

    /// Frames swapped in per frame published.
    pub fn frame_read_ratio(&self) -> f64 {
        ratio(self.frames_consumed, self.frames_published)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Real-time-safe diagnostics shared by the scheduler, the renderer and
/// monitoring collaborators.
///
/// Pipeline threads only touch atomics. Clip and glitch are sticky flags:
/// set by the renderer, cleared when read through `take_*`. Snapshotting
/// is not real-time safe and belongs on a non-RT thread.
pub struct Diagnostics {
    // high-resolution clock used on RT path (quanta)
    clock: Clock,
    block_size: usize,
    sample_rate: u32,

    clipped: AtomicBool,
    glitched: AtomicBool,
    clip_events: AtomicU64,
    glitch_events: AtomicU64,

    producer_steps: AtomicU64,
    producer_waits: AtomicU64,
    renderer_blocks: AtomicU64,
    renderer_waits: AtomicU64,

    // timing stats (atomics)
    min_block_nanos: AtomicU64,
    max_block_nanos: AtomicU64,
    /// EMA of block duration stored as f64 bits in an AtomicU64
    ema_block_bits: AtomicU64,
    ema_alpha: f64,
}

impl Diagnostics {
    /// `ema_alpha` controls how quickly the block timing average follows new
    /// samples; values around 0.05..0.2 work well.
    pub fn new(block_size: usize, sample_rate: u32, ema_alpha: f64) -> Self {
        assert!(ema_alpha > 0.0 && ema_alpha <= 1.0);
        Self {
            clock: Clock::new(),
            block_size,
            sample_rate,
            clipped: AtomicBool::new(false),
            glitched: AtomicBool::new(false),
            clip_events: AtomicU64::new(0),
            glitch_events: AtomicU64::new(0),
            producer_steps: AtomicU64::new(0),
            producer_waits: AtomicU64::new(0),
            renderer_blocks: AtomicU64::new(0),
            renderer_waits: AtomicU64::new(0),
            min_block_nanos: AtomicU64::new(u64::MAX),
            max_block_nanos: AtomicU64::new(0),
            ema_block_bits: AtomicU64::new(0u64),
            ema_alpha,
        }
    }

    // ---------------------------
    // RT-safe small operations
    // ---------------------------

    #[inline(always)]
    pub fn flag_clip(&self) {
        self.clipped.store(true, Ordering::Relaxed);
        self.clip_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn flag_glitch(&self) {
        self.glitched.store(true, Ordering::Relaxed);
        self.glitch_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_step(&self, waited: bool) {
        self.producer_steps.fetch_add(1, Ordering::Relaxed);
        if waited {
            self.producer_waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub fn record_block(&self, swapped: bool) {
        self.renderer_blocks.fetch_add(1, Ordering::Relaxed);
        if !swapped {
            self.renderer_waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a block render duration in nanoseconds. Updates min, max, and EMA.
    #[inline(always)]
    pub fn record_block_duration_nanos(&self, nanos: u64) {
        self.min_block_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_block_nanos.fetch_max(nanos, Ordering::Relaxed);

        // EMA_new = alpha * x + (1 - alpha) * EMA_old
        let alpha = self.ema_alpha;
        let mut old_bits = self.ema_block_bits.load(Ordering::Relaxed);
        loop {
            let old_f = f64::from_bits(old_bits);
            let new_f = alpha * (nanos as f64) + (1.0 - alpha) * old_f;
            match self.ema_block_bits.compare_exchange_weak(
                old_bits,
                new_f.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(found) => old_bits = found,
            }
        }
    }

    pub fn record_block_duration(&self, d: Duration) {
        self.record_block_duration_nanos(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Guard that records the elapsed time between construction and drop.
    ///
    /// ```ignore
    /// let _timer = diagnostics.time_block();
    /// // ... render ...
    /// ```
    #[inline(always)]
    pub fn time_block(&self) -> BlockTimer<'_> {
        BlockTimer {
            diagnostics: self,
            start: self.clock.now(),
        }
    }

    // ---------------------------
    // Poll-and-reset flags
    // ---------------------------

    /// Whether any sample clipped since the last call.
    pub fn take_clipped(&self) -> bool {
        self.clipped.swap(false, Ordering::Relaxed)
    }

    /// Whether the sink ran close to empty since the last call.
    pub fn take_glitched(&self) -> bool {
        self.glitched.swap(false, Ordering::Relaxed)
    }

    // ---------------------------
    // Snapshot (non-RT)
    // ---------------------------

    /// Read every counter. With `reset_peaks`, min/max/EMA timing restart
    /// from scratch afterwards.
    pub fn snapshot(&self, exchange: &FrameExchange, reset_peaks: bool) -> DiagnosticsSnapshot {
        let min_raw = self.min_block_nanos.load(Ordering::Relaxed);
        let max_raw = self.max_block_nanos.load(Ordering::Relaxed);
        let ema = f64::from_bits(self.ema_block_bits.load(Ordering::Relaxed));
        let expected_block_nanos =
            (self.block_size as f64 / self.sample_rate as f64) * 1_000_000_000.0;
        let avg_load_percent = if expected_block_nanos > 0.0 {
            (ema / expected_block_nanos) * 100.0
        } else {
            0.0
        };

        if reset_peaks {
            self.min_block_nanos.store(u64::MAX, Ordering::Relaxed);
            self.max_block_nanos.store(0, Ordering::Relaxed);
            self.ema_block_bits.store(0u64, Ordering::Relaxed);
        }

        DiagnosticsSnapshot {
            producer_steps: self.producer_steps.load(Ordering::Relaxed),
            producer_waits: self.producer_waits.load(Ordering::Relaxed),
            renderer_blocks: self.renderer_blocks.load(Ordering::Relaxed),
            renderer_waits: self.renderer_waits.load(Ordering::Relaxed),
            frames_published: exchange.published(),
            frames_consumed: exchange.consumed(),
            clip_events: self.clip_events.load(Ordering::Relaxed),
            glitch_events: self.glitch_events.load(Ordering::Relaxed),
            // u64::MAX / 0 mean "nothing recorded yet"
            min_block_nanos: (min_raw != u64::MAX).then_some(min_raw),
            max_block_nanos: (max_raw != 0).then_some(max_raw),
            ema_block_nanos: ema,
            expected_block_nanos,
            avg_load_percent,
            timestamp: Instant::now(),
        }
    }
}

/// Records block latency on drop. Atomics only.
pub struct BlockTimer<'a> {
    diagnostics: &'a Diagnostics,
    start: QuantaInstant,
}

impl Drop for BlockTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self
            .diagnostics
            .clock
            .now()
            .saturating_duration_since(self.start);
        self.diagnostics.record_block_duration(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_flags_reset_on_read() {
        let diag = Diagnostics::new(32, 44_100, 0.1);
        assert!(!diag.take_clipped());

        diag.flag_clip();
        diag.flag_clip();
        diag.flag_glitch();

        assert!(diag.take_clipped());
        assert!(!diag.take_clipped());
        assert!(diag.take_glitched());

        let (exchange, _reader) = FrameExchange::pair(1);
        let snap = diag.snapshot(&exchange, false);
        assert_eq!(snap.clip_events, 2);
        assert_eq!(snap.glitch_events, 1);
    }

    #[test]
    fn test_ratios() {
        let diag = Diagnostics::new(32, 44_100, 0.1);
        diag.record_step(true);
        diag.record_step(false);
        diag.record_step(false);
        diag.record_step(false);
        diag.record_block(true);
        diag.record_block(false);

        let (exchange, _reader) = FrameExchange::pair(1);
        let snap = diag.snapshot(&exchange, false);
        assert_eq!(snap.producer_wait_ratio(), 0.25);
        assert_eq!(snap.renderer_wait_ratio(), 0.5);
        assert_eq!(snap.frame_read_ratio(), 0.0);
    }

    #[test]
    fn test_block_timing_peaks() {
        let diag = Diagnostics::new(32, 44_100, 0.5);
        let (exchange, _reader) = FrameExchange::pair(1);
        assert!(diag.snapshot(&exchange, false).min_block_nanos.is_none());

        diag.record_block_duration_nanos(100);
        diag.record_block_duration_nanos(300);

        let snap = diag.snapshot(&exchange, true);
        assert_eq!(snap.min_block_nanos, Some(100));
        assert_eq!(snap.max_block_nanos, Some(300));
        assert!((snap.ema_block_nanos - 175.0).abs() < 1e-9);

        let snap = diag.snapshot(&exchange, false);
        assert!(snap.max_block_nanos.is_none());
    }
}
