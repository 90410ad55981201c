use std::sync::Arc;
use std::thread;

use flux_backend::{AudioSink, Engine, EvaluationMode, MemorySink};
use flux_core::modules::{Harmonics, Out};
use flux_core::{EngineConfig, Module, PartialSet, StepContext, Tick, Voice};
use parking_lot::Mutex;

/// Emits a fixed partial set and records the tick of every step it sees.
struct Fixed {
    partials: PartialSet,
    seen: Arc<Mutex<Vec<Tick>>>,
}

impl Fixed {
    fn new(partials: PartialSet) -> (Self, Arc<Mutex<Vec<Tick>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let module = Self {
            partials,
            seen: Arc::clone(&seen),
        };
        (module, seen)
    }
}

impl Module for Fixed {
    fn name(&self) -> &'static str {
        "Fixed"
    }

    fn advance(&mut self, ctx: &mut StepContext<'_>) {
        self.seen.lock().push(ctx.tick);
    }

    fn partials(&self) -> &PartialSet {
        &self.partials
    }
}

fn fixed_voice(engine: &Engine, partials: PartialSet, note: f64) -> (Voice, Arc<Mutex<Vec<Tick>>>) {
    let (module, seen) = Fixed::new(partials);
    let mut voice = engine.new_voice().with_module(Box::new(module));
    voice.set_emits(0).unwrap();
    voice.control_mut().set_note(note);
    (voice, seen)
}

fn sine_voice(engine: &Engine, note: f64) -> Voice {
    let mut voice = engine
        .new_voice()
        .with_module(Box::new(Harmonics::sine()))
        .with_module(Box::new(Out::new(0)));
    voice.set_emits(1).unwrap();
    voice.control_mut().set_note(note);
    voice
}

fn render(engine: &mut Engine, samples: usize) -> Vec<i16> {
    let mut sink = MemorySink::new();
    let capture = sink.capture();
    engine.render_offline(&mut sink, samples).unwrap();
    capture.samples()
}

#[test]
fn test_zero_amplitudes_render_exact_silence() {
    let config = EngineConfig::default().with_voices(6).with_voices_per_worker(2);
    let mut engine = Engine::new(config).unwrap();
    for i in 0..5 {
        let (voice, _) = fixed_voice(&engine, PartialSet::harmonic(), 110.0 * (i + 1) as f64);
        engine.register_voice(voice).unwrap();
    }
    // no emitting module at all
    engine.register_voice(engine.new_voice()).unwrap();

    let samples = render(&mut engine, 4096);
    assert_eq!(samples.len(), 4096);
    assert!(samples.iter().all(|s| *s == 0));
    assert!(!engine.take_clipped());
}

#[test]
fn test_every_voice_sees_the_same_tick() {
    let config = EngineConfig::default().with_voices(4).with_voices_per_worker(1);
    let mut engine = Engine::new(config).unwrap();
    let mut logs = Vec::new();
    for _ in 0..4 {
        let (voice, seen) = fixed_voice(&engine, PartialSet::harmonic(), 220.0);
        engine.register_voice(voice).unwrap();
        logs.push(seen);
    }

    render(&mut engine, 32 * 50);

    let first = logs[0].lock().clone();
    assert_eq!(first.len(), 50);
    for log in &logs[1..] {
        assert_eq!(*log.lock(), first);
    }
    // one block rendered between consecutive steps
    for pair in first.windows(2) {
        assert_eq!(pair[1].wrapping_sub(pair[0]), 32);
    }
}

#[test]
fn test_worker_count_follows_voices_per_worker() {
    let config = EngineConfig::default().with_voices(8).with_voices_per_worker(3);
    let mut engine = Engine::new(config).unwrap();
    let mut sink = MemorySink::new();
    sink.open(44_100, 2048).unwrap();

    for _ in 0..3 {
        engine.register_voice(sine_voice(&engine, 220.0)).unwrap();
    }
    let report = engine.step().unwrap();
    assert_eq!(report.mode, EvaluationMode::Inline);
    assert_eq!(engine.worker_count(), 0);
    engine.render_block(&mut sink).unwrap();

    // four voices: ceil(4 / 3) groups
    engine.register_voice(sine_voice(&engine, 220.0)).unwrap();
    let report = engine.step().unwrap();
    assert_eq!(report.mode, EvaluationMode::FanOut { workers: 2 });
    engine.render_block(&mut sink).unwrap();

    for _ in 0..3 {
        engine.register_voice(sine_voice(&engine, 220.0)).unwrap();
    }
    let report = engine.step().unwrap();
    assert_eq!(report.mode, EvaluationMode::FanOut { workers: 3 });
    assert_eq!(engine.worker_count(), 3);
}

#[test]
fn test_partial_above_nyquist_silences_the_rest_of_the_voice() {
    let config = EngineConfig::default().with_voices(1);
    let mut engine = Engine::new(config).unwrap();

    let mut partials = PartialSet::harmonic();
    // slot 0 is above nyquist at 1 kHz; slot 1 would be audible
    partials.frequencies_mut()[0] = 40.0;
    partials.frequencies_mut()[1] = 1.0;
    partials.amplitudes_mut()[..2].fill(1.0);
    let (voice, _) = fixed_voice(&engine, partials, 1_000.0);
    engine.register_voice(voice).unwrap();

    let samples = render(&mut engine, 2048);
    assert!(samples.iter().all(|s| *s == 0));
}

#[test]
fn test_sine_at_440_hz() {
    let config = EngineConfig::default().with_voices(1);
    let sample_rate = config.sample_rate as usize;
    let mut engine = Engine::new(config).unwrap();
    engine.register_voice(sine_voice(&engine, 440.0)).unwrap();

    let samples = render(&mut engine, sample_rate);
    // skip the amplitude fade-in
    let settled = &samples[1024..];

    let peak = settled.iter().map(|s| s.unsigned_abs()).max().unwrap();
    assert!((1990..=2000).contains(&peak), "peak {peak}");

    let rising = settled
        .windows(2)
        .filter(|w| w[0] < 0 && w[1] >= 0)
        .count() as f64;
    let seconds = settled.len() as f64 / sample_rate as f64;
    let frequency = rising / seconds;
    assert!((frequency - 440.0).abs() < 2.0, "measured {frequency} Hz");
}

#[test]
fn test_loud_mix_is_clipped_to_i16() {
    let config = EngineConfig::default()
        .with_voices(4)
        .with_voices_per_worker(4)
        .with_volume_multiplier(20_000.0);
    let mut engine = Engine::new(config).unwrap();
    for _ in 0..4 {
        engine.register_voice(sine_voice(&engine, 220.0)).unwrap();
    }

    let samples = render(&mut engine, 8192);
    assert!(samples.contains(&i16::MAX));
    assert!(samples.contains(&i16::MIN));
    assert!(engine.take_clipped());
    assert!(!engine.take_clipped());
}

#[test]
fn test_threaded_renderer_consumes_every_frame() {
    let config = EngineConfig::default().with_voices(4).with_voices_per_worker(2);
    let mut engine = Engine::new(config).unwrap();
    for i in 0..4 {
        engine.register_voice(sine_voice(&engine, 110.0 * (i + 1) as f64)).unwrap();
    }
    let handle = engine.handle();
    let capture_sink = MemorySink::new().with_limit(32 * 400);
    let capture = capture_sink.capture();
    let renderer = engine.start_renderer(capture_sink).unwrap();

    let mut last_tick = 0;
    while !renderer.is_finished() {
        let snap = handle.diagnostics(false);
        if snap.frames_published > snap.frames_consumed {
            thread::yield_now();
            continue;
        }
        let report = engine.step().unwrap();
        assert!(report.tick >= last_tick);
        last_tick = report.tick;
    }
    renderer.join().unwrap();

    assert_eq!(capture.sample_len(), 32 * 400);
    let snap = handle.diagnostics(false);
    assert!(snap.frames_published >= snap.frames_consumed);
    assert!(snap.frames_published - snap.frames_consumed <= 1);
    assert!(snap.renderer_blocks >= 400);
    assert!(snap.max_block_nanos.is_some());
}
