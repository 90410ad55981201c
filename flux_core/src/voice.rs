//! One voice: an ordered module graph plus the control state driving it.

use crate::error::{CoreError, CoreResult};
use crate::module::{Module, StepContext, Tick};
use crate::partials::PartialSet;

pub const DEFAULT_NOTE: f64 = 220.0;
pub const DEFAULT_BEND: f64 = 1.0;
/// Not zero, so a voice is audible before any note arrives.
pub const DEFAULT_VELOCITY: f64 = 1.0;
pub const DEFAULT_RELEASE_VELOCITY: f64 = 0.5;
pub const DEFAULT_AFTERTOUCH: f64 = 0.0;

pub const NUM_CCS: usize = 128;

/// Stride between the random seeds of consecutive voices.
const SEED_STRIDE: u64 = 10_729_347;

/// Per-voice performance state, written by MIDI/automation collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceControl {
    note: f64,
    bend: f64,
    pitch: f64,
    velocity: f64,
    release_velocity: f64,
    aftertouch: f64,
    midi_note: u8,
    channel: Option<u8>,
    cc: [u8; NUM_CCS],
}

impl VoiceControl {
    pub fn new() -> Self {
        Self {
            note: DEFAULT_NOTE,
            bend: DEFAULT_BEND,
            pitch: DEFAULT_NOTE * DEFAULT_BEND,
            velocity: DEFAULT_VELOCITY,
            release_velocity: DEFAULT_RELEASE_VELOCITY,
            aftertouch: DEFAULT_AFTERTOUCH,
            midi_note: 0,
            channel: None,
            cc: [0; NUM_CCS],
        }
    }

    /// Pitch in Hz: note times bend.
    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn note(&self) -> f64 {
        self.note
    }

    /// Set the note in Hz. Negative values are clamped to zero.
    pub fn set_note(&mut self, hz: f64) {
        self.note = hz.max(0.0);
        self.pitch = self.note * self.bend;
    }

    pub fn bend(&self) -> f64 {
        self.bend
    }

    /// Set the pitch bend as a multiple of the note.
    pub fn set_bend(&mut self, bend: f64) {
        self.bend = bend.max(0.0);
        self.pitch = self.note * self.bend;
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = velocity.clamp(0.0, 1.0);
    }

    pub fn release_velocity(&self) -> f64 {
        self.release_velocity
    }

    pub fn set_release_velocity(&mut self, velocity: f64) {
        self.release_velocity = velocity.clamp(0.0, 1.0);
    }

    pub fn aftertouch(&self) -> f64 {
        self.aftertouch
    }

    pub fn set_aftertouch(&mut self, aftertouch: f64) {
        self.aftertouch = aftertouch.clamp(0.0, 1.0);
    }

    pub fn midi_note(&self) -> u8 {
        self.midi_note
    }

    pub fn set_midi_note(&mut self, note: u8) {
        self.midi_note = note.min(127);
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    /// Channels above 15 clear the assignment.
    pub fn set_channel(&mut self, channel: Option<u8>) {
        self.channel = channel.filter(|c| *c < 16);
    }

    /// Unknown controller numbers read as zero.
    pub fn cc(&self, number: usize) -> u8 {
        self.cc.get(number).copied().unwrap_or(0)
    }

    pub fn set_cc(&mut self, number: usize, value: u8) {
        if let Some(slot) = self.cc.get_mut(number) {
            *slot = value.min(127);
        }
    }

    pub fn ccs(&self) -> &[u8; NUM_CCS] {
        &self.cc
    }
}

impl Default for VoiceControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A voice's module graph.
///
/// Modules run in registration order; each sees the outputs of the modules
/// before it. The emitting module's partials are what the voice sounds.
pub struct Voice {
    index: Option<usize>,
    modules: Vec<Box<dyn Module>>,
    emits: Option<usize>,
    control: VoiceControl,
    rng: fastrand::Rng,
    sample_rate: u32,
}

impl Voice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            index: None,
            modules: Vec::new(),
            emits: None,
            control: VoiceControl::new(),
            rng: fastrand::Rng::with_seed(0),
            sample_rate,
        }
    }

    /// Called once by the voice bank when the voice is registered.
    pub(crate) fn assign_index(&mut self, index: usize, seed: u64) {
        self.index = Some(index);
        let stride = SEED_STRIDE.wrapping_mul(index as u64 + 1);
        self.rng = fastrand::Rng::with_seed(seed.wrapping_add(stride));
    }

    /// Stable index in the engine, once registered.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn control(&self) -> &VoiceControl {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut VoiceControl {
        &mut self.control
    }

    pub fn rng_mut(&mut self) -> &mut fastrand::Rng {
        &mut self.rng
    }

    // ---------------------------
    // Graph editing
    // ---------------------------

    /// Append a module; returns its position.
    pub fn push_module(&mut self, module: Box<dyn Module>) -> usize {
        self.modules.push(module);
        self.modules.len() - 1
    }

    /// Builder form of [`push_module`](Self::push_module).
    pub fn with_module(mut self, module: Box<dyn Module>) -> Self {
        self.push_module(module);
        self
    }

    pub fn insert_module(&mut self, position: usize, module: Box<dyn Module>) -> CoreResult<()> {
        if position > self.modules.len() {
            return Err(CoreError::ModuleIndex {
                index: position,
                len: self.modules.len(),
            });
        }
        self.modules.insert(position, module);
        if let Some(e) = self.emits.as_mut() {
            if *e >= position {
                *e += 1;
            }
        }
        Ok(())
    }

    /// Remove a module. Removing the emitter leaves the voice silent.
    pub fn remove_module(&mut self, position: usize) -> CoreResult<Box<dyn Module>> {
        self.check_position(position)?;
        let module = self.modules.remove(position);
        self.emits = match self.emits {
            Some(e) if e == position => None,
            Some(e) if e > position => Some(e - 1),
            other => other,
        };
        Ok(module)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn module_at(&self, position: usize) -> CoreResult<&dyn Module> {
        self.check_position(position)?;
        Ok(self.modules[position].as_ref())
    }

    pub fn module_at_mut(&mut self, position: usize) -> CoreResult<&mut (dyn Module + 'static)> {
        self.check_position(position)?;
        Ok(self.modules[position].as_mut())
    }

    /// Position of `module` in this voice, compared by identity.
    pub fn position_of(&self, module: &dyn Module) -> Option<usize> {
        let target = std::ptr::from_ref(module).cast::<()>();
        self.modules
            .iter()
            .position(|m| std::ptr::from_ref(m.as_ref()).cast::<()>() == target)
    }

    /// Position of the first module with the given name.
    pub fn position_of_name(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name() == name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules.iter().map(|m| m.as_ref())
    }

    pub fn set_emits(&mut self, position: usize) -> CoreResult<()> {
        self.check_position(position)?;
        self.emits = Some(position);
        Ok(())
    }

    pub fn clear_emits(&mut self) {
        self.emits = None;
    }

    pub fn emits_position(&self) -> Option<usize> {
        self.emits
    }

    /// Partials of the emitting module, if one is set.
    pub fn emitted(&self) -> Option<&PartialSet> {
        self.emits.map(|e| self.modules[e].partials())
    }

    /// Output gain of the emitting module, or 1.0.
    pub fn output_gain(&self) -> f64 {
        self.emits
            .and_then(|e| self.modules[e].output_gain())
            .unwrap_or(1.0)
    }

    fn check_position(&self, position: usize) -> CoreResult<()> {
        if position >= self.modules.len() {
            return Err(CoreError::ModuleIndex {
                index: position,
                len: self.modules.len(),
            });
        }
        Ok(())
    }

    // ---------------------------
    // Lifecycle
    // ---------------------------

    /// Advance every module once, in registration order.
    pub fn evaluate(&mut self, tick: Tick) {
        let Self {
            modules,
            control,
            rng,
            sample_rate,
            ..
        } = self;

        for i in 0..modules.len() {
            let (upstream, rest) = modules.split_at_mut(i);
            let mut ctx = StepContext::new(tick, *sample_rate, control, rng, upstream);
            rest[0].advance(&mut ctx);
        }
    }

    pub fn note_on(&mut self) {
        for m in &mut self.modules {
            m.note_on(&self.control);
        }
    }

    pub fn note_off(&mut self) {
        for m in &mut self.modules {
            m.note_off(&self.control);
        }
    }

    pub fn reinitialize(&mut self) {
        for m in &mut self.modules {
            m.reinitialize();
        }
    }

    pub fn resync_clock(&mut self) {
        for m in &mut self.modules {
            m.resync_clock();
        }
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("index", &self.index)
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("emits", &self.emits)
            .field("pitch", &self.control.pitch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every hook it receives, tagged with its own id.
    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<String>>>,
        partials: PartialSet,
    }

    impl Recorder {
        fn boxed(id: usize, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn Module> {
            Box::new(Self {
                id,
                log: Arc::clone(log),
                partials: PartialSet::silent(),
            })
        }
    }

    impl Module for Recorder {
        fn name(&self) -> &'static str {
            "Recorder"
        }

        fn advance(&mut self, ctx: &mut StepContext<'_>) {
            self.log.lock().unwrap().push(format!(
                "advance {} tick {} upstream {}",
                self.id,
                ctx.tick,
                ctx.upstream_len()
            ));
            self.partials.amplitudes_mut()[0] = self.id as f64;
        }

        fn note_on(&mut self, _control: &VoiceControl) {
            self.log.lock().unwrap().push(format!("on {}", self.id));
        }

        fn note_off(&mut self, _control: &VoiceControl) {
            self.log.lock().unwrap().push(format!("off {}", self.id));
        }

        fn reinitialize(&mut self) {
            self.log.lock().unwrap().push(format!("reinit {}", self.id));
        }

        fn resync_clock(&mut self) {
            self.log.lock().unwrap().push(format!("resync {}", self.id));
        }

        fn partials(&self) -> &PartialSet {
            &self.partials
        }
    }

    #[test]
    fn test_evaluate_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut voice = Voice::new(44_100)
            .with_module(Recorder::boxed(0, &log))
            .with_module(Recorder::boxed(1, &log))
            .with_module(Recorder::boxed(2, &log));

        voice.evaluate(77);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "advance 0 tick 77 upstream 0",
                "advance 1 tick 77 upstream 1",
                "advance 2 tick 77 upstream 2",
            ]
        );
    }

    #[test]
    fn test_lifecycle_hooks_forwarded_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut voice = Voice::new(44_100)
            .with_module(Recorder::boxed(0, &log))
            .with_module(Recorder::boxed(1, &log));

        voice.note_on();
        voice.note_off();
        voice.reinitialize();
        voice.resync_clock();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "on 0", "on 1", "off 0", "off 1", "reinit 0", "reinit 1", "resync 0", "resync 1"
            ]
        );
    }

    #[test]
    fn test_emitter_tracks_edits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut voice = Voice::new(44_100)
            .with_module(Recorder::boxed(0, &log))
            .with_module(Recorder::boxed(1, &log));
        assert!(voice.emitted().is_none());
        assert_eq!(voice.output_gain(), 1.0);

        voice.set_emits(1).unwrap();
        voice.insert_module(0, Recorder::boxed(9, &log)).unwrap();
        assert_eq!(voice.emits_position(), Some(2));

        voice.remove_module(0).unwrap();
        assert_eq!(voice.emits_position(), Some(1));

        voice.remove_module(1).unwrap();
        assert_eq!(voice.emits_position(), None);

        assert!(matches!(
            voice.set_emits(5),
            Err(CoreError::ModuleIndex { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_position_lookup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let voice = Voice::new(44_100)
            .with_module(Recorder::boxed(0, &log))
            .with_module(Recorder::boxed(1, &log));

        let second = voice.module_at(1).unwrap();
        assert_eq!(voice.position_of(second), Some(1));
        assert_eq!(voice.position_of_name("Recorder"), Some(0));
        assert!(voice.module_at(2).is_err());

        let other = Voice::new(44_100).with_module(Recorder::boxed(0, &log));
        assert_eq!(voice.position_of(other.module_at(0).unwrap()), None);
    }

    #[test]
    fn test_control_clamps() {
        let mut control = VoiceControl::new();
        assert_eq!(control.pitch(), 220.0);

        control.set_note(440.0);
        control.set_bend(0.5);
        assert_eq!(control.pitch(), 220.0);

        control.set_velocity(3.0);
        control.set_aftertouch(-1.0);
        control.set_cc(7, 200);
        control.set_cc(500, 1);
        control.set_channel(Some(16));

        assert_eq!(control.velocity(), 1.0);
        assert_eq!(control.aftertouch(), 0.0);
        assert_eq!(control.cc(7), 127);
        assert_eq!(control.cc(500), 0);
        assert_eq!(control.channel(), None);
    }

    #[test]
    fn test_voice_seeds_differ_by_index() {
        let mut a = Voice::new(44_100);
        let mut b = Voice::new(44_100);
        a.assign_index(0, 1);
        b.assign_index(1, 1);
        assert_ne!(a.rng_mut().u64(..), b.rng_mut().u64(..));

        let mut c = Voice::new(44_100);
        c.assign_index(0, 1);
        let mut a2 = Voice::new(44_100);
        a2.assign_index(0, 1);
        assert_eq!(c.rng_mut().u64(..), a2.rng_mut().u64(..));
    }
}
