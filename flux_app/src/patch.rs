//! Demo patches: a few voice graphs built from the reference modules.

use clap::ValueEnum;
use flux_backend::{Automation, EngineHandle};
use flux_core::modules::{Amplifier, Envelope, Harmonics, Out, harmonics};
use flux_core::{Module, Tick, Voice, VoiceBank};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// One sine per voice.
    Sine,
    /// Sustained 8-partial tones.
    Drone,
    /// Bright partials under a pluck envelope, retriggered in turn.
    Pluck,
}

/// A minor chord stacked over two octaves.
pub const DEFAULT_NOTES: [f64; 6] = [110.0, 164.81, 220.0, 261.63, 329.63, 440.0];

fn harmonic_source(partials_option: i32, rolloff_option: i32) -> anyhow::Result<Harmonics> {
    let mut source = Harmonics::new();
    source.set_option(harmonics::OPTION_PARTIALS, partials_option)?;
    source.set_option(harmonics::OPTION_ROLLOFF, rolloff_option)?;
    Ok(source)
}

pub fn build_voice(handle: &EngineHandle, preset: Preset, note: f64) -> anyhow::Result<Voice> {
    let mut voice = handle.new_voice();
    let emits = match preset {
        Preset::Sine => {
            voice.push_module(Box::new(Harmonics::sine().with_level(0.5)));
            voice.push_module(Box::new(Out::new(0)))
        }
        Preset::Drone => {
            // 8 partials, 1/n
            voice.push_module(Box::new(harmonic_source(2, 1)?));
            voice.push_module(Box::new(Amplifier::new(0).with_scale(0.25)));
            voice.push_module(Box::new(Out::new(1)))
        }
        Preset::Pluck => {
            // 32 partials, 1/n^2
            voice.push_module(Box::new(harmonic_source(4, 2)?));
            voice.push_module(Box::new(Envelope::pluck(0)));
            voice.push_module(Box::new(Amplifier::new(1).with_scale(0.6)));
            voice.push_module(Box::new(Out::new(2)))
        }
    };
    voice.set_emits(emits)?;
    voice.control_mut().set_note(note);
    Ok(voice)
}

/// Register one voice per note. Returns how many were added.
pub fn load(handle: &EngineHandle, preset: Preset, notes: &[f64]) -> anyhow::Result<usize> {
    let capacity = handle.config().voices;
    for &note in notes.iter().take(capacity) {
        let voice = build_voice(handle, preset, note)?;
        let index = handle.register_voice(voice)?;
        debug!(index, note, ?preset, "demo voice loaded");
    }
    Ok(notes.len().min(capacity))
}

/// Fires note-on on one voice after another, `period` ticks apart.
pub struct Arpeggio {
    period: Tick,
    last_step: Option<Tick>,
}

impl Arpeggio {
    pub fn new(period: Tick) -> Self {
        Self {
            period: period.max(1),
            last_step: None,
        }
    }
}

impl Automation for Arpeggio {
    fn step(&mut self, tick: Tick, voices: &VoiceBank) {
        let step = tick / self.period;
        if self.last_step == Some(step) || voices.is_empty() {
            return;
        }
        self.last_step = Some(step);
        let index = step as usize % voices.len();
        if let Ok(mut voice) = voices.voice(index) {
            voice.note_on();
        }
    }
}
