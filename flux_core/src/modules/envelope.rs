use crate::error::CoreResult;
use crate::module::{Capability, Module, OptionSpec, StepContext, Tick, check_option};
use crate::partials::PartialSet;
use crate::voice::VoiceControl;

use super::{OFF_ON, pass_through};

pub const OPTION_ONE_SHOT: usize = 0;

static OPTIONS: &[OptionSpec] = &[OptionSpec::new("One Shot", OFF_ON)];

/// Envelope stages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Idle,
    Attack,
    Hold,
    Release,
    Done,
}

/// Attack/hold/release gate over its input's amplitudes.
///
/// Stages are timed against the clock snapshot, so every voice started in the
/// same step moves in lockstep. There is no sustain: the envelope rises, holds,
/// then falls. A note-off cuts attack or hold short unless one-shot is on.
#[derive(Debug, Clone)]
pub struct Envelope {
    input: usize,

    // Timing parameters (in seconds)
    attack_time: f64,
    hold_time: f64,
    release_time: f64,
    one_shot: bool,

    state: EnvelopeState,
    level: f64,
    // level the current stage started from
    start_level: f64,
    // tick the current stage started at; None until the next advance
    stage_start: Option<Tick>,

    partials: PartialSet,
}

impl Envelope {
    pub fn new(input: usize, attack_time: f64, hold_time: f64, release_time: f64) -> Self {
        Self {
            input,
            attack_time: attack_time.max(0.0),
            hold_time: hold_time.max(0.0),
            release_time: release_time.max(0.0),
            one_shot: false,
            state: EnvelopeState::Idle,
            level: 0.0,
            start_level: 0.0,
            stage_start: None,
            partials: PartialSet::silent(),
        }
    }

    /// A quick pluck: 10ms attack, 100ms hold, 300ms release.
    pub fn pluck(input: usize) -> Self {
        Self::new(input, 0.01, 0.1, 0.3)
    }

    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, EnvelopeState::Idle | EnvelopeState::Done)
    }

    fn enter(&mut self, state: EnvelopeState, at: Option<Tick>) {
        self.state = state;
        self.start_level = self.level;
        self.stage_start = at;
    }

    fn update_level(&mut self, tick: Tick, sample_rate: u32) {
        let sr = sample_rate as f64;
        // stages may complete back to back within one step
        loop {
            let start = *self.stage_start.get_or_insert(tick);
            let elapsed = tick.wrapping_sub(start) as f64;

            let (duration, next) = match self.state {
                EnvelopeState::Idle | EnvelopeState::Done => {
                    self.level = 0.0;
                    return;
                }
                EnvelopeState::Attack => (self.attack_time * sr, EnvelopeState::Hold),
                EnvelopeState::Hold => (self.hold_time * sr, EnvelopeState::Release),
                EnvelopeState::Release => (self.release_time * sr, EnvelopeState::Done),
            };

            if elapsed < duration {
                let progress = elapsed / duration;
                self.level = match self.state {
                    EnvelopeState::Attack => {
                        self.start_level + (1.0 - self.start_level) * progress
                    }
                    EnvelopeState::Hold => 1.0,
                    _ => self.start_level * (1.0 - progress),
                };
                return;
            }

            self.level = match self.state {
                EnvelopeState::Release => 0.0,
                _ => 1.0,
            };
            let boundary = start.wrapping_add(duration as Tick);
            self.enter(next, Some(boundary));
        }
    }
}

impl Module for Envelope {
    fn name(&self) -> &'static str {
        "Envelope"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Filter, Capability::Modulation]
    }

    fn advance(&mut self, ctx: &mut StepContext<'_>) {
        self.update_level(ctx.tick, ctx.sample_rate);

        pass_through(ctx.input(self.input), &mut self.partials);
        let level = self.level;
        for a in self.partials.amplitudes_mut() {
            *a *= level;
        }
    }

    fn note_on(&mut self, _control: &VoiceControl) {
        self.enter(EnvelopeState::Attack, None);
    }

    fn note_off(&mut self, _control: &VoiceControl) {
        if !self.one_shot && matches!(self.state, EnvelopeState::Attack | EnvelopeState::Hold) {
            self.enter(EnvelopeState::Release, None);
        }
    }

    fn reinitialize(&mut self) {
        self.level = 0.0;
        self.enter(EnvelopeState::Idle, None);
        self.partials.clear();
    }

    fn resync_clock(&mut self) {
        // restart the current stage from the current level
        if self.is_active() {
            self.enter(self.state, None);
        }
    }

    fn partials(&self) -> &PartialSet {
        &self.partials
    }

    fn option_specs(&self) -> &'static [OptionSpec] {
        OPTIONS
    }

    fn option(&self, index: usize) -> CoreResult<i32> {
        check_option(self.name(), OPTIONS, index, 0)?;
        Ok(self.one_shot as i32)
    }

    fn set_option(&mut self, index: usize, value: i32) -> CoreResult<()> {
        check_option(self.name(), OPTIONS, index, value)?;
        self.one_shot = value == 1;
        Ok(())
    }
}
