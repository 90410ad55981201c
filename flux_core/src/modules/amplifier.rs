use crate::error::CoreResult;
use crate::module::{Capability, Module, OptionSpec, StepContext, check_option};
use crate::partials::PartialSet;

use super::{OFF_ON, pass_through};

pub const OPTION_AFTERTOUCH: usize = 0;

static OPTIONS: &[OptionSpec] = &[OptionSpec::new("Aftertouch", OFF_ON)];

pub const MAX_SCALE: f64 = 8.0;

/// Multiplies every amplitude of its input by `scale`, optionally also by the
/// voice's aftertouch.
pub struct Amplifier {
    input: usize,
    scale: f64,
    track_aftertouch: bool,
    partials: PartialSet,
}

impl Amplifier {
    pub fn new(input: usize) -> Self {
        Self {
            input,
            scale: 1.0,
            track_aftertouch: false,
            partials: PartialSet::silent(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.set_scale(scale);
        self
    }

    /// Clamped to `0.0..=MAX_SCALE`.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale.clamp(0.0, MAX_SCALE);
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Module for Amplifier {
    fn name(&self) -> &'static str {
        "Amplifier"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Filter]
    }

    fn advance(&mut self, ctx: &mut StepContext<'_>) {
        pass_through(ctx.input(self.input), &mut self.partials);

        let mut gain = self.scale;
        if self.track_aftertouch {
            gain *= ctx.control.aftertouch();
        }
        for a in self.partials.amplitudes_mut() {
            *a *= gain;
        }
        self.partials.constrain();
    }

    fn reinitialize(&mut self) {
        self.partials.clear();
    }

    fn partials(&self) -> &PartialSet {
        &self.partials
    }

    fn option_specs(&self) -> &'static [OptionSpec] {
        OPTIONS
    }

    fn option(&self, index: usize) -> CoreResult<i32> {
        check_option(self.name(), OPTIONS, index, 0)?;
        Ok(self.track_aftertouch as i32)
    }

    fn set_option(&mut self, index: usize, value: i32) -> CoreResult<()> {
        check_option(self.name(), OPTIONS, index, value)?;
        self.track_aftertouch = value == 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Harmonics;
    use crate::voice::Voice;

    #[test]
    fn test_scales_upstream_partials() {
        let mut voice = Voice::new(44_100)
            .with_module(Box::new(Harmonics::sine()))
            .with_module(Box::new(Amplifier::new(0).with_scale(0.25)));
        voice.set_emits(1).unwrap();

        voice.evaluate(0);

        let out = voice.emitted().unwrap();
        assert_eq!(out.amplitudes()[0], 0.25);
        assert_eq!(out.frequencies()[0], 1.0);
    }

    #[test]
    fn test_aftertouch_tracking() {
        let mut voice = Voice::new(44_100)
            .with_module(Box::new(Harmonics::sine()))
            .with_module(Box::new(Amplifier::new(0)));
        voice.set_emits(1).unwrap();
        voice
            .module_at_mut(1)
            .unwrap()
            .set_option(OPTION_AFTERTOUCH, 1)
            .unwrap();
        voice.control_mut().set_aftertouch(0.5);

        voice.evaluate(0);
        assert_eq!(voice.emitted().unwrap().amplitudes()[0], 0.5);
    }

    #[test]
    fn test_missing_input_is_silent() {
        let mut voice = Voice::new(44_100).with_module(Box::new(Amplifier::new(3)));
        voice.set_emits(0).unwrap();
        voice.evaluate(0);
        assert!(voice.emitted().unwrap().is_silent());
    }
}
