use crate::module::{Capability, Module, StepContext};
use crate::partials::PartialSet;

use super::pass_through;

pub const DEFAULT_GAIN: f64 = 1.0;

/// Terminal module: passes its input through and carries the output gain.
///
/// When voice 0 emits through an `Out`, its gain scales the whole mix.
pub struct Out {
    input: usize,
    gain: f64,
    partials: PartialSet,
}

impl Out {
    pub fn new(input: usize) -> Self {
        Self {
            input,
            gain: DEFAULT_GAIN,
            partials: PartialSet::silent(),
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.set_gain(gain);
        self
    }

    /// Negative gains are clamped to zero.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain.max(0.0);
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Module for Out {
    fn name(&self) -> &'static str {
        "Out"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Output]
    }

    fn advance(&mut self, ctx: &mut StepContext<'_>) {
        pass_through(ctx.input(self.input), &mut self.partials);
    }

    fn reinitialize(&mut self) {
        self.partials.clear();
    }

    fn partials(&self) -> &PartialSet {
        &self.partials
    }

    fn output_gain(&self) -> Option<f64> {
        Some(self.gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Harmonics;
    use crate::voice::Voice;

    #[test]
    fn test_gain_reported_through_voice() {
        let mut voice = Voice::new(44_100)
            .with_module(Box::new(Harmonics::sine()))
            .with_module(Box::new(Out::new(0).with_gain(0.5)));
        voice.set_emits(1).unwrap();
        voice.evaluate(0);

        assert_eq!(voice.output_gain(), 0.5);
        assert_eq!(voice.emitted().unwrap().amplitudes()[0], 1.0);
        assert!(voice.module_at(1).unwrap().has_capability(Capability::Output));
        assert!(!voice.module_at(0).unwrap().has_capability(Capability::Output));
    }
}
