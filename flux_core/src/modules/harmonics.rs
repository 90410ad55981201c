use crate::error::CoreResult;
use crate::module::{Capability, Module, OptionSpec, StepContext, check_option};
use crate::partials::{NUM_PARTIALS, PartialSet};

pub const OPTION_PARTIALS: usize = 0;
pub const OPTION_ROLLOFF: usize = 1;

static PARTIAL_COUNTS: [usize; 7] = [1, 4, 8, 16, 32, 64, NUM_PARTIALS];

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("Partials", &["1", "4", "8", "16", "32", "64", "256"]),
    OptionSpec::new("Rolloff", &["Flat", "1/n", "1/n^2"]),
];

/// Harmonic series source: partial `n` sits at ratio `n` with amplitude
/// `level / n^k`, where `k` is the rolloff exponent.
pub struct Harmonics {
    partials: PartialSet,
    count_option: i32,
    rolloff_option: i32,
    level: f64,
    dirty: bool,
}

impl Harmonics {
    pub fn new() -> Self {
        Self {
            partials: PartialSet::harmonic(),
            count_option: 6,
            rolloff_option: 1,
            level: 1.0,
            dirty: true,
        }
    }

    /// A single sine at the fundamental.
    pub fn sine() -> Self {
        Self {
            count_option: 0,
            ..Self::new()
        }
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level.max(0.0);
        self.dirty = true;
        self
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn partial_count(&self) -> usize {
        PARTIAL_COUNTS[self.count_option as usize]
    }

    fn rebuild(&mut self) {
        let count = self.partial_count();
        let exponent = self.rolloff_option;
        self.partials.clear();
        for (i, f) in self.partials.frequencies_mut().iter_mut().enumerate() {
            *f = (i + 1) as f64;
        }
        for (i, a) in self.partials.amplitudes_mut().iter_mut().enumerate().take(count) {
            let n = (i + 1) as f64;
            *a = self.level / n.powi(exponent);
        }
        self.dirty = false;
    }
}

impl Default for Harmonics {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Harmonics {
    fn name(&self) -> &'static str {
        "Harmonics"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Source]
    }

    fn advance(&mut self, _ctx: &mut StepContext<'_>) {
        if self.dirty {
            self.rebuild();
        }
    }

    fn reinitialize(&mut self) {
        self.dirty = true;
    }

    fn partials(&self) -> &PartialSet {
        &self.partials
    }

    fn option_specs(&self) -> &'static [OptionSpec] {
        OPTIONS
    }

    fn option(&self, index: usize) -> CoreResult<i32> {
        check_option(self.name(), OPTIONS, index, 0)?;
        Ok(match index {
            OPTION_PARTIALS => self.count_option,
            _ => self.rolloff_option,
        })
    }

    fn set_option(&mut self, index: usize, value: i32) -> CoreResult<()> {
        check_option(self.name(), OPTIONS, index, value)?;
        match index {
            OPTION_PARTIALS => self.count_option = value,
            _ => self.rolloff_option = value,
        }
        self.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::voice::VoiceControl;

    fn advance(module: &mut dyn Module) {
        let control = VoiceControl::new();
        let mut rng = fastrand::Rng::with_seed(0);
        let mut ctx = StepContext::new(0, 44_100, &control, &mut rng, &[]);
        module.advance(&mut ctx);
    }

    #[test]
    fn test_sine_has_one_partial() {
        let mut sine = Harmonics::sine();
        advance(&mut sine);
        let p = sine.partials();
        assert_eq!(p.amplitudes()[0], 1.0);
        assert_eq!(p.frequencies()[0], 1.0);
        assert!(p.amplitudes()[1..].iter().all(|a| *a == 0.0));
    }

    #[test]
    fn test_rolloff_option() {
        let mut h = Harmonics::new().with_level(0.5);
        h.set_option(OPTION_PARTIALS, 2).unwrap();
        h.set_option(OPTION_ROLLOFF, 2).unwrap();
        advance(&mut h);

        let a = h.partials().amplitudes();
        assert_eq!(a[0], 0.5);
        assert_eq!(a[1], 0.125);
        assert!((a[7] - 0.5 / 64.0).abs() < 1e-12);
        assert_eq!(a[8], 0.0);
        assert_eq!(h.option(OPTION_ROLLOFF).unwrap(), 2);
    }

    #[test]
    fn test_bad_option_fails() {
        let mut h = Harmonics::new();
        assert!(matches!(
            h.set_option(OPTION_PARTIALS, 7),
            Err(CoreError::InvalidOptionValue { option: "Partials", .. })
        ));
        assert!(matches!(
            h.option(2),
            Err(CoreError::InvalidOption { index: 2, .. })
        ));
    }
}
