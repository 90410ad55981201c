//! The contract every signal module implements.
//!
//! A module is advanced exactly once per control step, in the order it was
//! registered with its voice. It owns one output [`PartialSet`] that later
//! modules, or the engine, read after the step.

use crate::error::{CoreError, CoreResult};
use crate::partials::PartialSet;
use crate::voice::VoiceControl;

/// Logical sample counter. Wraps silently.
pub type Tick = u32;

/// Tags editing collaborators query to decide how to present a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Produces partials without reading any upstream module.
    Source,
    /// Transforms the partials of an upstream module.
    Filter,
    /// Produces control values rather than audible partials.
    Modulation,
    /// Terminal module whose partials a voice emits.
    Output,
}

/// A named integer option and the names of its legal values.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub values: &'static [&'static str],
}

impl OptionSpec {
    pub const fn new(name: &'static str, values: &'static [&'static str]) -> Self {
        Self { name, values }
    }

    pub fn accepts(&self, value: i32) -> bool {
        value >= 0 && (value as usize) < self.values.len()
    }
}

/// Look up option `index` in `specs` and check `value` against it.
pub fn check_option(
    module: &'static str,
    specs: &'static [OptionSpec],
    index: usize,
    value: i32,
) -> CoreResult<&'static OptionSpec> {
    let spec = specs
        .get(index)
        .ok_or(CoreError::InvalidOption { module, index })?;
    if !spec.accepts(value) {
        return Err(CoreError::InvalidOptionValue {
            module,
            option: spec.name,
            value,
        });
    }
    Ok(spec)
}

/// Everything a module may look at while it advances.
pub struct StepContext<'a> {
    /// Clock snapshot shared by every module of every voice in this step.
    pub tick: Tick,
    pub sample_rate: u32,
    pub control: &'a VoiceControl,
    pub rng: &'a mut fastrand::Rng,
    upstream: &'a [Box<dyn Module>],
}

impl<'a> StepContext<'a> {
    pub fn new(
        tick: Tick,
        sample_rate: u32,
        control: &'a VoiceControl,
        rng: &'a mut fastrand::Rng,
        upstream: &'a [Box<dyn Module>],
    ) -> Self {
        Self {
            tick,
            sample_rate,
            control,
            rng,
            upstream,
        }
    }

    /// Output of the module registered at `position`, if it ran earlier in this step.
    pub fn input(&self, position: usize) -> Option<&PartialSet> {
        self.upstream.get(position).map(|m| m.partials())
    }

    /// Number of modules that have already advanced in this step.
    pub fn upstream_len(&self) -> usize {
        self.upstream.len()
    }
}

pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Compute this step's output.
    fn advance(&mut self, ctx: &mut StepContext<'_>);

    fn note_on(&mut self, _control: &VoiceControl) {}

    fn note_off(&mut self, _control: &VoiceControl) {}

    /// Return to the freshly-authored state.
    fn reinitialize(&mut self) {}

    /// An external clock (re)started.
    fn resync_clock(&mut self) {}

    fn partials(&self) -> &PartialSet;

    /// Gain applied to the whole mix when this module is voice 0's emitter.
    fn output_gain(&self) -> Option<f64> {
        None
    }

    fn option_specs(&self) -> &'static [OptionSpec] {
        &[]
    }

    fn option(&self, index: usize) -> CoreResult<i32> {
        Err(CoreError::InvalidOption {
            module: self.name(),
            index,
        })
    }

    fn set_option(&mut self, index: usize, value: i32) -> CoreResult<()> {
        check_option(self.name(), self.option_specs(), index, value)?;
        Err(CoreError::InvalidOption {
            module: self.name(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SPECS: &[OptionSpec] = &[OptionSpec::new("Curve", &["Linear", "x^2", "x^4"])];

    #[test]
    fn test_check_option() {
        assert_eq!(check_option("Test", SPECS, 0, 2).unwrap().name, "Curve");
        assert_eq!(
            check_option("Test", SPECS, 1, 0).unwrap_err(),
            CoreError::InvalidOption {
                module: "Test",
                index: 1
            }
        );
        assert!(matches!(
            check_option("Test", SPECS, 0, 3),
            Err(CoreError::InvalidOptionValue { value: 3, .. })
        ));
        assert!(check_option("Test", SPECS, 0, -1).is_err());
    }
}
