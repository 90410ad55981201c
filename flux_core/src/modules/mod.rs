//! Reference modules.
//!
//! Small, self-contained modules that give the engine real graphs to run.
//! Filters and outputs name their input by the position of an earlier module
//! in the same voice.

pub mod amplifier;
pub mod envelope;
pub mod harmonics;
pub mod out;

pub use amplifier::Amplifier;
pub use envelope::{Envelope, EnvelopeState};
pub use harmonics::Harmonics;
pub use out::Out;

use crate::partials::PartialSet;

/// Copy `input` into `output`, or silence `output` when there is no input.
pub(crate) fn pass_through(input: Option<&PartialSet>, output: &mut PartialSet) {
    match input {
        Some(set) => output.copy_from(set),
        None => output.clear(),
    }
}

/// Two-value option table shared by on/off switches.
pub(crate) static OFF_ON: &[&str] = &["Off", "On"];
