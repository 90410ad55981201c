//! Per-voice sinusoid bank driven by published partial frames.
//!
//! Phase and smoothed amplitude are kept per partial *order*, not per slot,
//! so a module that reorders its partials does not make them jump.

use std::f64::consts::TAU;

use flux_core::NUM_PARTIALS;

use super::frame::VoiceFrame;
use super::tables::{fast_sin, wrap_phase};

/// Amplitude smoothing coefficient per sample.
pub const ALPHA: f64 = 0.05;

/// Amplitudes at or below this snap to exactly zero, well clear of subnormals.
pub const WELL_ABOVE_SUBNORMALS: f64 = 1e-100;

/// One smoothing step from `current` toward `target`.
#[inline(always)]
pub fn smooth_amplitude(current: f64, target: f64) -> f64 {
    if current > WELL_ABOVE_SUBNORMALS || target * ALPHA > WELL_ABOVE_SUBNORMALS {
        current * (1.0 - ALPHA) + target * ALPHA
    } else {
        0.0
    }
}

/// Oscillator state of one voice.
#[derive(Debug, Clone)]
pub struct PartialOscillators {
    phases: Box<[f64; NUM_PARTIALS]>,
    amplitudes: Box<[f64; NUM_PARTIALS]>,
}

impl PartialOscillators {
    pub fn new() -> Self {
        Self {
            phases: Box::new([0.0; NUM_PARTIALS]),
            amplitudes: Box::new([0.0; NUM_PARTIALS]),
        }
    }

    /// Phase in radians of the partial with `order`.
    pub fn phase(&self, order: usize) -> f64 {
        self.phases[order]
    }

    /// Smoothed amplitude of the partial with `order`.
    pub fn amplitude(&self, order: usize) -> f64 {
        self.amplitudes[order]
    }

    pub fn reset(&mut self) {
        self.phases.fill(0.0);
        self.amplitudes.fill(0.0);
    }

    /// Produce one sample of `frame` and advance every sounding partial.
    ///
    /// Slots are walked in order. A slot whose absolute frequency exceeds
    /// `nyquist` ends the walk for this sample, so it and every later slot
    /// stay silent and keep their phase.
    #[inline]
    pub fn next_sample(&mut self, frame: &VoiceFrame, gain: f64, sample_rate: f64, nyquist: f64) -> f64 {
        let partials = &frame.partials;
        let amplitudes = partials.amplitudes();
        let frequencies = partials.frequencies();
        let orders = partials.orders();

        let phase_scale = frame.pitch * TAU / sample_rate;
        let level = frame.velocity * gain;
        let mut sample = 0.0;

        for slot in 0..partials.len() {
            let order = orders[slot] as usize;
            let current = smooth_amplitude(self.amplitudes[order], amplitudes[slot]);
            self.amplitudes[order] = current;
            if current * current <= 0.0 {
                continue;
            }

            let relative = frequencies[slot];
            let absolute = relative * frame.pitch;
            if absolute > nyquist {
                break;
            }
            if absolute <= 0.0 {
                continue;
            }

            let phase = wrap_phase(self.phases[order] + relative * phase_scale);
            self.phases[order] = phase;
            sample += fast_sin(phase) * current * level;
        }
        sample
    }
}

impl Default for PartialOscillators {
    fn default() -> Self {
        Self::new()
    }
}
