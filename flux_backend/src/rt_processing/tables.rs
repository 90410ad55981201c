use std::f64::consts::{PI, TAU};
use std::sync::OnceLock;

// Power of 2 for fast masking
const SINE_TABLE_SIZE: usize = 8192;
const SINE_TABLE_MASK: usize = SINE_TABLE_SIZE - 1;

const TABLE_STEPS_PER_RADIAN: f64 = SINE_TABLE_SIZE as f64 / TAU;

// Initialized once, shared by every renderer
static SINE_TABLE: OnceLock<Vec<f64>> = OnceLock::new();

/// Build the table ahead of the first real-time use.
pub fn init_tables() {
    let _ = get_sine_table();
}

pub fn get_sine_table() -> &'static [f64] {
    SINE_TABLE.get_or_init(|| {
        (0..SINE_TABLE_SIZE)
            .map(|i| (2.0 * PI * i as f64 / SINE_TABLE_SIZE as f64).sin())
            .collect()
    })
}

/// Linearly interpolated table sine. `radians` must be in `[0, 2π)`.
#[inline]
pub fn fast_sin(radians: f64) -> f64 {
    let table = get_sine_table();
    let scaled = radians * TABLE_STEPS_PER_RADIAN;
    let whole = scaled as usize;
    let frac = scaled - whole as f64;

    let index = whole & SINE_TABLE_MASK;
    let s1 = table[index];
    let s2 = table[(index + 1) & SINE_TABLE_MASK];
    s1 + frac * (s2 - s1)
}

/// Wrap a phase that has just been advanced back into `[0, 2π)`.
///
/// A single subtraction covers the usual case; increments larger than a full
/// turn fall back to a remainder.
#[inline]
pub fn wrap_phase(mut radians: f64) -> f64 {
    if radians >= TAU {
        radians -= TAU;
        if radians >= TAU {
            radians %= TAU;
        }
    }
    radians
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_initialization() {
        init_tables();
        assert_eq!(get_sine_table().len(), SINE_TABLE_SIZE);
    }

    #[test]
    fn test_sine_wave_properties() {
        assert!(fast_sin(0.0).abs() < 1e-6);
        assert!((fast_sin(PI / 2.0) - 1.0).abs() < 1e-6);
        assert!(fast_sin(PI).abs() < 1e-6);
        assert!((fast_sin(3.0 * PI / 2.0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matches_std_sin() {
        let mut x = 0.0;
        while x < TAU {
            assert!((fast_sin(x) - x.sin()).abs() < 1e-6, "at {x}");
            x += 0.0137;
        }
    }

    #[test]
    fn test_phase_wrapping() {
        assert_eq!(wrap_phase(1.0), 1.0);
        assert!((wrap_phase(TAU + 0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_phase(5.0 * TAU + 0.25) - 0.25).abs() < 1e-9);
        assert!(wrap_phase(TAU) < 1e-12);
    }
}
