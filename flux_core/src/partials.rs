//! Fixed-capacity partial sets.
//!
//! A partial is one sinusoid of a voice's additive output. Frequencies are
//! ratios of the voice pitch, so `1.0` is the fundamental. The `order` of a
//! slot names the oscillator that renders it: when a module re-sorts its
//! partials by frequency, orders travel with them so phase and smoothed
//! amplitude stay continuous.

/// Number of partial slots in every set.
pub const NUM_PARTIALS: usize = 256;

// orders must fit in a byte
const _: () = assert!(NUM_PARTIALS <= u8::MAX as usize + 1);

#[derive(Debug, Clone, PartialEq)]
pub struct PartialSet {
    amplitudes: Vec<f64>,
    frequencies: Vec<f64>,
    orders: Vec<u8>,
}

impl PartialSet {
    /// All amplitudes zero, all frequencies zero, identity orders.
    pub fn silent() -> Self {
        Self {
            amplitudes: vec![0.0; NUM_PARTIALS],
            frequencies: vec![0.0; NUM_PARTIALS],
            orders: identity_orders(),
        }
    }

    /// Zero amplitudes over the harmonic series (slot `i` at ratio `i + 1`).
    pub fn harmonic() -> Self {
        let mut set = Self::silent();
        for (i, f) in set.frequencies.iter_mut().enumerate() {
            *f = (i + 1) as f64;
        }
        set
    }

    pub fn len(&self) -> usize {
        NUM_PARTIALS
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    pub fn amplitudes_mut(&mut self) -> &mut [f64] {
        &mut self.amplitudes
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn frequencies_mut(&mut self) -> &mut [f64] {
        &mut self.frequencies
    }

    pub fn orders(&self) -> &[u8] {
        &self.orders
    }

    /// Copy another set into this one without reallocating.
    pub fn copy_from(&mut self, other: &PartialSet) {
        self.amplitudes.copy_from_slice(&other.amplitudes);
        self.frequencies.copy_from_slice(&other.frequencies);
        self.orders.copy_from_slice(&other.orders);
    }

    pub fn copy_amplitudes_from(&mut self, other: &PartialSet) {
        self.amplitudes.copy_from_slice(&other.amplitudes);
    }

    /// Copy frequencies together with their orders.
    pub fn copy_frequencies_from(&mut self, other: &PartialSet) {
        self.frequencies.copy_from_slice(&other.frequencies);
        self.orders.copy_from_slice(&other.orders);
    }

    /// Reset to the silent set in place.
    pub fn clear(&mut self) {
        self.amplitudes.fill(0.0);
        self.frequencies.fill(0.0);
        for (i, o) in self.orders.iter_mut().enumerate() {
            *o = i as u8;
        }
    }

    pub fn is_silent(&self) -> bool {
        self.amplitudes.iter().all(|a| *a == 0.0)
    }

    /// Force amplitudes non-negative and finite.
    pub fn constrain(&mut self) {
        for a in &mut self.amplitudes {
            if !a.is_finite() || *a < 0.0 {
                *a = 0.0;
            }
        }
    }

    /// Re-sort slots by ascending frequency, carrying amplitudes and orders.
    ///
    /// Uses an insertion sort: sets are nearly sorted tick to tick and this
    /// never allocates.
    pub fn sort_by_frequency(&mut self) {
        for i in 1..NUM_PARTIALS {
            let mut j = i;
            while j > 0 && self.frequencies[j - 1] > self.frequencies[j] {
                self.frequencies.swap(j - 1, j);
                self.amplitudes.swap(j - 1, j);
                self.orders.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    /// True when `orders` is a permutation of `0..NUM_PARTIALS`.
    pub fn orders_are_permutation(&self) -> bool {
        let mut seen = [false; NUM_PARTIALS];
        for &o in &self.orders {
            let o = o as usize;
            if seen[o] {
                return false;
            }
            seen[o] = true;
        }
        true
    }
}

impl Default for PartialSet {
    fn default() -> Self {
        Self::silent()
    }
}

pub fn identity_orders() -> Vec<u8> {
    (0..NUM_PARTIALS).map(|i| i as u8).collect()
}
