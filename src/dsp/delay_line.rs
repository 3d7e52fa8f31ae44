//! Power-of-two circular delay line.
//!
//! Shared by the echo, reverb, chorus, panning, granular and picked-string
//! code. Indices are masked instead of taken modulo, and growth keeps every
//! stored sample at the same delay from the write head.

use tracing::trace;

use crate::config::EPSILON;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DelayLine {
    buffer: Vec<f64>,
    mask: usize,
    /// Next write index; always `< buffer.len()`.
    pos: usize,
    dirty: bool,
}

impl DelayLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(min_len: usize) -> Self {
        let mut line = Self::new();
        line.ensure_capacity(min_len);
        line
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn mask(&self) -> usize {
        self.mask
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Grow to at least `min_len` samples (rounded up to a power of two).
    /// Returns whether the line grew. Existing samples keep their delay.
    pub fn ensure_capacity(&mut self, min_len: usize) -> bool {
        let new_len = min_len.max(1).next_power_of_two();
        let old_len = self.buffer.len();
        if new_len <= old_len {
            return false;
        }
        // Oldest sample first, then pad with silence: reuses spare capacity.
        if old_len > 0 {
            self.buffer.rotate_left(self.pos);
        }
        self.buffer.resize(new_len, 0.0);
        trace!(old_len, new_len, "delay line grew");
        self.mask = new_len - 1;
        self.pos = old_len & self.mask;
        true
    }

    #[inline]
    pub fn write(&mut self, sample: f64) {
        self.buffer[self.pos] = sample;
        self.pos = (self.pos + 1) & self.mask;
        self.dirty = true;
    }

    /// Sample written `delay` writes ago; `read(1)` is the newest.
    #[inline]
    pub fn read(&self, delay: usize) -> f64 {
        self.buffer[self.pos.wrapping_sub(delay) & self.mask]
    }

    /// Linearly interpolated read at a fractional delay.
    #[inline]
    pub fn read_fractional(&self, delay: f64) -> f64 {
        let whole = delay as usize;
        let frac = delay - whole as f64;
        let a = self.read(whole);
        let b = self.read(whole + 1);
        a + (b - a) * frac
    }

    /// Direct indexed access, masked.
    #[inline]
    pub fn at(&self, index: usize) -> f64 {
        self.buffer[index & self.mask]
    }

    #[inline]
    pub fn set(&mut self, index: usize, sample: f64) {
        self.buffer[index & self.mask] = sample;
        self.dirty = true;
    }

    /// Move the write head without writing.
    #[inline]
    pub fn advance(&mut self) {
        self.pos = (self.pos + 1) & self.mask;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Zero the run of denormal or non-finite samples just behind the write
    /// head. Stops at the first exact zero or normal sample.
    pub fn sanitize(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut index = self.pos;
        for _ in 0..self.buffer.len() {
            index = index.wrapping_sub(1) & self.mask;
            let sample = self.buffer[index].abs();
            if sample.is_finite() && (sample == 0.0 || sample >= EPSILON) {
                break;
            }
            self.buffer[index] = 0.0;
        }
    }

    /// Drop to zero length, keeping the allocation for the next growth.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.mask = 0;
        self.pos = 0;
        self.dirty = false;
    }

    /// Zero the contents, keep the allocation.
    pub fn clear(&mut self) {
        if self.dirty {
            self.buffer.fill(0.0);
            self.dirty = false;
        }
    }
}
