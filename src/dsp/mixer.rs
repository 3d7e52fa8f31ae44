//! Mixer — sums instrument outputs into the master bus, then applies the
//! song EQ, song volume and the limiter before handing out f32 samples.

use crate::dsp::eq::EqFilter;
use crate::dsp::limiter::Limiter;
use crate::dsp::ramp::Ramp;
use crate::song::Song;

#[derive(Debug, Clone)]
pub struct Mixer {
    left: Vec<f64>,
    right: Vec<f64>,
    eq: EqFilter,
    limiter: Limiter,
}

impl Mixer {
    pub fn new(song: &Song, sample_rate: f64) -> Self {
        Mixer {
            left: Vec::new(),
            right: Vec::new(),
            eq: EqFilter::default(),
            limiter: Limiter::new(&song.limiter, sample_rate),
        }
    }

    /// Make room for runs of up to `samples` without reallocating.
    pub fn reserve(&mut self, samples: usize) {
        self.left.reserve(samples.saturating_sub(self.left.len()));
        self.right.reserve(samples.saturating_sub(self.right.len()));
    }

    /// Prepare a zeroed run of `num_samples`.
    pub fn clear(&mut self, num_samples: usize) {
        self.left.clear();
        self.left.resize(num_samples, 0.0);
        self.right.clear();
        self.right.resize(num_samples, 0.0);
    }

    /// Accumulate one instrument's stereo output.
    pub fn add(&mut self, left: &[f64], right: &[f64]) {
        for (m, s) in self.left.iter_mut().zip(left) {
            *m += s;
        }
        for (m, s) in self.right.iter_mut().zip(right) {
            *m += s;
        }
    }

    /// Finish the run: song EQ, `volume` ramped from its run-start to
    /// run-end value, then the limiter. Writes `len()` samples to the outputs.
    pub fn output(
        &mut self,
        song: &Song,
        volume: (f64, f64),
        sample_rate: f64,
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let n = self.left.len();
        if !song.eq_filter.is_empty() {
            self.eq
                .load(sample_rate, &song.eq_filter, &song.eq_filter, n, (1.0, 1.0));
            self.eq.process(&mut self.left, &mut self.right);
        }

        let mut gain = Ramp::between(volume.0, volume.1, n);
        for (l, r) in self.left.iter_mut().zip(self.right.iter_mut()) {
            let g = gain.next();
            *l *= g;
            *r *= g;
        }

        self.limiter.configure(&song.limiter, sample_rate);
        self.limiter.process(&mut self.left, &mut self.right);

        for (o, &s) in out_left.iter_mut().zip(&self.left) {
            *o = s as f32;
        }
        for (o, &s) in out_right.iter_mut().zip(&self.right) {
            *o = s as f32;
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn reset(&mut self) {
        self.eq.reset();
        self.limiter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_is_silent() {
        let song = Song::default();
        let mut m = Mixer::new(&song, 44100.0);
        m.clear(128);
        let mut l = vec![1.0f32; 128];
        let mut r = vec![1.0f32; 128];
        m.output(&song, (1.0, 1.0), 44100.0, &mut l, &mut r);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
    }

    #[test]
    fn accumulates_instruments() {
        let song = Song::default();
        let mut m = Mixer::new(&song, 44100.0);
        m.clear(4);
        m.add(&[0.25, 0.1, 0.0, 0.0], &[0.0; 4]);
        m.add(&[0.25, 0.0, 0.0, 0.0], &[0.5; 4]);
        let mut l = vec![0.0f32; 4];
        let mut r = vec![0.0f32; 4];
        m.output(&song, (1.0, 1.0), 44100.0, &mut l, &mut r);
        assert!((l[0] - 0.5).abs() < 1e-6, "got {}", l[0]);
        assert!((l[1] - 0.1).abs() < 1e-6);
        assert!((r[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn volume_ramps_across_the_run() {
        let song = Song::default();
        let mut m = Mixer::new(&song, 44100.0);
        m.clear(4);
        m.add(&[0.5; 4], &[0.5; 4]);
        let mut l = vec![0.0f32; 4];
        let mut r = vec![0.0f32; 4];
        m.output(&song, (0.0, 1.0), 44100.0, &mut l, &mut r);
        assert_eq!(l[0], 0.0);
        assert!((l[2] - 0.25).abs() < 1e-6, "halfway: {}", l[2]);
    }

    #[test]
    fn limiter_keeps_overload_in_range() {
        let song = Song::default();
        let mut m = Mixer::new(&song, 44100.0);
        let mut l = vec![0.0f32; 512];
        let mut r = vec![0.0f32; 512];
        for _ in 0..20 {
            m.clear(512);
            m.add(&[4.0; 512], &[4.0; 512]);
            m.output(&song, (1.0, 1.0), 44100.0, &mut l, &mut r);
        }
        assert!(l.iter().all(|s| s.abs() <= 1.05), "peak {:?}", l.iter().fold(0.0f32, |a, b| a.max(b.abs())));
    }
}
