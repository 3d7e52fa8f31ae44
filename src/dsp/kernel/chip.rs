//! Wavetable kernel for chip and harmonics instruments.

use crate::dsp::kernel::wrap_phase;
use crate::dsp::oscillator::Wavetable;
use crate::dsp::tone::Tone;

pub fn render(table: &Wavetable, tone: &mut Tone, buffer: &mut [f64]) {
    let two_voices = tone.unison_voices > 1;
    let sign = tone.unison_sign;
    let mut phase_a = tone.phases[0];
    let mut phase_b = tone.phases[1];
    let mut delta_a = tone.phase_deltas[0];
    let mut delta_b = tone.phase_deltas[1];
    let scale_a = tone.phase_delta_scales[0];
    let scale_b = tone.phase_delta_scales[1];
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    // The integral depends only on the phase, so recomputing it here makes
    // a run split anywhere continue bit-for-bit.
    let mut prev_a = table.integral_at(phase_a);
    let mut prev_b = table.integral_at(phase_b);

    for out in buffer.iter_mut() {
        phase_a = wrap_phase(phase_a + delta_a);
        let next_a = table.integral_at(phase_a);
        let mut wave = table.differentiate(prev_a, next_a, delta_a);
        prev_a = next_a;
        delta_a *= scale_a;

        if two_voices {
            phase_b = wrap_phase(phase_b + delta_b);
            let next_b = table.integral_at(phase_b);
            wave += sign * table.differentiate(prev_b, next_b, delta_b);
            prev_b = next_b;
            delta_b *= scale_b;
        }

        *out += tone.note_filter.process(wave) * expression;
        expression += expression_delta;
    }

    tone.phases[0] = phase_a;
    tone.phases[1] = phase_b;
    tone.phase_deltas[0] = delta_a;
    tone.phase_deltas[1] = delta_b;
    tone.expression = expression;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::oscillator::{WaveTables, frequency_from_pitch};
    use crate::song::ChipWave;

    fn tone_at(pitch: f64, sample_rate: f64) -> Tone {
        let mut tone = Tone::new();
        tone.phase_deltas[0] = frequency_from_pitch(pitch) / sample_rate;
        tone.expression = 1.0;
        tone
    }

    #[test]
    fn square_a4_has_expected_period() {
        let tables = WaveTables::new(0);
        let mut tone = tone_at(69.0, 44100.0);
        let mut buffer = vec![0.0; 44100];
        render(tables.chip(ChipWave::Square), &mut tone, &mut buffer);

        let rising: Vec<usize> = (1..buffer.len())
            .filter(|&i| buffer[i - 1] < 0.0 && buffer[i] >= 0.0)
            .collect();
        let cycles = (rising.len() - 1) as f64;
        let period = (rising[rising.len() - 1] - rising[0]) as f64 / cycles;
        assert!(
            (period - 44100.0 / 440.0).abs() < 0.05,
            "period {period} samples"
        );
        let peak = buffer.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(peak > 0.9 && peak <= 1.0 + 1e-9, "peak {peak}");
    }

    #[test]
    fn split_runs_match_one_run() {
        let tables = WaveTables::new(0);
        let table = tables.chip(ChipWave::Sawtooth);
        let mut whole = tone_at(57.3, 48000.0);
        let mut split = whole.clone();

        let mut a = vec![0.0; 300];
        render(table, &mut whole, &mut a);

        let mut b = vec![0.0; 300];
        let (first, second) = b.split_at_mut(117);
        render(table, &mut split, first);
        render(table, &mut split, second);

        for (i, (x, y)) in a.iter().zip(&b).enumerate() {
            assert!((x - y).abs() < 1e-12, "diverged at {i}: {x} vs {y}");
        }
    }
}
