//! Band-limited pulse kernel: the difference of two PolyBLEP saws.

use crate::dsp::kernel::wrap_phase;
use crate::dsp::oscillator::poly_blep;
use crate::dsp::tone::Tone;

/// PolyBLEP saw rising from -1 to 1 over one cycle.
#[inline]
pub(crate) fn blep_saw(phase: f64, delta: f64) -> f64 {
    2.0 * phase - 1.0 - poly_blep(phase, delta)
}

/// High for `width` of the cycle. Zero mean for any width.
#[inline]
fn pulse(phase: f64, delta: f64, width: f64) -> f64 {
    blep_saw(phase, delta) - blep_saw(wrap_phase(phase + width), delta)
}

pub fn render(tone: &mut Tone, buffer: &mut [f64]) {
    let two_voices = tone.unison_voices > 1;
    let sign = tone.unison_sign;
    let mut phase_a = tone.phases[0];
    let mut phase_b = tone.phases[1];
    let mut delta_a = tone.phase_deltas[0];
    let mut delta_b = tone.phase_deltas[1];
    let scale_a = tone.phase_delta_scales[0];
    let scale_b = tone.phase_delta_scales[1];
    let mut width = tone.pulse_width;
    let mut expression = tone.expression;

    for out in buffer.iter_mut() {
        let mut wave = pulse(phase_a, delta_a, width);
        phase_a = wrap_phase(phase_a + delta_a);
        delta_a *= scale_a;
        if two_voices {
            wave += sign * pulse(phase_b, delta_b, width);
            phase_b = wrap_phase(phase_b + delta_b);
            delta_b *= scale_b;
        }

        *out += tone.note_filter.process(wave) * expression;
        expression += tone.expression_delta;
        width += tone.pulse_width_delta;
    }

    tone.phases[0] = phase_a;
    tone.phases[1] = phase_b;
    tone.phase_deltas[0] = delta_a;
    tone.phase_deltas[1] = delta_b;
    tone.pulse_width = width;
    tone.expression = expression;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_pulse_is_mostly_low() {
        let mut tone = Tone::new();
        tone.phase_deltas[0] = 0.01;
        tone.expression = 1.0;
        tone.pulse_width = 0.125;
        let mut buffer = vec![0.0; 1000];
        render(&mut tone, &mut buffer);

        let high = buffer.iter().filter(|&&v| v > 0.0).count();
        let ratio = high as f64 / buffer.len() as f64;
        assert!((ratio - 0.125).abs() < 0.03, "high for {ratio} of the time");
        let mean = buffer.iter().sum::<f64>() / buffer.len() as f64;
        assert!(mean.abs() < 0.01, "mean {mean}");
    }

    #[test]
    fn width_ramps_towards_target() {
        let mut tone = Tone::new();
        tone.phase_deltas[0] = 0.01;
        tone.pulse_width = 0.1;
        tone.pulse_width_delta = 0.001;
        let mut buffer = vec![0.0; 100];
        render(&mut tone, &mut buffer);
        assert!((tone.pulse_width - 0.2).abs() < 1e-9);
    }
}
