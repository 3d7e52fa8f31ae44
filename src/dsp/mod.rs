//! DSP Engine — Pure Rust audio synthesis and processing.
//!
//! All DSP runs in Rust for deterministic, cross-platform audio output.
//! The same code powers real-time hosts (via `Synth::synthesize`, natively or
//! through WASM) and the offline WAV renderer.

pub mod bitcrusher;
pub mod chorus;
pub mod cursor;
pub mod delay_line;
pub mod distortion;
pub mod echo;
pub mod effects;
pub mod engine;
pub mod envelope;
pub mod eq;
pub mod filter;
pub mod granular;
pub mod instrument_state;
pub mod kernel;
pub mod limiter;
pub mod mixer;
pub mod oscillator;
pub mod panning;
pub mod ramp;
pub mod renderer;
pub mod reverb;
pub mod ring_mod;
pub mod scheduler;
pub mod tone;
pub mod tone_params;
