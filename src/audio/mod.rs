//! Audio decoding and analysis.
//!
//! This module provides:
//! - Streaming file decoding via Symphonia (WAV, MP3, FLAC, AAC)
//! - Channel remixing and sample rate conversion via Rubato
//! - A pull-style [`Decoder`] that hands out exact-size PCM chunks
//! - FFT spectrum analysis via RustFFT
//! - Synthetic signals for tests and benchmarks

pub mod decoder;
pub mod fft;
pub mod format;
pub mod loader;
pub mod resample;
pub mod source;
pub mod synth;

pub use decoder::{DecodeError, Decoder};
pub use fft::SpectrumAnalyzer;
pub use format::{pcm_sample_size, SampleFormat, StreamFormat};
pub use loader::SymphoniaSource;
pub use resample::Resampler;
pub use source::{BufferSource, DecodedFrame, FrameSource, Receive};
