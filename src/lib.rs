//! Phobz Live
//!
//! Live audio visualisation: a file is decoded and resampled on a worker
//! thread, played through a realtime device callback, and scrolled across
//! the window as a circular texture of waveform or spectrum rows.
//!
//! # Features
//!
//! - Streaming decode (WAV, MP3, FLAC, AAC) via Symphonia with rubato resampling
//! - Lock-free PCM handoff to a cpal output callback
//! - Fence-gated row uploads into an R32F texture via wgpu
//! - Frame loop tolerant of stale swapchains, with full rebuild on resize

pub mod app;
pub mod audio;
pub mod gpu;
pub mod pipeline;
pub mod playback;
pub mod visual;

// Re-export commonly used types
pub use audio::{pcm_sample_size, DecodeError, Decoder, SampleFormat, StreamFormat};
pub use gpu::{FrameLoop, FrameStatus, GpuContext, GpuError, TransferPipeline};
pub use pipeline::{run_feeder, PipelineError, Session, VisualizerConfig};
pub use playback::{pcm_queue, AudioSink, PcmPlayback, StreamSignals};
pub use visual::{RowFeed, RowMode, VisualizationFeeder};
