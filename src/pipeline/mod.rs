//! Session wiring: decode thread, playback stream and visualisation feeder.
//!
//! ```text
//! file -> Decoder -> run_feeder --+--> PcmQueue --> PcmPlayback (device thread)
//!                                 +--> visual tap --> VisualizationFeeder (render thread)
//! ```

pub mod config;

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::audio::{DecodeError, Decoder, FrameSource};
use crate::gpu::GpuError;
use crate::playback::{
    pcm_queue, PcmPlayback, PcmProducer, PlaybackError, PlaybackStream, StreamSignals,
};
use crate::visual::{visual_tap, TapWriter, VisualizationFeeder};

pub use config::{ConfigError, VisualizerConfig};

/// How long the decode thread sleeps while paused or while the queue is full.
const BACKOFF: Duration = Duration::from_millis(2);

/// Errors that can occur while running a session.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("Decode thread panicked")]
    WorkerPanicked,
}

/// Pull PCM from `decoder` and push it to playback and the visual tap until
/// the stream ends or a shutdown is requested.
///
/// End of stream is signalled on every exit path, errors included, so the
/// playback callback can always complete. Returns the sample-frames pushed.
pub fn run_feeder<S: FrameSource>(
    decoder: &mut Decoder<S>,
    producer: &mut PcmProducer,
    tap: &mut TapWriter,
    signals: &StreamSignals,
    chunk_samples: usize,
) -> Result<u64, DecodeError> {
    let result = feed(decoder, producer, tap, signals, chunk_samples.max(1));
    signals.set_end_of_stream();
    match &result {
        Ok(frames) => debug!("feeder finished after {frames} frames"),
        Err(e) => warn!("feeder stopped: {e}"),
    }
    result
}

fn feed<S: FrameSource>(
    decoder: &mut Decoder<S>,
    producer: &mut PcmProducer,
    tap: &mut TapWriter,
    signals: &StreamSignals,
    chunk_samples: usize,
) -> Result<u64, DecodeError> {
    let stride = decoder.output_format().frame_bytes();
    let mut chunk = vec![0u8; chunk_samples * stride];
    let mut total = 0u64;
    let mut underruns = 0u64;

    while !decoder.eof() {
        if signals.shutdown_requested() {
            return Ok(total);
        }
        if signals.is_paused() {
            std::thread::sleep(BACKOFF);
            continue;
        }

        let frames = decoder.read(&mut chunk, chunk_samples)?;
        let bytes = &chunk[..frames * stride];
        tap.push_pcm(bytes);

        // Only this side may wait; the callback never does.
        let mut pushed = 0;
        while pushed < bytes.len() {
            if signals.shutdown_requested() {
                return Ok(total);
            }
            let n = producer.push(&bytes[pushed..]);
            if n == 0 {
                std::thread::sleep(BACKOFF);
            }
            pushed += n;
        }
        total += frames as u64;

        let seen = signals.underruns();
        if seen != underruns {
            warn!("playback underran {} time(s)", seen - underruns);
            underruns = seen;
        }
    }

    Ok(total)
}

/// One file being played and visualised.
///
/// Fields drop in declaration order: the device stream goes first so the
/// callback stops before the queue it reads from is released.
pub struct Session {
    stream: PlaybackStream,
    feeder: VisualizationFeeder,
    worker: Option<JoinHandle<Result<u64, DecodeError>>>,
    signals: Arc<StreamSignals>,
    paused: bool,
}

impl Session {
    /// Open `path`, start the decode thread and begin playback.
    pub fn start(path: &Path, config: &VisualizerConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let format = config.output_format;
        let frame_bytes = format.frame_bytes();

        let mut decoder = Decoder::open(format, path)?;
        info!("Playing {}", path.display());

        let signals = StreamSignals::new();
        let (mut producer, consumer) = pcm_queue(config.queue_bytes)
            .ok_or_else(|| ConfigError::Invalid("queue_bytes must be non-zero".into()))?;

        // The decoder runs ahead of the speaker by at most the queue plus one
        // chunk; the visual history has to cover that lead.
        let lead = config.queue_bytes / frame_bytes + config.read_chunk_samples;
        let columns = config.chunk_size as usize;
        let (mut tap, reader) = visual_tap(lead + 2 * columns + config.hop_samples as usize, format)
            .ok_or_else(|| ConfigError::Invalid("empty visual tap".into()))?;
        let feeder = VisualizationFeeder::new(
            reader,
            signals.clone(),
            config.row_mode,
            columns,
            config.hop_samples,
            lead,
            frame_bytes,
        )
        .ok_or_else(|| ConfigError::Invalid("chunk_size does not suit the row mode".into()))?;

        let sink = PcmPlayback::new(consumer, signals.clone(), frame_bytes);
        let stream = PlaybackStream::open(format, config.frames_per_buffer, sink)?;

        let chunk = config.read_chunk_samples;
        let worker_signals = signals.clone();
        let worker = std::thread::Builder::new()
            .name("phobz-decode".into())
            .spawn(move || {
                run_feeder(&mut decoder, &mut producer, &mut tap, &worker_signals, chunk)
            })?;

        let session = Self {
            stream,
            feeder,
            worker: Some(worker),
            signals,
            paused: false,
        };
        session.stream.play()?;
        Ok(session)
    }

    pub fn signals(&self) -> &Arc<StreamSignals> {
        &self.signals
    }

    pub fn feeder_mut(&mut self) -> &mut VisualizationFeeder {
        &mut self.feeder
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume playback and decoding. Returns the new paused state.
    pub fn toggle_pause(&mut self) -> Result<bool, PipelineError> {
        let paused = !self.paused;
        set_paused(&self.stream, &self.signals, paused)?;
        self.paused = paused;
        info!("{}", if paused { "Paused" } else { "Resumed" });
        Ok(paused)
    }

    /// True once the device has played every decoded byte.
    pub fn is_finished(&self) -> bool {
        self.signals.is_flushed()
    }

    /// Stop decoding and surface any error the decode thread hit.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        self.signals.request_shutdown();
        if let Err(e) = self.stream.pause() {
            warn!("failed to stop playback: {e}");
        }

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let frames = worker.join().map_err(|_| PipelineError::WorkerPanicked)??;
        info!(
            "Session ended: {frames} frames decoded, {} underruns",
            self.signals.underruns()
        );
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.signals.request_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Start and stop of the output device.
trait Transport {
    fn play(&self) -> Result<(), PlaybackError>;
    fn pause(&self) -> Result<(), PlaybackError>;
}

impl Transport for PlaybackStream {
    fn play(&self) -> Result<(), PlaybackError> {
        PlaybackStream::play(self)
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        PlaybackStream::pause(self)
    }
}

/// Switch the device first; the shared flag only follows once it succeeded.
fn set_paused<T: Transport>(
    transport: &T,
    signals: &StreamSignals,
    paused: bool,
) -> Result<(), PlaybackError> {
    if paused {
        transport.pause()?;
    } else {
        transport.play()?;
    }
    signals.set_paused(paused);
    Ok(())
}
