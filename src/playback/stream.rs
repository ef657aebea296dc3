//! Audio output device stream via cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SizedSample, Stream, StreamConfig, SupportedBufferSize};
use log::{error, info, warn};
use thiserror::Error;

use super::sink::{AudioSink, CallbackInfo};
use crate::audio::{SampleFormat, StreamFormat};

/// Errors from the audio output device.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Sample format {0:?} cannot be played")]
    UnsupportedFormat(SampleFormat),

    #[error("Failed to open output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("Failed to pause output stream: {0}")]
    Pause(#[from] cpal::PauseStreamError),
}

/// A running output stream on the default device.
///
/// Dropping the value closes the stream.
pub struct PlaybackStream {
    stream: Stream,
    format: StreamFormat,
}

impl PlaybackStream {
    /// Open the default output device for `format` and drive `sink` from its
    /// callback. Call [`PlaybackStream::play`] to start it.
    pub fn open<S: AudioSink>(
        format: StreamFormat,
        frames_per_buffer: u32,
        sink: S,
    ) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;

        info!(
            "Audio output: {} ({} ch, {} Hz, {:?}, {} frames per buffer)",
            device.name().unwrap_or_else(|_| "unknown".into()),
            format.channels,
            format.sample_rate,
            format.sample_format,
            frames_per_buffer
        );

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: buffer_size(&device, frames_per_buffer),
        };

        let stream = build(&device, &config, format, sink)?;

        Ok(Self { stream, format })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn play(&self) -> Result<(), PlaybackError> {
        self.stream.play()?;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.stream.pause()?;
        Ok(())
    }
}

/// Use the requested buffer size when the device advertises support for it.
fn buffer_size(device: &Device, frames: u32) -> BufferSize {
    match device.default_output_config().map(|c| c.buffer_size().clone()) {
        Ok(SupportedBufferSize::Range { min, max }) if (min..=max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => {
            warn!("Buffer size of {frames} frames not supported, using device default");
            BufferSize::Default
        }
    }
}

fn build<S: AudioSink>(
    device: &Device,
    config: &StreamConfig,
    format: StreamFormat,
    sink: S,
) -> Result<Stream, PlaybackError> {
    let frame_bytes = format.frame_bytes();
    match format.sample_format {
        SampleFormat::U8 => build_typed::<u8, S>(device, config, frame_bytes, sink),
        SampleFormat::S16 => build_typed::<i16, S>(device, config, frame_bytes, sink),
        SampleFormat::S32 => build_typed::<i32, S>(device, config, frame_bytes, sink),
        SampleFormat::F32 => build_typed::<f32, S>(device, config, frame_bytes, sink),
        other => Err(PlaybackError::UnsupportedFormat(other)),
    }
}

fn build_typed<T, S>(
    device: &Device,
    config: &StreamConfig,
    frame_bytes: usize,
    mut sink: S,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + bytemuck::Pod,
    S: AudioSink,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
            let stamp = info.timestamp();
            let info = CallbackInfo {
                output_latency: stamp.playback.duration_since(&stamp.callback),
            };
            let frame_count = bytes.len() / frame_bytes;
            // cpal has no callback-side stop; completion surfaces through
            // StreamSignals and the owner stops the stream.
            let _ = sink.render(bytes, frame_count, &info);
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
