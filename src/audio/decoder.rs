//! Streaming decoder producing PCM in a fixed output format.
//!
//! [`Decoder::read`] fills caller buffers with exactly the requested number of
//! sample-frames until the stream ends. A decoded frame rarely lines up with
//! the caller's request, so converted output that doesn't fit is parked in a
//! spill buffer and handed out first on the next call.

use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use super::format::{pcm_sample_size, StreamFormat};
use super::loader::SymphoniaSource;
use super::resample::{check_output_format, Resampler};
use super::source::{DecodedFrame, FrameSource, Receive};

/// Errors that can occur while opening or decoding an audio stream.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio stream: {0}")]
    Unsupported(String),

    #[error("No audio track found in file")]
    NoAudioTrack,

    #[error("Decoding failed: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error("Failed to create resampler: {0}")]
    ResamplerInit(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),

    #[error("Destination holds {have} bytes but {need} are required")]
    BufferTooSmall { need: usize, have: usize },
}

/// Decodes a [`FrameSource`] into interleaved PCM of one output format.
pub struct Decoder<S: FrameSource = SymphoniaSource> {
    source: S,
    output: StreamFormat,
    stride: usize,
    resampler: Option<Resampler>,
    frame: DecodedFrame,
    spill: Vec<u8>,
    spill_offset: usize,
    drained: bool,
}

impl Decoder<SymphoniaSource> {
    /// Open an audio file and prepare to decode it into `output`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use phobz_live::audio::{Decoder, StreamFormat};
    /// use std::path::Path;
    ///
    /// let format = StreamFormat::STEREO_F32_192K;
    /// let mut decoder = Decoder::open(format, Path::new("song.flac")).unwrap();
    /// let mut buf = vec![0u8; 1024 * 8];
    /// while !decoder.eof() {
    ///     let frames = decoder.read(&mut buf, 1024).unwrap();
    ///     println!("{frames} frames");
    /// }
    /// ```
    pub fn open(output: StreamFormat, path: &Path) -> Result<Self, DecodeError> {
        let source = SymphoniaSource::open(path)?;
        Self::new(source, output)
    }
}

impl<S: FrameSource> Decoder<S> {
    pub fn new(source: S, output: StreamFormat) -> Result<Self, DecodeError> {
        check_output_format(&output)?;

        Ok(Self {
            source,
            output,
            stride: pcm_sample_size(&output),
            resampler: None,
            frame: DecodedFrame::new(),
            spill: Vec::new(),
            spill_offset: 0,
            drained: false,
        })
    }

    pub fn output_format(&self) -> &StreamFormat {
        &self.output
    }

    /// True once every sample has been handed out. Stays true.
    pub fn eof(&self) -> bool {
        self.drained && self.spill_offset >= self.spill.len()
    }

    /// Read up to `max_samples` sample-frames into `dst`.
    ///
    /// Returns exactly `max_samples` (capped by `dst`'s length) unless the
    /// stream ends first, in which case the short count is the last data and
    /// [`Decoder::eof`] reports true. Afterwards every call returns 0.
    pub fn read(&mut self, dst: &mut [u8], max_samples: usize) -> Result<usize, DecodeError> {
        let stride = self.stride;
        let max_samples = max_samples.min(dst.len() / stride);
        let mut read = 0;

        if self.spill_offset < self.spill.len() {
            let spilled = (self.spill.len() - self.spill_offset) / stride;
            let n = spilled.min(max_samples);
            let bytes = n * stride;
            dst[..bytes].copy_from_slice(&self.spill[self.spill_offset..self.spill_offset + bytes]);
            self.spill_offset += bytes;
            read += n;
        }

        while read < max_samples && !self.drained {
            let out = &mut dst[read * stride..max_samples * stride];

            match self.source.receive_frame(&mut self.frame)? {
                Receive::NeedsInput => self.source.send_packet()?,
                Receive::Eof => {
                    let flushed = match self.resampler.as_mut() {
                        Some(resampler) => resampler.flush(out)?,
                        None => 0,
                    };
                    if flushed == 0 {
                        debug!("decoder drained");
                        self.drained = true;
                    }
                    read += flushed;
                }
                Receive::Frame => {
                    let input = self.frame.format().normalized();
                    let stale = self
                        .resampler
                        .as_ref()
                        .map_or(true, |r| *r.input_format() != input);
                    if stale {
                        debug!(
                            "resampler input: {} ch {:?} @ {} Hz",
                            input.channels, input.sample_format, input.sample_rate
                        );
                        self.resampler = Some(Resampler::new(input, self.output)?);
                    }
                    let Some(resampler) = self.resampler.as_mut() else {
                        continue;
                    };

                    let room = max_samples - read;
                    let bound = resampler.max_output_frames(self.frame.frames());
                    if bound <= room {
                        read += resampler.convert(&self.frame, out)?;
                    } else {
                        self.spill.resize(bound * stride, 0);
                        let converted = resampler.convert(&self.frame, &mut self.spill)?;
                        self.spill.truncate(converted * stride);

                        let n = converted.min(room);
                        out[..n * stride].copy_from_slice(&self.spill[..n * stride]);
                        self.spill_offset = n * stride;
                        read += n;
                    }
                }
            }
        }

        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleFormat;
    use crate::audio::source::BufferSource;

    fn read_all<S: FrameSource>(decoder: &mut Decoder<S>, chunk: usize) -> (Vec<usize>, Vec<u8>) {
        let mut buf = vec![0u8; chunk * decoder.stride];
        let mut counts = Vec::new();
        let mut bytes = Vec::new();
        while !decoder.eof() {
            let n = decoder.read(&mut buf, chunk).unwrap();
            bytes.extend_from_slice(&buf[..n * decoder.stride]);
            counts.push(n);
        }
        (counts, bytes)
    }

    #[test]
    fn test_read_full_chunks_until_eof() {
        let format = StreamFormat::new(2, SampleFormat::F32, 48000);
        let source = BufferSource::new(format, vec![0.5; 2 * 1000], 300);
        let mut decoder = Decoder::new(source, format).unwrap();

        let (counts, bytes) = read_all(&mut decoder, 256);
        assert_eq!(counts, vec![256, 256, 256, 232]);
        assert_eq!(bytes.len(), 1000 * 8);
        assert_eq!(decoder.read(&mut [0u8; 64], 8).unwrap(), 0);
        assert!(decoder.eof());
    }

    #[test]
    fn test_spill_preserves_order() {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let ramp: Vec<f32> = (0..700).map(|i| i as f32).collect();
        let source = BufferSource::new(format, ramp.clone(), 500);
        let mut decoder = Decoder::new(source, format).unwrap();

        let (_, bytes) = read_all(&mut decoder, 64);
        let decoded: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(decoded, ramp);
    }

    #[test]
    fn test_format_change_reinitialises_resampler() {
        let mono = StreamFormat::new(1, SampleFormat::F32, 48000);
        let stereo = StreamFormat::new(2, SampleFormat::S16, 48000);
        let source = BufferSource::new(mono, vec![0.25; 100], 40)
            .with_segment(stereo, vec![-0.25; 2 * 60]);
        let output = StreamFormat::new(2, SampleFormat::F32, 48000);
        let mut decoder = Decoder::new(source, output).unwrap();

        let (_, bytes) = read_all(&mut decoder, 32);
        assert_eq!(bytes.len(), 160 * 8);
    }

    #[test]
    fn test_empty_stream_is_immediately_eof() {
        let format = StreamFormat::default();
        let mut decoder = Decoder::new(BufferSource::empty(16), format).unwrap();
        let mut buf = vec![0u8; 16 * 8];
        assert_eq!(decoder.read(&mut buf, 16).unwrap(), 0);
        assert!(decoder.eof());
    }

    #[test]
    fn test_unplayable_output_rejected() {
        let output = StreamFormat::new(2, SampleFormat::S24, 48000);
        assert!(matches!(
            Decoder::new(BufferSource::empty(16), output),
            Err(DecodeError::Unsupported(_))
        ));
    }
}
