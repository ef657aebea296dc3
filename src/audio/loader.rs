//! Audio file decoding using Symphonia.
//!
//! Supports WAV, MP3, FLAC, and AAC formats. [`SymphoniaSource`] demuxes one
//! packet at a time so the streaming decoder never holds the whole file.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, info, warn};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::decoder::DecodeError;
use super::format::{SampleFormat, StreamFormat};
use super::source::{DecodedFrame, FrameSource, Receive};

/// Packet-at-a-time decoder over a media file.
pub struct SymphoniaSource {
    reader: Box<dyn FormatReader>,
    codec: Box<dyn CodecDecoder>,
    track_id: u32,
    pending: Option<Packet>,
    flushing: bool,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_spec: Option<SignalSpec>,
    sample_capacity: u64,
}

impl SymphoniaSource {
    /// Open `path` and select its first decodable audio track.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DecodeError::NotFound(path.to_path_buf()),
            _ => DecodeError::Io(e),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(unsupported)?;

        let reader = probed.format;
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(unsupported)?;

        info!(
            "Opened {} (track {}, {} Hz, {} channels)",
            path.display(),
            track_id,
            track.codec_params.sample_rate.unwrap_or(0),
            track.codec_params.channels.map(|c| c.count()).unwrap_or(0)
        );

        Ok(Self {
            reader,
            codec,
            track_id,
            pending: None,
            flushing: false,
            sample_buf: None,
            sample_spec: None,
            sample_capacity: 0,
        })
    }
}

impl FrameSource for SymphoniaSource {
    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> Result<Receive, DecodeError> {
        let Some(packet) = self.pending.take() else {
            return Ok(if self.flushing {
                Receive::Eof
            } else {
                Receive::NeedsInput
            });
        };

        let decoded = self.codec.decode(&packet)?;
        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(Receive::NeedsInput);
        }

        let format = StreamFormat {
            channels: spec.channels.count() as u16,
            channel_layout: spec.channels.bits() as u64,
            sample_format: native_sample_format(&decoded),
            sample_rate: spec.rate,
        };

        // Reallocate on spec change or when a packet decodes larger than before.
        let capacity = decoded.capacity() as u64;
        if self.sample_spec != Some(spec) || self.sample_capacity < capacity {
            self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            self.sample_spec = Some(spec);
            self.sample_capacity = capacity;
        }

        match self.sample_buf.as_mut() {
            Some(buf) => {
                buf.copy_interleaved_ref(decoded);
                frame.fill(format, buf.samples());
                Ok(Receive::Frame)
            }
            None => Ok(Receive::NeedsInput),
        }
    }

    fn send_packet(&mut self) -> Result<(), DecodeError> {
        if self.flushing {
            return Ok(());
        }

        loop {
            match self.reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    self.pending = Some(packet);
                    return Ok(());
                }
                Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("end of input, flushing codec");
                    self.flushing = true;
                    let finalized = self.codec.finalize();
                    if let Some(ok) = finalized.verify_ok {
                        if !ok {
                            warn!("decoded stream failed verification");
                        }
                    }
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.codec.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn unsupported(err: SymphoniaError) -> DecodeError {
    match err {
        SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
        SymphoniaError::IoError(e) => DecodeError::Io(e),
        other => DecodeError::Codec(other),
    }
}

fn native_sample_format(buffer: &AudioBufferRef<'_>) -> SampleFormat {
    match buffer {
        AudioBufferRef::U8(_) | AudioBufferRef::S8(_) => SampleFormat::U8,
        AudioBufferRef::U16(_) | AudioBufferRef::S16(_) => SampleFormat::S16,
        AudioBufferRef::U24(_) | AudioBufferRef::S24(_) => SampleFormat::S24,
        AudioBufferRef::U32(_) | AudioBufferRef::S32(_) => SampleFormat::S32,
        AudioBufferRef::F32(_) => SampleFormat::F32,
        AudioBufferRef::F64(_) => SampleFormat::F64,
    }
}
