//! Frame sources feeding the streaming decoder.
//!
//! A [`FrameSource`] is a send/receive style codec: packets are pushed in with
//! [`FrameSource::send_packet`] and decoded frames are pulled out with
//! [`FrameSource::receive_frame`]. Once the demuxer runs dry, `send_packet`
//! puts the source into flush mode and `receive_frame` eventually reports
//! [`Receive::Eof`].

use super::decoder::DecodeError;
use super::format::StreamFormat;

/// Outcome of pulling a frame from a [`FrameSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receive {
    /// A frame was written into the caller's [`DecodedFrame`].
    Frame,
    /// The codec needs another packet before it can produce output.
    NeedsInput,
    /// Input is exhausted and every delayed frame has been returned.
    Eof,
}

/// A block of decoded PCM in its native format.
///
/// Samples are stored interleaved as f32 regardless of the codec's sample
/// encoding; [`StreamFormat::sample_format`] still carries the native tag so
/// format changes are visible to the decoder.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    format: StreamFormat,
    samples: Vec<f32>,
    frames: usize,
}

impl DecodedFrame {
    pub fn new() -> Self {
        Self {
            format: StreamFormat::new(0, super::format::SampleFormat::F32, 0),
            samples: Vec::new(),
            frames: 0,
        }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Number of sample-frames held.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Interleaved samples, `frames() * channels` long.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.frames * self.format.channels as usize]
    }

    /// Replace the frame contents, reusing the existing allocation.
    pub fn fill(&mut self, format: StreamFormat, interleaved: &[f32]) {
        let channels = format.channels.max(1) as usize;
        self.format = format;
        self.frames = interleaved.len() / channels;
        self.samples.clear();
        self.samples.extend_from_slice(&interleaved[..self.frames * channels]);
    }
}

impl Default for DecodedFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull-based producer of decoded PCM frames.
pub trait FrameSource: Send {
    /// Try to produce the next decoded frame into `frame`.
    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> Result<Receive, DecodeError>;

    /// Demux the next packet and hand it to the codec.
    ///
    /// At end of input this switches the codec into flush mode instead of
    /// failing; the following `receive_frame` calls drain delayed frames and
    /// then report [`Receive::Eof`].
    fn send_packet(&mut self) -> Result<(), DecodeError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> Result<Receive, DecodeError> {
        (**self).receive_frame(frame)
    }

    fn send_packet(&mut self) -> Result<(), DecodeError> {
        (**self).send_packet()
    }
}

struct Segment {
    format: StreamFormat,
    samples: Vec<f32>,
}

/// In-memory PCM served as fixed-size frames.
///
/// Mostly useful for tests and synthetic signals. Several segments with
/// different formats can be chained to exercise mid-stream format changes.
pub struct BufferSource {
    segments: Vec<Segment>,
    frame_len: usize,
    segment: usize,
    position: usize,
    staged: Option<(usize, usize, usize)>,
    flushing: bool,
}

impl BufferSource {
    /// Serve `samples` (interleaved, in `format`) in frames of `frame_len`
    /// sample-frames.
    pub fn new(format: StreamFormat, samples: Vec<f32>, frame_len: usize) -> Self {
        let mut source = Self::empty(frame_len);
        source.push_segment(format, samples);
        source
    }

    /// A source with no audio; it reports end of stream after one flush.
    pub fn empty(frame_len: usize) -> Self {
        Self {
            segments: Vec::new(),
            frame_len: frame_len.max(1),
            segment: 0,
            position: 0,
            staged: None,
            flushing: false,
        }
    }

    /// Append a segment; frames from it follow every earlier segment.
    pub fn push_segment(&mut self, format: StreamFormat, samples: Vec<f32>) {
        self.segments.push(Segment { format, samples });
    }

    pub fn with_segment(mut self, format: StreamFormat, samples: Vec<f32>) -> Self {
        self.push_segment(format, samples);
        self
    }

    fn segment_frames(segment: &Segment) -> usize {
        segment.samples.len() / segment.format.channels.max(1) as usize
    }
}

impl FrameSource for BufferSource {
    fn receive_frame(&mut self, frame: &mut DecodedFrame) -> Result<Receive, DecodeError> {
        if let Some((segment, start, end)) = self.staged.take() {
            let seg = &self.segments[segment];
            let channels = seg.format.channels.max(1) as usize;
            frame.fill(seg.format, &seg.samples[start * channels..end * channels]);
            return Ok(Receive::Frame);
        }

        if self.flushing {
            Ok(Receive::Eof)
        } else {
            Ok(Receive::NeedsInput)
        }
    }

    fn send_packet(&mut self) -> Result<(), DecodeError> {
        while let Some(seg) = self.segments.get(self.segment) {
            let total = Self::segment_frames(seg);
            if self.position < total {
                let end = (self.position + self.frame_len).min(total);
                self.staged = Some((self.segment, self.position, end));
                self.position = end;
                return Ok(());
            }
            self.segment += 1;
            self.position = 0;
        }

        self.flushing = true;
        Ok(())
    }
}
