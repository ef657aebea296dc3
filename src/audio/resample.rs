//! Conversion of decoded frames into the playback format.
//!
//! Conversion runs in three stages: channel remix at the input rate, sample
//! rate conversion with a windowed sinc resampler (only when the rates
//! differ) and finally encoding into the output sample format. The sinc stage
//! consumes fixed-size blocks, so input is buffered until a full block is
//! available and the remainder is pushed through on [`Resampler::flush`].

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use super::decoder::DecodeError;
use super::format::{encode_samples, pcm_sample_size, StreamFormat};
use super::source::DecodedFrame;

/// Input frames handed to the sinc resampler per block.
const RATE_CHUNK: usize = 1024;

/// Upper bound on zero-input blocks pushed through while flushing.
const MAX_FLUSH_BLOCKS: usize = 8;

/// Check that `format` can be produced by [`Resampler`].
pub fn check_output_format(format: &StreamFormat) -> Result<(), DecodeError> {
    if format.channels == 0 || format.sample_rate == 0 || !format.sample_format.is_playable() {
        return Err(DecodeError::Unsupported(format!(
            "output format {:?} x{} @ {} Hz",
            format.sample_format, format.channels, format.sample_rate
        )));
    }
    Ok(())
}

/// Converts frames of one input format into interleaved output PCM.
pub struct Resampler {
    input: StreamFormat,
    output: StreamFormat,
    rate: Option<RateStage>,
    remixed: Vec<f32>,
    rendered: Vec<f32>,
    tail: Vec<f32>,
    tail_offset: usize,
    flushed: bool,
}

struct RateStage {
    sinc: SincFixedIn<f32>,
    ratio: f64,
    pending: Vec<Vec<f32>>,
    delay: usize,
    frames_in: u64,
    frames_out: u64,
}

impl RateStage {
    fn new(from: u32, to: u32, channels: usize) -> Result<Self, DecodeError> {
        let ratio = to as f64 / from as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let sinc = SincFixedIn::<f32>::new(ratio, 1.0, params, RATE_CHUNK, channels)?;
        let delay = sinc.output_delay();

        Ok(Self {
            sinc,
            ratio,
            pending: vec![Vec::with_capacity(RATE_CHUNK * 2); channels],
            delay,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn queued(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    fn push(&mut self, interleaved: &[f32]) {
        let channels = self.pending.len();
        for frame in interleaved.chunks_exact(channels) {
            for (lane, &sample) in self.pending.iter_mut().zip(frame) {
                lane.push(sample);
            }
        }
        self.frames_in += (interleaved.len() / channels) as u64;
    }

    fn process_ready(&mut self, out: &mut Vec<f32>) -> Result<(), DecodeError> {
        while self.queued() >= self.sinc.input_frames_next() {
            let needed = self.sinc.input_frames_next();
            let block: Vec<Vec<f32>> =
                self.pending.iter_mut().map(|lane| lane.drain(..needed).collect()).collect();
            let planar = self.sinc.process(block.as_slice(), None)?;
            self.emit(&planar, out, None);
        }
        Ok(())
    }

    /// Push the buffered remainder and the filter tail through the resampler.
    ///
    /// Total output is clamped to the exact converted length of everything
    /// that went in, so leading delay and trailing padding never reach the
    /// caller.
    fn finish(&mut self, out: &mut Vec<f32>) -> Result<(), DecodeError> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;

        if self.queued() > 0 {
            let planar = self.sinc.process_partial(Some(self.pending.as_slice()), None)?;
            self.pending.iter_mut().for_each(Vec::clear);
            self.emit(&planar, out, Some(expected));
        }

        let mut blocks = 0;
        while self.frames_out < expected && blocks < MAX_FLUSH_BLOCKS {
            let planar = self.sinc.process_partial(None::<&[Vec<f32>]>, None)?;
            self.emit(&planar, out, Some(expected));
            blocks += 1;
        }
        Ok(())
    }

    fn emit(&mut self, planar: &[Vec<f32>], out: &mut Vec<f32>, limit: Option<u64>) {
        let produced = planar.first().map_or(0, Vec::len);
        let skip = self.delay.min(produced);
        self.delay -= skip;

        let mut take = produced - skip;
        if let Some(limit) = limit {
            take = take.min(limit.saturating_sub(self.frames_out) as usize);
        }

        for i in skip..skip + take {
            out.extend(planar.iter().map(|lane| lane[i]));
        }
        self.frames_out += take as u64;
    }
}

impl Resampler {
    pub fn new(input: StreamFormat, output: StreamFormat) -> Result<Self, DecodeError> {
        check_output_format(&output)?;
        if input.channels == 0 || input.sample_rate == 0 {
            return Err(DecodeError::Unsupported(format!(
                "input stream with {} channels @ {} Hz",
                input.channels, input.sample_rate
            )));
        }

        let rate = if input.sample_rate != output.sample_rate {
            Some(RateStage::new(
                input.sample_rate,
                output.sample_rate,
                output.channels as usize,
            )?)
        } else {
            None
        };

        Ok(Self {
            input,
            output,
            rate,
            remixed: Vec::new(),
            rendered: Vec::new(),
            tail: Vec::new(),
            tail_offset: 0,
            flushed: false,
        })
    }

    /// Format this resampler was configured for.
    pub fn input_format(&self) -> &StreamFormat {
        &self.input
    }

    pub fn output_format(&self) -> &StreamFormat {
        &self.output
    }

    /// Upper bound on the sample-frames [`Resampler::convert`] can produce
    /// for an input of `in_frames`.
    pub fn max_output_frames(&self, in_frames: usize) -> usize {
        match &self.rate {
            None => in_frames,
            Some(stage) => {
                let blocks = (stage.queued() + in_frames) / stage.sinc.input_frames_next();
                blocks * stage.sinc.output_frames_max()
            }
        }
    }

    /// Convert `frame` and write the output PCM to `dst`.
    ///
    /// `dst` must hold at least `max_output_frames(frame.frames())` output
    /// sample-frames. Returns the number of sample-frames written.
    pub fn convert(&mut self, frame: &DecodedFrame, dst: &mut [u8]) -> Result<usize, DecodeError> {
        let stride = pcm_sample_size(&self.output);
        let need = self.max_output_frames(frame.frames()) * stride;
        if dst.len() < need {
            return Err(DecodeError::BufferTooSmall {
                need,
                have: dst.len(),
            });
        }

        let out_channels = self.output.channels as usize;
        remix(
            frame.samples(),
            frame.format().channels.max(1) as usize,
            out_channels,
            &mut self.remixed,
        );

        let samples = match self.rate.as_mut() {
            None => &self.remixed,
            Some(stage) => {
                stage.push(&self.remixed);
                self.rendered.clear();
                stage.process_ready(&mut self.rendered)?;
                &self.rendered
            }
        };

        encode_samples(samples, self.output.sample_format, dst);
        Ok(samples.len() / out_channels)
    }

    /// Drain buffered samples into `dst`.
    ///
    /// Call repeatedly after the last [`Resampler::convert`]; each call writes
    /// as many sample-frames as fit and returns how many were written. Zero
    /// means the resampler is fully drained.
    pub fn flush(&mut self, dst: &mut [u8]) -> Result<usize, DecodeError> {
        if !self.flushed {
            self.flushed = true;
            self.tail.clear();
            self.tail_offset = 0;
            if let Some(stage) = self.rate.as_mut() {
                stage.finish(&mut self.tail)?;
            }
        }

        let out_channels = self.output.channels as usize;
        let room = dst.len() / pcm_sample_size(&self.output);
        let remaining = (self.tail.len() - self.tail_offset) / out_channels;
        let frames = room.min(remaining);

        let end = self.tail_offset + frames * out_channels;
        encode_samples(&self.tail[self.tail_offset..end], self.output.sample_format, dst);
        self.tail_offset = end;
        Ok(frames)
    }
}

/// Map interleaved input channels onto `out_channels`.
///
/// Mono is duplicated to every output channel and anything folding down to
/// mono is averaged. Otherwise channels are copied by position: extra input
/// channels are dropped and missing ones are silent.
fn remix(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.reserve(input.len() / in_channels * out_channels);

    for frame in input.chunks_exact(in_channels) {
        if in_channels == out_channels {
            out.extend_from_slice(frame);
        } else if in_channels == 1 {
            out.extend(std::iter::repeat(frame[0]).take(out_channels));
        } else if out_channels == 1 {
            out.push(frame.iter().sum::<f32>() / in_channels as f32);
        } else {
            out.extend((0..out_channels).map(|c| frame.get(c).copied().unwrap_or(0.0)));
        }
    }
}
