//! PCM stream formats.
//!
//! A [`StreamFormat`] describes one interleaved PCM stream: how many channels,
//! which speaker positions they map to, how each sample is encoded and at
//! which rate. The decoder compares formats of consecutive decoded frames to
//! detect mid-stream changes, so equality is exact.

use serde::{Deserialize, Serialize};

/// Speaker position bits, same numbering as WAVE / Symphonia channel masks.
pub mod layout {
    pub const FRONT_LEFT: u64 = 0x1;
    pub const FRONT_RIGHT: u64 = 0x2;
    pub const FRONT_CENTER: u64 = 0x4;

    pub const MONO: u64 = FRONT_CENTER;
    pub const STEREO: u64 = FRONT_LEFT | FRONT_RIGHT;

    /// Default layout for a bare channel count.
    pub fn default_for(channels: u16) -> u64 {
        match channels {
            0 => 0,
            1 => MONO,
            2 => STEREO,
            n if n >= 64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    /// Number of channels described by a layout mask.
    pub fn channel_count(mask: u64) -> u16 {
        mask.count_ones() as u16
    }
}

/// Encoding of a single PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24 => 3,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    /// Whether PCM in this encoding can be produced by the resampler and
    /// handed to the playback device.
    pub fn is_playable(self) -> bool {
        matches!(
            self,
            SampleFormat::U8 | SampleFormat::S16 | SampleFormat::S32 | SampleFormat::F32
        )
    }
}

/// Format of an interleaved PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    pub channels: u16,
    pub channel_layout: u64,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
}

impl StreamFormat {
    /// 2 channel stereo, 32-bit float at 192 kHz.
    pub const STEREO_F32_192K: StreamFormat = StreamFormat {
        channels: 2,
        channel_layout: layout::STEREO,
        sample_format: SampleFormat::F32,
        sample_rate: 192_000,
    };

    pub fn new(channels: u16, sample_format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            channels,
            channel_layout: layout::default_for(channels),
            sample_format,
            sample_rate,
        }
    }

    /// Fill in whichever of channel count and layout is missing.
    ///
    /// Decoders sometimes report only one of the two; comparing formats
    /// without normalising would see a spurious format change.
    pub fn normalized(mut self) -> Self {
        if self.channels == 0 && self.channel_layout != 0 {
            self.channels = layout::channel_count(self.channel_layout);
        } else if self.channels != 0 && self.channel_layout == 0 {
            self.channel_layout = layout::default_for(self.channels);
        }
        self
    }

    /// Bytes per sample-frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        pcm_sample_size(self)
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::STEREO_F32_192K
    }
}

/// Size in bytes of one interleaved sample-frame of `format`.
pub fn pcm_sample_size(format: &StreamFormat) -> usize {
    format.channels as usize * format.sample_format.bytes()
}

/// Encode interleaved f32 samples into `dst` using a playable sample format.
///
/// `dst` must hold at least `samples.len() * format.bytes()` bytes.
pub(crate) fn encode_samples(samples: &[f32], format: SampleFormat, dst: &mut [u8]) {
    let width = format.bytes();
    for (sample, out) in samples.iter().zip(dst.chunks_exact_mut(width)) {
        let s = sample.clamp(-1.0, 1.0);
        match format {
            SampleFormat::U8 => out[0] = (s * 127.0 + 128.0).round() as u8,
            SampleFormat::S16 => out.copy_from_slice(&((s * i16::MAX as f32) as i16).to_ne_bytes()),
            SampleFormat::S32 => {
                out.copy_from_slice(&((s as f64 * i32::MAX as f64) as i32).to_ne_bytes())
            }
            SampleFormat::F32 => out.copy_from_slice(&sample.to_ne_bytes()),
            SampleFormat::S24 | SampleFormat::F64 => out.fill(0),
        }
    }
}

/// Decode one channel-averaged (mono) value per sample-frame from playable PCM.
pub(crate) fn decode_mono(bytes: &[u8], format: &StreamFormat, out: &mut Vec<f32>) {
    let width = format.sample_format.bytes();
    let channels = format.channels.max(1) as usize;
    let scale = 1.0 / channels as f32;

    for frame in bytes.chunks_exact(width * channels) {
        let sum: f32 = frame
            .chunks_exact(width)
            .map(|s| decode_sample(s, format.sample_format))
            .sum();
        out.push(sum * scale);
    }
}

fn decode_sample(bytes: &[u8], format: SampleFormat) -> f32 {
    match format {
        SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        SampleFormat::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32,
        SampleFormat::S32 => {
            (i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / i32::MAX as f64)
                as f32
        }
        SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleFormat::S24 | SampleFormat::F64 => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_sample_size() {
        assert_eq!(pcm_sample_size(&StreamFormat::STEREO_F32_192K), 8);
        assert_eq!(pcm_sample_size(&StreamFormat::new(1, SampleFormat::S16, 44100)), 2);
        assert_eq!(pcm_sample_size(&StreamFormat::new(6, SampleFormat::S32, 48000)), 24);
    }

    #[test]
    fn test_normalized_fills_missing_fields() {
        let from_count = StreamFormat {
            channels: 2,
            channel_layout: 0,
            sample_format: SampleFormat::F32,
            sample_rate: 48000,
        };
        assert_eq!(from_count.normalized().channel_layout, layout::STEREO);

        let from_layout = StreamFormat {
            channels: 0,
            channel_layout: layout::MONO,
            sample_format: SampleFormat::F32,
            sample_rate: 48000,
        };
        assert_eq!(from_layout.normalized().channels, 1);
    }

    #[test]
    fn test_format_equality_detects_rate_change() {
        let a = StreamFormat::new(2, SampleFormat::F32, 44100);
        let b = StreamFormat::new(2, SampleFormat::F32, 48000);
        assert_ne!(a, b);
        assert_eq!(a, StreamFormat::new(2, SampleFormat::F32, 44100));
    }

    #[test]
    fn test_encode_decode_mono_s16() {
        let format = StreamFormat::new(2, SampleFormat::S16, 48000);
        let samples = [0.5, -0.5, 1.0, 1.0];
        let mut bytes = vec![0u8; samples.len() * 2];
        encode_samples(&samples, SampleFormat::S16, &mut bytes);

        let mut mono = Vec::new();
        decode_mono(&bytes, &format, &mut mono);
        assert_eq!(mono.len(), 2);
        assert!(mono[0].abs() < 1e-3);
        assert!((mono[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let mut bytes = [0u8; 2];
        encode_samples(&[-3.0, 3.0], SampleFormat::U8, &mut bytes);
        assert_eq!(bytes, [1, 255]);
    }
}
