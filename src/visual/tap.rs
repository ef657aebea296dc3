//! Second tap on the decoded stream for the visualisation.
//!
//! The decode thread folds each chunk it pushes to playback down to mono and
//! writes it here; the render thread drains it once per frame. Like the PCM
//! queue this is a lock-free SPSC ring, so neither side waits on the other.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::audio::format::decode_mono;
use crate::audio::StreamFormat;

/// Gap records buffered between the two sides.
const GAP_CAPACITY: usize = 64;

/// Samples the writer had to drop, placed after the first `at` pushed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gap {
    at: u64,
    len: u64,
}

/// Create a tap holding up to `capacity` mono samples of `format` PCM.
pub fn visual_tap(capacity: usize, format: StreamFormat) -> Option<(TapWriter, TapReader)> {
    if capacity == 0 {
        return None;
    }
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    let (gap_producer, gap_consumer) = HeapRb::<Gap>::new(GAP_CAPACITY).split();
    Some((
        TapWriter {
            producer,
            gaps: gap_producer,
            pending: None,
            format,
            scratch: Vec::new(),
            pushed: 0,
            dropped: 0,
        },
        TapReader {
            consumer,
            gaps: gap_consumer,
            popped: 0,
            skipped: 0,
        },
    ))
}

/// Decode-thread side.
pub struct TapWriter {
    producer: HeapProd<f32>,
    gaps: HeapProd<Gap>,
    pending: Option<Gap>,
    format: StreamFormat,
    scratch: Vec<f32>,
    pushed: u64,
    dropped: u64,
}

impl TapWriter {
    /// Fold interleaved PCM in the tap's format to mono and push it.
    ///
    /// Samples that don't fit are dropped and the reader is told where, so
    /// its timeline stays aligned with the decoded stream. Returns the
    /// number pushed.
    pub fn push_pcm(&mut self, bytes: &[u8]) -> usize {
        self.scratch.clear();
        decode_mono(bytes, &self.format, &mut self.scratch);

        if let Some(gap) = self.pending {
            if self.gaps.try_push(gap).is_ok() {
                self.pending = None;
            }
        }
        // Nothing may follow a gap the reader can't see yet
        let pushed = match self.pending {
            None => self.producer.push_slice(&self.scratch),
            Some(_) => 0,
        };
        self.pushed += pushed as u64;

        let lost = (self.scratch.len() - pushed) as u64;
        if lost > 0 {
            self.dropped += lost;
            let gap = match self.pending.take() {
                Some(gap) => Gap {
                    len: gap.len + lost,
                    ..gap
                },
                None => Gap {
                    at: self.pushed,
                    len: lost,
                },
            };
            if let Err(gap) = self.gaps.try_push(gap) {
                self.pending = Some(gap);
            }
        }
        pushed
    }

    /// Samples lost because the reader fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Render-thread side.
pub struct TapReader {
    consumer: HeapCons<f32>,
    gaps: HeapCons<Gap>,
    popped: u64,
    skipped: u64,
}

impl TapReader {
    /// Stream position of the next sample to pop, counting dropped ones.
    pub fn position(&mut self) -> u64 {
        while let Some(gap) = self.gaps.try_peek().copied() {
            if gap.at > self.popped {
                break;
            }
            self.skipped += gap.len;
            self.gaps.try_pop();
        }
        self.popped + self.skipped
    }

    /// Pop up to `dst.len()` contiguous samples starting at [`position`].
    /// Stops short of the next gap. Returns the count.
    ///
    /// [`position`]: TapReader::position
    pub fn pop(&mut self, dst: &mut [f32]) -> usize {
        // Read the fill level before the gaps: any sample counted here that
        // follows a gap was pushed after that gap's record.
        let ready = self.consumer.occupied_len();
        let mut limit = dst.len().min(ready);
        if let Some(gap) = self.gaps.try_peek() {
            limit = limit.min((gap.at - self.popped) as usize);
        }
        let n = self.consumer.pop_slice(&mut dst[..limit]);
        self.popped += n as u64;
        n
    }

    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn test_tap_folds_to_mono() {
        let format = StreamFormat::new(2, SampleFormat::F32, 48000);
        let (mut writer, mut reader) = visual_tap(16, format).unwrap();

        let pcm: Vec<u8> = [0.5f32, 0.25, -1.0, 0.0]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        assert_eq!(writer.push_pcm(&pcm), 2);

        let mut out = [0.0f32; 4];
        assert_eq!(reader.pop(&mut out), 2);
        assert_eq!(&out[..2], &[0.375, -0.5]);
    }

    #[test]
    fn test_tap_counts_dropped() {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let (mut writer, reader) = visual_tap(2, format).unwrap();
        let pcm: Vec<u8> = [0.1f32; 5].iter().flat_map(|s| s.to_ne_bytes()).collect();

        assert_eq!(writer.push_pcm(&pcm), 2);
        assert_eq!(writer.dropped(), 3);
        assert_eq!(reader.available(), 2);
    }

    #[test]
    fn test_reader_position_skips_dropped_samples() {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let (mut writer, mut reader) = visual_tap(4, format).unwrap();
        let ramp = |range: std::ops::Range<u32>| -> Vec<u8> {
            range.flat_map(|i| (i as f32).to_ne_bytes()).collect()
        };

        assert_eq!(writer.push_pcm(&ramp(0..6)), 4);
        assert_eq!(reader.position(), 0);

        let mut out = [0.0f32; 8];
        assert_eq!(reader.pop(&mut out), 4);
        assert_eq!(&out[..4], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(reader.position(), 6);

        assert_eq!(writer.push_pcm(&ramp(6..9)), 3);
        assert_eq!(reader.pop(&mut out), 3);
        assert_eq!(&out[..3], &[6.0, 7.0, 8.0]);
        assert_eq!(reader.position(), 9);
    }

    #[test]
    fn test_pop_stops_at_gap() {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let (mut writer, mut reader) = visual_tap(4, format).unwrap();
        let ones: Vec<u8> = [1.0f32; 6].iter().flat_map(|s| s.to_ne_bytes()).collect();
        let twos: Vec<u8> = [2.0f32; 2].iter().flat_map(|s| s.to_ne_bytes()).collect();

        writer.push_pcm(&ones);
        let mut out = [0.0f32; 2];
        assert_eq!(reader.pop(&mut out), 2);
        // Two slots free again; these land after the four dropped ones
        assert_eq!(writer.push_pcm(&twos), 2);

        let mut rest = [0.0f32; 8];
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.pop(&mut rest), 2);
        assert_eq!(&rest[..2], &[1.0, 1.0]);
        assert_eq!(reader.pop(&mut rest), 0);
        assert_eq!(reader.position(), 6);
        assert_eq!(reader.pop(&mut rest), 2);
        assert_eq!(&rest[..2], &[2.0, 2.0]);
        assert_eq!(reader.position(), 8);
    }
}
