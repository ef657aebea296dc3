//! Turns the decoded-audio tap into texture rows paced by playback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::tap::TapReader;
use super::RowFeed;
use crate::audio::SpectrumAnalyzer;
use crate::playback::StreamSignals;

/// What one texture row shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMode {
    /// Absolute sample values of the most recent window.
    #[default]
    Waveform,
    /// Magnitude spectrum in decibels, mapped to 0..1.
    Spectrum,
}

/// Lowest level shown in spectrum mode.
const DB_FLOOR: f32 = -80.0;

/// Produces at most one row per call, following the playback clock.
///
/// Samples are kept in a circular history so the window handed to a row
/// always ends at the frame the speaker is currently playing, even though
/// the decode thread runs ahead of playback.
pub struct VisualizationFeeder {
    reader: TapReader,
    signals: Arc<StreamSignals>,
    frame_bytes: u64,
    mode: RowMode,
    hop: u64,
    history: Vec<f32>,
    written: u64,
    last_emit: u64,
    window: Vec<f32>,
    row: Vec<f32>,
    analyzer: Option<SpectrumAnalyzer>,
}

impl VisualizationFeeder {
    /// * `columns` - Row width; spectrum mode needs a power of two
    /// * `hop` - Played frames between consecutive rows
    /// * `lead` - Frames the decoder may run ahead of playback
    /// * `frame_bytes` - Size of one output sample-frame, to read the clock
    pub fn new(
        reader: TapReader,
        signals: Arc<StreamSignals>,
        mode: RowMode,
        columns: usize,
        hop: u64,
        lead: usize,
        frame_bytes: usize,
    ) -> Option<Self> {
        let columns = columns.max(1);
        let (window_len, analyzer) = match mode {
            RowMode::Waveform => (columns, None),
            RowMode::Spectrum => {
                let analyzer = SpectrumAnalyzer::new(columns * 2)?;
                (analyzer.fft_size(), Some(analyzer))
            }
        };

        Some(Self {
            reader,
            signals,
            frame_bytes: frame_bytes.max(1) as u64,
            mode,
            hop: hop.max(1),
            history: vec![0.0; lead + window_len + hop as usize],
            written: 0,
            last_emit: 0,
            window: vec![0.0; window_len],
            row: vec![0.0; columns],
            analyzer,
        })
    }

    pub fn mode(&self) -> RowMode {
        self.mode
    }

    pub fn columns(&self) -> usize {
        self.row.len()
    }

    /// Sample-frames the device has played so far.
    pub fn played_frames(&self) -> u64 {
        self.signals.bytes_played() / self.frame_bytes
    }

    fn drain_tap(&mut self) {
        let cap = self.history.len() as u64;
        loop {
            let position = self.reader.position();
            if position > self.written {
                // Samples the tap dropped read as silence
                for pos in self.written.max(position.saturating_sub(cap))..position {
                    self.history[(pos % cap) as usize] = 0.0;
                }
                self.written = position;
            }
            let start = (self.written % cap) as usize;
            let n = self.reader.pop(&mut self.history[start..]);
            self.written += n as u64;
            if n == 0 && self.reader.position() == self.written {
                break;
            }
        }
    }

    /// Copy the `window.len()` samples ending at frame `end` into `window`.
    fn fill_window(&mut self, end: u64) {
        let cap = self.history.len() as u64;
        let len = self.window.len() as u64;
        for (i, slot) in self.window.iter_mut().enumerate() {
            let pos = (end + i as u64).checked_sub(len);
            *slot = match pos {
                Some(pos) if self.written - pos <= cap => self.history[(pos % cap) as usize],
                _ => 0.0,
            };
        }
    }

    fn shape_row(&mut self) {
        match self.analyzer.as_mut() {
            None => {
                for (dst, s) in self.row.iter_mut().zip(&self.window) {
                    *dst = s.abs().min(1.0);
                }
            }
            Some(analyzer) => {
                analyzer.analyze_into(&self.window, &mut self.row);
                for v in self.row.iter_mut() {
                    let db = 20.0 * v.max(1e-10).log10();
                    *v = ((db - DB_FLOOR) / -DB_FLOOR).clamp(0.0, 1.0);
                }
            }
        }
    }
}

impl RowFeed for VisualizationFeeder {
    fn next_row(&mut self) -> Option<&[f32]> {
        self.drain_tap();

        let end = self.played_frames().min(self.written);
        if end < self.last_emit + self.hop {
            return None;
        }

        self.fill_window(end);
        self.shape_row();
        self.last_emit = end;
        Some(&self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SampleFormat, StreamFormat};
    use crate::visual::tap::{visual_tap, TapWriter};

    const FRAME_BYTES: usize = 4;

    fn setup(
        mode: RowMode,
        columns: usize,
        hop: u64,
    ) -> (TapWriter, Arc<StreamSignals>, VisualizationFeeder) {
        setup_with_tap(mode, columns, hop, 4096)
    }

    fn setup_with_tap(
        mode: RowMode,
        columns: usize,
        hop: u64,
        tap: usize,
    ) -> (TapWriter, Arc<StreamSignals>, VisualizationFeeder) {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let (writer, reader) = visual_tap(tap, format).unwrap();
        let signals = StreamSignals::new();
        let feeder = VisualizationFeeder::new(
            reader,
            signals.clone(),
            mode,
            columns,
            hop,
            4096,
            FRAME_BYTES,
        )
        .unwrap();
        (writer, signals, feeder)
    }

    fn pcm(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_waits_for_playback_clock() {
        let (mut writer, signals, mut feeder) = setup(RowMode::Waveform, 8, 16);
        writer.push_pcm(&pcm(&[0.5; 64]));

        assert!(feeder.next_row().is_none());

        signals.add_bytes_played(16 * FRAME_BYTES as u64);
        assert_eq!(feeder.next_row().unwrap(), &[0.5; 8]);

        // Same clock, nothing new
        assert!(feeder.next_row().is_none());
    }

    #[test]
    fn test_window_ends_at_played_frame() {
        let (mut writer, signals, mut feeder) = setup(RowMode::Waveform, 4, 1);
        let ramp: Vec<f32> = (0..32).map(|i| -(i as f32) / 100.0).collect();
        writer.push_pcm(&pcm(&ramp));

        signals.add_bytes_played(10 * FRAME_BYTES as u64);
        let row = feeder.next_row().unwrap().to_vec();
        assert_eq!(row, vec![0.06, 0.07, 0.08, 0.09]);
    }

    #[test]
    fn test_overflowed_tap_stays_on_playback_timeline() {
        let (mut writer, signals, mut feeder) = setup_with_tap(RowMode::Waveform, 4, 1, 8);
        let ramp = |range: std::ops::Range<u32>| -> Vec<f32> {
            range.map(|i| i as f32 / 100.0).collect()
        };

        // Render stalled: frames 8..16 don't fit and are dropped
        assert_eq!(writer.push_pcm(&pcm(&ramp(0..16))), 8);
        assert!(feeder.next_row().is_none());
        assert_eq!(writer.push_pcm(&pcm(&ramp(16..24))), 8);

        signals.add_bytes_played(16 * FRAME_BYTES as u64);
        assert_eq!(feeder.next_row().unwrap(), &[0.0; 4]);

        signals.add_bytes_played(4 * FRAME_BYTES as u64);
        assert_eq!(feeder.next_row().unwrap(), &[0.16, 0.17, 0.18, 0.19]);
    }

    #[test]
    fn test_clock_ahead_of_tap_is_clamped() {
        let (mut writer, signals, mut feeder) = setup(RowMode::Waveform, 4, 2);
        writer.push_pcm(&pcm(&[0.25; 3]));
        signals.add_bytes_played(100 * FRAME_BYTES as u64);

        let row = feeder.next_row().unwrap().to_vec();
        assert_eq!(row, vec![0.0, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_spectrum_rows_normalised() {
        let (mut writer, signals, mut feeder) = setup(RowMode::Spectrum, 64, 128);
        let tone = crate::audio::synth::generate_sine(3000.0, 48000, 0.01, 0.8);
        writer.push_pcm(&pcm(&tone));
        signals.add_bytes_played(tone.len() as u64 * FRAME_BYTES as u64);

        let row = feeder.next_row().unwrap();
        assert_eq!(row.len(), 64);
        assert!(row.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(row.iter().any(|&v| v > 0.5));
    }

    #[test]
    fn test_spectrum_needs_power_of_two() {
        let format = StreamFormat::new(1, SampleFormat::F32, 48000);
        let (_, reader) = visual_tap(16, format).unwrap();
        let feeder =
            VisualizationFeeder::new(reader, StreamSignals::new(), RowMode::Spectrum, 100, 1, 0, 4);
        assert!(feeder.is_none());
    }
}
