//! Realtime playback callback and the flags shared with it.
//!
//! The callback runs on the audio device's thread. It must not block,
//! allocate or log: it only pops from the PCM queue, zero-fills whatever the
//! queue couldn't supply and updates a handful of atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::queue::PcmConsumer;

/// What the device should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    /// All audio has been delivered; the stream may be stopped.
    Complete,
}

/// Timing details passed to each callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackInfo {
    /// Delay between the callback and the first frame reaching the speaker.
    pub output_latency: Option<Duration>,
}

/// Something that fills device buffers from the realtime thread.
pub trait AudioSink: Send + 'static {
    /// Fill `output` with `frame_count` interleaved sample-frames.
    fn render(&mut self, output: &mut [u8], frame_count: usize, info: &CallbackInfo)
        -> CallbackResult;
}

/// Flags and counters shared by the decode thread, the playback callback and
/// the main thread.
///
/// Each field has a single writer:
/// - `end_of_stream`: decode thread, once every byte has been pushed
/// - `flushed`, `bytes_played`, `underruns`: playback callback
/// - `paused`, `shutdown`: main thread
#[derive(Debug, Default)]
pub struct StreamSignals {
    end_of_stream: AtomicBool,
    flushed: AtomicBool,
    paused: AtomicBool,
    shutdown: AtomicBool,
    bytes_played: AtomicU64,
    underruns: AtomicU64,
}

impl StreamSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark that no more PCM will be pushed.
    pub fn set_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// Record that the queue has been fully played. Returns true only for the
    /// call that actually flipped the flag.
    pub fn mark_flushed(&self) -> bool {
        self.flushed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn add_bytes_played(&self, bytes: u64) {
        self.bytes_played.fetch_add(bytes, Ordering::Release);
    }

    /// Bytes handed to the device so far.
    pub fn bytes_played(&self) -> u64 {
        self.bytes_played.load(Ordering::Acquire)
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Callbacks that ran short while the stream was still being fed.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Plays PCM popped from the transfer queue.
pub struct PcmPlayback {
    consumer: PcmConsumer,
    signals: Arc<StreamSignals>,
    frame_bytes: usize,
}

impl PcmPlayback {
    /// `frame_bytes` is the size of one interleaved sample-frame.
    pub fn new(consumer: PcmConsumer, signals: Arc<StreamSignals>, frame_bytes: usize) -> Self {
        Self {
            consumer,
            signals,
            frame_bytes: frame_bytes.max(1),
        }
    }

    pub fn signals(&self) -> &Arc<StreamSignals> {
        &self.signals
    }
}

impl AudioSink for PcmPlayback {
    fn render(
        &mut self,
        output: &mut [u8],
        frame_count: usize,
        _info: &CallbackInfo,
    ) -> CallbackResult {
        let wanted = (frame_count * self.frame_bytes).min(output.len());

        // Read the flag before popping: if it was already set, every byte the
        // producer will ever push is visible to this pop.
        let end_of_stream = self.signals.end_of_stream();

        let count = self.consumer.pop(&mut output[..wanted]);
        output[count..].fill(0);
        self.signals.add_bytes_played(count as u64);

        if count < wanted {
            if end_of_stream {
                self.signals.mark_flushed();
                return CallbackResult::Complete;
            }
            self.signals.record_underrun();
        }

        CallbackResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::queue::pcm_queue;

    #[test]
    fn test_shortfall_is_silence() {
        let (mut tx, rx) = pcm_queue(64).unwrap();
        let signals = StreamSignals::new();
        let mut sink = PcmPlayback::new(rx, signals.clone(), 4);

        tx.push(&[7u8; 6]);
        let mut out = [0xAAu8; 16];
        let result = sink.render(&mut out, 4, &CallbackInfo::default());

        assert_eq!(result, CallbackResult::Continue);
        assert_eq!(&out[..6], &[7; 6]);
        assert!(out[6..].iter().all(|&b| b == 0));
        assert_eq!(signals.bytes_played(), 6);
        assert_eq!(signals.underruns(), 1);
    }

    #[test]
    fn test_completes_only_after_drain() {
        let (mut tx, rx) = pcm_queue(64).unwrap();
        let signals = StreamSignals::new();
        let mut sink = PcmPlayback::new(rx, signals.clone(), 4);

        tx.push(&[1u8; 24]);
        signals.set_end_of_stream();

        let mut out = [0u8; 16];
        assert_eq!(sink.render(&mut out, 4, &CallbackInfo::default()), CallbackResult::Continue);
        assert!(!signals.is_flushed());

        assert_eq!(sink.render(&mut out, 4, &CallbackInfo::default()), CallbackResult::Complete);
        assert!(signals.is_flushed());
        assert_eq!(signals.bytes_played(), 24);
        assert_eq!(signals.underruns(), 0);
    }

    #[test]
    fn test_flushed_flag_flips_once() {
        let signals = StreamSignals::new();
        assert!(signals.mark_flushed());
        assert!(!signals.mark_flushed());
        assert!(signals.is_flushed());
    }
}
