//! End-to-end test of decode -> queue -> playback callback -> visual rows,
//! with the device callback driven by hand.

use std::time::{Duration, Instant};

use phobz_live::audio::synth::generate_sine;
use phobz_live::audio::{BufferSource, Decoder, SampleFormat, StreamFormat};
use phobz_live::playback::{
    pcm_queue, AudioSink, CallbackInfo, CallbackResult, PcmPlayback, StreamSignals,
};
use phobz_live::pipeline::run_feeder;
use phobz_live::visual::{visual_tap, RowFeed, RowMode, VisualizationFeeder};

const FRAMES_PER_BUFFER: usize = 256;

#[test]
fn test_stream_plays_to_completion_exactly_once() {
    let input = StreamFormat::new(1, SampleFormat::F32, 48000);
    let output = StreamFormat::STEREO_F32_192K;
    let frame_bytes = output.frame_bytes();

    let source = BufferSource::new(input, generate_sine(440.0, 48000, 1.0, 0.5), 1024);
    let mut decoder = Decoder::new(source, output).unwrap();

    let queue_bytes = 64 * 1024;
    let (mut producer, consumer) = pcm_queue(queue_bytes).unwrap();
    let (mut tap, reader) = visual_tap(200_000, output).unwrap();
    let signals = StreamSignals::new();

    let feeder_signals = signals.clone();
    let worker = std::thread::spawn(move || {
        run_feeder(&mut decoder, &mut producer, &mut tap, &feeder_signals, 1024)
    });

    let mut sink = PcmPlayback::new(consumer, signals.clone(), frame_bytes);
    let mut rows = VisualizationFeeder::new(
        reader,
        signals.clone(),
        RowMode::Waveform,
        256,
        3200,
        queue_bytes / frame_bytes + 1024,
        frame_bytes,
    )
    .unwrap();

    let mut buffer = vec![0u8; FRAMES_PER_BUFFER * frame_bytes];
    let mut completions = 0;
    let mut emitted = 0;
    let deadline = Instant::now() + Duration::from_secs(30);

    while completions == 0 {
        assert!(Instant::now() < deadline, "playback never completed");
        let result = sink.render(&mut buffer, FRAMES_PER_BUFFER, &CallbackInfo::default());
        if result == CallbackResult::Complete {
            completions += 1;
        }
        if let Some(row) = rows.next_row() {
            assert_eq!(row.len(), 256);
            assert!(row.iter().all(|&v| (0.0..=0.55).contains(&v)));
            emitted += 1;
        }
    }

    let frames = worker.join().unwrap().unwrap();
    assert_eq!(frames, 192_000);
    assert_eq!(signals.bytes_played(), 192_000 * frame_bytes as u64);
    assert!(signals.is_flushed());
    assert!(emitted > 0 && emitted <= 192_000 / 3200);

    // Already flushed: a stray late callback must not flip the flag again
    assert!(!signals.mark_flushed());
}
