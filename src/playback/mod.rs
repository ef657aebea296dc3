//! Realtime audio playback.
//!
//! The decode thread pushes PCM into a lock-free byte queue; the device
//! callback pops it, pads underruns with silence and reports completion
//! once the queue has drained after end of stream.

pub mod queue;
pub mod sink;
pub mod stream;

pub use queue::{pcm_queue, PcmConsumer, PcmProducer};
pub use sink::{AudioSink, CallbackInfo, CallbackResult, PcmPlayback, StreamSignals};
pub use stream::{PlaybackError, PlaybackStream};
