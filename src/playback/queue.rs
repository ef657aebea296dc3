//! Lock-free PCM transfer queue.
//!
//! A single-producer single-consumer byte ring between the decode thread and
//! the realtime playback callback. Neither side blocks or allocates: pushes
//! and pops are partial and report how many bytes actually moved.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a PCM queue holding up to `capacity` bytes.
///
/// Returns `None` for a zero capacity.
pub fn pcm_queue(capacity: usize) -> Option<(PcmProducer, PcmConsumer)> {
    if capacity == 0 {
        return None;
    }
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    Some((PcmProducer { inner: producer }, PcmConsumer { inner: consumer }))
}

/// Writing half, owned by the decode thread.
pub struct PcmProducer {
    inner: HeapProd<u8>,
}

impl PcmProducer {
    /// Copy as many bytes of `bytes` as currently fit. Returns the count.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        self.inner.push_slice(bytes)
    }

    /// Free space in bytes.
    pub fn free(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

/// Reading half, owned by the playback callback.
pub struct PcmConsumer {
    inner: HeapCons<u8>,
}

impl PcmConsumer {
    /// Move up to `dst.len()` bytes out of the queue. Returns the count.
    pub fn pop(&mut self, dst: &mut [u8]) -> usize {
        self.inner.pop_slice(dst)
    }

    /// Bytes waiting to be read.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }
}
