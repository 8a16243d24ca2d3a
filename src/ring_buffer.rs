//! Fixed-capacity SPSC sample queue (C1).
//!
//! One producer thread writes, one consumer thread reads. Both `write`/`read`
//! are non-blocking: a short write signals an overrun, a short read signals an
//! underrun, and both are always reported as a return count rather than lost
//! silently (I4). No allocation happens once the buffer has been constructed;
//! capacity is fixed for the life of the buffer.
//!
//! Grounded on the teacher's use of `ringbuf::HeapRb` for the capture/return-audio
//! rings in `input/stream.rs` and `output_new/stream.rs`: this module wraps the
//! same crate rather than hand-rolling index arithmetic, while giving the jitter
//! buffer/pipeline the byte- and sample-oriented contract the spec names.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// SPSC ring buffer over `T`. Construct once; `Split` into the producer half
/// (used by the capture/receive side) and the consumer half (used by the
/// playback/send side).
pub struct RingBuffer<T: Copy + Default + Send + 'static> {
    producer: HeapProd<T>,
    consumer: HeapCons<T>,
    capacity: usize,
}

impl<T: Copy + Default + Send + 'static> RingBuffer<T> {
    /// Allocates a buffer holding exactly `capacity` elements of `T`.
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<T>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        Self {
            producer,
            consumer,
            capacity: capacity.max(1),
        }
    }

    /// Writes as many of `data` as fit; returns the number actually written.
    /// A short write is an overrun — the caller increments its own drop counter.
    pub fn write(&mut self, data: &[T]) -> usize {
        self.producer.push_slice(data)
    }

    /// Reads into `buf`, returning the number of elements actually read.
    /// A short read is an underrun — the caller is responsible for padding.
    pub fn read(&mut self, buf: &mut [T]) -> usize {
        self.consumer.pop_slice(buf)
    }

    /// Elements currently available to `read`.
    pub fn available_read(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Free slots currently available to `write`.
    pub fn available_write(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Total capacity in elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all buffered elements without reading them.
    pub fn reset(&mut self) {
        while self.consumer.try_pop().is_some() {}
    }
}

/// Byte-oriented ring buffer, the literal form named in §4.1.
pub type ByteRingBuffer = RingBuffer<u8>;

/// Typed helpers for the two sample formats the pipeline moves around.
pub type I16RingBuffer = RingBuffer<i16>;
pub type F32RingBuffer = RingBuffer<f32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let mut rb = I16RingBuffer::new(16);
        let written = rb.write(&[1, 2, 3, 4]);
        assert_eq!(written, 4);
        let mut out = [0i16; 4];
        let read = rb.read(&mut out);
        assert_eq!(read, 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn short_write_reports_overrun() {
        let mut rb = I16RingBuffer::new(4);
        let data = [1i16, 2, 3, 4, 5, 6];
        let written = rb.write(&data);
        assert_eq!(written, 4, "capacity-bounded write must short-count, never block or panic");
    }

    #[test]
    fn short_read_reports_underrun() {
        let mut rb = I16RingBuffer::new(8);
        rb.write(&[1, 2]);
        let mut out = [0i16; 5];
        let read = rb.read(&mut out);
        assert_eq!(read, 2);
    }

    #[test]
    fn reset_drops_buffered_samples() {
        let mut rb = I16RingBuffer::new(8);
        rb.write(&[1, 2, 3]);
        rb.reset();
        assert_eq!(rb.available_read(), 0);
    }

    #[test]
    fn available_counts_track_capacity() {
        let mut rb = I16RingBuffer::new(8);
        assert_eq!(rb.available_write(), 8);
        rb.write(&[1, 2, 3]);
        assert_eq!(rb.available_read(), 3);
        assert_eq!(rb.available_write(), 5);
    }
}
