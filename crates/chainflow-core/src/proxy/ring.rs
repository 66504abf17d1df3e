//! Single-producer single-consumer ring of sample buffers
//!
//! One side (the proxy I/O thread for read clients, the engine for write
//! clients) fills slots and advances the write counter; the other side
//! drains them and advances the read counter. Counters are monotonic and
//! only wrap through the modulo on slot lookup, so `write - read` is always
//! the number of filled slots.
//!
//! End of stream is recorded as the write count of the last published slot,
//! so the consumer learns about it exactly when it has drained that slot.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use crate::buffer::SampleBuffer;
use crate::endpoint::IoMode;

/// `end` value while the stream is still going
const OPEN: usize = usize::MAX;

pub struct ProxyRing {
    slots: Box<[UnsafeCell<SampleBuffer>]>,
    /// Slots filled so far (producer side)
    write: CachePadded<AtomicUsize>,
    /// Slots drained so far (consumer side)
    read: CachePadded<AtomicUsize>,
    /// Write count at end of stream, [`OPEN`] until then
    end: AtomicUsize,
    io_mode: IoMode,
}

// SAFETY: a slot is only touched by the side that currently owns it. The
// producer owns slot `write % N` while `free_space() > 0`, the consumer owns
// slot `read % N` while `used_space() > 0`. Ownership changes hands through
// the Release store on advance and the Acquire load in the space queries.
unsafe impl Sync for ProxyRing {}
unsafe impl Send for ProxyRing {}

impl ProxyRing {
    /// Allocate `count` buffers of `frames` x `channels` at `sample_rate`
    pub fn new(count: usize, frames: usize, channels: usize, sample_rate: u32, io_mode: IoMode) -> Self {
        let count = count.max(1);
        let slots = (0..count)
            .map(|_| UnsafeCell::new(SampleBuffer::new(frames, channels, sample_rate)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            write: CachePadded::new(AtomicUsize::new(0)),
            read: CachePadded::new(AtomicUsize::new(0)),
            end: AtomicUsize::new(OPEN),
            io_mode,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Direction of the proxied endpoint
    pub fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    /// Filled slots waiting for the consumer
    #[inline]
    pub fn used_space(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity())
    }

    /// Empty slots available to the producer
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.used_space()
    }

    /// The producer reached end of stream
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.end.load(Ordering::Acquire) != OPEN
    }

    /// End of stream and every slot before it consumed
    #[inline]
    pub fn is_drained(&self) -> bool {
        let end = self.end.load(Ordering::Acquire);
        end != OPEN && self.read.load(Ordering::Acquire) >= end
    }

    /// Mark end of stream at the current write count
    pub(crate) fn finish(&self) {
        let write = self.write.load(Ordering::Acquire);
        self.end.store(write, Ordering::Release);
    }

    /// Slot the producer fills next
    ///
    /// # Safety
    /// Only the producer side may call this, only while `free_space() > 0`,
    /// and the reference must be dropped before [`advance_write`](Self::advance_write).
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn producer_slot(&self) -> &mut SampleBuffer {
        let index = self.write.load(Ordering::Relaxed) % self.capacity();
        &mut *self.slots[index].get()
    }

    /// Slot the consumer drains next
    ///
    /// # Safety
    /// Only the consumer side may call this, only while `used_space() > 0`,
    /// and the reference must be dropped before [`advance_read`](Self::advance_read).
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn consumer_slot(&self) -> &mut SampleBuffer {
        let index = self.read.load(Ordering::Relaxed) % self.capacity();
        &mut *self.slots[index].get()
    }

    /// Publish the slot returned by [`producer_slot`](Self::producer_slot)
    #[inline]
    pub(crate) fn advance_write(&self) {
        debug_assert!(self.free_space() > 0, "advance_write on a full ring");
        self.write.fetch_add(1, Ordering::Release);
    }

    /// Publish the final slot of the stream
    ///
    /// The end mark is stored before the slot becomes visible, so a consumer
    /// that sees the slot also sees the mark.
    #[inline]
    pub(crate) fn advance_write_last(&self) {
        debug_assert!(self.free_space() > 0, "advance_write_last on a full ring");
        let write = self.write.load(Ordering::Relaxed) + 1;
        self.end.store(write, Ordering::Release);
        self.write.store(write, Ordering::Release);
    }

    /// Release the slot returned by [`consumer_slot`](Self::consumer_slot)
    #[inline]
    pub(crate) fn advance_read(&self) {
        debug_assert!(self.used_space() > 0, "advance_read on an empty ring");
        self.read.fetch_add(1, Ordering::Release);
    }

    /// Empty the ring and clear the finished flag
    ///
    /// Neither side may be inside a slot while this runs.
    pub(crate) fn reset(&self) {
        self.read.store(0, Ordering::Release);
        self.write.store(0, Ordering::Release);
        self.end.store(OPEN, Ordering::Release);
    }
}

impl std::fmt::Debug for ProxyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRing")
            .field("capacity", &self.capacity())
            .field("used", &self.used_space())
            .field("finished", &self.is_finished())
            .field("io_mode", &self.io_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn check_space(ring: &ProxyRing) {
        let (free, used) = (ring.free_space(), ring.used_space());
        assert!(free <= ring.capacity());
        assert!(used <= ring.capacity());
        assert_eq!(free + used, ring.capacity());
    }

    #[test]
    fn test_space_invariants_over_mixed_sequence() {
        let ring = ProxyRing::new(4, 8, 2, 44100, IoMode::Read);
        assert_eq!(ring.free_space(), 4);
        check_space(&ring);

        // deterministic pseudo-random walk of producer/consumer steps
        let mut state = 0x2545_f491_u32;
        for _ in 0..1000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if state & 1 == 0 {
                if ring.free_space() > 0 {
                    ring.advance_write();
                }
            } else if ring.used_space() > 0 {
                ring.advance_read();
            }
            check_space(&ring);
        }
    }

    #[test]
    fn test_full_and_empty() {
        let ring = ProxyRing::new(3, 4, 1, 44100, IoMode::Write);
        for _ in 0..3 {
            ring.advance_write();
        }
        assert_eq!(ring.free_space(), 0);
        assert_eq!(ring.used_space(), 3);
        for _ in 0..3 {
            ring.advance_read();
        }
        assert_eq!(ring.used_space(), 0);
        check_space(&ring);
    }

    #[test]
    fn test_reset_clears_pointers_and_finished() {
        let ring = ProxyRing::new(4, 4, 1, 44100, IoMode::Read);
        ring.advance_write();
        ring.advance_write();
        ring.finish();
        ring.reset();
        assert_eq!(ring.used_space(), 0);
        assert!(!ring.is_finished());
    }

    #[test]
    fn test_drained_only_after_last_slot() {
        let ring = ProxyRing::new(4, 4, 1, 44100, IoMode::Read);
        ring.advance_write();
        ring.advance_write_last();
        assert!(ring.is_finished());

        ring.advance_read();
        assert!(!ring.is_drained());
        ring.advance_read();
        assert!(ring.is_drained());
    }

    #[test]
    fn test_slots_carry_data_in_order() {
        let ring = Arc::new(ProxyRing::new(4, 1, 1, 44100, IoMode::Read));
        let producer = Arc::clone(&ring);
        let handle = thread::spawn(move || {
            let mut value = 0.0f32;
            while value < 200.0 {
                if producer.free_space() == 0 {
                    thread::yield_now();
                    continue;
                }
                let slot = unsafe { producer.producer_slot() };
                slot.channel_mut(0)[0] = value;
                producer.advance_write();
                value += 1.0;
            }
        });

        let mut expected = 0.0f32;
        while expected < 200.0 {
            if ring.used_space() == 0 {
                thread::yield_now();
                continue;
            }
            let slot = unsafe { ring.consumer_slot() };
            assert_eq!(slot.channel(0)[0], expected);
            ring.advance_read();
            expected += 1.0;
        }
        handle.join().unwrap();
    }
}
