use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::convert::MID_SCALE;

/// Identifies a slot owned by one side of the exchange.
///
/// The epoch ties the handle to one generation of the ring; every reset or
/// fault drain starts a new generation and turns older handles stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    epoch: u64,
}

impl SlotHandle {
    pub(crate) fn new(index: usize, epoch: u64) -> Self {
        Self { index, epoch }
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn epoch(self) -> u64 {
        self.epoch
    }
}

struct Slot {
    tick: AtomicU64,
    channels: Box<[Box<[UnsafeCell<u8>]>]>,
}

/// Fixed set of equally sized slots, each with one payload per channel.
///
/// Payload bytes are not guarded by a lock. Access is only sound for the side
/// currently holding the slot's handle, which the exchange protocol enforces.
pub struct SlotStore {
    slots: Box<[Slot]>,
    channels: usize,
    channel_len: usize,
}

// Safety: payload access is partitioned by slot ownership; a slot is touched by
// at most one thread between its acquire and the following hand-over.
unsafe impl Sync for SlotStore {}

impl SlotStore {
    /// Allocates `capacity` slots of `channels` payloads, `channel_len` bytes
    /// each, pre-filled with mid-scale.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, channels: usize, channel_len: usize) -> Self {
        assert!(capacity > 0, "slot store needs at least one slot");
        let slots = (0..capacity)
            .map(|_| Slot {
                tick: AtomicU64::new(0),
                channels: (0..channels)
                    .map(|_| (0..channel_len).map(|_| UnsafeCell::new(MID_SCALE)).collect())
                    .collect(),
            })
            .collect();
        Self {
            slots,
            channels,
            channel_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bytes per channel payload.
    pub fn channel_len(&self) -> usize {
        self.channel_len
    }

    pub fn tick(&self, index: usize) -> u64 {
        self.slots[index].tick.load(Ordering::Acquire)
    }

    pub(crate) fn set_tick(&self, index: usize, tick: u64) {
        self.slots[index].tick.store(tick, Ordering::Release);
    }

    /// Stable address of one channel payload.
    pub fn channel_ptr(&self, index: usize, channel: usize) -> NonNull<u8> {
        let payload = &self.slots[index].channels[channel];
        // `UnsafeCell<u8>` has the layout of `u8`.
        NonNull::from(&payload[..]).cast::<u8>()
    }

    /// Mutable view of one channel payload.
    ///
    /// # Safety
    ///
    /// The caller must hold the handle of slot `index` and must not create a
    /// second view of the same payload while this one is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn channel_mut(&self, index: usize, channel: usize) -> &mut [u8] {
        let ptr = self.channel_ptr(index, channel);
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.channel_len) }
    }

    /// Shared view of one channel payload.
    ///
    /// # Safety
    ///
    /// The caller must hold the handle of slot `index`, or otherwise know that
    /// no side is writing it.
    pub unsafe fn channel(&self, index: usize, channel: usize) -> &[u8] {
        let ptr = self.channel_ptr(index, channel);
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.channel_len) }
    }
}
