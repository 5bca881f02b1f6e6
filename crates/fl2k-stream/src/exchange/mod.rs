//! Slot hand-over between the writer and the transmitting driver.
//!
//! The ring is laid out circularly as
//!
//! ```text
//!   head           head+count              tail
//!    | filled ... | writer outstanding ... | free ... | driver-held |
//! ```
//!
//! where the driver-held slot (if any) sits just before `head`. `count` is the
//! number of filled slots awaiting the driver. A writer slot leaves the free
//! pool at [`ExchangeCoordinator::acquire`] and only returns to it when the
//! driver comes back for its next buffer.
//!
//! All ring bookkeeping lives behind one mutex/condvar pair. Payload bytes are
//! never touched under the lock; whoever holds a slot's handle owns its bytes.

mod slots;
mod stats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::StreamError;

pub use slots::{SlotHandle, SlotStore};
pub use stats::ExchangeStats;

use self::stats::ExchangeMetrics;

/// Asynchronous stream fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultKind {
    /// The driver needed a buffer and none was filled.
    Underflow,
    /// The writer outpaced the driver.
    Overflow,
}

impl FaultKind {
    /// One-letter marker printed by classic SDR drivers.
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Underflow => "U",
            Self::Overflow => "O",
        }
    }
}

impl From<FaultKind> for StreamError {
    fn from(kind: FaultKind) -> Self {
        match kind {
            FaultKind::Underflow => StreamError::Underflow,
            FaultKind::Overflow => StreamError::Overflow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeEvent {
    Clear,
    ResetRequested,
    FaultPending(FaultKind),
}

/// Slot handed to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSlot {
    pub handle: SlotHandle,
    /// Driver tick stamped on this slot when it was last transmitted.
    pub tick: u64,
}

/// Slot handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSlot {
    pub handle: SlotHandle,
    /// Driver tick at which this slot starts transmitting.
    pub tick: u64,
}

/// Ring occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub capacity: usize,
    /// Filled slots awaiting the driver.
    pub filled: usize,
    /// Slots currently held by the writer.
    pub writing: usize,
    /// Whether the driver holds a slot.
    pub transmitting: bool,
}

impl Occupancy {
    pub fn free(&self) -> usize {
        self.capacity - self.filled - self.writing - usize::from(self.transmitting)
    }
}

struct RingState {
    head: usize,
    tail: usize,
    count: usize,
    writer_outstanding: usize,
    driver_holding: Option<usize>,
    epoch: u64,
    event: ExchangeEvent,
    /// Reported once by the next writer acquire.
    writer_fault: Option<FaultKind>,
    /// Reported once by `poll_fault`.
    status_fault: Option<FaultKind>,
    /// The driver received a slot since the last drain.
    primed: bool,
}

impl RingState {
    fn new() -> Self {
        Self {
            head: 0,
            tail: 0,
            count: 0,
            writer_outstanding: 0,
            driver_holding: None,
            epoch: 0,
            event: ExchangeEvent::Clear,
            writer_fault: None,
            status_fault: None,
            primed: false,
        }
    }

    fn free(&self, capacity: usize) -> usize {
        capacity - self.count - self.writer_outstanding - usize::from(self.driver_holding.is_some())
    }

    /// Returns filled and writer-held slots to the free pool.
    fn drain(&mut self) -> usize {
        let discarded = self.count + self.writer_outstanding;
        self.tail = self.head;
        self.count = 0;
        self.writer_outstanding = 0;
        self.epoch += 1;
        self.primed = false;
        discarded
    }
}

/// Bounded writer/driver hand-over over a [`SlotStore`].
pub struct ExchangeCoordinator {
    store: SlotStore,
    elements_per_slot: u64,
    state: Mutex<RingState>,
    changed: Condvar,
    ticks: AtomicU64,
    metrics: ExchangeMetrics,
}

impl ExchangeCoordinator {
    /// `elements_per_slot` advances the driver tick counter per transfer.
    pub fn new(store: SlotStore, elements_per_slot: usize) -> Self {
        Self {
            store,
            elements_per_slot: elements_per_slot as u64,
            state: Mutex::new(RingState::new()),
            changed: Condvar::new(),
            ticks: AtomicU64::new(0),
            metrics: ExchangeMetrics::default(),
        }
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Hands the next free slot to the writer, waiting up to `timeout`.
    ///
    /// A zero timeout still makes one attempt. A pending reset or fault is
    /// settled first; after a fault this returns the fault once instead of a
    /// slot.
    pub fn acquire(&self, timeout: Duration) -> Result<WriterSlot, StreamError> {
        let deadline = Instant::now().checked_add(timeout);
        let capacity = self.capacity();
        let mut state = self.state.lock();
        loop {
            self.settle(&mut state);
            if let Some(kind) = state.writer_fault.take() {
                return Err(kind.into());
            }
            if state.free(capacity) > 0 {
                let index = state.tail;
                state.tail = (state.tail + 1) % capacity;
                state.writer_outstanding += 1;
                return Ok(WriterSlot {
                    handle: SlotHandle::new(index, state.epoch),
                    tick: self.store.tick(index),
                });
            }
            let Some(deadline) = deadline else {
                self.changed.wait(&mut state);
                continue;
            };
            if Instant::now() >= deadline {
                return Err(StreamError::Timeout);
            }
            self.changed.wait_until(&mut state, deadline);
        }
    }

    /// Publishes a writer slot to the driver.
    ///
    /// Slots must be released in acquisition order. A handle from before the
    /// last drain is ignored.
    pub fn release(&self, handle: SlotHandle) -> Result<(), StreamError> {
        let capacity = self.capacity();
        let mut state = self.state.lock();
        if handle.epoch() != state.epoch {
            debug!(
                index = handle.index(),
                epoch = handle.epoch(),
                current = state.epoch,
                "ignoring release of a drained slot"
            );
            return Ok(());
        }
        let oldest = (state.tail + capacity - state.writer_outstanding) % capacity;
        if state.writer_outstanding == 0 || handle.index() != oldest {
            return Err(StreamError::InvalidHandle {
                index: handle.index(),
            });
        }
        state.writer_outstanding -= 1;
        state.count += 1;
        self.metrics.note_released();
        self.changed.notify_all();
        Ok(())
    }

    /// Driver side: frees the slot handed out last time and returns the oldest
    /// filled slot, if any. Never blocks.
    ///
    /// Running dry after at least one delivery raises an underflow fault.
    pub fn take_filled(&self) -> Option<DriverSlot> {
        let capacity = self.capacity();
        let mut state = self.state.lock();
        self.settle(&mut state);
        state.driver_holding = None;
        if state.count == 0 {
            if state.primed {
                state.primed = false;
                self.raise_fault(&mut state, FaultKind::Underflow);
            }
            self.ticks
                .fetch_add(self.elements_per_slot, Ordering::Relaxed);
            self.changed.notify_all();
            return None;
        }

        let index = state.head;
        state.head = (state.head + 1) % capacity;
        state.count -= 1;
        state.driver_holding = Some(index);
        state.primed = true;
        let tick = self
            .ticks
            .fetch_add(self.elements_per_slot, Ordering::Relaxed);
        self.store.set_tick(index, tick);
        self.metrics.note_delivered();
        self.changed.notify_all();
        Some(DriverSlot {
            handle: SlotHandle::new(index, state.epoch),
            tick,
        })
    }

    /// Driver side: gives back the slot handed out last time without taking
    /// a new one. The skipped transfer still advances the tick counter.
    pub fn skip_transfer(&self) {
        let mut state = self.state.lock();
        if state.driver_holding.take().is_some() {
            self.changed.notify_all();
        }
        drop(state);
        self.ticks
            .fetch_add(self.elements_per_slot, Ordering::Relaxed);
    }

    /// Asks the next acquire on either side to discard everything in flight
    /// and clear any pending fault.
    pub fn request_reset(&self) {
        let mut state = self.state.lock();
        state.event = ExchangeEvent::ResetRequested;
        debug!(epoch = state.epoch, "stream reset requested");
        self.changed.notify_all();
    }

    /// Raises a fault. The next acquire on either side drains the ring, the
    /// writer's next acquire reports it, and [`poll_fault`] reports it once.
    ///
    /// [`poll_fault`]: ExchangeCoordinator::poll_fault
    pub fn signal_fault(&self, kind: FaultKind) {
        let mut state = self.state.lock();
        self.raise_fault(&mut state, kind);
    }

    /// Returns and clears the fault latched for status polling.
    pub fn poll_fault(&self) -> Option<FaultKind> {
        self.state.lock().status_fault.take()
    }

    /// `true` while a reset or fault waits to be settled.
    pub fn has_pending_event(&self) -> bool {
        self.state.lock().event != ExchangeEvent::Clear
    }

    /// `false` once a drain has made `handle` stale.
    pub fn is_current(&self, handle: SlotHandle) -> bool {
        self.state.lock().epoch == handle.epoch()
    }

    /// `true` while `handle` is one of the writer's outstanding slots.
    pub fn is_writer_slot(&self, handle: SlotHandle) -> bool {
        let capacity = self.capacity();
        let state = self.state.lock();
        if state.epoch != handle.epoch() || handle.index() >= capacity {
            return false;
        }
        let age = (state.tail + capacity - handle.index() - 1) % capacity;
        age < state.writer_outstanding
    }

    /// Empties the ring and clears every flag immediately. Only valid while no
    /// driver is transmitting.
    pub fn reset_now(&self) {
        let mut state = self.state.lock();
        let epoch = state.epoch + 1;
        *state = RingState::new();
        state.epoch = epoch;
        self.changed.notify_all();
    }

    pub fn occupancy(&self) -> Occupancy {
        let state = self.state.lock();
        Occupancy {
            capacity: self.capacity(),
            filled: state.count,
            writing: state.writer_outstanding,
            transmitting: state.driver_holding.is_some(),
        }
    }

    pub fn stats(&self) -> ExchangeStats {
        self.metrics.snapshot()
    }

    /// Elements handed to the driver so far, idle transfers included.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Relaxed);
    }

    fn raise_fault(&self, state: &mut RingState, kind: FaultKind) {
        state.event = ExchangeEvent::FaultPending(kind);
        state.writer_fault = Some(kind);
        state.status_fault = Some(kind);
        self.metrics.note_fault(kind);
        trace!(glyph = kind.glyph(), "stream fault");
        debug!(?kind, filled = state.count, "stream fault raised");
        self.changed.notify_all();
    }

    fn settle(&self, state: &mut RingState) {
        match state.event {
            ExchangeEvent::Clear => return,
            ExchangeEvent::ResetRequested => {
                let discarded = state.drain();
                state.writer_fault = None;
                state.status_fault = None;
                self.metrics.note_drain(discarded, true);
                debug!(discarded, epoch = state.epoch, "reset drained ring");
            },
            ExchangeEvent::FaultPending(kind) => {
                let discarded = state.drain();
                self.metrics.note_drain(discarded, false);
                debug!(?kind, discarded, epoch = state.epoch, "fault drained ring");
            },
        }
        state.event = ExchangeEvent::Clear;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(capacity: usize) -> ExchangeCoordinator {
        ExchangeCoordinator::new(SlotStore::new(capacity, 1, 4), 4)
    }

    #[test]
    fn slots_reach_the_driver_in_release_order() {
        let exchange = coordinator(3);
        let a = exchange.acquire(Duration::ZERO).expect("a");
        let b = exchange.acquire(Duration::ZERO).expect("b");
        exchange.release(a.handle).expect("release a");
        exchange.release(b.handle).expect("release b");

        assert_eq!(exchange.take_filled().map(|s| s.handle), Some(a.handle));
        assert_eq!(exchange.take_filled().map(|s| s.handle), Some(b.handle));
        assert_eq!(exchange.stats().delivered, 2);
    }

    #[test]
    fn writer_cannot_hold_more_than_capacity() {
        let exchange = coordinator(4);
        for _ in 0..4 {
            exchange.acquire(Duration::ZERO).expect("slot");
        }
        let start = Instant::now();
        assert!(matches!(
            exchange.acquire(Duration::ZERO),
            Err(StreamError::Timeout)
        ));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(exchange.occupancy().writing, 4);
    }

    #[test]
    fn undrained_ring_stops_after_capacity_cycles() {
        let exchange = coordinator(4);
        let mut queued: Vec<SlotHandle> = Vec::new();
        for _ in 0..4 {
            let slot = exchange.acquire(Duration::ZERO).expect("slot");
            assert!(!queued.contains(&slot.handle));
            exchange.release(slot.handle).expect("release");
            queued.push(slot.handle);
            assert!((1..=4).contains(&exchange.occupancy().filled));
        }

        let start = Instant::now();
        assert!(matches!(
            exchange.acquire(Duration::ZERO),
            Err(StreamError::Timeout)
        ));
        assert!(start.elapsed() < Duration::from_millis(5));
        assert_eq!(exchange.occupancy().filled, 4);
        let indices: Vec<_> = queued.iter().map(|h| h.index()).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn out_of_order_release_is_rejected() {
        let exchange = coordinator(3);
        let _a = exchange.acquire(Duration::ZERO).expect("a");
        let b = exchange.acquire(Duration::ZERO).expect("b");
        assert!(matches!(
            exchange.release(b.handle),
            Err(StreamError::InvalidHandle { index: 1 })
        ));
        assert_eq!(exchange.occupancy().filled, 0);
    }

    #[test]
    fn double_release_is_rejected() {
        let exchange = coordinator(2);
        let a = exchange.acquire(Duration::ZERO).expect("a");
        assert!(exchange.is_writer_slot(a.handle));
        exchange.release(a.handle).expect("first release");
        assert!(!exchange.is_writer_slot(a.handle));
        assert!(exchange.release(a.handle).is_err());
        assert_eq!(exchange.occupancy().filled, 1);
    }

    #[test]
    fn driver_slot_stays_reserved_until_the_next_take() {
        let exchange = coordinator(2);
        let a = exchange.acquire(Duration::ZERO).expect("a");
        exchange.release(a.handle).expect("release");
        let sent = exchange.take_filled().expect("driver slot");

        let b = exchange.acquire(Duration::ZERO).expect("b");
        assert_ne!(b.handle.index(), sent.handle.index());
        assert!(matches!(
            exchange.acquire(Duration::ZERO),
            Err(StreamError::Timeout)
        ));

        exchange.skip_transfer();
        let c = exchange.acquire(Duration::ZERO).expect("c");
        assert_eq!(c.handle.index(), sent.handle.index());
    }

    #[test]
    fn ticks_advance_per_transfer_and_stamp_delivered_slots() {
        let exchange = coordinator(2);
        assert!(exchange.take_filled().is_none());
        assert_eq!(exchange.ticks(), 4);

        let a = exchange.acquire(Duration::ZERO).expect("a");
        exchange.release(a.handle).expect("release");
        let sent = exchange.take_filled().expect("sent");
        assert_eq!(sent.tick, 4);
        assert_eq!(exchange.store().tick(sent.handle.index()), 4);
        assert_eq!(exchange.ticks(), 8);

        exchange.set_ticks(100);
        exchange.skip_transfer();
        assert_eq!(exchange.ticks(), 104);
    }

    #[test]
    fn idle_start_is_not_an_underflow() {
        let exchange = coordinator(2);
        for _ in 0..3 {
            assert!(exchange.take_filled().is_none());
        }
        assert_eq!(exchange.poll_fault(), None);
        assert_eq!(exchange.stats().underflows, 0);
    }

    #[test]
    fn one_starvation_episode_raises_one_fault() {
        let exchange = coordinator(2);
        let a = exchange.acquire(Duration::ZERO).expect("a");
        exchange.release(a.handle).expect("release");
        assert!(exchange.take_filled().is_some());
        assert!(exchange.take_filled().is_none());
        assert!(exchange.take_filled().is_none());

        assert_eq!(exchange.stats().underflows, 1);
        assert_eq!(exchange.poll_fault(), Some(FaultKind::Underflow));
        assert_eq!(exchange.poll_fault(), None);
    }

    #[test]
    fn writer_sees_a_fault_once_and_then_resumes() {
        let exchange = coordinator(2);
        exchange.signal_fault(FaultKind::Overflow);
        assert!(matches!(
            exchange.acquire(Duration::ZERO),
            Err(StreamError::Overflow)
        ));
        assert!(exchange.acquire(Duration::ZERO).is_ok());
        assert_eq!(exchange.stats().overflows, 1);
    }

    #[test]
    fn reset_clears_pending_fault_notices() {
        let exchange = coordinator(2);
        exchange.signal_fault(FaultKind::Underflow);
        exchange.request_reset();
        assert!(exchange.has_pending_event());
        assert!(exchange.acquire(Duration::ZERO).is_ok());
        assert!(!exchange.has_pending_event());
        assert_eq!(exchange.poll_fault(), None);
    }

    #[test]
    fn reset_now_invalidates_outstanding_handles() {
        let exchange = coordinator(2);
        let a = exchange.acquire(Duration::ZERO).expect("a");
        exchange.reset_now();
        assert!(!exchange.is_current(a.handle));
        assert!(!exchange.is_writer_slot(a.handle));
        exchange.release(a.handle).expect("stale release is ignored");
        let occupancy = exchange.occupancy();
        assert_eq!((occupancy.filled, occupancy.writing), (0, 0));
        assert_eq!(occupancy.free(), 2);
    }
}
