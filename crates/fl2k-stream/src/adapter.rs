//! Driver callback bridging transfers to the exchange ring.

use std::sync::Arc;

use fl2k_driver::{BufferPtr, TransferInfo, TxBuffers, TxCallback};
use tracing::{debug, trace, warn};

use crate::convert::MID_SCALE;
use crate::exchange::{ExchangeCoordinator, FaultKind, SlotHandle};

/// Entry point registered with the driver for one active stream.
///
/// Always hands the driver a complete buffer set. When the ring is empty or
/// the driver reported a fault, every channel gets the adapter's idle buffer,
/// which holds mid-scale (silence).
///
/// A transfer longer than a slot cannot be served from the ring at all. It is
/// counted as an underflow and answered with the short idle set, which drivers
/// replace with their own idle data instead of reading past it.
pub struct HardwareCallbackAdapter {
    exchange: Arc<ExchangeCoordinator>,
    selection: Vec<usize>,
    driver_channels: usize,
    idle: Box<[u8]>,
}

impl HardwareCallbackAdapter {
    /// `selection[i]` is the driver channel fed by stream channel `i`.
    pub fn new(
        exchange: Arc<ExchangeCoordinator>,
        selection: Vec<usize>,
        driver_channels: usize,
    ) -> Self {
        let len = exchange.store().channel_len();
        Self {
            exchange,
            selection,
            driver_channels,
            idle: vec![MID_SCALE; len].into_boxed_slice(),
        }
    }

    fn idle_buffers(&self) -> TxBuffers {
        let mut buffers = TxBuffers::new(self.idle.len());
        if let Some(idle) = BufferPtr::from_slice(&self.idle) {
            for channel in 0..self.driver_channels {
                buffers.set_channel(channel, idle);
            }
        }
        buffers
    }

    fn slot_buffers(&self, handle: SlotHandle) -> TxBuffers {
        let store = self.exchange.store();
        let mut buffers = self.idle_buffers();
        for (stream_channel, &driver_channel) in self.selection.iter().enumerate() {
            let ptr = store.channel_ptr(handle.index(), stream_channel);
            buffers.set_channel(driver_channel, BufferPtr::new(ptr));
        }
        buffers
    }
}

impl TxCallback for HardwareCallbackAdapter {
    fn on_transfer(&self, info: &TransferInfo) -> TxBuffers {
        if info.has_fault() {
            debug!(
                underflow_count = info.underflow_count,
                device_error = info.device_error,
                "driver reported a transfer fault"
            );
            self.exchange.skip_transfer();
            self.exchange.signal_fault(FaultKind::Underflow);
            return self.idle_buffers();
        }
        if info.requested_len > self.idle.len() {
            warn!(
                requested = info.requested_len,
                slot_len = self.idle.len(),
                "driver transfer is longer than a slot"
            );
            self.exchange.skip_transfer();
            self.exchange.signal_fault(FaultKind::Underflow);
            return self.idle_buffers();
        }
        if info.requested_len < self.idle.len() {
            trace!(
                requested = info.requested_len,
                slot_len = self.idle.len(),
                "driver reads a prefix of each slot"
            );
        }

        match self.exchange.take_filled() {
            Some(slot) => {
                trace!(index = slot.handle.index(), tick = slot.tick, "slot to driver");
                self.slot_buffers(slot.handle)
            },
            None => self.idle_buffers(),
        }
    }
}
