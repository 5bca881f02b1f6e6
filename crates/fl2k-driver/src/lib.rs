//! fl2k-driver: the transmitter side of the FL2K streaming engine.
//!
//! A transmitter pulls data: once started it invokes a [`TxCallback`] on its
//! own thread every time it needs the next buffer, and keeps doing so until it
//! is stopped. This crate defines that contract and ships two drivers:
//!
//! - [`sim::SimulatedDriver`], a software transmitter with fault injection and
//!   a capture of everything it "sent";
//! - `osmo::Fl2kDevice` (feature `osmo-fl2k`), a binding to libosmo-fl2k.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

mod buffers;
pub mod error;
#[cfg(feature = "osmo-fl2k")]
pub mod osmo;
pub mod sim;

pub use buffers::{BufferPtr, TxBuffers};
pub use error::{DriverError, describe_code};

/// Number of DAC channels on the widest device variant (red, green, blue).
pub const MAX_CHANNELS: usize = 3;

/// Bytes per channel per transfer on FL2K hardware.
pub const DEFAULT_BUFFER_LEN: usize = 1280 * 1024;

/// Channel buffer lengths must be a multiple of this many bytes.
pub const BUFFER_ALIGNMENT: usize = 512;

/// Unsigned DAC level sent while no sample data is available.
pub const IDLE_LEVEL: u8 = 0x80;

/// What the driver knows about the transfer that just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferInfo {
    /// Bytes per channel the driver wants for the next transfer.
    pub requested_len: usize,
    /// Hardware underruns since the previous callback.
    pub underflow_count: u32,
    /// The device reported an error on the last transfer.
    pub device_error: bool,
}

impl TransferInfo {
    pub fn has_fault(&self) -> bool {
        self.underflow_count != 0 || self.device_error
    }
}

/// Buffer source invoked by a running driver.
///
/// Calls are strictly serialized by the driver and happen on a thread the
/// driver owns. Implementations must not block.
pub trait TxCallback: Send + Sync + 'static {
    /// Returns the buffers to transmit next.
    ///
    /// The returned pointers must stay valid until the following call or until
    /// the run has ended, whichever comes first. A set shorter than
    /// `info.requested_len` is not transmitted; the driver sends mid-scale
    /// instead.
    fn on_transfer(&self, info: &TransferInfo) -> TxBuffers;
}

/// Requests the end of one transmit run.
///
/// Created together with its [`StopSignal`] by [`stop_pair`]. Dropping the
/// handle stops the run as well.
#[derive(Debug)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        // A full channel already carries the request.
        let _ = self.tx.try_send(());
    }
}

/// Driver side of a [`StopHandle`], scoped to a single `start_tx` call.
#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Blocks until the run is asked to stop.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// A fresh stop request pair for one run. A stop issued before the driver
/// picks up the signal still ends that run as soon as it starts.
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (StopHandle { tx }, StopSignal { rx })
}

pub trait TransmitDriver: Send + Sync + 'static {
    /// DAC channels on this device (1 or 3).
    fn channel_count(&self) -> usize;

    fn buffer_alignment(&self) -> usize {
        BUFFER_ALIGNMENT
    }

    fn default_buffer_len(&self) -> usize {
        DEFAULT_BUFFER_LEN
    }

    /// Exact bytes per channel every transfer consumes, for devices that
    /// cannot take a shorter buffer. `None` accepts any aligned length.
    fn required_buffer_len(&self) -> Option<usize> {
        None
    }

    /// Runs the transmission, blocking the calling thread until `stop` fires.
    ///
    /// `async_buffers` is the number of in-flight transfer buffers the driver
    /// may use; `0` selects the driver default.
    fn start_tx(
        &self,
        callback: Arc<dyn TxCallback>,
        async_buffers: u32,
        stop: StopSignal,
    ) -> Result<(), DriverError>;
}

impl<D: TransmitDriver> TransmitDriver for Arc<D> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn buffer_alignment(&self) -> usize {
        (**self).buffer_alignment()
    }

    fn default_buffer_len(&self) -> usize {
        (**self).default_buffer_len()
    }

    fn required_buffer_len(&self) -> Option<usize> {
        (**self).required_buffer_len()
    }

    fn start_tx(
        &self,
        callback: Arc<dyn TxCallback>,
        async_buffers: u32,
        stop: StopSignal,
    ) -> Result<(), DriverError> {
        (**self).start_tx(callback, async_buffers, stop)
    }
}
