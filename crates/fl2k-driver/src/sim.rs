//! Software transmitter.
//!
//! [`SimulatedDriver`] behaves like a device from the engine's point of view:
//! `start_tx` blocks, the callback runs on the transmitting thread, and every
//! returned buffer is copied into a bounded capture so tests can inspect what
//! went "on air". Transfers are either paced by a timer or stepped manually.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    BufferPtr, DriverError, IDLE_LEVEL, MAX_CHANNELS, StopSignal, TransferInfo, TransmitDriver,
    TxCallback,
};

const STEP_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One transfer per period, like a device draining at a fixed sample rate.
    Interval(Duration),
    /// Transfers happen only when [`SimulatedDriver::step`] is called.
    Manual,
}

#[derive(Debug, Clone)]
pub struct SimulatedDriverConfig {
    /// DAC channels exposed by the simulated device (1 or 3).
    pub channels: usize,
    /// Bytes per channel requested on every transfer.
    pub buffer_len: usize,
    pub pacing: Pacing,
    /// Transfers kept in the capture; older ones are dropped first. 0 disables capture.
    pub capture_limit: usize,
    /// Accept only `buffer_len` as the stream buffer length, like real FL2K
    /// hardware does.
    pub exact_len: bool,
}

impl Default for SimulatedDriverConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            buffer_len: crate::BUFFER_ALIGNMENT,
            pacing: Pacing::Manual,
            capture_limit: 64,
            exact_len: false,
        }
    }
}

/// Bytes handed to the simulated device for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTransfer {
    pub seq: u64,
    pub info: TransferInfo,
    /// One entry per device channel; `None` when the callback left it unset.
    pub channels: Vec<Option<Vec<u8>>>,
}

impl CapturedTransfer {
    pub fn channel(&self, channel: usize) -> Option<&[u8]> {
        self.channels.get(channel).and_then(|c| c.as_deref())
    }
}

enum SimCommand {
    Step(Sender<()>),
}

#[derive(Default)]
struct SimState {
    running: bool,
    start_failure: Option<DriverError>,
    pending_underflows: u32,
    pending_device_error: bool,
}

pub struct SimulatedDriver {
    config: SimulatedDriverConfig,
    state: Mutex<SimState>,
    cmd_tx: Sender<SimCommand>,
    cmd_rx: Receiver<SimCommand>,
    captured: Mutex<VecDeque<CapturedTransfer>>,
    transfers: AtomicU64,
    idle: Vec<u8>,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedDriverConfig) -> Arc<Self> {
        let channels = config.channels.clamp(1, MAX_CHANNELS);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let idle = vec![IDLE_LEVEL; config.buffer_len];
        Arc::new(Self {
            config: SimulatedDriverConfig { channels, ..config },
            state: Mutex::new(SimState::default()),
            cmd_tx,
            cmd_rx,
            captured: Mutex::new(VecDeque::new()),
            transfers: AtomicU64::new(0),
            idle,
        })
    }

    pub fn config(&self) -> &SimulatedDriverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Total callbacks issued since construction.
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Reports `count` hardware underruns with the next transfer.
    pub fn inject_underflow(&self, count: u32) {
        let mut state = self.state.lock();
        state.pending_underflows = state.pending_underflows.saturating_add(count);
    }

    /// Flags a device error on the next transfer.
    pub fn inject_device_error(&self) {
        self.state.lock().pending_device_error = true;
    }

    /// Makes the next `start_tx` fail with `error` before any transfer.
    pub fn inject_start_failure(&self, error: DriverError) {
        self.state.lock().start_failure = Some(error);
    }

    /// Performs exactly one transfer on the transmitting thread and waits for it.
    ///
    /// Works in either pacing mode. Fails with [`DriverError::NotFound`] when the
    /// run ends before the transfer happens.
    pub fn step(&self) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(SimCommand::Step(reply_tx))
            .map_err(|_| DriverError::NoDevice)?;
        reply_rx
            .recv_timeout(STEP_REPLY_TIMEOUT)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => DriverError::Timeout,
                RecvTimeoutError::Disconnected => DriverError::NotFound,
            })
    }

    /// Drains the capture, oldest transfer first.
    pub fn take_captured(&self) -> Vec<CapturedTransfer> {
        self.captured.lock().drain(..).collect()
    }

    fn transfer(&self, callback: &dyn TxCallback) {
        let info = {
            let mut state = self.state.lock();
            TransferInfo {
                requested_len: self.config.buffer_len,
                underflow_count: std::mem::take(&mut state.pending_underflows),
                device_error: std::mem::take(&mut state.pending_device_error),
            }
        };
        let buffers = callback.on_transfer(&info);
        let seq = self.transfers.fetch_add(1, Ordering::Relaxed);
        if !buffers.covers(info.requested_len) {
            warn!(
                seq,
                requested = info.requested_len,
                supplied = buffers.len(),
                "short simulated transfer, sending idle"
            );
        }

        if self.config.capture_limit == 0 {
            return;
        }
        let Some(idle) = BufferPtr::from_slice(&self.idle) else {
            return;
        };
        let len = info.requested_len;
        let channels = buffers.resolve(len, idle)[..self.config.channels]
            .iter()
            // Safety: either the callback just returned these buffers and they
            // stay valid until the next callback, which only this thread
            // issues, or the pointer is our own idle buffer of `len` bytes.
            .map(|ptr| {
                ptr.map(|p| unsafe { std::slice::from_raw_parts(p.as_ptr(), len) }.to_vec())
            })
            .collect();
        let mut captured = self.captured.lock();
        captured.push_back(CapturedTransfer {
            seq,
            info,
            channels,
        });
        while captured.len() > self.config.capture_limit {
            captured.pop_front();
        }
    }
}

impl TransmitDriver for SimulatedDriver {
    fn channel_count(&self) -> usize {
        self.config.channels
    }

    fn default_buffer_len(&self) -> usize {
        self.config.buffer_len
    }

    fn required_buffer_len(&self) -> Option<usize> {
        self.config.exact_len.then_some(self.config.buffer_len)
    }

    fn start_tx(
        &self,
        callback: Arc<dyn TxCallback>,
        async_buffers: u32,
        stop: StopSignal,
    ) -> Result<(), DriverError> {
        {
            let mut state = self.state.lock();
            if state.running {
                return Err(DriverError::Busy);
            }
            if let Some(error) = state.start_failure.take() {
                warn!(%error, "simulated transmit failed to start");
                return Err(error);
            }
            state.running = true;
        }
        debug!(
            channels = self.config.channels,
            buffer_len = self.config.buffer_len,
            async_buffers,
            pacing = ?self.config.pacing,
            "simulated transmit started"
        );

        loop {
            let tick = match self.config.pacing {
                Pacing::Interval(period) => crossbeam_channel::after(period),
                Pacing::Manual => crossbeam_channel::never(),
            };
            crossbeam_channel::select! {
                recv(stop.receiver()) -> _ => break,
                recv(self.cmd_rx) -> command => match command {
                    Ok(SimCommand::Step(reply_tx)) => {
                        self.transfer(callback.as_ref());
                        let _ = reply_tx.send(());
                    },
                    Err(_) => break,
                },
                recv(tick) -> _ => self.transfer(callback.as_ref()),
            }
        }

        self.state.lock().running = false;
        debug!(transfers = self.transfers(), "simulated transmit stopped");
        Ok(())
    }
}
