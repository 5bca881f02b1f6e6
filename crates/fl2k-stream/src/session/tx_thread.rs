use std::sync::Arc;
use std::thread::JoinHandle;

use fl2k_driver::{DriverError, StopHandle, TransmitDriver, TxCallback, stop_pair};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::exchange::{ExchangeCoordinator, FaultKind};
use crate::infra::realtime::RealtimeGuard;

const TX_THREAD_NAME: &str = "fl2k-tx-async";

/// Helper thread parked inside the driver's blocking `start_tx`.
///
/// Each spawn owns a fresh stop request, so a stop left over from an earlier
/// run can never end the next one.
pub(crate) struct TxThread {
    stop: StopHandle,
    join: Option<JoinHandle<Result<(), DriverError>>>,
}

impl TxThread {
    pub(crate) fn spawn(
        driver: Arc<dyn TransmitDriver>,
        callback: Arc<dyn TxCallback>,
        exchange: Arc<ExchangeCoordinator>,
        async_buffers: u32,
        realtime_class: Option<&'static str>,
    ) -> Result<Self, StreamError> {
        let (stop, signal) = stop_pair();
        let join = std::thread::Builder::new()
            .name(TX_THREAD_NAME.to_string())
            .spawn(move || {
                let realtime = RealtimeGuard::enter(realtime_class);
                debug!(async_buffers, realtime = realtime.is_active(), "transmit thread running");
                let result = driver.start_tx(callback, async_buffers, signal);
                match &result {
                    Ok(()) => debug!("transmit thread finished"),
                    Err(error) => {
                        warn!(%error, code = error.as_str(), "driver transmit failed");
                        // nothing will drain the ring anymore; wake the writer
                        exchange.signal_fault(FaultKind::Underflow);
                    },
                }
                result
            })
            .map_err(|source| StreamError::SpawnTxThread { source })?;
        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    /// `true` once the driver returned on its own, before any stop.
    pub(crate) fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the driver and waits for the helper to return.
    pub(crate) fn stop(mut self) -> Result<(), StreamError> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<(), StreamError> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        self.stop.stop();
        match join.join() {
            Ok(result) => result.map_err(StreamError::from),
            Err(_) => Err(StreamError::TxThreadPanicked),
        }
    }
}

impl Drop for TxThread {
    fn drop(&mut self) {
        if let Err(error) = self.stop_and_join() {
            warn!(%error, "transmit thread ended with an error during drop");
        }
    }
}
