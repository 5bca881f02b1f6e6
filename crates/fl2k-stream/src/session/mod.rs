//! Transmit stream lifecycle.
//!
//! A [`StreamSession`] moves through `Idle -> Configured -> Active`.
//! Deactivation returns to `Configured`, closing returns to `Idle` and frees
//! the slot ring. While active, one helper thread sits inside the driver's
//! blocking `start_tx`; deactivation stops the driver and joins it. Should the
//! driver give up on its own, the helper raises an underflow and later writes
//! fail with [`StreamError::TransmitterStopped`] until the stream is
//! deactivated.

mod tx_thread;
mod write;

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fl2k_driver::TransmitDriver;
use tracing::{debug, info};

use crate::adapter::HardwareCallbackAdapter;
use crate::config::{ArgInfo, Direction, DriverLimits, SessionTuning, StreamArgs, StreamConfig};
use crate::convert::FormatConverter;
use crate::error::StreamError;
use crate::exchange::{
    ExchangeCoordinator, ExchangeStats, FaultKind, Occupancy, SlotHandle, SlotStore,
};
use crate::format::SampleFormat;

pub use write::{WriteBuffer, WriteOutcome};

use self::tx_thread::TxThread;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Configured,
    Active,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Active => "active",
        }
    }
}

/// Writer slot being filled across several `write` calls.
#[derive(Debug, Clone, Copy)]
struct PartialSlot {
    handle: SlotHandle,
    filled: usize,
}

struct Stream {
    config: StreamConfig,
    converter: FormatConverter,
    exchange: Arc<ExchangeCoordinator>,
    partial: Option<PartialSlot>,
}

enum SessionState {
    Idle,
    Configured(Stream),
    Active { stream: Stream, tx: TxThread },
}

impl SessionState {
    fn kind(&self) -> StreamState {
        match self {
            Self::Idle => StreamState::Idle,
            Self::Configured(_) => StreamState::Configured,
            Self::Active { .. } => StreamState::Active,
        }
    }
}

pub struct StreamSession {
    driver: Arc<dyn TransmitDriver>,
    tuning: SessionTuning,
    state: SessionState,
}

impl StreamSession {
    pub fn new(driver: Arc<dyn TransmitDriver>) -> Self {
        Self::with_tuning(driver, SessionTuning::default())
    }

    pub fn with_tuning(driver: Arc<dyn TransmitDriver>, tuning: SessionTuning) -> Self {
        Self {
            driver,
            tuning,
            state: SessionState::Idle,
        }
    }

    pub fn driver(&self) -> &Arc<dyn TransmitDriver> {
        &self.driver
    }

    pub fn state(&self) -> StreamState {
        self.state.kind()
    }

    pub fn config(&self) -> Option<&StreamConfig> {
        self.stream().map(|stream| &stream.config)
    }

    /// Formats `setup_stream` accepts.
    pub fn stream_formats() -> &'static [SampleFormat] {
        &SampleFormat::ALL
    }

    /// Format written without conversion, with its full-scale value.
    pub fn native_stream_format() -> (SampleFormat, f64) {
        (SampleFormat::NATIVE, SampleFormat::NATIVE_FULL_SCALE)
    }

    pub fn stream_args_info(&self) -> Vec<ArgInfo> {
        StreamArgs::arg_info(self.driver.as_ref())
    }

    /// Validates the request and allocates the slot ring, replacing any
    /// previous configuration.
    pub fn setup_stream(
        &mut self,
        direction: Direction,
        format: SampleFormat,
        selection: &[usize],
        args: &StreamArgs,
    ) -> Result<(), StreamError> {
        if let SessionState::Active { .. } = self.state {
            return Err(self.invalid_state("set up"));
        }
        let limits = DriverLimits::of(self.driver.as_ref());
        let config = StreamConfig::new(direction, format, selection, args, limits)?;
        info!(%format, swap = config.swap(), "using stream format");
        debug!(
            buffer_len = config.buffer_len(),
            buffers = config.buffer_count(),
            channels = ?config.selection(),
            async_buffers = config.async_buffers(),
            "allocating stream buffers"
        );

        let store = SlotStore::new(
            config.buffer_count(),
            config.channel_count(),
            config.buffer_len(),
        );
        let exchange = Arc::new(ExchangeCoordinator::new(store, config.elements_per_buffer()));
        let converter = FormatConverter::new(format, config.swap());
        self.state = SessionState::Configured(Stream {
            config,
            converter,
            exchange,
            partial: None,
        });
        Ok(())
    }

    /// Deactivates if needed and frees the slot ring.
    pub fn close_stream(&mut self) -> Result<(), StreamError> {
        let result = if matches!(self.state, SessionState::Active { .. }) {
            self.deactivate_stream(0, 0)
        } else {
            Ok(())
        };
        if !matches!(self.state, SessionState::Idle) {
            debug!("stream closed");
        }
        self.state = SessionState::Idle;
        result
    }

    /// Empties the ring and starts the driver. No flags are supported;
    /// `time_ns` and `num_elems` are accepted and ignored.
    pub fn activate_stream(
        &mut self,
        flags: i32,
        _time_ns: i64,
        _num_elems: usize,
    ) -> Result<(), StreamError> {
        if flags != 0 {
            return Err(StreamError::NotSupported {
                what: "activate flags",
            });
        }
        let mut stream = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Configured(stream) => stream,
            other => {
                self.state = other;
                return Err(self.invalid_state("activate"));
            },
        };

        stream.exchange.reset_now();
        stream.partial = None;
        let adapter = Arc::new(HardwareCallbackAdapter::new(
            Arc::clone(&stream.exchange),
            stream.config.selection().to_vec(),
            self.driver.channel_count(),
        ));
        match TxThread::spawn(
            Arc::clone(&self.driver),
            adapter,
            Arc::clone(&stream.exchange),
            stream.config.async_buffers(),
            self.tuning.realtime_class,
        ) {
            Ok(tx) => {
                debug!(buffers = stream.config.buffer_count(), "stream activated");
                self.state = SessionState::Active { stream, tx };
                Ok(())
            },
            Err(error) => {
                self.state = SessionState::Configured(stream);
                Err(error)
            },
        }
    }

    /// Stops the driver, joins the helper thread and invalidates every
    /// outstanding slot handle. A configured but inactive stream is left as is.
    pub fn deactivate_stream(&mut self, flags: i32, _time_ns: i64) -> Result<(), StreamError> {
        if flags != 0 {
            return Err(StreamError::NotSupported {
                what: "deactivate flags",
            });
        }
        let (mut stream, tx) = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Active { stream, tx } => (stream, tx),
            SessionState::Configured(stream) => {
                self.state = SessionState::Configured(stream);
                return Ok(());
            },
            SessionState::Idle => return Err(self.invalid_state("deactivate")),
        };

        let result = tx.stop();
        stream.partial = None;
        stream.exchange.reset_now();
        debug!(stats = ?stream.exchange.stats(), "stream deactivated");
        self.state = SessionState::Configured(stream);
        result
    }

    /// Elements per slot, the most a single `write` can accept.
    pub fn stream_mtu(&self) -> Result<usize, StreamError> {
        Ok(self.require_stream("query the MTU")?.config.elements_per_buffer())
    }

    /// Waits up to `timeout` for an asynchronous fault.
    ///
    /// Returns the fault as `Err(Underflow)`/`Err(Overflow)`, or
    /// `Err(Timeout)` when none was reported in time. Once pending faults are
    /// read, a transmitter that quit reports `Err(TransmitterStopped)`.
    pub fn read_stream_status(&self, timeout: Duration) -> Result<(), StreamError> {
        let exchange = &self.require_stream("read the stream status")?.exchange;
        let tx = match &self.state {
            SessionState::Active { tx, .. } => Some(tx),
            _ => None,
        };
        let start = Instant::now();
        loop {
            if let Some(kind) = exchange.poll_fault() {
                return Err(kind.into());
            }
            if tx.is_some_and(TxThread::is_finished) {
                return Err(StreamError::TransmitterStopped);
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(StreamError::Timeout);
            }
            std::thread::sleep(remaining.min(self.tuning.status_poll_interval));
        }
    }

    /// Discards everything queued; applied by the next acquire on either side.
    pub fn request_reset(&self) -> Result<(), StreamError> {
        self.require_stream("reset")?.exchange.request_reset();
        Ok(())
    }

    /// Raises a fault on behalf of the application, e.g. an overflow detected
    /// upstream of the writer.
    pub fn signal_fault(&self, kind: FaultKind) -> Result<(), StreamError> {
        self.require_stream("signal a fault")?
            .exchange
            .signal_fault(kind);
        Ok(())
    }

    /// Exchange counters; all zero without a stream.
    pub fn stats(&self) -> ExchangeStats {
        self.stream()
            .map(|stream| stream.exchange.stats())
            .unwrap_or_default()
    }

    pub fn occupancy(&self) -> Option<Occupancy> {
        self.stream().map(|stream| stream.exchange.occupancy())
    }

    /// Driver time in nanoseconds at `sample_rate` elements per second.
    pub fn hardware_time_ns(&self, sample_rate: f64) -> Result<i64, StreamError> {
        let ticks = self.require_stream("read hardware time")?.exchange.ticks();
        Ok(ticks_to_ns(ticks, sample_rate))
    }

    pub fn set_hardware_time_ns(
        &self,
        time_ns: i64,
        sample_rate: f64,
    ) -> Result<(), StreamError> {
        self.require_stream("set hardware time")?
            .exchange
            .set_ticks(ns_to_ticks(time_ns, sample_rate));
        Ok(())
    }

    pub fn num_direct_access_buffers(&self) -> Result<usize, StreamError> {
        Ok(self
            .require_stream("count direct access buffers")?
            .config
            .buffer_count())
    }

    /// Per-channel payload addresses of slot `index`.
    pub fn direct_access_buffer_addrs(
        &self,
        index: usize,
    ) -> Result<Vec<NonNull<u8>>, StreamError> {
        let stream = self.require_stream("read buffer addresses")?;
        let store = stream.exchange.store();
        if index >= store.capacity() {
            return Err(StreamError::InvalidHandle { index });
        }
        Ok((0..store.channels())
            .map(|channel| store.channel_ptr(index, channel))
            .collect())
    }

    fn stream(&self) -> Option<&Stream> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Configured(stream) | SessionState::Active { stream, .. } => {
                Some(stream)
            },
        }
    }

    fn require_stream(&self, operation: &'static str) -> Result<&Stream, StreamError> {
        self.stream().ok_or_else(|| self.invalid_state(operation))
    }

    fn active_stream_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Stream, StreamError> {
        let state = self.state.kind();
        match &mut self.state {
            SessionState::Active { stream, .. } => Ok(stream),
            _ => Err(StreamError::InvalidState {
                operation,
                state: state.as_str(),
            }),
        }
    }

    /// Like [`Self::active_stream_mut`], but also fails once the transmitter
    /// has quit, since nothing would drain what gets written.
    fn transmitting_stream_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Stream, StreamError> {
        if let SessionState::Active { tx, .. } = &self.state {
            if tx.is_finished() {
                return Err(StreamError::TransmitterStopped);
            }
        }
        self.active_stream_mut(operation)
    }

    fn invalid_state(&self, operation: &'static str) -> StreamError {
        StreamError::InvalidState {
            operation,
            state: self.state.kind().as_str(),
        }
    }
}

fn ticks_to_ns(ticks: u64, sample_rate: f64) -> i64 {
    if sample_rate <= 0.0 {
        return 0;
    }
    (ticks as f64 * 1e9 / sample_rate).round() as i64
}

fn ns_to_ticks(time_ns: i64, sample_rate: f64) -> u64 {
    if sample_rate <= 0.0 || time_ns <= 0 {
        return 0;
    }
    (time_ns as f64 * sample_rate / 1e9).round() as u64
}

#[cfg(test)]
#[path = "../tests/session/lifecycle.rs"]
mod tests;
