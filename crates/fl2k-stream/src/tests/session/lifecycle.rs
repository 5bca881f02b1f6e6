use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fl2k_driver::sim::{SimulatedDriver, SimulatedDriverConfig};
use fl2k_driver::{DriverError, TransmitDriver};

use super::*;
use crate::convert::MID_SCALE;

pub(crate) const BUFFER_LEN: usize = 512;
const STATUS_TIMEOUT: Duration = Duration::from_millis(20);

pub(crate) fn simulated(channels: usize) -> (Arc<SimulatedDriver>, StreamSession) {
    simulated_with(SimulatedDriverConfig {
        channels,
        buffer_len: BUFFER_LEN,
        ..SimulatedDriverConfig::default()
    })
}

fn simulated_with(config: SimulatedDriverConfig) -> (Arc<SimulatedDriver>, StreamSession) {
    let driver = SimulatedDriver::new(config);
    let dyn_driver: Arc<dyn TransmitDriver> = driver.clone();
    let session = StreamSession::with_tuning(
        dyn_driver,
        SessionTuning {
            status_poll_interval: Duration::from_millis(1),
            realtime_class: None,
        },
    );
    (driver, session)
}

pub(crate) fn active(
    format: SampleFormat,
    args: StreamArgs,
) -> (Arc<SimulatedDriver>, StreamSession) {
    let (driver, mut session) = simulated(1);
    session
        .setup_stream(Direction::Tx, format, &[0], &args)
        .expect("setup");
    session.activate_stream(0, 0, 0).expect("activate");
    wait_until_running(&driver);
    (driver, session)
}

pub(crate) fn wait_until_running(driver: &SimulatedDriver) {
    for _ in 0..400 {
        if driver.is_running() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("simulated driver never started");
}

/// Fills one whole slot of a single-channel CU8 stream with `value`.
pub(crate) fn write_slot(session: &mut StreamSession, value: u8) {
    let elems = session.stream_mtu().expect("mtu");
    let samples = vec![value; elems * 2];
    let outcome = session
        .write(&[&samples[..]], elems, Duration::from_secs(1))
        .expect("write");
    assert_eq!(outcome.written, elems);
    assert!(!outcome.more_fragments);
}

#[test]
fn tick_conversion_round_trips_at_whole_rates() {
    assert_eq!(ticks_to_ns(48_000, 48_000.0), 1_000_000_000);
    assert_eq!(ns_to_ticks(500_000_000, 10e6), 5_000_000);
    assert_eq!(ticks_to_ns(10, 0.0), 0);
    assert_eq!(ns_to_ticks(-5, 1e6), 0);
}

#[test]
fn receive_direction_is_rejected_and_state_is_unchanged() {
    let (_driver, mut session) = simulated(1);
    let result = session.setup_stream(
        Direction::Rx,
        SampleFormat::CS8,
        &[0],
        &StreamArgs::default(),
    );
    assert!(matches!(
        result,
        Err(StreamError::UnsupportedDirection {
            direction: Direction::Rx
        })
    ));
    assert_eq!(session.state(), StreamState::Idle);
    assert!(session.config().is_none());
}

#[test]
fn operations_outside_their_state_are_rejected() {
    let (_driver, mut session) = simulated(1);
    assert!(matches!(
        session.activate_stream(0, 0, 0),
        Err(StreamError::InvalidState { state: "idle", .. })
    ));
    assert!(matches!(
        session.deactivate_stream(0, 0),
        Err(StreamError::InvalidState { .. })
    ));
    assert!(session.stream_mtu().is_err());
    assert!(session.request_reset().is_err());
    assert_eq!(session.stats(), ExchangeStats::default());

    session
        .setup_stream(Direction::Tx, SampleFormat::CU8, &[], &StreamArgs::default())
        .expect("setup");
    assert_eq!(session.config().map(StreamConfig::selection), Some(&[0][..]));
    let samples = [0u8; 2];
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::ZERO),
        Err(StreamError::InvalidState {
            state: "configured",
            ..
        })
    ));
    assert!(matches!(
        session.activate_stream(1, 0, 0),
        Err(StreamError::NotSupported { .. })
    ));
    assert_eq!(session.state(), StreamState::Configured);
    assert_eq!(session.deactivate_stream(0, 0).ok(), Some(()));
}

#[test]
fn lifecycle_starts_and_stops_the_driver() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    assert_eq!(session.state(), StreamState::Active);
    assert!(matches!(
        session.setup_stream(
            Direction::Tx,
            SampleFormat::CU8,
            &[0],
            &StreamArgs::default()
        ),
        Err(StreamError::InvalidState { .. })
    ));

    session.deactivate_stream(0, 0).expect("deactivate");
    assert_eq!(session.state(), StreamState::Configured);
    assert!(!driver.is_running());

    session.activate_stream(0, 0, 0).expect("reactivate");
    wait_until_running(&driver);
    session.close_stream().expect("close");
    assert_eq!(session.state(), StreamState::Idle);
    assert!(!driver.is_running());
    assert!(session.occupancy().is_none());
}

#[test]
fn stream_queries_reflect_the_configuration() {
    let (_driver, mut session) = simulated(3);
    assert_eq!(StreamSession::stream_formats().len(), 10);
    assert_eq!(
        StreamSession::native_stream_format(),
        (SampleFormat::CU8, 128.0)
    );
    assert_eq!(session.stream_args_info().len(), 4);

    let args = StreamArgs {
        bufflen: Some(1024),
        buffers: 6,
        ..StreamArgs::default()
    };
    session
        .setup_stream(Direction::Tx, SampleFormat::CS16, &[1, 2], &args)
        .expect("setup");
    assert_eq!(session.stream_mtu().ok(), Some(512));
    assert_eq!(session.num_direct_access_buffers().ok(), Some(6));
    let addrs = session.direct_access_buffer_addrs(5).expect("addrs");
    assert_eq!(addrs.len(), 2);
    assert_ne!(addrs[0], addrs[1]);
    assert!(matches!(
        session.direct_access_buffer_addrs(6),
        Err(StreamError::InvalidHandle { index: 6 })
    ));
}

#[test]
fn status_times_out_without_faults() {
    let (_driver, session) = active(SampleFormat::CU8, StreamArgs::default());
    assert!(matches!(
        session.read_stream_status(STATUS_TIMEOUT),
        Err(StreamError::Timeout)
    ));
}

#[test]
fn running_dry_after_a_delivery_reports_one_underflow() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    write_slot(&mut session, 7);
    driver.step().expect("deliver");
    driver.step().expect("starve");

    assert!(matches!(
        session.read_stream_status(STATUS_TIMEOUT),
        Err(StreamError::Underflow)
    ));
    assert!(matches!(
        session.read_stream_status(STATUS_TIMEOUT),
        Err(StreamError::Timeout)
    ));

    let captured = driver.take_captured();
    assert_eq!(captured.len(), 2);
    assert!(captured[0].channel(0).expect("data").iter().all(|&b| b == 7));
    let idle = captured[1].channel(0).expect("idle");
    assert!(idle.iter().all(|&b| b == MID_SCALE));
    assert_eq!(session.stats().underflows, 1);
}

#[test]
fn driver_fault_is_reported_once_to_the_writer() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    write_slot(&mut session, 9);
    driver.inject_underflow(1);
    driver.step().expect("faulted transfer");

    let samples = [0u8; 2];
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::ZERO),
        Err(StreamError::Underflow)
    ));
    let outcome = session
        .write(&[&samples[..]], 1, Duration::ZERO)
        .expect("write after fault");
    assert_eq!(outcome.written, 1);
    assert_eq!(session.stats().discarded, 1);
    assert_eq!(session.stats().delivered, 0);
}

#[test]
fn reset_discards_queued_slots() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    write_slot(&mut session, 1);
    write_slot(&mut session, 2);
    session.request_reset().expect("reset");
    driver.step().expect("transfer");

    let captured = driver.take_captured();
    let bytes = captured[0].channel(0).expect("idle");
    assert!(bytes.iter().all(|&b| b == MID_SCALE));
    let stats = session.stats();
    assert_eq!((stats.discarded, stats.resets, stats.delivered), (2, 1, 0));
    assert_eq!(session.occupancy().map(|o| o.filled), Some(0));
    // an idle ring after a reset does not count as an underflow
    driver.step().expect("idle transfer");
    assert!(matches!(
        session.read_stream_status(STATUS_TIMEOUT),
        Err(StreamError::Timeout)
    ));
}

#[test]
fn application_fault_reaches_status_and_writer() {
    let (_driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    session.signal_fault(FaultKind::Overflow).expect("signal");
    assert!(matches!(
        session.read_stream_status(STATUS_TIMEOUT),
        Err(StreamError::Overflow)
    ));
    let samples = [0u8; 2];
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::ZERO),
        Err(StreamError::Overflow)
    ));
    assert_eq!(session.stats().overflows, 1);
}

#[test]
fn hardware_time_counts_every_transfer() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    // 512 bytes of CU8 hold 256 elements
    driver.step().expect("idle");
    write_slot(&mut session, 3);
    driver.step().expect("data");
    assert_eq!(session.hardware_time_ns(256.0).ok(), Some(2_000_000_000));

    session
        .set_hardware_time_ns(10_000_000_000, 256.0)
        .expect("set time");
    driver.step().expect("idle");
    assert_eq!(session.hardware_time_ns(256.0).ok(), Some(11_000_000_000));
}

#[test]
fn deactivation_invalidates_the_ring() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    write_slot(&mut session, 5);
    session.deactivate_stream(0, 0).expect("deactivate");
    let occupancy = session.occupancy().expect("configured");
    assert_eq!(occupancy.free(), occupancy.capacity);

    session.activate_stream(0, 0, 0).expect("reactivate");
    wait_until_running(&driver);
    driver.step().expect("transfer");
    let captured = driver.take_captured();
    let bytes = captured.last().and_then(|t| t.channel(0)).expect("bytes");
    assert!(bytes.iter().all(|&b| b == MID_SCALE));
}

#[test]
fn single_slot_ring_is_refused_at_setup() {
    let (_driver, mut session) = simulated(1);
    let args = StreamArgs {
        buffers: 1,
        ..StreamArgs::default()
    };
    assert!(matches!(
        session.setup_stream(Direction::Tx, SampleFormat::CU8, &[0], &args),
        Err(StreamError::InvalidBufferCount { count: 1 })
    ));
    assert_eq!(session.state(), StreamState::Idle);
}

#[test]
fn fixed_length_device_streams_whole_transfers() {
    let (driver, mut session) = simulated_with(SimulatedDriverConfig {
        buffer_len: 2 * BUFFER_LEN,
        exact_len: true,
        ..SimulatedDriverConfig::default()
    });
    let short = StreamArgs {
        bufflen: Some(BUFFER_LEN),
        ..StreamArgs::default()
    };
    assert!(matches!(
        session.setup_stream(Direction::Tx, SampleFormat::CU8, &[0], &short),
        Err(StreamError::BufferLengthMismatch {
            len: BUFFER_LEN,
            required
        }) if required == 2 * BUFFER_LEN
    ));

    session
        .setup_stream(Direction::Tx, SampleFormat::CU8, &[0], &StreamArgs::default())
        .expect("setup");
    assert_eq!(session.config().map(StreamConfig::buffer_len), Some(2 * BUFFER_LEN));
    session.activate_stream(0, 0, 0).expect("activate");
    wait_until_running(&driver);
    write_slot(&mut session, 6);
    driver.step().expect("transfer");

    let captured = driver.take_captured();
    let bytes = captured[0].channel(0).expect("bytes");
    assert_eq!(bytes.len(), 2 * BUFFER_LEN);
    assert!(bytes.iter().all(|&b| b == 6));
}

#[test]
fn failed_driver_start_is_reported_and_does_not_poison_the_next_run() {
    let (driver, mut session) = simulated(1);
    session
        .setup_stream(Direction::Tx, SampleFormat::CU8, &[0], &StreamArgs::default())
        .expect("setup");
    driver.inject_start_failure(DriverError::NoMem);
    session.activate_stream(0, 0, 0).expect("activate");

    let status = Duration::from_secs(1);
    assert!(matches!(
        session.read_stream_status(status),
        Err(StreamError::Underflow)
    ));
    assert!(matches!(
        session.read_stream_status(status),
        Err(StreamError::TransmitterStopped)
    ));
    let samples = [0u8; 2];
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::ZERO),
        Err(StreamError::TransmitterStopped)
    ));
    assert!(matches!(
        session.deactivate_stream(0, 0),
        Err(StreamError::Driver(DriverError::NoMem))
    ));
    assert_eq!(session.state(), StreamState::Configured);

    session.activate_stream(0, 0, 0).expect("reactivate");
    wait_until_running(&driver);
    write_slot(&mut session, 8);
    driver.step().expect("transfer");
    assert!(driver.is_running());
    let captured = driver.take_captured();
    assert!(captured[0].channel(0).expect("bytes").iter().all(|&b| b == 8));
    session.close_stream().expect("close");
}
