use std::time::{Duration, Instant};

use crate::config::StreamArgs;
use crate::convert::MID_SCALE;
use crate::error::StreamError;
use crate::format::{Component, SampleFormat};
use crate::session::tests::{BUFFER_LEN, active, write_slot};

#[test]
fn oversized_write_fills_one_slot_and_asks_for_more() {
    let (driver, mut session) = active(SampleFormat::CS8, StreamArgs::default());
    let mtu = session.stream_mtu().expect("mtu");
    assert_eq!(mtu, BUFFER_LEN / 2);

    let total = mtu + 44;
    let samples: Vec<i8> = [10, -10].repeat(total);
    let first = session
        .write(&[&samples[..]], total, Duration::ZERO)
        .expect("first write");
    assert_eq!(first.written, mtu);
    assert!(first.more_fragments);

    let rest = &samples[first.written * 2..];
    let second = session
        .write(&[rest], total - first.written, Duration::ZERO)
        .expect("second write");
    assert_eq!(second.written, 44);
    assert!(!second.more_fragments);
    assert_eq!(first.written + second.written, total);
    assert_eq!(session.occupancy().map(|o| o.writing), Some(1));
    assert_eq!(session.flush().ok(), Some(true));
    assert_eq!(session.flush().ok(), Some(false));

    driver.step().expect("first slot");
    driver.step().expect("second slot");
    let captured = driver.take_captured();
    let full = captured[0].channel(0).expect("full");
    assert!(full.chunks_exact(2).all(|pair| pair == [138, 118]));
    let padded = captured[1].channel(0).expect("padded");
    assert!(padded[..88].chunks_exact(2).all(|pair| pair == [138, 118]));
    assert!(padded[88..].iter().all(|&b| b == MID_SCALE));
}

#[test]
fn float_samples_are_clamped_to_the_byte_range() {
    let (driver, mut session) = active(SampleFormat::CF32, StreamArgs::default());
    let samples = [-1.0f32, 0.0, 1.0, f32::NAN, 4.0, -4.0];
    let outcome = session
        .write(&[&samples[..]], 3, Duration::ZERO)
        .expect("write");
    assert_eq!(outcome.written, 3);
    session.flush().expect("flush");
    driver.step().expect("transfer");

    let captured = driver.take_captured();
    let bytes = captured[0].channel(0).expect("bytes");
    assert_eq!(&bytes[..6], &[0, 128, 255, 128, 255, 0]);
}

#[test]
fn iq_swap_reverses_each_pair() {
    let args = StreamArgs {
        iq_swap: true,
        ..StreamArgs::default()
    };
    let (driver, mut session) = active(SampleFormat::CS16, args);
    let samples = [0x1000i16, -0x1000];
    session
        .write(&[&samples[..]], 1, Duration::ZERO)
        .expect("write");
    session.flush().expect("flush");
    driver.step().expect("transfer");

    let captured = driver.take_captured();
    assert_eq!(&captured[0].channel(0).expect("bytes")[..2], &[112, 144]);
}

#[test]
fn mismatched_buffers_are_rejected() {
    let (_driver, mut session) = active(SampleFormat::CS8, StreamArgs::default());
    let floats = [0.0f32; 2];
    assert!(matches!(
        session.write(&[&floats[..]], 1, Duration::ZERO),
        Err(StreamError::FormatMismatch {
            configured: SampleFormat::CS8,
            requested: Component::F32,
        })
    ));
    let bytes = [0i8; 2];
    assert!(matches!(
        session.write(&[&bytes[..], &bytes[..]], 1, Duration::ZERO),
        Err(StreamError::ChannelCountMismatch {
            expected: 1,
            actual: 2
        })
    ));
    let outcome = session
        .write(&[&bytes[..1]], 1, Duration::ZERO)
        .expect("half pair");
    assert_eq!((outcome.written, outcome.more_fragments), (0, false));
}

#[test]
fn full_ring_times_out_promptly() {
    let args = StreamArgs {
        buffers: 2,
        ..StreamArgs::default()
    };
    let (_driver, mut session) = active(SampleFormat::CU8, args);
    write_slot(&mut session, 1);
    write_slot(&mut session, 2);

    let samples = [0u8; 2];
    let start = Instant::now();
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::ZERO),
        Err(StreamError::Timeout)
    ));
    assert!(start.elapsed() < Duration::from_millis(50));

    let start = Instant::now();
    assert!(matches!(
        session.write(&[&samples[..]], 1, Duration::from_millis(30)),
        Err(StreamError::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn reset_discards_a_partly_written_slot() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    let old = [1u8; 10];
    session
        .write(&[&old[..]], 5, Duration::ZERO)
        .expect("old write");
    session.request_reset().expect("reset");

    let new = [2u8; 6];
    session
        .write(&[&new[..]], 3, Duration::ZERO)
        .expect("new write");
    session.flush().expect("flush");
    driver.step().expect("transfer");

    let captured = driver.take_captured();
    let bytes = captured[0].channel(0).expect("bytes");
    assert!(bytes[..6].iter().all(|&b| b == 2));
    assert!(bytes[6..].iter().all(|&b| b == MID_SCALE));
    assert_eq!(session.stats().released, 1);
}

#[test]
fn direct_buffer_is_padded_past_the_written_elements() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    let addrs: Vec<_> = (0..4)
        .map(|index| session.direct_access_buffer_addrs(index).expect("addrs")[0])
        .collect();

    let mut buffer = session
        .acquire_write_buffer(Duration::ZERO)
        .expect("acquire");
    assert_eq!(buffer.capacity(), BUFFER_LEN / 2);
    assert_eq!(buffer.channel_count(), 1);
    let handle = buffer.handle();
    let channel = buffer.channel_mut(0);
    assert_eq!(channel.as_ptr(), addrs[handle.index()].as_ptr().cast_const());
    channel.fill(0);
    channel[..20].fill(7);
    session
        .release_write_buffer(handle, 10)
        .expect("release");
    assert!(matches!(
        session.release_write_buffer(handle, 10),
        Err(StreamError::InvalidHandle { .. })
    ));

    driver.step().expect("transfer");
    let captured = driver.take_captured();
    let bytes = captured[0].channel(0).expect("bytes");
    assert!(bytes[..20].iter().all(|&b| b == 7));
    assert!(bytes[20..].iter().all(|&b| b == MID_SCALE));
}

#[test]
fn direct_access_flushes_a_pending_partial_slot_first() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    let samples = [4u8; 8];
    session
        .write(&[&samples[..]], 4, Duration::ZERO)
        .expect("partial write");

    let handle = {
        let mut buffer = session
            .acquire_write_buffer(Duration::ZERO)
            .expect("acquire");
        buffer.channel_mut(0).fill(5);
        buffer.handle()
    };
    assert_eq!(session.stats().released, 1);
    session
        .release_write_buffer(handle, BUFFER_LEN / 2)
        .expect("release");

    driver.step().expect("partial slot");
    driver.step().expect("direct slot");
    let captured = driver.take_captured();
    let first = captured[0].channel(0).expect("first");
    assert!(first[..8].iter().all(|&b| b == 4));
    assert!(first[8..].iter().all(|&b| b == MID_SCALE));
    assert!(captured[1].channel(0).expect("second").iter().all(|&b| b == 5));
}

#[test]
fn stale_direct_handle_is_ignored_after_a_reset() {
    let (driver, mut session) = active(SampleFormat::CU8, StreamArgs::default());
    let handle = session
        .acquire_write_buffer(Duration::ZERO)
        .expect("acquire")
        .handle();
    session.request_reset().expect("reset");
    driver.step().expect("drain on the driver side");

    session
        .release_write_buffer(handle, 0)
        .expect("stale release is a no-op");
    assert_eq!(session.stats().released, 0);
    assert_eq!(session.occupancy().map(|o| o.free()), Some(4));
}
