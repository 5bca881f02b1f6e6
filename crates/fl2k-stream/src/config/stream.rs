use std::time::Duration;

use fl2k_driver::TransmitDriver;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::format::SampleFormat;

use super::{MIN_BUFFER_COUNT, StreamArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Tx,
    Rx,
}

/// What the driver allows a stream to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverLimits {
    /// DAC channels on the device.
    pub channels: usize,
    /// Required multiple for the per-channel buffer length.
    pub alignment: usize,
    /// Buffer length used when the caller gives none.
    pub default_buffer_len: usize,
    /// The only buffer length the device accepts, if it has one.
    pub required_buffer_len: Option<usize>,
}

impl DriverLimits {
    pub fn of(driver: &dyn TransmitDriver) -> Self {
        Self {
            channels: driver.channel_count(),
            alignment: driver.buffer_alignment(),
            default_buffer_len: driver.default_buffer_len(),
            required_buffer_len: driver.required_buffer_len(),
        }
    }
}

/// Validated, immutable description of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    format: SampleFormat,
    selection: Vec<usize>,
    buffer_len: usize,
    buffer_count: usize,
    async_buffers: u32,
    swap: bool,
}

impl StreamConfig {
    /// Checks a setup request against the driver limits.
    ///
    /// An empty `selection` means driver channel 0.
    pub fn new(
        direction: Direction,
        format: SampleFormat,
        selection: &[usize],
        args: &StreamArgs,
        limits: DriverLimits,
    ) -> Result<Self, StreamError> {
        if direction != Direction::Tx {
            return Err(StreamError::UnsupportedDirection { direction });
        }

        let selection = if selection.is_empty() {
            vec![0]
        } else {
            selection.to_vec()
        };
        let distinct = selection
            .iter()
            .enumerate()
            .all(|(i, channel)| !selection[..i].contains(channel));
        if !distinct
            || selection.len() > limits.channels
            || selection.iter().any(|&channel| channel >= limits.channels)
        {
            return Err(StreamError::InvalidChannelSelection {
                selection,
                available: limits.channels,
            });
        }

        let buffer_len = args
            .bufflen
            .or(limits.required_buffer_len)
            .unwrap_or(limits.default_buffer_len);
        if let Some(required) = limits.required_buffer_len {
            if buffer_len != required {
                return Err(StreamError::BufferLengthMismatch {
                    len: buffer_len,
                    required,
                });
            }
        }
        let alignment = limits.alignment.max(1);
        if buffer_len == 0 || buffer_len % alignment != 0 {
            return Err(StreamError::InvalidBufferLength {
                len: buffer_len,
                alignment,
            });
        }
        let element_bytes = format.native_bytes_per_element();
        if buffer_len % element_bytes != 0 {
            return Err(StreamError::MisalignedElement {
                len: buffer_len,
                element_bytes,
                format,
            });
        }
        if args.buffers < MIN_BUFFER_COUNT {
            return Err(StreamError::InvalidBufferCount {
                count: args.buffers,
            });
        }

        Ok(Self {
            format,
            selection,
            buffer_len,
            buffer_count: args.buffers,
            async_buffers: args.async_buffs,
            swap: args.iq_swap,
        })
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Driver channel fed by each stream channel, in stream order.
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn channel_count(&self) -> usize {
        self.selection.len()
    }

    /// Bytes per channel buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub fn async_buffers(&self) -> u32 {
        self.async_buffers
    }

    pub fn swap(&self) -> bool {
        self.swap
    }

    /// Elements that fit in one buffer.
    pub fn elements_per_buffer(&self) -> usize {
        self.buffer_len / self.format.native_bytes_per_element()
    }
}

/// Engine timing and scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTuning {
    /// Sleep between fault checks in `read_stream_status`.
    pub status_poll_interval: Duration,
    /// MMCSS task class joined by the transmit thread on Windows; `None`
    /// keeps normal scheduling.
    pub realtime_class: Option<&'static str>,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_millis(2),
            realtime_class: Some("Pro Audio"),
        }
    }
}
