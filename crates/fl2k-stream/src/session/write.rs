use std::time::Duration;

use tracing::debug;

use crate::convert::MID_SCALE;
use crate::error::StreamError;
use crate::exchange::SlotHandle;
use crate::format::TxSample;

use super::{PartialSlot, Stream, StreamSession};

/// Result of one [`StreamSession::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Elements consumed from each input buffer.
    pub written: usize,
    /// Fewer elements than requested fit in the current slot; call again with
    /// the remainder.
    pub more_fragments: bool,
}

/// Writer-owned slot obtained through direct buffer access.
pub struct WriteBuffer<'a> {
    handle: SlotHandle,
    tick: u64,
    capacity: usize,
    channels: Vec<&'a mut [u8]>,
}

impl<'a> WriteBuffer<'a> {
    /// Pass back to [`StreamSession::release_write_buffer`].
    pub fn handle(&self) -> SlotHandle {
        self.handle
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Elements the slot holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Native bytes of one channel.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [u8] {
        &mut self.channels[channel]
    }

    pub fn channels_mut(&mut self) -> &mut [&'a mut [u8]] {
        &mut self.channels
    }
}

impl StreamSession {
    /// Converts `num_elems` elements per channel into the ring.
    ///
    /// `buffs` holds one input buffer per configured channel; complex formats
    /// take two components per element. A slot is published as soon as it is
    /// full. When the request does not fit the remaining room of the current
    /// slot, the fitting part is written and `more_fragments` is set. A reset
    /// or fault observed on entry throws away a partly filled slot.
    pub fn write<S: TxSample>(
        &mut self,
        buffs: &[&[S]],
        num_elems: usize,
        timeout: Duration,
    ) -> Result<WriteOutcome, StreamError> {
        let stream = self.transmitting_stream_mut("write")?;
        let format = stream.config.format();
        if S::COMPONENT != format.component() {
            return Err(StreamError::FormatMismatch {
                configured: format,
                requested: S::COMPONENT,
            });
        }
        let channels = stream.config.channel_count();
        if buffs.len() != channels {
            return Err(StreamError::ChannelCountMismatch {
                expected: channels,
                actual: buffs.len(),
            });
        }
        let width = format.components_per_element();
        let requested = buffs
            .iter()
            .map(|buff| buff.len() / width)
            .fold(num_elems, usize::min);
        if requested == 0 {
            return Ok(WriteOutcome {
                written: 0,
                more_fragments: false,
            });
        }

        stream.drop_stale_partial();
        let (handle, offset) = match stream.partial.take() {
            Some(partial) => (partial.handle, partial.filled),
            None => (stream.exchange.acquire(timeout)?.handle, 0),
        };

        let capacity = stream.config.elements_per_buffer();
        let count = requested.min(capacity - offset);
        let native = format.native_bytes_per_element();
        let store = stream.exchange.store();
        for (channel, input) in buffs.iter().enumerate() {
            // Safety: `handle` is the writer's slot until it is released below.
            let payload = unsafe { store.channel_mut(handle.index(), channel) };
            let output = &mut payload[offset * native..(offset + count) * native];
            stream.converter.convert(&input[..count * width], output)?;
        }

        let filled = offset + count;
        if filled == capacity {
            stream.exchange.release(handle)?;
        } else {
            stream.partial = Some(PartialSlot { handle, filled });
        }
        Ok(WriteOutcome {
            written: count,
            more_fragments: count < requested,
        })
    }

    /// Pads a partly filled slot with mid-scale and publishes it. Returns
    /// whether a slot was flushed.
    pub fn flush(&mut self) -> Result<bool, StreamError> {
        let stream = self.active_stream_mut("flush")?;
        stream.drop_stale_partial();
        let Some(partial) = stream.partial.take() else {
            return Ok(false);
        };
        stream.pad_and_release(partial.handle, partial.filled)?;
        Ok(true)
    }

    /// Hands out the next free slot for in-place filling.
    ///
    /// A slot partly filled by [`write`](StreamSession::write) is flushed
    /// first so that slots stay in order.
    pub fn acquire_write_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<WriteBuffer<'_>, StreamError> {
        let stream = self.transmitting_stream_mut("acquire a write buffer")?;
        stream.drop_stale_partial();
        if let Some(partial) = stream.partial.take() {
            stream.pad_and_release(partial.handle, partial.filled)?;
        }

        let slot = stream.exchange.acquire(timeout)?;
        let store = stream.exchange.store();
        let channels = (0..store.channels())
            // Safety: the slot was just handed to the writer; each channel is
            // borrowed once and the views end with the session borrow.
            .map(|channel| unsafe { store.channel_mut(slot.handle.index(), channel) })
            .collect();
        Ok(WriteBuffer {
            handle: slot.handle,
            tick: slot.tick,
            capacity: stream.config.elements_per_buffer(),
            channels,
        })
    }

    /// Publishes a slot obtained from [`acquire_write_buffer`].
    ///
    /// Elements past `num_elems` are set to mid-scale. Handles invalidated by
    /// a reset or fault are ignored.
    ///
    /// [`acquire_write_buffer`]: StreamSession::acquire_write_buffer
    pub fn release_write_buffer(
        &mut self,
        handle: SlotHandle,
        num_elems: usize,
    ) -> Result<(), StreamError> {
        let stream = self.active_stream_mut("release a write buffer")?;
        stream.pad_and_release(handle, num_elems)
    }
}

impl Stream {
    fn drop_stale_partial(&mut self) {
        let Some(partial) = self.partial else {
            return;
        };
        if self.exchange.has_pending_event() || !self.exchange.is_current(partial.handle) {
            debug!(
                index = partial.handle.index(),
                filled = partial.filled,
                "discarding partially filled slot"
            );
            self.partial = None;
        }
    }

    fn pad_and_release(&self, handle: SlotHandle, num_elems: usize) -> Result<(), StreamError> {
        let store = self.exchange.store();
        if self.exchange.is_writer_slot(handle) {
            let native = self.config.format().native_bytes_per_element();
            let start = num_elems.min(self.config.elements_per_buffer()) * native;
            for channel in 0..store.channels() {
                // Safety: the caller holds `handle` for the current epoch.
                let payload = unsafe { store.channel_mut(handle.index(), channel) };
                payload[start..].fill(MID_SCALE);
            }
        }
        self.exchange.release(handle)
    }
}

#[cfg(test)]
#[path = "../tests/session/write.rs"]
mod tests;
