use std::ptr::NonNull;

use crate::MAX_CHANNELS;

/// Raw pointer to the first byte of one channel buffer.
///
/// The pointee is owned by whoever returned it from a callback; the driver only
/// borrows it until the next callback (or until the transfer is stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPtr(NonNull<u8>);

// Safety: the pointer is only dereferenced by the driver thread while the
// producing side guarantees (by protocol) that nobody else mutates the bytes.
unsafe impl Send for BufferPtr {}
unsafe impl Sync for BufferPtr {}

impl BufferPtr {
    pub fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        NonNull::new(bytes.as_ptr().cast_mut()).map(Self)
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// Per-channel buffers handed back to the driver for the next transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBuffers {
    channels: [Option<BufferPtr>; MAX_CHANNELS],
    len: usize,
}

impl TxBuffers {
    /// A buffer set of `len` bytes per channel with no channel populated yet.
    pub fn new(len: usize) -> Self {
        Self {
            channels: [None; MAX_CHANNELS],
            len,
        }
    }

    pub fn with_channel(mut self, channel: usize, ptr: BufferPtr) -> Self {
        self.set_channel(channel, ptr);
        self
    }

    /// Sets the buffer for a driver channel. Out-of-range channels are ignored.
    pub fn set_channel(&mut self, channel: usize, ptr: BufferPtr) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = Some(ptr);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn channel_ptr(&self, channel: usize) -> Option<BufferPtr> {
        self.channels.get(channel).copied().flatten()
    }

    /// Whether every transfer of `required` bytes per channel can be read from
    /// this set.
    pub fn covers(&self, required: usize) -> bool {
        self.len >= required
    }

    /// Channel pointers a device consuming `required` bytes may read.
    ///
    /// A set that does not cover `required` is replaced wholesale by
    /// `fallback`, which must hold at least `required` bytes.
    pub fn resolve(
        &self,
        required: usize,
        fallback: BufferPtr,
    ) -> [Option<BufferPtr>; MAX_CHANNELS] {
        if self.covers(required) {
            self.channels
        } else {
            [Some(fallback); MAX_CHANNELS]
        }
    }

    /// Borrows the bytes of one channel.
    ///
    /// # Safety
    ///
    /// The buffer must still be valid for `len` bytes, i.e. the caller is the
    /// driver and has not yet issued the next callback for this transfer.
    pub unsafe fn channel(&self, channel: usize) -> Option<&[u8]> {
        self.channel_ptr(channel)
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) })
    }
}
