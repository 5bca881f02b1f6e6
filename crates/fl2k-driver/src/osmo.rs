//! libosmo-fl2k binding.
//!
//! The library starts its own USB worker threads in `fl2k_start_tx` and calls
//! back from one of them. [`Fl2kDevice::start_tx`] therefore parks the calling
//! thread on its [`StopSignal`], then issues the native stop and releases the
//! callback context.
//!
//! The library always reads `len` bytes from every channel pointer it gets
//! back, so anything shorter is swapped for an idle buffer here.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    BufferPtr, DEFAULT_BUFFER_LEN, DriverError, IDLE_LEVEL, MAX_CHANNELS, StopSignal,
    TransferInfo, TransmitDriver, TxBuffers, TxCallback, describe_code,
};

#[repr(C)]
struct RawDevice {
    _private: [u8; 0],
}

#[repr(C)]
struct RawDataInfo {
    ctx: *mut c_void,
    underflow_cnt: u32,
    len: u32,
    using_zerocopy: c_int,
    device_error: c_int,
    sampletype_signed: c_int,
    r_buf: *mut c_char,
    g_buf: *mut c_char,
    b_buf: *mut c_char,
}

type RawTxCallback = unsafe extern "C" fn(data_info: *mut RawDataInfo);

#[link(name = "osmo-fl2k")]
unsafe extern "C" {
    fn fl2k_get_device_count() -> u32;
    fn fl2k_get_device_name(index: u32) -> *const c_char;
    fn fl2k_open(dev: *mut *mut RawDevice, index: u32) -> c_int;
    fn fl2k_close(dev: *mut RawDevice) -> c_int;
    fn fl2k_set_sample_rate(dev: *mut RawDevice, target_freq: u32) -> c_int;
    fn fl2k_get_sample_rate(dev: *mut RawDevice) -> u32;
    fn fl2k_start_tx(
        dev: *mut RawDevice,
        cb: RawTxCallback,
        ctx: *mut c_void,
        buf_num: u32,
    ) -> c_int;
    fn fl2k_stop_tx(dev: *mut RawDevice) -> c_int;
}

/// Number of FL2K adapters currently attached.
pub fn device_count() -> u32 {
    unsafe { fl2k_get_device_count() }
}

/// Product name of the adapter at `index`, if the library knows it.
pub fn device_name(index: u32) -> Option<String> {
    let name = unsafe { fl2k_get_device_name(index) };
    if name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

struct CallbackContext {
    callback: Arc<dyn TxCallback>,
    /// Sent instead of buffer sets that do not cover a whole transfer. Only
    /// the library's callback thread touches it.
    idle: Mutex<Vec<u8>>,
}

unsafe extern "C" fn tx_trampoline(data_info: *mut RawDataInfo) {
    let Some(info) = (unsafe { data_info.as_mut() }) else {
        return;
    };
    if info.ctx.is_null() {
        return;
    }
    // Safety: ctx is the `CallbackContext` leaked by `start_tx`, freed only
    // after `fl2k_stop_tx` returned.
    let ctx = unsafe { &*(info.ctx as *const CallbackContext) };
    let transfer = TransferInfo {
        requested_len: info.len as usize,
        underflow_count: info.underflow_cnt,
        device_error: info.device_error != 0,
    };
    let result = catch_unwind(AssertUnwindSafe(|| ctx.callback.on_transfer(&transfer)));
    let buffers = result.unwrap_or_else(|_| {
        error!("fl2k transmit callback panicked");
        TxBuffers::new(0)
    });
    let required = transfer.requested_len;
    if !buffers.covers(required) {
        warn!(
            required,
            supplied = buffers.len(),
            "short fl2k transfer, sending idle"
        );
    }

    let mut idle = ctx.idle.lock();
    if idle.len() < required {
        idle.resize(required, IDLE_LEVEL);
    }
    let Some(fallback) = BufferPtr::from_slice(&idle) else {
        return;
    };
    // The idle buffer stays allocated until the next callback or the end of
    // the run; only this thread resizes it.
    let [r, g, b] = buffers
        .resolve(required, fallback)
        .map(|p| p.map_or(ptr::null_mut(), |p| p.as_ptr().cast::<c_char>()));
    info.sampletype_signed = 0;
    info.r_buf = r;
    info.g_buf = g;
    info.b_buf = b;
}

/// An opened FL2K adapter.
pub struct Fl2kDevice {
    dev: NonNull<RawDevice>,
    index: u32,
    channels: usize,
    running: Mutex<bool>,
}

// Safety: libosmo-fl2k device handles may be used from any thread; concurrent
// start/stop is serialized by `running`.
unsafe impl Send for Fl2kDevice {}
unsafe impl Sync for Fl2kDevice {}

impl Fl2kDevice {
    /// Opens adapter `index`. `channels` selects how many of the red/green/blue
    /// DACs the stream layer may drive.
    pub fn open(index: u32, channels: usize) -> Result<Self, DriverError> {
        let count = device_count();
        if index >= count {
            return Err(DriverError::NotFound);
        }
        let mut raw = ptr::null_mut();
        DriverError::check(unsafe { fl2k_open(&mut raw, index) })?;
        let dev = NonNull::new(raw).ok_or(DriverError::NoDevice)?;
        debug!(index, name = ?device_name(index), "opened fl2k device");
        Ok(Self {
            dev,
            index,
            channels: channels.clamp(1, MAX_CHANNELS),
            running: Mutex::new(false),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Sets the DAC sample rate and returns the rate the PLL actually locked to.
    pub fn set_sample_rate(&self, rate: u32) -> Result<u32, DriverError> {
        DriverError::check(unsafe { fl2k_set_sample_rate(self.dev.as_ptr(), rate) })?;
        Ok(self.sample_rate())
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe { fl2k_get_sample_rate(self.dev.as_ptr()) }
    }
}

impl TransmitDriver for Fl2kDevice {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn required_buffer_len(&self) -> Option<usize> {
        Some(DEFAULT_BUFFER_LEN)
    }

    fn start_tx(
        &self,
        callback: Arc<dyn TxCallback>,
        async_buffers: u32,
        stop: StopSignal,
    ) -> Result<(), DriverError> {
        {
            let mut running = self.running.lock();
            if *running {
                return Err(DriverError::Busy);
            }
            *running = true;
        }

        let ctx = Box::into_raw(Box::new(CallbackContext {
            callback,
            idle: Mutex::new(vec![IDLE_LEVEL; DEFAULT_BUFFER_LEN]),
        }));
        let code = unsafe {
            fl2k_start_tx(
                self.dev.as_ptr(),
                tx_trampoline,
                ctx.cast::<c_void>(),
                async_buffers,
            )
        };
        if let Err(error) = DriverError::check(code) {
            // Safety: the library rejected the start, so it holds no reference.
            drop(unsafe { Box::from_raw(ctx) });
            *self.running.lock() = false;
            return Err(error);
        }

        stop.wait();
        let code = unsafe { fl2k_stop_tx(self.dev.as_ptr()) };
        if code < 0 {
            warn!(code, status = describe_code(code), "fl2k_stop_tx failed");
        }
        // Safety: transfers are cancelled; no callback can observe ctx anymore.
        drop(unsafe { Box::from_raw(ctx) });
        *self.running.lock() = false;
        DriverError::check(code)
    }
}

impl Drop for Fl2kDevice {
    fn drop(&mut self) {
        let code = unsafe { fl2k_close(self.dev.as_ptr()) };
        if code < 0 {
            warn!(index = self.index, status = describe_code(code), "fl2k_close failed");
        }
    }
}
