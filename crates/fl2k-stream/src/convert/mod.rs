//! Sample conversion into the transmitter's native bytes.
//!
//! Native output is one unsigned byte per component, centred on
//! [`MID_SCALE`]. The per-type rules are:
//!
//! | input | rule |
//! |---|---|
//! | `f32` | `round(clamp(x, -1, 1) * 127.5 + 127.5)`, NaN is mid-scale |
//! | `i16` | `(x >> 8) + 128` |
//! | `i8`  | `x + 128` |
//! | `u16` | `x >> 8` |
//! | `u8`  | unchanged |
//!
//! Float conversion saturates at the range ends and rounds half away from
//! zero, so `[-1.0, 0.0, 1.0]` becomes `[0, 128, 255]`.

mod lut;

use tracing::debug;

use crate::error::StreamError;
use crate::format::{SampleFormat, TxSample};

use self::lut::LookupTable;

/// Native value for a zero-amplitude sample.
pub const MID_SCALE: u8 = fl2k_driver::IDLE_LEVEL;

pub fn f32_to_native(x: f32) -> u8 {
    if x.is_nan() {
        return MID_SCALE;
    }
    (x.clamp(-1.0, 1.0) * 127.5 + 127.5).round() as u8
}

pub fn i16_to_native(x: i16) -> u8 {
    ((x >> 8) + 128) as u8
}

pub fn i8_to_native(x: i8) -> u8 {
    (x as u8).wrapping_add(128)
}

pub fn u16_to_native(x: u16) -> u8 {
    (x >> 8) as u8
}

/// Converter bound to one stream configuration.
///
/// Swapped complex integer layouts go through a 65536-entry table built once
/// here; every other layout is converted arithmetically.
pub struct FormatConverter {
    format: SampleFormat,
    swap: bool,
    table: Option<LookupTable>,
}

impl FormatConverter {
    pub fn new(format: SampleFormat, swap: bool) -> Self {
        let table = if format.is_complex() && swap {
            LookupTable::for_component(format.component())
        } else {
            None
        };
        debug!(
            %format,
            swap,
            lookup_table = table.is_some(),
            "sample converter ready"
        );
        Self {
            format,
            swap,
            table,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn swap(&self) -> bool {
        self.swap
    }

    pub fn has_lookup_table(&self) -> bool {
        self.table.is_some()
    }

    /// Converts as many whole elements of `input` as fit into `output` and
    /// returns the element count.
    ///
    /// `input` holds interleaved components for complex formats; a trailing
    /// half pair is ignored.
    pub fn convert<S: TxSample>(
        &self,
        input: &[S],
        output: &mut [u8],
    ) -> Result<usize, StreamError> {
        if S::COMPONENT != self.format.component() {
            return Err(StreamError::FormatMismatch {
                configured: self.format,
                requested: S::COMPONENT,
            });
        }
        let width = self.format.components_per_element();
        let elems = (input.len() / width).min(output.len() / width);
        let input = &input[..elems * width];
        let output = &mut output[..elems * width];

        if width == 1 {
            for (dst, src) in output.iter_mut().zip(input) {
                *dst = src.to_native();
            }
            return Ok(elems);
        }

        let pairs = output.chunks_exact_mut(2).zip(input.chunks_exact(2));
        match (&self.table, self.swap) {
            (Some(LookupTable::Pairs(table)), _) => {
                for (dst, src) in pairs {
                    let word = pair_word(src[0], src[1]);
                    dst.copy_from_slice(&table[word as usize]);
                }
            },
            (Some(LookupTable::Components(table)), _) => {
                for (dst, src) in pairs {
                    dst[0] = table_lookup(table, src[1]);
                    dst[1] = table_lookup(table, src[0]);
                }
            },
            (None, true) => {
                for (dst, src) in pairs {
                    dst[0] = src[1].to_native();
                    dst[1] = src[0].to_native();
                }
            },
            (None, false) => {
                for (dst, src) in pairs {
                    dst[0] = src[0].to_native();
                    dst[1] = src[1].to_native();
                }
            },
        }
        Ok(elems)
    }
}

fn pair_word<S: TxSample>(i: S, q: S) -> u16 {
    let i = i.table_index().unwrap_or(u16::from(MID_SCALE));
    let q = q.table_index().unwrap_or(u16::from(MID_SCALE));
    (i & 0x00ff) | (q << 8)
}

fn table_lookup<S: TxSample>(table: &[u8], sample: S) -> u8 {
    match sample.table_index() {
        Some(bits) => table[bits as usize],
        None => sample.to_native(),
    }
}
