//! Sample formats accepted by the transmit stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Scalar type of one sample component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    F32,
    S16,
    S8,
    U16,
    U8,
}

/// Application-side sample layout.
///
/// Complex formats carry interleaved I/Q pairs and occupy two native bytes
/// per element; real formats occupy one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SampleFormat {
    CF32,
    CS16,
    CS8,
    CU16,
    CU8,
    F32,
    S16,
    S8,
    U16,
    U8,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 10] = [
        Self::CF32,
        Self::CS16,
        Self::CS8,
        Self::CU16,
        Self::CU8,
        Self::F32,
        Self::S16,
        Self::S8,
        Self::U16,
        Self::U8,
    ];

    /// Format the transmitter consumes without conversion (unsigned bytes
    /// centred on 128).
    pub const NATIVE: SampleFormat = Self::CU8;

    /// Full-scale magnitude of the native format.
    pub const NATIVE_FULL_SCALE: f64 = 128.0;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CF32 => "CF32",
            Self::CS16 => "CS16",
            Self::CS8 => "CS8",
            Self::CU16 => "CU16",
            Self::CU8 => "CU8",
            Self::F32 => "F32",
            Self::S16 => "S16",
            Self::S8 => "S8",
            Self::U16 => "U16",
            Self::U8 => "U8",
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Self::CF32 | Self::CS16 | Self::CS8 | Self::CU16 | Self::CU8
        )
    }

    pub fn component(self) -> Component {
        match self {
            Self::CF32 | Self::F32 => Component::F32,
            Self::CS16 | Self::S16 => Component::S16,
            Self::CS8 | Self::S8 => Component::S8,
            Self::CU16 | Self::U16 => Component::U16,
            Self::CU8 | Self::U8 => Component::U8,
        }
    }

    /// Components per element: 2 for I/Q pairs, 1 otherwise.
    pub fn components_per_element(self) -> usize {
        if self.is_complex() { 2 } else { 1 }
    }

    /// Native output bytes per element, per channel.
    pub fn native_bytes_per_element(self) -> usize {
        self.components_per_element()
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StreamError::UnsupportedFormat { name: s.to_string() })
    }
}

/// Scalar sample type that can be written to a stream.
pub trait TxSample: Copy + Send + Sync + 'static {
    const COMPONENT: Component;

    /// Converts one component to the unsigned 8-bit native value.
    fn to_native(self) -> u8;

    /// Raw bit pattern used to index a lookup table; `None` for types that
    /// are always converted arithmetically.
    fn table_index(self) -> Option<u16>;
}

/// Integer sample types whose every bit pattern can be enumerated.
pub(crate) trait IntSample: TxSample {
    fn from_bits(bits: u16) -> Self;
}

impl TxSample for f32 {
    const COMPONENT: Component = Component::F32;

    fn to_native(self) -> u8 {
        crate::convert::f32_to_native(self)
    }

    fn table_index(self) -> Option<u16> {
        None
    }
}

impl TxSample for i16 {
    const COMPONENT: Component = Component::S16;

    fn to_native(self) -> u8 {
        crate::convert::i16_to_native(self)
    }

    fn table_index(self) -> Option<u16> {
        Some(self as u16)
    }
}

impl IntSample for i16 {
    fn from_bits(bits: u16) -> Self {
        bits as i16
    }
}

impl TxSample for i8 {
    const COMPONENT: Component = Component::S8;

    fn to_native(self) -> u8 {
        crate::convert::i8_to_native(self)
    }

    fn table_index(self) -> Option<u16> {
        Some(self as u8 as u16)
    }
}

impl IntSample for i8 {
    fn from_bits(bits: u16) -> Self {
        bits as u8 as i8
    }
}

impl TxSample for u16 {
    const COMPONENT: Component = Component::U16;

    fn to_native(self) -> u8 {
        crate::convert::u16_to_native(self)
    }

    fn table_index(self) -> Option<u16> {
        Some(self)
    }
}

impl IntSample for u16 {
    fn from_bits(bits: u16) -> Self {
        bits
    }
}

impl TxSample for u8 {
    const COMPONENT: Component = Component::U8;

    fn to_native(self) -> u8 {
        self
    }

    fn table_index(self) -> Option<u16> {
        Some(self as u16)
    }
}

impl IntSample for u8 {
    fn from_bits(bits: u16) -> Self {
        bits as u8
    }
}
