//! Precomputed conversion tables for swapped complex layouts.

use crate::format::{Component, IntSample};

const TABLE_LEN: usize = 1 << 16;

/// Table chosen for the configured interleave width.
pub(crate) enum LookupTable {
    /// 8-bit components: indexed by the interleaved `I | Q << 8` word, yields
    /// the swapped native pair `[Q, I]`.
    Pairs(Box<[[u8; 2]]>),
    /// 16-bit components: indexed by one component's bits.
    Components(Box<[u8]>),
}

impl LookupTable {
    /// Builds the table for `component`, or `None` when it is converted
    /// arithmetically.
    pub(crate) fn for_component(component: Component) -> Option<Self> {
        match component {
            Component::S8 => Some(Self::Pairs(build_pairs::<i8>())),
            Component::U8 => Some(Self::Pairs(build_pairs::<u8>())),
            Component::S16 => Some(Self::Components(build_components::<i16>())),
            Component::U16 => Some(Self::Components(build_components::<u16>())),
            Component::F32 => None,
        }
    }
}

fn build_pairs<S: IntSample>() -> Box<[[u8; 2]]> {
    (0..TABLE_LEN)
        .map(|word| {
            let i = S::from_bits(word as u16 & 0x00ff);
            let q = S::from_bits(word as u16 >> 8);
            [q.to_native(), i.to_native()]
        })
        .collect()
}

fn build_components<S: IntSample>() -> Box<[u8]> {
    (0..TABLE_LEN)
        .map(|bits| S::from_bits(bits as u16).to_native())
        .collect()
}
