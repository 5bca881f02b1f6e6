use std::collections::BTreeMap;
use std::str::FromStr;

use fl2k_driver::TransmitDriver;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ring slots used when the caller does not ask for a count.
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// Smallest ring that can stream: the driver holds one slot while the writer
/// fills another.
pub const MIN_BUFFER_COUNT: usize = 2;

/// Caller-facing stream arguments.
///
/// Values are taken as given; [`StreamConfig`](super::StreamConfig) validates
/// them against the driver at setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamArgs {
    /// Bytes per channel buffer. `None` uses the driver default.
    pub bufflen: Option<usize>,
    /// Slots in the exchange ring.
    pub buffers: usize,
    /// In-flight transfer buffers inside the driver; `0` uses the driver default.
    #[serde(rename = "asyncBuffs", alias = "async_buffs")]
    pub async_buffs: u32,
    /// Swap I and Q of complex samples.
    pub iq_swap: bool,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            bufflen: None,
            buffers: DEFAULT_BUFFER_COUNT,
            async_buffs: 0,
            iq_swap: false,
        }
    }
}

impl StreamArgs {
    /// Reads the string key/value form (`bufflen`, `buffers`, `asyncBuffs`,
    /// `iq_swap`). Unknown keys are ignored; unparseable or non-positive
    /// numbers keep the default.
    pub fn from_kwargs(kwargs: &BTreeMap<String, String>) -> Self {
        let mut args = Self::default();
        if let Some(value) = kwargs.get("bufflen") {
            if let Some(len) = positive::<usize>("bufflen", value) {
                args.bufflen = Some(len);
            }
        }
        if let Some(value) = kwargs.get("buffers") {
            if let Some(count) = positive::<usize>("buffers", value) {
                args.buffers = count;
            }
        }
        if let Some(value) = kwargs.get("asyncBuffs") {
            if let Some(count) = positive::<u32>("asyncBuffs", value) {
                args.async_buffs = count;
            }
        }
        if let Some(value) = kwargs.get("iq_swap") {
            match parse_bool(value) {
                Some(swap) => args.iq_swap = swap,
                None => warn!(key = "iq_swap", value, "ignoring non-boolean stream argument"),
            }
        }
        args
    }

    /// Describes the accepted arguments with the defaults `driver` implies.
    pub fn arg_info(driver: &dyn TransmitDriver) -> Vec<ArgInfo> {
        vec![
            ArgInfo {
                key: "bufflen",
                value: driver
                    .required_buffer_len()
                    .unwrap_or(driver.default_buffer_len())
                    .to_string(),
                name: "Buffer Size",
                description: match driver.required_buffer_len() {
                    Some(required) => {
                        format!("Number of bytes per buffer, fixed at {required} on this device.")
                    },
                    None => format!(
                        "Number of bytes per buffer, multiples of {} only.",
                        driver.buffer_alignment()
                    ),
                },
                units: "bytes",
                kind: ArgKind::Int,
            },
            ArgInfo {
                key: "buffers",
                value: DEFAULT_BUFFER_COUNT.to_string(),
                name: "Ring buffers",
                description: format!("Number of buffers in the ring, at least {MIN_BUFFER_COUNT}."),
                units: "buffers",
                kind: ArgKind::Int,
            },
            ArgInfo {
                key: "asyncBuffs",
                value: "0".to_string(),
                name: "Async buffers",
                description: "Number of async usb buffers (advanced).".to_string(),
                units: "buffers",
                kind: ArgKind::Int,
            },
            ArgInfo {
                key: "iq_swap",
                value: "false".to_string(),
                name: "I/Q Swap",
                description: "Swap I and Q of complex samples.".to_string(),
                units: "",
                kind: ArgKind::Bool,
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Bool,
    Int,
}

/// Descriptor of one stream argument, for front-ends that list them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgInfo {
    pub key: &'static str,
    /// Default value in string form.
    pub value: String,
    pub name: &'static str,
    pub description: String,
    pub units: &'static str,
    #[serde(rename = "type")]
    pub kind: ArgKind,
}

fn positive<T>(key: &'static str, value: &str) -> Option<T>
where
    T: FromStr + Default + PartialOrd,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Some(parsed),
        _ => {
            warn!(key, value, "ignoring invalid stream argument");
            None
        },
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
