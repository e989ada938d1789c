use std::{fmt, io};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which allocator ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Device-resident global memory.
    Global,
    /// Page-locked host memory registered for transfers.
    Pinned,
    /// Ordinary host memory.
    Host,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryKind::Global => "global",
            MemoryKind::Pinned => "pinned",
            MemoryKind::Host => "host",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "{bins} bins need {required} bytes of on-chip memory per execution unit, \
         device provides {available}"
    )]
    SharedMemoryExceeded {
        bins: usize,
        required: usize,
        available: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("out of {memory} memory: requested {requested} bytes, {available} available")]
    ResourceExhausted {
        memory: MemoryKind,
        requested: u64,
        available: u64,
    },

    #[error("no compute device: {0}")]
    DeviceUnavailable(String),

    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error("input holds {actual} samples, expected {expected}")]
    TruncatedInput { expected: usize, actual: usize },

    #[error("sample {index} has value {value}, outside [0, {bins})")]
    SampleOutOfRange { index: usize, value: i32, bins: usize },

    #[error("histogram mismatch at bin {bin}: expected {expected}, got {actual}")]
    Mismatch { bin: usize, expected: i32, actual: i32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
