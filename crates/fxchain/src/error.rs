use std::path::PathBuf;

use thiserror::Error;

/// A fragment shader failed to compile; the previous program stays bound.
#[derive(Debug, Clone, Error)]
#[error("shader for {label} failed to compile: {log}")]
pub struct ShaderError {
    pub label: String,
    pub log: String,
}

impl ShaderError {
    pub fn new(label: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            log: log.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("shader resource '{0}' could not be found")]
    NotFound(String),

    #[error("failed to read shader resource {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid resource path '{name}': {reason}")]
    InvalidPath { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("render target size must be positive, got {width}x{height}")]
    NonPositive { width: f64, height: f64 },

    #[error("render target size {width}x{height} exceeds the supported maximum of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EffectError {
    #[error("parameter '{parameter}' does not apply to the {kind} effect")]
    UnknownParameter {
        kind: &'static str,
        parameter: String,
    },

    #[error("parameter '{parameter}' expects {expected}")]
    WrongValue {
        parameter: String,
        expected: &'static str,
    },

    #[error("parameter '{parameter}' must be finite, got {value}")]
    NonFinite { parameter: String, value: f32 },

    #[error("channel index {0} is out of range (expected 0, 1, or 2)")]
    ChannelOutOfRange(u8),
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("unknown {kind} handle #{id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("failed to allocate {label}: {reason}")]
    Allocation { label: String, reason: String },

    #[error("no capture is active")]
    NoCapture,

    #[error("no frame is active; begin a frame before drawing to the screen")]
    NoFrame,

    #[error("failed to read back {label}: {reason}")]
    Readback { label: String, reason: String },
}

/// Failures surfaced by chain-level operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
