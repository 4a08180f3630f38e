//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a graphics backend's diagnostic channel.
///
/// These describe programmer or environment bugs. Render targets log them
/// and never try to recover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsApiError {
    /// A handle did not resolve to a live resource.
    #[error("invalid {kind} handle (index {index}, generation {generation})")]
    InvalidHandle {
        kind: &'static str,
        index: u32,
        generation: u32,
    },
    /// A call was made with arguments the API rejects.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A call was made while the context was in the wrong state for it.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Validation error raised by the driver.
    #[error("validation error: {0}")]
    Validation(String),
    /// The driver ran out of memory.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("graphics API error: {0}")]
    Graphics(#[from] GraphicsApiError),

    /// Reading the color texture back to host memory failed.
    #[error("texture readback failed: {0}")]
    Readback(String),

    #[error("failed to encode image for {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `activate` called on a target that is already the bound render target.
    #[error("render target is already active")]
    AlreadyActive,

    /// `deactivate` called without a matching `activate`.
    #[error("render target is not active")]
    NotActive,

    #[error("invalid render target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("failed to create shader program `{label}`: {message}")]
    Shader { label: String, message: String },

    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
