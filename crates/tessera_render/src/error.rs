//! # Render Error Types
//!
//! All recoverable errors that can occur in the sprite renderer.
//!
//! Contract violations (a sprite larger than an atlas page, a pixel buffer of
//! the wrong length) are not represented here: they panic.

use thiserror::Error;

/// Errors reported by a graphics driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The backend could not be initialised on this machine.
    #[error("backend probe failed: {0}")]
    ProbeFailed(String),

    /// A handle did not name a live object of the expected kind.
    #[error("unknown gpu object: {0}")]
    UnknownObject(String),

    /// A region falls outside the texture or target it addresses.
    #[error("region {x},{y} {width}x{height} outside {limit_width}x{limit_height}")]
    InvalidRegion {
        /// Left edge of the region.
        x: u32,
        /// Top edge of the region.
        y: u32,
        /// Region width.
        width: u32,
        /// Region height.
        height: u32,
        /// Width of the addressed object.
        limit_width: u32,
        /// Height of the addressed object.
        limit_height: u32,
    },

    /// The driver cannot store the requested pixel format.
    #[error("unsupported texture format: {0}")]
    UnsupportedFormat(String),

    /// The driver refused an allocation.
    #[error("out of gpu memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Size of the refused allocation.
        bytes: usize,
    },
}

/// Errors from the atlas allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AtlasError {
    /// Placing the sprite would exceed the page limit.
    #[error("atlas page limit reached: {limit} pages")]
    PageLimit {
        /// Maximum number of pages for this atlas.
        limit: usize,
    },
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid TOML for [`crate::RendererConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level renderer error.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Every backend in the preference list failed to probe.
    #[error("no usable rendering backend (tried: {})", tried.join(", "))]
    NoBackend {
        /// Backend names in the order they were attempted.
        tried: Vec<String>,
    },

    /// A driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The atlas allocator failed.
    #[error(transparent)]
    Atlas(#[from] AtlasError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A GPU call was attempted off the renderer's bound thread.
    #[error("gpu access from a thread other than the bound thread")]
    WrongThread,

    /// The renderer owning the driver has been torn down.
    #[error("renderer has been shut down")]
    RendererGone,
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
