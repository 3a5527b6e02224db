//! Renderer configuration.
//!
//! Loaded once at startup from TOML. Every section has defaults, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! backends = ["software", "software-basic"]
//!
//! [screen]
//! width = 640
//! height = 480
//!
//! [atlas]
//! page_size = 2048
//! max_sprite_size = 256
//! max_pages = 16
//! repack_dead_ratio = 0.5
//!
//! [batch]
//! capacity = 16384
//! ring_size = 3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Backend names in preference order.
    pub backends: Vec<String>,
    /// Default surface (screen) settings.
    pub screen: ScreenConfig,
    /// Atlas allocator settings.
    pub atlas: AtlasConfig,
    /// Batch accumulator settings.
    pub batch: BatchConfig,
}

/// Size of the default surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Atlas allocator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Edge length of each square page.
    pub page_size: u32,
    /// Images with either dimension above this use the direct path.
    pub max_sprite_size: u32,
    /// Upper bound on pages, further clamped by the driver's layer limit.
    pub max_pages: usize,
    /// Dead-entry fraction at which the atlas repacks instead of growing.
    /// Values of 1.0 or more disable automatic repacking.
    pub repack_dead_ratio: f32,
}

/// Batch accumulator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Descriptors per sprite buffer.
    pub capacity: usize,
    /// Number of sprite buffers in the ring.
    pub ring_size: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backends: vec!["software".to_owned()],
            screen: ScreenConfig::default(),
            atlas: AtlasConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            page_size: 2048,
            max_sprite_size: 256,
            max_pages: 16,
            repack_dead_ratio: 0.5,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: 16_384,
            ring_size: 3,
        }
    }
}

impl RendererConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`RendererConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid("backends must not be empty".into()));
        }
        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(ConfigError::Invalid("screen size must be non-zero".into()));
        }
        if self.atlas.page_size == 0 {
            return Err(ConfigError::Invalid("atlas.page_size must be non-zero".into()));
        }
        if self.atlas.max_sprite_size > self.atlas.page_size {
            return Err(ConfigError::Invalid(format!(
                "atlas.max_sprite_size {} exceeds atlas.page_size {}",
                self.atlas.max_sprite_size, self.atlas.page_size
            )));
        }
        if self.atlas.max_pages == 0 {
            return Err(ConfigError::Invalid("atlas.max_pages must be non-zero".into()));
        }
        let ratio = self.atlas.repack_dead_ratio;
        if ratio.is_nan() || ratio < 0.0 {
            return Err(ConfigError::Invalid(
                "atlas.repack_dead_ratio must be a non-negative number".into(),
            ));
        }
        if self.batch.capacity == 0 {
            return Err(ConfigError::Invalid("batch.capacity must be non-zero".into()));
        }
        if self.batch.ring_size == 0 {
            return Err(ConfigError::Invalid("batch.ring_size must be non-zero".into()));
        }
        Ok(())
    }
}
