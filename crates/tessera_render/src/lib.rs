//! # Tessera Sprite Renderer
//!
//! GPU resource manager for 2D sprite rendering:
//! - Skyline-packed texture atlases so thousands of sprites share one binding
//! - Ring-buffered batching with one instanced draw per flush
//! - Image, palette and surface handles that can be dropped from any thread
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Renderer                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  small image → Atlas (skyline) → BatchAccumulator → instanced │
//! │  large / linear / surface      → direct textured quad        │
//! │  rect / line                   → shape draw                  │
//! │       ↓                                                      │
//! │  Reclaimer ── owns GpuDriver, deletes on the bound thread    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! The [`Renderer`] and its driver live on the thread that created them.
//! [`RgbImage`], [`PaletteImage`], [`Palette`] and [`Surface`] are `Send +
//! Sync`; dropping the last handle on another thread queues the GPU objects
//! for deletion at the renderer's next [`Renderer::flush`].
//!
//! ## Example
//!
//! ```
//! use tessera_render::{Renderer, RendererConfig, RgbImage, Rgba8, Size, SoftwareFactory, Vec2};
//!
//! let factory = SoftwareFactory::full();
//! let mut renderer = Renderer::new(RendererConfig::default(), &[&factory]).unwrap();
//!
//! let sprite = RgbImage::from_pixels(Size::new(2, 2), vec![Rgba8::WHITE; 4]);
//! renderer.draw(&sprite, Vec2::new(10.0, 10.0)).unwrap();
//! let report = renderer.flush().unwrap();
//! assert_eq!(report.instances, 1);
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod atlas;
pub mod batch;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod image;
pub mod pixel;
pub mod reclaim;
pub mod renderer;

pub use atlas::{Atlas, AtlasEntry, RepackReport};
pub use batch::{BatchAccumulator, BatchDescriptor, BatchStats, FlushReport};
pub use config::{AtlasConfig, BatchConfig, RendererConfig, ScreenConfig};
pub use error::{AtlasError, ConfigError, DriverError, RenderError, RenderResult};
pub use geometry::{Rect, Size, Vec2, Viewport};
pub use gpu::{
    Capabilities, DrawRecord, DriverFactory, GpuDriver, Scaler, SoftwareDevice, SoftwareDriver,
    SoftwareFactory, UploadRecord,
};
pub use image::{Image, ImageRef, Palette, PaletteImage, RgbImage, Surface};
pub use pixel::{Colour, LockMode, PixelBuffer, PixelFormat, PixelLock, Rgba8};
pub use reclaim::{ReclaimHandle, ReclaimStats, Reclaimer, Release};
pub use renderer::{AtlasStats, RenderStats, Renderer};
