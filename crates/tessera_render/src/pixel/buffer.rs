//! Owned pixel grid.

use super::Pixel;
use crate::geometry::{Rect, Size};

/// Row-major pixel grid with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer<P: Pixel> {
    size: Size,
    data: Vec<P>,
}

impl<P: Pixel> PixelBuffer<P> {
    /// Creates a buffer filled with the default pixel (index 0 / transparent).
    #[must_use]
    pub fn new(size: Size) -> Self {
        let len = size.area() as usize;
        Self {
            size,
            data: vec![P::default(); len],
        }
    }

    /// Wraps existing pixel data.
    ///
    /// # Panics
    ///
    /// Panics if `data` does not hold exactly `width * height` pixels.
    #[must_use]
    pub fn from_pixels(size: Size, data: Vec<P>) -> Self {
        assert_eq!(
            data.len() as u64,
            size.area(),
            "pixel data length does not match {}x{}",
            size.width,
            size.height
        );
        Self { size, data }
    }

    /// Buffer dimensions.
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// All pixels, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[P] {
        &self.data
    }

    /// All pixels, mutable.
    pub fn pixels_mut(&mut self) -> &mut [P] {
        &mut self.data
    }

    /// Raw bytes for upload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Raw bytes, mutable (read-back target).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Pixel at `(x, y)`, or `None` outside the buffer.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<P> {
        self.index(x, y).map(|i| self.data[i])
    }

    /// Writes the pixel at `(x, y)`; writes outside the buffer are ignored.
    pub fn set(&mut self, x: u32, y: u32, pixel: P) {
        if let Some(i) = self.index(x, y) {
            self.data[i] = pixel;
        }
    }

    /// Overwrites every pixel.
    pub fn fill(&mut self, pixel: P) {
        self.data.fill(pixel);
    }

    /// Copies out a sub-rectangle as tightly packed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `region` is not within the buffer.
    #[must_use]
    pub fn region_bytes(&self, region: Rect) -> Vec<u8> {
        assert!(region.within(self.size), "region outside pixel buffer");
        let row_bytes = region.width as usize * P::FORMAT.bytes_per_pixel();
        let mut out = Vec::with_capacity(row_bytes * region.height as usize);
        for row in region.y..region.bottom() {
            let start = (row * self.size.width + region.x) as usize;
            let end = start + region.width as usize;
            out.extend_from_slice(bytemuck::cast_slice(&self.data[start..end]));
        }
        out
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.size.width && y < self.size.height)
            .then(|| (y * self.size.width + x) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::Rgba8;

    #[test]
    fn test_get_set_bounds() {
        let mut buffer = PixelBuffer::<u8>::new(Size::new(4, 2));
        buffer.set(3, 1, 7);
        buffer.set(4, 1, 9);

        assert_eq!(buffer.get(3, 1), Some(7));
        assert_eq!(buffer.get(4, 1), None);
        assert_eq!(buffer.pixels().iter().filter(|&&p| p != 0).count(), 1);
    }

    #[test]
    fn test_region_bytes() {
        let mut buffer = PixelBuffer::<Rgba8>::new(Size::new(3, 3));
        buffer.set(1, 1, Rgba8::new(10, 20, 30, 40));
        buffer.set(2, 2, Rgba8::WHITE);

        let bytes = buffer.region_bytes(Rect::new(1, 1, 2, 2));
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[10, 20, 30, 40]);
        assert_eq!(&bytes[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_from_pixels_rejects_wrong_length() {
        let _ = PixelBuffer::<u8>::from_pixels(Size::new(2, 2), vec![0; 3]);
    }
}
