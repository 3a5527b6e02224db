//! Skyline rectangle packer.
//!
//! The free space of a page is described by its upper outline: a list of
//! horizontal segments ordered by `x`, each covering `[x, x + width)` and
//! filled up to `y`. A rectangle is placed on top of the outline where it
//! lands lowest; ties go to the spot wasting the least area underneath, then
//! to the leftmost one.

use crate::geometry::Size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    x: u32,
    width: u32,
    y: u32,
}

/// Candidate position for a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Fit {
    y: u32,
    waste: u64,
    x: u32,
    index: usize,
}

/// Skyline packing context for one page.
#[derive(Debug, Clone)]
pub struct Skyline {
    size: Size,
    segments: Vec<Segment>,
    used: u64,
}

impl Skyline {
    /// Empty page of `size`.
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self {
            size,
            segments: vec![Segment {
                x: 0,
                width: size.width,
                y: 0,
            }],
            used: 0,
        }
    }

    /// Page dimensions.
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// Fraction of the page covered by placed rectangles.
    #[must_use]
    pub fn occupancy(&self) -> f32 {
        self.used as f32 / self.size.area().max(1) as f32
    }

    /// Places a `width x height` rectangle, returning its top-left corner.
    ///
    /// Returns `None` if it does not fit anywhere on the page.
    pub fn insert(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        if width == 0 || height == 0 {
            return Some((0, 0));
        }
        let fit = (0..self.segments.len())
            .filter_map(|index| self.fit(index, width, height))
            .min()?;
        self.place(fit, width, height);
        self.used += u64::from(width) * u64::from(height);
        Some((fit.x, fit.y))
    }

    /// Evaluates placing the rectangle's left edge at segment `index`.
    fn fit(&self, index: usize, width: u32, height: u32) -> Option<Fit> {
        let x = self.segments[index].x;
        if x + width > self.size.width {
            return None;
        }

        let right = x + width;
        let mut y = 0;
        for segment in self.segments[index..].iter().take_while(|s| s.x < right) {
            y = y.max(segment.y);
        }
        if y + height > self.size.height {
            return None;
        }

        let waste = self.segments[index..]
            .iter()
            .take_while(|s| s.x < right)
            .map(|s| {
                let covered = (s.x + s.width).min(right) - s.x;
                u64::from(y - s.y) * u64::from(covered)
            })
            .sum();

        Some(Fit { y, waste, x, index })
    }

    fn place(&mut self, fit: Fit, width: u32, height: u32) {
        let right = fit.x + width;
        let top = Segment {
            x: fit.x,
            width,
            y: fit.y + height,
        };

        // Drop or trim every segment the new one shadows.
        let mut end = fit.index;
        while end < self.segments.len() && self.segments[end].x < right {
            let segment = &mut self.segments[end];
            let segment_right = segment.x + segment.width;
            if segment_right <= right {
                end += 1;
            } else {
                segment.width = segment_right - right;
                segment.x = right;
                break;
            }
        }
        self.segments.splice(fit.index..end, std::iter::once(top));
        self.merge();
    }

    fn merge(&mut self) {
        let mut i = 0;
        while i + 1 < self.segments.len() {
            if self.segments[i].y == self.segments[i + 1].y {
                self.segments[i].width += self.segments[i + 1].width;
                self.segments.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_rows_bottom_up() {
        let mut skyline = Skyline::new(Size::new(128, 128));

        assert_eq!(skyline.insert(64, 64), Some((0, 0)));
        assert_eq!(skyline.insert(64, 64), Some((64, 0)));
        assert_eq!(skyline.insert(64, 64), Some((0, 64)));
        assert_eq!(skyline.insert(64, 64), Some((64, 64)));
        assert_eq!(skyline.insert(1, 1), None);
        assert!((skyline.occupancy() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_prefers_lowest_then_least_waste() {
        let mut skyline = Skyline::new(Size::new(100, 100));
        skyline.insert(30, 50).unwrap();
        skyline.insert(30, 20).unwrap();
        // Outline: [0,30)@50 [30,60)@20 [60,100)@0

        // The lowest spot is the untouched tail.
        assert_eq!(skyline.insert(40, 10), Some((60, 0)));
        // Outline: [0,30)@50 [30,60)@20 [60,100)@10
        // A 70-wide box lands at y=20 from x=30 rather than y=50 from x=0.
        assert_eq!(skyline.insert(70, 5), Some((30, 20)));
    }

    #[test]
    fn test_segments_merge() {
        let mut skyline = Skyline::new(Size::new(64, 64));
        skyline.insert(32, 16).unwrap();
        skyline.insert(32, 16).unwrap();
        assert_eq!(skyline.segments.len(), 1);
        assert_eq!(skyline.segments[0].y, 16);
    }

    #[test]
    fn test_rejects_oversized() {
        let mut skyline = Skyline::new(Size::new(64, 64));
        assert_eq!(skyline.insert(65, 1), None);
        assert_eq!(skyline.insert(1, 65), None);
    }
}
