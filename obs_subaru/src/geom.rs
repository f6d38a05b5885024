//! Integer bounding boxes in parent (assembled CCD) pixel coordinates.

use glam::IVec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned integer box with inclusive bounds.
///
/// A pixel at (x, y) is inside if `min.x <= x <= max.x` and
/// `min.y <= y <= max.y`. Coordinates may be negative because image
/// origins are arbitrary in parent coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Box2I {
    pub min: IVec2,
    pub max: IVec2,
}

impl Box2I {
    #[inline]
    pub const fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    /// Box starting at `(x0, y0)` with the given extent. Zero extent is not representable.
    #[inline]
    pub fn from_corner_size(x0: i32, y0: i32, width: usize, height: usize) -> Self {
        debug_assert!(width > 0 && height > 0);
        Self {
            min: IVec2::new(x0, y0),
            max: IVec2::new(x0 + width as i32 - 1, y0 + height as i32 - 1),
        }
    }

    #[inline]
    pub const fn x0(&self) -> i32 {
        self.min.x
    }

    #[inline]
    pub const fn y0(&self) -> i32 {
        self.min.y
    }

    /// One past the last column.
    #[inline]
    pub const fn x_end(&self) -> i32 {
        self.max.x + 1
    }

    #[inline]
    pub const fn y_end(&self) -> i32 {
        self.max.y + 1
    }

    #[inline]
    pub const fn width(&self) -> usize {
        (self.max.x - self.min.x + 1) as usize
    }

    #[inline]
    pub const fn height(&self) -> usize {
        (self.max.y - self.min.y + 1) as usize
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    #[inline]
    pub fn contains_box(&self, other: &Box2I) -> bool {
        self.contains(other.min.x, other.min.y) && self.contains(other.max.x, other.max.y)
    }

    #[inline]
    pub fn overlaps(&self, other: &Box2I) -> bool {
        self.intersection(other).is_some()
    }

    pub fn intersection(&self, other: &Box2I) -> Option<Box2I> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min.x <= max.x && min.y <= max.y).then_some(Box2I { min, max })
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Box2I) -> Box2I {
        Box2I {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Same box moved by `offset`.
    #[inline]
    pub fn shifted(&self, offset: IVec2) -> Box2I {
        Box2I {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Corner pixels in order lower-left, lower-right, upper-right, upper-left.
    pub fn corners(&self) -> [IVec2; 4] {
        [
            self.min,
            IVec2::new(self.max.x, self.min.y),
            self.max,
            IVec2::new(self.min.x, self.max.y),
        ]
    }
}

impl std::fmt::Display for Box2I {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}..={}, {}..={}]",
            self.min.x, self.max.x, self.min.y, self.max.y
        )
    }
}
