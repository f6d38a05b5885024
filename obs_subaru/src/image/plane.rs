//! A single pixel plane with an origin in parent coordinates, plus
//! borrowed sub-views.

use common::buffer2::Buffer2;
use glam::IVec2;

use crate::geom::Box2I;

/// Rectangular pixel grid whose `(0, 0)` sits at `origin` in parent coordinates.
///
/// Methods taking `(x, y)` use local coordinates; methods taking a [`Box2I`]
/// use parent coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T = f32> {
    origin: IVec2,
    data: Buffer2<T>,
}

impl<T: Default + Clone> Image<T> {
    pub fn new(bbox: Box2I) -> Self {
        Self {
            origin: bbox.min,
            data: Buffer2::new_default(bbox.width(), bbox.height()),
        }
    }
}

impl<T: Clone> Image<T> {
    pub fn new_filled(bbox: Box2I, value: T) -> Self {
        Self {
            origin: bbox.min,
            data: Buffer2::new_filled(bbox.width(), bbox.height(), value),
        }
    }

    #[inline]
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> Image<T> {
    pub fn from_buffer(origin: IVec2, data: Buffer2<T>) -> Self {
        Self { origin, data }
    }

    #[inline]
    pub fn origin(&self) -> IVec2 {
        self.origin
    }

    #[inline]
    pub fn bbox(&self) -> Box2I {
        Box2I::from_corner_size(self.origin.x, self.origin.y, self.width(), self.height())
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.height()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        self.data.get(x, y)
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        self.data.get_mut(x, y)
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer2<T> {
        &self.data
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut Buffer2<T> {
        &mut self.data
    }

    #[inline]
    pub fn into_buffer(self) -> Buffer2<T> {
        self.data
    }

    /// Local coordinates of `bbox` inside this image.
    ///
    /// # Panics
    /// If `bbox` is not fully contained in the image.
    fn local_rect(&self, bbox: &Box2I) -> (usize, usize) {
        assert!(
            self.bbox().contains_box(bbox),
            "sub-box {} outside image {}",
            bbox,
            self.bbox()
        );
        (
            (bbox.min.x - self.origin.x) as usize,
            (bbox.min.y - self.origin.y) as usize,
        )
    }

    pub fn view(&self, bbox: Box2I) -> ImageView<'_, T> {
        let (x0, y0) = self.local_rect(&bbox);
        ImageView {
            data: &self.data,
            x0,
            y0,
            width: bbox.width(),
            height: bbox.height(),
            flip_x: false,
        }
    }

    pub fn view_mut(&mut self, bbox: Box2I) -> ImageViewMut<'_, T> {
        let (x0, y0) = self.local_rect(&bbox);
        ImageViewMut {
            data: &mut self.data,
            x0,
            y0,
            width: bbox.width(),
            height: bbox.height(),
            flip_x: false,
        }
    }
}

impl Image<f32> {
    pub fn add_scalar(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v += value);
    }

    pub fn mul_scalar(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v *= value);
    }

    /// Pixel-wise `self -= other`; both images must share a bbox.
    pub fn sub_image(&mut self, other: &Image<f32>) {
        assert_eq!(self.bbox(), other.bbox(), "bbox mismatch");
        self.data.zip_apply(&other.data, |dst, src| *dst -= *src);
    }

    /// Sum in f64 so large frames do not lose precision.
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }
}

/// Read-only window into an [`Image`].
///
/// With `flip_x` set, local column 0 maps to the rightmost column of the
/// window. No pixels are copied.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a, T> {
    data: &'a Buffer2<T>,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    flip_x: bool,
}

impl<'a, T> ImageView<'a, T> {
    /// Same window with columns traversed in the opposite direction.
    pub fn flipped_x(self) -> Self {
        Self {
            flip_x: !self.flip_x,
            ..self
        }
    }

    #[inline]
    pub fn is_flipped(&self) -> bool {
        self.flip_x
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn column(&self, x: usize) -> usize {
        debug_assert!(x < self.width);
        if self.flip_x {
            self.x0 + self.width - 1 - x
        } else {
            self.x0 + x
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &'a T {
        debug_assert!(y < self.height);
        self.data.get(self.column(x), self.y0 + y)
    }

    /// Row `y` in storage order, ignoring `flip_x`.
    #[inline]
    pub fn storage_row(&self, y: usize) -> &'a [T] {
        &self.data.row(self.y0 + y)[self.x0..self.x0 + self.width]
    }
}

impl<T: Copy> ImageView<'_, T> {
    /// Copy into an owned buffer in view order (flip applied).
    pub fn to_buffer(&self) -> Buffer2<T> {
        Buffer2::from_fn(self.width, self.height, |x, y| *self.get(x, y))
    }
}

/// Mutable window into an [`Image`]; see [`ImageView`].
#[derive(Debug)]
pub struct ImageViewMut<'a, T> {
    data: &'a mut Buffer2<T>,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    flip_x: bool,
}

impl<'a, T> ImageViewMut<'a, T> {
    pub fn flipped_x(self) -> Self {
        Self {
            flip_x: !self.flip_x,
            ..self
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn column(&self, x: usize) -> usize {
        debug_assert!(x < self.width);
        if self.flip_x {
            self.x0 + self.width - 1 - x
        } else {
            self.x0 + x
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        self.data.get(self.column(x), self.y0 + y)
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        let col = self.column(x);
        self.data.get_mut(col, self.y0 + y)
    }

    /// Visit every pixel with its view-local coordinates.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, usize, &mut T)) {
        for y in 0..self.height {
            let row = &mut self.data.row_mut(self.y0 + y)[self.x0..self.x0 + self.width];
            if self.flip_x {
                for (x, v) in row.iter_mut().rev().enumerate() {
                    f(x, y, v);
                }
            } else {
                for (x, v) in row.iter_mut().enumerate() {
                    f(x, y, v);
                }
            }
        }
    }
}

impl<T: Clone> ImageViewMut<'_, T> {
    pub fn fill(&mut self, value: T) {
        for y in 0..self.height {
            self.data.row_mut(self.y0 + y)[self.x0..self.x0 + self.width].fill(value.clone());
        }
    }
}

impl ImageViewMut<'_, f32> {
    pub fn sub_scalar(&mut self, value: f32) {
        self.for_each_mut(|_, _, v| *v -= value);
    }

    /// Subtract a same-shaped buffer given in view order.
    pub fn sub_buffer(&mut self, other: &Buffer2<f32>) {
        assert_eq!(other.width(), self.width, "width mismatch");
        assert_eq!(other.height(), self.height, "height mismatch");
        self.for_each_mut(|x, y, v| *v -= other[(x, y)]);
    }
}
