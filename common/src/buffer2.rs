//! Row-major 2-D storage used for image, mask and variance planes.

use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every pixel in row-major order.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
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
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }

    /// One row of pixels.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        debug_assert!(y < self.height);
        let start = y * self.width;
        &self.pixels[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        debug_assert!(y < self.height);
        let start = y * self.width;
        &mut self.pixels[start..start + self.width]
    }

    /// Iterate rows top to bottom. A zero-width buffer yields no rows.
    #[inline]
    pub fn rows(&self) -> slice::ChunksExact<'_, T> {
        self.pixels.chunks_exact(self.width.max(1))
    }

    #[inline]
    pub fn rows_mut(&mut self) -> slice::ChunksExactMut<'_, T> {
        self.pixels.chunks_exact_mut(self.width.max(1))
    }

    /// Parallel mutable row iterator; each row is handed to exactly one worker.
    #[inline]
    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksExactMut<'_, T>
    where
        T: Send,
    {
        self.pixels.par_chunks_exact_mut(self.width.max(1))
    }

    /// Apply `f` to every pixel, producing a buffer of the same shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Element-wise combination with another buffer of identical shape.
    pub fn zip_apply<U>(&mut self, other: &Buffer2<U>, mut f: impl FnMut(&mut T, &U)) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
        for (dst, src) in self.pixels.iter_mut().zip(other.pixels.iter()) {
            f(dst, src);
        }
    }
}

impl<T: Copy> Buffer2<T> {
    pub fn copy_from(&mut self, other: &Self) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
        self.pixels.copy_from_slice(&other.pixels);
    }

    /// Copy out the rectangle `[x0, x0 + width) × [y0, y0 + height)`.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        assert!(
            x0 + width <= self.width && y0 + height <= self.height,
            "crop {}x{}+{}+{} exceeds buffer {}x{}",
            width,
            height,
            x0,
            y0,
            self.width,
            self.height
        );
        let mut pixels = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            pixels.extend_from_slice(&self.row(y)[x0..x0 + width]);
        }
        Self {
            pixels,
            width,
            height,
        }
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![T::default(); width * height],
            width,
            height,
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn fill(&mut self, value: T) {
        self.pixels.fill(value);
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

impl<T> DerefMut for Buffer2<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pixels
    }
}

impl<'a, T> IntoIterator for &'a Buffer2<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Buffer2<T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter_mut()
    }
}

impl<T> From<Buffer2<T>> for Vec<T> {
    #[inline]
    fn from(buffer: Buffer2<T>) -> Self {
        buffer.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let buf = Buffer2::from_fn(3, 2, |x, y| (10 * y + x) as i32);
        assert_eq!(buf.pixels(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(buf[(2, 1)], 12);
    }

    #[test]
    fn test_rows() {
        let buf = Buffer2::new(2, 3, vec![1, 2, 3, 4, 5, 6]);
        let rows: Vec<&[i32]> = buf.rows().collect();
        assert_eq!(rows, vec![&[1, 2][..], &[3, 4][..], &[5, 6][..]]);
        assert_eq!(buf.row(1), &[3, 4]);
    }

    #[test]
    fn test_par_rows_mut_touches_each_row_once() {
        let mut buf = Buffer2::new_filled(4, 5, 0usize);
        buf.par_rows_mut().enumerate().for_each(|(y, row)| {
            for v in row.iter_mut() {
                *v += y;
            }
        });
        for y in 0..5 {
            assert!(buf.row(y).iter().all(|&v| v == y));
        }
    }

    #[test]
    fn test_crop() {
        let buf = Buffer2::from_fn(4, 4, |x, y| (y * 4 + x) as u32);
        let sub = buf.crop(1, 2, 2, 2);
        assert_eq!(sub.pixels(), &[9, 10, 13, 14]);
    }

    #[test]
    #[should_panic(expected = "exceeds buffer")]
    fn test_crop_out_of_bounds() {
        let buf = Buffer2::<u8>::new_default(4, 4);
        buf.crop(3, 0, 2, 1);
    }

    #[test]
    fn test_map_and_zip_apply() {
        let a = Buffer2::new(2, 1, vec![1.0f32, 2.0]);
        let mut b = a.map(|v| v * 10.0);
        b.zip_apply(&a, |dst, src| *dst -= src);
        assert_eq!(b.pixels(), &[9.0, 18.0]);
    }

    #[test]
    #[should_panic(expected = "width mismatch")]
    fn test_copy_from_panics_on_width_mismatch() {
        let src = Buffer2::new(3, 2, vec![0; 6]);
        let mut dst = Buffer2::new(2, 3, vec![0; 6]);
        dst.copy_from(&src);
    }

    #[test]
    fn test_index_method() {
        let buf = Buffer2::<u8>::new_default(5, 3);
        assert_eq!(buf.index(4, 0), 4);
        assert_eq!(buf.index(3, 2), 13);
    }
}
