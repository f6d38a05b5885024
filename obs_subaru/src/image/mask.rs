//! Bit-mask plane with named bits.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use common::bit_buffer2::BitBuffer2;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use super::plane::Image;
use crate::geom::Box2I;

/// Mask pixel type.
pub type MaskPixel = u32;

/// Hard cap on the number of named planes.
pub const MAX_MASK_PLANES: usize = MaskPixel::BITS as usize;

/// Planes every mask starts with, at bits 0..8 in declaration order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskPlane {
    Bad,
    Sat,
    Intrp,
    Cr,
    Edge,
    Detected,
    DetectedNegative,
    Suspect,
    NoData,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("Unknown mask plane '{0}'")]
    UnknownPlane(String),

    #[error("No free mask bit for plane '{0}' (limit {MAX_MASK_PLANES})")]
    NoFreeBits(String),

    #[error("Mask plane '{0}' already exists")]
    PlaneExists(String),

    #[error("Bounding box mismatch: expected {expected}, got {actual}")]
    BboxMismatch { expected: Box2I, actual: Box2I },
}

/// Mapping from plane name to bit index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPlaneDict {
    planes: BTreeMap<String, u32>,
}

impl Default for MaskPlaneDict {
    fn default() -> Self {
        let planes = MaskPlane::iter()
            .enumerate()
            .map(|(bit, plane)| (plane.to_string(), bit as u32))
            .collect();
        Self { planes }
    }
}

impl MaskPlaneDict {
    /// Bit index of `name`, allocating the lowest free bit if it is new.
    pub fn add(&mut self, name: &str) -> Result<u32, MaskError> {
        if let Some(&bit) = self.planes.get(name) {
            return Ok(bit);
        }
        let bit = (0..MAX_MASK_PLANES as u32)
            .find(|bit| !self.planes.values().any(|used| used == bit))
            .ok_or_else(|| MaskError::NoFreeBits(name.to_string()))?;
        self.planes.insert(name.to_string(), bit);
        Ok(bit)
    }

    pub fn remove(&mut self, name: &str) -> Option<u32> {
        self.planes.remove(name)
    }

    pub fn bit(&self, name: &str) -> Result<u32, MaskError> {
        self.planes
            .get(name)
            .copied()
            .ok_or_else(|| MaskError::UnknownPlane(name.to_string()))
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.planes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.planes.iter().map(|(name, &bit)| (name.as_str(), bit))
    }
}

/// Integer mask image plus its plane dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    image: Image<MaskPixel>,
    planes: MaskPlaneDict,
}

impl Mask {
    pub fn new(bbox: Box2I) -> Self {
        Self {
            image: Image::new(bbox),
            planes: MaskPlaneDict::default(),
        }
    }

    pub fn from_image(image: Image<MaskPixel>, planes: MaskPlaneDict) -> Self {
        Self { image, planes }
    }

    #[inline]
    pub fn bbox(&self) -> Box2I {
        self.image.bbox()
    }

    #[inline]
    pub fn image(&self) -> &Image<MaskPixel> {
        &self.image
    }

    #[inline]
    pub fn image_mut(&mut self) -> &mut Image<MaskPixel> {
        &mut self.image
    }

    #[inline]
    pub fn planes(&self) -> &MaskPlaneDict {
        &self.planes
    }

    /// Local-coordinate accessor.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> MaskPixel {
        *self.image.get(x, y)
    }

    pub fn add_plane(&mut self, name: &str) -> Result<MaskPixel, MaskError> {
        Ok(1 << self.planes.add(name)?)
    }

    /// Clears the plane's bits everywhere and frees the name. Unknown names are ignored.
    pub fn remove_plane(&mut self, name: &str) {
        if let Some(bit) = self.planes.remove(name) {
            self.clear_bits(1 << bit);
        }
    }

    pub fn plane_bitmask(&self, name: &str) -> Result<MaskPixel, MaskError> {
        Ok(1 << self.planes.bit(name)?)
    }

    /// Union of the bitmasks of every name; fails on the first unknown one.
    pub fn bitmask_of<S: AsRef<str>>(&self, names: &[S]) -> Result<MaskPixel, MaskError> {
        names
            .iter()
            .try_fold(0, |acc, name| -> Result<MaskPixel, MaskError> {
                Ok(acc | self.plane_bitmask(name.as_ref())?)
            })
    }

    pub fn clear_bits(&mut self, bits: MaskPixel) {
        self.image
            .buffer_mut()
            .iter_mut()
            .for_each(|v| *v &= !bits);
    }

    /// OR `bits` into every pixel of `bbox` (parent coordinates).
    pub fn or_box(&mut self, bbox: Box2I, bits: MaskPixel) {
        self.image.view_mut(bbox).for_each_mut(|_, _, v| *v |= bits);
    }

    /// OR `bits` wherever `selection` is set; `selection` is in local coordinates.
    pub fn or_where(&mut self, selection: &BitBuffer2, bits: MaskPixel) {
        assert_eq!(selection.width(), self.image.width(), "width mismatch");
        assert_eq!(selection.height(), self.image.height(), "height mismatch");
        for (x, y) in selection.iter_set() {
            *self.image.get_mut(x, y) |= bits;
        }
    }

    /// Number of pixels with any of `bits` set.
    pub fn count_bits(&self, bits: MaskPixel) -> usize {
        self.image
            .buffer()
            .iter()
            .filter(|&&v| v & bits != 0)
            .count()
    }
}

/// A mask plane that exists only for the lifetime of the guard.
///
/// The guard always owns a plane it created. On drop the plane's bits are
/// cleared and its name removed, on every exit path including early
/// returns and errors.
pub struct ScopedMaskPlane<'a> {
    mask: &'a mut Mask,
    name: String,
    bitmask: MaskPixel,
}

impl<'a> ScopedMaskPlane<'a> {
    /// Create plane `name`; fails if the mask already has it.
    pub fn acquire(mask: &'a mut Mask, name: &str) -> Result<Self, MaskError> {
        if mask.planes().contains(name) {
            return Err(MaskError::PlaneExists(name.to_string()));
        }
        let bitmask = mask.add_plane(name)?;
        Ok(Self {
            mask,
            name: name.to_string(),
            bitmask,
        })
    }

    /// Create a fresh plane named `base`, or `base_1`, `base_2`, ... when
    /// that name is taken.
    pub fn acquire_unique(mask: &'a mut Mask, base: &str) -> Result<Self, MaskError> {
        let name = std::iter::once(base.to_string())
            .chain((1..).map(|n| format!("{base}_{n}")))
            .find(|candidate| !mask.planes().contains(candidate))
            .unwrap_or_else(|| base.to_string());
        Self::acquire(mask, &name)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn bitmask(&self) -> MaskPixel {
        self.bitmask
    }
}

impl Deref for ScopedMaskPlane<'_> {
    type Target = Mask;

    fn deref(&self) -> &Mask {
        &*self.mask
    }
}

impl DerefMut for ScopedMaskPlane<'_> {
    fn deref_mut(&mut self) -> &mut Mask {
        &mut *self.mask
    }
}

impl Drop for ScopedMaskPlane<'_> {
    fn drop(&mut self) {
        self.mask.remove_plane(&self.name);
    }
}
