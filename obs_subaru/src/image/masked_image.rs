use super::mask::{Mask, MaskError};
use super::plane::Image;
use crate::geom::Box2I;

/// Image, mask and variance planes sharing one bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedImage {
    pub image: Image<f32>,
    pub mask: Mask,
    pub variance: Image<f32>,
}

impl MaskedImage {
    pub fn new(image: Image<f32>, mask: Mask, variance: Image<f32>) -> Result<Self, MaskError> {
        let expected = image.bbox();
        for actual in [mask.bbox(), variance.bbox()] {
            if actual != expected {
                return Err(MaskError::BboxMismatch { expected, actual });
            }
        }
        Ok(Self {
            image,
            mask,
            variance,
        })
    }

    /// Zero image and variance, empty mask.
    pub fn from_bbox(bbox: Box2I) -> Self {
        Self {
            image: Image::new(bbox),
            mask: Mask::new(bbox),
            variance: Image::new(bbox),
        }
    }

    /// Wrap an image with an empty mask and zero variance.
    pub fn from_image(image: Image<f32>) -> Self {
        let bbox = image.bbox();
        Self {
            image,
            mask: Mask::new(bbox),
            variance: Image::new(bbox),
        }
    }

    #[inline]
    pub fn bbox(&self) -> Box2I {
        self.image.bbox()
    }
}
