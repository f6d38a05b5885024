//! Image, mask and variance substrate.

mod exposure;
mod mask;
mod masked_image;
mod plane;

pub use exposure::{Exposure, MetadataValue, PropertyList};
pub use mask::{MAX_MASK_PLANES, Mask, MaskError, MaskPixel, MaskPlane, MaskPlaneDict, ScopedMaskPlane};
pub use masked_image::MaskedImage;
pub use plane::{Image, ImageView, ImageViewMut};
