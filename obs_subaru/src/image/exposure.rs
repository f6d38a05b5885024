use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::mask::Mask;
use super::masked_image::MaskedImage;
use super::plane::Image;
use crate::camera::Detector;
use crate::geom::Box2I;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    /// Numeric value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

/// Insertion-ordered key/value metadata. Setting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyList {
    entries: Vec<(String, MetadataValue)>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<MetadataValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetadataValue::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Masked image plus the detector it came from and its metadata.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub masked_image: MaskedImage,
    pub metadata: PropertyList,
    detector: Arc<Detector>,
}

impl Exposure {
    pub fn new(masked_image: MaskedImage, detector: Arc<Detector>) -> Self {
        Self {
            masked_image,
            metadata: PropertyList::new(),
            detector,
        }
    }

    #[inline]
    pub fn bbox(&self) -> Box2I {
        self.masked_image.bbox()
    }

    #[inline]
    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    pub fn set_detector(&mut self, detector: Arc<Detector>) {
        self.detector = detector;
    }

    #[inline]
    pub fn image(&self) -> &Image<f32> {
        &self.masked_image.image
    }

    #[inline]
    pub fn image_mut(&mut self) -> &mut Image<f32> {
        &mut self.masked_image.image
    }

    #[inline]
    pub fn mask(&self) -> &Mask {
        &self.masked_image.mask
    }

    #[inline]
    pub fn mask_mut(&mut self) -> &mut Mask {
        &mut self.masked_image.mask
    }

    #[inline]
    pub fn variance(&self) -> &Image<f32> {
        &self.masked_image.variance
    }
}
