pub trait FloatExt: Sized {
    fn approximately_eq(self, other: Self) -> bool;

    /// `self` if finite, otherwise `fallback`.
    fn finite_or(self, fallback: Self) -> Self;
}

impl FloatExt for f32 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON as f32
    }

    fn finite_or(self, fallback: Self) -> Self {
        if self.is_finite() {
            self
        } else {
            fallback
        }
    }
}

impl FloatExt for f64 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON
    }

    fn finite_or(self, fallback: Self) -> Self {
        if self.is_finite() {
            self
        } else {
            fallback
        }
    }
}
