//! Math types.
//!
//! Positions are plain `f32` triples; the server only ever overwrites them, so
//! no arithmetic beyond what tests need lives here.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns the components as an array, in wire order.
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// True if every component is finite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_default_is_origin() {
        assert_eq!(Vec3::default(), Vec3::ZERO);
    }

    #[test]
    fn vec3_nan_is_not_finite() {
        assert!(!Vec3::new(0.0, f32::NAN, 0.0).is_finite());
        assert!(Vec3::new(1.0, 2.0, 3.0).is_finite());
    }
}
