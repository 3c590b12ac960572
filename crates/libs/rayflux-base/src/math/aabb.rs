use crate::math::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Axis-aligned bounding box.
#[derive(Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner of the box.
    pub min: DVec3,

    /// Maximum corner of the box.
    pub max: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }
}

impl Debug for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Aabb {{ {} ~ {} }}", self.min, self.max)
    }
}

impl Display for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Aabb {{ {} ~ {} }}", self.min, self.max)
    }
}

impl Aabb {
    /// Creates a new empty (i.e. invalid) [`Aabb`].
    pub fn empty() -> Self { Self::default() }

    /// Constructs the smallest box containing all the given points.
    pub fn from_points<I: IntoIterator<Item = DVec3>>(points: I) -> Self {
        points.into_iter().fold(Self::empty(), |mut bbox, p| {
            bbox.extend(p);
            bbox
        })
    }

    /// Grows the box so that it contains the given point.
    pub fn extend(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Whether the box has been extended with at least one point.
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Returns the extent of the box.
    pub fn extent(&self) -> DVec3 { self.max - self.min }

    /// Returns the length of the box diagonal.
    pub fn diagonal(&self) -> f64 { self.extent().length() }
}
