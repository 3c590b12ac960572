//! Axis enum for indexing 3D structures.
use crate::math::DVec3;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// An helper struct used to indexing element related to 3D axis.
///
/// # Examples
/// ```
/// # use rayflux_base::math::Axis;
///
/// let mut pos = [0.1, 0.4, 0.6];
/// pos[Axis::X] -= 0.1;
///
/// assert_eq!(pos[Axis::X], 0.0);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// X-axis.
    X = 0,

    /// Y-axis.
    Y = 1,

    /// Z-axis.
    Z = 2,
}

impl Axis {
    /// All three axes in x, y, z order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Returns the next axis following the x, y, z order.
    pub fn next_axis(&self) -> Axis { Axis::ALL[(*self as usize + 1) % 3] }

    /// Returns the unit vector along the axis.
    pub fn unit(&self) -> DVec3 {
        match self {
            Axis::X => DVec3::X,
            Axis::Y => DVec3::Y,
            Axis::Z => DVec3::Z,
        }
    }

    /// Lower case name of the axis.
    pub fn name(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl<T> Index<Axis> for [T] {
    type Output = T;

    fn index(&self, index: Axis) -> &Self::Output { &self[index as usize] }
}

impl Index<Axis> for DVec3 {
    type Output = f64;

    fn index(&self, index: Axis) -> &Self::Output {
        match index {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl<T> IndexMut<Axis> for [T] {
    fn index_mut(&mut self, index: Axis) -> &mut Self::Output { &mut self[index as usize] }
}

impl IndexMut<Axis> for DVec3 {
    fn index_mut(&mut self, index: Axis) -> &mut Self::Output {
        match index {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}
