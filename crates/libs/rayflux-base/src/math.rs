//! Math utilities.

mod aabb;
mod axis;

pub use aabb::*;
pub use axis::*;

pub use glam::{dvec3, DVec3};

/// Checks whether the vector is of unit length within a small tolerance.
pub fn is_unit(v: &DVec3) -> bool {
    approx::ulps_eq!(v.length(), 1.0, epsilon = 1.0e-9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_vectors() {
        assert!(is_unit(&dvec3(0.0, 0.0, -1.0)));
        assert!(is_unit(&DVec3::new(0.6, 0.8, 0.0)));
        assert!(!is_unit(&DVec3::new(0.6, 0.8, 0.1)));
    }
}
