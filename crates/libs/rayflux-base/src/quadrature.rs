//! Discrete ordinate quadrature over the unit sphere.
//!
//! The sphere is divided into equal-angle patches: `n_theta` rings of equal
//! zenith step, each split into `n_phi` patches of equal azimuth step. One
//! ordinate is placed at the centre of every patch and carries the exact solid
//! angle of its patch as quadrature weight, so that the weights sum to 4π.

use crate::math::DVec3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// One discretised direction of the quadrature.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordinate {
    /// Index of the ordinate inside its set.
    pub index: u32,
    /// Zenith angle of the patch centre in radians.
    pub theta: f64,
    /// Azimuth angle of the patch centre in radians.
    pub phi: f64,
    /// Unit direction of the ordinate.
    pub direction: DVec3,
    /// Solid angle of the patch represented by the ordinate.
    pub weight: f64,
}

/// Fixed set of ordinates shared read-only by every ray of a solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinateSet {
    n_theta: u32,
    n_phi: u32,
    ordinates: Box<[Ordinate]>,
}

impl OrdinateSet {
    /// Creates the equal-angle quadrature with `n_theta` zenith rings and
    /// `n_phi` azimuthal patches per ring.
    ///
    /// Both counts are clamped to at least one.
    pub fn equal_angle(n_theta: u32, n_phi: u32) -> Self {
        let n_theta = n_theta.max(1);
        let n_phi = n_phi.max(1);
        let d_theta = PI / n_theta as f64;
        let d_phi = TAU / n_phi as f64;
        let mut ordinates = Vec::with_capacity((n_theta * n_phi) as usize);
        for i in 0..n_theta {
            let theta_min = i as f64 * d_theta;
            let theta_max = theta_min + d_theta;
            let theta = theta_min + 0.5 * d_theta;
            // Exact solid angle of the patch.
            let weight = d_phi * (theta_min.cos() - theta_max.cos());
            for j in 0..n_phi {
                let phi = (j as f64 + 0.5) * d_phi;
                let (sin_theta, cos_theta) = theta.sin_cos();
                let (sin_phi, cos_phi) = phi.sin_cos();
                ordinates.push(Ordinate {
                    index: i * n_phi + j,
                    theta,
                    phi,
                    direction: DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
                        .normalize(),
                    weight,
                });
            }
        }
        log::debug!(
            "Created equal-angle quadrature with {} x {} ordinates",
            n_theta,
            n_phi
        );
        Self {
            n_theta,
            n_phi,
            ordinates: ordinates.into_boxed_slice(),
        }
    }

    /// Returns the number of ordinates.
    pub fn len(&self) -> usize { self.ordinates.len() }

    /// Whether the set is empty (never the case for a constructed set).
    pub fn is_empty(&self) -> bool { self.ordinates.is_empty() }

    /// Number of zenith rings.
    pub fn n_theta(&self) -> u32 { self.n_theta }

    /// Number of azimuthal patches per ring.
    pub fn n_phi(&self) -> u32 { self.n_phi }

    /// Returns the ordinate with the given index.
    pub fn get(&self, index: u32) -> Option<&Ordinate> { self.ordinates.get(index as usize) }

    /// Iterates over the ordinates in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Ordinate> + '_ { self.ordinates.iter() }

    /// Sum of all quadrature weights.
    pub fn total_solid_angle(&self) -> f64 { self.ordinates.iter().map(|o| o.weight).sum() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn weights_cover_the_sphere() {
        let set = OrdinateSet::equal_angle(8, 16);
        assert_eq!(set.len(), 128);
        assert_relative_eq!(set.total_solid_angle(), 4.0 * PI, max_relative = 1e-12);
    }

    #[test]
    fn cosine_weighted_hemisphere_integrates_to_pi() {
        let set = OrdinateSet::equal_angle(16, 32);
        let normal = DVec3::Z;
        let incoming: f64 = set
            .iter()
            .filter(|o| o.direction.dot(normal) < 0.0)
            .map(|o| o.weight * o.direction.dot(normal).abs())
            .sum();
        assert_relative_eq!(incoming, PI, max_relative = 1e-2);
    }

    #[test]
    fn degenerate_counts_are_clamped() {
        let set = OrdinateSet::equal_angle(0, 0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.n_theta(), 1);
        assert!(set.get(0).is_some());
        assert!(set.get(1).is_none());
    }

    proptest! {
        #[test]
        fn directions_are_unit(n_theta in 1u32..24, n_phi in 1u32..48) {
            let set = OrdinateSet::equal_angle(n_theta, n_phi);
            prop_assert_eq!(set.len(), (n_theta * n_phi) as usize);
            for (i, o) in set.iter().enumerate() {
                prop_assert_eq!(o.index as usize, i);
                prop_assert!((o.direction.length() - 1.0).abs() < 1e-12);
                prop_assert!(o.weight > 0.0);
            }
        }
    }
}
