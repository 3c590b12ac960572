use base::math::DVec3;
use mesh::{CellId, FaceId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Globally unique identity of a carrier: the face it gathers intensity for
/// and the ordinate it travels along.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CarrierId {
    /// Face receiving the gathered intensity.
    pub face: FaceId,
    /// Index of the ordinate in the quadrature.
    pub ordinate: u32,
}

impl Display for CarrierId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}#{}", self.face, self.ordinate) }
}

/// In-progress state of one ray.
///
/// A carrier starts on its source face and marches into the domain along its
/// direction, gathering the intensity that reaches the source face from the
/// opposite direction. It is owned by exactly one rank at a time and travels
/// between ranks as a plain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    /// Identity.
    pub id: CarrierId,
    /// Unit direction of travel.
    pub direction: DVec3,
    /// Current position, on the face the carrier entered `cell` through.
    pub position: DVec3,
    /// Cell the carrier is about to cross.
    pub cell: CellId,
    /// Face the carrier entered `cell` through.
    pub entry_face: FaceId,
    /// Intensity gathered so far.
    pub intensity: f64,
    /// Transmissivity between the source face and the current position.
    pub transmissivity: f64,
    /// Number of cells crossed.
    pub hops: u32,
    /// Geometric length travelled.
    pub path_length: f64,
}

impl Carrier {
    /// Creates a carrier leaving `face` into `cell`, which borders it.
    pub fn launch(id: CarrierId, direction: DVec3, origin: DVec3, cell: CellId) -> Self {
        Self {
            id,
            direction,
            position: origin,
            cell,
            entry_face: id.face,
            intensity: 0.0,
            transmissivity: 1.0,
            hops: 0,
            path_length: 0.0,
        }
    }

    /// Crosses `length` of a cell with absorption coefficient `kappa` and
    /// emitted intensity `source`, returning the attenuation of the cell.
    ///
    /// Replayed and freshly traced steps both go through this method, so the
    /// gathered intensity does not depend on where the geometry came from.
    pub fn cross(&mut self, kappa: f64, source: f64, length: f64) -> f64 {
        let attenuation = (-kappa * length).exp();
        self.intensity += self.transmissivity * (1.0 - attenuation) * source;
        self.transmissivity *= attenuation;
        self.path_length += length;
        self.hops += 1;
        attenuation
    }

    /// Adds the intensity entering the domain through the face the carrier
    /// leaves it by.
    pub fn gather_wall(&mut self, wall_intensity: f64) { self.intensity += self.transmissivity * wall_intensity; }

    /// Whether the state survived transport intact.
    pub fn is_sane(&self) -> bool {
        self.intensity.is_finite()
            && self.transmissivity.is_finite()
            && (0.0..=1.0).contains(&self.transmissivity)
            && self.position.is_finite()
            && self.direction.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn carrier() -> Carrier {
        Carrier::launch(
            CarrierId { face: FaceId(3), ordinate: 7 },
            DVec3::X,
            DVec3::ZERO,
            CellId(0),
        )
    }

    #[test]
    fn ids_order_by_face_then_ordinate() {
        let a = CarrierId { face: FaceId(1), ordinate: 9 };
        let b = CarrierId { face: FaceId(2), ordinate: 0 };
        assert!(a < b);
        assert_eq!(a.to_string(), "f1#9");
    }

    #[test]
    fn gray_slab_matches_analytic_solution() {
        // Uniform slab of optical depth κL split into ten cells.
        let (kappa, length, source) = (0.8, 2.5, 4.0);
        let mut c = carrier();
        for _ in 0..10 {
            c.cross(kappa, source, length / 10.0);
        }
        let tau = kappa * length;
        assert_relative_eq!(c.intensity, source * (1.0 - (-tau).exp()), epsilon = 1e-12);
        assert_relative_eq!(c.transmissivity, (-tau).exp(), epsilon = 1e-12);
        assert_relative_eq!(c.path_length, length, epsilon = 1e-12);
        assert_eq!(c.hops, 10);
    }

    #[test]
    fn transparent_medium_transmits_wall_intensity() {
        let mut c = carrier();
        c.cross(0.0, 100.0, 1.0);
        c.cross(0.0, 100.0, 2.0);
        c.gather_wall(5.0);
        assert_eq!(c.intensity, 5.0);
        assert_eq!(c.transmissivity, 1.0);
        assert!(c.is_sane());
    }

    #[test]
    fn corrupted_state_is_detected() {
        let mut c = carrier();
        c.intensity = f64::NAN;
        assert!(!c.is_sane());
        let mut c = carrier();
        c.transmissivity = 1.5;
        assert!(!c.is_sane());
    }
}
