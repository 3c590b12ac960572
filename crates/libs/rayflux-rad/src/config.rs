use crate::RadiationError;
use serde::{Deserialize, Serialize};

/// Ways of tracing carriers through the mesh, selected once per solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TracingMethod {
    /// Every carrier derives its own cell sequence.
    #[default]
    Standard,
    /// Carriers entering a face along the same direction bucket reuse the
    /// cell sequence derived by the first of them.
    RaySharing,
}

/// Parameters of the radiation solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RadiationConfig {
    /// Number of zenith rings of the ordinate quadrature.
    pub n_theta: u32,
    /// Number of azimuthal patches per ring.
    pub n_phi: u32,
    /// Tracing method.
    pub method: TracingMethod,
    /// Width of the direction buckets of the path cache, per direction
    /// component.
    pub bucket_width: f64,
    /// Distance, in mesh units, within which two entry points on the same
    /// face count as the same for the path cache.
    pub entry_tolerance: f64,
    /// Carriers whose transmissivity falls below this value stop gathering.
    pub transmissivity_threshold: f64,
    /// Maximum number of cells a carrier may cross. Derived from the mesh
    /// diameter when absent.
    pub max_hops: Option<u32>,
    /// Maximum number of exchange rounds of a solve. Derived from the hop
    /// budget when absent.
    pub max_rounds: Option<u32>,
    /// Trace the carriers of a rank in parallel.
    pub parallel: bool,
}

impl Default for RadiationConfig {
    fn default() -> Self {
        Self {
            n_theta: 8,
            n_phi: 16,
            method: TracingMethod::Standard,
            bucket_width: 1.0e-6,
            entry_tolerance: 1.0e-9,
            transmissivity_threshold: 1.0e-6,
            max_hops: None,
            max_rounds: None,
            parallel: false,
        }
    }
}

impl RadiationConfig {
    /// Checks the parameters, returning them unchanged when usable.
    pub fn validate(self) -> Result<Self, RadiationError> {
        if self.n_theta == 0 || self.n_phi == 0 {
            return Err(RadiationError::InvalidConfig(format!(
                "ordinate counts must be positive, got {} x {}",
                self.n_theta, self.n_phi
            )));
        }
        if !(self.bucket_width > 0.0 && self.bucket_width.is_finite()) {
            return Err(RadiationError::InvalidConfig(format!(
                "bucket width must be positive, got {}",
                self.bucket_width
            )));
        }
        if !(self.entry_tolerance > 0.0 && self.entry_tolerance.is_finite()) {
            return Err(RadiationError::InvalidConfig(format!(
                "entry tolerance must be positive, got {}",
                self.entry_tolerance
            )));
        }
        if !(0.0..1.0).contains(&self.transmissivity_threshold) {
            return Err(RadiationError::InvalidConfig(format!(
                "transmissivity threshold must lie in [0, 1), got {}",
                self.transmissivity_threshold
            )));
        }
        if self.max_hops == Some(0) || self.max_rounds == Some(0) {
            return Err(RadiationError::InvalidConfig(
                "hop and round ceilings must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    /// Hop budget of a carrier on a mesh of the given diameter in cells.
    ///
    /// A straight line through hexahedra crosses at most about √3 cells per
    /// unit of diameter; the default leaves room for skewed cells.
    pub fn hop_budget(&self, diameter_in_cells: u32) -> u32 {
        self.max_hops
            .unwrap_or_else(|| diameter_in_cells.saturating_mul(4).saturating_add(3))
    }

    /// Round ceiling of a solve. Every hand-off costs the carrier at least
    /// one hop, so a carrier changes rank at most `hop_budget` times.
    pub fn round_ceiling(&self, diameter_in_cells: u32) -> u32 {
        self.max_rounds
            .unwrap_or_else(|| self.hop_budget(diameter_in_cells).saturating_add(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_keys() {
        let config: RadiationConfig = toml::from_str(
            r#"
            n-theta = 4
            method = "ray-sharing"
            transmissivity-threshold = 1e-3
            max-hops = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.n_theta, 4);
        assert_eq!(config.n_phi, 16);
        assert_eq!(config.method, TracingMethod::RaySharing);
        assert_eq!(config.max_hops, Some(12));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad = [
            RadiationConfig { n_phi: 0, ..Default::default() },
            RadiationConfig { bucket_width: 0.0, ..Default::default() },
            RadiationConfig { bucket_width: f64::NAN, ..Default::default() },
            RadiationConfig { entry_tolerance: 0.0, ..Default::default() },
            RadiationConfig { transmissivity_threshold: 1.0, ..Default::default() },
            RadiationConfig { max_rounds: Some(0), ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(RadiationError::InvalidConfig(_))));
        }
    }

    #[test]
    fn ceilings_follow_the_mesh_diameter() {
        let config = RadiationConfig::default();
        assert_eq!(config.hop_budget(10), 43);
        assert_eq!(config.round_ceiling(10), 45);
        let config = RadiationConfig { max_hops: Some(3), ..Default::default() };
        assert_eq!(config.hop_budget(10), 3);
        assert_eq!(config.round_ceiling(10), 5);
    }
}
