//! Loading of TOML configuration files.

use crate::error::RayfluxError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Loads a configuration of type `T` from a `.toml` file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, RayfluxError> {
    let string = std::fs::read_to_string(path).map_err(|err| {
        RayfluxError::from_io_error(
            err,
            format!("Failed to read configuration file: {}", path.display()),
        )
    })?;
    parse_toml(&string).map_err(|err| {
        RayfluxError::new(
            format!("Failed to parse configuration file: {}", path.display()),
            Some(Box::new(err)),
        )
    })
}

/// Parses a configuration of type `T` from a TOML string.
pub fn parse_toml<T: DeserializeOwned>(string: &str) -> Result<T, toml::de::Error> {
    toml::from_str(string)
}

/// Resolves `path` relative to the directory `base` (usually the directory
/// of the configuration file). Absolute paths are returned unchanged.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    log::trace!("Resolving path: base={}, path={}", base.display(), path.display());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "kebab-case")]
    struct Sample {
        ray_count: u32,
        #[serde(default)]
        label: Option<String>,
    }

    #[test]
    fn parses_kebab_case_keys() {
        let sample: Sample = parse_toml("ray-count = 12").unwrap();
        assert_eq!(
            sample,
            Sample {
                ray_count: 12,
                label: None
            }
        );
        assert!(parse_toml::<Sample>("ray-count = 'a'").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_toml::<Sample>(Path::new("/nonexistent/case.toml")).unwrap_err();
        assert!(err.message().contains("/nonexistent/case.toml"));
    }

    #[test]
    fn relative_paths_are_resolved_against_base() {
        let base = Path::new("/data/cases");
        assert_eq!(
            resolve_path(base, Path::new("out/flux.csv")),
            PathBuf::from("/data/cases/out/flux.csv")
        );
        assert_eq!(
            resolve_path(base, Path::new("/tmp/flux.csv")),
            PathBuf::from("/tmp/flux.csv")
        );
    }
}
