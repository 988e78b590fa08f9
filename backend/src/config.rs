//! Ambient configuration loading (not in spec.md, required for a runnable
//! service). Generalizes the teacher's `main.rs` hardcoded bbox/port into a
//! small TOML-plus-env loader, in the same spirit as the teacher's own
//! `clap`-based binaries already reaching for structured config.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_graphs_dir")]
    pub graphs_dir: PathBuf,
    pub osm_pbf_path: Option<PathBuf>,
    pub dem_dir: Option<PathBuf>,
    #[serde(default = "default_min_component_length_m")]
    pub min_component_length_m: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_graphs_dir() -> PathBuf {
    PathBuf::from("data/graphs")
}

fn default_min_component_length_m() -> f64 {
    crate::prepare::DEFAULT_MIN_COMPONENT_LENGTH_M
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            graphs_dir: default_graphs_dir(),
            osm_pbf_path: None,
            dem_dir: None,
            min_component_length_m: default_min_component_length_m(),
        }
    }
}

impl ServerConfig {
    /// Loads from an optional TOML file at `path`, then applies environment
    /// overrides (`SCENIC_BIND_ADDR`, `SCENIC_GRAPHS_DIR`, `SCENIC_PBF_PATH`,
    /// `SCENIC_DEM_DIR`).
    pub fn load(path: Option<&std::path::Path>) -> Self {
        let mut config = match path {
            Some(p) if p.exists() => match std::fs::read_to_string(p) {
                Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to parse config file, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read config file, using defaults");
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        if let Ok(v) = std::env::var("SCENIC_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SCENIC_GRAPHS_DIR") {
            config.graphs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SCENIC_PBF_PATH") {
            config.osm_pbf_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("SCENIC_DEM_DIR") {
            config.dem_dir = Some(PathBuf::from(v));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.min_component_length_m > 0.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load(Some(std::path::Path::new("/nonexistent/scenic.toml")));
        assert_eq!(config.graphs_dir, default_graphs_dir());
    }
}
