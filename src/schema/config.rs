//! Configuration types for the evolver.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compute::InstructionKind;

/// Top-level evolver configuration, loaded from `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolverConfig {
    /// Scalar mutation ranges.
    pub mutation: MutationConfig,
    /// Population sizing and seeding.
    pub population: PopulationConfig,
    /// Instruction variants the mutator may create.
    pub instruction_types: Vec<InstructionKind>,
    /// Evaluator threads. 0 uses all available cores.
    pub worker_count: usize,
    /// Coordinator/peer synchronization.
    pub sync: SyncConfig,
    /// Population persistence.
    pub persistence: PersistenceConfig,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            mutation: MutationConfig::default(),
            population: PopulationConfig::default(),
            instruction_types: vec![InstructionKind::Line, InstructionKind::Circle],
            worker_count: 0,
            sync: SyncConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Mutation delta ranges. Each `(min, max)` pair bounds the random delta
/// added to a value before it is wrapped back into its domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Hue delta in degrees.
    pub hue: (f32, f32),
    /// Saturation delta (domain 0-1).
    pub saturation: (f32, f32),
    /// Lightness delta (domain 0-1).
    pub lightness: (f32, f32),
    /// Coordinate delta in pixels.
    pub coordinate: (f32, f32),
    /// Line width delta.
    pub line_width: (f32, f32),
    /// Maximum line width.
    pub max_line_width: f32,
    /// Maximum length of a freshly generated line.
    pub max_line_length: f32,
    /// Lines are shortened until `length * width` fits in this area.
    pub max_line_area: f32,
    /// Circle radius delta.
    pub circle_radius: (f32, f32),
    /// Maximum circle radius.
    pub max_circle_radius: f32,
    /// Radius range for polygon points.
    pub polygon_radius_bounds: (f32, f32),
    /// Polygon point distance delta.
    pub polygon_radius: (f32, f32),
    /// Polygon point angle delta in degrees.
    pub polygon_angle: (f32, f32),
    /// Allowed polygon point counts (inclusive).
    pub polygon_points: (usize, usize),
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            hue: (-10.0, 10.0),
            saturation: (-0.1, 0.1),
            lightness: (-0.1, 0.1),
            coordinate: (-100.0, 100.0),
            line_width: (-5.0, 5.0),
            max_line_width: 20.0,
            max_line_length: 50.0,
            max_line_area: 250.0,
            circle_radius: (-5.0, 5.0),
            max_circle_radius: 20.0,
            polygon_radius_bounds: (2.0, 10.0),
            polygon_radius: (-5.0, 5.0),
            polygon_angle: (-20.0, 20.0),
            polygon_points: (3, 7),
        }
    }
}

/// Population sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Children produced (and organisms retained) per generation.
    pub max_population: usize,
    /// Instruction count bounds for a randomly synthesized seed organism.
    pub min_complexity: usize,
    pub max_complexity: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            max_population: 8,
            min_complexity: 1000,
            max_complexity: 5000,
        }
    }
}

/// Synchronization settings shared by coordinator and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between peer push/pull rounds.
    pub frequency_secs: u64,
    /// Capacity of the import/export queues between the loop and the portal.
    pub queue_capacity: usize,
    /// Seconds a cached patch stays reachable.
    pub patch_retention_secs: u64,
    /// Longest patch chain the cache will walk.
    pub max_patch_hops: usize,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Coordinator bind address.
    pub bind_address: String,
}

impl SyncConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    pub fn patch_retention(&self) -> Duration {
        Duration::from_secs(self.patch_retention_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frequency_secs: 50,
            queue_capacity: 20,
            patch_retention_secs: 600,
            max_patch_hops: 100,
            http_timeout_secs: 30,
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Population persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Seconds between population/snapshot saves on the coordinator.
    pub save_interval_secs: u64,
    /// Write every retained organism instead of only the top one.
    pub persist_population: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 60,
            persist_population: false,
        }
    }
}

impl EvolverConfig {
    /// Load configuration from a JSON file, writing the defaults first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            fs::write(path, serde_json::to_string_pretty(&config)?)?;
            return Ok(config);
        }
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of evaluator threads to start.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.mutation;
        let ranges = [
            ("hue", m.hue),
            ("saturation", m.saturation),
            ("lightness", m.lightness),
            ("coordinate", m.coordinate),
            ("line_width", m.line_width),
            ("circle_radius", m.circle_radius),
            ("polygon_radius", m.polygon_radius),
            ("polygon_angle", m.polygon_angle),
            ("polygon_radius_bounds", m.polygon_radius_bounds),
        ];
        for (name, (min, max)) in ranges {
            if !(min <= max) {
                return Err(ConfigError::InvalidRange { name });
            }
        }
        if m.max_line_width <= 0.0 || m.max_circle_radius <= 0.0 || m.max_line_length <= 0.0 {
            return Err(ConfigError::InvalidRange { name: "max size" });
        }
        if m.polygon_points.0 < 3 || m.polygon_points.0 > m.polygon_points.1 {
            return Err(ConfigError::InvalidRange {
                name: "polygon_points",
            });
        }
        if self.population.max_population == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.population.min_complexity > self.population.max_complexity {
            return Err(ConfigError::InvalidRange { name: "complexity" });
        }
        if self.instruction_types.is_empty() {
            return Err(ConfigError::NoInstructionTypes);
        }
        if self.sync.queue_capacity == 0 || self.sync.frequency_secs == 0 {
            return Err(ConfigError::InvalidSync);
        }
        Ok(())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Range '{name}' must satisfy min <= max")]
    InvalidRange { name: &'static str },
    #[error("Population size must be non-zero")]
    EmptyPopulation,
    #[error("At least one instruction type must be enabled")]
    NoInstructionTypes,
    #[error("Sync frequency and queue capacity must be non-zero")]
    InvalidSync,
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EvolverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EvolverConfig =
            serde_json::from_str(r#"{"population": {"max_population": 4}}"#).unwrap();
        assert_eq!(config.population.max_population, 4);
        assert_eq!(config.population.min_complexity, 1000);
        assert_eq!(config.sync.max_patch_hops, 100);
        assert_eq!(config.mutation.hue, (-10.0, 10.0));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut config = EvolverConfig::default();
        config.mutation.hue = (10.0, -10.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { name: "hue" })
        ));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let created = EvolverConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = EvolverConfig::load_or_create(&path).unwrap();
        assert_eq!(
            created.population.max_population,
            loaded.population.max_population
        );
    }
}
