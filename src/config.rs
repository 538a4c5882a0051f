//! Twin configuration
//!
//! Loaded from JSON. [`TwinConfig::default`] reproduces the reference
//! deployment of three identical plants.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::AlarmBand;
use crate::control::{gain_from_rows, GainMatrix, DEFAULT_GAIN};
use crate::error::{TwinError, TwinResult};
use crate::plant::{ReferenceBand, ReferenceVector, TankConstants, TankModel, TANKS};
use crate::solvers::IntegratorSettings;
use crate::tags::PlantTags;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinConfig {
    pub store: StoreConfig,
    pub plants: Vec<PlantConfig>,
    /// Rows of the 3x6 state-feedback gain
    pub gain: Vec<Vec<f64>>,
    pub cadence: CadenceConfig,
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub integrator: IntegratorSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    /// Upper bound on a single tag read or write
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_op_timeout_ms() -> u64 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    pub tags: PlantTags,
    pub tanks: [TankConstants; TANKS],
    pub initial_reference: [f64; TANKS],
}

/// Loop periods in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Simulation period, also the integration horizon of one cycle
    pub simulation_s: f64,
    pub control_s: f64,
    pub randomizer_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub band: ReferenceBand,
    /// Half-width of the uniform perturbation
    pub step: f64,
    #[serde(default = "default_true")]
    pub randomize: bool,
    /// Fixed seed for reproducible reference walks
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub period_s: f64,
    pub topic_prefix: String,
    pub alert_topic_prefix: String,
    pub alarm: AlarmBand,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_s: 0.2,
            topic_prefix: "iot/levels".to_string(),
            alert_topic_prefix: "iot/alerts".to_string(),
            alarm: AlarmBand::default(),
        }
    }
}

impl Default for TwinConfig {
    fn default() -> Self {
        let plants = (0..3)
            .map(|i| PlantConfig {
                tags: PlantTags::for_plant(i),
                tanks: [TankConstants::default(); TANKS],
                initial_reference: [1.5, 1.6, 1.4],
            })
            .collect();

        Self {
            store: StoreConfig {
                endpoint: "opc.tcp://localhost:53530/OPCUA/SimulationServer".to_string(),
                op_timeout_ms: default_op_timeout_ms(),
            },
            plants,
            gain: DEFAULT_GAIN.iter().map(|row| row.to_vec()).collect(),
            cadence: CadenceConfig {
                simulation_s: 0.2,
                control_s: 0.2,
                randomizer_s: 5.0,
            },
            reference: ReferenceConfig {
                band: ReferenceBand::default(),
                step: 0.1,
                randomize: true,
                seed: None,
            },
            integrator: IntegratorSettings::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn positive(name: &str, value: f64) -> TwinResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TwinError::Config(format!(
            "{name} must be finite and > 0, got {value}"
        )))
    }
}

impl TwinConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> TwinResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_json(&self) -> TwinResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject anything that would fail or divide by zero at runtime
    pub fn validate(&self) -> TwinResult<()> {
        if self.plants.is_empty() {
            return Err(TwinError::Config("at least one plant is required".into()));
        }
        if self.store.endpoint.trim().is_empty() {
            return Err(TwinError::Config("store endpoint is empty".into()));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(TwinError::Config("store.op_timeout_ms must be > 0".into()));
        }

        self.gain_matrix()?;

        positive("cadence.simulation_s", self.cadence.simulation_s)?;
        positive("cadence.control_s", self.cadence.control_s)?;
        positive("cadence.randomizer_s", self.cadence.randomizer_s)?;

        let band = self.reference.band;
        if !(band.min.is_finite() && band.max.is_finite()) || band.min <= 0.0 || band.min >= band.max
        {
            return Err(TwinError::Config(format!(
                "reference band must satisfy 0 < min < max, got [{}, {}]",
                band.min, band.max
            )));
        }
        if !self.reference.step.is_finite() || self.reference.step < 0.0 {
            return Err(TwinError::Config(format!(
                "reference.step must be finite and >= 0, got {}",
                self.reference.step
            )));
        }

        positive("integrator.tol_abs", self.integrator.tol_abs)?;
        positive("integrator.tol_rel", self.integrator.tol_rel)?;
        positive("integrator.min_step", self.integrator.min_step)?;
        if self.integrator.max_steps == 0 {
            return Err(TwinError::Config("integrator.max_steps must be > 0".into()));
        }

        for (p, plant) in self.plants.iter().enumerate() {
            for (k, tank) in plant.tanks.iter().enumerate() {
                let label = format!("plant {p} tank {}", k + 1);
                positive(&format!("{label} r_bottom"), tank.r_bottom)?;
                positive(&format!("{label} height"), tank.height)?;
                if !tank.r_top.is_finite() || tank.r_top < 0.0 {
                    return Err(TwinError::Config(format!(
                        "{label} r_top must be finite and >= 0, got {}",
                        tank.r_top
                    )));
                }
                if !tank.gamma.is_finite() || tank.gamma < 0.0 {
                    return Err(TwinError::Config(format!(
                        "{label} gamma must be finite and >= 0, got {}",
                        tank.gamma
                    )));
                }
            }
            for (k, &href) in plant.initial_reference.iter().enumerate() {
                if !band.contains(href) {
                    return Err(TwinError::Config(format!(
                        "plant {p} initial reference {} = {href} outside [{}, {}]",
                        k + 1,
                        band.min,
                        band.max
                    )));
                }
            }
        }

        if self.telemetry.enabled {
            positive("telemetry.period_s", self.telemetry.period_s)?;
        }
        let alarm = self.telemetry.alarm;
        if !(alarm.min.is_finite() && alarm.max.is_finite()) || alarm.min >= alarm.max {
            return Err(TwinError::Config(format!(
                "alarm band must satisfy min < max, got [{}, {}]",
                alarm.min, alarm.max
            )));
        }

        Ok(())
    }

    pub fn gain_matrix(&self) -> TwinResult<GainMatrix> {
        gain_from_rows(&self.gain)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.store.op_timeout_ms)
    }

    /// Every tag of every plant
    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.plants.iter().flat_map(|p| p.tags.all())
    }
}

impl PlantConfig {
    pub fn model(&self) -> TankModel {
        TankModel::new(self.tanks)
    }

    pub fn reference(&self) -> ReferenceVector {
        ReferenceVector::from(self.initial_reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let cfg = TwinConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.plants.len(), 3);
        assert_eq!(cfg.all_tags().count(), 18);
        assert_eq!(cfg.plants[2].tags.u3, "ns=3;i=1025");
    }

    #[test]
    fn test_roundtrip_serialization() {
        let cfg = TwinConfig::default();
        let json = cfg.to_json().unwrap();
        let cfg2: TwinConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, cfg2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TwinConfig::default().to_json().unwrap().as_bytes())
            .unwrap();

        let cfg = TwinConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.cadence.randomizer_s, 5.0);
        assert_eq!(cfg.store.op_timeout_ms, 50);
    }

    #[test]
    fn test_missing_optional_sections_use_defaults() {
        let mut value = serde_json::to_value(TwinConfig::default()).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("integrator");
        obj.remove("telemetry");

        let cfg: TwinConfig = serde_json::from_value(value).unwrap();
        assert_eq!(cfg.integrator, IntegratorSettings::default());
        assert!(!cfg.telemetry.enabled);
    }

    #[test]
    fn test_rejects_bad_gain_shape() {
        let mut cfg = TwinConfig::default();
        for row in &mut cfg.gain {
            row.pop();
        }
        assert!(matches!(cfg.validate(), Err(TwinError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_radius() {
        let mut cfg = TwinConfig::default();
        cfg.plants[1].tanks[2].r_bottom = 0.0;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("plant 1 tank 3"), "{err}");
    }

    #[test]
    fn test_rejects_reference_outside_band() {
        let mut cfg = TwinConfig::default();
        cfg.plants[0].initial_reference[0] = 3.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_cadence() {
        let mut cfg = TwinConfig::default();
        cfg.cadence.control_s = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = TwinConfig::default();
        cfg.cadence.randomizer_s = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_plant_list() {
        let cfg = TwinConfig {
            plants: Vec::new(),
            ..TwinConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
