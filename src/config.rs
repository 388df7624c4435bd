use serde::{Deserialize, Serialize};

use crate::error::{FacadeError, FacadeResult};

/// Default simulation step duration in seconds.
pub const DEFAULT_TIME_STEP: f64 = 0.01;

/// Default solver iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Default number of frames a session may simulate.
pub const DEFAULT_MAX_FRAMES: u32 = 1000;

/// Gravity magnitude along -Y in m/s^2.
pub const DEFAULT_GRAVITY: f64 = 9.8;

/// Capacity of the lifecycle event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handles are issued starting from this value.
pub const FIRST_SESSION_HANDLE: u64 = 1;

/// Most texture channels a legacy blob header may declare.
pub const MAX_TEXTURE_CHANNELS: u32 = 64;

/// Encoding the kernel uses for simulation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Binary,
}

/// Immutable per-session configuration, validated at `create_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Simulation step duration in seconds. Must be positive.
    pub time_step: f64,
    /// Solver iteration cap per step. Must be positive.
    pub max_iterations: u32,
    pub output_format: OutputFormat,
    pub max_frames: u32,
    pub gravity: f64,
    pub friction: f64,
    pub obs_friction: f64,
    pub enable_collisions: bool,
    pub enable_physics: bool,
    pub enable_wind: bool,
    pub wind_density: f64,
    pub wind_drag: f64,
    pub should_remesh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_format: OutputFormat::Json,
            max_frames: DEFAULT_MAX_FRAMES,
            gravity: DEFAULT_GRAVITY,
            friction: 0.6,
            obs_friction: 0.3,
            enable_collisions: true,
            enable_physics: true,
            enable_wind: false,
            wind_density: 1.0,
            wind_drag: 0.0,
            should_remesh: false,
        }
    }
}

impl SessionConfig {
    pub fn new(time_step: f64, max_iterations: u32) -> Self {
        Self {
            time_step,
            max_iterations,
            ..Self::default()
        }
    }

    /// Check option bounds. Nothing is registered when this fails.
    pub fn validate(&self) -> FacadeResult<()> {
        if !self.time_step.is_finite() || self.time_step <= 0.0 {
            return Err(FacadeError::InvalidConfig(format!(
                "time_step must be > 0, got {}",
                self.time_step
            )));
        }
        if self.max_iterations == 0 {
            return Err(FacadeError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if self.max_frames == 0 {
            return Err(FacadeError::InvalidConfig(
                "max_frames must be > 0".to_string(),
            ));
        }
        if !self.gravity.is_finite() {
            return Err(FacadeError::InvalidConfig(
                "gravity must be finite".to_string(),
            ));
        }
        for (name, value) in [
            ("friction", self.friction),
            ("obs_friction", self.obs_friction),
            ("wind_density", self.wind_density),
            ("wind_drag", self.wind_drag),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FacadeError::InvalidConfig(format!(
                    "{} must be a finite value >= 0, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Top-level configuration for the façade.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Address the HTTP control server binds to.
    pub bind_addr: String,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            event_capacity: EVENT_CHANNEL_CAPACITY,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let cases = [
            SessionConfig::new(-1.0, 50),
            SessionConfig::new(0.0, 50),
            SessionConfig::new(f64::NAN, 50),
            SessionConfig::new(0.01, 0),
            SessionConfig {
                friction: -0.5,
                ..SessionConfig::default()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig, "{:?}", config);
        }
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"time_step": 0.005, "output_format": "binary"}"#).unwrap();
        assert_eq!(config.time_step, 0.005);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.output_format, OutputFormat::Binary);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let parsed: Result<SessionConfig, _> = serde_json::from_str(r#"{"timestep": 0.1}"#);
        assert!(parsed.is_err());
    }
}
