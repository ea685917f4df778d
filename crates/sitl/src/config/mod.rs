//! Bridge configuration.
//!
//! Every section has working defaults, so a configuration file only needs to
//! name what differs. [`BridgeConfig::validate`] is the single place where
//! fatal configuration errors are detected.

pub mod channels;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use channels::{ChannelConfig, ChannelEntry, ChannelMapping, ControlType};

use crate::error::ConfigError;
use crate::types::{ActuatorKind, MAX_CHANNELS};

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub transport: TransportConfig,
    pub protocol: ProtocolConfig,
    pub lockstep: LockstepConfig,
    pub noise: NoiseConfig,
    pub home: HomePosition,
    pub range_finder: RangeFinderConfig,
    pub actuators: ActuatorConfig,
}

impl BridgeConfig {
    /// Parse a JSON configuration. Does not validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file. Does not validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every cross-field constraint and build the channel table.
    pub fn validate(&self) -> Result<ChannelConfig, ConfigError> {
        self.transport.validate()?;
        self.lockstep.validate()?;
        self.noise.validate()?;
        if !(self.range_finder.min_distance_m >= 0.0
            && self.range_finder.max_distance_m > self.range_finder.min_distance_m)
        {
            return Err(ConfigError::InvalidValue {
                field: "range_finder",
                reason: "expected 0 <= min_distance_m < max_distance_m".into(),
            });
        }
        if let ActuatorMode::Aggregated {
            thrust_index,
            torque_index,
            thrust_scaling,
            torque_scaling,
        } = self.actuators.mode
        {
            for index in [thrust_index, torque_index] {
                if index >= MAX_CHANNELS {
                    return Err(ConfigError::ChannelIndexOutOfRange {
                        index,
                        max: MAX_CHANNELS - 1,
                    });
                }
            }
            if !thrust_scaling.is_finite() || !torque_scaling.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: "actuators.mode scaling".into(),
                });
            }
        }
        ChannelConfig::from_entries(&self.actuators.channels)
    }
}

/// Autopilot endpoint and socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Autopilot hostname or address.
    pub host: String,
    /// Autopilot UDP port.
    pub port: u16,
    /// Local UDP port, 0 for an ephemeral port.
    pub local_port: u16,
    /// Delay between failed resolution attempts.
    pub resolve_retry_ms: u64,
    /// Delay before reconnecting after a socket failure.
    pub reconnect_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 14560,
            local_port: 0,
            resolve_retry_ms: 500,
            reconnect_delay_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn resolve_retry(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "transport.host",
                reason: "empty hostname".into(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transport.port",
                reason: "port must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Wire protocol revision, selected statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    /// MAVLink 1 framing, one message per sensor category.
    V1,
    /// MAVLink 2 framing, combined HIL_SENSOR message.
    #[default]
    V2,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(ConfigError::UnsupportedProtocolVersion(other)),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(v: ProtocolVersion) -> Self {
        match v {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub version: ProtocolVersion,
    /// MAVLink system id stamped on outbound frames.
    pub system_id: u8,
    /// MAVLink component id stamped on outbound frames.
    pub component_id: u8,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V2,
            system_id: 1,
            component_id: 200,
        }
    }
}

/// Pacing and synchronization settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepConfig {
    pub enabled: bool,
    /// Simulation speed relative to wall clock.
    pub speed_factor: f64,
    /// Minimum sim-time spacing between sensor messages without lockstep.
    pub sensor_interval_us: u64,
    /// Send on every Nth eligible step without lockstep.
    pub skip_factor: u32,
    /// Upper bound on a lockstep wait.
    pub timeout_ms: u64,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed_factor: 1.0,
            sensor_interval_us: 4_000,
            skip_factor: 1,
            timeout_ms: 1_000,
        }
    }
}

impl LockstepConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.speed_factor.is_finite() && self.speed_factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "lockstep.speed_factor",
                reason: format!("{} is not a positive number", self.speed_factor),
            });
        }
        if self.sensor_interval_us == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lockstep.sensor_interval_us",
                reason: "interval must be non-zero".into(),
            });
        }
        if self.skip_factor == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lockstep.skip_factor",
                reason: "skip factor must be at least 1".into(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lockstep.timeout_ms",
                reason: "timeout must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Additive Gaussian noise: `value + mean + stddev * N(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseModel {
    pub mean: f64,
    pub stddev: f64,
}

impl NoiseModel {
    pub const NONE: NoiseModel = NoiseModel {
        mean: 0.0,
        stddev: 0.0,
    };

    pub fn new(mean: f64, stddev: f64) -> Self {
        Self { mean, stddev }
    }
}

/// Per-sensor noise settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// RNG seed for reproducible runs. None = seeded from entropy.
    pub seed: Option<u64>,
    /// Accelerometer, m/s².
    pub accel: NoiseModel,
    /// Gyroscope, rad/s.
    pub gyro: NoiseModel,
    /// Magnetometer, Gauss.
    pub magnetometer: NoiseModel,
    /// Barometric pressure, Pa.
    pub baro_pressure: NoiseModel,
    /// GPS horizontal position, m.
    pub gps_horizontal: NoiseModel,
    /// GPS altitude, m.
    pub gps_vertical: NoiseModel,
    /// Range finder distance, m.
    pub range: NoiseModel,
}

impl NoiseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, model) in [
            ("accel", self.accel),
            ("gyro", self.gyro),
            ("magnetometer", self.magnetometer),
            ("baro_pressure", self.baro_pressure),
            ("gps_horizontal", self.gps_horizontal),
            ("gps_vertical", self.gps_vertical),
            ("range", self.range),
        ] {
            if !model.mean.is_finite() || !model.stddev.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: format!("noise.{name}"),
                });
            }
            if model.stddev < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "noise",
                    reason: format!("{name} stddev is negative"),
                });
            }
        }
        Ok(())
    }
}

/// Geodetic origin of the simulation's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomePosition {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Default for HomePosition {
    fn default() -> Self {
        Self {
            lat_deg: 47.397742,
            lon_deg: 8.545594,
            alt_m: 488.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeFinderConfig {
    pub min_distance_m: f64,
    pub max_distance_m: f64,
}

impl Default for RangeFinderConfig {
    fn default() -> Self {
        Self {
            min_distance_m: 0.06,
            max_distance_m: 35.0,
        }
    }
}

/// How decoded commands are turned into model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorMode {
    /// Per-channel motor velocities and servo positions.
    #[default]
    PerChannel,
    /// One thrust and one torque scalar taken from two command slots.
    Aggregated {
        thrust_index: usize,
        torque_index: usize,
        thrust_scaling: f64,
        torque_scaling: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub mode: ActuatorMode,
    pub channels: Vec<ChannelEntry>,
}

impl Default for ActuatorConfig {
    /// Quadrotor: four motors, scaled to rad/s.
    fn default() -> Self {
        Self {
            mode: ActuatorMode::PerChannel,
            channels: (0..4)
                .map(|i| ChannelEntry::motor(i, 1000.0, 0.0, 100.0))
                .collect(),
        }
    }
}

impl ActuatorConfig {
    /// Logical kind tagged on decoded commands.
    pub fn command_kind(&self) -> ActuatorKind {
        match self.mode {
            ActuatorMode::Aggregated { .. } => ActuatorKind::ThrustTorque,
            ActuatorMode::PerChannel => {
                let any_motor = self
                    .channels
                    .iter()
                    .any(|c| c.control == ControlType::Motor);
                let any_servo = self
                    .channels
                    .iter()
                    .any(|c| c.control == ControlType::Servo);
                if any_servo && !any_motor {
                    ActuatorKind::ServoPositions
                } else {
                    ActuatorKind::MotorSpeeds
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        let table = config.validate().unwrap();
        assert_eq!(table.count(ControlType::Motor), 4);
        assert!(config.lockstep.enabled);
        assert_eq!(config.lockstep.sensor_interval_us, 4_000);
        assert_eq!(config.protocol.version, ProtocolVersion::V2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "transport": { "host": "px4.local", "port": 4560 },
            "protocol": { "version": 1 },
            "lockstep": { "enabled": false, "speed_factor": 2.0 }
        }"#;
        let config = BridgeConfig::from_json_str(json).unwrap();
        assert_eq!(config.transport.host, "px4.local");
        assert_eq!(config.transport.port, 4560);
        assert_eq!(config.transport.resolve_retry_ms, 500);
        assert_eq!(config.protocol.version, ProtocolVersion::V1);
        assert!(!config.lockstep.enabled);
        assert!((config.lockstep.speed_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.lockstep.timeout_ms, 1_000);
    }

    #[test]
    fn test_channels_and_mode_from_json() {
        let json = r#"{
            "actuators": {
                "mode": { "type": "aggregated", "thrust_index": 0, "torque_index": 1,
                          "thrust_scaling": 2.0, "torque_scaling": 0.5 },
                "channels": [
                    { "index": 0, "control": "motor", "scaling": 10.0 },
                    { "index": 3, "control": "servo", "source_index": 7 }
                ]
            }
        }"#;
        let config = BridgeConfig::from_json_str(json).unwrap();
        assert_eq!(config.actuators.command_kind(), ActuatorKind::ThrustTorque);
        let table = config.validate().unwrap();
        assert_eq!(table.get(3).unwrap().source_index, 7);
        assert!((table.get(3).unwrap().scaling - 1.0).abs() < f64::EPSILON);
        assert!((table.get(0).unwrap().scaling - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unsupported_protocol_version_rejected() {
        let result = BridgeConfig::from_json_str(r#"{ "protocol": { "version": 3 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_lockstep_values_rejected() {
        let mut config = BridgeConfig::default();
        config.lockstep.skip_factor = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.lockstep.speed_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aggregated_index_out_of_range_rejected() {
        let mut config = BridgeConfig::default();
        config.actuators.mode = ActuatorMode::Aggregated {
            thrust_index: 0,
            torque_index: 16,
            thrust_scaling: 1.0,
            torque_scaling: 1.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChannelIndexOutOfRange { index: 16, .. })
        ));
    }

    #[test]
    fn test_command_kind_servo_only() {
        let config = ActuatorConfig {
            mode: ActuatorMode::PerChannel,
            channels: vec![ChannelEntry::servo(0, 1.0, 0.0, 0.0)],
        };
        assert_eq!(config.command_kind(), ActuatorKind::ServoPositions);
    }

    #[test]
    fn test_negative_noise_stddev_rejected() {
        let mut config = BridgeConfig::default();
        config.noise.gyro = NoiseModel::new(0.0, -1.0);
        assert!(config.validate().is_err());
    }
}
