//! Output channel mapping table.
//!
//! Built once from the configured entries and shared read-only with the
//! actuator dispatcher. Unconfigured slots are [`ControlType::Unused`].

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::MAX_CHANNELS;

/// What a channel drives in the simulated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Motor,
    Servo,
    #[default]
    Unused,
}

/// One configured channel as it appears in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Output slot, 0..16.
    pub index: usize,
    pub control: ControlType,
    #[serde(default)]
    pub zero_position_disarmed: f64,
    #[serde(default)]
    pub zero_position_armed: f64,
    #[serde(default)]
    pub input_offset: f64,
    #[serde(default = "default_scaling")]
    pub scaling: f64,
    /// Index into the decoded command; defaults to `index`.
    #[serde(default)]
    pub source_index: Option<usize>,
}

fn default_scaling() -> f64 {
    1.0
}

impl ChannelEntry {
    /// Motor channel reading its own slot, with no offset.
    pub fn motor(index: usize, scaling: f64, zero_disarmed: f64, zero_armed: f64) -> Self {
        Self {
            index,
            control: ControlType::Motor,
            zero_position_disarmed: zero_disarmed,
            zero_position_armed: zero_armed,
            input_offset: 0.0,
            scaling,
            source_index: None,
        }
    }

    /// Servo channel reading its own slot, with no offset.
    pub fn servo(index: usize, scaling: f64, zero_disarmed: f64, zero_armed: f64) -> Self {
        Self {
            control: ControlType::Servo,
            ..Self::motor(index, scaling, zero_disarmed, zero_armed)
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.input_offset = offset;
        self
    }

    pub fn with_source(mut self, source_index: usize) -> Self {
        self.source_index = Some(source_index);
        self
    }
}

/// Validated mapping for one output slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMapping {
    pub control: ControlType,
    pub zero_position_disarmed: f64,
    pub zero_position_armed: f64,
    pub input_offset: f64,
    pub scaling: f64,
    pub source_index: usize,
}

impl ChannelMapping {
    fn unused(index: usize) -> Self {
        Self {
            control: ControlType::Unused,
            zero_position_disarmed: 0.0,
            zero_position_armed: 0.0,
            input_offset: 0.0,
            scaling: 1.0,
            source_index: index,
        }
    }
}

/// Immutable table of all [`MAX_CHANNELS`] output slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    slots: [ChannelMapping; MAX_CHANNELS],
}

impl ChannelConfig {
    /// Validate entries and build the table.
    pub fn from_entries(entries: &[ChannelEntry]) -> Result<Self, ConfigError> {
        let mut slots: [ChannelMapping; MAX_CHANNELS] =
            core::array::from_fn(ChannelMapping::unused);
        let mut seen = [false; MAX_CHANNELS];

        for entry in entries {
            if entry.index >= MAX_CHANNELS {
                return Err(ConfigError::ChannelIndexOutOfRange {
                    index: entry.index,
                    max: MAX_CHANNELS - 1,
                });
            }
            if seen[entry.index] {
                return Err(ConfigError::DuplicateChannel(entry.index));
            }
            seen[entry.index] = true;

            let source_index = entry.source_index.unwrap_or(entry.index);
            if source_index >= MAX_CHANNELS {
                return Err(ConfigError::SourceIndexOutOfRange {
                    channel: entry.index,
                    source_index,
                    max: MAX_CHANNELS - 1,
                });
            }

            for (name, value) in [
                ("zero_position_disarmed", entry.zero_position_disarmed),
                ("zero_position_armed", entry.zero_position_armed),
                ("input_offset", entry.input_offset),
                ("scaling", entry.scaling),
            ] {
                if !value.is_finite() {
                    return Err(ConfigError::NonFinite {
                        field: format!("channel {} {name}", entry.index),
                    });
                }
            }

            slots[entry.index] = ChannelMapping {
                control: entry.control,
                zero_position_disarmed: entry.zero_position_disarmed,
                zero_position_armed: entry.zero_position_armed,
                input_offset: entry.input_offset,
                scaling: entry.scaling,
                source_index,
            };
        }

        Ok(Self { slots })
    }

    pub fn get(&self, index: usize) -> Option<&ChannelMapping> {
        self.slots.get(index)
    }

    /// All slots with their index, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ChannelMapping)> {
        self.slots.iter().enumerate()
    }

    pub fn count(&self, control: ControlType) -> usize {
        self.slots.iter().filter(|m| m.control == control).count()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(ChannelMapping::unused),
        }
    }
}
