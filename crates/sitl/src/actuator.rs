//! Actuator command dispatch.
//!
//! Decoded commands are mapped through the channel table into motor
//! velocities and servo positions, or into one thrust/torque pair in
//! aggregated mode. The most recent command is held and re-published every
//! step until a newer one arrives.

use std::sync::Arc;

use log::{debug, info};

use crate::config::{ActuatorMode, ChannelConfig, ChannelMapping, ControlType};
use crate::engine::ActuatorSink;
use crate::types::ActuatorCommand;

/// Model-side values for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorOutput {
    PerChannel { motors: Vec<f64>, servos: Vec<f64> },
    ThrustTorque { thrust: f64, torque: f64 },
}

impl ActuatorOutput {
    pub fn apply_to(&self, sink: &mut dyn ActuatorSink) {
        match self {
            ActuatorOutput::PerChannel { motors, servos } => {
                sink.apply_motor_velocities(motors);
                sink.apply_servo_positions(servos);
            }
            ActuatorOutput::ThrustTorque { thrust, torque } => {
                sink.apply_thrust_torque(*thrust, *torque);
            }
        }
    }
}

/// Value of one motor or servo channel.
pub fn channel_output(mapping: &ChannelMapping, command: &ActuatorCommand) -> f64 {
    match command.channel(mapping.source_index) {
        Some(raw) if command.armed => {
            (raw + mapping.input_offset) * mapping.scaling + mapping.zero_position_armed
        }
        _ => mapping.zero_position_disarmed,
    }
}

/// Applies the channel table to decoded commands.
#[derive(Debug)]
pub struct ActuatorDispatcher {
    channels: Arc<ChannelConfig>,
    mode: ActuatorMode,
    latest: Option<ActuatorCommand>,
}

impl ActuatorDispatcher {
    pub fn new(channels: Arc<ChannelConfig>, mode: ActuatorMode) -> Self {
        Self {
            channels,
            mode,
            latest: None,
        }
    }

    /// Map a command to outputs without changing dispatcher state.
    pub fn dispatch(&self, command: &ActuatorCommand) -> ActuatorOutput {
        match self.mode {
            ActuatorMode::PerChannel => {
                let mut motors = Vec::new();
                let mut servos = Vec::new();
                for (_, mapping) in self.channels.iter() {
                    match mapping.control {
                        ControlType::Motor => motors.push(channel_output(mapping, command)),
                        ControlType::Servo => servos.push(channel_output(mapping, command)),
                        ControlType::Unused => {}
                    }
                }
                ActuatorOutput::PerChannel { motors, servos }
            }
            ActuatorMode::Aggregated {
                thrust_index,
                torque_index,
                thrust_scaling,
                torque_scaling,
            } => {
                let scaled = |index: usize, scaling: f64| match command.channel(index) {
                    Some(raw) if command.armed => raw * scaling,
                    _ => 0.0,
                };
                ActuatorOutput::ThrustTorque {
                    thrust: scaled(thrust_index, thrust_scaling),
                    torque: scaled(torque_index, torque_scaling),
                }
            }
        }
    }

    /// Accept a newly decoded command.
    ///
    /// Returns `false` if it is older than the command already held.
    pub fn submit(&mut self, command: ActuatorCommand) -> bool {
        if let Some(held) = &self.latest {
            if command.timestamp_us < held.timestamp_us {
                debug!(
                    "actuator: dropped stale command t={} us (holding t={} us)",
                    command.timestamp_us, held.timestamp_us
                );
                return false;
            }
            if held.armed != command.armed {
                info!(
                    "actuator: autopilot {}",
                    if command.armed { "armed" } else { "disarmed" }
                );
            }
        }
        self.latest = Some(command);
        true
    }

    /// Push the held command's outputs to the engine.
    ///
    /// Nothing is published before the first command arrives.
    pub fn publish(&self, sink: &mut dyn ActuatorSink) -> Option<ActuatorOutput> {
        let output = self.dispatch(self.latest.as_ref()?);
        output.apply_to(sink);
        Some(output)
    }

    pub fn latest(&self) -> Option<&ActuatorCommand> {
        self.latest.as_ref()
    }

    pub fn channels(&self) -> &Arc<ChannelConfig> {
        &self.channels
    }
}
