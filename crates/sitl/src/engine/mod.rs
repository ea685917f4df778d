//! Interface to the physics engine hosting the bridge.

pub mod lightweight;

use std::time::Duration;

pub use lightweight::{LightweightConfig, LightweightModel};

/// Receives actuator outputs once per step.
///
/// Only the methods matching the configured actuator mode are called.
pub trait ActuatorSink {
    /// Motor velocities in channel order, one per motor channel.
    fn apply_motor_velocities(&mut self, velocities: &[f64]);

    /// Servo positions in channel order, one per servo channel.
    fn apply_servo_positions(&mut self, positions: &[f64]);

    /// Aggregated thrust and torque.
    fn apply_thrust_torque(&mut self, thrust: f64, torque: f64);
}

/// Per-step information handed to the bridge by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// Simulation time after this step.
    pub sim_time: Duration,
    /// Length of this step.
    pub step: Duration,
    /// Paused steps do not advance time and are ignored.
    pub paused: bool,
}

impl StepInfo {
    pub fn running(sim_time: Duration, step: Duration) -> Self {
        Self {
            sim_time,
            step,
            paused: false,
        }
    }

    pub fn paused(sim_time: Duration) -> Self {
        Self {
            sim_time,
            step: Duration::ZERO,
            paused: true,
        }
    }
}

/// Sink that remembers the last values it was given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSink {
    pub motors: Vec<f64>,
    pub servos: Vec<f64>,
    pub thrust_torque: Option<(f64, f64)>,
    /// Number of steps in which anything was applied.
    pub applications: usize,
}

impl ActuatorSink for RecordingSink {
    fn apply_motor_velocities(&mut self, velocities: &[f64]) {
        self.motors = velocities.to_vec();
        self.applications += 1;
    }

    fn apply_servo_positions(&mut self, positions: &[f64]) {
        self.servos = positions.to_vec();
    }

    fn apply_thrust_torque(&mut self, thrust: f64, torque: f64) {
        self.thrust_torque = Some((thrust, torque));
        self.applications += 1;
    }
}
