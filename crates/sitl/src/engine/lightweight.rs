//! Lightweight multicopter kinematics.
//!
//! Built-in vertical/yaw model with no external dependencies, used by the
//! demo binary and the tests in place of a physics engine. It produces
//! noise-free samples in FLU body / ENU world convention; noise and frame
//! conversion are the bridge's job.

use nalgebra::{UnitQuaternion, Vector3};

use super::ActuatorSink;
use crate::config::HomePosition;
use crate::sensors::METERS_PER_DEG_LAT;
use crate::types::{
    BarometerReading, GpsFix, GpsFixType, ImuReading, MagnetometerReading, PoseSample,
    RangeReading, SensorSample,
};

const GRAVITY: f64 = 9.80665;

/// Configuration for the lightweight model.
#[derive(Debug, Clone)]
pub struct LightweightConfig {
    pub mass_kg: f64,
    /// Thrust per motor = motor_constant * ω².
    pub motor_constant: f64,
    /// Reaction torque per unit thrust.
    pub moment_constant: f64,
    /// Yaw moment of inertia in kg·m².
    pub yaw_inertia: f64,
    /// Spin direction per motor (+1 CCW, -1 CW).
    pub rotor_directions: Vec<f64>,
    /// Simulation step size in microseconds.
    pub step_size_us: u64,
    /// GPS update rate in Hz.
    pub gps_rate_hz: u32,
    /// Earth magnetic field in ENU, Gauss.
    pub magnetic_field_enu: Vector3<f64>,
    pub home: HomePosition,
}

impl Default for LightweightConfig {
    fn default() -> Self {
        Self {
            mass_kg: 1.5,
            motor_constant: 8.548_58e-6,
            moment_constant: 0.016,
            yaw_inertia: 0.03,
            rotor_directions: vec![1.0, 1.0, -1.0, -1.0],
            step_size_us: 4_000, // 250 Hz
            gps_rate_hz: 10,
            magnetic_field_enu: Vector3::new(0.0, 0.21, -0.42),
            home: HomePosition::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ModelState {
    /// Position relative to home, ENU, meters.
    position: Vector3<f64>,
    /// ENU velocity, m/s.
    velocity: Vector3<f64>,
    /// World acceleration of the last step, m/s².
    acceleration: Vector3<f64>,
    /// Heading about the up axis, radians (0 = east).
    yaw: f64,
    yaw_rate: f64,
}

/// Actuator input last received from the bridge.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Motors(Vec<f64>),
    ThrustTorque { thrust: f64, torque: f64 },
}

/// Self-contained multicopter model driven by the bridge's actuator outputs.
#[derive(Debug)]
pub struct LightweightModel {
    config: LightweightConfig,
    state: ModelState,
    input: Input,
    sim_time_us: u64,
    step_count: u64,
    imu_sequence: u8,
}

impl LightweightModel {
    pub fn new(config: LightweightConfig) -> Self {
        Self {
            config,
            state: ModelState::default(),
            input: Input::Motors(Vec::new()),
            sim_time_us: 0,
            step_count: 0,
            imu_sequence: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(LightweightConfig::default())
    }

    pub fn step_size_us(&self) -> u64 {
        self.config.step_size_us
    }

    /// Collective thrust (N) and yaw torque (N·m) from the current input.
    fn forces(&self) -> (f64, f64) {
        match &self.input {
            Input::Motors(omega) => {
                omega
                    .iter()
                    .enumerate()
                    .fold((0.0, 0.0), |(thrust, torque), (i, w)| {
                        let f = self.config.motor_constant * w * w.abs();
                        let dir = self.config.rotor_directions.get(i).copied().unwrap_or(0.0);
                        (thrust + f, torque + dir * f * self.config.moment_constant)
                    })
            }
            Input::ThrustTorque { thrust, torque } => (*thrust, *torque),
        }
    }

    /// Advance the model by one configured step.
    pub fn step(&mut self) {
        let dt = self.config.step_size_us as f64 / 1_000_000.0;
        let (thrust, torque) = self.forces();

        let mut accel = Vector3::new(0.0, 0.0, thrust / self.config.mass_kg - GRAVITY);
        let on_ground = self.state.position.z <= 0.0;
        if on_ground && accel.z < 0.0 {
            accel.z = 0.0;
            self.state.velocity.z = self.state.velocity.z.max(0.0);
        }
        self.state.acceleration = accel;
        self.state.velocity += accel * dt;
        self.state.position += self.state.velocity * dt;
        if self.state.position.z < 0.0 {
            self.state.position.z = 0.0;
            self.state.velocity.z = 0.0;
        }

        self.state.yaw_rate += torque / self.config.yaw_inertia * dt;
        if on_ground && thrust < self.config.mass_kg * GRAVITY {
            // Ground friction holds heading.
            self.state.yaw_rate = 0.0;
        }
        self.state.yaw = normalize_angle(self.state.yaw + self.state.yaw_rate * dt);

        self.sim_time_us += self.config.step_size_us;
        self.step_count += 1;
        self.imu_sequence = self.imu_sequence.wrapping_add(1);
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.0, 0.0, self.state.yaw)
    }

    /// Samples for the current step, in FLU / ENU.
    ///
    /// Repeated calls within one step repeat the same IMU sequence number.
    pub fn samples(&self) -> Vec<SensorSample> {
        let t = self.sim_time_us;
        let q = self.orientation();
        let mut out = Vec::with_capacity(6);

        out.push(SensorSample::Pose(PoseSample {
            timestamp_us: t,
            orientation: q,
            position_m: self.state.position,
            linear_velocity_ms: self.state.velocity,
            angular_velocity_rads: Vector3::new(0.0, 0.0, self.state.yaw_rate),
        }));

        // Specific force: what an accelerometer measures.
        let specific_force = self.state.acceleration + Vector3::new(0.0, 0.0, GRAVITY);
        out.push(SensorSample::Imu(ImuReading {
            timestamp_us: t,
            sequence: self.imu_sequence,
            linear_acceleration_mss: q.inverse_transform_vector(&specific_force),
            angular_velocity_rads: Vector3::new(0.0, 0.0, self.state.yaw_rate),
        }));

        let alt_amsl = self.config.home.alt_m + self.state.position.z;
        out.push(SensorSample::Barometer(BarometerReading {
            timestamp_us: t,
            pressure_pa: 101_325.0 * (1.0 - alt_amsl / 44_330.8).powf(1.0 / 0.190_263),
            temperature_c: 15.0 - 0.0065 * alt_amsl,
        }));

        out.push(SensorSample::Magnetometer(MagnetometerReading {
            timestamp_us: t,
            field_gauss: q.inverse_transform_vector(&self.config.magnetic_field_enu),
        }));

        if let Some(fix) = self.gps_fix() {
            out.push(SensorSample::Gps(fix));
        }

        out.push(SensorSample::RangeFinder(RangeReading {
            timestamp_us: t,
            distance_m: self.state.position.z,
        }));

        out
    }

    /// GPS fix at the configured rate.
    fn gps_fix(&self) -> Option<GpsFix> {
        let fix_period_us = self
            .config
            .step_size_us
            .saturating_mul(u64::from(self.config.gps_rate_hz));
        if fix_period_us == 0 {
            return None;
        }
        let steps_per_fix = (1_000_000 / fix_period_us).max(1);
        if self.step_count % steps_per_fix != 0 {
            return None;
        }

        let home = &self.config.home;
        let meters_per_deg_lon = METERS_PER_DEG_LAT * home.lat_deg.to_radians().cos();
        Some(GpsFix {
            timestamp_us: self.sim_time_us,
            lat_deg: home.lat_deg + self.state.position.y / METERS_PER_DEG_LAT,
            lon_deg: home.lon_deg + self.state.position.x / meters_per_deg_lon,
            alt_m: home.alt_m + self.state.position.z,
            velocity_ms: self.state.velocity,
            eph_m: 0.3,
            epv_m: 0.4,
            satellites: 10,
            fix_type: GpsFixType::Fix3D,
        })
    }

    pub fn sim_time_us(&self) -> u64 {
        self.sim_time_us
    }

    /// Altitude above home in meters.
    pub fn altitude(&self) -> f64 {
        self.state.position.z
    }

    pub fn climb_rate(&self) -> f64 {
        self.state.velocity.z
    }

    /// Heading in radians (0 = east, counter-clockwise positive).
    pub fn yaw(&self) -> f64 {
        self.state.yaw
    }

    pub fn motor_velocities(&self) -> &[f64] {
        match &self.input {
            Input::Motors(omega) => omega,
            Input::ThrustTorque { .. } => &[],
        }
    }
}

impl ActuatorSink for LightweightModel {
    fn apply_motor_velocities(&mut self, velocities: &[f64]) {
        self.input = Input::Motors(velocities.to_vec());
    }

    fn apply_servo_positions(&mut self, _positions: &[f64]) {}

    fn apply_thrust_torque(&mut self, thrust: f64, torque: f64) {
        self.input = Input::ThrustTorque { thrust, torque };
    }
}

/// Normalize angle to [-pi, pi].
fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * std::f64::consts::PI);
    if a > std::f64::consts::PI {
        a -= 2.0 * std::f64::consts::PI;
    } else if a < -std::f64::consts::PI {
        a += 2.0 * std::f64::consts::PI;
    }
    a
}
