use core::fmt;

use nalgebra::{UnitQuaternion, Vector3};

/// Maximum number of actuator output channels carried by one command.
pub const MAX_CHANNELS: usize = 16;

/// GPS fix type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpsFixType {
    NoFix,
    Fix2D,
    #[default]
    Fix3D,
}

impl GpsFixType {
    /// MAVLink `GPS_FIX_TYPE` numeric value.
    pub fn as_mav(self) -> u8 {
        match self {
            GpsFixType::NoFix => 1,
            GpsFixType::Fix2D => 2,
            GpsFixType::Fix3D => 3,
        }
    }
}

/// Ground-truth vehicle pose.
///
/// Produced by the simulation in FLU body / ENU world convention; batches
/// handed to the codec carry it in FRD / NED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    /// Simulation time in microseconds.
    pub timestamp_us: u64,
    /// Body-to-world orientation.
    pub orientation: UnitQuaternion<f64>,
    /// Position relative to the home origin in meters.
    pub position_m: Vector3<f64>,
    /// World-frame linear velocity in m/s.
    pub linear_velocity_ms: Vector3<f64>,
    /// Body-frame angular velocity in rad/s.
    pub angular_velocity_rads: Vector3<f64>,
}

/// IMU sample with the simulator's rolling 8-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// Simulation time in microseconds.
    pub timestamp_us: u64,
    /// Rolling sequence number used for loss/duplicate detection.
    pub sequence: u8,
    /// Specific force in m/s² (body frame).
    pub linear_acceleration_mss: Vector3<f64>,
    /// Angular rate in rad/s (body frame).
    pub angular_velocity_rads: Vector3<f64>,
}

/// Barometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarometerReading {
    pub timestamp_us: u64,
    /// Absolute pressure in Pa.
    pub pressure_pa: f64,
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
}

impl BarometerReading {
    /// Pressure altitude in meters from the ISA troposphere model.
    pub fn pressure_altitude_m(&self) -> f64 {
        const SEA_LEVEL_PA: f64 = 101_325.0;
        const EXPONENT: f64 = 0.190_263;
        const SCALE_M: f64 = 44_330.8;
        if self.pressure_pa <= 0.0 {
            return 0.0;
        }
        SCALE_M * (1.0 - (self.pressure_pa / SEA_LEVEL_PA).powf(EXPONENT))
    }
}

/// Magnetometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerReading {
    pub timestamp_us: u64,
    /// Magnetic field in Gauss (body frame).
    pub field_gauss: Vector3<f64>,
}

/// GPS position/velocity fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub timestamp_us: u64,
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Altitude above mean sea level in meters.
    pub alt_m: f64,
    /// World-frame velocity in m/s.
    pub velocity_ms: Vector3<f64>,
    /// Horizontal position accuracy in meters.
    pub eph_m: f64,
    /// Vertical position accuracy in meters.
    pub epv_m: f64,
    pub satellites: u8,
    pub fix_type: GpsFixType,
}

/// Optical-flow sensor sample (already in the autopilot's sensor convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticalFlowReading {
    pub timestamp_us: u64,
    /// Integration interval in microseconds.
    pub integration_time_us: u32,
    /// Integrated flow around the x and y axes in radians.
    pub integrated_flow_rad: [f64; 2],
    /// Integrated gyro over the same interval in radians.
    pub integrated_gyro_rad: Vector3<f64>,
    /// Ground distance in meters, negative when unknown.
    pub distance_m: f64,
    /// Flow quality 0..=255.
    pub quality: u8,
    pub temperature_c: f64,
}

/// Downward range finder sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeReading {
    pub timestamp_us: u64,
    pub distance_m: f64,
}

/// Sensor category, in batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKind {
    Pose,
    Imu,
    Barometer,
    Magnetometer,
    Gps,
    OpticalFlow,
    RangeFinder,
}

/// One sensor reading of any kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    Pose(PoseSample),
    Imu(ImuReading),
    Barometer(BarometerReading),
    Magnetometer(MagnetometerReading),
    Gps(GpsFix),
    OpticalFlow(OpticalFlowReading),
    RangeFinder(RangeReading),
}

impl SensorSample {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSample::Pose(_) => SensorKind::Pose,
            SensorSample::Imu(_) => SensorKind::Imu,
            SensorSample::Barometer(_) => SensorKind::Barometer,
            SensorSample::Magnetometer(_) => SensorKind::Magnetometer,
            SensorSample::Gps(_) => SensorKind::Gps,
            SensorSample::OpticalFlow(_) => SensorKind::OpticalFlow,
            SensorSample::RangeFinder(_) => SensorKind::RangeFinder,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            SensorSample::Pose(s) => s.timestamp_us,
            SensorSample::Imu(s) => s.timestamp_us,
            SensorSample::Barometer(s) => s.timestamp_us,
            SensorSample::Magnetometer(s) => s.timestamp_us,
            SensorSample::Gps(s) => s.timestamp_us,
            SensorSample::OpticalFlow(s) => s.timestamp_us,
            SensorSample::RangeFinder(s) => s.timestamp_us,
        }
    }
}

/// Samples ready for encoding, in FRD / NED convention and batch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorBatch {
    /// Simulation time of the step that produced the batch.
    pub sim_time_us: u64,
    pub samples: Vec<SensorSample>,
}

impl SensorBatch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, kind: SensorKind) -> bool {
        self.samples.iter().any(|s| s.kind() == kind)
    }

    pub fn imu(&self) -> Option<&ImuReading> {
        self.samples.iter().find_map(|s| match s {
            SensorSample::Imu(imu) => Some(imu),
            _ => None,
        })
    }
}

/// Logical interpretation of an actuator command's channel vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    MotorSpeeds,
    ServoPositions,
    ThrustTorque,
}

/// Decoded actuator command from the autopilot.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorCommand {
    /// Autopilot timestamp in microseconds.
    pub timestamp_us: u64,
    pub armed: bool,
    pub kind: ActuatorKind,
    /// Normalized channel intensities, at most [`MAX_CHANNELS`].
    pub channels: Vec<f32>,
}

impl ActuatorCommand {
    /// Build a command, truncating to [`MAX_CHANNELS`] entries.
    pub fn new(timestamp_us: u64, armed: bool, kind: ActuatorKind, channels: &[f32]) -> Self {
        let len = channels.len().min(MAX_CHANNELS);
        Self {
            timestamp_us,
            armed,
            kind,
            channels: channels[..len].to_vec(),
        }
    }

    /// Raw value of a channel, `None` when absent or not finite.
    pub fn channel(&self, index: usize) -> Option<f64> {
        self.channels
            .get(index)
            .map(|&v| f64::from(v))
            .filter(|v| v.is_finite())
    }
}

/// Connection lifecycle of the autopilot link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unresolved,
    Resolving,
    Connected,
    Closed,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Unresolved => 0,
            ConnectionState::Resolving => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closed => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Unresolved,
            1 => ConnectionState::Resolving,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unresolved => "unresolved",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}
