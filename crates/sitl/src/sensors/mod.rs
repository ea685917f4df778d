//! Sensor sample collection.
//!
//! The engine pushes the latest reading of each kind whenever it has one; the
//! aggregator keeps it until the next batch is collected. Collection applies
//! the configured noise and converts everything into the autopilot's FRD/NED
//! convention. IMU samples go through a sequence filter first, and a batch is
//! only produced once a fresh IMU sample has been accepted.

pub mod inbox;
pub mod noise;

use log::{debug, warn};

pub use inbox::ImuInbox;
pub use noise::NoiseGenerator;

use crate::config::{HomePosition, NoiseConfig};
use crate::frame;
use crate::lockstep::{SequenceEvent, SequenceTracker};
use crate::types::{
    BarometerReading, GpsFix, ImuReading, MagnetometerReading, OpticalFlowReading, PoseSample,
    RangeReading, SensorBatch, SensorSample,
};

/// Meters per degree of latitude (flat-earth approximation).
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Holds the newest unsent sample of every sensor kind.
#[derive(Debug)]
pub struct SensorAggregator {
    noise_config: NoiseConfig,
    noise: NoiseGenerator,
    home: HomePosition,
    inbox: ImuInbox,
    pose: Option<PoseSample>,
    imu: Option<ImuReading>,
    barometer: Option<BarometerReading>,
    magnetometer: Option<MagnetometerReading>,
    gps: Option<GpsFix>,
    optical_flow: Option<OpticalFlowReading>,
    range_finder: Option<RangeReading>,
}

impl SensorAggregator {
    pub fn new(noise_config: NoiseConfig, home: HomePosition) -> Self {
        Self {
            noise: NoiseGenerator::new(noise_config.seed),
            noise_config,
            home,
            inbox: ImuInbox::new(),
            pose: None,
            imu: None,
            barometer: None,
            magnetometer: None,
            gps: None,
            optical_flow: None,
            range_finder: None,
        }
    }

    /// Handle for delivering IMU samples from another thread.
    pub fn imu_inbox(&self) -> ImuInbox {
        self.inbox.clone()
    }

    pub fn update_pose(&mut self, sample: PoseSample) {
        self.pose = Some(sample);
    }

    /// Deliver an IMU sample from the simulation thread.
    pub fn update_imu(&mut self, reading: ImuReading) {
        self.inbox.push(reading);
    }

    pub fn update_barometer(&mut self, reading: BarometerReading) {
        self.barometer = Some(reading);
    }

    pub fn update_magnetometer(&mut self, reading: MagnetometerReading) {
        self.magnetometer = Some(reading);
    }

    pub fn update_gps(&mut self, fix: GpsFix) {
        self.gps = Some(fix);
    }

    pub fn update_optical_flow(&mut self, reading: OpticalFlowReading) {
        self.optical_flow = Some(reading);
    }

    pub fn update_range_finder(&mut self, reading: RangeReading) {
        self.range_finder = Some(reading);
    }

    /// Move a pending inbox sample through the sequence filter.
    ///
    /// Duplicates and reordered samples are dropped; a gap is logged and the
    /// sample is still used.
    pub fn poll_imu(&mut self, tracker: &mut SequenceTracker) -> Option<SequenceEvent> {
        let reading = self.inbox.take()?;
        let event = tracker.observe(reading.sequence);
        match event {
            SequenceEvent::Gap { missed } => {
                warn!(
                    "imu: {missed} sample(s) missing before seq {}, sync degraded",
                    reading.sequence
                );
            }
            SequenceEvent::Duplicate | SequenceEvent::Stale => {
                debug!("imu: dropped seq {} ({event:?})", reading.sequence);
            }
            SequenceEvent::First | SequenceEvent::InOrder => {}
        }
        if event.is_accepted() {
            self.imu = Some(reading);
        }
        Some(event)
    }

    /// Whether an accepted IMU sample is waiting to be sent.
    pub fn has_fresh_imu(&self) -> bool {
        self.imu.is_some()
    }

    /// Drain every pending sample into a batch, in send order.
    pub fn collect(&mut self, sim_time_us: u64) -> SensorBatch {
        let mut samples = Vec::with_capacity(7);

        if let Some(pose) = self.pose.take() {
            samples.push(SensorSample::Pose(PoseSample {
                orientation: frame::orientation_to_ned(&pose.orientation),
                position_m: frame::world_to_ned(&pose.position_m),
                linear_velocity_ms: frame::world_to_ned(&pose.linear_velocity_ms),
                angular_velocity_rads: frame::body_to_frd(&pose.angular_velocity_rads),
                ..pose
            }));
        }

        if let Some(imu) = self.imu.take() {
            let accel = self
                .noise
                .apply_vector(&imu.linear_acceleration_mss, self.noise_config.accel);
            let gyro = self
                .noise
                .apply_vector(&imu.angular_velocity_rads, self.noise_config.gyro);
            samples.push(SensorSample::Imu(ImuReading {
                linear_acceleration_mss: frame::body_to_frd(&accel),
                angular_velocity_rads: frame::body_to_frd(&gyro),
                ..imu
            }));
        }

        if let Some(baro) = self.barometer.take() {
            samples.push(SensorSample::Barometer(BarometerReading {
                pressure_pa: self
                    .noise
                    .apply(baro.pressure_pa, self.noise_config.baro_pressure),
                ..baro
            }));
        }

        if let Some(mag) = self.magnetometer.take() {
            let field = self
                .noise
                .apply_vector(&mag.field_gauss, self.noise_config.magnetometer);
            samples.push(SensorSample::Magnetometer(MagnetometerReading {
                field_gauss: frame::body_to_frd(&field),
                ..mag
            }));
        }

        if let Some(gps) = self.gps.take() {
            samples.push(SensorSample::Gps(self.perturb_gps(gps)));
        }

        if let Some(flow) = self.optical_flow.take() {
            samples.push(SensorSample::OpticalFlow(flow));
        }

        if let Some(range) = self.range_finder.take() {
            let distance_m = self
                .noise
                .apply(range.distance_m, self.noise_config.range)
                .max(0.0);
            samples.push(SensorSample::RangeFinder(RangeReading {
                distance_m,
                ..range
            }));
        }

        SensorBatch {
            sim_time_us,
            samples,
        }
    }

    /// Horizontal noise is drawn in meters and converted to degrees around
    /// the home latitude.
    fn perturb_gps(&mut self, gps: GpsFix) -> GpsFix {
        let north_m = self.noise.apply(0.0, self.noise_config.gps_horizontal);
        let east_m = self.noise.apply(0.0, self.noise_config.gps_horizontal);
        let meters_per_deg_lon = METERS_PER_DEG_LAT * self.home.lat_deg.to_radians().cos();
        let lon_offset = if meters_per_deg_lon.abs() > f64::EPSILON {
            east_m / meters_per_deg_lon
        } else {
            0.0
        };
        GpsFix {
            lat_deg: gps.lat_deg + north_m / METERS_PER_DEG_LAT,
            lon_deg: gps.lon_deg + lon_offset,
            alt_m: self.noise.apply(gps.alt_m, self.noise_config.gps_vertical),
            velocity_ms: frame::world_to_ned(&gps.velocity_ms),
            ..gps
        }
    }
}
