//! MAVLink message builders for HIL sensor traffic.
//!
//! All inputs are already in FRD / NED convention.

use mavlink::common::*;

use crate::config::{HomePosition, RangeFinderConfig};
use crate::sensors::METERS_PER_DEG_LAT;
use crate::types::{
    BarometerReading, GpsFix, ImuReading, MagnetometerReading, OpticalFlowReading, PoseSample,
    RangeReading,
};

/// HIL_SENSOR `fields_updated` bits.
pub const FIELDS_ACCEL: u32 = 0x0007;
pub const FIELDS_GYRO: u32 = 0x0038;
pub const FIELDS_MAG: u32 = 0x01C0;
/// abs_pressure, pressure_alt and temperature.
pub const FIELDS_BARO: u32 = 0x1A00;

const STANDARD_GRAVITY: f64 = 9.80665;

/// Build a HIL_SENSOR carrying whichever of IMU, barometer and magnetometer
/// are present. Absent groups are zero and left out of `fields_updated`.
pub fn build_hil_sensor(
    time_usec: u64,
    imu: Option<&ImuReading>,
    baro: Option<&BarometerReading>,
    mag: Option<&MagnetometerReading>,
) -> MavMessage {
    let mut data = HIL_SENSOR_DATA {
        time_usec,
        ..Default::default()
    };
    let mut mask = 0u32;

    if let Some(imu) = imu {
        let a = imu.linear_acceleration_mss;
        let g = imu.angular_velocity_rads;
        data.xacc = a.x as f32;
        data.yacc = a.y as f32;
        data.zacc = a.z as f32;
        data.xgyro = g.x as f32;
        data.ygyro = g.y as f32;
        data.zgyro = g.z as f32;
        mask |= FIELDS_ACCEL | FIELDS_GYRO;
    }

    if let Some(baro) = baro {
        // hPa on the wire
        data.abs_pressure = (baro.pressure_pa / 100.0) as f32;
        data.pressure_alt = baro.pressure_altitude_m() as f32;
        data.temperature = baro.temperature_c as f32;
        mask |= FIELDS_BARO;
    }

    if let Some(mag) = mag {
        data.xmag = mag.field_gauss.x as f32;
        data.ymag = mag.field_gauss.y as f32;
        data.zmag = mag.field_gauss.z as f32;
        mask |= FIELDS_MAG;
    }

    data.fields_updated = HilSensorUpdatedFlags::from_bits_truncate(mask);
    MavMessage::HIL_SENSOR(data)
}

/// Build a HIL_GPS message. Velocity must be NED.
pub fn build_hil_gps(time_usec: u64, gps: &GpsFix) -> MavMessage {
    let v = gps.velocity_ms;
    let ground_speed = v.x.hypot(v.y);
    let cog_cdeg = if ground_speed > 1e-3 {
        let deg = v.y.atan2(v.x).to_degrees();
        (deg.rem_euclid(360.0) * 100.0).round() as u16
    } else {
        u16::MAX
    };

    MavMessage::HIL_GPS(HIL_GPS_DATA {
        time_usec,
        lat: (gps.lat_deg * 1e7).round() as i32,
        lon: (gps.lon_deg * 1e7).round() as i32,
        alt: (gps.alt_m * 1000.0).round() as i32,
        eph: (gps.eph_m * 100.0).round() as u16,
        epv: (gps.epv_m * 100.0).round() as u16,
        vel: (ground_speed * 100.0).round() as u16,
        vn: (v.x * 100.0).round() as i16,
        ve: (v.y * 100.0).round() as i16,
        vd: (v.z * 100.0).round() as i16,
        cog: cog_cdeg,
        fix_type: gps.fix_type.as_mav(),
        satellites_visible: gps.satellites,
        ..Default::default()
    })
}

pub fn build_hil_optical_flow(time_usec: u64, flow: &OpticalFlowReading) -> MavMessage {
    MavMessage::HIL_OPTICAL_FLOW(HIL_OPTICAL_FLOW_DATA {
        time_usec,
        sensor_id: 0,
        integration_time_us: flow.integration_time_us,
        integrated_x: flow.integrated_flow_rad[0] as f32,
        integrated_y: flow.integrated_flow_rad[1] as f32,
        integrated_xgyro: flow.integrated_gyro_rad.x as f32,
        integrated_ygyro: flow.integrated_gyro_rad.y as f32,
        integrated_zgyro: flow.integrated_gyro_rad.z as f32,
        temperature: (flow.temperature_c * 100.0) as i16,
        quality: flow.quality,
        time_delta_distance_us: 0,
        distance: flow.distance_m as f32,
    })
}

/// Build a downward-facing laser DISTANCE_SENSOR message.
pub fn build_distance_sensor(
    time_usec: u64,
    range: &RangeReading,
    limits: &RangeFinderConfig,
) -> MavMessage {
    MavMessage::DISTANCE_SENSOR(DISTANCE_SENSOR_DATA {
        time_boot_ms: (time_usec / 1000) as u32,
        min_distance: (limits.min_distance_m * 100.0).round() as u16,
        max_distance: (limits.max_distance_m * 100.0).round() as u16,
        current_distance: (range.distance_m * 100.0).round() as u16,
        mavtype: MavDistanceSensor::MAV_DISTANCE_SENSOR_LASER,
        id: 0,
        orientation: MavSensorOrientation::MAV_SENSOR_ROTATION_PITCH_270,
        covariance: 0,
        ..Default::default()
    })
}

/// Build the ground-truth HIL_STATE_QUATERNION from a NED pose.
///
/// Geodetic position is derived from `home` with a flat-earth
/// approximation. `imu` supplies the body acceleration fields when present.
pub fn build_hil_state_quaternion(
    time_usec: u64,
    pose: &PoseSample,
    home: &HomePosition,
    imu: Option<&ImuReading>,
) -> MavMessage {
    let q = pose.orientation.quaternion();
    let p = pose.position_m;
    let v = pose.linear_velocity_ms;
    let w = pose.angular_velocity_rads;

    let meters_per_deg_lon = METERS_PER_DEG_LAT * home.lat_deg.to_radians().cos();
    let lat = home.lat_deg + p.x / METERS_PER_DEG_LAT;
    let lon = if meters_per_deg_lon.abs() > f64::EPSILON {
        home.lon_deg + p.y / meters_per_deg_lon
    } else {
        home.lon_deg
    };
    let alt = home.alt_m - p.z;

    // milli-g
    let (xacc, yacc, zacc) = imu
        .map(|r| {
            let a = r.linear_acceleration_mss * (1000.0 / STANDARD_GRAVITY);
            (a.x.round() as i16, a.y.round() as i16, a.z.round() as i16)
        })
        .unwrap_or((0, 0, 0));
    let speed_cms = (v.norm() * 100.0).round() as u16;

    MavMessage::HIL_STATE_QUATERNION(HIL_STATE_QUATERNION_DATA {
        time_usec,
        attitude_quaternion: [q.w as f32, q.i as f32, q.j as f32, q.k as f32],
        rollspeed: w.x as f32,
        pitchspeed: w.y as f32,
        yawspeed: w.z as f32,
        lat: (lat * 1e7).round() as i32,
        lon: (lon * 1e7).round() as i32,
        alt: (alt * 1000.0).round() as i32,
        vx: (v.x * 100.0).round() as i16,
        vy: (v.y * 100.0).round() as i16,
        vz: (v.z * 100.0).round() as i16,
        ind_airspeed: speed_cms,
        true_airspeed: speed_cms,
        xacc,
        yacc,
        zacc,
    })
}

#[cfg(test)]
mod tests {
    use nalgebra::{UnitQuaternion, Vector3};

    use super::*;
    use crate::types::GpsFixType;

    fn imu() -> ImuReading {
        ImuReading {
            timestamp_us: 0,
            sequence: 0,
            linear_acceleration_mss: Vector3::new(0.1, 0.2, -9.80665),
            angular_velocity_rads: Vector3::new(0.01, -0.02, 0.03),
        }
    }

    fn baro() -> BarometerReading {
        BarometerReading {
            timestamp_us: 0,
            pressure_pa: 101_325.0,
            temperature_c: 15.0,
        }
    }

    #[test]
    fn test_hil_sensor_imu_only_mask() {
        match build_hil_sensor(10, Some(&imu()), None, None) {
            MavMessage::HIL_SENSOR(data) => {
                assert_eq!(data.fields_updated.bits(), 0x3F);
                assert_eq!(data.time_usec, 10);
                assert!((data.zacc + 9.80665).abs() < 1e-4);
                assert!((data.ygyro + 0.02).abs() < 1e-6);
                assert_eq!(data.abs_pressure, 0.0);
            }
            _ => panic!("Expected HIL_SENSOR"),
        }
    }

    #[test]
    fn test_hil_sensor_combined_mask() {
        let mag = MagnetometerReading {
            timestamp_us: 0,
            field_gauss: Vector3::new(0.2, 0.0, 0.4),
        };
        match build_hil_sensor(0, Some(&imu()), Some(&baro()), Some(&mag)) {
            MavMessage::HIL_SENSOR(data) => {
                assert_eq!(
                    data.fields_updated.bits(),
                    FIELDS_ACCEL | FIELDS_GYRO | FIELDS_MAG | FIELDS_BARO
                );
                assert!((data.abs_pressure - 1013.25).abs() < 1e-3);
                assert!(data.pressure_alt.abs() < 1e-3);
                assert!((data.zmag - 0.4).abs() < 1e-6);
            }
            _ => panic!("Expected HIL_SENSOR"),
        }
    }

    #[test]
    fn test_hil_gps_units() {
        let gps = GpsFix {
            timestamp_us: 0,
            lat_deg: 47.397742,
            lon_deg: 8.545594,
            alt_m: 488.0,
            velocity_ms: Vector3::new(0.0, 1.5, -0.2),
            eph_m: 0.3,
            epv_m: 0.4,
            satellites: 10,
            fix_type: GpsFixType::Fix3D,
        };
        match build_hil_gps(5, &gps) {
            MavMessage::HIL_GPS(data) => {
                assert_eq!(data.lat, 473977420);
                assert_eq!(data.alt, 488_000);
                assert_eq!(data.vel, 150);
                assert_eq!(data.ve, 150);
                assert_eq!(data.vd, -20);
                // Moving east
                assert_eq!(data.cog, 9000);
                assert_eq!(data.fix_type, 3);
                assert_eq!(data.eph, 30);
            }
            _ => panic!("Expected HIL_GPS"),
        }
    }

    #[test]
    fn test_distance_sensor_centimeters() {
        let msg = build_distance_sensor(
            2_000_000,
            &RangeReading {
                timestamp_us: 0,
                distance_m: 1.23,
            },
            &RangeFinderConfig::default(),
        );
        match msg {
            MavMessage::DISTANCE_SENSOR(data) => {
                assert_eq!(data.time_boot_ms, 2000);
                assert_eq!(data.current_distance, 123);
                assert_eq!(data.min_distance, 6);
                assert_eq!(data.max_distance, 3500);
                assert_eq!(
                    data.orientation,
                    MavSensorOrientation::MAV_SENSOR_ROTATION_PITCH_270
                );
            }
            _ => panic!("Expected DISTANCE_SENSOR"),
        }
    }

    #[test]
    fn test_state_quaternion_position_from_home() {
        let home = HomePosition::default();
        let pose = PoseSample {
            timestamp_us: 0,
            orientation: UnitQuaternion::identity(),
            position_m: Vector3::new(METERS_PER_DEG_LAT * 0.001, 0.0, -10.0),
            linear_velocity_ms: Vector3::new(1.0, 0.0, 0.0),
            angular_velocity_rads: Vector3::zeros(),
        };
        match build_hil_state_quaternion(0, &pose, &home, Some(&imu())) {
            MavMessage::HIL_STATE_QUATERNION(data) => {
                assert_eq!(data.attitude_quaternion, [1.0, 0.0, 0.0, 0.0]);
                assert!((data.lat - ((home.lat_deg + 0.001) * 1e7).round() as i32).abs() <= 1);
                assert_eq!(data.lon, (home.lon_deg * 1e7).round() as i32);
                assert_eq!(data.alt, 498_000);
                assert_eq!(data.vx, 100);
                assert_eq!(data.zacc, -1000);
            }
            _ => panic!("Expected HIL_STATE_QUATERNION"),
        }
    }
}
