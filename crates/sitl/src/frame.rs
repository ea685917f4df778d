//! Coordinate frame conversion between the simulator and the autopilot.
//!
//! The simulator works in FLU (forward-left-up) body axes and an ENU
//! (east-north-up) world frame. The autopilot expects FRD (forward-right-down)
//! body axes and NED (north-east-down). Both fixed rotations are half-turns,
//! so each conversion is its own inverse.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// ENU → NED: half-turn about (1, 1, 0)/√2.
pub fn q_enu_to_ned() -> UnitQuaternion<f64> {
    let s = core::f64::consts::FRAC_1_SQRT_2;
    UnitQuaternion::from_quaternion(Quaternion::new(0.0, s, s, 0.0))
}

/// FLU → FRD: half-turn about x.
pub fn q_flu_to_frd() -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(0.0, 1.0, 0.0, 0.0))
}

/// Convert a FLU-body-to-ENU-world orientation into FRD-body-to-NED-world.
pub fn orientation_to_ned(q_flu_to_enu: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    q_enu_to_ned() * q_flu_to_enu * q_flu_to_frd().inverse()
}

/// Inverse of [`orientation_to_ned`].
pub fn orientation_to_enu(q_frd_to_ned: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    q_enu_to_ned().inverse() * q_frd_to_ned * q_flu_to_frd()
}

/// Rotate a body-frame vector from FLU to FRD.
pub fn body_to_frd(v: &Vector3<f64>) -> Vector3<f64> {
    q_flu_to_frd().transform_vector(v)
}

/// Rotate a world-frame vector from ENU to NED.
pub fn world_to_ned(v: &Vector3<f64>) -> Vector3<f64> {
    q_enu_to_ned().transform_vector(v)
}
