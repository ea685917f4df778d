//! MAVLink framing of sensor batches and actuator commands.
//!
//! Version 1 sends MAVLink 1 frames with one HIL_SENSOR per sensor group;
//! version 2 sends MAVLink 2 frames with a single combined HIL_SENSOR.
//! Decoding accepts either framing regardless of the configured version.

pub mod messages;

use std::io::Cursor;

use mavlink::common::{MavMessage, MavModeFlag};
use mavlink::peek_reader::PeekReader;
use mavlink::MavHeader;

use crate::config::{HomePosition, ProtocolConfig, ProtocolVersion, RangeFinderConfig};
use crate::error::ProtocolError;
use crate::types::{ActuatorCommand, ActuatorKind, SensorBatch, SensorSample};
use messages::{
    build_distance_sensor, build_hil_gps, build_hil_optical_flow, build_hil_sensor,
    build_hil_state_quaternion,
};

const MAGIC_V1: u8 = 0xFE;
const MAGIC_V2: u8 = 0xFD;
const MAX_FRAME_LEN: usize = 280;

/// Stateful encoder/decoder for one autopilot link.
#[derive(Debug, Clone)]
pub struct ProtocolCodec {
    version: ProtocolVersion,
    system_id: u8,
    component_id: u8,
    sequence: u8,
    command_kind: ActuatorKind,
    home: HomePosition,
    range_limits: RangeFinderConfig,
}

impl ProtocolCodec {
    pub fn new(
        protocol: ProtocolConfig,
        command_kind: ActuatorKind,
        home: HomePosition,
        range_limits: RangeFinderConfig,
    ) -> Self {
        Self {
            version: protocol.version,
            system_id: protocol.system_id,
            component_id: protocol.component_id,
            sequence: 0,
            command_kind,
            home,
            range_limits,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Messages for one batch, in send order.
    pub fn batch_messages(&self, batch: &SensorBatch, time_usec: u64) -> Vec<MavMessage> {
        let mut pose = None;
        let mut imu = None;
        let mut baro = None;
        let mut mag = None;
        let mut rest = Vec::new();
        for sample in &batch.samples {
            match sample {
                SensorSample::Pose(p) => pose = Some(p),
                SensorSample::Imu(r) => imu = Some(r),
                SensorSample::Barometer(r) => baro = Some(r),
                SensorSample::Magnetometer(r) => mag = Some(r),
                other => rest.push(other),
            }
        }

        let mut out = Vec::with_capacity(batch.samples.len() + 1);
        if let Some(pose) = pose {
            out.push(build_hil_state_quaternion(time_usec, pose, &self.home, imu));
        }

        match self.version {
            ProtocolVersion::V1 => {
                if let Some(imu) = imu {
                    out.push(build_hil_sensor(time_usec, Some(imu), None, None));
                }
                if let Some(baro) = baro {
                    out.push(build_hil_sensor(time_usec, None, Some(baro), None));
                }
                if let Some(mag) = mag {
                    out.push(build_hil_sensor(time_usec, None, None, Some(mag)));
                }
            }
            ProtocolVersion::V2 => {
                if imu.is_some() || baro.is_some() || mag.is_some() {
                    out.push(build_hil_sensor(time_usec, imu, baro, mag));
                }
            }
        }

        for sample in rest {
            match sample {
                SensorSample::Gps(fix) => out.push(build_hil_gps(time_usec, fix)),
                SensorSample::OpticalFlow(flow) => {
                    out.push(build_hil_optical_flow(time_usec, flow))
                }
                SensorSample::RangeFinder(range) => {
                    out.push(build_distance_sensor(time_usec, range, &self.range_limits))
                }
                _ => {}
            }
        }
        out
    }

    /// Encode a batch into wire frames, one datagram each.
    pub fn encode_batch(
        &mut self,
        batch: &SensorBatch,
        time_usec: u64,
    ) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.batch_messages(batch, time_usec)
            .iter()
            .map(|msg| self.encode_message(msg))
            .collect()
    }

    /// Frame a single message with the next outbound sequence number.
    pub fn encode_message(&mut self, msg: &MavMessage) -> Result<Vec<u8>, ProtocolError> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let mut buf = Cursor::new(Vec::with_capacity(MAX_FRAME_LEN));
        match self.version {
            ProtocolVersion::V1 => mavlink::write_v1_msg(&mut buf, header, msg),
            ProtocolVersion::V2 => mavlink::write_v2_msg(&mut buf, header, msg),
        }
        .map_err(|e| ProtocolError::Encode(format!("{e:?}")))?;
        Ok(buf.into_inner())
    }

    /// Parse one datagram.
    ///
    /// Returns `Ok(None)` for well-formed frames that are not actuator
    /// commands.
    pub fn decode(&self, frame: &[u8]) -> Result<Option<ActuatorCommand>, ProtocolError> {
        let (_, msg) = parse_frame(frame)?;
        Ok(match msg {
            MavMessage::HIL_ACTUATOR_CONTROLS(data) => Some(ActuatorCommand::new(
                data.time_usec,
                data.mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
                self.command_kind,
                &data.controls,
            )),
            _ => None,
        })
    }
}

/// Read a single MAVLink 1 or 2 frame, selected by its magic byte.
pub fn parse_frame(frame: &[u8]) -> Result<(MavHeader, MavMessage), ProtocolError> {
    let magic = *frame.first().ok_or(ProtocolError::EmptyFrame)?;
    let mut reader = PeekReader::new(Cursor::new(frame));
    match magic {
        MAGIC_V1 => mavlink::read_v1_msg::<MavMessage, _>(&mut reader),
        MAGIC_V2 => mavlink::read_v2_msg::<MavMessage, _>(&mut reader),
        other => return Err(ProtocolError::UnknownMagic(other)),
    }
    .map_err(|e| ProtocolError::Malformed(format!("{e:?}")))
}
