//! Per-step host contract.
//!
//! The host engine drives three phases: [`SitlBridge::configure`] once at
//! startup, then [`SitlBridge::pre_update`] before and
//! [`SitlBridge::post_update`] after every physics step. Errors inside a
//! step are logged and counted; only configuration errors are returned.

mod stats;

use std::sync::Arc;

use log::{debug, info, warn};

pub use stats::BridgeStats;

use crate::actuator::ActuatorDispatcher;
use crate::config::{BridgeConfig, ChannelConfig, ControlType};
use crate::engine::{ActuatorSink, StepInfo};
use crate::error::BridgeError;
use crate::lockstep::{AwaitOutcome, LockstepController, LockstepState, SequenceEvent};
use crate::protocol::ProtocolCodec;
use crate::sensors::{ImuInbox, SensorAggregator};
use crate::shutdown::ShutdownSignal;
use crate::transport::{FrameTransport, UdpTransport};
use crate::types::{ActuatorCommand, ConnectionState, SensorSample};

/// What [`SitlBridge::post_update`] did this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Paused step, nothing done.
    Paused,
    /// No sensor message was due.
    Skipped,
    /// Sensors sent, no response awaited. In lockstep this is the case
    /// until the autopilot has answered for the first time.
    Sent,
    /// Sensors sent and the autopilot answered.
    Synchronized,
    /// Sensors due but the exchange did not complete (timeout, no link,
    /// encode failure). The step still proceeds.
    Degraded,
    /// Shutdown requested; the transport has been closed.
    Closing,
}

/// Bridge between a physics engine and a MAVLink autopilot.
pub struct SitlBridge<T: FrameTransport = UdpTransport> {
    transport: T,
    shutdown: ShutdownSignal,
    codec: ProtocolCodec,
    aggregator: SensorAggregator,
    dispatcher: ActuatorDispatcher,
    lockstep: LockstepController,
    stats: BridgeStats,
}

impl SitlBridge<UdpTransport> {
    /// Validate `config`, open the UDP link and build the bridge.
    pub fn configure(config: BridgeConfig, shutdown: ShutdownSignal) -> Result<Self, BridgeError> {
        config.validate()?;
        let transport = UdpTransport::open(config.transport.clone(), shutdown.clone())?;
        Self::with_transport(config, transport, shutdown)
    }
}

impl<T: FrameTransport> SitlBridge<T> {
    /// Build the bridge around an already opened transport.
    pub fn with_transport(
        config: BridgeConfig,
        transport: T,
        shutdown: ShutdownSignal,
    ) -> Result<Self, BridgeError> {
        let channels: Arc<ChannelConfig> = Arc::new(config.validate()?);
        info!(
            "bridge: protocol v{}, lockstep {}, {} channel(s) mapped",
            u8::from(config.protocol.version),
            if config.lockstep.enabled { "on" } else { "off" },
            channels
                .iter()
                .filter(|(_, m)| m.control != ControlType::Unused)
                .count()
        );

        Ok(Self {
            transport,
            codec: ProtocolCodec::new(
                config.protocol,
                config.actuators.command_kind(),
                config.home,
                config.range_finder,
            ),
            aggregator: SensorAggregator::new(config.noise, config.home),
            dispatcher: ActuatorDispatcher::new(channels, config.actuators.mode),
            lockstep: LockstepController::new(config.lockstep, shutdown.clone()),
            shutdown,
            stats: BridgeStats::default(),
        })
    }

    /// Push one sample from the engine.
    pub fn push_sample(&mut self, sample: SensorSample) {
        match sample {
            SensorSample::Pose(s) => self.aggregator.update_pose(s),
            SensorSample::Imu(s) => self.aggregator.update_imu(s),
            SensorSample::Barometer(s) => self.aggregator.update_barometer(s),
            SensorSample::Magnetometer(s) => self.aggregator.update_magnetometer(s),
            SensorSample::Gps(s) => self.aggregator.update_gps(s),
            SensorSample::OpticalFlow(s) => self.aggregator.update_optical_flow(s),
            SensorSample::RangeFinder(s) => self.aggregator.update_range_finder(s),
        }
    }

    /// Apply the held actuator command before the physics step.
    ///
    /// Without lockstep, any commands that arrived since the previous step
    /// are taken in arrival order first. Returns whether outputs were
    /// published.
    pub fn pre_update(&mut self, info: StepInfo, sink: &mut dyn ActuatorSink) -> bool {
        if info.paused || self.shutdown.is_triggered() {
            return false;
        }
        if !self.lockstep.is_enabled() {
            self.transport.poll_connection();
            self.drain_inbound();
        }
        self.dispatcher.publish(sink).is_some()
    }

    /// Advance time, send due sensors and, in lockstep, wait for the answer.
    pub fn post_update(&mut self, info: StepInfo) -> StepOutcome {
        if self.shutdown.is_triggered() {
            self.transport.close();
            return StepOutcome::Closing;
        }
        if info.paused {
            self.stats.paused_steps += 1;
            return StepOutcome::Paused;
        }
        self.stats.steps += 1;
        self.transport.poll_connection();

        let plan = self.lockstep.on_simulation_advance(info.step);
        if let Some(event) = self.aggregator.poll_imu(self.lockstep.imu_sequence_mut()) {
            match event {
                SequenceEvent::Duplicate => self.stats.imu_duplicates += 1,
                SequenceEvent::Stale => self.stats.imu_stale += 1,
                SequenceEvent::Gap { .. } => self.stats.imu_gaps += 1,
                SequenceEvent::First | SequenceEvent::InOrder => {}
            }
        }
        if !plan.sensors_due || !self.aggregator.has_fresh_imu() {
            return StepOutcome::Skipped;
        }

        if self.lockstep.is_enabled() {
            // Late answers to an earlier timed-out step.
            self.drain_inbound();
        }

        let batch = self.aggregator.collect(plan.sim_time_us);
        let frames = match self.codec.encode_batch(&batch, self.lockstep.reported_time_us()) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("bridge: cannot encode sensors at t={} us: {e}", plan.sim_time_us);
                self.stats.protocol_errors += 1;
                return StepOutcome::Degraded;
            }
        };

        if self.transport.state() != ConnectionState::Connected {
            debug!("bridge: not connected, sensors at t={} us dropped", plan.sim_time_us);
            return StepOutcome::Degraded;
        }
        for frame in &frames {
            match self.transport.send(frame) {
                Ok(()) => self.stats.frames_sent += 1,
                Err(e) => {
                    warn!("bridge: send failed: {e}");
                    self.stats.send_errors += 1;
                    return StepOutcome::Degraded;
                }
            }
        }
        self.stats.batches_sent += 1;
        self.lockstep.mark_sent();

        if !self.lockstep.is_enabled() {
            return StepOutcome::Sent;
        }

        let codec = &self.codec;
        let stats = &mut self.stats;
        let outcome = self.lockstep.await_response(&mut self.transport, |frame| {
            decode_logged(codec, stats, frame)
        });
        match outcome {
            AwaitOutcome::Received(command) => {
                self.submit(command);
                StepOutcome::Synchronized
            }
            AwaitOutcome::TimedOut => {
                self.stats.lockstep_timeouts += 1;
                StepOutcome::Degraded
            }
            AwaitOutcome::Disconnected => StepOutcome::Degraded,
            AwaitOutcome::Closing => {
                self.transport.close();
                StepOutcome::Closing
            }
            AwaitOutcome::NotPending => {
                // Not synchronized yet: pick up an answer without blocking.
                if self.drain_inbound() > 0 {
                    StepOutcome::Synchronized
                } else {
                    StepOutcome::Sent
                }
            }
        }
    }

    /// Request shutdown and release the link.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        self.transport.close();
    }

    /// Handle for delivering IMU samples from another thread.
    pub fn imu_inbox(&self) -> ImuInbox {
        self.aggregator.imu_inbox()
    }

    pub fn aggregator_mut(&mut self) -> &mut SensorAggregator {
        &mut self.aggregator
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn lockstep_state(&self) -> &LockstepState {
        self.lockstep.state()
    }

    /// Whether the autopilot has answered yet; lockstep waits start after that.
    pub fn is_synchronized(&self) -> bool {
        self.lockstep.is_synchronized()
    }

    pub fn dispatcher(&self) -> &ActuatorDispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Apply every queued command; returns how many were decoded.
    fn drain_inbound(&mut self) -> usize {
        let mut commands = 0;
        loop {
            let frame = match self.transport.try_receive() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("bridge: receive failed: {e}");
                    break;
                }
            };
            if let Some(command) = decode_logged(&self.codec, &mut self.stats, &frame) {
                self.lockstep.acknowledge(&command);
                self.submit(command);
                commands += 1;
            }
        }
        commands
    }

    fn submit(&mut self, command: ActuatorCommand) {
        if !self.dispatcher.submit(command) {
            self.stats.stale_commands += 1;
        }
    }
}

fn decode_logged(
    codec: &ProtocolCodec,
    stats: &mut BridgeStats,
    frame: &[u8],
) -> Option<ActuatorCommand> {
    match codec.decode(frame) {
        Ok(Some(command)) => {
            stats.commands_received += 1;
            Some(command)
        }
        Ok(None) => None,
        Err(e) => {
            debug!("bridge: dropped frame: {e}");
            stats.protocol_errors += 1;
            None
        }
    }
}

impl<T: FrameTransport> Drop for SitlBridge<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

impl<T: FrameTransport> std::fmt::Debug for SitlBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitlBridge")
            .field("state", &self.transport.state())
            .field("lockstep", self.lockstep.state())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
