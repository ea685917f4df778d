//! Step pacing and autopilot synchronization.
//!
//! With lockstep enabled the simulation only advances once the autopilot has
//! answered the sensor message of the current step, giving a strict 1:1
//! send/response sequence. Without lockstep, sensor messages are throttled to
//! a fixed simulated interval and nothing ever blocks.

pub mod sequence;

use std::time::{Duration, Instant};

use log::{debug, warn};

pub use sequence::{SequenceEvent, SequenceTracker};

use crate::config::LockstepConfig;
use crate::shutdown::{ShutdownSignal, CHECK_INTERVAL};
use crate::transport::FrameTransport;
use crate::types::{ActuatorCommand, ConnectionState};

/// Synchronization state, mutated only at step boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct LockstepState {
    /// Current simulation time in microseconds.
    pub sim_time_us: u64,
    /// Timestamp of the last actuator command received from the autopilot.
    pub last_ack_time_us: Option<u64>,
    pub enabled: bool,
    pub speed_factor: f64,
    /// Position within the skip cycle (non-lockstep only).
    pub skip_counter: u32,
}

/// What the bridge should do this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub sim_time_us: u64,
    /// Sensor messages may be sent this step.
    pub sensors_due: bool,
}

/// Result of waiting for the autopilot's response.
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    Received(ActuatorCommand),
    /// No response within the configured bound; the step proceeds.
    TimedOut,
    /// Shutdown was requested during the wait.
    Closing,
    /// The transport is not connected; waits fail open until it is.
    Disconnected,
    /// Nothing was sent, so there is nothing to wait for.
    NotPending,
}

/// Gates step advancement and sensor message cadence.
#[derive(Debug)]
pub struct LockstepController {
    config: LockstepConfig,
    state: LockstepState,
    sequence: SequenceTracker,
    shutdown: ShutdownSignal,
    last_sent_us: Option<u64>,
    /// Reported time of the batch awaiting an answer.
    pending_response: Option<u64>,
    /// Waits only block once the autopilot has answered at least once.
    first_command_received: bool,
    timeouts: u64,
}

impl LockstepController {
    pub fn new(config: LockstepConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            state: LockstepState {
                sim_time_us: 0,
                last_ack_time_us: None,
                enabled: config.enabled,
                speed_factor: config.speed_factor,
                skip_counter: 0,
            },
            config,
            sequence: SequenceTracker::new(),
            shutdown,
            last_sent_us: None,
            pending_response: None,
            first_command_received: false,
            timeouts: 0,
        }
    }

    /// Advance simulation time by one tick and decide whether sensors are due.
    pub fn on_simulation_advance(&mut self, step: Duration) -> StepPlan {
        let step_us = u64::try_from(step.as_micros()).unwrap_or(u64::MAX);
        self.state.sim_time_us = self.state.sim_time_us.saturating_add(step_us);

        let sensors_due = if self.state.enabled {
            self.pending_response.is_none()
        } else {
            self.state.skip_counter = (self.state.skip_counter + 1) % self.config.skip_factor;
            let interval_elapsed = match self.last_sent_us {
                None => true,
                Some(sent) => {
                    self.state.sim_time_us.saturating_sub(sent) >= self.config.sensor_interval_us
                }
            };
            self.state.skip_counter == 0 && interval_elapsed
        };

        StepPlan {
            sim_time_us: self.state.sim_time_us,
            sensors_due,
        }
    }

    /// Record that this step's sensor batch went out.
    ///
    /// Until the first actuator command arrives nothing is marked pending,
    /// so a peer that has not started yet does not stall the simulation.
    pub fn mark_sent(&mut self) {
        self.last_sent_us = Some(self.state.sim_time_us);
        if self.state.enabled && self.first_command_received {
            self.pending_response = Some(self.reported_time_us());
        }
    }

    /// Block until the autopilot answers the pending sensor batch.
    ///
    /// `decode` turns a raw frame into an actuator command, returning `None`
    /// for frames that are not actuator commands (or are malformed). The wait
    /// is sliced so shutdown and transport closure are noticed within
    /// [`CHECK_INTERVAL`]. Commands stamped before the pending batch are
    /// late answers to an earlier step and do not end the wait.
    pub fn await_response<T, F>(&mut self, transport: &mut T, mut decode: F) -> AwaitOutcome
    where
        T: FrameTransport + ?Sized,
        F: FnMut(&[u8]) -> Option<ActuatorCommand>,
    {
        let Some(sent_time_us) = self.pending_response else {
            return AwaitOutcome::NotPending;
        };

        let deadline = Instant::now() + self.config.timeout();
        let outcome = loop {
            if self.shutdown.is_triggered() {
                break AwaitOutcome::Closing;
            }
            if transport.state() != ConnectionState::Connected {
                break AwaitOutcome::Disconnected;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.timeouts += 1;
                warn!(
                    "lockstep: no actuator response within {} ms at t={} us, proceeding degraded",
                    self.config.timeout_ms, self.state.sim_time_us
                );
                break AwaitOutcome::TimedOut;
            }

            match transport.receive_timeout(remaining.min(CHECK_INTERVAL)) {
                Ok(Some(frame)) => match decode(&frame) {
                    Some(command) if command.timestamp_us < sent_time_us => {
                        debug!(
                            "lockstep: ignored late command t={} us, waiting for t={} us",
                            command.timestamp_us, sent_time_us
                        );
                    }
                    Some(command) => {
                        self.acknowledge(&command);
                        break AwaitOutcome::Received(command);
                    }
                    None => {}
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("lockstep: transport failed while waiting: {e}");
                    break AwaitOutcome::Disconnected;
                }
            }
        };

        self.pending_response = None;
        outcome
    }

    /// Note a command received outside of a lockstep wait.
    pub fn acknowledge(&mut self, command: &ActuatorCommand) {
        debug!("actuator command t={} us", command.timestamp_us);
        self.state.last_ack_time_us = Some(command.timestamp_us);
        self.first_command_received = true;
    }

    /// Timestamp reported to the autopilot for the current step.
    ///
    /// In free-running mode the simulated clock is divided by the speed
    /// factor so the peer sees wall-clock-equivalent time.
    pub fn reported_time_us(&self) -> u64 {
        if self.state.enabled {
            self.state.sim_time_us
        } else {
            (self.state.sim_time_us as f64 / self.state.speed_factor) as u64
        }
    }

    pub fn state(&self) -> &LockstepState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn is_pending(&self) -> bool {
        self.pending_response.is_some()
    }

    /// Whether the autopilot has answered at least once.
    pub fn is_synchronized(&self) -> bool {
        self.first_command_received
    }

    /// Number of lockstep waits that hit the timeout.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// IMU sequence filter for the sensor aggregator.
    pub fn imu_sequence_mut(&mut self) -> &mut SequenceTracker {
        &mut self.sequence
    }

    pub fn imu_sequence(&self) -> &SequenceTracker {
        &self.sequence
    }
}
