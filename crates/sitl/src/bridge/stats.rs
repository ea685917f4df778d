use serde::Serialize;

/// Running counters for one bridge instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Steps that advanced simulation time.
    pub steps: u64,
    pub paused_steps: u64,
    /// Sensor batches handed to a connected transport.
    pub batches_sent: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    /// Actuator commands decoded from the peer.
    pub commands_received: u64,
    /// Commands dropped for being older than the one already held.
    pub stale_commands: u64,
    pub imu_duplicates: u64,
    pub imu_stale: u64,
    pub imu_gaps: u64,
    pub lockstep_timeouts: u64,
    pub protocol_errors: u64,
}
