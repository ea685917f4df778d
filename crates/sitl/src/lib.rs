//! Software-in-the-loop bridge between a physics simulation and a MAVLink
//! autopilot.
//!
//! The host engine owns the step loop and calls into [`SitlBridge`] before
//! and after each physics step. Sensor samples go out as HIL messages over
//! UDP; actuator commands come back and are applied to the model through an
//! [`ActuatorSink`].

pub mod actuator;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod lockstep;
pub mod protocol;
pub mod sensors;
pub mod shutdown;
pub mod transport;
pub mod types;

pub use bridge::{BridgeStats, SitlBridge, StepOutcome};
pub use config::{BridgeConfig, ProtocolVersion};
pub use engine::{ActuatorSink, LightweightConfig, LightweightModel, RecordingSink, StepInfo};
pub use error::{BridgeError, ConfigError, ProtocolError, TransportError};
pub use shutdown::ShutdownSignal;
pub use transport::{FrameTransport, UdpTransport};
pub use types::{ActuatorCommand, ActuatorKind, ConnectionState, SensorKind, SensorSample};
