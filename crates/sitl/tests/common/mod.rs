//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mavlink::common::{MavMessage, MavModeFlag, HIL_ACTUATOR_CONTROLS_DATA};
use mavlink::MavHeader;
use sitl_mavlink_bridge::protocol::parse_frame;
use sitl_mavlink_bridge::{ConnectionState, FrameTransport, TransportError};

pub fn init_logger() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// HIL_ACTUATOR_CONTROLS frame as an autopilot would send it.
pub fn actuator_frame(time_usec: u64, armed: bool, values: &[f32]) -> Vec<u8> {
    let mut controls = [0.0f32; 16];
    for (slot, v) in controls.iter_mut().zip(values) {
        *slot = *v;
    }
    let msg = MavMessage::HIL_ACTUATOR_CONTROLS(HIL_ACTUATOR_CONTROLS_DATA {
        time_usec,
        controls,
        mode: if armed {
            MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED
        } else {
            MavModeFlag::empty()
        },
        flags: 0,
    });
    let header = MavHeader {
        system_id: 1,
        component_id: 1,
        sequence: 0,
    };
    let mut buf = Cursor::new(Vec::new());
    mavlink::write_v2_msg(&mut buf, header, &msg).unwrap();
    buf.into_inner()
}

/// `time_usec` of a HIL_SENSOR frame, `None` for anything else.
pub fn hil_sensor_time(frame: &[u8]) -> Option<u64> {
    match parse_frame(frame) {
        Ok((_, MavMessage::HIL_SENSOR(data))) => Some(data.time_usec),
        _ => None,
    }
}

/// Traffic seen by [`ScriptedTransport`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Send(Vec<u8>),
    /// Logged when the frame is handed to the bridge.
    Recv(Vec<u8>),
}

/// What the scripted autopilot answers to each sensor message.
#[derive(Debug, Clone, Default)]
pub struct Autopilot {
    /// `None` = stay silent.
    pub reply: Option<(bool, Vec<f32>)>,
}

/// In-memory transport driven by a scripted autopilot.
pub struct ScriptedTransport {
    pub state: ConnectionState,
    pub log: Arc<Mutex<Vec<Event>>>,
    pub autopilot: Arc<Mutex<Autopilot>>,
    inbox: VecDeque<Vec<u8>>,
    pub closed: bool,
}

impl ScriptedTransport {
    pub fn new(autopilot: Arc<Mutex<Autopilot>>) -> Self {
        Self {
            state: ConnectionState::Connected,
            log: Arc::new(Mutex::new(Vec::new())),
            autopilot,
            inbox: VecDeque::new(),
            closed: false,
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(Mutex::new(Autopilot::default())))
    }

    /// Queue a frame as if it had arrived from the network.
    pub fn inject(&mut self, frame: Vec<u8>) {
        self.inbox.push_back(frame);
    }

    fn deliver(&mut self) -> Option<Vec<u8>> {
        let frame = self.inbox.pop_front()?;
        self.log.lock().unwrap().push(Event::Recv(frame.clone()));
        Some(frame)
    }
}

impl FrameTransport for ScriptedTransport {
    fn poll_connection(&mut self) -> ConnectionState {
        self.state
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        self.log.lock().unwrap().push(Event::Send(frame.to_vec()));
        if let Some(time_usec) = hil_sensor_time(frame) {
            let reply = self.autopilot.lock().unwrap().reply.clone();
            if let Some((armed, values)) = reply {
                self.inbox
                    .push_back(actuator_frame(time_usec, armed, &values));
            }
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.deliver())
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.deliver() {
            Some(frame) => Ok(Some(frame)),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.state = ConnectionState::Closed;
    }
}
