mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use sitl_mavlink_bridge::config::ChannelEntry;
use sitl_mavlink_bridge::types::ImuReading;
use sitl_mavlink_bridge::{
    BridgeConfig, ConnectionState, LightweightConfig, LightweightModel, ProtocolVersion,
    RecordingSink, SensorSample, ShutdownSignal, SitlBridge, StepInfo, StepOutcome,
};

use common::{actuator_frame, hil_sensor_time, init_logger, Autopilot, Event, ScriptedTransport};

fn config(lockstep: bool) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.lockstep.enabled = lockstep;
    config.lockstep.timeout_ms = 200;
    config.noise.seed = Some(7);
    config
}

fn bridge(config: BridgeConfig, transport: ScriptedTransport) -> SitlBridge<ScriptedTransport> {
    SitlBridge::with_transport(config, transport, ShutdownSignal::new()).unwrap()
}

fn autopilot(armed: bool, values: &[f32]) -> Arc<Mutex<Autopilot>> {
    Arc::new(Mutex::new(Autopilot {
        reply: Some((armed, values.to_vec())),
    }))
}

/// One host step: apply outputs, advance the model, publish its samples.
fn step(
    bridge: &mut SitlBridge<ScriptedTransport>,
    model: &mut LightweightModel,
    sink: &mut RecordingSink,
) -> StepOutcome {
    let dt = Duration::from_micros(model.step_size_us());
    let info = StepInfo::running(Duration::from_micros(model.sim_time_us()) + dt, dt);
    bridge.pre_update(info, sink);
    model.step();
    for sample in model.samples() {
        bridge.push_sample(sample);
    }
    bridge.post_update(info)
}

fn sensor_times(log: &Mutex<Vec<Event>>) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Send(frame) => hil_sensor_time(frame),
            Event::Recv(_) => None,
        })
        .collect()
}

#[test]
fn test_lockstep_send_precedes_receive_every_step() {
    init_logger();
    let transport = ScriptedTransport::new(autopilot(true, &[0.5; 4]));
    let log = transport.log.clone();
    let mut bridge = bridge(config(true), transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    for i in 0..50 {
        assert_eq!(
            step(&mut bridge, &mut model, &mut sink),
            StepOutcome::Synchronized,
            "step {i}"
        );
    }

    let mut awaiting = false;
    let mut exchanges = 0;
    for event in log.lock().unwrap().iter() {
        match event {
            Event::Send(frame) if hil_sensor_time(frame).is_some() => {
                assert!(!awaiting, "sensor message sent while a response was pending");
                awaiting = true;
            }
            Event::Send(_) => {}
            Event::Recv(_) => {
                assert!(awaiting, "response received before its request");
                awaiting = false;
                exchanges += 1;
            }
        }
    }
    assert_eq!(exchanges, 50);

    let times = sensor_times(&log);
    assert!(times.windows(2).all(|w| w[1] > w[0]));

    let stats = bridge.stats();
    assert_eq!(stats.batches_sent, 50);
    assert_eq!(stats.commands_received, 50);
    assert_eq!(stats.lockstep_timeouts, 0);
}

#[test]
fn test_lockstep_waits_only_after_first_answer() {
    init_logger();
    let mut cfg = config(true);
    cfg.lockstep.timeout_ms = 200;
    let transport = ScriptedTransport::silent();
    let autopilot = transport.autopilot.clone();
    let mut bridge = bridge(cfg, transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    // Autopilot not running yet: steps go out without waiting.
    let start = Instant::now();
    for _ in 0..5 {
        assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Sent);
    }
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(bridge.stats().lockstep_timeouts, 0);
    assert_eq!(bridge.stats().batches_sent, 5);
    assert!(!bridge.is_synchronized());

    autopilot.lock().unwrap().reply = Some((true, vec![0.5; 4]));
    assert_eq!(
        step(&mut bridge, &mut model, &mut sink),
        StepOutcome::Synchronized
    );
    assert!(bridge.is_synchronized());

    // Once synchronized, silence blocks for the full bound.
    autopilot.lock().unwrap().reply = None;
    let start = Instant::now();
    assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Degraded);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(bridge.stats().lockstep_timeouts, 1);
}

#[test]
fn test_lockstep_timeout_does_not_stall() {
    init_logger();
    let mut cfg = config(true);
    cfg.lockstep.timeout_ms = 30;
    let transport = ScriptedTransport::new(autopilot(true, &[0.1; 4]));
    let autopilot = transport.autopilot.clone();
    let mut bridge = bridge(cfg, transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    assert_eq!(
        step(&mut bridge, &mut model, &mut sink),
        StepOutcome::Synchronized
    );

    autopilot.lock().unwrap().reply = None;
    let start = Instant::now();
    assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Degraded);
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(bridge.stats().lockstep_timeouts, 1);

    // A late answer is consumed before the next send, not taken as its reply.
    bridge
        .transport_mut()
        .inject(actuator_frame(8_000, true, &[0.1; 4]));
    autopilot.lock().unwrap().reply = Some((true, vec![0.2; 4]));
    assert_eq!(
        step(&mut bridge, &mut model, &mut sink),
        StepOutcome::Synchronized
    );
    assert_eq!(bridge.stats().commands_received, 3);
    let held = bridge.dispatcher().latest().unwrap();
    assert!((held.channels[0] - 0.2).abs() < 1e-6);
    assert_eq!(held.timestamp_us, 12_000);
}

#[test]
fn test_lockstep_without_link_proceeds() {
    let mut transport = ScriptedTransport::silent();
    transport.state = ConnectionState::Resolving;
    let log = transport.log.clone();
    let mut bridge = bridge(config(true), transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    let start = Instant::now();
    for _ in 0..20 {
        assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Degraded);
    }
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(bridge.stats().batches_sent, 0);
}

#[test]
fn test_free_running_respects_sensor_interval() {
    let transport = ScriptedTransport::silent();
    let log = transport.log.clone();
    let mut bridge = bridge(config(false), transport);
    let mut model = LightweightModel::new(LightweightConfig {
        step_size_us: 1_000,
        ..Default::default()
    });
    let mut sink = RecordingSink::default();

    let outcomes: Vec<StepOutcome> = (0..40)
        .map(|_| step(&mut bridge, &mut model, &mut sink))
        .collect();
    assert_eq!(
        outcomes.iter().filter(|o| **o == StepOutcome::Sent).count(),
        10
    );
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, StepOutcome::Sent | StepOutcome::Skipped)));

    let times = sensor_times(&log);
    assert_eq!(times.len(), 10);
    assert!(times.windows(2).all(|w| w[1] - w[0] >= 4_000));
}

#[test]
fn test_free_running_reports_scaled_time() {
    let mut cfg = config(false);
    cfg.lockstep.speed_factor = 2.0;
    let transport = ScriptedTransport::silent();
    let log = transport.log.clone();
    let mut bridge = bridge(cfg, transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Sent);
    assert_eq!(sensor_times(&log), vec![2_000]);
}

#[test]
fn test_quad_motor_outputs_follow_arming() {
    init_logger();
    let mut cfg = config(true);
    cfg.actuators.channels = (0..4)
        .map(|i| ChannelEntry::motor(i, 1.0, 0.05, 0.0))
        .collect();
    let commands = autopilot(true, &[0.2, 0.3, 0.4, 0.5]);
    let mut bridge = bridge(cfg, ScriptedTransport::new(commands.clone()));
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    // Nothing to hold before the first answer.
    assert_eq!(
        step(&mut bridge, &mut model, &mut sink),
        StepOutcome::Synchronized
    );
    assert_eq!(sink.applications, 0);

    commands.lock().unwrap().reply = Some((false, vec![0.2, 0.3, 0.4, 0.5]));
    step(&mut bridge, &mut model, &mut sink);
    for (out, expected) in sink.motors.iter().zip([0.2, 0.3, 0.4, 0.5]) {
        assert!((out - expected).abs() < 1e-6, "{out} != {expected}");
    }

    step(&mut bridge, &mut model, &mut sink);
    assert_eq!(sink.motors, vec![0.05; 4]);
}

#[test]
fn test_duplicate_imu_sends_one_batch() {
    let transport = ScriptedTransport::new(autopilot(true, &[0.0; 4]));
    let log = transport.log.clone();
    let mut bridge = bridge(config(true), transport);
    let dt = Duration::from_millis(4);
    let imu = ImuReading {
        timestamp_us: 4_000,
        sequence: 5,
        linear_acceleration_mss: Vector3::new(0.0, 0.0, 9.81),
        angular_velocity_rads: Vector3::zeros(),
    };

    bridge.push_sample(SensorSample::Imu(imu));
    let first = bridge.post_update(StepInfo::running(dt, dt));
    bridge.push_sample(SensorSample::Imu(imu));
    let second = bridge.post_update(StepInfo::running(dt * 2, dt));

    assert_eq!(first, StepOutcome::Synchronized);
    assert_eq!(second, StepOutcome::Skipped);
    assert_eq!(sensor_times(&log).len(), 1);
    assert_eq!(bridge.stats().imu_duplicates, 1);
}

#[test]
fn test_free_running_applies_commands_in_arrival_order() {
    let mut bridge = bridge(config(false), ScriptedTransport::silent());
    let mut sink = RecordingSink::default();
    let info = StepInfo::running(Duration::from_millis(4), Duration::from_millis(4));

    bridge
        .transport_mut()
        .inject(actuator_frame(10, true, &[0.2; 4]));
    bridge
        .transport_mut()
        .inject(actuator_frame(20, true, &[0.4; 4]));
    assert!(bridge.pre_update(info, &mut sink));
    // armed: 0.4 * 1000 + 100
    assert!((sink.motors[0] - 500.0).abs() < 1e-3);

    bridge
        .transport_mut()
        .inject(actuator_frame(15, false, &[0.0; 4]));
    assert!(bridge.pre_update(info, &mut sink));
    assert!((sink.motors[0] - 500.0).abs() < 1e-3);
    assert_eq!(bridge.stats().stale_commands, 1);
    assert_eq!(bridge.stats().commands_received, 3);
}

#[test]
fn test_paused_steps_ignored() {
    let transport = ScriptedTransport::new(autopilot(true, &[0.5; 4]));
    let log = transport.log.clone();
    let mut bridge = bridge(config(true), transport);
    let mut sink = RecordingSink::default();
    let mut model = LightweightModel::with_defaults();
    model.step();
    for sample in model.samples() {
        bridge.push_sample(sample);
    }

    let info = StepInfo::paused(Duration::from_millis(4));
    assert!(!bridge.pre_update(info, &mut sink));
    assert_eq!(bridge.post_update(info), StepOutcome::Paused);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(bridge.stats().paused_steps, 1);
    assert_eq!(bridge.stats().steps, 0);
    assert_eq!(bridge.lockstep_state().sim_time_us, 0);
}

#[test]
fn test_protocol_v1_frames_on_the_wire() {
    let mut cfg = config(false);
    cfg.protocol.version = ProtocolVersion::V1;
    let transport = ScriptedTransport::silent();
    let log = transport.log.clone();
    let mut bridge = bridge(cfg, transport);
    let mut model = LightweightModel::with_defaults();
    let mut sink = RecordingSink::default();

    assert_eq!(step(&mut bridge, &mut model, &mut sink), StepOutcome::Sent);
    let log = log.lock().unwrap();
    assert!(!log.is_empty());
    for event in log.iter() {
        let Event::Send(frame) = event else {
            panic!("unexpected receive");
        };
        assert_eq!(frame[0], 0xFE);
    }
    // IMU, baro and mag each in their own HIL_SENSOR.
    assert_eq!(
        log.iter()
            .filter(|e| matches!(e, Event::Send(f) if hil_sensor_time(f).is_some()))
            .count(),
        3
    );
}

#[test]
fn test_shutdown_closes_transport() {
    let shutdown = ShutdownSignal::new();
    let mut bridge = SitlBridge::with_transport(
        config(true),
        ScriptedTransport::silent(),
        shutdown.clone(),
    )
    .unwrap();

    shutdown.trigger();
    let info = StepInfo::running(Duration::from_millis(4), Duration::from_millis(4));
    assert_eq!(bridge.post_update(info), StepOutcome::Closing);
    assert!(bridge.transport().closed);
    assert_eq!(bridge.connection_state(), ConnectionState::Closed);
}

#[test]
fn test_invalid_config_rejected() {
    let mut cfg = config(true);
    cfg.actuators.channels = vec![ChannelEntry::motor(16, 1.0, 0.0, 0.0)];
    assert!(SitlBridge::with_transport(cfg, ScriptedTransport::silent(), ShutdownSignal::new())
        .is_err());
}
