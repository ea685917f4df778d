//! SITL bridge driving the built-in lightweight multicopter model.
//!
//! Runs the step loop against a MAVLink autopilot listening on UDP. In
//! lockstep mode the autopilot paces the simulation; otherwise steps are
//! paced to wall clock scaled by the speed factor.
//!
//! Usage:
//!   cargo run -p sitl_mavlink_bridge --bin sitl_bridge -- [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>   JSON configuration file
//!   --host <HOST>         Autopilot host (overrides config)
//!   --port <PORT>         Autopilot UDP port (overrides config)
//!   --protocol <1|2>      MAVLink protocol version (overrides config)
//!   --no-lockstep         Free-running mode
//!   --steps <N>           Stop after N steps (default: run until Ctrl+C)

use std::env;
use std::process;
use std::time::Duration;

use log::{error, info};

use sitl_mavlink_bridge::config::ProtocolVersion;
use sitl_mavlink_bridge::{
    BridgeConfig, BridgeError, BridgeStats, LightweightConfig, LightweightModel, ShutdownSignal,
    SitlBridge, StepInfo, StepOutcome,
};

#[derive(Default)]
struct Args {
    config: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<u8>,
    no_lockstep: bool,
    steps: Option<u64>,
}

fn parse_args() -> Args {
    let mut args = Args::default();

    let raw: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                args.config = Some(string_arg(&raw, i, "config"));
            }
            "--host" => {
                i += 1;
                args.host = Some(string_arg(&raw, i, "host"));
            }
            "--port" => {
                i += 1;
                args.port = Some(parsed_arg(&raw, i, "port"));
            }
            "--protocol" => {
                i += 1;
                args.protocol = Some(parsed_arg(&raw, i, "protocol"));
            }
            "--no-lockstep" => args.no_lockstep = true,
            "--steps" => {
                i += 1;
                args.steps = Some(parsed_arg(&raw, i, "steps"));
            }
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {other}");
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn string_arg(raw: &[String], i: usize, name: &str) -> String {
    raw.get(i).cloned().unwrap_or_else(|| {
        eprintln!("Error: --{name} requires a value");
        process::exit(1);
    })
}

fn parsed_arg<T: std::str::FromStr>(raw: &[String], i: usize, name: &str) -> T {
    string_arg(raw, i, name).parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for --{name}");
        process::exit(1);
    })
}

fn print_usage() {
    eprintln!(
        "Usage: sitl_bridge [OPTIONS]\n\
         \n\
         Options:\n\
         \x20 -c, --config <FILE>   JSON configuration file\n\
         \x20 --host <HOST>         Autopilot host (overrides config)\n\
         \x20 --port <PORT>         Autopilot UDP port (overrides config)\n\
         \x20 --protocol <1|2>      MAVLink protocol version (overrides config)\n\
         \x20 --no-lockstep         Free-running mode\n\
         \x20 --steps <N>           Stop after N steps (default: until Ctrl+C)\n\
         \x20 -h, --help            Show this help"
    );
}

fn load_config(args: &Args) -> Result<BridgeConfig, BridgeError> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(host) = &args.host {
        config.transport.host = host.clone();
    }
    if let Some(port) = args.port {
        config.transport.port = port;
    }
    if let Some(version) = args.protocol {
        config.protocol.version = ProtocolVersion::try_from(version)?;
    }
    if args.no_lockstep {
        config.lockstep.enabled = false;
    }
    Ok(config)
}

/// Step loop. Runs on a blocking thread until `max_steps` or shutdown.
fn run(
    config: BridgeConfig,
    max_steps: Option<u64>,
    shutdown: ShutdownSignal,
) -> Result<BridgeStats, BridgeError> {
    let speed_factor = config.lockstep.speed_factor;
    let mut model = LightweightModel::new(LightweightConfig {
        home: config.home,
        ..Default::default()
    });
    let mut bridge = SitlBridge::configure(config, shutdown.clone())?;
    let step = Duration::from_micros(model.step_size_us());
    let wall_step = step.div_f64(speed_factor);

    let mut count = 0u64;
    while max_steps.map_or(true, |max| count < max) {
        let sim_time = Duration::from_micros(model.sim_time_us()) + step;
        let info = StepInfo::running(sim_time, step);

        bridge.pre_update(info, &mut model);
        model.step();
        for sample in model.samples() {
            bridge.push_sample(sample);
        }

        match bridge.post_update(info) {
            StepOutcome::Closing => break,
            // The autopilot paced this step.
            StepOutcome::Synchronized => {}
            _ => {
                if shutdown.sleep(wall_step) {
                    break;
                }
            }
        }

        count += 1;
        if count % 2_500 == 0 {
            info!(
                "t={:.1}s alt={:.2}m link={} stats={:?}",
                model.sim_time_us() as f64 / 1e6,
                model.altitude(),
                bridge.connection_state(),
                bridge.stats()
            );
        }
    }

    bridge.shutdown();
    Ok(bridge.stats())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    info!(
        "autopilot {}:{}, lockstep {}",
        config.transport.host,
        config.transport.port,
        if config.lockstep.enabled { "on" } else { "off" }
    );

    let shutdown = ShutdownSignal::new();
    let sim_shutdown = shutdown.clone();
    let max_steps = args.steps;
    let mut sim = tokio::task::spawn_blocking(move || run(config, max_steps, sim_shutdown));

    let joined = tokio::select! {
        result = &mut sim => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            shutdown.trigger();
            sim.await
        }
    };

    match joined {
        Ok(Ok(stats)) => match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("cannot serialize stats: {e}"),
        },
        Ok(Err(e)) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: simulation thread failed: {e}");
            process::exit(1);
        }
    }
}
