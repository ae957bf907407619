//! # AXON Controller Manager Binary
//!
//! Runs the orchestrator against the simulated servo board with a small
//! built-in controller set. Meant for bring-up and demos; a deployment
//! wires its own hardware components and controller registry.
//!
//! ```bash
//! axon_manager --config config/manager.toml
//! axon_manager --simulate --verbose
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use axon_controller::{
    CallbackResult, Controller, ControllerIo, ControllerKind, ControllerRegistry,
    InterfaceConfiguration, UpdateResult,
};
use axon_interface::{ComponentState, ResourceManager};
use axon_manager::loop_host::LoopOptions;
use axon_manager::{
    ControllerManager, LoopHost, ManagerConfig, SteadyClock, Strictness,
};

/// AXON controller manager with a simulated hardware pool.
#[derive(Parser, Debug)]
#[command(name = "axon_manager")]
#[command(version)]
#[command(about = "Realtime controller orchestrator")]
struct Args {
    /// Path to the manager configuration file.
    #[arg(short, long, default_value = "config/manager.toml")]
    config: String,

    /// Run against the built-in simulated servo board.
    #[arg(short, long)]
    simulate: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Holds every joint at its current position.
struct HoldPosition;

impl Controller for HoldPosition {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd", "joint2/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position", "joint2/position"])
    }

    fn on_activate(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        for index in 0..io.states.len() {
            if let Some(position) = io.states[index].get_optional() {
                if position.is_finite() {
                    let _ = io.commands[index].set_value(position);
                }
            }
        }
        UpdateResult::Ok
    }
}

fn make_hold_position() -> Box<dyn Controller> {
    Box::new(HoldPosition)
}

fn main() {
    if let Err(err) = run() {
        error!("startup failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("AXON controller manager v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match ManagerConfig::load(std::path::Path::new(&args.config)) {
        Ok(config) => config,
        Err(err) if args.simulate => {
            info!("config not loaded ({err}), using simulation defaults");
            ManagerConfig::with_rate(100)
        }
        Err(err) => return Err(Box::new(err)),
    };

    let resource_manager = Arc::new(ResourceManager::new());
    resource_manager.register_component(Box::new(axon_interface::sim::SimComponent::new(
        "servo_board",
        &["joint1", "joint2"],
    )))?;
    resource_manager.set_component_state("servo_board", ComponentState::Active)?;

    let mut registry = ControllerRegistry::new();
    registry.register("HoldPosition", ControllerKind::Standard, make_hold_position);

    let manager = Arc::new(ControllerManager::new(
        config,
        registry,
        resource_manager,
        Arc::new(SteadyClock::new()),
    ));

    let mut host = LoopHost::new(Arc::clone(&manager), LoopOptions::default());
    let stop = host.stop_flag();
    let loop_thread = std::thread::Builder::new()
        .name("axon-cycle".to_string())
        .spawn(move || host.run())?;

    manager.load_controller("hold", Some("HoldPosition"))?;
    manager.configure_controller("hold")?;
    manager.switch_controller(
        &["hold".to_string()],
        &[],
        Strictness::Strict,
        false,
        Duration::from_secs(1),
    )?;
    info!("controller 'hold' active, press ctrl-c to stop");

    wait_for_interrupt();

    info!("shutting down");
    if let Err(err) = manager.shutdown() {
        error!("shutdown error: {err}");
    }
    stop.store(true, Ordering::SeqCst);
    match loop_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("loop host error: {err}"),
        Err(_) => error!("loop thread panicked"),
    }
    Ok(())
}

fn setup_tracing(args: &Args) {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Park until SIGINT. Installing a handler without extra dependencies:
/// poll a flag flipped by the libc handler.
fn wait_for_interrupt() {
    use std::sync::atomic::AtomicBool;

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_sigint(_signal: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
    while !INTERRUPTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
}
