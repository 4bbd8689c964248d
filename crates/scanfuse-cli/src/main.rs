//! `scanfuse` – range-scan / camera fusion bridge.
//!
//! Startup order:
//!
//! 1. Install logging (and OTLP export when configured).
//! 2. Load `~/.scanfuse/config.toml`, writing defaults on first run.
//! 3. Bind the profile and objects WebSocket endpoints and start the
//!    detections client.
//! 4. Open the rangefinder and run the acquisition loop on this thread
//!    until Ctrl-C or the device gives out.
//!
//! `SIGUSR1` toggles profile publishing while running.

mod config;

use colored::Colorize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use scanfuse_hal::{Rangefinder, SimRangefinder};
use scanfuse_middleware::{BusTransport, Channel, ChannelBus, WsBridge};
use scanfuse_runtime::{AcquisitionLoop, LoopControl, SystemClock, init_tracing};
use scanfuse_types::FuseError;

use config::Config;

fn main() -> ExitCode {
    let telemetry = init_tracing("scanfuse");

    print_banner();
    if telemetry.is_exporting() {
        info!("exporting spans over OTLP");
    }

    let cfg = match config::load_or_init() {
        Ok((cfg, created)) => {
            if created {
                println!(
                    "  {} Wrote default configuration to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                );
            }
            cfg
        }
        Err(e) => {
            eprintln!("{} {e}", "✗".red().bold());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("{} invalid configuration: {e}", "✗".red().bold());
        return ExitCode::FAILURE;
    }

    match run(&cfg) {
        Ok(()) => {
            println!("{}", "  ✓ scanfuse stopped cleanly.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bridge terminated");
            eprintln!("{} {e}", "✗".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &Config) -> Result<(), FuseError> {
    let control = LoopControl::new(cfg.publish_profile);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let ctrlc_control = control.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – finishing the current cycle …".yellow().bold()
        );
        ctrlc_control.stop();
    }) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("scanfuse-io")
        .build()
        .map_err(|e| FuseError::Transport(format!("tokio runtime: {e}")))?;

    // ── Network endpoints ─────────────────────────────────────────────────
    let bus = ChannelBus::new();
    // Subscribe before the client task starts so no batch is missed.
    let transport = BusTransport::new(bus.clone(), &[Channel::Detections]);
    let bridge = WsBridge::new(bus);

    let profile_addr = cfg.profile_socket().map_err(FuseError::Config)?;
    let objects_addr = cfg.objects_socket().map_err(FuseError::Config)?;
    let (profile_server, objects_server) = runtime.block_on(async {
        let profile = bridge.listen(Channel::Profile, profile_addr).await?;
        let objects = bridge.listen(Channel::Objects, objects_addr).await?;
        Ok::<_, FuseError>((profile, objects))
    })?;
    runtime.spawn(profile_server.run());
    runtime.spawn(objects_server.run());
    runtime.spawn(
        bridge
            .clone()
            .run_detections_client(cfg.detections_url.clone(), Duration::from_millis(cfg.reconnect_ms)),
    );

    #[cfg(unix)]
    {
        let _rt = runtime.enter();
        match profile_toggle_task(control.clone()) {
            Ok(task) => {
                runtime.spawn(task);
            }
            Err(e) => warn!(error = %e, "could not install SIGUSR1 handler"),
        }
    }

    // ── Acquisition ───────────────────────────────────────────────────────
    let device = build_device(cfg)?;
    let mut acquisition = AcquisitionLoop::init(
        device,
        Box::new(transport),
        Box::new(SystemClock::new()),
        control,
        cfg.loop_config(),
    )?;
    let result = acquisition.run();
    drop(acquisition);

    runtime.shutdown_timeout(Duration::from_millis(500));

    let stats = result?;
    info!(
        cycles = stats.cycles,
        profile_messages = stats.profile_messages,
        objects_messages = stats.objects_messages,
        matched = stats.matched,
        recoveries = stats.recoveries,
        "bridge stopped"
    );
    Ok(())
}

/// Instantiate the rangefinder named by `cfg.device`.
fn build_device(cfg: &Config) -> Result<Box<dyn Rangefinder>, FuseError> {
    match cfg.device.as_str() {
        "sim" => Ok(Box::new(
            SimRangefinder::new("sim_lidar")
                .with_room(cfg.sim_room())
                .with_scan_period(Duration::from_millis(cfg.sim_scan_period_ms))
                .build(),
        )),
        other => Err(FuseError::DeviceInit {
            component: other.to_string(),
            details: "no driver for this device type".to_string(),
        }),
    }
}

/// Register the SIGUSR1 handler and return the task that flips profile
/// publishing on each signal. Must be called inside a Tokio runtime; the
/// handler is installed before this returns.
#[cfg(unix)]
fn profile_toggle_task(
    control: LoopControl,
) -> std::io::Result<impl std::future::Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    Ok(async move {
        while usr1.recv().await.is_some() {
            let enabled = control.toggle_profile();
            info!(enabled, "SIGUSR1: profile publishing toggled");
        }
    })
}

fn print_banner() {
    println!();
    println!("{}", r#"  ___  ___ __ _ _ __  / _|_   _ ___  ___"#.bold().cyan());
    println!("{}", r#" / __|/ __/ _` | '_ \| |_| | | / __|/ _ \"#.bold().cyan());
    println!("{}", r#" \__ \ (_| (_| | | | |  _| |_| \__ \  __/"#.bold().cyan());
    println!("{}", r#" |___/\___\__,_|_| |_|_|  \__,_|___/\___|"#.bold().cyan());
    println!(
        "  {} v{} – range-scan / camera fusion bridge",
        "scanfuse".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();
}
