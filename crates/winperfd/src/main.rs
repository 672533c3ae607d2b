//! winperfd - Windows performance counter collector daemon.
//!
//! Polls `Get-Counter` on each configured Windows host over ssh, buffers
//! values and status events per device, and publishes them to stdout as
//! JSON lines. Logs go to stderr.

mod background;
mod memory;
mod publish;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use winperf_core::collector::{DeviceTarget, PerfmonCollector};
use winperf_core::config::Config;
use winperf_core::persister::{DataPersister, SharedPersister};
use winperf_core::shell::SshShell;

use crate::background::{log_report, maintenance_loop, poll_loop, publish_loop};
use crate::publish::{Publisher, drain};

/// Windows performance counter collector daemon.
#[derive(Parser)]
#[command(
    name = "winperfd",
    about = "Windows performance counter collector daemon",
    version
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        env = "WINPERFD_CONFIG",
        default_value = "/etc/winperfd/winperfd.toml"
    )]
    config: PathBuf,

    /// Polling interval in seconds. Overrides `interval_secs`.
    #[arg(short, long)]
    interval: Option<u64>,

    /// Seconds a device may stay idle before its buffered data is evicted.
    /// Overrides `idle_bound_secs`.
    #[arg(long)]
    idle_bound: Option<u64>,

    /// Run one cycle per device, publish the results and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber on stderr.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["winperfd", "winperf_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies command-line overrides on top of the loaded config.
fn apply_overrides(config: &mut Config, args: &Args) -> Result<(), String> {
    if let Some(interval) = args.interval {
        if interval == 0 {
            return Err("--interval must be positive".to_string());
        }
        config.interval_secs = interval;
    }
    if let Some(idle_bound) = args.idle_bound {
        if idle_bound == 0 {
            return Err("--idle-bound must be positive".to_string());
        }
        config.idle_bound_secs = idle_bound;
    }
    Ok(())
}

/// One collector per device, each with its own ssh destination.
fn build_collectors(
    config: &Config,
) -> Vec<(Arc<PerfmonCollector<SshShell>>, Arc<DeviceTarget>)> {
    config
        .devices
        .iter()
        .map(|device| {
            let mut shell = SshShell::new(&device.address, config.command_timeout())
                .with_binary(&config.ssh.binary);
            if let Some(user) = &config.ssh.user {
                shell = shell.with_user(user);
            }
            if let Some(port) = config.ssh.port {
                shell = shell.with_port(port);
            }
            let collector = PerfmonCollector::new(shell).with_truncation(config.truncation);
            (Arc::new(collector), Arc::new(device.clone()))
        })
        .collect()
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to build tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = apply_overrides(&mut config, &args) {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("winperfd {} starting", winperf_core::VERSION);
    info!(
        "Config: {} devices, interval={}s, idle_bound={}s, publish={}s, truncation={:?}",
        config.devices.len(),
        config.interval_secs,
        config.idle_bound_secs,
        config.publish_interval_secs,
        config.truncation
    );
    if config.devices.is_empty() {
        warn!("no devices configured");
    }

    let persister = DataPersister::shared();
    let collectors = build_collectors(&config);
    let device_ids: Vec<String> = config.devices.iter().map(|d| d.id.clone()).collect();

    if args.once {
        run_once(&collectors, &persister).await;
        let mut publisher = Publisher::new(std::io::stdout());
        let written = drain(&persister, &device_ids, &mut publisher);
        info!("published {} devices", written);
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pollers = JoinSet::new();
    for (collector, target) in collectors {
        pollers.spawn(poll_loop(
            collector,
            target,
            persister.clone(),
            config.interval(),
            config.command_timeout(),
            shutdown_rx.clone(),
        ));
    }
    drop(shutdown_rx);

    let mut tasks = JoinSet::new();
    tasks.spawn(maintenance_loop(
        persister.clone(),
        config.maintenance_interval(),
        config.idle_bound(),
    ));
    tasks.spawn(publish_loop(
        persister.clone(),
        device_ids.clone(),
        config.publish_interval(),
        Publisher::new(std::io::stdout()),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Received shutdown signal, stopping...");
    // Pollers stop starting cycles and let in-flight ones finish first.
    let _ = shutdown_tx.send(true);
    while let Some(joined) = pollers.join_next().await {
        if let Err(e) = joined {
            error!("polling task failed: {}", e);
        }
    }
    tasks.abort_all();

    // Whatever was buffered since the last publish pass.
    let mut publisher = Publisher::new(std::io::stdout());
    let written = drain(&persister, &device_ids, &mut publisher);
    info!("published {} devices on shutdown", written);
    info!("winperfd stopped");
}

/// Runs one cycle per device concurrently and waits for all of them.
async fn run_once(
    collectors: &[(Arc<PerfmonCollector<SshShell>>, Arc<DeviceTarget>)],
    persister: &SharedPersister,
) {
    let mut cycles = JoinSet::new();
    for (collector, target) in collectors {
        let collector = collector.clone();
        let target = target.clone();
        let persister = persister.clone();
        cycles.spawn(async move { collector.collect(&target, &persister).await });
    }
    while let Some(joined) = cycles.join_next().await {
        match joined {
            Ok(report) => log_report(&report),
            Err(e) => error!("collection task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["winperfd", "--config", "/tmp/none.toml"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_toml_str("").unwrap();
        apply_overrides(&mut config, &args(&["-i", "30", "--idle-bound", "120"])).unwrap();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.idle_bound_secs, 120);
    }

    #[test]
    fn test_zero_override_rejected() {
        let mut config = Config::from_toml_str("").unwrap();
        assert!(apply_overrides(&mut config, &args(&["--interval", "0"])).is_err());
        assert!(apply_overrides(&mut config, &args(&["--idle-bound", "0"])).is_err());
    }

    #[test]
    fn test_build_collectors() {
        let config = Config::from_toml_str(
            r#"
[ssh]
user = "monitor"
port = 2222

[[devices]]
id = "a"
address = "10.0.0.1"

[[devices]]
id = "b"
address = "10.0.0.2"
"#,
        )
        .unwrap();
        let collectors = build_collectors(&config);
        assert_eq!(collectors.len(), 2);
        assert_eq!(collectors[1].1.id, "b");
        assert_eq!(collectors[0].0.shell().destination(), "monitor@10.0.0.1");
    }
}
