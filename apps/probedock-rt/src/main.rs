use anyhow::Context;
use clap::Parser;
use probedock_rt::cli::{Cli, Command};
use probedock_rt::listener::{Listener, ProjectKey};
use probedock_rt::telemetry::logging;
use probedock_rt::{ConnectionBridge, FilterFetcher, FilterResult, Settings};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let settings = cli.apply(Settings::load());
    tracing::debug!(target: "probedock_rt::cli", url = %settings.url(), enabled = settings.enabled, "resolved settings");
    if !settings.enabled {
        eprintln!("Probe Dock RT is disabled by configuration");
        return Ok(ExitCode::FAILURE);
    }

    let bridge = ConnectionBridge::init(&settings);

    match &cli.command {
        Command::Status => {
            if bridge.connected() {
                println!("agent reachable at {}", settings.url());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("agent not reachable at {}", settings.url());
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Filters(args) => {
            let filters = match FilterFetcher::new(bridge).get_filters() {
                FilterResult::Filters(filters) => filters,
                FilterResult::Unavailable => {
                    eprintln!("filters unavailable from {}", settings.url());
                    return Ok(ExitCode::FAILURE);
                }
            };
            if args.json {
                let raw = serde_json::to_string_pretty(&filters).context("failed to encode filters")?;
                println!("{raw}");
            } else if filters.is_empty() {
                println!("no filters defined");
            } else {
                for filter in &filters {
                    println!("{filter}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Start(args) => {
            notify(&cli, bridge, |listener| {
                listener.test_run_start(
                    &ProjectKey::name(&args.project),
                    &args.project_version,
                    args.category.as_deref(),
                )
            })
        }
        Command::End(args) => {
            notify(&cli, bridge, |listener| {
                listener.test_run_end(
                    &ProjectKey::name(&args.run.project),
                    &args.run.project_version,
                    args.run.category.as_deref(),
                    args.duration,
                )
            })
        }
        Command::Result(args) => {
            let result = args.to_result();
            notify(&cli, bridge, |listener| {
                listener.test_result(
                    &result,
                    &ProjectKey::name(&args.run.project),
                    &args.run.project_version,
                    args.run.category.as_deref(),
                )
            })
        }
    }
}

fn notify<F>(cli: &Cli, bridge: Arc<ConnectionBridge>, emit: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce(&Listener),
{
    if !bridge.connected() {
        eprintln!("agent not reachable");
        return Ok(ExitCode::FAILURE);
    }
    emit(&Listener::with_bridge(bridge));
    thread::sleep(cli.linger());
    Ok(ExitCode::SUCCESS)
}
