//! `stratolog` - CLI for the payload logger
//!
//! This binary is both the mission supervisor and the sensor workers it
//! launches, plus the operator tools for reading logs on the ground.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use stratolog::cli::{Cli, Command, ConfigCommand, LatestCommand, SummarizeCommand};
use stratolog::shutdown::{install_interrupt_handler, StopHandle};
use stratolog::storage::schema::format_timestamp;
use stratolog::summary::{summarize, Summary, SummaryOptions};
use stratolog::supervisor::run_mission;
use stratolog::worker::run_worker;
use stratolog::{init_logging, AppendLog, Config, LiveStateStore, SourceKind};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Config(ConfigCommand::Path) = cli.command {
        println!("{}", Config::default_config_path().display());
        return Ok(());
    }
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        let path = file
            .clone()
            .or_else(|| cli.config.clone())
            .unwrap_or_else(Config::default_config_path);
        println!("Validating configuration: {}", path.display());
        match Config::load_from(Some(path)) {
            Ok(_) => println!("Configuration is valid."),
            Err(e) => anyhow::bail!("configuration error: {e}"),
        }
        return Ok(());
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Run => {
            run_mission(&config, cli.verbosity(), cli.config.as_deref()).await?;
        }
        Command::Worker(cmd) => {
            let stop = StopHandle::new();
            install_interrupt_handler(stop.clone());
            run_worker(&config, SourceKind::from(cmd.source), stop).await?;
        }
        Command::Summarize(cmd) => handle_summarize(&config, &cmd)?,
        Command::Latest(cmd) => handle_latest(&config, &cmd)?,
        Command::Config(ConfigCommand::Show { json }) => handle_config_show(&config, json)?,
        Command::Config(_) => {}
    }
    Ok(())
}

fn handle_summarize(config: &Config, cmd: &SummarizeCommand) -> anyhow::Result<()> {
    let kind = SourceKind::from(cmd.source);
    let mut options = SummaryOptions::from(&config.summary);
    if let Some(max_points) = cmd.max_points {
        options.max_points = max_points;
    }
    if let Some(window) = cmd.window {
        options.smoothing_window = window;
    }

    let log = config.log_path(kind);
    let summary =
        summarize(&log, &options).with_context(|| format!("summarizing {}", log.display()))?;
    let out = cmd.out.clone().unwrap_or_else(|| config.summary_path(kind));
    summary
        .publish(&out)
        .with_context(|| format!("publishing {}", out.display()))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, kind);
        println!();
        println!("Written to {}", out.display());
    }
    Ok(())
}

fn print_summary(summary: &Summary, kind: SourceKind) {
    println!("{kind} summary");
    println!("{}", "-".repeat(kind.as_str().len() + 8));
    println!("Log:          {}", summary.log.display());
    println!("Records:      {}", summary.total_records);
    println!("In window:    {}", summary.len());
    println!("Skipped:      {}", summary.skipped_lines);
    if let (Some(first), Some(last)) = (summary.timestamps.first(), summary.timestamps.last()) {
        println!("From:         {first}");
        println!("To:           {last}");
    }
    println!();
    for series in &summary.series {
        let latest_smoothed = series
            .smoothed
            .as_ref()
            .and_then(|s| s.last())
            .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        match (&series.min, &series.max) {
            (Some(min), Some(max)) => println!(
                "{:<16} min {:>10.4} @ {}  max {:>10.4} @ {}  smoothed {}",
                series.name, min.value, min.timestamp, max.value, max.timestamp, latest_smoothed
            ),
            _ => println!("{:<16} no data", series.name),
        }
    }
}

fn handle_latest(config: &Config, cmd: &LatestCommand) -> anyhow::Result<()> {
    if cmd.from_log {
        return handle_latest_from_log(config, cmd.json);
    }
    let state = LiveStateStore::new(config.live_state_path()).read();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    if state.is_empty() {
        println!("No readings yet ({})", config.live_state_path().display());
        return Ok(());
    }

    for kind in SourceKind::ALL {
        let updated = state.updated_at(kind.as_str()).unwrap_or("never");
        println!("[{kind}] updated {updated}");
        for name in kind.schema().field_names() {
            match state.field(name) {
                Some(value) => println!("  {name:<16} {value}"),
                None => println!("  {name:<16} -"),
            }
        }
    }
    Ok(())
}

fn handle_latest_from_log(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut latest = serde_json::Map::new();
    for kind in SourceKind::ALL {
        let log = AppendLog::for_source(kind, config.log_path(kind));
        let reading = log
            .last_reading(kind)
            .with_context(|| format!("reading {}", log.path().display()))?;

        if json {
            let entry = reading.map_or(serde_json::Value::Null, |reading| {
                let fields: serde_json::Map<String, serde_json::Value> = reading
                    .fields()
                    .map(|(name, value)| (name.to_string(), value.into()))
                    .collect();
                serde_json::json!({
                    "timestamp": format_timestamp(&reading.timestamp()),
                    "fields": fields,
                })
            });
            latest.insert(kind.as_str().to_string(), entry);
            continue;
        }

        match reading {
            Some(reading) => {
                println!("[{kind}] recorded {}", format_timestamp(&reading.timestamp()));
                for (name, value) in reading.fields() {
                    println!("  {name:<16} {value}");
                }
            }
            None => println!("[{kind}] no records ({})", log.path().display()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&latest)?);
    }
    Ok(())
}

fn handle_config_show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Mission]");
    println!("  Data dir:           {}", config.mission.data_dir.display());
    println!("  Live state:         {}", config.live_state_path().display());
    println!("  Charts dir:         {}", config.charts_dir().display());
    println!();
    println!("[Supervisor]");
    println!("  Poll interval:      {:?}", config.poll_interval());
    println!("  Launch delay:       {:?}", config.launch_delay());
    println!("  Shutdown grace:     {:?}", config.shutdown_grace());
    println!("  Worker output:      {:?}", config.supervisor.worker_output);
    println!("  Extra units:        {}", config.supervisor.extra_units.len());
    for kind in SourceKind::ALL {
        let sensor = config.sensor(kind);
        println!();
        println!("[Sensor: {kind}]");
        println!("  Enabled:            {}", sensor.enabled);
        println!("  Interval:           {:?}", sensor.interval());
        println!("  Backend:            {:?}", sensor.backend);
        println!("  Log:                {}", config.log_path(kind).display());
        if let Some(backup) = config.backup_path(kind) {
            println!("  Backup:             {}", backup.display());
        }
    }
    println!();
    println!("[Summary]");
    println!("  Max points:         {}", config.summary.max_points);
    println!("  Smoothing window:   {}", config.summary.smoothing_window);
    Ok(())
}
