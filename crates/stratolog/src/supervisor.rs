//! Launching, watching and stopping worker processes.
//!
//! The supervisor holds no sensor or log state. It starts each unit as its
//! own OS process, polls liveness on a fixed period, alerts on units that
//! vanish without a stop request and, on interrupt, asks every live unit to
//! terminate. Units are never respawned and never force-killed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, WorkerOutput};
use crate::error::{Error, Result};
use crate::logging::Verbosity;
use crate::shutdown::{install_interrupt_handler, StopHandle};

/// A unit to launch: a name and an argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Operator-facing name.
    pub name: String,
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
}

impl UnitSpec {
    /// Create a unit spec.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Set the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Supervisor timing and output handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Liveness poll period.
    pub poll_interval: Duration,
    /// Settling delay after each launch.
    pub launch_delay: Duration,
    /// How long shutdown waits for units to exit.
    pub shutdown_grace: Duration,
    /// Where unit output goes.
    pub output: WorkerOutput,
}

impl From<&Config> for SupervisorSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            launch_delay: config.launch_delay(),
            shutdown_grace: config.shutdown_grace(),
            output: config.supervisor.worker_output,
        }
    }
}

/// A launched unit.
#[derive(Debug)]
pub struct WorkerStatus {
    name: String,
    child: Child,
    pid: Option<u32>,
    alive: bool,
    alerted: bool,
}

impl WorkerStatus {
    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id at launch.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Last known liveness.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Outcome of [`ProcessSupervisor::launch_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Units that started.
    pub launched: Vec<String>,
    /// Units that failed to start, with the reason.
    pub failed: Vec<(String, String)>,
    /// Units not attempted because the runtime is missing.
    pub aborted: Vec<String>,
    /// The missing program, if launching was aborted.
    pub runtime_missing: Option<String>,
}

/// Outcome of [`ProcessSupervisor::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Units that exited after the terminate request.
    pub stopped: Vec<String>,
    /// Units still running when the grace period ran out.
    pub still_running: Vec<String>,
    /// Units that had already exited before shutdown began.
    pub already_exited: Vec<String>,
}

/// Outcome of a whole mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionReport {
    /// When the supervisor started.
    pub started_at: DateTime<Utc>,
    /// When it finished shutting down.
    pub ended_at: DateTime<Utc>,
    /// Launch results.
    pub launch: LaunchReport,
    /// Unexpected exits seen while monitoring.
    pub unexpected_exits: Vec<String>,
    /// Shutdown results.
    pub shutdown: ShutdownReport,
}

/// Lifecycle manager over opaque unit handles.
#[derive(Debug)]
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    units: Vec<WorkerStatus>,
    stopping: bool,
}

impl ProcessSupervisor {
    /// Create a supervisor with nothing launched.
    #[must_use]
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            units: Vec::new(),
            stopping: false,
        }
    }

    /// Launched units, in launch order.
    #[must_use]
    pub fn units(&self) -> &[WorkerStatus] {
        &self.units
    }

    /// Names of units believed alive.
    #[must_use]
    pub fn alive(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|unit| unit.alive)
            .map(|unit| unit.name.as_str())
            .collect()
    }

    /// Launch `specs` in order with a settling delay after each.
    ///
    /// A unit that fails to launch is reported and the rest are still
    /// attempted, except when the program itself does not exist: that is
    /// fatal and aborts the remaining launches.
    pub async fn launch_all(&mut self, specs: &[UnitSpec]) -> LaunchReport {
        let mut report = LaunchReport::default();

        for (index, spec) in specs.iter().enumerate() {
            match self.launch(spec) {
                Ok(pid) => {
                    info!(unit = %spec.name, pid, "launched");
                    report.launched.push(spec.name.clone());
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        unit = %spec.name,
                        fault = %e.kind(),
                        error = %e,
                        "aborting remaining launches"
                    );
                    report.aborted = specs[index + 1..]
                        .iter()
                        .map(|spec| spec.name.clone())
                        .collect();
                    if let Error::RuntimeMissing { program } = e {
                        report.runtime_missing = Some(program);
                    }
                    break;
                }
                Err(e) => {
                    warn!(unit = %spec.name, fault = %e.kind(), error = %e, "launch failed");
                    report.failed.push((spec.name.clone(), e.to_string()));
                }
            }

            if index + 1 < specs.len() {
                tokio::time::sleep(self.settings.launch_delay).await;
            }
        }

        report
    }

    fn launch(&mut self, spec: &UnitSpec) -> Result<Option<u32>> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null());
        match self.settings.output {
            WorkerOutput::Null => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            WorkerOutput::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }
        // Own process group: a terminal ctrl-c reaches only the supervisor,
        // which forwards it.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::RuntimeMissing {
                    program: spec.program.clone(),
                }
            } else {
                Error::Launch {
                    unit: spec.name.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id();
        self.units.push(WorkerStatus {
            name: spec.name.clone(),
            child,
            pid,
            alive: true,
            alerted: false,
        });
        Ok(pid)
    }

    /// Check every unit once.
    ///
    /// Returns one [`Error::UnexpectedExit`] per unit newly found dead
    /// outside a stop request. Each unit is alerted at most once.
    pub fn poll(&mut self) -> Vec<Error> {
        let mut alerts = Vec::new();
        for unit in self.units.iter_mut().filter(|unit| unit.alive) {
            match unit.child.try_wait() {
                Ok(Some(status)) => {
                    unit.alive = false;
                    if !self.stopping && !unit.alerted {
                        unit.alerted = true;
                        let alert = Error::UnexpectedExit {
                            unit: unit.name.clone(),
                            status: status.to_string(),
                        };
                        warn!(unit = %unit.name, fault = %alert.kind(), "{alert}");
                        alerts.push(alert);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(unit = %unit.name, error = %e, "liveness check failed");
                }
            }
        }
        alerts
    }

    /// Poll every period until `stop` is requested.
    ///
    /// Returns all alerts raised while monitoring.
    pub async fn monitor(&mut self, stop: &StopHandle) -> Vec<Error> {
        let mut alerts = Vec::new();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => break,
                _ = ticker.tick() => {
                    alerts.extend(self.poll());
                    if self.units.iter().all(|unit| !unit.alive) {
                        debug!("no units alive, waiting for interrupt");
                    }
                }
            }
        }
        alerts
    }

    /// Ask every live unit to terminate and wait up to the grace period.
    ///
    /// Units that do not exit in time are reported, not killed.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.stopping = true;
        let mut report = ShutdownReport::default();

        for unit in &mut self.units {
            if !unit.alive {
                report.already_exited.push(unit.name.clone());
                continue;
            }
            if let Ok(Some(_)) = unit.child.try_wait() {
                unit.alive = false;
                report.already_exited.push(unit.name.clone());
                continue;
            }
            if let Err(e) = request_terminate(unit) {
                warn!(unit = %unit.name, fault = %e.kind(), error = %e, "terminate request failed");
            }
        }

        let deadline = Instant::now() + self.settings.shutdown_grace;
        for unit in self.units.iter_mut().filter(|unit| unit.alive) {
            match tokio::time::timeout_at(deadline, unit.child.wait()).await {
                Ok(Ok(status)) => {
                    unit.alive = false;
                    info!(unit = %unit.name, status = %status.to_string(), "stopped");
                    report.stopped.push(unit.name.clone());
                }
                Ok(Err(e)) => {
                    warn!(unit = %unit.name, error = %e, "wait failed");
                    report.still_running.push(unit.name.clone());
                }
                Err(_) => {
                    warn!(unit = %unit.name, "still running after grace period");
                    report.still_running.push(unit.name.clone());
                }
            }
        }
        report
    }
}

/// Send SIGTERM to the unit's process group.
#[cfg(unix)]
fn request_terminate(unit: &WorkerStatus) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal_error = |message: String| Error::Signal {
        unit: unit.name.clone(),
        message,
    };
    let pid = unit
        .pid
        .ok_or_else(|| signal_error("no process id".to_string()))?;
    let pid = i32::try_from(pid).map_err(|e| signal_error(e.to_string()))?;

    match killpg(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(signal_error(errno.to_string())),
    }
}

#[cfg(not(unix))]
fn request_terminate(unit: &WorkerStatus) -> Result<()> {
    Err(Error::Signal {
        unit: unit.name.clone(),
        message: "graceful termination is only supported on unix".to_string(),
    })
}

/// The units a mission launches: one worker per enabled source, then the
/// configured extra units.
///
/// Workers are launched as `exe [flags] worker <source>`, with the verbosity
/// flag and config path of the supervisor.
#[must_use]
pub fn units_from_config(
    config: &Config,
    exe: &Path,
    verbosity: Verbosity,
    config_path: Option<&Path>,
) -> Vec<UnitSpec> {
    let program = exe.to_string_lossy().into_owned();
    let mut units: Vec<UnitSpec> = config
        .enabled_sources()
        .into_iter()
        .map(|kind| {
            let mut args = Vec::new();
            if let Some(flag) = verbosity.as_flag() {
                args.push(flag.to_string());
            }
            if let Some(path) = config_path {
                args.push("--config".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
            args.push("worker".to_string());
            args.push(kind.as_str().to_string());
            UnitSpec::new(kind.unit_name(), program.clone()).with_args(args)
        })
        .collect();

    units.extend(
        config
            .supervisor
            .extra_units
            .iter()
            .map(|unit| UnitSpec::new(&unit.name, &unit.program).with_args(unit.args.clone())),
    );
    units
}

/// Launch every unit, watch them until interrupted, then shut down.
///
/// # Errors
///
/// Returns [`Error::RuntimeMissing`] if the launch program is missing, or
/// [`Error::NothingLaunched`] if no unit started.
pub async fn run_mission(
    config: &Config,
    verbosity: Verbosity,
    config_path: Option<&Path>,
) -> Result<MissionReport> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::internal(format!("cannot locate own executable: {e}")))?;
    let units = units_from_config(config, &exe, verbosity, config_path);

    let stop = StopHandle::new();
    install_interrupt_handler(stop.clone());

    let started_at = Utc::now();
    let mut supervisor = ProcessSupervisor::new(SupervisorSettings::from(config));
    info!(units = units.len(), "starting mission");
    let launch = supervisor.launch_all(&units).await;

    if let Some(program) = launch.runtime_missing.clone() {
        supervisor.shutdown().await;
        return Err(Error::RuntimeMissing { program });
    }
    if launch.launched.is_empty() {
        error!("no units launched");
        return Err(Error::NothingLaunched);
    }

    let alerts = if stop.should_stop() {
        info!("interrupted during launch, stopping units");
        Vec::new()
    } else {
        let alerts = supervisor.monitor(&stop).await;
        info!("interrupt received, stopping units");
        alerts
    };
    let shutdown = supervisor.shutdown().await;

    let ended_at = Utc::now();
    info!(
        started_at = %started_at.to_rfc3339(),
        ended_at = %ended_at.to_rfc3339(),
        runtime_secs = (ended_at - started_at).num_seconds(),
        stopped = shutdown.stopped.len(),
        still_running = shutdown.still_running.len(),
        "mission ended"
    );

    Ok(MissionReport {
        started_at,
        ended_at,
        launch,
        unexpected_exits: alerts
            .into_iter()
            .filter_map(|alert| match alert {
                Error::UnexpectedExit { unit, .. } => Some(unit),
                _ => None,
            })
            .collect(),
        shutdown,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    use super::*;
    use crate::config::UnitConfig;
    use crate::reading::SourceKind;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: Duration::from_millis(20),
            launch_delay: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            output: WorkerOutput::Null,
        }
    }

    fn sleeper(name: &str) -> UnitSpec {
        UnitSpec::new(name, "sleep").with_args(["30"])
    }

    fn pid_of(supervisor: &ProcessSupervisor, name: &str) -> Pid {
        let pid = supervisor
            .units()
            .iter()
            .find(|unit| unit.name() == name)
            .and_then(WorkerStatus::pid)
            .unwrap();
        Pid::from_raw(i32::try_from(pid).unwrap())
    }

    async fn poll_until_alert(supervisor: &mut ProcessSupervisor) -> Vec<Error> {
        for _ in 0..100 {
            let alerts = supervisor.poll();
            if !alerts.is_empty() {
                return alerts;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_launch_all_and_graceful_shutdown() {
        let mut supervisor = ProcessSupervisor::new(settings());
        let report = supervisor
            .launch_all(&[sleeper("DHT"), sleeper("MPU"), sleeper("Sound")])
            .await;

        assert_eq!(report.launched, vec!["DHT", "MPU", "Sound"]);
        assert!(report.failed.is_empty());
        assert_eq!(supervisor.alive(), vec!["DHT", "MPU", "Sound"]);

        let shutdown = supervisor.shutdown().await;
        assert_eq!(shutdown.stopped, vec!["DHT", "MPU", "Sound"]);
        assert!(shutdown.still_running.is_empty());
        assert!(supervisor.alive().is_empty());
    }

    #[tokio::test]
    async fn test_killed_unit_raises_unexpected_exit_once() {
        let mut supervisor = ProcessSupervisor::new(settings());
        supervisor
            .launch_all(&[sleeper("DHT"), sleeper("MPU"), sleeper("Sound")])
            .await;
        assert!(supervisor.poll().is_empty());

        kill(pid_of(&supervisor, "Sound"), Signal::SIGKILL).unwrap();
        let alerts = poll_until_alert(&mut supervisor).await;

        assert_eq!(alerts.len(), 1);
        match &alerts[0] {
            Error::UnexpectedExit { unit, .. } => assert_eq!(unit, "Sound"),
            other => panic!("unexpected alert {other:?}"),
        }
        assert_eq!(supervisor.alive(), vec!["DHT", "MPU"]);
        assert!(supervisor.poll().is_empty());

        let shutdown = supervisor.shutdown().await;
        assert_eq!(shutdown.stopped, vec!["DHT", "MPU"]);
        assert_eq!(shutdown.already_exited, vec!["Sound"]);
    }

    #[tokio::test]
    async fn test_monitor_reports_until_stopped() {
        let mut supervisor = ProcessSupervisor::new(settings());
        supervisor.launch_all(&[sleeper("DHT"), sleeper("Sound")]).await;
        kill(pid_of(&supervisor, "Sound"), Signal::SIGKILL).unwrap();

        let stop = StopHandle::new();
        let stopper = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                stop.stop();
            })
        };
        let alerts = supervisor.monitor(&stop).await;
        stopper.await.unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(supervisor.alive(), vec!["DHT"]);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_runtime_aborts_remaining_launches() {
        let mut supervisor = ProcessSupervisor::new(settings());
        let report = supervisor
            .launch_all(&[
                UnitSpec::new("DHT", "/nonexistent/stratolog-runtime"),
                sleeper("MPU"),
            ])
            .await;

        assert!(report.launched.is_empty());
        assert_eq!(
            report.runtime_missing.as_deref(),
            Some("/nonexistent/stratolog-runtime")
        );
        assert_eq!(report.aborted, vec!["MPU"]);
        assert!(supervisor.units().is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure_does_not_stop_other_launches() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = ProcessSupervisor::new(settings());
        let not_executable = dir.path().to_string_lossy().into_owned();

        let report = supervisor
            .launch_all(&[UnitSpec::new("Broken", not_executable), sleeper("MPU")])
            .await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Broken");
        assert_eq!(report.launched, vec!["MPU"]);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_never_force_kills() {
        let mut supervisor = ProcessSupervisor::new(SupervisorSettings {
            shutdown_grace: Duration::from_millis(200),
            ..settings()
        });
        supervisor
            .launch_all(&[
                UnitSpec::new("Stubborn", "sh").with_args(["-c", "trap '' TERM; sleep 30"])
            ])
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let shutdown = supervisor.shutdown().await;

        assert_eq!(shutdown.still_running, vec!["Stubborn"]);
        killpg(pid_of(&supervisor, "Stubborn"), Signal::SIGKILL).unwrap();
    }

    #[test]
    fn test_units_from_config() {
        let mut config = Config::default();
        config.sensors.motion.enabled = false;
        config.supervisor.extra_units.push(UnitConfig {
            name: "Dashboard".to_string(),
            program: "python3".to_string(),
            args: vec!["app.py".to_string()],
        });
        let exe = PathBuf::from("/usr/local/bin/stratolog");
        let config_path = PathBuf::from("/etc/stratolog.toml");

        let units = units_from_config(&config, &exe, Verbosity::Quiet, Some(&config_path));

        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["DHT Logger", "Sound Logger", "Dashboard"]);
        assert_eq!(units[0].program, "/usr/local/bin/stratolog");
        assert_eq!(
            units[0].args,
            vec![
                "-q",
                "--config",
                "/etc/stratolog.toml",
                "worker",
                SourceKind::HumidityTemperature.as_str()
            ]
        );
        assert_eq!(units[2].program, "python3");
    }

    #[test]
    fn test_supervisor_settings_from_config() {
        let settings = SupervisorSettings::from(&Config::default());
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.launch_delay, Duration::from_millis(500));
        assert_eq!(settings.output, WorkerOutput::Null);
    }
}
