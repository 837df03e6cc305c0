//! The sampling loop shared by every instrument.
//!
//! A [`SensorWorker`] owns one [`Sensor`], the [`AppendLog`] of its source and
//! a handle to the shared [`LiveStateStore`]. It moves through
//! `Idle → Initializing → Sampling ⇄ Degraded → Terminating → Stopped`.
//!
//! For every valid reading the record is appended to the log first and only
//! then merged into the live state, so the live state is never ahead of the
//! durable log. Null and rejected readings touch neither.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reading::{Reading, SourceKind};
use crate::sensor::{self, Acquisition, Sensor, SensorFault};
use crate::shutdown::StopHandle;
use crate::storage::{AppendLog, LiveStateStore};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not started.
    Idle,
    /// Creating the log.
    Initializing,
    /// Acquiring and recording readings.
    Sampling,
    /// Acquisition keeps failing; still retrying every period.
    Degraded,
    /// Stop requested, finishing up.
    Terminating,
    /// Done.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::Sampling => write!(f, "sampling"),
            Self::Degraded => write!(f, "degraded"),
            Self::Terminating => write!(f, "terminating"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Counters kept over a worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Records appended to the log.
    pub records_written: u64,
    /// Readings outside their envelope.
    pub rejected: u64,
    /// Cycles where the instrument had no reading.
    pub null_readings: u64,
    /// Failed or timed-out acquisitions.
    pub transient_faults: u64,
    /// Appends that failed.
    pub storage_faults: u64,
    /// Appends whose backup step failed.
    pub backup_faults: u64,
    /// Live-state merges that failed.
    pub live_state_faults: u64,
}

/// What one sampling cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A record was appended.
    Recorded,
    /// The instrument had no reading.
    Skipped,
    /// The reading was outside its envelope.
    Rejected,
    /// The instrument could not be read.
    SensorFault,
    /// The record could not be appended.
    StorageFault,
}

/// Timing and naming of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Name used in log events.
    pub name: String,
    /// Sampling period.
    pub interval: Duration,
    /// Consecutive failed cycles before entering [`WorkerState::Degraded`].
    pub degraded_threshold: u32,
}

/// Summary logged when a worker stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker name.
    pub name: String,
    /// Source sampled.
    pub source: SourceKind,
    /// When the worker started.
    pub started_at: DateTime<Utc>,
    /// When the worker stopped.
    pub ended_at: DateTime<Utc>,
    /// Final counters.
    pub stats: WorkerStats,
}

impl WorkerReport {
    /// Wall-clock time between start and stop.
    #[must_use]
    pub fn runtime(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    fn log(&self) {
        info!(
            worker = %self.name,
            source = %self.source,
            started_at = %self.started_at.to_rfc3339(),
            ended_at = %self.ended_at.to_rfc3339(),
            runtime_secs = self.runtime().num_seconds(),
            records = self.stats.records_written,
            rejected = self.stats.rejected,
            null_readings = self.stats.null_readings,
            transient_faults = self.stats.transient_faults,
            storage_faults = self.stats.storage_faults,
            "worker stopped"
        );
    }
}

/// One instrument's sampling loop.
#[derive(Debug)]
pub struct SensorWorker {
    sensor: Box<dyn Sensor>,
    log: AppendLog,
    live: LiveStateStore,
    settings: WorkerSettings,
    state: WorkerState,
    stats: WorkerStats,
    consecutive_failures: u32,
}

impl SensorWorker {
    /// Create an idle worker.
    #[must_use]
    pub fn new(
        sensor: Box<dyn Sensor>,
        log: AppendLog,
        live: LiveStateStore,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            sensor,
            log,
            live,
            settings,
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
            consecutive_failures: 0,
        }
    }

    /// Build the worker for `kind` from configuration.
    #[must_use]
    pub fn from_config(config: &Config, kind: SourceKind) -> Self {
        let sensor_config = config.sensor(kind);
        let mut log = AppendLog::for_source(kind, config.log_path(kind))
            .with_sync(sensor_config.fsync);
        if let Some(backup) = config.backup_path(kind) {
            log = log.with_backup(backup);
        }

        Self::new(
            sensor::build(kind, sensor_config),
            log,
            LiveStateStore::new(config.live_state_path()),
            WorkerSettings {
                name: kind.unit_name().to_string(),
                interval: sensor_config.interval(),
                degraded_threshold: sensor_config.degraded_threshold,
            },
        )
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// The source this worker samples.
    #[must_use]
    pub fn source(&self) -> SourceKind {
        self.sensor.kind()
    }

    /// Create the log if needed and enter [`WorkerState::Sampling`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalInit`] if the log cannot be created; the worker
    /// is then [`WorkerState::Stopped`].
    pub fn initialize(&mut self) -> Result<()> {
        self.state = WorkerState::Initializing;
        match self.log.ensure() {
            Ok(outcome) => {
                info!(
                    worker = %self.settings.name,
                    path = %self.log.path().display(),
                    ?outcome,
                    "log ready"
                );
                self.state = WorkerState::Sampling;
                Ok(())
            }
            Err(e) => {
                self.state = WorkerState::Stopped;
                let err = Error::fatal_init(self.settings.name.clone(), e);
                error!(
                    worker = %self.settings.name,
                    source = %self.source(),
                    fault = %err.kind(),
                    error = %err,
                    "cannot initialize"
                );
                Err(err)
            }
        }
    }

    /// Acquire once and record the result.
    pub async fn tick(&mut self) -> TickOutcome {
        let acquisition = self.sensor.acquire().await;
        self.handle_acquisition(acquisition, Utc::now())
    }

    /// Record the result of one acquisition taken at `timestamp`.
    pub fn handle_acquisition(
        &mut self,
        acquisition: std::result::Result<Acquisition, SensorFault>,
        timestamp: DateTime<Utc>,
    ) -> TickOutcome {
        let source = self.source();

        let values = match acquisition {
            Ok(Some(values)) => values,
            Ok(None) => {
                self.stats.null_readings += 1;
                trace!(worker = %self.settings.name, "no reading this cycle");
                self.note_failure();
                return TickOutcome::Skipped;
            }
            Err(fault) => return self.sensor_fault(fault),
        };

        let reading = match Reading::new(source, timestamp, values.clone()) {
            Ok(reading) => reading,
            Err(e) => return self.sensor_fault(SensorFault::Malformed(e.to_string())),
        };

        // Envelopes apply to what the instrument reported, not the rounded record.
        if let Err(reject) = self.sensor.validate(&values) {
            self.stats.rejected += 1;
            let err = Error::from(reject);
            debug!(
                worker = %self.settings.name,
                source = %source,
                fault = %err.kind(),
                error = %err,
                "reading rejected"
            );
            return TickOutcome::Rejected;
        }

        match self.log.append_reading(&reading) {
            Ok(report) => {
                self.stats.records_written += 1;
                if !report.backed_up && self.log.backup_path().is_some() {
                    self.stats.backup_faults += 1;
                }
            }
            Err(e) => {
                self.stats.storage_faults += 1;
                warn!(
                    worker = %self.settings.name,
                    source = %source,
                    fault = %e.kind(),
                    error = %e,
                    "append failed"
                );
                return TickOutcome::StorageFault;
            }
        }
        self.note_success();

        if let Err(e) = self.live.update_reading(&reading) {
            self.stats.live_state_faults += 1;
            warn!(
                worker = %self.settings.name,
                source = %source,
                fault = %e.kind(),
                error = %e,
                "live state update failed"
            );
        }
        TickOutcome::Recorded
    }

    fn sensor_fault(&mut self, fault: SensorFault) -> TickOutcome {
        self.stats.transient_faults += 1;
        let err = Error::from(fault);
        debug!(
            worker = %self.settings.name,
            source = %self.source(),
            fault = %err.kind(),
            error = %err,
            "acquisition failed"
        );
        self.note_failure();
        TickOutcome::SensorFault
    }

    fn note_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.state == WorkerState::Sampling
            && self.consecutive_failures >= self.settings.degraded_threshold
        {
            self.state = WorkerState::Degraded;
            warn!(
                worker = %self.settings.name,
                failures = self.consecutive_failures,
                "worker degraded"
            );
        }
    }

    fn note_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == WorkerState::Degraded {
            self.state = WorkerState::Sampling;
            info!(worker = %self.settings.name, "worker recovered");
        }
    }

    /// Initialize, then sample every period until `stop` is requested.
    ///
    /// A stop request cancels a pending acquisition but never an append in
    /// progress, so the log always ends on a complete record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalInit`] if initialization fails. Faults during
    /// sampling are counted and logged, never returned.
    pub async fn run(mut self, stop: StopHandle) -> Result<WorkerReport> {
        let started_at = Utc::now();
        self.initialize()?;
        info!(
            worker = %self.settings.name,
            interval_ms = u64::try_from(self.settings.interval.as_millis()).unwrap_or(u64::MAX),
            "sampling started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => break,
                _ = ticker.tick() => {}
            }

            let acquisition = tokio::select! {
                biased;
                () = stop.stopped() => break,
                acquisition = self.sensor.acquire() => acquisition,
            };
            self.handle_acquisition(acquisition, Utc::now());
        }

        self.state = WorkerState::Terminating;
        debug!(worker = %self.settings.name, "terminating");
        self.state = WorkerState::Stopped;

        let report = WorkerReport {
            name: self.settings.name.clone(),
            source: self.source(),
            started_at,
            ended_at: Utc::now(),
            stats: self.stats,
        };
        report.log();
        Ok(report)
    }
}

/// Run the worker for `kind` until `stop` is requested.
///
/// # Errors
///
/// See [`SensorWorker::run`].
pub async fn run_worker(
    config: &Config,
    kind: SourceKind,
    stop: StopHandle,
) -> Result<WorkerReport> {
    SensorWorker::from_config(config, kind).run(stop).await
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;

    use chrono::TimeZone;

    use super::*;
    use crate::sensor::SimulatedSensor;

    #[derive(Debug)]
    struct ScriptedSensor {
        kind: SourceKind,
        script: VecDeque<std::result::Result<Acquisition, SensorFault>>,
    }

    impl ScriptedSensor {
        fn new(
            kind: SourceKind,
            script: impl IntoIterator<Item = std::result::Result<Acquisition, SensorFault>>,
        ) -> Self {
            Self {
                kind,
                script: script.into_iter().collect(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Sensor for ScriptedSensor {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn acquire(&mut self) -> std::result::Result<Acquisition, SensorFault> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn settings(threshold: u32) -> WorkerSettings {
        WorkerSettings {
            name: "DHT Logger".to_string(),
            interval: Duration::from_millis(10),
            degraded_threshold: threshold,
        }
    }

    fn dht_worker(dir: &Path, sensor: Box<dyn Sensor>, threshold: u32) -> SensorWorker {
        let log = AppendLog::for_source(SourceKind::HumidityTemperature, dir.join("DHT11.txt"))
            .with_backup(dir.join("DHT11_backup.txt"));
        SensorWorker::new(
            sensor,
            log,
            LiveStateStore::new(dir.join("live.json")),
            settings(threshold),
        )
    }

    fn at(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, 12, 0, s).unwrap()
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_initialize_creates_log_and_enters_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.initialize().unwrap();

        assert_eq!(worker.state(), WorkerState::Sampling);
        assert_eq!(
            lines(&dir.path().join("DHT11.txt")),
            vec!["timestamp,temperature,humidity"]
        );
    }

    #[test]
    fn test_initialize_failure_is_fatal_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, "").unwrap();
        let mut worker = dht_worker(
            &blocker,
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );

        let err = worker.initialize().unwrap_err();

        assert!(matches!(err, Error::FatalInit { .. }));
        assert!(err.is_fatal());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_valid_reading_goes_to_log_then_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        worker.initialize().unwrap();

        let outcome = worker.handle_acquisition(Ok(Some(vec![21.04, 55.0])), at(1));

        assert_eq!(outcome, TickOutcome::Recorded);
        assert_eq!(
            lines(&dir.path().join("DHT11.txt"))[1],
            "2026-07-04 12:00:01,21.0,55.0"
        );
        let live = LiveStateStore::new(dir.path().join("live.json")).read();
        assert_eq!(live.field("temperature"), Some(21.0));
        assert_eq!(live.updated_at("humidity-temperature"), Some("2026-07-04 12:00:01"));
        assert_eq!(worker.stats().records_written, 1);
    }

    #[test]
    fn test_null_and_rejected_readings_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            10,
        );
        worker.initialize().unwrap();

        assert_eq!(worker.handle_acquisition(Ok(None), at(1)), TickOutcome::Skipped);
        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 90.1])), at(2)),
            TickOutcome::Rejected
        );
        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 19.9])), at(3)),
            TickOutcome::Rejected
        );

        assert_eq!(lines(&dir.path().join("DHT11.txt")).len(), 1);
        assert!(!dir.path().join("live.json").exists());
        let stats = worker.stats();
        assert_eq!(stats.null_readings, 1);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.records_written, 0);
    }

    #[test]
    fn test_humidity_just_outside_envelope_is_not_rounded_in() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            10,
        );
        worker.initialize().unwrap();

        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 90.04])), at(1)),
            TickOutcome::Rejected
        );
        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 19.96])), at(2)),
            TickOutcome::Rejected
        );

        assert_eq!(lines(&dir.path().join("DHT11.txt")).len(), 1);
        assert!(!dir.path().join("live.json").exists());
        assert_eq!(worker.stats().rejected, 2);
    }

    #[test]
    fn test_humidity_boundaries_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        worker.initialize().unwrap();

        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 20.0])), at(1)),
            TickOutcome::Recorded
        );
        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0, 90.0])), at(2)),
            TickOutcome::Recorded
        );
    }

    #[test]
    fn test_wrong_value_count_is_a_sensor_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        worker.initialize().unwrap();

        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![21.0])), at(1)),
            TickOutcome::SensorFault
        );
        assert_eq!(worker.stats().transient_faults, 1);
    }

    #[test]
    fn test_degraded_after_threshold_and_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        worker.initialize().unwrap();
        let timeout = || {
            Err(SensorFault::Timeout {
                after: Duration::from_secs(1),
            })
        };

        worker.handle_acquisition(timeout(), at(1));
        worker.handle_acquisition(Ok(None), at(2));
        assert_eq!(worker.state(), WorkerState::Sampling);
        worker.handle_acquisition(timeout(), at(3));
        assert_eq!(worker.state(), WorkerState::Degraded);
        worker.handle_acquisition(timeout(), at(4));
        assert_eq!(worker.state(), WorkerState::Degraded);

        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![20.0, 50.0])), at(5)),
            TickOutcome::Recorded
        );
        assert_eq!(worker.state(), WorkerState::Sampling);
        assert_eq!(worker.stats().transient_faults, 3);
    }

    #[test]
    fn test_storage_fault_keeps_sampling_and_skips_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = dht_worker(
            dir.path(),
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );
        worker.initialize().unwrap();
        let log_path = dir.path().join("DHT11.txt");
        std::fs::remove_file(&log_path).unwrap();
        std::fs::create_dir(&log_path).unwrap();

        let outcome = worker.handle_acquisition(Ok(Some(vec![20.0, 50.0])), at(1));

        assert_eq!(outcome, TickOutcome::StorageFault);
        assert_eq!(worker.state(), WorkerState::Sampling);
        assert_eq!(worker.stats().storage_faults, 1);
        assert!(!dir.path().join("live.json").exists());

        std::fs::remove_dir(&log_path).unwrap();
        assert_eq!(
            worker.handle_acquisition(Ok(Some(vec![20.0, 50.0])), at(2)),
            TickOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn test_tick_uses_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = ScriptedSensor::new(
            SourceKind::HumidityTemperature,
            [Ok(Some(vec![22.0, 60.0])), Err(SensorFault::Bus("nack".to_string()))],
        );
        let mut worker = dht_worker(dir.path(), Box::new(sensor), 3);
        worker.initialize().unwrap();

        assert_eq!(worker.tick().await, TickOutcome::Recorded);
        assert_eq!(worker.tick().await, TickOutcome::SensorFault);
        assert_eq!(worker.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_run_stops_on_request_with_complete_records() {
        crate::logging::init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::for_source(SourceKind::Motion, dir.path().join("MPU6050.txt"))
            .with_backup(dir.path().join("MPU6050_backup.txt"));
        let worker = SensorWorker::new(
            Box::new(SimulatedSensor::new(SourceKind::Motion, Duration::from_millis(5))),
            log,
            LiveStateStore::new(dir.path().join("live.json")),
            WorkerSettings {
                name: "MPU Logger".to_string(),
                interval: Duration::from_millis(5),
                degraded_threshold: 3,
            },
        );
        let stop = StopHandle::new();
        let task = tokio::spawn(worker.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        stop.stop();
        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(report.stats.records_written > 0);
        assert!(report.ended_at >= report.started_at);
        let content = std::fs::read_to_string(dir.path().join("MPU6050.txt")).unwrap();
        assert!(content.ends_with('\n'));
        let records: Vec<&str> = content.lines().skip(1).collect();
        assert_eq!(records.len() as u64, report.stats.records_written);
        for record in records {
            Reading::from_record(SourceKind::Motion, record).unwrap();
        }
        let live = LiveStateStore::new(dir.path().join("live.json")).read();
        assert!(live.field("accel_z").is_some());
    }

    #[tokio::test]
    async fn test_run_returns_fatal_init() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, "").unwrap();
        let worker = dht_worker(
            &blocker,
            Box::new(ScriptedSensor::new(SourceKind::HumidityTemperature, [])),
            3,
        );

        let err = worker.run(StopHandle::new()).await.unwrap_err();
        assert!(matches!(err, Error::FatalInit { .. }));
    }

    #[tokio::test]
    async fn test_run_worker_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.mission.data_dir = dir.path().to_path_buf();
        config.sensors.acoustic.interval_ms = 5;
        let stop = StopHandle::new();

        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { run_worker(&config, SourceKind::Acoustic, stop).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop();
        let report = task.await.unwrap().unwrap();

        assert_eq!(report.name, "Sound Logger");
        assert!(dir.path().join("sound.txt").exists());
        assert!(dir.path().join("live.json").exists());
    }
}
