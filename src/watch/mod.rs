//! Directory watch pipeline: new files are debounced into stable batches,
//! their patient metadata is extracted, and each file is handed to the
//! upload sink.
//!
//! Three tasks run per active watch:
//! - event intake: `RawEvent`s from the notify thread into the debouncer
//! - ticker: periodic quiet-period check; ready batches go to the consumer
//! - consumer: extraction and upload, one file at a time, batches in FIFO order
//!
//! The debouncer's lock is only ever held for a push or a swap, so intake
//! never waits on an upload.

pub mod debounce;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Config;
use crate::error::{DicomwatchError, Result};
use crate::extract::{ExtractionError, MetadataExtractor, SubjectMetadata};
use crate::sink::{UploadSink, UploadUnit};

pub use debounce::{has_extension, Debouncer};
pub use watcher::spawn_watcher;

/// Sender half of the user-visible log stream
pub type LogSender = mpsc::UnboundedSender<String>;

/// A file appeared in the watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub at: Instant,
}

/// The directory a pipeline is bound to, resolved to an absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget(PathBuf);

impl WatchTarget {
    pub fn resolve(directory: &Path) -> Result<Self> {
        let setup_error = |message: String| DicomwatchError::WatchSetup {
            directory: directory.to_path_buf(),
            message,
        };
        let resolved = directory
            .canonicalize()
            .map_err(|e| setup_error(e.to_string()))?;
        if !resolved.is_dir() {
            return Err(setup_error("not a directory".to_string()));
        }
        Ok(Self(resolved))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Accepted extension without the dot
    pub extension: String,
    pub quiet_period: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extension: "dcm".to_string(),
            quiet_period: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extension: config.extension(),
            quiet_period: config.debounce(),
            poll_interval: config.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Watching,
    Stopping,
}

/// Everything that lives for exactly one `start`..`stop` span
struct ActiveWatch {
    target: WatchTarget,
    // Dropping the watcher removes the OS registration.
    watcher: RecommendedWatcher,
    debouncer: Arc<Mutex<Debouncer>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct WatchPipeline {
    settings: PipelineSettings,
    extractor: Arc<dyn MetadataExtractor>,
    sink: Arc<dyn UploadSink>,
    log_tx: LogSender,
    state: PipelineState,
    active: Option<ActiveWatch>,
}

impl WatchPipeline {
    pub fn new(
        settings: PipelineSettings,
        extractor: Arc<dyn MetadataExtractor>,
        sink: Arc<dyn UploadSink>,
        log_tx: LogSender,
    ) -> Self {
        Self {
            settings,
            extractor,
            sink,
            log_tx,
            state: PipelineState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Directory currently watched, if any
    pub fn directory(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.target.path())
    }

    /// Begin watching `directory`. Must be called from within a tokio runtime.
    ///
    /// Fails with `AlreadyWatching` unless the pipeline is idle, with
    /// `InvalidInput` if a configured duration is zero, and with `WatchSetup`
    /// if the directory cannot be watched; either way the pipeline's state is
    /// unchanged.
    pub fn start(&mut self, directory: &Path) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(DicomwatchError::AlreadyWatching(active.target.path().to_path_buf()));
        }
        if self.settings.quiet_period.is_zero() || self.settings.poll_interval.is_zero() {
            return Err(DicomwatchError::InvalidInput(format!(
                "quiet period ({:?}) and poll interval ({:?}) must be greater than zero",
                self.settings.quiet_period, self.settings.poll_interval
            )));
        }
        let target = WatchTarget::resolve(directory)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = spawn_watcher(target.path(), &self.settings.extension, event_tx)?;

        let debouncer = Arc::new(Mutex::new(Debouncer::new(
            self.settings.quiet_period,
            self.settings.extension.clone(),
        )));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        // Poll at least once per quiet period.
        let poll_interval = self.settings.poll_interval.min(self.settings.quiet_period);

        let tasks = vec![
            tokio::spawn(run_intake(event_rx, debouncer.clone(), shutdown_rx.clone())),
            tokio::spawn(run_ticker(
                debouncer.clone(),
                poll_interval,
                batch_tx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_consumer(
                batch_rx,
                self.extractor.clone(),
                self.sink.clone(),
                self.log_tx.clone(),
                shutdown_rx,
            )),
        ];

        log::info!(
            "Watching {} for *.{} (quiet period {:?})",
            target.path().display(),
            self.settings.extension,
            self.settings.quiet_period
        );
        self.active = Some(ActiveWatch {
            target,
            watcher,
            debouncer,
            shutdown,
            tasks,
        });
        self.state = PipelineState::Watching;
        Ok(())
    }

    /// Stop watching and wait for every background task to finish.
    ///
    /// A batch already being uploaded runs to completion; pending paths that
    /// have not been flushed yet are discarded. No-op when idle.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.state = PipelineState::Stopping;

        let ActiveWatch {
            target,
            watcher,
            debouncer,
            shutdown,
            tasks,
        } = active;

        drop(watcher);
        let _ = shutdown.send(true);
        for handle in tasks {
            if let Err(e) = handle.await {
                log::error!("watch task for {} failed: {}", target.path().display(), e);
            }
        }

        let discarded = lock(&debouncer).discard();
        if discarded > 0 {
            log::warn!(
                "Stopped watching {}; {} pending file(s) discarded",
                target.path().display(),
                discarded
            );
        } else {
            log::info!("Stopped watching {}", target.path().display());
        }
        self.state = PipelineState::Idle;
    }
}

fn lock(debouncer: &Mutex<Debouncer>) -> MutexGuard<'_, Debouncer> {
    debouncer.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_intake(
    mut events: mpsc::UnboundedReceiver<RawEvent>,
    debouncer: Arc<Mutex<Debouncer>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => {
                    log::debug!("arrival: {}", event.path.display());
                    lock(&debouncer).push(event);
                }
                None => break,
            },
        }
    }
}

async fn run_ticker(
    debouncer: Arc<Mutex<Debouncer>>,
    poll_interval: Duration,
    batches: mpsc::UnboundedSender<Vec<PathBuf>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let ready = lock(&debouncer).take_ready(Instant::now());
                if let Some(batch) = ready {
                    log::debug!("flushing batch of {} file(s)", batch.len());
                    if batches.send(batch).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn run_consumer(
    mut batches: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    extractor: Arc<dyn MetadataExtractor>,
    sink: Arc<dyn UploadSink>,
    log_tx: LogSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            batch = batches.recv() => match batch {
                Some(batch) => {
                    for path in batch {
                        process_file(&path, &extractor, sink.as_ref(), &log_tx).await;
                    }
                }
                None => break,
            },
        }
    }

    let mut dropped = 0;
    while let Ok(batch) = batches.try_recv() {
        dropped += batch.len();
    }
    if dropped > 0 {
        log::warn!("{} flushed file(s) not processed before stop", dropped);
    }
}

/// Log line for a file whose metadata was read
pub fn describe_file(basename: &str, metadata: &SubjectMetadata) -> String {
    format!(
        "New file: {}, Name: {}, ID: {}, Birth Date: {}, Sex: {}",
        basename, metadata.name, metadata.id, metadata.birth_date, metadata.sex
    )
}

fn emit(log_tx: &LogSender, level: log::Level, line: String) {
    log::log!(level, "{}", line);
    // Nobody listening is fine; the line is already in the diagnostic log.
    let _ = log_tx.send(line);
}

/// Extract, log, upload. Every outcome produces exactly one success line,
/// optionally followed by one failure line, or a single failure line.
async fn process_file(
    path: &Path,
    extractor: &Arc<dyn MetadataExtractor>,
    sink: &dyn UploadSink,
    log_tx: &LogSender,
) {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let task_extractor = extractor.clone();
    let task_path = path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || task_extractor.extract(&task_path))
        .await
        .unwrap_or_else(|e| {
            Err(ExtractionError::Unreadable {
                path: path.to_path_buf(),
                message: format!("extraction task failed: {}", e),
            })
        });

    let metadata = match extracted {
        Ok(metadata) => metadata,
        Err(e) => {
            emit(log_tx, log::Level::Warn, format!("Failed to read {}: {}", basename, e));
            return;
        }
    };

    emit(log_tx, log::Level::Info, describe_file(&basename, &metadata));

    let unit = match UploadUnit::new(path, metadata) {
        Ok(unit) => unit,
        Err(e) => {
            emit(log_tx, log::Level::Warn, format!("Upload failed: {}: {}", basename, e));
            return;
        }
    };

    let start = std::time::Instant::now();
    match sink.send(&unit).await {
        Ok(ack) => log::info!(
            "Uploaded {} via {} to {} in {:?}",
            basename,
            sink.name(),
            ack.location,
            start.elapsed()
        ),
        Err(e) => emit(log_tx, log::Level::Warn, format!("Upload failed: {}: {}", basename, e)),
    }
}
