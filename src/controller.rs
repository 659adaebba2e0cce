//! Directory selection front: owns the one pipeline and the log stream the
//! shell displays.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::extract::MetadataExtractor;
use crate::sink::UploadSink;
use crate::watch::{PipelineSettings, PipelineState, WatchPipeline};

/// Append-only stream of human-readable pipeline log lines
pub type LogStream = mpsc::UnboundedReceiver<String>;

pub struct PipelineController {
    pipeline: WatchPipeline,
}

impl PipelineController {
    /// Build the controller and the log stream every pipeline it runs writes to
    pub fn new(
        settings: PipelineSettings,
        extractor: Arc<dyn MetadataExtractor>,
        sink: Arc<dyn UploadSink>,
    ) -> (Self, LogStream) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let pipeline = WatchPipeline::new(settings, extractor, sink, log_tx);
        (Self { pipeline }, log_rx)
    }

    /// Switch to watching `directory`. A running watch is fully stopped first.
    ///
    /// If the new directory cannot be watched the error is returned and the
    /// controller is left idle.
    pub async fn select_directory(&mut self, directory: &Path) -> Result<()> {
        if self.pipeline.state() != PipelineState::Idle {
            self.pipeline.stop().await;
        }
        self.pipeline.start(directory)
    }

    pub async fn stop(&mut self) {
        self.pipeline.stop().await;
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn current_directory(&self) -> Option<&Path> {
        self.pipeline.directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DicomwatchError;
    use crate::watch::test_support::{assert_quiet, fast_settings, next_line, RecordingSink, ScriptedExtractor};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_select_directory_switches_watch() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (mut controller, mut logs) =
            PipelineController::new(fast_settings(), Arc::new(ScriptedExtractor), sink.clone());

        controller.select_directory(first.path()).await.unwrap();
        fs::write(first.path().join("one.dcm"), "One|1").unwrap();
        assert!(next_line(&mut logs).await.starts_with("New file: one.dcm"));

        controller.select_directory(second.path()).await.unwrap();
        assert_eq!(
            controller.current_directory(),
            Some(second.path().canonicalize().unwrap().as_path())
        );

        fs::write(first.path().join("stale.dcm"), "Stale|0").unwrap();
        fs::write(second.path().join("two.dcm"), "Two|2").unwrap();
        assert!(next_line(&mut logs).await.starts_with("New file: two.dcm"));
        assert_quiet(&mut logs).await;

        controller.stop().await;
        assert_eq!(controller.state(), PipelineState::Idle);
        assert_eq!(sink.names(), vec!["one.dcm", "two.dcm"]);
    }

    #[tokio::test]
    async fn test_failed_selection_leaves_controller_idle() {
        let good = TempDir::new().unwrap();
        let (mut controller, _logs) = PipelineController::new(
            fast_settings(),
            Arc::new(ScriptedExtractor),
            Arc::new(RecordingSink::default()),
        );

        controller.select_directory(good.path()).await.unwrap();
        let err = controller
            .select_directory(&good.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DicomwatchError::WatchSetup { .. }));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(controller.current_directory().is_none());

        controller.select_directory(good.path()).await.unwrap();
        assert_eq!(controller.state(), PipelineState::Watching);
        controller.stop().await;
    }
}
