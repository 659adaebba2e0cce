//! notify bridge: file-creation events in one directory become `RawEvent`s
//! on a tokio channel.

use std::path::Path;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::debounce::has_extension;
use super::RawEvent;
use crate::error::{DicomwatchError, Result};

/// Register a non-recursive watch on `directory`. Creation events for files
/// ending in `.<extension>` are sent over `tx`; everything else is dropped here.
///
/// The watch lasts as long as the returned watcher; dropping it tears the
/// registration down.
pub fn spawn_watcher(
    directory: &Path,
    extension: &str,
    tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<RecommendedWatcher> {
    let extension = extension.to_string();
    let setup_error = |e: notify::Error| DicomwatchError::WatchSetup {
        directory: directory.to_path_buf(),
        message: e.to_string(),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                log::warn!("watch error: {}", e);
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_)) {
            return;
        }
        let at = Instant::now();
        for path in event.paths {
            if path.is_dir() || !has_extension(&path, &extension) {
                continue;
            }
            // Receiver gone means the pipeline is stopping.
            let _ = tx.send(RawEvent { path, at });
        }
    })
    .map_err(setup_error)?;

    watcher
        .watch(directory, RecursiveMode::NonRecursive)
        .map_err(setup_error)?;

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_created_files_are_filtered_by_extension() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = spawn_watcher(dir.path(), "dcm", tx).unwrap();

        std::fs::write(dir.path().join("x.txt"), b"text").unwrap();
        std::fs::create_dir(dir.path().join("sub.dcm")).unwrap();
        std::fs::write(dir.path().join("IMG.DCM"), b"dicom").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(event.path.file_name().unwrap(), "IMG.DCM");
    }

    #[tokio::test]
    async fn test_nested_files_are_not_watched() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = spawn_watcher(dir.path(), "dcm", tx).unwrap();

        std::fs::write(nested.join("deep.dcm"), b"dicom").unwrap();

        let result = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(result.is_err(), "nested file should not produce an event");
    }

    #[test]
    fn test_missing_directory_is_setup_error() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = spawn_watcher(&dir.path().join("absent"), "dcm", tx);
        assert!(matches!(result, Err(DicomwatchError::WatchSetup { .. })));
    }
}
