pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod receiver;
pub mod sink;
pub mod store;
pub mod watch;

pub use config::Config;
pub use controller::{LogStream, PipelineController};
pub use error::{DicomwatchError, Result};
pub use extract::{DicomExtractor, MetadataExtractor, SubjectMetadata};
pub use sink::{UploadSink, UploadUnit};
pub use watch::{PipelineSettings, PipelineState, WatchPipeline};
