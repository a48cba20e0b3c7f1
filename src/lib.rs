pub mod annotator;
pub mod config;
pub mod dataset;
pub mod error;
pub mod run_log;
pub mod thumbnail;
pub mod vlm_client;

pub use annotator::{annotate_batch, BatchRequest, BatchSummary, FailurePolicy, SceneFailure};
pub use config::{AnnotateConfig, ConfigLoader};
pub use dataset::SceneTable;
pub use error::AnnotateError;
pub use run_log::{append_run_entry, FileLog, NullLog, ProgressSink, RunLogEntry, RunRecorder};
pub use thumbnail::thumbnail_path;
pub use vlm_client::{validate_request, Predictor, VlmClient};
