//! Summarization orchestrator.

pub mod pipeline;
pub mod progress;

pub use pipeline::{GistPipeline, GistSettings, crop_gist};
pub use progress::{NoProgress, ProgressSink};
