//! AudioTools trait: encoding, probing, splitting and joining artifacts.
//!
//! Implementations live in chatgist-infra (`FfmpegAudioTools`).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatgist_types::error::AudioError;
use chatgist_types::llm::SpeechAudio;

pub trait AudioTools: Send + Sync {
    /// Encode raw speech into the artifact `{stem}.mp3` and return its path.
    fn encode_speech(
        &self,
        speech: &SpeechAudio,
        stem: &str,
    ) -> impl Future<Output = Result<PathBuf, AudioError>> + Send;

    /// Join `inputs` in order into `{stem}.mp3`.
    fn concat(
        &self,
        inputs: &[PathBuf],
        stem: &str,
    ) -> impl Future<Output = Result<PathBuf, AudioError>> + Send;

    /// Bitrate of the first audio stream in bits per second.
    fn bitrate(&self, path: &Path) -> impl Future<Output = Result<u64, AudioError>> + Send;

    /// Cut `path` into consecutive parts of `segment` length, named
    /// `{stem}_{NNN}.mp3`. The source is removed once the parts exist.
    fn split(
        &self,
        path: &Path,
        segment: Duration,
    ) -> impl Future<Output = Result<Vec<PathBuf>, AudioError>> + Send;

    fn file_size(&self, path: &Path) -> impl Future<Output = Result<u64, AudioError>> + Send {
        async move { Ok(tokio::fs::metadata(path).await?.len()) }
    }

    /// Delete an artifact. A file that is already gone is not an error.
    fn remove(&self, path: &Path) -> impl Future<Output = Result<(), AudioError>> + Send {
        async move {
            match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
    }
}
