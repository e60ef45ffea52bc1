//! FfmpegAudioTools -- concrete [`AudioTools`] implementation over the
//! `ffmpeg` and `ffprobe` binaries.
//!
//! Speech PCM is framed as WAV, encoded to MP3 (`-q:a 0`), probed for its
//! bitrate, cut with the segment muxer and joined with the concat demuxer.
//! Every child process runs with piped output under the configured tool
//! timeout and is killed if the caller stops waiting.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chatgist_core::audio::AudioTools;
use chatgist_types::config::AudioConfig;
use chatgist_types::error::AudioError;
use chatgist_types::llm::SpeechAudio;

use super::wav::pcm_to_wav;

/// Assumed bitrate when ffprobe cannot tell (CBR 128 kbps).
pub const FALLBACK_BITRATE: u64 = 128_000;

/// Longest stderr tail kept in a [`AudioError::ToolFailed`].
const STDERR_TAIL: usize = 600;

#[derive(Debug, Clone)]
pub struct FfmpegAudioTools {
    dir: PathBuf,
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl FfmpegAudioTools {
    pub fn new(
        dir: impl Into<PathBuf>,
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.dir.clone(),
            config.ffmpeg.clone(),
            config.ffprobe.clone(),
            Duration::from_secs(config.tool_timeout_secs),
        )
    }

    /// Directory all artifacts are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), AudioError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn artifact(&self, stem: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{extension}"))
    }

    /// Run `program` with `args` and return its stdout.
    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<Vec<u8>, AudioError> {
        tracing::debug!(program, ?args, "Running audio tool");

        let child = tokio::process::Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AudioError::TimedOut {
                tool: program.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::ToolFailed {
                tool: program.to_string(),
                status: output.status.to_string(),
                stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(err) = self.remove(path).await {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove intermediate file");
        }
    }
}

impl AudioTools for FfmpegAudioTools {
    #[tracing::instrument(skip(self, speech), fields(bytes = speech.pcm.len()))]
    async fn encode_speech(&self, speech: &SpeechAudio, stem: &str) -> Result<PathBuf, AudioError> {
        if speech.pcm.is_empty() {
            return Err(AudioError::Invalid("speech contains no samples".into()));
        }
        self.ensure_dir().await?;

        let wav = self.artifact(stem, "wav");
        let mp3 = self.artifact(stem, "mp3");
        tokio::fs::write(&wav, pcm_to_wav(&speech.pcm, speech.sample_rate)).await?;

        let result = self.run(&self.ffmpeg, encode_args(&wav, &mp3)).await;
        self.remove_quietly(&wav).await;
        result?;

        tracing::debug!(path = %mp3.display(), "Speech encoded");
        Ok(mp3)
    }

    #[tracing::instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    async fn concat(&self, inputs: &[PathBuf], stem: &str) -> Result<PathBuf, AudioError> {
        if inputs.is_empty() {
            return Err(AudioError::Invalid("nothing to concatenate".into()));
        }
        self.ensure_dir().await?;

        let out = self.artifact(stem, "mp3");
        let list = self.artifact(&format!("{stem}_concat"), "txt");
        let mut absolute = Vec::with_capacity(inputs.len());
        for input in inputs {
            absolute.push(std::path::absolute(input)?);
        }
        tokio::fs::write(&list, concat_list(&absolute)).await?;

        let result = self.run(&self.ffmpeg, concat_args(&list, &out)).await;
        self.remove_quietly(&list).await;
        result?;

        Ok(out)
    }

    async fn bitrate(&self, path: &Path) -> Result<u64, AudioError> {
        match self.run(&self.ffprobe, probe_args(path)).await {
            Ok(stdout) => Ok(parse_bitrate(&String::from_utf8_lossy(&stdout))),
            Err(AudioError::Io(err)) => Err(AudioError::Io(err)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ffprobe failed, assuming 128 kbps");
                Ok(FALLBACK_BITRATE)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn split(&self, path: &Path, segment: Duration) -> Result<Vec<PathBuf>, AudioError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AudioError::Invalid(format!("no file name in {}", path.display())))?;
        let dir = path.parent().unwrap_or(&self.dir);

        self.run(&self.ffmpeg, split_args(path, &dir.join(format!("{stem}_%03d.mp3")), segment))
            .await?;

        let mut parts = Vec::new();
        loop {
            let part = dir.join(part_name(stem, parts.len()));
            if !tokio::fs::try_exists(&part).await? {
                break;
            }
            parts.push(part);
        }
        if parts.is_empty() {
            return Err(AudioError::NoOutput {
                tool: self.ffmpeg.clone(),
            });
        }

        self.remove_quietly(path).await;
        tracing::info!(parts = parts.len(), "Split complete");
        Ok(parts)
    }
}

// ---------------------------------------------------------------------------
// Command lines
// ---------------------------------------------------------------------------

fn encode_args(wav: &Path, mp3: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into()];
    args.push(wav.into());
    args.extend(["-q:a", "0", "-map", "a"].map(OsString::from));
    args.push(mp3.into());
    args
}

fn concat_args(list: &Path, out: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .map(OsString::from)
        .to_vec();
    args.push(list.into());
    args.extend(["-c", "copy"].map(OsString::from));
    args.push(out.into());
    args
}

fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "quiet",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=bit_rate",
        "-of",
        "csv=p=0",
    ]
    .map(OsString::from)
    .to_vec();
    args.push(path.into());
    args
}

fn split_args(input: &Path, pattern: &Path, segment: Duration) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    args.extend(["-f", "segment", "-segment_time"].map(OsString::from));
    args.push(format!("{:.3}", segment.as_secs_f64()).into());
    args.extend(["-c", "copy", "-map", "0", "-reset_timestamps", "1", "-y"].map(OsString::from));
    args.push(pattern.into());
    args
}

/// Concat demuxer input: one `file '<path>'` line per input, single quotes
/// escaped the way the demuxer expects.
fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

fn part_name(stem: &str, index: usize) -> String {
    format!("{stem}_{index:03}.mp3")
}

fn parse_bitrate(stdout: &str) -> u64 {
    match stdout.trim().parse::<u64>() {
        Ok(0) | Err(_) => FALLBACK_BITRATE,
        Ok(bitrate) => bitrate,
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
