//! Audio toolchain: WAV framing and the ffmpeg-backed [`AudioTools`](chatgist_core::audio::AudioTools).

pub mod ffmpeg;
pub mod wav;

pub use ffmpeg::FfmpegAudioTools;
pub use wav::pcm_to_wav;
