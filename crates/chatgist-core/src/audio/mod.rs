//! Speech artifacts for gists.

pub mod caption;
pub mod manager;
pub mod tools;

pub use manager::{AudioManager, AudioSettings};
pub use tools::AudioTools;
