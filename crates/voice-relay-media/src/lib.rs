//! Media handling: audio uploads, temporary audio files, and scoped audio streams.

pub mod audio;
pub mod stream;
pub mod temp_file;

pub use audio::{AudioRejection, AudioUpload};
pub use stream::{AudioStream, CleanupGuard};
pub use temp_file::TempAudioFile;
