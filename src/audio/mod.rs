pub mod backend;
pub mod convert;
pub mod file;
pub mod microphone;
pub mod pcm;
pub mod playback;
pub mod volume;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use convert::{FrameAssembler, StreamResampler};
pub use file::{AudioFile, FileBackend};
pub use microphone::MicrophoneBackend;
pub use pcm::{decode_audio_data, decode_base64, encode_pcm_blob, MediaBlob, PlayableBuffer};
pub use playback::{
    AudioOutput, ChunkPreparer, PlaybackTimeline, PreparedChunk, SharedTimeline, SpeakerOutput,
};
pub use volume::VolumeAnalyzer;
