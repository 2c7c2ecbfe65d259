//! audio - staging, incremental decode, normalization, and ALSA I/O
//!
//! The decode pipeline is bounded-memory: a fixed staging window feeds an
//! opaque decode capability, whose output is normalized to interleaved
//! stereo for the render sink.

mod alsa_device;
pub mod capability;
pub mod decoder;
pub mod mp3;
pub mod normalizer;
pub mod pcm_io;
pub mod staging;

pub use alsa_device::{AlsaCapture, AlsaPlayback};
pub use capability::{DecodeCapability, DecodeOutcome, DecodeStatus, StreamInfo};
pub use decoder::{DecodedBlock, DecoderPolicy, StreamDecoder};
pub use mp3::{is_mp3_sync, Mp3Capability};
pub use pcm_io::{CaptureSource, RenderSink};
pub use staging::StagingBuffer;
