//! The opaque "decode one unit" capability consumed by the stream decoder.
//!
//! The real codec and the test fake both sit behind this trait; the pipeline
//! invokes it and never looks inside. Opening the codec is construction,
//! closing it is `Drop`.

/// Stream metadata reported by the capability after a successful decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// One unit decoded; `samples_per_channel` and `consumed` are valid.
    Decoded,
    /// The input window does not hold a complete unit yet.
    NeedMoreInput,
    /// The output buffer is too small; `needed_output` says how big it must be.
    InsufficientOutput,
    /// The unit at the head of the window is corrupt.
    Failed,
}

/// Result of one `process` call.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOutcome {
    pub status: DecodeStatus,
    /// Input bytes consumed. May be nonzero even without decoded output
    /// (skipped padding, partial sync).
    pub consumed: usize,
    /// Decoded samples per channel written to the output buffer.
    pub samples_per_channel: usize,
    /// Required output size in samples, set with `InsufficientOutput`.
    pub needed_output: usize,
}

impl DecodeOutcome {
    pub fn need_more_input() -> Self {
        Self {
            status: DecodeStatus::NeedMoreInput,
            consumed: 0,
            samples_per_channel: 0,
            needed_output: 0,
        }
    }
}

/// A stateful decoder for one compressed-audio format.
pub trait DecodeCapability: Send {
    /// Try to decode one unit from the head of `input` into `output`
    /// (interleaved i16). Never blocks.
    fn process(&mut self, input: &[u8], output: &mut [i16]) -> DecodeOutcome;

    /// Metadata of the stream being decoded, once known.
    fn info(&self) -> Option<StreamInfo>;

    /// Discard partially-decoded internal state, e.g. after a forced resync.
    fn reset(&mut self);
}
