//! Capture-source and render-sink seams.
//!
//! The pipeline reads and writes PCM only through these traits; the ALSA
//! implementations live in `alsa_device`, and tests substitute in-memory
//! fakes.

use anyhow::Result;

/// A source of captured mono PCM samples.
pub trait CaptureSource: Send {
    /// Fill `buf` with captured samples, blocking for at most one period.
    /// Returns the number of samples read.
    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// A sink consuming interleaved stereo PCM samples.
pub trait RenderSink: Send {
    /// Write interleaved samples, blocking until accepted or dropped.
    /// Returns the number of samples written.
    fn write_samples(&mut self, samples: &[i16]) -> Result<usize>;
}
