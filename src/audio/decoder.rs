//! Incremental stream decoder: staging window management, container-tag
//! skipping, sync alignment, and error-streak resynchronization around an
//! opaque decode capability.

use anyhow::{bail, Result};

use super::capability::{DecodeCapability, DecodeStatus, StreamInfo};
use super::staging::StagingBuffer;

/// ID3v2 tag header: "ID3" + version(2) + flags(1) + syncsafe size(4).
const ID3_HEADER_LEN: usize = 10;

/// Tuning knobs for the decoder front-end.
#[derive(Debug, Clone)]
pub struct DecoderPolicy {
    /// Minimum staged bytes before attempting a decode.
    pub min_decode_bytes: usize,
    /// Consecutive failures before a forced resync.
    pub error_streak_threshold: u32,
    /// Cap on the blind skip used when no sync marker is found.
    pub resync_max_skip: usize,
    /// Hard ceiling on the output scratch buffer, in samples.
    pub max_scratch_samples: usize,
}

impl Default for DecoderPolicy {
    fn default() -> Self {
        Self {
            min_decode_bytes: 128,
            error_streak_threshold: 5,
            resync_max_skip: 1024,
            max_scratch_samples: 65_536,
        }
    }
}

/// One decoded run of samples, interleaved as produced by the capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedBlock {
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Incremental decoder front-end.
///
/// `feed` accepts arbitrarily-chunked compressed input under backpressure;
/// `pull` extracts complete decoded units. Corrupt or desynchronized input
/// degrades to skipped data, never to a dead session.
pub struct StreamDecoder {
    staging: StagingBuffer,
    capability: Box<dyn DecodeCapability>,
    sync_predicate: fn(u8, u8) -> bool,
    policy: DecoderPolicy,
    // Output scratch: grows on demand, never shrinks.
    scratch: Vec<i16>,
    error_streak: u32,
    sync_found: bool,
    tag_checked: bool,
    tag_skip_remaining: usize,
    last_info: Option<StreamInfo>,
}

impl StreamDecoder {
    pub fn new(
        capability: Box<dyn DecodeCapability>,
        sync_predicate: fn(u8, u8) -> bool,
        staging_capacity: usize,
        policy: DecoderPolicy,
    ) -> Self {
        Self {
            staging: StagingBuffer::new(staging_capacity),
            capability,
            sync_predicate,
            policy,
            scratch: vec![0i16; 4608],
            error_streak: 0,
            sync_found: false,
            tag_checked: false,
            tag_skip_remaining: 0,
            last_info: None,
        }
    }

    /// Accept as much of `data` as the staging window can hold. The return
    /// value counts accepted bytes; the rest is dropped (backpressure).
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let accepted = self.staging.append(data);
        self.skip_container_tag();
        if !self.sync_found && self.tag_skip_remaining == 0 {
            self.align_to_sync();
        }
        accepted
    }

    /// Bytes staged and available to the capability.
    pub fn available(&self) -> usize {
        self.staging.available()
    }

    /// Try to produce up to `max_samples` decoded samples per channel.
    ///
    /// `Ok(None)` covers every recoverable situation: not enough input, a
    /// failed unit, a resync skip. The only `Err` is the scratch buffer
    /// ceiling being exceeded, which is a configuration problem rather than
    /// a stream problem.
    pub fn pull(&mut self, max_samples: usize) -> Result<Option<DecodedBlock>> {
        if self.tag_skip_remaining > 0 || self.staging.available() < self.policy.min_decode_bytes {
            return Ok(None);
        }

        let mut outcome = self
            .capability
            .process(self.staging.window(), &mut self.scratch);

        if outcome.status == DecodeStatus::InsufficientOutput {
            let needed = outcome.needed_output;
            if needed > self.policy.max_scratch_samples {
                bail!(
                    "decoder needs {} output samples, above the configured ceiling {}",
                    needed,
                    self.policy.max_scratch_samples
                );
            }
            self.scratch.resize(needed, 0);
            outcome = self
                .capability
                .process(self.staging.window(), &mut self.scratch);
        }

        match outcome.status {
            DecodeStatus::Decoded => {
                self.staging.advance(outcome.consumed.min(self.staging.available()));
                self.error_streak = 0;
                if outcome.samples_per_channel == 0 {
                    return Ok(None);
                }
                // Keep the previous metadata when the capability momentarily
                // has none to report.
                if let Some(info) = self.capability.info() {
                    self.last_info = Some(info);
                }
                let info = self.last_info.unwrap_or(StreamInfo {
                    sample_rate: 44_100,
                    channels: 2,
                });
                let per_channel = outcome.samples_per_channel.min(max_samples);
                let total = per_channel * info.channels as usize;
                Ok(Some(DecodedBlock {
                    samples: self.scratch[..total].to_vec(),
                    sample_rate: info.sample_rate,
                    channels: info.channels,
                }))
            }
            DecodeStatus::NeedMoreInput => {
                self.staging.advance(outcome.consumed.min(self.staging.available()));
                // A full window that still cannot yield a unit will never
                // improve by waiting; treat it like a corrupt unit.
                if outcome.consumed == 0 && self.staging.available() >= self.staging.capacity() {
                    self.note_decode_failure();
                }
                Ok(None)
            }
            DecodeStatus::Failed => {
                self.note_decode_failure();
                Ok(None)
            }
            DecodeStatus::InsufficientOutput => {
                // Still insufficient after growing once: corrupt size report.
                self.note_decode_failure();
                Ok(None)
            }
        }
    }

    /// Clear all stream state but keep the allocated buffers. Used on
    /// format changes.
    pub fn reset(&mut self) {
        self.staging.clear();
        self.error_streak = 0;
        self.sync_found = false;
        self.tag_checked = false;
        self.tag_skip_remaining = 0;
        self.last_info = None;
        self.capability.reset();
    }

    fn note_decode_failure(&mut self) {
        self.error_streak += 1;
        if self.error_streak <= self.policy.error_streak_threshold {
            return;
        }
        // Too many failures in a row: hunt for the next unit boundary.
        match self.staging.find_sync(1, self.sync_predicate) {
            Some(offset) => {
                log::warn!(
                    "decode errors persist, resyncing to marker at +{} bytes",
                    offset
                );
                self.staging.advance(offset);
            }
            None => {
                // No marker in sight; skip a bounded chunk so even pure
                // noise cannot stall the stream.
                let skip = (self.staging.available() / 2)
                    .min(self.policy.resync_max_skip)
                    .max(1)
                    .min(self.staging.available());
                log::warn!("no sync marker in window, skipping {} bytes", skip);
                self.staging.advance(skip);
            }
        }
        self.error_streak = 0;
        self.capability.reset();
    }

    /// Recognize and swallow a leading ID3v2 container tag. Runs until the
    /// decision is made once per stream; the declared tag size may span many
    /// `feed` calls.
    fn skip_container_tag(&mut self) {
        if self.tag_skip_remaining > 0 {
            let drop = self.tag_skip_remaining.min(self.staging.available());
            self.staging.advance(drop);
            self.tag_skip_remaining -= drop;
            return;
        }
        if self.tag_checked {
            return;
        }
        let window = self.staging.window();
        if window.is_empty() {
            return;
        }
        if !window.starts_with(b"ID3") {
            // Also covers a short first chunk that already rules the tag out.
            if window.len() >= 3 || !b"ID3".starts_with(&window[..window.len().min(3)]) {
                self.tag_checked = true;
            }
            return;
        }
        if window.len() < ID3_HEADER_LEN {
            // Tag header split across feeds; decide next time.
            return;
        }
        let size = syncsafe_u32(&window[6..10]) as usize;
        let total = ID3_HEADER_LEN + size;
        log::debug!("skipping {}-byte ID3 tag", total);
        self.tag_checked = true;
        self.tag_skip_remaining = total;
        let drop = self.tag_skip_remaining.min(self.staging.available());
        self.staging.advance(drop);
        self.tag_skip_remaining -= drop;
    }

    /// One-time alignment to the first sync marker, dropping any leading
    /// garbage that precedes the first decodable unit.
    fn align_to_sync(&mut self) {
        if let Some(offset) = self.staging.find_sync(0, self.sync_predicate) {
            if offset > 0 {
                log::debug!("dropping {} bytes before first sync marker", offset);
                self.staging.advance(offset);
            }
            self.sync_found = true;
        }
    }
}

/// Four 7-bit big-endian digits, as used by the ID3v2 size field.
fn syncsafe_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | (b & 0x7F) as u32)
}
