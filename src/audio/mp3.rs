//! MP3 decode capability backed by `rmp3` (minimp3).

use rmp3::{Frame, RawDecoder, MAX_SAMPLES_PER_FRAME};

use super::capability::{DecodeCapability, DecodeOutcome, DecodeStatus, StreamInfo};

/// Incremental MP3 decoder. One `process` call decodes at most one MP3
/// frame from the head of the input window.
pub struct Mp3Capability {
    decoder: RawDecoder,
    // rmp3 wants a full frame's worth of output; decode lands here first,
    // then moves to the caller's buffer once it is known to fit.
    frame_buf: Box<[i16; MAX_SAMPLES_PER_FRAME]>,
    info: Option<StreamInfo>,
}

impl Mp3Capability {
    pub fn new() -> Self {
        Self {
            decoder: RawDecoder::new(),
            frame_buf: Box::new([0i16; MAX_SAMPLES_PER_FRAME]),
            info: None,
        }
    }
}

impl Default for Mp3Capability {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeCapability for Mp3Capability {
    fn process(&mut self, input: &[u8], output: &mut [i16]) -> DecodeOutcome {
        let Some((frame, consumed)) = self.decoder.next(input, &mut self.frame_buf) else {
            // No decodable frame within the window yet.
            return DecodeOutcome::need_more_input();
        };

        match frame {
            Frame::Audio(audio) => {
                let channels = audio.channels();
                let samples_per_channel = audio.sample_count();
                let total = samples_per_channel * channels as usize;
                if output.len() < total {
                    // Nothing consumed; the caller regrows and retries.
                    return DecodeOutcome {
                        status: DecodeStatus::InsufficientOutput,
                        consumed: 0,
                        samples_per_channel: 0,
                        needed_output: total,
                    };
                }
                output[..total].copy_from_slice(&audio.samples()[..total]);
                self.info = Some(StreamInfo {
                    sample_rate: audio.sample_rate(),
                    channels,
                });
                DecodeOutcome {
                    status: DecodeStatus::Decoded,
                    consumed,
                    samples_per_channel,
                    needed_output: 0,
                }
            }
            // Non-audio data (ID3 remnants, garbage runs) is consumed
            // without producing samples.
            Frame::Other(_) => DecodeOutcome {
                status: DecodeStatus::Decoded,
                consumed,
                samples_per_channel: 0,
                needed_output: 0,
            },
        }
    }

    fn info(&self) -> Option<StreamInfo> {
        self.info
    }

    fn reset(&mut self) {
        self.decoder = RawDecoder::new();
    }
}

/// MP3 frame sync: 0xFF followed by a byte with the top three bits set.
pub fn is_mp3_sync(first: u8, second: u8) -> bool {
    first == 0xFF && second & 0xE0 == 0xE0
}
