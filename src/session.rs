//! Session state and command dispatch.
//!
//! One mode and one format selector are shared process-wide: written only
//! by the dispatch thread, read by the capture and status threads. The
//! controller runs on the receive thread and serializes every transition.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::audio::{normalizer, CaptureSource, RenderSink, StreamDecoder};
use crate::link::FrameSink;
use crate::protocol::{Command, Frame};

/// Operating mode of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Idle = 0,
    Recording = 1,
    Playing = 2,
}

impl Mode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Recording,
            2 => Self::Playing,
            _ => Self::Idle,
        }
    }
}

/// Payload encoding selected for the playback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamFormat {
    Raw = 0,
    Compressed = 1,
}

impl StreamFormat {
    fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::Compressed
        } else {
            Self::Raw
        }
    }
}

/// Mode and format selector, single-writer / multi-reader.
///
/// Atomics keep the cross-thread reads tear-free; only the dispatch thread
/// ever stores.
pub struct SharedState {
    mode: AtomicU8,
    format: AtomicU8,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: AtomicU8::new(Mode::Idle as u8),
            format: AtomicU8::new(StreamFormat::Raw as u8),
        })
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat::from_u8(self.format.load(Ordering::Relaxed))
    }

    fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn set_format(&self, format: StreamFormat) {
        self.format.store(format as u8, Ordering::SeqCst);
    }
}

/// Builds the render sink on the `Idle → Playing` transition.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn RenderSink>> + Send>;
/// Builds the stream decoder when playback starts in compressed format.
pub type DecoderFactory = Box<dyn FnMut() -> StreamDecoder + Send>;
/// Opens the capture device on the `Idle → Recording` transition.
pub type CaptureFactory = Box<dyn FnMut() -> Result<Box<dyn CaptureSource>> + Send>;

/// Capture source handed from the dispatch thread to the capture thread.
/// Holds `Some` exactly while the session is `Recording`.
pub type CaptureSlot = Arc<Mutex<Option<Box<dyn CaptureSource>>>>;

/// Dispatches parsed frames and owns the playback pipeline.
pub struct SessionController {
    shared: Arc<SharedState>,
    frames: Arc<dyn FrameSink>,
    sink_factory: SinkFactory,
    decoder_factory: DecoderFactory,
    capture_factory: CaptureFactory,
    capture: CaptureSlot,
    sink: Option<Box<dyn RenderSink>>,
    decoder: Option<StreamDecoder>,
    // Normalizer destination, reused across frames.
    stereo_buf: Vec<i16>,
    max_pull_samples: usize,
}

impl SessionController {
    pub fn new(
        shared: Arc<SharedState>,
        frames: Arc<dyn FrameSink>,
        sink_factory: SinkFactory,
        decoder_factory: DecoderFactory,
        capture_factory: CaptureFactory,
    ) -> Self {
        Self {
            shared,
            frames,
            sink_factory,
            decoder_factory,
            capture_factory,
            capture: Arc::new(Mutex::new(None)),
            sink: None,
            decoder: None,
            stereo_buf: Vec::new(),
            max_pull_samples: 4096,
        }
    }

    /// Handle through which the capture thread reaches the open device.
    pub fn capture_slot(&self) -> CaptureSlot {
        self.capture.clone()
    }

    /// Handle one validated frame. Runs strictly after checksum
    /// verification, one frame at a time.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        let Some(cmd) = Command::from_byte(frame.cmd) else {
            log::warn!("unknown command: 0x{:02X}", frame.cmd);
            return Ok(());
        };

        match cmd {
            Command::StartRecord => {
                log::info!("start-record command");
                if self.shared.mode() == Mode::Idle {
                    self.start_recording()?;
                }
                self.ack(frame.cmd)
            }
            Command::StopRecord => {
                log::info!("stop-record command");
                if self.shared.mode() == Mode::Recording {
                    self.stop_recording()?;
                }
                self.ack(frame.cmd)
            }
            Command::StartPlay => {
                log::info!(
                    "start-play command, format: {:?}",
                    self.shared.format()
                );
                if self.shared.mode() == Mode::Idle {
                    self.start_playback();
                }
                self.ack(frame.cmd)
            }
            Command::StopPlay => {
                log::info!("stop-play command");
                if self.shared.mode() == Mode::Playing {
                    self.stop_playback();
                }
                // Stopping playback always reverts to the raw default.
                self.shared.set_format(StreamFormat::Raw);
                self.ack(frame.cmd)
            }
            Command::AudioData => {
                if self.shared.mode() == Mode::Playing && !frame.payload.is_empty() {
                    self.render_audio(&frame.payload);
                }
                Ok(())
            }
            Command::SetFormat => {
                if let Some(&byte) = frame.payload.first() {
                    let format = StreamFormat::from_u8(byte);
                    log::info!("set format: {:?}", format);
                    self.shared.set_format(format);
                }
                self.ack(frame.cmd)
            }
            Command::Handshake => {
                log::info!("handshake command");
                self.frames
                    .send_frame(Command::Ack as u8, &[self.shared.mode() as u8])
            }
            Command::Ack => {
                log::debug!("peer ack: {:?}", frame.payload.first());
                Ok(())
            }
        }
    }

    fn ack(&self, cmd: u8) -> Result<()> {
        self.frames.send_frame(Command::Ack as u8, &[cmd])
    }

    fn start_recording(&mut self) -> Result<()> {
        // The device must be held before entering Recording; a session
        // observer never sees Recording without a live capture source.
        let source = match (self.capture_factory)() {
            Ok(source) => source,
            Err(e) => {
                log::error!("cannot start recording: {:#}", e);
                return Ok(());
            }
        };
        let mut slot = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture slot lock poisoned"))?;
        *slot = Some(source);
        self.shared.set_mode(Mode::Recording);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        self.shared.set_mode(Mode::Idle);
        let mut slot = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture slot lock poisoned"))?;
        *slot = None;
        Ok(())
    }

    fn start_playback(&mut self) {
        // Required resources must be held before entering Playing.
        match (self.sink_factory)() {
            Ok(sink) => self.sink = Some(sink),
            Err(e) => {
                log::error!("cannot start playback: {:#}", e);
                return;
            }
        }
        if self.shared.format() == StreamFormat::Compressed {
            self.decoder = Some((self.decoder_factory)());
        }
        self.shared.set_mode(Mode::Playing);
    }

    fn stop_playback(&mut self) {
        self.shared.set_mode(Mode::Idle);
        self.sink = None;
        self.decoder = None;
    }

    fn render_audio(&mut self, payload: &[u8]) {
        match self.shared.format() {
            StreamFormat::Raw => {
                // Host sends mono S16LE; the sink wants stereo.
                let mono = normalizer::bytes_to_samples(payload);
                normalizer::expand_to_stereo(&mono, 1, &mut self.stereo_buf);
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.write_samples(&self.stereo_buf) {
                        log::warn!("render sink write failed: {}", e);
                    }
                }
            }
            StreamFormat::Compressed => {
                let Some(decoder) = self.decoder.as_mut() else {
                    return;
                };
                let accepted = decoder.feed(payload);
                if accepted < payload.len() {
                    log::debug!(
                        "staging backpressure: dropped {} of {} bytes",
                        payload.len() - accepted,
                        payload.len()
                    );
                }
                loop {
                    match decoder.pull(self.max_pull_samples) {
                        Ok(Some(block)) => {
                            normalizer::expand_to_stereo(
                                &block.samples,
                                block.channels,
                                &mut self.stereo_buf,
                            );
                            if let Some(sink) = self.sink.as_mut() {
                                if let Err(e) = sink.write_samples(&self.stereo_buf) {
                                    log::warn!("render sink write failed: {}", e);
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // Scratch ceiling exceeded: a configuration
                            // problem, fatal to this playback session only.
                            log::error!("decoder scratch ceiling hit: {:#}", e);
                            self.stop_playback();
                            self.shared.set_format(StreamFormat::Raw);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capability::{
        DecodeCapability, DecodeOutcome, DecodeStatus, StreamInfo,
    };
    use crate::audio::DecoderPolicy;
    use std::sync::Mutex;

    /// Records every frame handed to the link.
    struct RecordingSink {
        sent: Mutex<Vec<(u8, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(u8, Vec<u8>)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, cmd: u8, payload: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push((cmd, payload.to_vec()));
            Ok(())
        }
    }

    /// Collects everything written to the render sink.
    struct CollectingSink {
        samples: Arc<Mutex<Vec<i16>>>,
    }

    impl RenderSink for CollectingSink {
        fn write_samples(&mut self, samples: &[i16]) -> Result<usize> {
            self.samples.lock().unwrap().extend_from_slice(samples);
            Ok(samples.len())
        }
    }

    struct NullCapture;

    impl CaptureSource for NullCapture {
        fn read_samples(&mut self, _buf: &mut [i16]) -> Result<usize> {
            Ok(0)
        }
    }

    /// Consumes the whole window, emitting four mono samples per call.
    struct PassthroughCapability;

    impl DecodeCapability for PassthroughCapability {
        fn process(&mut self, input: &[u8], output: &mut [i16]) -> DecodeOutcome {
            for (i, slot) in output[..4].iter_mut().enumerate() {
                *slot = (i + 1) as i16 * 100;
            }
            DecodeOutcome {
                status: DecodeStatus::Decoded,
                consumed: input.len(),
                samples_per_channel: 4,
                needed_output: 0,
            }
        }

        fn info(&self) -> Option<StreamInfo> {
            Some(StreamInfo {
                sample_rate: 16_000,
                channels: 1,
            })
        }

        fn reset(&mut self) {}
    }

    struct Harness {
        controller: SessionController,
        shared: Arc<SharedState>,
        frames: Arc<RecordingSink>,
        rendered: Arc<Mutex<Vec<i16>>>,
    }

    fn harness(sink_fails: bool, capture_fails: bool) -> Harness {
        let shared = SharedState::new();
        let frames = RecordingSink::new();
        let rendered: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));

        let rendered_for_factory = rendered.clone();
        let sink_factory: SinkFactory = Box::new(move || {
            if sink_fails {
                anyhow::bail!("no playback device")
            }
            Ok(Box::new(CollectingSink {
                samples: rendered_for_factory.clone(),
            }) as Box<dyn RenderSink>)
        });
        let decoder_factory: DecoderFactory = Box::new(|| {
            StreamDecoder::new(
                Box::new(PassthroughCapability),
                crate::audio::is_mp3_sync,
                4096,
                DecoderPolicy::default(),
            )
        });
        let capture_factory: CaptureFactory = Box::new(move || {
            if capture_fails {
                anyhow::bail!("no capture device")
            }
            Ok(Box::new(NullCapture) as Box<dyn CaptureSource>)
        });

        let controller = SessionController::new(
            shared.clone(),
            frames.clone(),
            sink_factory,
            decoder_factory,
            capture_factory,
        );
        Harness {
            controller,
            shared,
            frames,
            rendered,
        }
    }

    fn frame(cmd: Command, payload: &[u8]) -> Frame {
        Frame {
            cmd: cmd as u8,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_start_record_from_idle() {
        let mut h = harness(false, false);
        h.controller.dispatch(&frame(Command::StartRecord, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Recording);
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x01])]);
    }

    #[test]
    fn test_start_record_noop_outside_idle() {
        let mut h = harness(false, false);
        h.controller.dispatch(&frame(Command::StartPlay, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Playing);
        h.frames.take();

        h.controller.dispatch(&frame(Command::StartRecord, &[])).unwrap();
        // No transition, but the command is still acknowledged.
        assert_eq!(h.shared.mode(), Mode::Playing);
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x01])]);
    }

    #[test]
    fn test_record_cycle() {
        let mut h = harness(false, false);
        h.controller.dispatch(&frame(Command::StartRecord, &[])).unwrap();
        assert!(h.controller.capture_slot().lock().unwrap().is_some());
        h.controller.dispatch(&frame(Command::StopRecord, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Idle);
        assert!(h.controller.capture_slot().lock().unwrap().is_none());
        assert_eq!(
            h.frames.take(),
            vec![(0x07, vec![0x01]), (0x07, vec![0x02])]
        );
    }

    #[test]
    fn test_capture_failure_never_enters_recording() {
        let mut h = harness(false, true);
        h.controller.dispatch(&frame(Command::StartRecord, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Idle);
        assert!(h.controller.capture_slot().lock().unwrap().is_none());
        // Still acknowledged even though nothing happened.
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x01])]);
        // A handshake observer must see Idle, never a transient Recording.
        h.controller.dispatch(&frame(Command::Handshake, &[])).unwrap();
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x00])]);
    }

    #[test]
    fn test_stop_play_always_resets_format() {
        let mut h = harness(false, false);
        h.controller
            .dispatch(&frame(Command::SetFormat, &[0x01]))
            .unwrap();
        assert_eq!(h.shared.format(), StreamFormat::Compressed);
        // Not playing: StopPlay is a transition no-op, the reset is not.
        h.controller.dispatch(&frame(Command::StopPlay, &[])).unwrap();
        assert_eq!(h.shared.format(), StreamFormat::Raw);
        assert_eq!(h.shared.mode(), Mode::Idle);
    }

    #[test]
    fn test_handshake_ack_carries_mode() {
        let mut h = harness(false, false);
        h.controller.dispatch(&frame(Command::Handshake, &[])).unwrap();
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x00])]);

        h.controller.dispatch(&frame(Command::StartRecord, &[])).unwrap();
        h.frames.take();
        h.controller.dispatch(&frame(Command::Handshake, &[])).unwrap();
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x01])]);
    }

    #[test]
    fn test_sink_failure_keeps_session_idle() {
        let mut h = harness(true, false);
        h.controller.dispatch(&frame(Command::StartPlay, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Idle);
        // Still acknowledged even though nothing happened.
        assert_eq!(h.frames.take(), vec![(0x07, vec![0x04])]);
    }

    #[test]
    fn test_raw_audio_is_expanded_to_stereo() {
        let mut h = harness(false, false);
        h.controller.dispatch(&frame(Command::StartPlay, &[])).unwrap();

        // Mono samples 1, 2, 3 as little-endian bytes.
        let payload = [1u8, 0, 2, 0, 3, 0];
        h.controller
            .dispatch(&frame(Command::AudioData, &payload))
            .unwrap();
        assert_eq!(*h.rendered.lock().unwrap(), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_audio_data_ignored_when_not_playing() {
        let mut h = harness(false, false);
        h.controller
            .dispatch(&frame(Command::AudioData, &[1, 0, 2, 0]))
            .unwrap();
        assert!(h.rendered.lock().unwrap().is_empty());
        // Audio data is never acknowledged.
        assert!(h.frames.take().is_empty());
    }

    #[test]
    fn test_compressed_playback_pipeline() {
        let mut h = harness(false, false);
        h.controller
            .dispatch(&frame(Command::SetFormat, &[0x01]))
            .unwrap();
        h.controller.dispatch(&frame(Command::StartPlay, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Playing);

        // Enough bytes to clear the decode threshold; the fake capability
        // consumes them all and emits four mono samples, expanded to stereo.
        let payload = vec![0xFFu8; 256];
        h.controller
            .dispatch(&frame(Command::AudioData, &payload))
            .unwrap();
        assert_eq!(
            *h.rendered.lock().unwrap(),
            vec![100, 100, 200, 200, 300, 300, 400, 400]
        );
    }

    #[test]
    fn test_stop_play_releases_pipeline() {
        let mut h = harness(false, false);
        h.controller
            .dispatch(&frame(Command::SetFormat, &[0x01]))
            .unwrap();
        h.controller.dispatch(&frame(Command::StartPlay, &[])).unwrap();
        h.controller.dispatch(&frame(Command::StopPlay, &[])).unwrap();
        assert_eq!(h.shared.mode(), Mode::Idle);
        assert!(h.controller.sink.is_none());
        assert!(h.controller.decoder.is_none());
        assert_eq!(h.shared.format(), StreamFormat::Raw);
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let mut h = harness(false, false);
        h.controller
            .dispatch(&Frame {
                cmd: 0x51,
                payload: vec![],
            })
            .unwrap();
        assert_eq!(h.shared.mode(), Mode::Idle);
        assert!(h.frames.take().is_empty());
    }
}
