//! Worker threads driving the serial link.
//!
//! - Receive thread: serial bytes → frame parser → session dispatch
//! - Capture thread: ALSA capture → audio-data frames while recording

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::link::{ByteReader, FrameSink};
use crate::protocol::{Command, FrameParser};
use crate::session::{CaptureSlot, Mode, SessionController, SharedState};

/// Owns the receive and capture threads.
pub struct LinkSystem {
    running: Arc<AtomicBool>,
    rx_handle: Option<JoinHandle<()>>,
    capture_handle: Option<JoinHandle<()>>,
}

impl LinkSystem {
    pub fn start(
        config: &Config,
        reader: impl ByteReader + 'static,
        controller: SessionController,
        shared: Arc<SharedState>,
        frames: Arc<dyn FrameSink>,
        capture: CaptureSlot,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "link starting — port: \"{}\", baud: {}, capture frame: {} bytes",
            config.serial_port,
            config.baud_rate,
            config.capture_frame_bytes,
        );

        let rx_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("link-rx".into())
                .spawn(move || {
                    if let Err(e) = rx_thread(reader, controller, &running) {
                        log::error!("receive thread error: {:#}", e);
                    }
                })?
        };

        let capture_handle = {
            let running = running.clone();
            let shared = shared.clone();
            let frame_bytes = config.capture_frame_bytes;
            let idle_poll = Duration::from_millis(config.idle_poll_ms);
            thread::Builder::new()
                .name("link-capture".into())
                .spawn(move || {
                    capture_thread(&shared, frames, capture, frame_bytes, idle_poll, &running);
                })?
        };

        Ok(Self {
            running,
            rx_handle: Some(rx_handle),
            capture_handle: Some(capture_handle),
        })
    }

    /// Signal threads to stop and wait for them to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.rx_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.capture_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for LinkSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rx_thread(
    mut reader: impl ByteReader,
    mut controller: SessionController,
    running: &AtomicBool,
) -> Result<()> {
    let mut parser = FrameParser::new();
    while running.load(Ordering::Relaxed) {
        // `None` is a read timeout; it keeps the stop flag responsive.
        let Some(byte) = reader.read_byte()? else {
            continue;
        };
        if let Some(frame) = parser.push(byte) {
            log::debug!(
                "frame: cmd=0x{:02X}, len={}",
                frame.cmd,
                frame.payload.len()
            );
            if let Err(e) = controller.dispatch(&frame) {
                log::warn!("dispatch failed: {:#}", e);
            }
        }
    }
    Ok(())
}

fn capture_thread(
    shared: &SharedState,
    frames: Arc<dyn FrameSink>,
    capture: CaptureSlot,
    frame_bytes: usize,
    idle_poll: Duration,
    running: &AtomicBool,
) {
    let frame_samples = (frame_bytes / 2).max(1);
    let mut sample_buf = vec![0i16; frame_samples];
    let mut byte_buf = vec![0u8; frame_samples * 2];

    while running.load(Ordering::Relaxed) {
        if shared.mode() != Mode::Recording {
            thread::sleep(idle_poll);
            continue;
        }

        // The dispatch thread opens the device before entering Recording
        // and clears the slot on leaving it; this thread only borrows it.
        let mut slot = match capture.lock() {
            Ok(slot) => slot,
            Err(_) => {
                log::error!("capture slot lock poisoned, capture thread exiting");
                break;
            }
        };
        let Some(src) = slot.as_mut() else {
            // Recording ended between the mode check and the lock.
            drop(slot);
            thread::sleep(idle_poll);
            continue;
        };

        match src.read_samples(&mut sample_buf) {
            Ok(0) => {}
            Ok(n) => {
                for (i, &s) in sample_buf[..n].iter().enumerate() {
                    byte_buf[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
                }
                if let Err(e) =
                    frames.send_frame(Command::AudioData as u8, &byte_buf[..n * 2])
                {
                    log::warn!("capture frame send failed: {:#}", e);
                }
            }
            Err(e) => {
                log::warn!("capture read failed: {:#}", e);
                drop(slot);
                thread::sleep(idle_poll);
            }
        }
    }
}
