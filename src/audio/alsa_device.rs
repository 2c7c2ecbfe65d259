//! ALSA-backed capture source and render sink.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::pcm_io::{CaptureSource, RenderSink};

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, u32)> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let actual_rate = pcm.hw_params_current()?.get_rate()?;
    log::info!(
        "ALSA {}: device={}, rate={}, channels={}",
        dir_name,
        device,
        actual_rate,
        channels,
    );
    Ok((pcm, actual_rate))
}

/// Mono S16LE capture from an ALSA device.
pub struct AlsaCapture {
    pcm: PCM,
}

impl AlsaCapture {
    pub fn open(device: &str, sample_rate: u32) -> Result<Self> {
        let (pcm, _) = open_pcm(device, Direction::Capture, sample_rate, 1)?;
        Ok(Self { pcm })
    }
}

impl CaptureSource for AlsaCapture {
    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize> {
        let io = self.pcm.io_i16()?;
        match io.readi(buf) {
            Ok(frames) => Ok(frames),
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                self.pcm
                    .prepare()
                    .with_context(|| "Failed to recover PCM capture")?;
                Ok(0)
            }
        }
    }
}

/// Stereo S16LE playback to an ALSA device.
pub struct AlsaPlayback {
    pcm: PCM,
}

impl AlsaPlayback {
    pub fn open(device: &str, sample_rate: u32) -> Result<Self> {
        let (pcm, _) = open_pcm(device, Direction::Playback, sample_rate, 2)?;
        Ok(Self { pcm })
    }
}

impl RenderSink for AlsaPlayback {
    fn write_samples(&mut self, samples: &[i16]) -> Result<usize> {
        let io = self.pcm.io_i16()?;
        let total_frames = samples.len() / 2;
        let mut frames_written = 0;
        let mut retries = 0u32;

        // Retry short writes and XRUNs; give up on the rest of the block
        // once recovery stops making progress.
        while frames_written < total_frames {
            match io.writei(&samples[frames_written * 2..]) {
                Ok(n) => {
                    frames_written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    self.pcm
                        .prepare()
                        .with_context(|| "Failed to recover PCM playback")?;
                    retries += 1;
                    if retries >= 3 {
                        log::error!(
                            "dropping {} unwritten frames after repeated XRUN",
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(frames_written * 2)
    }
}
