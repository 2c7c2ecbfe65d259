//! Serial transport for the framed audio link.
//!
//! The port is opened once and split into a reader handle owned by the
//! receive thread and a shared, mutex-guarded writer used by whichever
//! thread has a frame to send (acks from dispatch, audio from capture).

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;

use crate::config::Config;
use crate::protocol::encode_frame;

/// Write access to the link, one whole frame at a time.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, cmd: u8, payload: &[u8]) -> Result<()>;
}

/// Blocking single-byte reads with the configured timeout.
pub trait ByteReader: Send {
    /// `Ok(None)` means the timeout elapsed with nothing to read.
    fn read_byte(&mut self) -> Result<Option<u8>>;
}

/// Writer half of the serial link.
pub struct SerialLink {
    port: Mutex<Box<dyn SerialPort>>,
}

impl FrameSink for SerialLink {
    fn send_frame(&self, cmd: u8, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(cmd, payload);
        let mut port = self
            .port
            .lock()
            .map_err(|_| anyhow::anyhow!("serial writer lock poisoned"))?;
        port.write_all(&frame)
            .with_context(|| "Failed to write frame to serial port")?;
        Ok(())
    }
}

/// Reader half of the serial link.
pub struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl ByteReader for SerialReader {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| "Serial read failed"),
        }
    }
}

/// Open the configured serial port and split it into reader and shared
/// writer handles.
pub fn open(config: &Config) -> Result<(SerialReader, Arc<SerialLink>)> {
    let reader = serialport::new(&config.serial_port, config.baud_rate)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()
        .with_context(|| {
            format!(
                "Failed to open serial port {} at {} baud",
                config.serial_port, config.baud_rate
            )
        })?;
    let writer = reader
        .try_clone()
        .with_context(|| "Failed to clone serial port for writing")?;

    log::info!(
        "Serial link open: {} @ {} baud",
        config.serial_port,
        config.baud_rate
    );

    Ok((
        SerialReader { port: reader },
        Arc::new(SerialLink {
            port: Mutex::new(writer),
        }),
    ))
}
