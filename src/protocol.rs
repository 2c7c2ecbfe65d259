//! Wire protocol for the serial audio link.
//!
//! Frame layout (length little-endian):
//!
//! ```text
//! [0xAA][0x55][cmd:1][lenL:1][lenH:1][payload:len][checksum:1]
//! ```
//!
//! The checksum is the XOR of the command byte, both length bytes, and every
//! payload byte. Frames with a declared length above [`FRAME_MAX_PAYLOAD`]
//! are invalid and dropped by the receiver.

/// First sync byte of every frame.
pub const FRAME_SYNC_0: u8 = 0xAA;
/// Second sync byte of every frame.
pub const FRAME_SYNC_1: u8 = 0x55;
/// Maximum payload length accepted on receive and allowed on send.
pub const FRAME_MAX_PAYLOAD: usize = 2048;

/// Link commands. The byte values are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StartRecord = 0x01,
    StopRecord = 0x02,
    AudioData = 0x03,
    StartPlay = 0x04,
    StopPlay = 0x05,
    Handshake = 0x06,
    Ack = 0x07,
    SetFormat = 0x08,
}

impl Command {
    /// Map a wire byte to a command. Unknown bytes are the peer's problem,
    /// not a parse error, so this returns `Option` rather than `Result`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::StartRecord),
            0x02 => Some(Self::StopRecord),
            0x03 => Some(Self::AudioData),
            0x04 => Some(Self::StartPlay),
            0x05 => Some(Self::StopPlay),
            0x06 => Some(Self::Handshake),
            0x07 => Some(Self::Ack),
            0x08 => Some(Self::SetFormat),
            _ => None,
        }
    }
}

/// A fully validated frame, alive for one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

/// Serialize one frame. Always succeeds; payloads over [`FRAME_MAX_PAYLOAD`]
/// are a caller contract violation and would corrupt the stream.
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= FRAME_MAX_PAYLOAD);

    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(FRAME_SYNC_0);
    frame.push(FRAME_SYNC_1);
    frame.push(cmd);
    frame.push((len & 0xFF) as u8);
    frame.push((len >> 8) as u8);
    frame.extend_from_slice(payload);

    let mut checksum = 0u8;
    for &b in &frame[2..] {
        checksum ^= b;
    }
    frame.push(checksum);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitSync0,
    AwaitSync1,
    Command,
    LenLow,
    LenHigh,
    Payload,
    Checksum,
}

/// Byte-at-a-time frame parser.
///
/// Feed it one received byte at a time with [`FrameParser::push`]; a
/// completed, checksum-verified frame is returned as soon as its last byte
/// arrives. Bad sync, oversized lengths, and checksum mismatches all fall
/// back to scanning for the next sync sequence, so the parser never wedges
/// on a corrupt stream.
pub struct FrameParser {
    state: ParseState,
    cmd: u8,
    len: u16,
    payload: Vec<u8>,
    checksum: u8,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::AwaitSync0,
            cmd: 0,
            len: 0,
            payload: Vec::with_capacity(FRAME_MAX_PAYLOAD),
            checksum: 0,
        }
    }

    /// Advance the state machine by one byte.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ParseState::AwaitSync0 => {
                if byte == FRAME_SYNC_0 {
                    self.state = ParseState::AwaitSync1;
                }
            }
            ParseState::AwaitSync1 => {
                // A failed second sync byte is not re-tested as a first one.
                self.state = if byte == FRAME_SYNC_1 {
                    ParseState::Command
                } else {
                    ParseState::AwaitSync0
                };
            }
            ParseState::Command => {
                self.cmd = byte;
                self.checksum = byte;
                self.state = ParseState::LenLow;
            }
            ParseState::LenLow => {
                self.len = byte as u16;
                self.checksum ^= byte;
                self.state = ParseState::LenHigh;
            }
            ParseState::LenHigh => {
                self.len |= (byte as u16) << 8;
                self.checksum ^= byte;
                self.payload.clear();
                if self.len == 0 {
                    self.state = ParseState::Checksum;
                } else if (self.len as usize) <= FRAME_MAX_PAYLOAD {
                    self.state = ParseState::Payload;
                } else {
                    log::warn!("invalid frame length: {}", self.len);
                    self.state = ParseState::AwaitSync0;
                }
            }
            ParseState::Payload => {
                self.payload.push(byte);
                self.checksum ^= byte;
                if self.payload.len() >= self.len as usize {
                    self.state = ParseState::Checksum;
                }
            }
            ParseState::Checksum => {
                self.state = ParseState::AwaitSync0;
                if byte == self.checksum {
                    return Some(Frame {
                        cmd: self.cmd,
                        payload: std::mem::take(&mut self.payload),
                    });
                }
                log::warn!(
                    "frame checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                    self.checksum,
                    byte
                );
            }
        }
        None
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
