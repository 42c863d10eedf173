//! Minimal WebSocket (RFC 6455) codec
//!
//! Server side only: opening handshake, masked client frames in, unmasked
//! server frames out. Fragmented text messages are joined by
//! [`TextAssembler`]; binary messages are skipped whole.

use core::fmt::Write as _;
use core::ops::Range;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Base64 of a SHA-1 digest
const ACCEPT_KEY_LEN: usize = 28;

/// Handshake response text
pub type HandshakeResponse = heapless::String<192>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Request is not valid UTF-8 or lacks a request line
    Malformed,
    /// Plain HTTP request without the upgrade headers
    NotUpgrade,
    /// Upgrade request without `Sec-WebSocket-Key`
    MissingKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// More bytes are needed
    Incomplete,
    /// Client frames must be masked
    Unmasked,
    /// Payload larger than the connection buffer
    TooLarge,
    /// Reserved opcode
    BadOpcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// Decoded client frame; the payload has already been unmasked in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Range<usize>,
    /// Bytes of the buffer taken by this frame
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragments {
    Idle,
    Text,
    Skip,
}

/// Joins data frames into complete text messages of at most `N` bytes
#[derive(Debug)]
pub struct TextAssembler<const N: usize> {
    message: heapless::Vec<u8, N>,
    state: Fragments,
}

impl<const N: usize> Default for TextAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TextAssembler<N> {
    pub fn new() -> Self {
        Self {
            message: heapless::Vec::new(),
            state: Fragments::Idle,
        }
    }

    /// Feed one data frame; returns the message once its final fragment arrives.
    ///
    /// Control frames must not be passed here. A continuation without a
    /// started message is dropped.
    pub fn push(
        &mut self,
        opcode: Opcode,
        fin: bool,
        payload: &[u8],
    ) -> Result<Option<heapless::Vec<u8, N>>, FrameError> {
        match opcode {
            Opcode::Text => {
                self.message.clear();
                self.state = Fragments::Text;
            }
            Opcode::Binary => self.state = Fragments::Skip,
            Opcode::Continuation if self.state != Fragments::Idle => {}
            Opcode::Continuation | Opcode::Close | Opcode::Ping | Opcode::Pong => {
                return Ok(None);
            }
        }

        if self.state == Fragments::Text && self.message.extend_from_slice(payload).is_err() {
            self.message.clear();
            self.state = Fragments::Idle;
            return Err(FrameError::TooLarge);
        }

        if !fin {
            return Ok(None);
        }
        let finished = self.state;
        self.state = Fragments::Idle;
        match finished {
            Fragments::Text => Ok(Some(core::mem::take(&mut self.message))),
            Fragments::Skip | Fragments::Idle => Ok(None),
        }
    }
}

/// Case-insensitive header lookup in a raw request head
pub fn find_header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

/// `Sec-WebSocket-Accept` value for a client key
pub fn accept_key(client_key: &str) -> heapless::String<ACCEPT_KEY_LEN> {
    let mut sha = sha1_smol::Sha1::new();
    sha.update(client_key.as_bytes());
    sha.update(WS_GUID.as_bytes());
    let digest = sha.digest().bytes();

    let mut encoded = [0u8; ACCEPT_KEY_LEN];
    let mut accept = heapless::String::new();
    if let Ok(len) = BASE64.encode_slice(digest, &mut encoded) {
        if let Ok(text) = core::str::from_utf8(&encoded[..len]) {
            let _ = accept.push_str(text);
        }
    }
    accept
}

/// Validate an upgrade request head and build the `101` response
pub fn handshake_response(head: &[u8]) -> Result<HandshakeResponse, HandshakeError> {
    let head = core::str::from_utf8(head).map_err(|_| HandshakeError::Malformed)?;
    if !head.starts_with("GET ") {
        return Err(HandshakeError::Malformed);
    }

    let upgrade = find_header(head, "Upgrade").ok_or(HandshakeError::NotUpgrade)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::NotUpgrade);
    }
    let key = find_header(head, "Sec-WebSocket-Key").ok_or(HandshakeError::MissingKey)?;
    if key.is_empty() {
        return Err(HandshakeError::MissingKey);
    }

    let mut response = HandshakeResponse::new();
    write!(
        response,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
    .map_err(|_| HandshakeError::Malformed)?;
    Ok(response)
}

/// Decode one masked client frame at the start of `buf`
pub fn decode_frame(buf: &mut [u8], max_payload: usize) -> Result<Frame, FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_bits(buf[0] & 0x0F).ok_or(FrameError::BadOpcode)?;
    let masked = buf[1] & 0x80 != 0;

    let (len, mut idx) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Err(FrameError::Incomplete);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Err(FrameError::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (n as u64, 2),
    };

    if !masked {
        return Err(FrameError::Unmasked);
    }
    if len > max_payload as u64 {
        return Err(FrameError::TooLarge);
    }
    let len = len as usize;

    if buf.len() < idx + 4 {
        return Err(FrameError::Incomplete);
    }
    let mut mask = [0u8; 4];
    mask.copy_from_slice(&buf[idx..idx + 4]);
    idx += 4;

    if buf.len() < idx + len {
        return Err(FrameError::Incomplete);
    }
    for (i, byte) in buf[idx..idx + len].iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame {
        fin,
        opcode,
        payload: idx..idx + len,
        consumed: idx + len,
    })
}

/// Encode an unmasked, unfragmented server frame; returns the frame length
pub fn encode_frame(opcode: Opcode, payload: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    let header_len = match payload.len() {
        0..=125 => 2,
        126..=0xFFFF => 4,
        _ => return Err(FrameError::TooLarge),
    };
    let total = header_len + payload.len();
    if out.len() < total {
        return Err(FrameError::TooLarge);
    }

    out[0] = 0x80 | opcode.bits();
    if header_len == 2 {
        out[1] = payload.len() as u8;
    } else {
        out[1] = 126;
        out[2..4].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    out[header_len..total].copy_from_slice(payload);
    Ok(total)
}
