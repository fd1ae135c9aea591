//! Opening handshake parsing.
//!
//! # Responsibilities
//! - Read the first, length-prefixed packet a client sends
//! - Extract the requested server address as the routing hostname
//! - Keep the consumed bytes so they can be replayed to the backend
//!
//! # Wire Format
//! ```text
//! VarInt  packet length
//! VarInt  packet id (0x00)
//! VarInt  protocol version
//! String  server address (VarInt length + UTF-8, at most 255 chars)
//! u16     server port (big endian)
//! VarInt  next state
//! ```

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::config::schema::normalize_hostname;
use crate::protocol::HostnameResolver;

/// Largest handshake packet accepted, in bytes.
pub const MAX_PACKET_LEN: usize = 2048;

/// Longest server address, in characters.
pub const MAX_ADDRESS_CHARS: usize = 255;

/// First byte of a pre-netty status ping.
const LEGACY_PING: u8 = 0xFE;

/// Errors raised while reading a handshake.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("legacy server list ping is not supported")]
    LegacyPing,

    #[error("packet of {0} bytes exceeds handshake limit")]
    PacketTooLarge(usize),

    #[error("expected handshake packet 0x00, got {0:#04x}")]
    UnexpectedPacket(i32),

    #[error("malformed handshake: {0}")]
    Malformed(&'static str),

    #[error("no handshake within {0:?}")]
    Timeout(Duration),
}

/// A parsed opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    /// Address exactly as the client sent it.
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
    /// Normalized routing key derived from `server_address`.
    pub hostname: String,
    /// Every byte consumed from the client, length prefix included.
    pub raw: Vec<u8>,
}

/// Reads handshakes from freshly accepted connections.
#[derive(Debug, Clone)]
pub struct MinecraftHandshake {
    read_timeout: Duration,
}

impl MinecraftHandshake {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for MinecraftHandshake {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HostnameResolver for MinecraftHandshake {
    async fn resolve(&self, stream: &mut TcpStream) -> Result<Handshake, ProtocolError> {
        tokio::time::timeout(self.read_timeout, read_handshake(stream))
            .await
            .map_err(|_| ProtocolError::Timeout(self.read_timeout))?
    }
}

/// Read and parse one handshake packet from `reader`.
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake, ProtocolError> {
    let mut raw = Vec::with_capacity(64);

    let first = reader.read_u8().await?;
    if first == LEGACY_PING {
        return Err(ProtocolError::LegacyPing);
    }
    raw.push(first);

    let mut length = i32::from(first & 0x7F);
    let mut byte = first;
    let mut shift = 7;
    while byte & 0x80 != 0 {
        if shift >= 35 {
            return Err(ProtocolError::Malformed("packet length VarInt too long"));
        }
        byte = reader.read_u8().await?;
        raw.push(byte);
        length |= i32::from(byte & 0x7F) << shift;
        shift += 7;
    }

    if length <= 0 {
        return Err(ProtocolError::Malformed("empty packet"));
    }
    let length = length as usize;
    if length > MAX_PACKET_LEN {
        return Err(ProtocolError::PacketTooLarge(length));
    }

    let header_len = raw.len();
    raw.resize(header_len + length, 0);
    reader.read_exact(&mut raw[header_len..]).await?;

    let mut body = PacketReader::new(&raw[header_len..]);
    let packet_id = body.varint()?;
    if packet_id != 0x00 {
        return Err(ProtocolError::UnexpectedPacket(packet_id));
    }
    let protocol_version = body.varint()?;
    let server_address = body.string(MAX_ADDRESS_CHARS)?;
    let server_port = body.u16()?;
    let next_state = body.varint()?;

    // Forge appends "\0FML\0" style markers after the host.
    let host = server_address.split('\0').next().unwrap_or_default();
    let hostname = normalize_hostname(host);

    Ok(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state,
        hostname,
        raw,
    })
}

/// Encode a handshake packet; the inverse of `read_handshake`.
pub fn encode_handshake(protocol_version: i32, server_address: &str, server_port: u16, next_state: i32) -> Vec<u8> {
    let mut body = Vec::with_capacity(server_address.len() + 16);
    write_varint(&mut body, 0x00);
    write_varint(&mut body, protocol_version);
    write_varint(&mut body, server_address.len() as i32);
    body.extend_from_slice(server_address.as_bytes());
    body.extend_from_slice(&server_port.to_be_bytes());
    write_varint(&mut body, next_state);

    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend_from_slice(&body);
    packet
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(ProtocolError::Malformed("packet ended early"))?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> Result<i32, ProtocolError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            let b = self.byte()?;
            value |= u32::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(ProtocolError::Malformed("VarInt too long"))
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let hi = self.byte()?;
        let lo = self.byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn string(&mut self, max_chars: usize) -> Result<String, ProtocolError> {
        let len = self.varint()?;
        if len < 0 || len as usize > max_chars * 4 {
            return Err(ProtocolError::Malformed("string length out of range"));
        }
        let end = self.pos + len as usize;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(ProtocolError::Malformed("packet ended early"))?;
        self.pos = end;

        let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("address is not UTF-8"))?;
        if s.chars().count() > max_chars {
            return Err(ProtocolError::Malformed("address too long"));
        }
        Ok(s.to_string())
    }
}
