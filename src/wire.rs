//! The peer wire protocol framing: a 4-byte big-endian length prefix
//! followed by a one-byte message id and its payload. A zero-length frame
//! is a keepalive and carries neither id nor payload.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::conf::MAX_FRAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

/// A single read off the wire: either a real message or a keepalive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    KeepAlive,
    Message(Message),
}

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("connection closed or truncated while reading a frame")]
    ShortRead(#[from] io::Error),
    #[error("frame length {0} exceeds sanity bound")]
    Framing(u32),
    #[error("unknown message id {0}")]
    UnknownMessageId(u8),
}

impl Message {
    fn id(&self) -> u8 {
        match self {
            Message::Choke => 0,
            Message::Unchoke => 1,
            Message::Interested => 2,
            Message::NotInterested => 3,
            Message::Have { .. } => 4,
            Message::Bitfield(_) => 5,
            Message::Request { .. } => 6,
            Message::Piece { .. } => 7,
            Message::Cancel { .. } => 8,
        }
    }

    /// Encodes this message as a complete frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload_len = 1u32;
        match self {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { .. } => payload_len += 4,
            Message::Bitfield(bits) => payload_len += bits.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => payload_len += 12,
            Message::Piece { block, .. } => payload_len += 8 + block.len() as u32,
        }

        let mut buf = Vec::with_capacity(4 + payload_len as usize);
        buf.write_u32::<BigEndian>(payload_len).expect("vec write");
        buf.write_u8(self.id()).expect("vec write");
        match self {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { index } => buf.write_u32::<BigEndian>(*index).expect("vec write"),
            Message::Bitfield(bits) => buf.extend_from_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.write_u32::<BigEndian>(*index).expect("vec write");
                buf.write_u32::<BigEndian>(*begin).expect("vec write");
                buf.write_u32::<BigEndian>(*length).expect("vec write");
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                buf.write_u32::<BigEndian>(*index).expect("vec write");
                buf.write_u32::<BigEndian>(*begin).expect("vec write");
                buf.extend_from_slice(block);
            }
        }
        buf
    }
}

/// Reads exactly one frame from `r`: the 4-byte length prefix and, unless
/// it's a keepalive, the message id plus payload.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Frame, WireError> {
    let len = r.read_u32::<BigEndian>()?;
    if len == 0 {
        return Ok(Frame::KeepAlive);
    }
    if len > MAX_FRAME_LEN {
        return Err(WireError::Framing(len));
    }

    let id = r.read_u8()?;
    let payload_len = (len - 1) as usize;
    let mut payload = vec![0u8; payload_len];
    r.read_exact(&mut payload)?;

    let message = match id {
        0 => Message::Choke,
        1 => Message::Unchoke,
        2 => Message::Interested,
        3 => Message::NotInterested,
        4 => Message::Have {
            index: BigEndian::read_u32(&payload[0..4]),
        },
        5 => Message::Bitfield(payload),
        6 => Message::Request {
            index: BigEndian::read_u32(&payload[0..4]),
            begin: BigEndian::read_u32(&payload[4..8]),
            length: BigEndian::read_u32(&payload[8..12]),
        },
        7 => Message::Piece {
            index: BigEndian::read_u32(&payload[0..4]),
            begin: BigEndian::read_u32(&payload[4..8]),
            block: payload[8..].to_vec(),
        },
        8 => Message::Cancel {
            index: BigEndian::read_u32(&payload[0..4]),
            begin: BigEndian::read_u32(&payload[4..8]),
            length: BigEndian::read_u32(&payload[8..12]),
        },
        other => return Err(WireError::UnknownMessageId(other)),
    };
    Ok(Frame::Message(message))
}

/// Writes a message as a complete frame.
pub fn write_message<W: Write>(w: &mut W, message: &Message) -> io::Result<()> {
    w.write_all(&message.encode())
}

/// Writes a zero-length keepalive frame.
pub fn write_keepalive<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&[0, 0, 0, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let encoded = msg.encode();
        let mut cursor = &encoded[..];
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame, Frame::Message(msg));
        assert!(cursor.is_empty());
    }

    #[test]
    fn roundtrips_all_kinds() {
        roundtrip(Message::Choke);
        roundtrip(Message::Unchoke);
        roundtrip(Message::Interested);
        roundtrip(Message::NotInterested);
        roundtrip(Message::Have { index: 42 });
        roundtrip(Message::Bitfield(vec![0b1010_0000, 0xff]));
        roundtrip(Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        });
        roundtrip(Message::Piece {
            index: 1,
            begin: 0,
            block: b"hello world".to_vec(),
        });
        roundtrip(Message::Cancel {
            index: 1,
            begin: 16384,
            length: 16384,
        });
    }

    #[test]
    fn keepalive_is_four_zero_bytes() {
        let mut cursor: &[u8] = &[0, 0, 0, 0];
        assert_eq!(read_frame(&mut cursor).unwrap(), Frame::KeepAlive);

        let mut buf = Vec::new();
        write_keepalive(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_FRAME_LEN + 1).unwrap();
        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor),
            Err(WireError::Framing(_))
        ));
    }

    #[test]
    fn truncated_frame_is_short_read() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(5).unwrap();
        buf.push(1); // id but no payload
        let mut cursor = &buf[..];
        assert!(matches!(read_frame(&mut cursor), Err(WireError::ShortRead(_))));
    }
}
