//! Per-peer session state: choked/interested flags, the peer's advertised
//! bitfield, and the high-level send operations built atop the wire codec.

use std::io::Write;
use std::net::TcpStream;

use bit_vec::BitVec;

use crate::wire::{self, Frame, Message, WireError};

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("have index {index} out of range for a {len}-piece bitfield")]
    BadHave { index: u32, len: usize },
}

/// A peer's advertised piece availability, MSB-first within each byte (bit 7
/// of byte 0 is piece 0).
pub struct Bitfield(BitVec);

impl Bitfield {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BitVec::from_bytes(bytes))
    }

    pub fn empty(piece_count: usize) -> Self {
        Self(BitVec::from_elem(piece_count, false))
    }

    pub fn has(&self, index: usize) -> bool {
        self.0.get(index).unwrap_or(false)
    }

    pub fn set_have(&mut self, index: usize) -> Option<()> {
        if index >= self.0.len() {
            return None;
        }
        self.0.set(index, true);
        Some(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One peer connection's protocol state, exclusively owned by the worker
/// driving it.
pub struct PeerSession {
    stream: TcpStream,
    choked: bool,
    interested: bool,
    bitfield: Bitfield,
}

impl PeerSession {
    /// Wraps an already-handshaken stream. The bitfield starts empty; the
    /// caller is expected to immediately require and store the peer's
    /// BITFIELD message per spec §4.B before doing anything else.
    pub fn new(stream: TcpStream, piece_count: usize) -> Self {
        Self {
            stream,
            choked: true,
            interested: false,
            bitfield: Bitfield::empty(piece_count),
        }
    }

    pub fn choked(&self) -> bool {
        self.choked
    }

    pub fn set_bitfield(&mut self, bitfield: Bitfield) {
        self.bitfield = bitfield;
    }

    pub fn can_request(&self, piece_index: usize) -> bool {
        self.bitfield.has(piece_index)
    }

    pub fn send_choke(&mut self) -> std::io::Result<()> {
        wire::write_message(&mut self.stream, &Message::Choke)
    }

    pub fn send_unchoke(&mut self) -> std::io::Result<()> {
        wire::write_message(&mut self.stream, &Message::Unchoke)
    }

    pub fn send_interested(&mut self) -> std::io::Result<()> {
        self.interested = true;
        wire::write_message(&mut self.stream, &Message::Interested)
    }

    pub fn send_not_interested(&mut self) -> std::io::Result<()> {
        self.interested = false;
        wire::write_message(&mut self.stream, &Message::NotInterested)
    }

    pub fn send_have(&mut self, index: u32) -> std::io::Result<()> {
        wire::write_message(&mut self.stream, &Message::Have { index })
    }

    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> std::io::Result<()> {
        wire::write_message(
            &mut self.stream,
            &Message::Request {
                index,
                begin,
                length,
            },
        )
    }

    /// Pulls one frame off the wire. May yield a keepalive, which callers
    /// should ignore and loop.
    pub fn read_message(&mut self) -> Result<Frame, WireError> {
        wire::read_frame(&mut self.stream)
    }

    /// Applies a message's effect on session state. PIECE payloads are
    /// returned to the caller unchanged; session state is not touched by
    /// them, since block accounting belongs to the worker's piece progress,
    /// not to the session.
    pub fn process_message(&mut self, msg: Message) -> Result<Option<Message>, SessionError> {
        match msg {
            Message::Choke => {
                self.choked = true;
                Ok(None)
            }
            Message::Unchoke => {
                self.choked = false;
                Ok(None)
            }
            Message::Have { index } => {
                self.bitfield
                    .set_have(index as usize)
                    .ok_or(SessionError::BadHave {
                        index,
                        len: self.bitfield.len(),
                    })?;
                Ok(None)
            }
            piece @ Message::Piece { .. } => Ok(Some(piece)),
            _ => Ok(None),
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> std::io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.flush();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_have_sets_only_the_targeted_bit() {
        let mut bf = Bitfield::empty(16);
        bf.set_have(5).unwrap();
        assert!(bf.has(5));
        for j in 0..16 {
            if j != 5 {
                assert!(!bf.has(j), "bit {j} should be unset");
            }
        }
    }

    #[test]
    fn bitfield_byte_order_is_msb_first() {
        // bit 7 of byte 0 is piece 0.
        let bf = Bitfield::from_bytes(&[0b1000_0000]);
        assert!(bf.has(0));
        for j in 1..8 {
            assert!(!bf.has(j));
        }
    }

    #[test]
    fn have_out_of_range_is_rejected() {
        let mut bf = Bitfield::empty(4);
        assert!(bf.set_have(4).is_none());
    }

    proptest::proptest! {
        #[test]
        fn set_have_only_affects_target_bit(n in 1usize..200, k in 0usize..200) {
            proptest::prop_assume!(k < n);
            let mut bf = Bitfield::empty(n);
            bf.set_have(k).unwrap();
            for j in 0..n {
                proptest::prop_assert_eq!(bf.has(j), j == k);
            }
        }
    }
}
