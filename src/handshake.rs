//! The fixed 68-byte BitTorrent handshake:
//! `0x13 | "BitTorrent protocol" | 8 reserved zero bytes | info_hash(20) | peer_id(20)`.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::conf::HANDSHAKE_TIMEOUT;

const PSTR: &str = "BitTorrent protocol";

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("handshake I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer sent a zero-length protocol string")]
    EmptyPstr,
    #[error("info hash in peer's handshake did not match ours")]
    InfoHashMismatch,
}

/// Builds the 68-byte local handshake message.
pub fn build_handshake(info_hash: &[u8; 20], peer_id: &[u8; 20]) -> [u8; 68] {
    let mut buf = [0u8; 68];
    buf[0] = PSTR.len() as u8;
    buf[1..20].copy_from_slice(PSTR.as_bytes());
    // bytes 20..28 are the 8 reserved zero bytes, already zeroed.
    buf[28..48].copy_from_slice(info_hash);
    buf[48..68].copy_from_slice(peer_id);
    buf
}

/// Sends our handshake and validates the peer's response, applying a
/// 15-second deadline to the whole exchange. Returns the remote peer id.
pub fn perform(
    stream: &mut TcpStream,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
) -> Result<[u8; 20], HandshakeError> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let message = build_handshake(info_hash, peer_id);
    stream.write_all(&message)?;

    let mut pstrlen = [0u8; 1];
    stream.read_exact(&mut pstrlen)?;
    let pstrlen = pstrlen[0];
    if pstrlen == 0 {
        return Err(HandshakeError::EmptyPstr);
    }

    let mut rest = vec![0u8; pstrlen as usize + 48];
    stream.read_exact(&mut rest)?;

    let hash_start = pstrlen as usize + 8;
    let hash_end = hash_start + 20;
    if &rest[hash_start..hash_end] != info_hash {
        return Err(HandshakeError::InfoHashMismatch);
    }

    let mut remote_peer_id = [0u8; 20];
    remote_peer_id.copy_from_slice(&rest[rest.len() - 20..]);

    // download loop applies its own idle timeout; clear the handshake one.
    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)?;

    Ok(remote_peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_exactly_68_bytes_with_correct_layout() {
        let info_hash = [7u8; 20];
        let peer_id = [9u8; 20];
        let msg = build_handshake(&info_hash, &peer_id);
        assert_eq!(msg.len(), 68);
        assert_eq!(msg[0], 19);
        assert_eq!(&msg[1..20], PSTR.as_bytes());
        assert_eq!(&msg[20..28], &[0u8; 8]);
        assert_eq!(&msg[28..48], &info_hash);
        assert_eq!(&msg[48..68], &peer_id);
    }

    #[test]
    fn same_inputs_produce_identical_handshake() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];
        assert_eq!(
            build_handshake(&info_hash, &peer_id),
            build_handshake(&info_hash, &peer_id)
        );
    }
}
