//! The tracker client: announces to the tracker over HTTP and parses its
//! compact peer list. Out of the engine's core per spec §1, but needed to
//! discover a swarm to feed the scheduler.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use bencode::{Bencode, BencodeDictValues};

use crate::encoding::percent_encode_bytes;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed tracker response")]
    MalformedResponse,
    #[error("compact peer entry must be exactly 6 bytes, got {0}")]
    BadPeerEntry(usize),
}

/// A single peer entry from the tracker's compact peer list: 4-byte IPv4
/// address followed by a 2-byte big-endian port.
fn parse_compact_peer(bytes: &[u8]) -> Result<SocketAddr, TrackerError> {
    if bytes.len() != 6 {
        return Err(TrackerError::BadPeerEntry(bytes.len()));
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Talks to a single torrent's announce URL.
pub struct TrackerService {
    client: reqwest::blocking::Client,
    interval: Duration,
    tracker_url: String,
    last_updated: Instant,
    port: u16,
    url_encoded_info_hash: String,
    url_encoded_peer_id: String,
}

impl TrackerService {
    pub fn new(announce_url: &str, port: u16, info_hash: &[u8; 20], peer_id: &[u8; 20]) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            interval: Duration::default(),
            tracker_url: announce_url.to_string(),
            last_updated: Instant::now(),
            port,
            url_encoded_info_hash: percent_encode_bytes(info_hash),
            url_encoded_peer_id: percent_encode_bytes(peer_id),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    /// Announces to the tracker and returns the peers it advertises.
    pub fn get_peers(
        &mut self,
        uploaded: u64,
        downloaded: u64,
        left: u64,
    ) -> Result<Vec<SocketAddr>, TrackerError> {
        let query_params = [
            ("port", &self.port.to_string()),
            ("uploaded", &uploaded.to_string()),
            ("downloaded", &downloaded.to_string()),
            ("left", &left.to_string()),
            ("compact", &"1".to_string()),
        ];

        // info_hash and peer_id are already percent-encoded raw bytes;
        // appending them to the URL directly (rather than through
        // `.query`) avoids double-escaping their '%' characters.
        let request = self
            .client
            .get(format!(
                "{}?info_hash={}&peer_id={}",
                self.tracker_url, self.url_encoded_info_hash, self.url_encoded_peer_id
            ))
            .query(&query_params);

        let response = request.send()?.bytes()?;
        let (decoded, _) = Bencode::from_bytes(&response, |s| match s {
            "peers" => Some(6),
            _ => None,
        })
        .map_err(|_| TrackerError::MalformedResponse)?;

        let Bencode::Dict(table) = decoded else {
            return Err(TrackerError::MalformedResponse);
        };

        if let Some(BencodeDictValues::Bencode(Bencode::Number(n))) = table.get("interval") {
            self.interval = Duration::from_secs(*n as u64);
        }
        self.last_updated = Instant::now();

        match table.get("peers") {
            Some(BencodeDictValues::Bytes(entries)) => entries
                .iter()
                .map(|entry| parse_compact_peer(entry))
                .collect(),
            _ => Err(TrackerError::MalformedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_entry() {
        let addr = parse_compact_peer(&[192, 168, 0, 1, 0x1A, 0xE1]).unwrap();
        assert_eq!(addr, "192.168.0.1:6881".parse().unwrap());
    }

    #[test]
    fn rejects_malformed_peer_entry() {
        assert!(matches!(
            parse_compact_peer(&[1, 2, 3]),
            Err(TrackerError::BadPeerEntry(3))
        ));
    }
}
