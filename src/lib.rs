//! A BitTorrent v1 engine for downloading a single file: contact the
//! tracker, discover a peer swarm, and exchange the peer wire protocol with
//! many peers in parallel until every piece is retrieved, verified, and
//! reassembled.
//!
//! Uploading/seeding, multi-file torrents, UDP trackers, DHT, PEX, magnet
//! URIs, encryption, and resume state are out of scope (spec.md Non-goals).

pub mod conf;
pub mod encoding;
pub mod error;
pub mod handshake;
pub mod reassembler;
pub mod scheduler;
pub mod session;
pub mod torrent;
pub mod tracker;
pub mod wire;
pub mod worker;

use std::net::SocketAddr;
use std::path::Path;

use rand::Rng;

use crate::conf::LISTEN_PORT;
use crate::error::EngineError;
use crate::reassembler::{Progress, Reassembler};
use crate::scheduler::Scheduler;
use crate::torrent::Torrent;
use crate::tracker::TrackerService;

pub use crate::error::EngineError as Error;
pub use crate::error::Result;

/// Generates a fresh local peer id: 20 random bytes (spec §3's `ID`).
pub fn generate_peer_id() -> [u8; 20] {
    rand::thread_rng().gen()
}

/// Downloads the single file described by the metainfo at `torrent_path`:
/// announces to its tracker, discovers a peer swarm, and runs the download
/// engine to completion. `on_progress` is called after every piece commits.
pub fn download(torrent_path: &Path, on_progress: &mut dyn FnMut(Progress)) -> Result<Vec<u8>> {
    let torrent = Torrent::from_file(torrent_path)?;
    let info_hash = torrent.info_hash();
    let local_peer_id = generate_peer_id();
    let total_len = torrent.total_length();

    let mut tracker = TrackerService::new(
        torrent.announce.as_deref().unwrap_or_default(),
        LISTEN_PORT,
        &info_hash,
        &local_peer_id,
    );
    let peers = tracker.get_peers(0, 0, total_len as u64)?;
    log::info!("tracker returned {} peers", peers.len());

    run_swarm(
        &peers,
        info_hash,
        local_peer_id,
        torrent.piece_hashes().to_vec(),
        torrent.piece_length(),
        total_len,
        on_progress,
    )
}

/// Runs the swarm download engine proper (spec §2-§5): spawns one worker per
/// peer, feeds them from a shared scheduler, and reassembles verified pieces
/// into the output buffer. Split out from [`download`] so the engine can be
/// exercised directly against a known peer list, without a real tracker.
pub fn run_swarm(
    peers: &[SocketAddr],
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
    piece_hashes: Vec<[u8; 20]>,
    piece_len: usize,
    total_len: usize,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<Vec<u8>> {
    let piece_count = piece_hashes.len();
    let (scheduler, control) = Scheduler::new(piece_count, piece_len, total_len);

    let handles: Vec<_> = peers
        .iter()
        .copied()
        .map(|addr| {
            let scheduler = scheduler.clone();
            let piece_hashes = piece_hashes.clone();
            std::thread::spawn(move || {
                worker::run_worker(addr, info_hash, local_peer_id, piece_hashes, scheduler)
            })
        })
        .collect();
    // Drop our own handle so that, if no peer worker is ever spawned (or
    // all of them exit immediately), the result channel disconnects
    // instead of hanging forever.
    drop(scheduler);

    let reassembler = Reassembler::new(total_len, piece_len, piece_count);
    let result: std::result::Result<Vec<u8>, EngineError> = reassembler
        .run(control, |progress| {
            log::info!(
                "{:.2}% downloaded ({}/{} pieces)",
                progress.percent(),
                progress.done,
                progress.total
            );
            on_progress(progress);
        })
        .map_err(EngineError::from);

    for handle in handles {
        let _ = handle.join();
    }

    result
}
