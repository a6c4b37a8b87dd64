//! The crate-level error type returned by the public [`crate::download`]
//! entry point. Per-worker and per-job failures are absorbed and logged
//! where they happen (spec §7's propagation policy); only "no progress
//! possible" ever reaches here.

use crate::reassembler::ReassemblerError;
use crate::torrent::TorrentError;
use crate::tracker::TrackerError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("failed to load torrent: {0}")]
    Torrent(#[from] TorrentError),
    #[error("failed to contact tracker: {0}")]
    Tracker(#[from] TrackerError),
    #[error("download could not complete: {0}")]
    Incomplete(#[from] ReassemblerError),
    #[error("failed to write output file: {0}")]
    Output(#[source] std::io::Error),
}
