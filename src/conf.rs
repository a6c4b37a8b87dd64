//! Engine-wide tuning knobs, grouped in one place instead of scattered as
//! magic numbers through the worker and session code.

use std::time::Duration;

/// The port we announce to the tracker. We never accept inbound
/// connections (spec.md Non-goals: no seeding), so this is nominal.
pub const LISTEN_PORT: u16 = 6881;

/// Maximum number of outstanding `REQUEST`s a worker keeps in flight for a
/// single peer at once (spec §5, `MaxBacklog`).
pub const MAX_BACKLOG: usize = 5;

/// Maximum number of bytes requested in one block (spec §5,
/// `MaxRequestLength`). Asking for more invites the remote to disconnect us.
pub const BLOCK_LEN: usize = 16384;

/// Sanity bound on a single frame's declared length. Guards against treating
/// a garbled length prefix as an allocation request.
pub const MAX_FRAME_LEN: u32 = BLOCK_LEN as u32 + 13;

/// Timeout for the initial TCP connect to a peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline applied to both sides of the handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Idle read timeout applied once the download loop is underway. The source
/// material doesn't mandate a figure here; 30s is a generous default that
/// still catches a peer that's gone silent.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
