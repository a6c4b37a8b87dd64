//! The shared piece work queue: a bounded multi-producer multi-consumer
//! channel of pending jobs, plus the many-to-one channel verified pieces are
//! reported back on. Requeueing a job is just sending it back into the same
//! queue; there's no separate shared mutable set (spec §9's design note —
//! the queue alone is sufficient, and the race it leaves open is tolerated
//! per spec §5's race note).
//!
//! Cancellation is a dedicated broadcast channel rather than closing the job
//! queue out from under workers: every worker selects on both the job queue
//! and the cancel channel, so closing the cancel channel wakes every worker
//! blocked in `take` at once (spec §5: "use non-blocking send or a
//! cancellation signal").

use crossbeam::channel::{self, Receiver, Sender};

/// One piece's worth of work: which piece, and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceJob {
    pub index: usize,
    pub length: usize,
}

/// A verified, fully-downloaded piece ready for the reassembler.
pub struct VerifiedPiece {
    pub index: usize,
    pub data: Vec<u8>,
}

/// Computes the length of piece `index` out of `piece_count` pieces given
/// nominal piece length `piece_len` and total file length `total_len`.
///
/// Every piece but the last is exactly `piece_len`; the last piece carries
/// the remainder. This is the corrected formula `L - (N-1)*P` (spec §9
/// flags an off-by-one variant, `L - (N-2)*P`, as a defect, not a behavior
/// to emulate).
pub fn piece_length(
    index: usize,
    piece_count: usize,
    piece_len: usize,
    total_len: usize,
) -> usize {
    if index == piece_count - 1 {
        total_len - (piece_count - 1) * piece_len
    } else {
        piece_len
    }
}

/// The piece work queue. Cloning a `Scheduler` gives another handle onto the
/// same underlying channels, which is how each peer worker gets its own
/// handle without sharing mutable state directly.
#[derive(Clone)]
pub struct Scheduler {
    jobs_tx: Sender<PieceJob>,
    jobs_rx: Receiver<PieceJob>,
    results_tx: Sender<VerifiedPiece>,
    cancel_rx: Receiver<()>,
}

/// The reassembler/orchestrator's handle: the receiving end of the
/// verified-piece channel and the sending end of the cancellation broadcast.
pub struct Control {
    results_rx: Receiver<VerifiedPiece>,
    cancel_tx: Sender<()>,
}

impl Scheduler {
    /// Builds a scheduler pre-loaded with exactly `piece_count` jobs
    /// (spec §4.D: "At startup, exactly N jobs are enqueued").
    pub fn new(piece_count: usize, piece_len: usize, total_len: usize) -> (Self, Control) {
        let (jobs_tx, jobs_rx) = channel::bounded(piece_count);
        let (results_tx, results_rx) = channel::unbounded();
        let (cancel_tx, cancel_rx) = channel::bounded(0);

        for index in 0..piece_count {
            let length = piece_length(index, piece_count, piece_len, total_len);
            jobs_tx
                .send(PieceJob { index, length })
                .expect("receiver still held by self");
        }

        (
            Self {
                jobs_tx,
                jobs_rx,
                results_tx,
                cancel_rx,
            },
            Control {
                results_rx,
                cancel_tx,
            },
        )
    }

    /// Blocks until a job is available, the queue is cancelled, or every
    /// producer has gone away. Returns `None` in the latter two cases, which
    /// a worker should treat as "nothing left to do, exit".
    pub fn take(&self) -> Option<PieceJob> {
        channel::select! {
            recv(self.jobs_rx) -> job => job.ok(),
            recv(self.cancel_rx) -> _ => None,
        }
    }

    /// Puts a job back into the queue. Used on every failure path: peer
    /// lacks the piece, I/O failure, or hash mismatch.
    pub fn requeue(&self, job: PieceJob) {
        // Every worker still holds a receiver clone for the lifetime of the
        // queue, so this can only fail after cancellation, at which point
        // there's nowhere left that would have picked the job up anyway.
        let _ = self.jobs_tx.send(job);
    }

    /// Reports a piece as verified. Errors (receiver gone, i.e. the
    /// reassembler already finished) are swallowed: a late, redundant commit
    /// after completion is not an error per spec §5's race note.
    pub fn commit(&self, piece: VerifiedPiece) {
        let _ = self.results_tx.send(piece);
    }
}

impl Control {
    /// Blocks until the next verified piece arrives, or `None` once every
    /// worker's `Scheduler` handle has been dropped.
    pub fn recv(&self) -> Option<VerifiedPiece> {
        self.results_rx.recv().ok()
    }

    /// Broadcasts cancellation to every worker blocked in `Scheduler::take`.
    /// Consumes self: cancellation happens exactly once, when the
    /// reassembler has all `N` pieces.
    pub fn cancel(self) {
        drop(self.cancel_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueues_exactly_piece_count_jobs() {
        let (scheduler, _control) = Scheduler::new(4, 10, 35);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(scheduler.take().unwrap().index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn requeue_makes_a_job_available_again() {
        let (scheduler, _control) = Scheduler::new(1, 10, 10);
        let job = scheduler.take().unwrap();
        scheduler.requeue(job);
        let job_again = scheduler.take().unwrap();
        assert_eq!(job_again, job);
    }

    #[test]
    fn commit_is_observed_on_the_result_sink() {
        let (scheduler, control) = Scheduler::new(1, 5, 5);
        scheduler.commit(VerifiedPiece {
            index: 0,
            data: b"hello".to_vec(),
        });
        let piece = control.recv().unwrap();
        assert_eq!(piece.index, 0);
        assert_eq!(piece.data, b"hello");
    }

    #[test]
    fn cancel_wakes_a_blocked_take() {
        let (scheduler, control) = Scheduler::new(0, 10, 0);
        let worker = scheduler.clone();
        let handle = std::thread::spawn(move || worker.take());
        std::thread::sleep(std::time::Duration::from_millis(50));
        control.cancel();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn last_piece_carries_the_remainder() {
        // L=35, P=10 => N=4, last piece length 5.
        assert_eq!(piece_length(0, 4, 10, 35), 10);
        assert_eq!(piece_length(1, 4, 10, 35), 10);
        assert_eq!(piece_length(2, 4, 10, 35), 10);
        assert_eq!(piece_length(3, 4, 10, 35), 5);
    }

    proptest::proptest! {
        #[test]
        fn piece_lengths_always_sum_to_total(p in 1usize..1024, n in 1usize..64) {
            let total = (n - 1) * p + 1 + (p.saturating_sub(1));
            // total is in [(n-1)*p + 1, n*p]
            let sum: usize = (0..n).map(|i| piece_length(i, n, p, total)).sum();
            proptest::prop_assert_eq!(sum, total);
            for i in 0..n {
                let len = piece_length(i, n, p, total);
                proptest::prop_assert!(len > 0 && len <= p);
            }
        }
    }
}
