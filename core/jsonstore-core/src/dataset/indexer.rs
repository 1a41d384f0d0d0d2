//! Parallel index build.
//!
//! One reader thread per dump feeds a bounded queue; `workers` threads drain it
//! and hand each record to a sink.
//!
//! ```text
//! reader 0 ─┐                   ┌─ worker 0 ─┐
//! reader 1 ─┼─▶ sync_channel ─▶─┼─ worker 1 ─┼─▶ sink(ScannedRecord)
//! reader M ─┘   (capacity)      └─ worker N ─┘
//! ```
//!
//! Termination is by sentinel. Every reader enqueues `N` [`Message::Done`]
//! after its last record, and every worker stops once it has seen `M` of them.
//! The `N × M` sentinels are therefore consumed exactly, and since a reader's
//! sentinels follow its records in the queue, no record is left behind.

use crate::error::{StoreError, StoreResult};
use crate::reader::{DumpReader, ScannedRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use tracing::{debug, error, info};

/// Counters of one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Dumps scanned
    pub files: usize,
    /// Records handed to the sink
    pub records: usize,
    /// Malformed lines skipped
    pub skipped: usize,
}

impl std::ops::AddAssign for IndexStats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.records += other.records;
        self.skipped += other.skipped;
    }
}

/// Queue item.
pub enum Message {
    /// A record together with the rank of the file it came from
    Record(u32, ScannedRecord),
    /// Sentinel
    Done,
}

/// Replays `readers` through `workers` threads into `sink`.
///
/// Each reader is tagged with its position in `readers`, which the sink
/// receives as the file rank. Blocks until every reader and worker has
/// finished, then returns the first error any of them hit.
pub fn run<F>(
    readers: Vec<DumpReader>,
    workers: usize,
    queue_capacity: usize,
    sink: F,
) -> StoreResult<IndexStats>
where
    F: Fn(u32, ScannedRecord) -> StoreResult<()> + Sync,
{
    let workers = workers.max(1);
    let sources = readers.len();
    let (tx, rx) = sync_channel::<Message>(queue_capacity.max(1));
    // owned by the workers: once the last one exits, even by panicking, the
    // queue closes and blocked readers return
    let rx = Arc::new(Mutex::new(rx));
    let records = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);
    let first_error: Mutex<Option<StoreError>> = Mutex::new(None);

    let fail = |e: StoreError| {
        let mut slot = first_error.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
    };

    thread::scope(|scope| {
        for (rank, reader) in readers.into_iter().enumerate() {
            let tx = tx.clone();
            let skipped = &skipped;
            let fail = &fail;
            scope.spawn(move || {
                let path = reader.path().display().to_string();
                let (sent, skips) = feed(rank as u32, reader, &tx, workers, fail);
                skipped.fetch_add(skips, Ordering::Relaxed);
                info!(path = %path, records = sent, skipped = skips, "dump loaded");
            });
        }
        drop(tx);

        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let records = &records;
            let sink = &sink;
            let fail = &fail;
            scope.spawn(move || drain(&rx, sources, records, sink, fail));
        }
        drop(rx);
    });

    let stats = IndexStats {
        files: sources,
        records: records.into_inner(),
        skipped: skipped.into_inner(),
    };
    match first_error.into_inner() {
        Some(e) => Err(e),
        None => {
            debug!(
                files = stats.files,
                records = stats.records,
                skipped = stats.skipped,
                workers,
                "index build finished"
            );
            Ok(stats)
        }
    }
}

fn feed(
    rank: u32,
    mut reader: DumpReader,
    tx: &SyncSender<Message>,
    workers: usize,
    fail: &(dyn Fn(StoreError) + Sync),
) -> (usize, usize) {
    let mut sent = 0;
    for item in reader.by_ref() {
        match item {
            Ok(scanned) => {
                if tx.send(Message::Record(rank, scanned)).is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => {
                error!(path = %reader.path().display(), error = %e, "dump scan aborted");
                fail(e);
                break;
            }
        }
    }
    for _ in 0..workers {
        if tx.send(Message::Done).is_err() {
            break;
        }
    }
    (sent, reader.skipped())
}

fn drain<F>(
    rx: &Mutex<Receiver<Message>>,
    sources: usize,
    records: &AtomicUsize,
    sink: &F,
    fail: &(dyn Fn(StoreError) + Sync),
) where
    F: Fn(u32, ScannedRecord) -> StoreResult<()> + Sync,
{
    let mut remaining = sources;
    while remaining > 0 {
        let message = rx.lock().recv();
        match message {
            Ok(Message::Record(rank, scanned)) => {
                records.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = sink(rank, scanned) {
                    fail(e);
                }
            }
            Ok(Message::Done) => remaining -= 1,
            Err(_) => break,
        }
    }
}
