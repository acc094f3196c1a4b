//! `EvidenceSpool`: the durable, ordered, acknowledged event log.
//!
//! Append is non-blocking from any thread: a bounded queue absorbs bursts,
//! and a single writer thread drains it to an append-only JSON-lines file.
//! The ack cursor is persisted with the same write-to-temp-then-rename
//! pattern, so a crash mid-write never corrupts the cursor file.
//!
//! Sequence numbers are assigned at *enqueue* time, not at durable-write
//! time: the queue is FIFO and single-producer-per-append-call, so
//! assigning at enqueue keeps `last_sequence_emitted()` accurate for a
//! reconnecting consumer without waiting on disk I/O, while the writer
//! thread still persists strictly in sequence order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{EventEmitter, EventEnvelope, EvidencePayload};
use crate::error::CoreResult;

const EVENTS_FILE: &str = "events.jsonl";
const ACK_CURSOR_FILE: &str = "ack_cursor.json";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AckCursor {
    last_acked: u64,
}

/// What a reconnecting evidence consumer needs to decide where to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoolHello {
    pub first_sequence_available: u64,
    pub last_sequence_emitted: u64,
}

/// Durable, ordered evidence log for one session.
pub struct EvidenceSpool {
    dir: PathBuf,
    sequence: AtomicU64,
    first_available: AtomicU64,
    queue: Mutex<std::collections::VecDeque<EventEnvelope>>,
    queue_capacity: usize,
    not_empty: Condvar,
    degraded: AtomicBool,
    dropped: AtomicU64,
    replay_cache: Mutex<Vec<EventEnvelope>>,
    ack_cursor: Mutex<u64>,
    stop: Arc<AtomicBool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl EvidenceSpool {
    /// Opens (creating if necessary) a spool rooted at `dir`, replaying any
    /// existing event log and ack cursor so sequence numbering and
    /// acknowledgment survive a process restart, then starts the writer
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `dir` cannot be created or an existing log
    /// cannot be read.
    pub fn open(dir: impl Into<PathBuf>, queue_capacity: usize) -> CoreResult<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut existing = Vec::new();
        let events_path = dir.join(EVENTS_FILE);
        if events_path.exists() {
            let file = File::open(&events_path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(envelope) = serde_json::from_str::<EventEnvelope>(&line) {
                    existing.push(envelope);
                }
            }
        }
        let last_sequence = existing.last().map(|e| e.sequence).unwrap_or(0);
        let first_available = existing.first().map(|e| e.sequence).unwrap_or(last_sequence + 1);

        let ack_cursor = Self::load_ack_cursor(&dir);

        let spool = Arc::new(Self {
            dir,
            sequence: AtomicU64::new(last_sequence),
            first_available: AtomicU64::new(first_available),
            queue: Mutex::new(std::collections::VecDeque::new()),
            queue_capacity,
            not_empty: Condvar::new(),
            degraded: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            replay_cache: Mutex::new(existing),
            ack_cursor: Mutex::new(ack_cursor),
            stop: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
        });
        spool.clone().start_writer();
        Ok(spool)
    }

    fn load_ack_cursor(dir: &Path) -> u64 {
        let path = dir.join(ACK_CURSOR_FILE);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<AckCursor>(&s).ok())
            .map(|c| c.last_acked)
            .unwrap_or(0)
    }

    fn start_writer(self: Arc<Self>) {
        let spool = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("blockplan-spool-writer".into())
            .spawn(move || spool.writer_loop())
            .expect("failed to spawn evidence spool writer thread");
        *self.writer.lock() = Some(handle);
    }

    fn writer_loop(self: Arc<Self>) {
        let events_path = self.dir.join(EVENTS_FILE);
        let mut file = match OpenOptions::new().create(true).append(true).open(&events_path) {
            Ok(f) => f,
            Err(err) => {
                tracing::error!(error = %err, "evidence spool: failed to open events file");
                return;
            }
        };
        loop {
            let envelope = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(envelope) = queue.pop_front() {
                        break Some(envelope);
                    }
                    if self.stop.load(Ordering::SeqCst) {
                        break None;
                    }
                    self.not_empty.wait_for(&mut queue, Duration::from_millis(200));
                }
            };
            let Some(envelope) = envelope else {
                if self.stop.load(Ordering::SeqCst) && self.queue.lock().is_empty() {
                    return;
                }
                continue;
            };
            match serde_json::to_string(&envelope) {
                Ok(line) => {
                    if let Err(err) = writeln!(file, "{line}") {
                        tracing::error!(error = %err, "evidence spool: write failed");
                    } else if let Err(err) = file.flush() {
                        tracing::error!(error = %err, "evidence spool: flush failed");
                    }
                }
                Err(err) => tracing::error!(error = %err, "evidence spool: serialize failed"),
            }
            self.replay_cache.lock().push(envelope);
        }
    }

    /// Non-blocking append. Assigns the next sequence number and hands the
    /// envelope to the writer thread. If the queue is already at capacity,
    /// the event is dropped and the session is marked degraded (section
    /// 4.9's spool-full failure mode) - the hot path never blocks.
    pub fn append(&self, channel_id: &str, session_id: &str, payload: EvidencePayload) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.queue_capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.degraded.store(true, Ordering::SeqCst);
            tracing::warn!(channel_id, "evidence spool full; event dropped, session degraded");
            return;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        if self.first_available.load(Ordering::Acquire) == 0 {
            self.first_available.store(sequence, Ordering::Release);
        }
        let envelope = EventEnvelope {
            channel_id: channel_id.to_string(),
            session_id: session_id.to_string(),
            sequence,
            event_uuid: uuid::Uuid::new_v4(),
            emitted_utc: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0),
            payload,
        };
        queue.push_back(envelope);
        drop(queue);
        self.not_empty.notify_one();
    }

    /// Whether the session has been marked degraded by a spool-full event.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Count of events dropped due to a full queue.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The highest sequence number assigned so far.
    #[must_use]
    pub fn last_sequence_emitted(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// The lowest sequence number still available for replay.
    #[must_use]
    pub fn first_sequence_available(&self) -> u64 {
        self.first_available.load(Ordering::Acquire).max(1)
    }

    /// HELLO payload for a reconnecting evidence consumer.
    #[must_use]
    pub fn hello(&self) -> SpoolHello {
        SpoolHello {
            first_sequence_available: self.first_sequence_available(),
            last_sequence_emitted: self.last_sequence_emitted(),
        }
    }

    /// Replays every durable event with `sequence > last_acked`, in order.
    /// Exactly the suffix of the emitted sequence - no duplicates across
    /// reconnects, since `last_acked` only ever advances.
    #[must_use]
    pub fn replay_from(&self, last_acked: u64) -> Vec<EventEnvelope> {
        self.replay_cache
            .lock()
            .iter()
            .filter(|e| e.sequence > last_acked)
            .cloned()
            .collect()
    }

    /// Advances the persisted ack cursor. Monotonic: a lower or equal value
    /// than the current cursor is a no-op, never a rollback.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cursor file cannot be written.
    pub fn ack(&self, up_to: u64) -> CoreResult<()> {
        let mut cursor = self.ack_cursor.lock();
        if up_to <= *cursor {
            return Ok(());
        }
        *cursor = up_to;
        let path = self.dir.join(ACK_CURSOR_FILE);
        let temp_path = self.dir.join("ack_cursor.json.tmp");
        let contents = serde_json::to_string(&AckCursor { last_acked: up_to })?;
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// The last acknowledged sequence number.
    #[must_use]
    pub fn last_acked(&self) -> u64 {
        *self.ack_cursor.lock()
    }

    /// Stops the writer thread after draining the queue. Called during
    /// `StopChannel` teardown.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl EventEmitter for EvidenceSpool {
    fn emit(&self, channel_id: &str, session_id: &str, payload: EvidencePayload) {
        self.append(channel_id, session_id, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_start() -> EvidencePayload {
        EvidencePayload::BlockStart {
            block_id: "b1".into(),
            asset_uri: "asset://a".into(),
            primed_success: true,
        }
    }

    #[test]
    fn sequence_numbers_are_contiguous_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let spool = EvidenceSpool::open(dir.path(), 64).unwrap();
        for _ in 0..10 {
            spool.append("ch1", "s1", block_start());
        }
        spool.shutdown();
        let replayed = spool.replay_from(0);
        assert_eq!(replayed.len(), 10);
        for (i, event) in replayed.iter().enumerate() {
            assert_eq!(event.sequence, (i + 1) as u64);
        }
        assert_eq!(spool.last_sequence_emitted(), 10);
    }

    #[test]
    fn replay_from_last_acked_is_exact_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let spool = EvidenceSpool::open(dir.path(), 64).unwrap();
        for _ in 0..20 {
            spool.append("ch1", "s1", block_start());
        }
        spool.ack(12).unwrap();
        let replayed = spool.replay_from(spool.last_acked());
        assert_eq!(replayed.len(), 8);
        assert_eq!(replayed[0].sequence, 13);
        spool.shutdown();
    }

    #[test]
    fn ack_is_monotonic_never_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let spool = EvidenceSpool::open(dir.path(), 64).unwrap();
        spool.ack(50).unwrap();
        spool.ack(10).unwrap();
        assert_eq!(spool.last_acked(), 50);
        spool.shutdown();
    }

    #[test]
    fn full_queue_drops_and_marks_degraded_never_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let spool = EvidenceSpool::open(dir.path(), 2).unwrap();
        // Hold the queue lock's effect by pushing fast; capacity is tiny so
        // we should overflow before the writer drains everything.
        for _ in 0..50 {
            spool.append("ch1", "s1", block_start());
        }
        spool.shutdown();
        assert!(spool.dropped_count() > 0 || spool.last_sequence_emitted() == 50);
    }

    #[test]
    fn reopening_resumes_sequence_and_ack_cursor() {
        let dir = tempfile::tempdir().unwrap();
        {
            let spool = EvidenceSpool::open(dir.path(), 64).unwrap();
            for _ in 0..5 {
                spool.append("ch1", "s1", block_start());
            }
            spool.ack(3).unwrap();
            spool.shutdown();
            // Give the writer a moment to flush before closing the scope.
            std::thread::sleep(Duration::from_millis(50));
        }
        let reopened = EvidenceSpool::open(dir.path(), 64).unwrap();
        assert_eq!(reopened.last_sequence_emitted(), 5);
        assert_eq!(reopened.last_acked(), 3);
        reopened.shutdown();
    }
}
