//! `TcpSink`: delivers encoded TS bytes over a plain TCP connection.
//!
//! `Sink::write` is called synchronously from the tick loop's dedicated
//! thread, which must never suspend on an async runtime or block on a slow
//! reader - a stalled downstream peer that fills the OS send buffer would
//! otherwise freeze tick pacing, fence swaps, and evidence emission for the
//! whole session. The actual blocking `write_all` therefore never runs on
//! the tick thread: `write` only enqueues onto a bounded queue and a single
//! dedicated writer thread drains it to the socket, mirroring
//! [`crate::events::spool::EvidenceSpool`]'s append/writer-thread split.
//! Backpressure reuses [`Hysteresis`] - bytes are counted in flight from
//! enqueue until the writer thread finishes writing them, so the
//! high/low-water marks reflect the socket's actual backlog rather than
//! going inert the instant `write` returns.

use std::collections::VecDeque;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::sink::{Hysteresis, Sink, ThrottleState};
use crate::error::CoreResult;

/// A sink that writes encoded bytes to a connected TCP peer from a
/// dedicated writer thread.
pub struct TcpSink {
    queue: Mutex<VecDeque<Vec<u8>>>,
    queue_not_empty: Condvar,
    hysteresis: Hysteresis,
    last_accepted_us: AtomicI64,
    stop: Arc<AtomicBool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl TcpSink {
    /// Connects to `addr` and starts the dedicated writer thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection cannot be established or
    /// `set_nodelay` fails - a Nagle-delayed TS stream would violate the
    /// PCR continuity expectations downstream decoders rely on.
    pub fn connect(addr: &str, high_water: usize, low_water: usize) -> CoreResult<Arc<Self>> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let sink = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            queue_not_empty: Condvar::new(),
            hysteresis: Hysteresis::new(high_water, low_water),
            last_accepted_us: AtomicI64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
        });
        sink.clone().start_writer(stream);
        Ok(sink)
    }

    #[must_use]
    pub fn throttle_state(&self) -> ThrottleState {
        self.hysteresis.state()
    }

    fn start_writer(self: Arc<Self>, stream: TcpStream) {
        let sink = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("blockplan-tcp-sink-writer".into())
            .spawn(move || sink.writer_loop(stream))
            .expect("failed to spawn tcp sink writer thread");
        *self.writer.lock() = Some(handle);
    }

    fn writer_loop(self: Arc<Self>, mut stream: TcpStream) {
        loop {
            let chunk = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(chunk) = queue.pop_front() {
                        break Some(chunk);
                    }
                    if self.stop.load(Ordering::SeqCst) {
                        break None;
                    }
                    self.queue_not_empty.wait_for(&mut queue, Duration::from_millis(200));
                }
            };
            let Some(chunk) = chunk else {
                if self.stop.load(Ordering::SeqCst) && self.queue.lock().is_empty() {
                    return;
                }
                continue;
            };
            let len = chunk.len();
            if let Err(err) = stream.write_all(&chunk) {
                tracing::warn!(error = %err, "tcp sink: write failed, dropping remaining queue");
                self.hysteresis.record_drain(len);
                continue;
            }
            self.hysteresis.record_drain(len);
            let now_us = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0);
            self.last_accepted_us.store(now_us, Ordering::SeqCst);
        }
    }

    /// Stops the writer thread after draining whatever is already queued.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue_not_empty.notify_all();
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Sink for TcpSink {
    fn write(&self, bytes: &[u8]) -> CoreResult<bool> {
        if self.hysteresis.would_exceed_high_water(bytes.len()) {
            return Ok(false);
        }
        self.hysteresis.record_enqueue(bytes.len());
        self.queue.lock().push_back(bytes.to_vec());
        self.queue_not_empty.notify_one();
        Ok(true)
    }

    fn idle_us(&self, now_us: i64) -> i64 {
        (now_us - self.last_accepted_us.load(Ordering::SeqCst)).max(0)
    }
}
