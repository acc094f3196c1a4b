//! Bounded A/V lookahead with asymmetric backpressure.
//!
//! Video and audio each get their own bounded FIFO. Video backpressure is
//! lossy (the fill thread may drop the oldest pending frame); audio
//! backpressure blocks the producer and never discards a sample. The two
//! queues additionally enforce the A-V delta bound: `audio_count -
//! video_count <= 1` at every push decision.
//!
//! `FrameBuffer` is single-producer (the fill thread), single-consumer (the
//! tick loop).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::model::{AudioFrame, Frame};

/// Outcome of a non-blocking video push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPushOutcome {
    /// The frame was appended without dropping anything.
    Pushed,
    /// The buffer was full; the oldest pending frame was dropped to make
    /// room for the new one.
    Full,
}

/// Bounded, lossy FIFO of decoded video frames.
pub struct VideoLookahead {
    capacity: usize,
    queue: Mutex<VecDeque<Frame>>,
    dropped: AtomicUsize,
}

impl VideoLookahead {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "video lookahead capacity must be > 0");
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Appends a frame. Never blocks. If the buffer is already at capacity,
    /// drops the oldest pending frame to make room and reports
    /// [`VideoPushOutcome::Full`] so the caller can count the drop.
    pub fn try_push(&self, frame: Frame) -> VideoPushOutcome {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            queue.push_back(frame);
            VideoPushOutcome::Full
        } else {
            queue.push_back(frame);
            VideoPushOutcome::Pushed
        }
    }

    /// Pops the oldest frame. Returns `None` on underflow - never fabricates
    /// a frame.
    pub fn pop(&self) -> Option<Frame> {
        self.queue.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames dropped over the lifetime of this buffer.
    #[must_use]
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO of decoded audio frames. Push blocks while full; audio is
/// never discarded as a consequence of overflow.
pub struct AudioLookahead {
    capacity: usize,
    queue: Mutex<VecDeque<AudioFrame>>,
    not_full: Condvar,
}

impl AudioLookahead {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "audio lookahead capacity must be > 0");
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Condvar::new(),
        }
    }

    /// Appends a frame, blocking the calling (fill) thread while the buffer
    /// is at capacity. Audio is never dropped.
    pub fn push(&self, frame: AudioFrame) {
        let mut queue = self.queue.lock();
        while queue.len() >= self.capacity {
            self.not_full.wait(&mut queue);
        }
        queue.push_back(frame);
    }

    /// Pops the oldest frame. Returns `None` on underflow - never injects
    /// silence; that is the caller's (pad path's) responsibility.
    pub fn pop(&self) -> Option<AudioFrame> {
        let mut queue = self.queue.lock();
        let frame = queue.pop_front();
        if frame.is_some() {
            drop(queue);
            self.not_full.notify_one();
        }
        frame
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paired video/audio lookahead for one session, with the A-V delta bound
/// enforced at the push boundary.
pub struct FrameBuffer {
    pub video: VideoLookahead,
    pub audio: AudioLookahead,
    video_produced: AtomicUsize,
    audio_produced: AtomicUsize,
}

impl FrameBuffer {
    /// `capacity_video` should target about one second of lookahead at
    /// output FPS; `capacity_audio` is sized independently per house audio
    /// format.
    #[must_use]
    pub fn new(capacity_video: usize, capacity_audio: usize) -> Self {
        Self {
            video: VideoLookahead::new(capacity_video),
            audio: AudioLookahead::new(capacity_audio),
            video_produced: AtomicUsize::new(0),
            audio_produced: AtomicUsize::new(0),
        }
    }

    /// Whether the fill thread may attempt an audio push right now without
    /// violating the A-V delta bound (`audio_count - video_count <= 1`).
    /// The fill thread must consult this *before* calling
    /// [`AudioLookahead::push`] - it must not attempt the push at all if it
    /// would violate the bound, rather than pushing and then discarding.
    #[must_use]
    pub fn can_push_audio(&self) -> bool {
        let video = self.video_produced.load(Ordering::Acquire);
        let audio = self.audio_produced.load(Ordering::Acquire);
        audio <= video
    }

    /// Records a successful video push for delta accounting and forwards to
    /// the underlying buffer.
    pub fn push_video(&self, frame: Frame) -> VideoPushOutcome {
        let outcome = self.video.try_push(frame);
        self.video_produced.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Blocks (per [`AudioLookahead::push`]) until there is room, then
    /// records the push for delta accounting. Callers must have already
    /// checked [`Self::can_push_audio`].
    pub fn push_audio(&self, frame: AudioFrame) {
        self.audio.push(frame);
        self.audio_produced.fetch_add(1, Ordering::AcqRel);
    }

    /// Current `audio_count - video_count`, for the delta-bound property test and
    /// diagnostics.
    #[must_use]
    pub fn av_delta(&self) -> i64 {
        self.audio_produced.load(Ordering::Acquire) as i64
            - self.video_produced.load(Ordering::Acquire) as i64
    }

    /// Blocks the calling thread until there is room to push audio,
    /// respecting the A-V delta bound, with a bounded poll interval. Used by
    /// the fill thread's honor-the-delta loop instead of a busy spin.
    pub fn wait_for_audio_room(&self, poll: Duration) {
        while !self.can_push_audio() {
            std::thread::sleep(poll);
        }
    }
}
