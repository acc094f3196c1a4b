//! `Encoder` with per-segment IDR gate.
//!
//! Real codec/mux internals (bitstream encode, NAL structure, PES framing)
//! are a collaborator concern; this crate owns only the gate that decides
//! when a raw frame's encoded packet may leave the encoder. A segment's
//! video output is held back until its first keyframe arrives; audio for a
//! gated segment is buffered rather than muxed so that once the gate opens,
//! both streams resume in lockstep.

use std::collections::VecDeque;

use crate::model::{AudioFrame, Frame};

/// One encoded output unit. Real encoder/mux internals (bitstream, NAL
/// structure, PES framing) are out of scope here - `Packet` carries only
/// what the IDR gate and `OutputBus` need to reason about.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: std::sync::Arc<[u8]>,
    pub pts_us: i64,
    pub is_keyframe: bool,
    pub is_audio: bool,
}

/// Encodes raw frames into a keyframe-sealed packet stream, holding back
/// video until the first IDR of each segment.
pub struct Encoder {
    first_keyframe_emitted: bool,
    pending_audio: VecDeque<AudioFrame>,
    gate_violations: u64,
}

impl Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            first_keyframe_emitted: false,
            pending_audio: VecDeque::new(),
            gate_violations: 0,
        }
    }

    /// Signals a segment transition: re-arms the gate so the new segment
    /// must again start with a keyframe before video is released.
    pub fn reset_output_timing(&mut self) {
        self.first_keyframe_emitted = false;
    }

    /// Encodes one video frame (with its accompanying audio). Returns the
    /// video packet only if the gate is open (or this frame opens it); its
    /// accompanying audio is released alongside it once the gate is open,
    /// otherwise queued. A non-keyframe arriving while the gate is shut is
    /// discarded and logged as a gate-boundary violation.
    pub fn encode(&mut self, frame: &Frame) -> Vec<Packet> {
        let mut packets = Vec::new();

        if !self.first_keyframe_emitted && !frame.is_keyframe {
            self.gate_violations += 1;
            tracing::warn!(
                block_id = %frame.block_id,
                pts_us = frame.pts_us,
                "IDR gate: non-keyframe discarded before first segment keyframe"
            );
            for audio in &frame.audio {
                self.pending_audio.push_back(audio.clone());
            }
            return packets;
        }

        if frame.is_keyframe {
            self.first_keyframe_emitted = true;
        }

        packets.push(Packet {
            payload: std::sync::Arc::clone(&frame.payload),
            pts_us: frame.pts_us,
            is_keyframe: frame.is_keyframe,
            is_audio: false,
        });

        for audio in &frame.audio {
            self.pending_audio.push_back(audio.clone());
        }
        while let Some(audio) = self.pending_audio.pop_front() {
            packets.push(Packet {
                payload: audio.payload,
                pts_us: audio.pts_us,
                is_keyframe: false,
                is_audio: true,
            });
        }

        packets
    }

    /// Whether the gate is currently open (a keyframe has been seen for the
    /// current segment).
    #[must_use]
    pub fn gate_open(&self) -> bool {
        self.first_keyframe_emitted
    }

    /// Count of non-keyframe packets discarded while the gate was shut, for
    /// metrics/diagnostics.
    #[must_use]
    pub fn gate_violations(&self) -> u64 {
        self.gate_violations
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
