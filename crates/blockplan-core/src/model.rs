//! Data model: blocks, plans, frames, and the session-immutable house format.
//!
//! None of these types carry behavior beyond derivation of the fence
//! schedule - the executor (`pipeline` module) owns all mutable state and
//! timing decisions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::timebase::RationalFps;

/// A single cut-point inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub event_id: String,
    pub segment_index: u32,
    pub duration_frames: i64,
}

/// A unit of scheduled playback: a contiguous range of frames drawn from one
/// asset, to be played at a known point in the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub block_id: String,
    pub asset_uri: String,
    pub start_frame_in_asset: i64,
    pub frame_count: i64,
    pub input_fps: RationalFps,
    pub segments: Vec<Segment>,
}

impl Block {
    /// Total frames covered by `segments`, for consistency checking against
    /// `frame_count`. Blocks with no segments are treated as one implicit
    /// segment covering the whole block.
    #[must_use]
    pub fn segment_frame_total(&self) -> i64 {
        self.segments.iter().map(|s| s.duration_frames).sum()
    }
}

/// An ordered, contiguous sequence of [`Block`]s covering a session from
/// frame 0 forward. Fence ticks are precomputed at construction so the
/// executor never needs to recompute a prefix sum on the hot path.
#[derive(Debug, Clone)]
pub struct BlockPlan {
    blocks: Arc<Vec<Block>>,
    /// `fence_ticks[k]` is the session frame index at which block `k` ends
    /// and block `k+1` begins. `fence_ticks[blocks.len()]` is the total
    /// frame count of the plan.
    fence_ticks: Arc<Vec<i64>>,
}

impl BlockPlan {
    /// Validates and constructs a plan from an ordered block list.
    ///
    /// # Errors
    ///
    /// Returns a planning fault ([`CoreError::ZeroFrameCount`]) if any block
    /// has a non-positive frame count. Contiguity is self-evident by
    /// construction (fence ticks are derived as a prefix sum of
    /// `frame_count`), so [`CoreError::NonContiguousPlan`] is reserved for
    /// [`Self::validate_tail_replacement`], which checks a *proposed*
    /// replacement against an already-running plan.
    pub fn construct(blocks: Vec<Block>) -> CoreResult<Self> {
        let mut fence_ticks = Vec::with_capacity(blocks.len() + 1);
        fence_ticks.push(0i64);
        let mut running = 0i64;
        for block in &blocks {
            if block.frame_count <= 0 {
                return Err(CoreError::ZeroFrameCount {
                    block_id: block.block_id.clone(),
                    frame_count: block.frame_count,
                });
            }
            running += block.frame_count;
            fence_ticks.push(running);
        }
        Ok(Self {
            blocks: Arc::new(blocks),
            fence_ticks: Arc::new(fence_ticks),
        })
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The session frame index at which block `k` begins.
    #[must_use]
    pub fn fence_start(&self, k: usize) -> Option<i64> {
        self.fence_ticks.get(k).copied()
    }

    /// The session frame index at which block `k` ends (== the next block's
    /// fence start).
    #[must_use]
    pub fn fence_end(&self, k: usize) -> Option<i64> {
        self.fence_ticks.get(k + 1).copied()
    }

    /// Total frame count covered by the plan.
    #[must_use]
    pub fn total_frames(&self) -> i64 {
        *self.fence_ticks.last().unwrap_or(&0)
    }

    /// Finds the index of the block that owns session tick `tick`, if any.
    #[must_use]
    pub fn block_index_at(&self, tick: i64) -> Option<usize> {
        if tick < 0 {
            return None;
        }
        // Plans are small (tens to low hundreds of blocks); linear scan is
        // simpler than a binary search and not worth complicating.
        for k in 0..self.blocks.len() {
            if tick >= self.fence_ticks[k] && tick < self.fence_ticks[k + 1] {
                return Some(k);
            }
        }
        None
    }

    /// Validates that replacing the tail of the plan from block index
    /// `from_index` onward is legal given the current tick: the replacement
    /// must not touch a block whose fence has already passed, and may not
    /// land inside the lock window of the current fence unless `override_`
    /// is set.
    ///
    /// # Errors
    ///
    /// [`CoreError::LockWindowViolation`] if the replacement point is within
    /// `lock_window_frames` of `current_tick` and `override_` is false.
    pub fn validate_tail_replacement(
        &self,
        from_index: usize,
        current_tick: i64,
        lock_window_frames: i64,
        override_: bool,
    ) -> CoreResult<()> {
        let from_fence = self.fence_start(from_index).unwrap_or(self.total_frames());
        if !override_ && from_fence - current_tick < lock_window_frames {
            return Err(CoreError::LockWindowViolation {
                tick: current_tick,
                fence: from_fence,
            });
        }
        Ok(())
    }
}

/// The session-immutable `{video, audio}` profile negotiated at
/// `StartChannel`. No downstream component renegotiates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseFormat {
    pub width: u32,
    pub height: u32,
    pub session_fps: RationalFps,
    pub aspect_policy: AspectPolicy,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

/// How a producer's decoded frame should be fit into the house resolution
/// when its native aspect differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectPolicy {
    /// Letterbox/pillarbox to preserve aspect ratio.
    Letterbox,
    /// Stretch to fill, ignoring native aspect ratio.
    Stretch,
    /// Crop to fill, preserving aspect ratio.
    Crop,
}

/// A decoded video frame ready for encoding.
///
/// `pts_us` is derived exclusively from the session frame index by the
/// [`crate::pipeline::TickLoop`] - never from the decoder. `ct_us` is the
/// frame's position within its current segment's content time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Arc<[u8]>,
    pub pts_us: i64,
    pub ct_us: i64,
    pub asset_uri: String,
    pub block_id: String,
    pub audio: Vec<AudioFrame>,
    pub is_keyframe: bool,
}

impl Frame {
    /// Constructs a frame with the given payload and metadata, no PTS
    /// assigned yet (the tick loop stamps it at emission time).
    #[must_use]
    pub fn new(
        payload: Arc<[u8]>,
        ct_us: i64,
        asset_uri: impl Into<String>,
        block_id: impl Into<String>,
        is_keyframe: bool,
    ) -> Self {
        Self {
            payload,
            pts_us: 0,
            ct_us,
            asset_uri: asset_uri.into(),
            block_id: block_id.into(),
            audio: Vec::new(),
            is_keyframe,
        }
    }
}

/// A block of PCM audio samples in the channel's house format.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub payload: Arc<[u8]>,
    pub pts_us: i64,
    pub sample_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, frame_count: i64) -> Block {
        Block {
            block_id: id.to_string(),
            asset_uri: format!("asset://{id}"),
            start_frame_in_asset: 0,
            frame_count,
            input_fps: RationalFps::new_unchecked(30, 1),
            segments: Vec::new(),
        }
    }

    #[test]
    fn fence_ticks_are_prefix_sums() {
        let plan = BlockPlan::construct(vec![block("a", 900), block("b", 900)]).unwrap();
        assert_eq!(plan.fence_start(0), Some(0));
        assert_eq!(plan.fence_end(0), Some(900));
        assert_eq!(plan.fence_start(1), Some(900));
        assert_eq!(plan.fence_end(1), Some(1800));
        assert_eq!(plan.total_frames(), 1800);
    }

    #[test]
    fn zero_frame_count_rejected() {
        let err = BlockPlan::construct(vec![block("a", 0)]).unwrap_err();
        assert!(matches!(err, CoreError::ZeroFrameCount { .. }));
    }

    #[test]
    fn block_index_at_finds_owning_block() {
        let plan = BlockPlan::construct(vec![block("a", 900), block("b", 900)]).unwrap();
        assert_eq!(plan.block_index_at(0), Some(0));
        assert_eq!(plan.block_index_at(899), Some(0));
        assert_eq!(plan.block_index_at(900), Some(1));
        assert_eq!(plan.block_index_at(1799), Some(1));
        assert_eq!(plan.block_index_at(1800), None);
    }

    #[test]
    fn lock_window_violation_without_override() {
        let plan = BlockPlan::construct(vec![block("a", 900), block("b", 900)]).unwrap();
        let result = plan.validate_tail_replacement(1, 890, 30, false);
        assert!(matches!(result, Err(CoreError::LockWindowViolation { .. })));
    }

    #[test]
    fn lock_window_override_permits_replacement() {
        let plan = BlockPlan::construct(vec![block("a", 900), block("b", 900)]).unwrap();
        assert!(plan.validate_tail_replacement(1, 890, 30, true).is_ok());
    }
}
