//! `PadProducer`: the deterministic black-frame-plus-silence fallback.
//!
//! The pad is the final tier of the dead-man failsafe's fallback chain
//! (real -> freeze -> black). It is pre-allocated at session start so the
//! tick loop never has to synthesize a frame on the hot path - it just
//! clones the `Arc`-backed payload.

use std::sync::Arc;

use crate::model::{AudioFrame, Frame, HouseFormat};

/// Produces the session's black-video/silent-audio pad frame.
///
/// The payload is deterministic and computed once per `HouseFormat`
/// (resolution and sample format never change mid-session), then reused by
/// `Arc` clone on every pad emission.
pub struct PadProducer {
    video_payload: Arc<[u8]>,
    silence_payload: Arc<[u8]>,
    audio_sample_count: usize,
}

impl PadProducer {
    /// `audio_frame_duration_us` determines how many silent samples
    /// accompany each pad video frame.
    #[must_use]
    pub fn new(house_format: &HouseFormat, audio_frame_duration_us: i64) -> Self {
        // Black in a planar/packed YUV-like payload is conventionally all
        // zero luma/chroma-neutral bytes; callers that need a specific pixel
        // format substitute their own black-frame encoder here. For this
        // crate's purposes (collaborator-level Decoder/Encoder boundary) a
        // zeroed buffer sized to width*height*bytes-per-pixel is sufficient
        // and deterministic.
        let pixel_bytes = house_format.width as usize * house_format.height as usize * 3 / 2;
        let video_payload: Arc<[u8]> = Arc::from(vec![0u8; pixel_bytes.max(1)]);

        let sample_count = ((house_format.audio_sample_rate as i64 * audio_frame_duration_us)
            / 1_000_000)
            .max(1) as usize;
        let bytes_per_sample = 2usize; // 16-bit PCM house format
        let silence_len = sample_count * house_format.audio_channels as usize * bytes_per_sample;
        let silence_payload: Arc<[u8]> = Arc::from(vec![0u8; silence_len]);

        Self {
            video_payload,
            silence_payload,
            audio_sample_count: sample_count,
        }
    }

    /// Produces one pad frame. `ct_us` and `asset_uri`/`block_id` are filled
    /// in by the caller (the tick loop knows which block/segment the pad is
    /// standing in for); this method only owns the deterministic payload.
    /// Every pad segment is its own IDR: pad frames are always marked as
    /// keyframes so a pad segment is independently decodable.
    #[must_use]
    pub fn black_frame(&self, asset_uri: &str, block_id: &str) -> Frame {
        let mut frame = Frame::new(
            Arc::clone(&self.video_payload),
            0,
            asset_uri,
            block_id,
            true,
        );
        frame.audio = vec![self.silence()];
        frame
    }

    /// One silent audio frame in house format.
    #[must_use]
    pub fn silence(&self) -> AudioFrame {
        AudioFrame {
            payload: Arc::clone(&self.silence_payload),
            pts_us: 0,
            sample_count: self.audio_sample_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AspectPolicy;
    use crate::timebase::RationalFps;

    fn house_format() -> HouseFormat {
        HouseFormat {
            width: 1280,
            height: 720,
            session_fps: RationalFps::new_unchecked(30, 1),
            aspect_policy: AspectPolicy::Letterbox,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }

    #[test]
    fn black_frame_is_deterministic_and_keyframe() {
        let pad = PadProducer::new(&house_format(), 33_333);
        let a = pad.black_frame("pad://black", "pad");
        let b = pad.black_frame("pad://black", "pad");
        assert_eq!(a.payload.as_ref(), b.payload.as_ref());
        assert!(a.payload.iter().all(|&b| b == 0));
        assert!(a.is_keyframe, "every pad segment must be independently decodable");
    }

    #[test]
    fn silence_is_all_zero_and_sized_for_house_format() {
        let pad = PadProducer::new(&house_format(), 33_333);
        let silence = pad.silence();
        assert!(silence.payload.iter().all(|&b| b == 0));
        // 30fps frame at 48kHz stereo 16-bit: ~1600 samples/channel.
        assert_eq!(silence.sample_count, 1600);
        assert_eq!(silence.payload.len(), 1600 * 2 * 2);
    }
}
