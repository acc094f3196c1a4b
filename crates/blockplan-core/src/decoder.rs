//! The `Decoder` collaborator interface.
//!
//! Container demuxing and codec-level decode are deliberately out of this
//! crate's scope; they live behind this trait boundary instead. This module
//! defines the boundary [`crate::producer::TickProducer`] programs against,
//! plus one synthetic, deterministic implementation used by tests and the
//! demo binary to drive the pipeline without a real codec dependency.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::model::AudioFrame;

/// One decoded unit of media: a video frame payload plus the audio that
/// accompanies it (zero or more audio frames, since audio and video frame
/// durations need not match 1:1).
#[derive(Debug, Clone)]
pub struct DecodedUnit {
    pub payload: Arc<[u8]>,
    pub is_keyframe: bool,
    pub audio: Vec<AudioFrame>,
}

/// Per-block media source. A fresh `Decoder` is constructed for every
/// `AssignBlock`; it is never reused across blocks.
///
/// Implementations are not required to be `Sync` - each `TickProducer` owns
/// exactly one decoder and only ever touches it from the fill thread or the
/// preloader worker, never both at once.
pub trait Decoder: Send {
    /// Opens the asset named by `asset_uri` and seeks to
    /// `start_frame_in_asset`. Implementations should treat a missing or
    /// unreadable asset as a recoverable error - the caller (`TickProducer`)
    /// is responsible for degrading to an empty primed slot rather than
    /// propagating a panic.
    fn open(&mut self, asset_uri: &str, start_frame_in_asset: i64) -> CoreResult<()>;

    /// Decodes and returns the next unit in presentation order. Returns
    /// `Ok(None)` at end of stream. A transient per-frame decode error
    /// should be returned as `Err` - the producer continues by falling
    /// through to the next fallback tier, not by retrying internally.
    fn decode_next(&mut self) -> CoreResult<Option<DecodedUnit>>;
}

/// Constructs a fresh [`Decoder`] for a given asset URI scheme. Bound into
/// the session at `StartChannel` so the core never hardcodes a concrete
/// codec/container stack.
pub trait DecoderFactory: Send + Sync {
    fn open(&self) -> Box<dyn Decoder>;
}

/// A deterministic decoder that never touches a real codec: every call
/// produces a counting frame whose payload is the big-endian encoding of
/// its ordinal within the asset, with every 15th frame marked as a
/// keyframe. Pairs each video unit with one audio frame so the A-V
/// accounting has something to exercise.
#[derive(Default)]
pub struct SyntheticDecoder {
    cursor: i64,
    opened: bool,
    /// Synthetic assets "fail to open" when their URI contains this marker,
    /// so priming-failure scenarios can be exercised without a real missing
    /// file.
    fail_marker: &'static str,
}

impl SyntheticDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursor: 0,
            opened: false,
            fail_marker: "missing",
        }
    }
}

impl Decoder for SyntheticDecoder {
    fn open(&mut self, asset_uri: &str, start_frame_in_asset: i64) -> CoreResult<()> {
        if asset_uri.contains(self.fail_marker) {
            return Err(crate::error::CoreError::UnknownAsset(asset_uri.to_string()));
        }
        self.cursor = start_frame_in_asset;
        self.opened = true;
        Ok(())
    }

    fn decode_next(&mut self) -> CoreResult<Option<DecodedUnit>> {
        if !self.opened {
            return Err(crate::error::CoreError::Internal(
                "decode_next called before open".into(),
            ));
        }
        let ordinal = self.cursor;
        self.cursor += 1;
        let payload: Arc<[u8]> = Arc::from(ordinal.to_be_bytes().to_vec());
        let audio = AudioFrame {
            payload: Arc::from(vec![0u8; 4]),
            pts_us: 0,
            sample_count: 4,
        };
        Ok(Some(DecodedUnit {
            payload,
            is_keyframe: ordinal % 15 == 0,
            audio: vec![audio],
        }))
    }
}

/// Factory producing [`SyntheticDecoder`] instances.
#[derive(Default)]
pub struct SyntheticDecoderFactory;

impl DecoderFactory for SyntheticDecoderFactory {
    fn open(&self) -> Box<dyn Decoder> {
        Box::new(SyntheticDecoder::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_decoder_produces_counting_frames() {
        let mut decoder = SyntheticDecoder::new();
        decoder.open("asset://a", 0).unwrap();
        let first = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), 0i64.to_be_bytes().as_slice());
        assert!(first.is_keyframe);
        let second = decoder.decode_next().unwrap().unwrap();
        assert_eq!(second.payload.as_ref(), 1i64.to_be_bytes().as_slice());
        assert!(!second.is_keyframe);
    }

    #[test]
    fn synthetic_decoder_seeks_to_start_frame() {
        let mut decoder = SyntheticDecoder::new();
        decoder.open("asset://a", 100).unwrap();
        let first = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), 100i64.to_be_bytes().as_slice());
    }

    #[test]
    fn synthetic_decoder_fails_open_for_missing_marker() {
        let mut decoder = SyntheticDecoder::new();
        let err = decoder.open("asset://missing.mp4", 0).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::UnknownAsset(_)));
    }
}
