//! Binary audio framing.
//!
//! Audio never travels as JSON on the hot path. Each frame is:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┐
//! │ stream_type  │ PCM samples (i16, little-endian)         │
//! │ 1 byte (0|1) │ N * 2 bytes, 16 kHz mono                 │
//! └──────────────┴──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size of the stream-type header in bytes.
pub const HEADER_LEN: usize = 1;

/// Sample rate the backend assumes for binary frames.
pub const SAMPLE_RATE: u32 = 16_000;

// ============================================================================
// StreamType
// ============================================================================

/// Which capture stream a frame belongs to in dual-stream diarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StreamType {
    /// Primary speaker microphone.
    Agent = 0,
    /// Mixed / secondary audio (system output, other participants).
    Mixed = 1,
}

impl StreamType {
    /// Returns the header byte for this stream.
    #[inline]
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a header byte.
    #[inline]
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Agent),
            1 => Some(Self::Mixed),
            _ => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes PCM samples into a binary frame.
///
/// Output length is always `1 + 2 * samples.len()`.
#[must_use]
pub fn encode_audio_frame(stream_type: StreamType, samples: &[i16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    frame.push(stream_type.as_byte());
    for sample in samples {
        frame.extend_from_slice(&sample.to_le_bytes());
    }
    frame
}

/// Encodes raw little-endian PCM bytes into a binary frame without
/// reinterpreting them.
#[must_use]
pub fn encode_audio_bytes(stream_type: StreamType, pcm: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + pcm.len());
    frame.push(stream_type.as_byte());
    frame.extend_from_slice(pcm);
    frame
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a binary frame back into its stream type and samples.
///
/// # Errors
///
/// [`Error::InvalidAudioFrame`] if the frame is empty, the header byte is
/// not a known stream type, or the payload has an odd number of bytes.
pub fn decode_audio_frame(frame: &[u8]) -> Result<(StreamType, Vec<i16>)> {
    let (&header, pcm) = frame
        .split_first()
        .ok_or_else(|| Error::invalid_audio_frame("empty frame"))?;

    let stream_type = StreamType::from_byte(header)
        .ok_or_else(|| Error::invalid_audio_frame(format!("unknown stream type {header}")))?;

    if pcm.len() % 2 != 0 {
        return Err(Error::invalid_audio_frame(format!(
            "odd payload length {}",
            pcm.len()
        )));
    }

    let samples = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok((stream_type, samples))
}

// ============================================================================
// Tests
// ============================================================================
