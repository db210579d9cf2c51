// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The tagged data model that flows through MediaFlux pipelines.
//!
//! A [`Buffer`] is the unit of data on the wire and between nodes: exactly
//! one of audio, video, tensor, JSON, text, or opaque binary. Payload bytes
//! are stored in [`bytes::Bytes`] so fan-out to multiple downstream nodes is
//! a refcount bump, not a copy.
//!
//! [`BufferKind`] is the variant-only discriminant used for port typing and
//! pre-flight graph validation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FluxError;

/// Sample format of raw interleaved audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    F32,
    I16,
    I32,
}

impl SampleFormat {
    /// Size of a single sample in bytes.
    pub const fn sample_size(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::F32 | Self::I32 => 4,
        }
    }
}

/// Pixel layout of a raw or encoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// YUV 4:2:0 planar. Memory: width * height * 3/2 bytes.
    Yuv420p,
    /// Identical layout to YUV420P, alternate name kept for WebRTC interop.
    I420,
    /// Semi-planar Y plane + interleaved UV. Common hardware format.
    Nv12,
    /// Packed 24-bit RGB, no padding.
    Rgb24,
    /// Packed 32-bit RGBA.
    Rgba32,
    /// Codec bitstream, not raw pixels.
    Encoded,
}

impl PixelFormat {
    /// Expected buffer size in bytes for raw formats.
    ///
    /// Returns `None` for [`PixelFormat::Encoded`], whose size depends on
    /// the bitstream.
    pub const fn buffer_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize) * (height as usize);
        match self {
            Self::Yuv420p | Self::I420 | Self::Nv12 => Some(pixels * 3 / 2),
            Self::Rgb24 => Some(pixels * 3),
            Self::Rgba32 => Some(pixels * 4),
            Self::Encoded => None,
        }
    }
}

/// Video codec of an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    Vp8,
    H264,
    Av1,
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TensorDtype {
    F32,
    F16,
    I32,
    I64,
    U8,
}

impl TensorDtype {
    /// Size of a single element in bytes.
    pub const fn element_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::I64 => 8,
        }
    }
}

/// Where a tensor's bytes live.
///
/// `Shared` tensors are zero-copy eligible: the region id is the owned
/// reference and the region outlives the longest-living holder of that id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TensorStorage {
    Heap,
    Shared { region_id: String },
}

/// A frame of raw interleaved audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioBuffer {
    #[serde(with = "base64_bytes")]
    pub samples: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Number of sample frames per channel (not total samples).
    pub num_samples: u64,
}

impl AudioBuffer {
    /// Build an audio buffer from f32 samples, interleaved.
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let num_samples = if channels == 0 { 0 } else { (samples.len() / channels as usize) as u64 };
        Self {
            samples: Bytes::from(bytes),
            sample_rate,
            channels,
            format: SampleFormat::F32,
            num_samples,
        }
    }

    /// Duration of this buffer in microseconds. `None` if sample_rate is 0.
    pub fn duration_us(&self) -> Option<u64> {
        if self.sample_rate == 0 {
            return None;
        }
        Some(self.num_samples * 1_000_000 / u64::from(self.sample_rate))
    }

    /// Decode the payload into f32 samples. Errors if the format is not F32.
    pub fn samples_f32(&self) -> Result<Vec<f32>, FluxError> {
        if self.format != SampleFormat::F32 {
            return Err(FluxError::Validation(format!(
                "expected f32 audio, got {:?}",
                self.format
            )));
        }
        Ok(self
            .samples
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// A single video frame, raw or encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFrame {
    #[serde(with = "base64_bytes")]
    pub pixel_data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// `None` means `pixel_data` holds raw pixels; otherwise a codec bitstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<VideoCodec>,
    pub frame_number: u64,
    pub timestamp_us: u64,
    pub is_keyframe: bool,
}

/// An n-dimensional tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorBuffer {
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    /// Ordered dimension sizes, outermost first.
    pub shape: Vec<u64>,
    pub dtype: TensorDtype,
    #[serde(default = "TensorStorage::heap")]
    pub storage: TensorStorage,
}

impl TensorStorage {
    const fn heap() -> Self {
        Self::Heap
    }
}

impl TensorBuffer {
    /// Total number of elements implied by the shape.
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// Tagged data payload: the unit of data between nodes and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Buffer {
    Audio(AudioBuffer),
    Video(VideoFrame),
    Tensor(TensorBuffer),
    Json {
        #[serde(with = "base64_bytes")]
        payload: Bytes,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
    },
    Text {
        text: String,
    },
    Binary {
        #[serde(with = "base64_bytes")]
        data: Bytes,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// The variant-only discriminant of a [`Buffer`], used for port typing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Audio,
    Video,
    Tensor,
    Json,
    Text,
    Binary,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Tensor => "tensor",
            Self::Json => "json",
            Self::Text => "text",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

impl Buffer {
    /// The variant discriminant of this buffer.
    pub const fn kind(&self) -> BufferKind {
        match self {
            Self::Audio(_) => BufferKind::Audio,
            Self::Video(_) => BufferKind::Video,
            Self::Tensor(_) => BufferKind::Tensor,
            Self::Json { .. } => BufferKind::Json,
            Self::Text { .. } => BufferKind::Text,
            Self::Binary { .. } => BufferKind::Binary,
        }
    }

    /// Build a JSON buffer from a serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Internal`] if the value cannot be serialized,
    /// which only happens for non-string map keys.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, FluxError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| FluxError::Internal(format!("json buffer serialization: {e}")))?;
        Ok(Self::Json { payload: Bytes::from(payload), schema: None })
    }

    /// Parse a JSON buffer's payload.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Validation`] if this is not a JSON buffer or the
    /// payload is not valid JSON.
    pub fn json_value(&self) -> Result<serde_json::Value, FluxError> {
        match self {
            Self::Json { payload, .. } => serde_json::from_slice(payload)
                .map_err(|e| FluxError::Validation(format!("malformed json payload: {e}"))),
            other => Err(FluxError::Validation(format!(
                "expected json buffer, got {}",
                other.kind()
            ))),
        }
    }

    /// Build a text buffer.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Check the structural invariants of this buffer.
    ///
    /// Variant/size mismatches are validation failures, never panics:
    /// - audio payload length must equal `num_samples * channels * sample_size`
    /// - raw video payload length must match the declared dimensions
    /// - tensor payload length must equal `product(shape) * element_size`
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Validation`] describing the first violated
    /// invariant.
    pub fn validate(&self) -> Result<(), FluxError> {
        match self {
            Self::Audio(audio) => {
                let expected = audio.num_samples as usize
                    * audio.channels as usize
                    * audio.format.sample_size();
                if audio.samples.len() != expected {
                    return Err(FluxError::Validation(format!(
                        "audio payload is {} bytes, expected {} ({} samples x {} channels x {:?})",
                        audio.samples.len(),
                        expected,
                        audio.num_samples,
                        audio.channels,
                        audio.format,
                    )));
                }
                Ok(())
            },
            Self::Video(frame) => {
                if frame.codec.is_some() {
                    // Encoded bitstreams have no derivable size.
                    return Ok(());
                }
                match frame.pixel_format.buffer_size(frame.width, frame.height) {
                    Some(expected) if frame.pixel_data.len() != expected => {
                        Err(FluxError::Validation(format!(
                            "video payload is {} bytes, expected {} for {}x{} {:?}",
                            frame.pixel_data.len(),
                            expected,
                            frame.width,
                            frame.height,
                            frame.pixel_format,
                        )))
                    },
                    Some(_) => Ok(()),
                    None => Err(FluxError::Validation(
                        "raw video frame declared with Encoded pixel format".to_string(),
                    )),
                }
            },
            Self::Tensor(tensor) => {
                let expected = tensor.element_count() as usize * tensor.dtype.element_size();
                if tensor.data.len() != expected {
                    return Err(FluxError::Validation(format!(
                        "tensor payload is {} bytes, expected {} (shape {:?}, dtype {:?})",
                        tensor.data.len(),
                        expected,
                        tensor.shape,
                        tensor.dtype,
                    )));
                }
                Ok(())
            },
            Self::Json { payload, .. } => std::str::from_utf8(payload)
                .map(|_| ())
                .map_err(|e| FluxError::Validation(format!("json payload is not utf-8: {e}"))),
            Self::Text { .. } | Self::Binary { .. } => Ok(()),
        }
    }
}

/// Serde adapter encoding [`Bytes`] as base64 strings in JSON.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes.as_ref()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_size_invariant() {
        let good = Buffer::Audio(AudioBuffer::from_f32(&[0.0; 480], 16_000, 1));
        assert!(good.validate().is_ok());

        let bad = Buffer::Audio(AudioBuffer {
            samples: Bytes::from_static(&[0u8; 10]),
            sample_rate: 16_000,
            channels: 1,
            format: SampleFormat::F32,
            num_samples: 480,
        });
        assert!(matches!(bad.validate(), Err(FluxError::Validation(_))));
    }

    #[test]
    fn test_raw_video_size_invariant() {
        let frame = VideoFrame {
            pixel_data: Bytes::from(vec![0u8; 320 * 240 * 3]),
            width: 320,
            height: 240,
            pixel_format: PixelFormat::Rgb24,
            codec: None,
            frame_number: 0,
            timestamp_us: 0,
            is_keyframe: true,
        };
        assert!(Buffer::Video(frame.clone()).validate().is_ok());

        let truncated = VideoFrame { pixel_data: Bytes::from(vec![0u8; 100]), ..frame };
        assert!(Buffer::Video(truncated).validate().is_err());
    }

    #[test]
    fn test_encoded_video_skips_size_check() {
        let frame = VideoFrame {
            pixel_data: Bytes::from(vec![0u8; 42]),
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Encoded,
            codec: Some(VideoCodec::Vp8),
            frame_number: 7,
            timestamp_us: 33_000,
            is_keyframe: false,
        };
        assert!(Buffer::Video(frame).validate().is_ok());
    }

    #[test]
    fn test_tensor_size_invariant() {
        let tensor = TensorBuffer {
            data: Bytes::from(vec![0u8; 2 * 3 * 4]),
            shape: vec![2, 3],
            dtype: TensorDtype::F32,
            storage: TensorStorage::Heap,
        };
        assert!(Buffer::Tensor(tensor.clone()).validate().is_ok());

        let wrong = TensorBuffer { shape: vec![2, 4], ..tensor };
        assert!(Buffer::Tensor(wrong).validate().is_err());
    }

    #[test]
    fn test_json_helpers() {
        let buf = Buffer::json(&serde_json::json!({"value": 10})).unwrap();
        assert_eq!(buf.kind(), BufferKind::Json);
        let value = buf.json_value().unwrap();
        assert_eq!(value["value"], 10);

        assert!(Buffer::text("hi").json_value().is_err());
    }

    #[test]
    fn test_buffer_serde_base64() {
        let buf = Buffer::Binary {
            data: Bytes::from_static(b"\x00\x01\x02"),
            mime_type: Some("application/octet-stream".to_string()),
        };
        let json = serde_json::to_string(&buf).unwrap();
        assert!(json.contains("\"AAEC\""), "payload should be base64: {json}");
        let back: Buffer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn test_audio_duration() {
        let audio = AudioBuffer::from_f32(&[0.0; 1600], 16_000, 1);
        assert_eq!(audio.duration_us(), Some(100_000));
    }
}
