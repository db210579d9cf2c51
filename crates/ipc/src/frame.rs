// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The framed record format carried over the worker bus.
//!
//! One IPC message is a length-prefixed record:
//!
//! ```text
//! offset | field           | size   | notes
//! -------+-----------------+--------+--------------------------------------
//!   0    | data_type       | 1      | 1=Audio 2=Video 3=Text 4=Tensor 5=Binary 6=Json
//!   1    | session_len     | 2 LE   | length of the session id in bytes
//!   3    | session_id      | var    | utf-8
//!   3+L  | timestamp_ns    | 8 LE   | nanoseconds since epoch
//!  11+L  | variant payload | var    |
//! ```
//!
//! All multi-byte integers are little-endian. This layout is ABI: any
//! change requires a new protocol version.
//!
//! The wire carries less than the in-memory model in three places, all
//! normalized on decode: audio sample width is inferred from the payload
//! length (so `i32` audio cannot travel over IPC), tensor storage is always
//! `Heap` on arrival (the bytes were materialized into the bus's shared
//! segment), and the advisory JSON schema tag / binary mime type are not
//! carried.

use bytes::Bytes;
use mediaflux_core::buffer::{
    AudioBuffer, Buffer, PixelFormat, SampleFormat, TensorBuffer, TensorDtype, TensorStorage,
    VideoCodec, VideoFrame,
};

use crate::IpcError;

/// Minimum size of a frame: tag, empty session id, timestamp.
const HEADER_MIN: usize = 1 + 2 + 8;

/// One decoded IPC record.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub session_id: String,
    /// Nanoseconds since epoch, stamped by the publisher.
    pub timestamp_ns: u64,
    pub buffer: Buffer,
}

impl WireFrame {
    pub fn new(session_id: impl Into<String>, timestamp_ns: u64, buffer: Buffer) -> Self {
        Self { session_id: session_id.into(), timestamp_ns, buffer }
    }
}

/// The timestamp a buffer must carry in the record header, when it owns
/// one.
///
/// Video is the one variant whose presentation timestamp rides in the
/// shared header rather than its own payload; publishers must stamp the
/// header from it (not from the wall clock) or `decode` reconstructs a
/// different frame and the round-trip identity breaks.
pub fn buffer_timestamp_ns(buffer: &Buffer) -> Option<u64> {
    match buffer {
        Buffer::Video(video) => Some(video.timestamp_us.saturating_mul(1_000)),
        _ => None,
    }
}

const fn data_type_tag(buffer: &Buffer) -> u8 {
    match buffer {
        Buffer::Audio(_) => 1,
        Buffer::Video(_) => 2,
        Buffer::Text { .. } => 3,
        Buffer::Tensor(_) => 4,
        Buffer::Binary { .. } => 5,
        Buffer::Json { .. } => 6,
    }
}

const fn pixel_format_tag(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Yuv420p => 1,
        PixelFormat::I420 => 2,
        PixelFormat::Nv12 => 3,
        PixelFormat::Rgb24 => 4,
        PixelFormat::Rgba32 => 5,
        PixelFormat::Encoded => 255,
    }
}

fn pixel_format_from_tag(tag: u8) -> Result<PixelFormat, IpcError> {
    Ok(match tag {
        1 => PixelFormat::Yuv420p,
        2 => PixelFormat::I420,
        3 => PixelFormat::Nv12,
        4 => PixelFormat::Rgb24,
        5 => PixelFormat::Rgba32,
        255 => PixelFormat::Encoded,
        other => return Err(IpcError::InvalidFrame(format!("unknown pixel format tag {other}"))),
    })
}

const fn codec_tag(codec: Option<VideoCodec>) -> u8 {
    match codec {
        None => 0,
        Some(VideoCodec::Vp8) => 1,
        Some(VideoCodec::H264) => 2,
        Some(VideoCodec::Av1) => 3,
    }
}

fn codec_from_tag(tag: u8) -> Result<Option<VideoCodec>, IpcError> {
    Ok(match tag {
        0 => None,
        1 => Some(VideoCodec::Vp8),
        2 => Some(VideoCodec::H264),
        3 => Some(VideoCodec::Av1),
        other => return Err(IpcError::InvalidFrame(format!("unknown codec tag {other}"))),
    })
}

const fn dtype_tag(dtype: TensorDtype) -> u8 {
    match dtype {
        TensorDtype::F32 => 1,
        TensorDtype::F16 => 2,
        TensorDtype::I32 => 3,
        TensorDtype::I64 => 4,
        TensorDtype::U8 => 5,
    }
}

fn dtype_from_tag(tag: u8) -> Result<TensorDtype, IpcError> {
    Ok(match tag {
        1 => TensorDtype::F32,
        2 => TensorDtype::F16,
        3 => TensorDtype::I32,
        4 => TensorDtype::I64,
        5 => TensorDtype::U8,
        other => return Err(IpcError::InvalidFrame(format!("unknown tensor dtype tag {other}"))),
    })
}

/// Encode one record for publication.
///
/// # Errors
///
/// [`IpcError::Unsupported`] when the buffer cannot be represented in the
/// wire ABI: a session id over 64 KiB, `i32` audio (the audio payload
/// carries no sample-format field, so width is inferred on decode), or a
/// tensor with more than 255 dimensions.
pub fn encode(frame: &WireFrame) -> Result<Vec<u8>, IpcError> {
    let session = frame.session_id.as_bytes();
    if session.len() > u16::MAX as usize {
        return Err(IpcError::Unsupported(format!(
            "session id is {} bytes, wire limit is {}",
            session.len(),
            u16::MAX
        )));
    }

    let mut out = Vec::with_capacity(HEADER_MIN + session.len() + 64);
    out.push(data_type_tag(&frame.buffer));
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(session.len() as u16).to_le_bytes());
    out.extend_from_slice(session);
    out.extend_from_slice(&frame.timestamp_ns.to_le_bytes());

    match &frame.buffer {
        Buffer::Audio(audio) => {
            if audio.format == SampleFormat::I32 {
                return Err(IpcError::Unsupported(
                    "i32 audio cannot be framed: the wire infers sample width and \
                     4-byte samples decode as f32"
                        .to_string(),
                ));
            }
            out.extend_from_slice(&audio.sample_rate.to_le_bytes());
            out.extend_from_slice(&audio.channels.to_le_bytes());
            out.extend_from_slice(&audio.num_samples.to_le_bytes());
            out.extend_from_slice(&audio.samples);
        },
        Buffer::Video(video) => {
            out.extend_from_slice(&video.width.to_le_bytes());
            out.extend_from_slice(&video.height.to_le_bytes());
            out.push(pixel_format_tag(video.pixel_format));
            out.push(codec_tag(video.codec));
            out.extend_from_slice(&video.frame_number.to_le_bytes());
            out.push(u8::from(video.is_keyframe));
            out.extend_from_slice(&video.pixel_data);
        },
        Buffer::Text { text } => {
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(text.len() as u32).to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        },
        Buffer::Tensor(tensor) => {
            let ndim = u8::try_from(tensor.shape.len()).map_err(|_| {
                IpcError::Unsupported(format!(
                    "tensor has {} dimensions, wire limit is 255",
                    tensor.shape.len()
                ))
            })?;
            out.push(ndim);
            for dim in &tensor.shape {
                out.extend_from_slice(&dim.to_le_bytes());
            }
            out.push(dtype_tag(tensor.dtype));
            out.extend_from_slice(&tensor.data);
        },
        Buffer::Binary { data, .. } => {
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        },
        Buffer::Json { payload, .. } => {
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        },
    }

    Ok(out)
}

/// A bounds-checked little-endian reader over a received sample.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IpcError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len()).ok_or_else(
            || {
                IpcError::InvalidFrame(format!(
                    "truncated frame: wanted {n} bytes at offset {}, have {}",
                    self.pos,
                    self.bytes.len()
                ))
            },
        )?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IpcError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, IpcError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, IpcError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, IpcError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

/// Decode one received record, copying payload bytes out of the sample.
///
/// # Errors
///
/// [`IpcError::InvalidFrame`] on truncation, unknown tags, or payload
/// lengths inconsistent with the declared geometry.
pub fn decode(bytes: &[u8]) -> Result<WireFrame, IpcError> {
    if bytes.len() < HEADER_MIN {
        return Err(IpcError::InvalidFrame(format!(
            "frame is {} bytes, header needs at least {HEADER_MIN}",
            bytes.len()
        )));
    }

    let mut r = Reader::new(bytes);
    let tag = r.u8()?;
    let session_len = r.u16()? as usize;
    let session_id = std::str::from_utf8(r.take(session_len)?)
        .map_err(|e| IpcError::InvalidFrame(format!("session id is not utf-8: {e}")))?
        .to_string();
    let timestamp_ns = r.u64()?;

    let buffer = match tag {
        1 => {
            let sample_rate = r.u32()?;
            let channels = r.u16()?;
            let num_samples = r.u64()?;
            let samples = r.rest();

            let lanes = num_samples as usize * channels as usize;
            if lanes == 0 && !samples.is_empty() {
                return Err(IpcError::InvalidFrame(
                    "audio frame declares zero samples but carries payload".to_string(),
                ));
            }
            let format = if lanes == 0 {
                SampleFormat::F32
            } else if samples.len() == lanes * 4 {
                SampleFormat::F32
            } else if samples.len() == lanes * 2 {
                SampleFormat::I16
            } else {
                return Err(IpcError::InvalidFrame(format!(
                    "audio payload is {} bytes for {num_samples} samples x {channels} channels",
                    samples.len()
                )));
            };

            Buffer::Audio(AudioBuffer {
                samples: Bytes::copy_from_slice(samples),
                sample_rate,
                channels,
                format,
                num_samples,
            })
        },
        2 => {
            let width = r.u32()?;
            let height = r.u32()?;
            let pixel_format = pixel_format_from_tag(r.u8()?)?;
            let codec = codec_from_tag(r.u8()?)?;
            let frame_number = r.u64()?;
            let is_keyframe = r.u8()? != 0;
            let pixel_data = Bytes::copy_from_slice(r.rest());

            Buffer::Video(VideoFrame {
                pixel_data,
                width,
                height,
                pixel_format,
                codec,
                frame_number,
                timestamp_us: timestamp_ns / 1_000,
                is_keyframe,
            })
        },
        3 => {
            let len = r.u32()? as usize;
            let text = std::str::from_utf8(r.take(len)?)
                .map_err(|e| IpcError::InvalidFrame(format!("text payload is not utf-8: {e}")))?
                .to_string();
            Buffer::Text { text }
        },
        4 => {
            let ndim = r.u8()? as usize;
            let mut shape = Vec::with_capacity(ndim);
            for _ in 0..ndim {
                shape.push(r.u64()?);
            }
            let dtype = dtype_from_tag(r.u8()?)?;
            let data = Bytes::copy_from_slice(r.rest());
            Buffer::Tensor(TensorBuffer { data, shape, dtype, storage: TensorStorage::Heap })
        },
        5 => {
            let len = r.u32()? as usize;
            let data = Bytes::copy_from_slice(r.take(len)?);
            Buffer::Binary { data, mime_type: None }
        },
        6 => {
            let len = r.u32()? as usize;
            let payload = Bytes::copy_from_slice(r.take(len)?);
            std::str::from_utf8(&payload)
                .map_err(|e| IpcError::InvalidFrame(format!("json payload is not utf-8: {e}")))?;
            Buffer::Json { payload, schema: None }
        },
        other => return Err(IpcError::InvalidFrame(format!("unknown data type tag {other}"))),
    };

    Ok(WireFrame { session_id, timestamp_ns, buffer })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_round_trip_identity() {
        let frame = WireFrame::new(
            "sess-1",
            42,
            Buffer::Audio(AudioBuffer::from_f32(&[0.1, -0.2, 0.3, -0.4], 16_000, 2)),
        );
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_i16_audio_width_inferred() {
        let samples = Bytes::from(vec![0u8; 960 * 2]);
        let frame = WireFrame::new(
            "s",
            0,
            Buffer::Audio(AudioBuffer {
                samples,
                sample_rate: 48_000,
                channels: 1,
                format: SampleFormat::I16,
                num_samples: 960,
            }),
        );
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_i32_audio_rejected() {
        let frame = WireFrame::new(
            "s",
            0,
            Buffer::Audio(AudioBuffer {
                samples: Bytes::from(vec![0u8; 4]),
                sample_rate: 8_000,
                channels: 1,
                format: SampleFormat::I32,
                num_samples: 1,
            }),
        );
        assert!(matches!(encode(&frame), Err(IpcError::Unsupported(_))));
    }

    #[test]
    fn test_video_round_trip_preserves_geometry() {
        // timestamp_us rides in the record header as nanoseconds.
        let frame = WireFrame::new(
            "cam",
            15_000_000,
            Buffer::Video(VideoFrame {
                pixel_data: Bytes::from(vec![7u8; 320 * 240 * 3]),
                width: 320,
                height: 240,
                pixel_format: PixelFormat::Rgb24,
                codec: None,
                frame_number: 12,
                timestamp_us: 15_000,
                is_keyframe: true,
            }),
        );
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_video_header_timestamp_comes_from_the_frame() {
        // The publish path stamps the header via buffer_timestamp_ns; for
        // video that must be the frame's own presentation time, or decode
        // reconstructs a different frame.
        let video = Buffer::Video(VideoFrame {
            pixel_data: Bytes::from_static(b"payload"),
            width: 16,
            height: 16,
            pixel_format: PixelFormat::Encoded,
            codec: Some(VideoCodec::Vp8),
            frame_number: 3,
            timestamp_us: 15_000,
            is_keyframe: false,
        });
        assert_eq!(buffer_timestamp_ns(&video), Some(15_000_000));
        assert_eq!(buffer_timestamp_ns(&Buffer::text("x")), None);

        let header_ts = buffer_timestamp_ns(&video).unwrap();
        let decoded = decode(&encode(&WireFrame::new("s", header_ts, video.clone())).unwrap())
            .unwrap();
        assert_eq!(decoded.buffer, video);
    }

    #[test]
    fn test_encoded_video_codec_tag() {
        let frame = WireFrame::new(
            "cam",
            0,
            Buffer::Video(VideoFrame {
                pixel_data: Bytes::from_static(b"bitstream"),
                width: 1920,
                height: 1080,
                pixel_format: PixelFormat::Encoded,
                codec: Some(VideoCodec::Av1),
                frame_number: 99,
                timestamp_us: 0,
                is_keyframe: false,
            }),
        );
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_tensor_round_trip_identity() {
        let frame = WireFrame::new(
            "ml",
            1,
            Buffer::Tensor(TensorBuffer {
                data: Bytes::from(vec![1u8; 2 * 3 * 8]),
                shape: vec![2, 3],
                dtype: TensorDtype::I64,
                storage: TensorStorage::Heap,
            }),
        );
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_text_json_binary_round_trip() {
        for buffer in [
            Buffer::text("hello worker"),
            Buffer::Json { payload: Bytes::from_static(b"{\"v\":1}"), schema: None },
            Buffer::Binary { data: Bytes::from_static(&[0, 255, 128]), mime_type: None },
        ] {
            let frame = WireFrame::new("s", 5, buffer);
            assert_eq!(decode(&encode(&frame).unwrap()).unwrap(), frame);
        }
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame =
            WireFrame::new("session", 9, Buffer::text("payload that will get cut off"));
        let mut bytes = encode(&frame).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(decode(&bytes), Err(IpcError::InvalidFrame(_))));
        assert!(matches!(decode(&bytes[..2]), Err(IpcError::InvalidFrame(_))));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let frame = WireFrame::new("s", 0, Buffer::text("x"));
        let mut bytes = encode(&frame).unwrap();
        bytes[0] = 42;
        assert!(matches!(decode(&bytes), Err(IpcError::InvalidFrame(_))));
    }

    #[test]
    fn test_layout_matches_abi() {
        // Pin the exact byte layout: tag, session_len LE, session, ts LE.
        let frame = WireFrame::new("ab", 0x0102_0304_0506_0708, Buffer::text("hi"));
        let bytes = encode(&frame).unwrap();
        assert_eq!(bytes[0], 3); // text tag
        assert_eq!(&bytes[1..3], &[2, 0]); // session_len = 2 LE
        assert_eq!(&bytes[3..5], b"ab");
        assert_eq!(&bytes[5..13], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[13..17], &[2, 0, 0, 0]); // payload_len = 2 LE
        assert_eq!(&bytes[17..], b"hi");
    }
}
