// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Audio/video synchronization check, the reference multi-input node.
//!
//! Consumes jointly-delivered `{audio, video}` chunks and reports how far
//! the video timestamp drifts from the audio clock. Audio buffers carry no
//! presentation timestamp of their own, so the audio side of the offset is
//! the chunk's start, i.e. zero.

use async_trait::async_trait;
use mediaflux_core::{
    Buffer, BufferKind, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncAvParams {
    /// Maximum |offset| still considered in sync.
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: f64,
}

const fn default_tolerance_ms() -> f64 {
    20.0
}

pub struct SyncAvNode {
    tolerance_us: i64,
}

impl SyncAvNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize or the
    /// tolerance is not positive.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: SyncAvParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("sync_av params: {e}")))?;
        if params.tolerance_ms <= 0.0 {
            return Err(FluxError::Validation("sync tolerance must be positive".to_string()));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self { tolerance_us: (params.tolerance_ms * 1000.0) as i64 })
    }
}

#[async_trait]
impl PipelineNode for SyncAvNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::unary(
            vec![
                InputPort::new("audio", vec![BufferKind::Audio]),
                InputPort::new("video", vec![BufferKind::Video]),
            ],
            vec![OutputPort::default_port(vec![BufferKind::Json])],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let audio = match chunk.payload.buffer_for("audio") {
            Some(Buffer::Audio(audio)) => audio.clone(),
            _ => return Err(FluxError::Validation("'audio' input must be audio".to_string())),
        };
        let video = match chunk.payload.buffer_for("video") {
            Some(Buffer::Video(video)) => video.clone(),
            _ => return Err(FluxError::Validation("'video' input must be video".to_string())),
        };

        let offset_us = i64::try_from(video.timestamp_us)
            .map_err(|_| FluxError::Validation("video timestamp overflows".to_string()))?;
        let is_synced = offset_us.abs() <= self.tolerance_us;

        #[allow(clippy::cast_precision_loss)]
        let report = serde_json::json!({
            "is_synced": is_synced,
            "offset_ms": offset_us as f64 / 1000.0,
            "tolerance_ms": self.tolerance_us as f64 / 1000.0,
            "audio": {
                "sample_rate": audio.sample_rate,
                "channels": audio.channels,
                "num_samples": audio.num_samples,
                "duration_ms": audio.duration_us().map(|us| us as f64 / 1000.0),
            },
            "video": {
                "width": video.width,
                "height": video.height,
                "frame_number": video.frame_number,
                "timestamp_ms": video.timestamp_us as f64 / 1000.0,
            },
        });
        out.emit(Buffer::json(&report)?).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, test_sink};
    use bytes::Bytes;
    use mediaflux_core::buffer::{AudioBuffer, PixelFormat, VideoFrame};
    use std::collections::HashMap;

    fn av_chunk(video_ts_us: u64) -> DataChunk {
        let audio = AudioBuffer::from_f32(&vec![0.0; 1600], 16_000, 1); // 100 ms
        let video = VideoFrame {
            pixel_data: Bytes::from(vec![0u8; 320 * 240 * 3]),
            width: 320,
            height: 240,
            pixel_format: PixelFormat::Rgb24,
            codec: None,
            frame_number: 0,
            timestamp_us: video_ts_us,
            is_keyframe: true,
        };
        let buffers = HashMap::from([
            ("audio".to_string(), Buffer::Audio(audio)),
            ("video".to_string(), Buffer::Video(video)),
        ]);
        DataChunk::named("sync", buffers, 0)
    }

    #[tokio::test]
    async fn test_within_tolerance() {
        let mut node =
            SyncAvNode::from_params(&serde_json::json!({"tolerance_ms": 20.0})).unwrap();
        let (mut sink, mut rx) = test_sink("sync");

        sink.begin_chunk(0, 0);
        node.process(av_chunk(15_000), &mut sink).await.unwrap();

        let results = drain_results(&mut rx);
        let report = results[0].payload.buffer_for("out").unwrap().json_value().unwrap();
        assert_eq!(report["is_synced"], true);
        assert_eq!(report["offset_ms"], 15.0);
        assert_eq!(report["audio"]["duration_ms"], 100.0);
    }

    #[tokio::test]
    async fn test_out_of_tolerance() {
        let mut node = SyncAvNode::from_params(&serde_json::json!({})).unwrap();
        let (mut sink, mut rx) = test_sink("sync");

        sink.begin_chunk(0, 0);
        node.process(av_chunk(45_000), &mut sink).await.unwrap();

        let report = drain_results(&mut rx)[0]
            .payload
            .buffer_for("out")
            .unwrap()
            .json_value()
            .unwrap();
        assert_eq!(report["is_synced"], false);
        assert_eq!(report["offset_ms"], 45.0);
    }

    #[tokio::test]
    async fn test_missing_named_input_rejected() {
        let mut node = SyncAvNode::from_params(&serde_json::json!({})).unwrap();
        let (mut sink, _rx) = test_sink("sync");
        let chunk = DataChunk::named(
            "sync",
            HashMap::from([("audio".to_string(), Buffer::text("not audio"))]),
            0,
        );
        sink.begin_chunk(0, 0);
        assert!(node.process(chunk, &mut sink).await.is_err());
    }
}
