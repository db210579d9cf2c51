// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Re-frames incoming audio into fixed-duration frames.
//!
//! Accumulates across input chunks: a 100 ms buffer through a 20 ms
//! chunker emits five frames, and a trailing remainder waits for the next
//! chunk. An accumulator that happens to get less than one frame emits
//! nothing, which is the legitimate zero-output case of the node contract.

use async_trait::async_trait;
use bytes::Bytes;
use mediaflux_core::buffer::{AudioBuffer, SampleFormat};
use mediaflux_core::{
    Buffer, BufferKind, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result, DEFAULT_INPUT,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioChunkerParams {
    /// Emitted frame duration in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

const fn default_frame_ms() -> u64 {
    20
}

/// The stream shape we are currently accumulating. A change mid-stream
/// flushes nothing and is an error: callers must keep a stable format per
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamShape {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
}

pub struct AudioChunkerNode {
    frame_ms: u64,
    shape: Option<StreamShape>,
    pending: Vec<u8>,
}

impl AudioChunkerNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize or the
    /// frame duration is zero.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: AudioChunkerParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("audio chunker params: {e}")))?;
        if params.frame_ms == 0 {
            return Err(FluxError::Validation("frame duration must be positive".to_string()));
        }
        Ok(Self { frame_ms: params.frame_ms, shape: None, pending: Vec::new() })
    }

    fn frame_samples(&self, shape: StreamShape) -> usize {
        (u64::from(shape.sample_rate) * self.frame_ms / 1000) as usize
    }
}

#[async_trait]
impl PipelineNode for AudioChunkerNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::streaming(
            vec![InputPort::default_port(vec![BufferKind::Audio])],
            vec![OutputPort::default_port(vec![BufferKind::Audio])],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let audio = match chunk.payload.buffer_for(DEFAULT_INPUT) {
            Some(Buffer::Audio(audio)) => audio.clone(),
            _ => return Err(FluxError::Validation("chunker input must be audio".to_string())),
        };

        let shape = StreamShape {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            format: audio.format,
        };
        match self.shape {
            None => self.shape = Some(shape),
            Some(current) if current != shape => {
                return Err(FluxError::Validation(format!(
                    "audio format changed mid-stream: {current:?} -> {shape:?}"
                )));
            },
            Some(_) => {},
        }

        self.pending.extend_from_slice(&audio.samples);

        let frame_samples = self.frame_samples(shape);
        let frame_bytes = frame_samples * shape.channels as usize * shape.format.sample_size();
        if frame_bytes == 0 {
            return Err(FluxError::Validation(
                "frame duration rounds to zero samples at this rate".to_string(),
            ));
        }

        while self.pending.len() >= frame_bytes {
            let rest = self.pending.split_off(frame_bytes);
            let frame = std::mem::replace(&mut self.pending, rest);
            out.emit(Buffer::Audio(AudioBuffer {
                samples: Bytes::from(frame),
                sample_rate: shape.sample_rate,
                channels: shape.channels,
                format: shape.format,
                num_samples: frame_samples as u64,
            }))
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, test_sink};

    #[tokio::test]
    async fn test_splits_into_fixed_frames() {
        // 100 ms at 16 kHz mono through a 20 ms chunker: five frames.
        let mut node = AudioChunkerNode::from_params(&serde_json::json!({"frame_ms": 20})).unwrap();
        let (mut sink, mut rx) = test_sink("chunker");

        let input = AudioBuffer::from_f32(&vec![0.5; 1600], 16_000, 1);
        sink.begin_chunk(0, 0);
        node.process(DataChunk::single("chunker", Buffer::Audio(input), 0), &mut sink)
            .await
            .unwrap();

        let results = drain_results(&mut rx);
        assert_eq!(results.len(), 5);
        for result in &results {
            let Buffer::Audio(frame) = result.payload.buffer_for("out").unwrap() else {
                panic!("expected audio");
            };
            assert_eq!(frame.num_samples, 320);
            assert_eq!(frame.duration_us(), Some(20_000));
        }
    }

    #[tokio::test]
    async fn test_remainder_carries_over() {
        // 30 ms then 10 ms: one frame after the first chunk, another after
        // the second.
        let mut node = AudioChunkerNode::from_params(&serde_json::json!({"frame_ms": 20})).unwrap();
        let (mut sink, mut rx) = test_sink("chunker");

        sink.begin_chunk(0, 0);
        let first = AudioBuffer::from_f32(&vec![0.1; 480], 16_000, 1);
        node.process(DataChunk::single("chunker", Buffer::Audio(first), 0), &mut sink)
            .await
            .unwrap();
        assert_eq!(drain_results(&mut rx).len(), 1);

        sink.begin_chunk(1, 0);
        let second = AudioBuffer::from_f32(&vec![0.2; 160], 16_000, 1);
        node.process(DataChunk::single("chunker", Buffer::Audio(second), 1), &mut sink)
            .await
            .unwrap();
        assert_eq!(drain_results(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_short_input_accumulates_silently() {
        let mut node = AudioChunkerNode::from_params(&serde_json::json!({"frame_ms": 20})).unwrap();
        let (mut sink, mut rx) = test_sink("chunker");

        let tiny = AudioBuffer::from_f32(&vec![0.1; 16], 16_000, 1); // 1 ms
        sink.begin_chunk(0, 0);
        node.process(DataChunk::single("chunker", Buffer::Audio(tiny), 0), &mut sink)
            .await
            .unwrap();
        assert!(drain_results(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_format_change_rejected() {
        let mut node = AudioChunkerNode::from_params(&serde_json::json!({})).unwrap();
        let (mut sink, _rx) = test_sink("chunker");

        sink.begin_chunk(0, 0);
        let mono = AudioBuffer::from_f32(&vec![0.0; 160], 16_000, 1);
        node.process(DataChunk::single("chunker", Buffer::Audio(mono), 0), &mut sink)
            .await
            .unwrap();

        sink.begin_chunk(1, 0);
        let stereo = AudioBuffer::from_f32(&vec![0.0; 160], 16_000, 2);
        assert!(node
            .process(DataChunk::single("chunker", Buffer::Audio(stereo), 1), &mut sink)
            .await
            .is_err());
    }
}
