// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

use async_trait::async_trait;
use mediaflux_core::{
    Buffer, BufferKind, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result, DEFAULT_INPUT,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GainParams {
    /// Linear gain applied to every sample.
    pub gain: f32,
}

/// Applies a fixed linear gain to f32 audio.
pub struct AudioGainNode {
    gain: f32,
}

impl AudioGainNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize or the
    /// gain is not finite.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: GainParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("gain params: {e}")))?;
        if !params.gain.is_finite() {
            return Err(FluxError::Validation("gain must be finite".to_string()));
        }
        Ok(Self { gain: params.gain })
    }
}

#[async_trait]
impl PipelineNode for AudioGainNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::unary(
            vec![InputPort::default_port(vec![BufferKind::Audio])],
            vec![OutputPort::default_port(vec![BufferKind::Audio])],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let audio = match chunk.payload.buffer_for(DEFAULT_INPUT) {
            Some(Buffer::Audio(audio)) => audio.clone(),
            _ => return Err(FluxError::Validation("gain input must be audio".to_string())),
        };

        // Sample loops run on the blocking pool, not the scheduler threads.
        let gain = self.gain;
        let scaled = mediaflux_core::run_blocking(move || {
            let mut samples = audio.samples_f32()?;
            for sample in &mut samples {
                *sample *= gain;
            }
            let mut scaled = mediaflux_core::buffer::AudioBuffer::from_f32(
                &samples,
                audio.sample_rate,
                audio.channels,
            );
            scaled.num_samples = audio.num_samples;
            Ok(scaled)
        })
        .await?;
        out.emit(Buffer::Audio(scaled)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, test_sink};
    use mediaflux_core::buffer::AudioBuffer;

    #[tokio::test]
    async fn test_applies_gain() {
        let mut node = AudioGainNode::from_params(&serde_json::json!({"gain": 2.0})).unwrap();
        let (mut sink, mut rx) = test_sink("gain");

        let input = AudioBuffer::from_f32(&[0.5, -0.25, 0.125, -0.0625], 48_000, 2);
        sink.begin_chunk(0, 0);
        node.process(DataChunk::single("gain", Buffer::Audio(input), 0), &mut sink)
            .await
            .unwrap();

        let results = drain_results(&mut rx);
        let Buffer::Audio(audio) = results[0].payload.buffer_for("out").unwrap() else {
            panic!("expected audio");
        };
        assert_eq!(audio.samples_f32().unwrap(), vec![1.0, -0.5, 0.25, -0.125]);
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 2);
    }

    #[tokio::test]
    async fn test_rejects_non_audio() {
        let mut node = AudioGainNode::from_params(&serde_json::json!({"gain": 1.0})).unwrap();
        let (mut sink, _rx) = test_sink("gain");
        sink.begin_chunk(0, 0);
        assert!(node
            .process(DataChunk::single("gain", Buffer::text("x"), 0), &mut sink)
            .await
            .is_err());
    }

    #[test]
    fn test_nan_gain_rejected() {
        assert!(AudioGainNode::from_params(&serde_json::json!({"gain": f32::NAN})).is_err());
    }
}
