// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

use async_trait::async_trait;
use mediaflux_core::{
    BufferKind, DataChunk, InputPort, NodeDescriptor, OutputPort, OutputSink, PipelineNode,
    Result, DEFAULT_INPUT,
};

/// All buffer kinds, for nodes indifferent to payload type.
pub(crate) fn all_kinds() -> Vec<BufferKind> {
    vec![
        BufferKind::Audio,
        BufferKind::Video,
        BufferKind::Tensor,
        BufferKind::Json,
        BufferKind::Text,
        BufferKind::Binary,
    ]
}

/// Forwards every chunk unchanged. Useful for wiring tests and as the
/// smallest possible node implementation.
#[derive(Default)]
pub struct PassthroughNode;

#[async_trait]
impl PipelineNode for PassthroughNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::unary(
            vec![InputPort::default_port(all_kinds())],
            vec![OutputPort::default_port(all_kinds())],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        if let Some(buffer) = chunk.payload.buffer_for(DEFAULT_INPUT) {
            out.emit(buffer.clone()).await?;
        }
        Ok(())
    }
}
