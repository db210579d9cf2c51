// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! JSON arithmetic node.
//!
//! Configured with an operation and an operand; every incoming
//! `{"value": x}` chunk produces `{"result": x <op> operand}`.

use async_trait::async_trait;
use mediaflux_core::{
    Buffer, BufferKind, DataChunk, FluxError, InputPort, NodeDescriptor, OutputPort, OutputSink,
    PipelineNode, Result, DEFAULT_INPUT,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CalculatorParams {
    pub op: Operation,
    /// Right-hand operand applied to every incoming value.
    pub value: f64,
}

pub struct CalculatorNode {
    params: CalculatorParams,
}

impl CalculatorNode {
    /// # Errors
    ///
    /// [`FluxError::Validation`] when `params` does not deserialize.
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: CalculatorParams = serde_json::from_value(params.clone())
            .map_err(|e| FluxError::Validation(format!("calculator params: {e}")))?;
        Ok(Self { params })
    }

    fn apply(&self, value: f64) -> Result<f64> {
        let rhs = self.params.value;
        let result = match self.params.op {
            Operation::Add => value + rhs,
            Operation::Subtract => value - rhs,
            Operation::Multiply => value * rhs,
            Operation::Divide => {
                if rhs == 0.0 {
                    return Err(FluxError::Validation("division by zero".to_string()));
                }
                value / rhs
            },
            Operation::Power => value.powf(rhs),
            Operation::Modulo => {
                if rhs == 0.0 {
                    return Err(FluxError::Validation("modulo by zero".to_string()));
                }
                value % rhs
            },
        };
        Ok(result)
    }
}

#[async_trait]
impl PipelineNode for CalculatorNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::unary(
            vec![InputPort::default_port(vec![BufferKind::Json])],
            vec![OutputPort::default_port(vec![BufferKind::Json])],
        )
    }

    async fn process(&mut self, chunk: DataChunk, out: &mut OutputSink) -> Result<()> {
        let buffer = chunk
            .payload
            .buffer_for(DEFAULT_INPUT)
            .ok_or_else(|| FluxError::Validation("calculator chunk has no buffer".to_string()))?;
        let input = buffer.json_value()?;
        let value = input
            .get("value")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                FluxError::Validation("calculator input must carry a numeric 'value'".to_string())
            })?;

        let result = self.apply(value)?;
        // Whole results print as integers, matching the input style.
        #[allow(clippy::float_cmp)]
        let result_value = if result.fract() == 0.0 && result.abs() < 1e15 {
            #[allow(clippy::cast_possible_truncation)]
            serde_json::json!({ "result": result as i64 })
        } else {
            serde_json::json!({ "result": result })
        };
        out.emit(Buffer::json(&result_value)?).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{drain_results, json_chunk, test_sink};

    fn calculator(op: &str, value: f64) -> CalculatorNode {
        CalculatorNode::from_params(&serde_json::json!({ "op": op, "value": value })).unwrap()
    }

    #[tokio::test]
    async fn test_add() {
        let mut node = calculator("add", 5.0);
        let (mut sink, mut rx) = test_sink("c");

        sink.begin_chunk(0, 0);
        node.process(json_chunk("c", serde_json::json!({"value": 10}), 0), &mut sink)
            .await
            .unwrap();

        let results = drain_results(&mut rx);
        assert_eq!(results.len(), 1);
        let value = results[0].payload.buffer_for("out").unwrap().json_value().unwrap();
        assert_eq!(value, serde_json::json!({"result": 15}));
    }

    #[tokio::test]
    async fn test_operations() {
        for (op, value, input, expected) in [
            ("subtract", 3.0, 10.0, 7.0),
            ("multiply", 4.0, 2.5, 10.0),
            ("divide", 4.0, 10.0, 2.5),
            ("power", 2.0, 3.0, 9.0),
            ("modulo", 3.0, 10.0, 1.0),
        ] {
            let mut node = calculator(op, value);
            let (mut sink, mut rx) = test_sink("c");
            sink.begin_chunk(0, 0);
            node.process(json_chunk("c", serde_json::json!({"value": input}), 0), &mut sink)
                .await
                .unwrap();
            let results = drain_results(&mut rx);
            let out = results[0].payload.buffer_for("out").unwrap().json_value().unwrap();
            assert_eq!(out["result"].as_f64().unwrap(), expected, "op {op}");
        }
    }

    #[tokio::test]
    async fn test_divide_by_zero_is_error() {
        let mut node = calculator("divide", 0.0);
        let (mut sink, _rx) = test_sink("c");
        sink.begin_chunk(0, 0);
        let err = node
            .process(json_chunk("c", serde_json::json!({"value": 1}), 0), &mut sink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_non_numeric_input_rejected() {
        let mut node = calculator("add", 1.0);
        let (mut sink, _rx) = test_sink("c");
        sink.begin_chunk(0, 0);
        assert!(node
            .process(json_chunk("c", serde_json::json!({"word": "ten"}), 0), &mut sink)
            .await
            .is_err());
    }

    #[test]
    fn test_bad_params_rejected() {
        assert!(CalculatorNode::from_params(&serde_json::json!({"op": "launch"})).is_err());
    }
}
