//! Four-function calculator.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{McpError, McpResult};
use crate::tool::{Tool, ToolCtx};

/// `calculator` - add/sub/mul/div over two numbers.
#[derive(Debug, Default)]
pub struct CalculatorTool;

#[derive(Debug, Deserialize)]
struct Args {
    op: String,
    a: f64,
    b: f64,
}

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic: add, sub, mul, div"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "op": {"type": "string", "enum": ["add", "sub", "mul", "div"]},
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["op", "a", "b"]
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: Args = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("calculator: {err}")))?;

        let result = match args.op.as_str() {
            "add" => args.a + args.b,
            "sub" => args.a - args.b,
            "mul" => args.a * args.b,
            "div" => {
                if args.b == 0.0 {
                    return Err(McpError::invalid_argument("division by zero"));
                }
                args.a / args.b
            }
            other => {
                return Err(McpError::invalid_argument(format!("unknown op: {other}")));
            }
        };

        if !result.is_finite() {
            return Err(McpError::invalid_argument("result is not a finite number"));
        }

        // Whole results print without a fractional part ("60", not "60.0").
        if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
            Ok(json!(result as i64))
        } else {
            Ok(json!(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolFailure;

    async fn calc(op: &str, a: f64, b: f64) -> McpResult<Value> {
        CalculatorTool
            .call(json!({"op": op, "a": a, "b": b}), &ToolCtx::default())
            .await
    }

    #[tokio::test]
    async fn whole_results_are_integers() {
        assert_eq!(calc("mul", 15.0, 4.0).await.unwrap(), json!(60));
        assert_eq!(calc("add", 1.0, 2.0).await.unwrap(), json!(3));
        assert_eq!(calc("sub", 5.0, 7.0).await.unwrap(), json!(-2));
    }

    #[tokio::test]
    async fn fractional_results_stay_floats() {
        assert_eq!(calc("div", 1.0, 2.0).await.unwrap(), json!(0.5));
    }

    #[tokio::test]
    async fn division_by_zero_is_invalid_argument() {
        let err = calc("div", 1.0, 0.0).await.unwrap_err();
        match err {
            McpError::Tool { kind, .. } => assert_eq!(kind, ToolFailure::InvalidArgument),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_to_infinity_is_rejected() {
        let err = calc("mul", f64::MAX, 2.0).await.unwrap_err();
        assert!(matches!(err, McpError::Tool { .. }));
    }

    #[tokio::test]
    async fn unknown_op_rejected() {
        assert!(calc("pow", 2.0, 3.0).await.is_err());
    }
}
