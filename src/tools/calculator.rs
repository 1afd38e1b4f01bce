//! Arithmetic tools.

use serde_json::{json, Number, Value};

use super::num_arg;
use crate::registry::{Tool, ToolContext, ToolOutput, ToolSpec};
use crate::storage::BoxFuture;
use crate::{AppError, Result};

const CATEGORY: &str = "math";

fn operands_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": "number", "description": "Left operand"},
            "b": {"type": "number", "description": "Right operand"}
        },
        "required": ["a", "b"],
        "additionalProperties": false
    })
}

/// Render a result the way a client expects to read it back: integers
/// without a fractional part.
fn format_number(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(AppError::ToolExecution(format!("result is not finite: {value}")));
    }
    if let Some(whole) = exact_integer(value) {
        return Ok(whole.to_string());
    }
    Number::from_f64(value)
        .map(|n| n.to_string())
        .ok_or_else(|| AppError::ToolExecution(format!("result is not representable: {value}")))
}

/// Exact integers within the f64 mantissa print without ".0".
#[allow(clippy::cast_possible_truncation)]
fn exact_integer(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < 9.0e15).then(|| value as i64)
}

/// `calculator_add`: `a + b`.
#[derive(Debug)]
pub struct Add {
    spec: ToolSpec,
}

impl Add {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("calculator_add", "Add two numbers", operands_schema())
                .category(CATEGORY)
                .reentrant()
                .cacheable(),
        }
    }
}

impl Default for Add {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Add {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let sum = num_arg(&args, "a")? + num_arg(&args, "b")?;
            Ok(ToolOutput::text(format_number(sum)?))
        })
    }
}

/// `calculator_multiply`: `a * b`.
#[derive(Debug)]
pub struct Multiply {
    spec: ToolSpec,
}

impl Multiply {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("calculator_multiply", "Multiply two numbers", operands_schema())
                .category(CATEGORY)
                .reentrant()
                .cacheable(),
        }
    }
}

impl Default for Multiply {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Multiply {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let product = num_arg(&args, "a")? * num_arg(&args, "b")?;
            Ok(ToolOutput::text(format_number(product)?))
        })
    }
}
