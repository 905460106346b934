use crate::error::EvalError;
use crate::registry::Arity;
use crate::types::{Panel, Value};
use std::sync::Arc;

/// Moves exactly `N` arguments out of `args`.
pub(super) fn take<const N: usize>(func: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
    let actual = args.len();
    args.try_into().map_err(|_| EvalError::InvalidArity {
        name: func.to_string(),
        expected: Arity::Exact(N),
        actual,
    })
}

pub(super) fn scalar(func: &str, value: &Value) -> Result<f64, EvalError> {
    value.as_scalar().ok_or_else(|| EvalError::TypeMismatch {
        func: func.to_string(),
        expected: "scalar",
        actual: value.kind(),
    })
}

pub(super) fn panel(func: &str, value: Value) -> Result<Arc<Panel>, EvalError> {
    match value {
        Value::Panel(p) => Ok(p),
        other => Err(EvalError::TypeMismatch {
            func: func.to_string(),
            expected: "panel",
            actual: other.kind(),
        }),
    }
}

/// Rolling window length: a positive integer.
pub(super) fn window(func: &str, value: &Value) -> Result<usize, EvalError> {
    let n = scalar(func, value)?;
    if !n.is_finite() || n < 1.0 || n.fract() != 0.0 {
        return Err(EvalError::InvalidArgument {
            func: func.to_string(),
            reason: format!("window must be a positive integer, got {n}"),
        });
    }
    Ok(n as usize)
}

/// Shift distance: a non-negative integer.
pub(super) fn shift(func: &str, value: &Value) -> Result<usize, EvalError> {
    let n = scalar(func, value)?;
    if !n.is_finite() || n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::InvalidArgument {
            func: func.to_string(),
            reason: format!("shift must be a non-negative integer, got {n}"),
        });
    }
    Ok(n as usize)
}
