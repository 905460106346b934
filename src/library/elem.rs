use super::args::take;
use crate::align::EvalContext;
use crate::error::EvalError;
use crate::registry::{
    Arity, BinaryFn, FunctionFn, OperatorTables, UnaryFn, NAMED_UNARY_PRIORITY,
};
use crate::types::{Panel, Value};
use std::sync::Arc;

enum Operand {
    Scalar(f64),
    Panel(Arc<Panel>),
}

fn operand(func: &str, value: Value) -> Result<Operand, EvalError> {
    match value {
        Value::Scalar(v) => Ok(Operand::Scalar(v)),
        Value::Panel(p) => Ok(Operand::Panel(p)),
        other => Err(EvalError::TypeMismatch {
            func: func.to_string(),
            expected: "scalar or panel",
            actual: other.kind(),
        }),
    }
}

/// Applies `f` cell by cell, broadcasting scalars.
///
/// The panel with the most rows (first on ties) sets the output index; every
/// other panel is conformed onto it. Under forced alignment every panel is
/// re-based onto the trading dates beforehand.
pub(super) fn elementwise<const N: usize>(
    ctx: &EvalContext<'_>,
    func: &str,
    args: [Value; N],
    f: impl Fn([f64; N]) -> f64,
) -> Result<Value, EvalError> {
    let mut operands = Vec::with_capacity(N);
    for value in args {
        let op = match operand(func, value)? {
            Operand::Panel(p) => Operand::Panel(ctx.prepare(&p)?),
            scalar => scalar,
        };
        operands.push(op);
    }
    let reference = operands
        .iter()
        .filter_map(|op| match op {
            Operand::Panel(p) => Some(p),
            Operand::Scalar(_) => None,
        })
        .reduce(|best, p| if p.rows() > best.rows() { p } else { best })
        .cloned();

    let Some(reference) = reference else {
        let xs = std::array::from_fn(|k| match &operands[k] {
            Operand::Scalar(v) => *v,
            Operand::Panel(_) => f64::NAN,
        });
        return Ok(Value::Scalar(f(xs)));
    };

    for op in operands.iter_mut() {
        if let Operand::Panel(p) = op {
            *p = ctx.conform(&reference, p)?;
        }
    }
    let cells = reference.values().len();
    let mut out = Vec::with_capacity(cells);
    for cell in 0..cells {
        let xs = std::array::from_fn(|k| match &operands[k] {
            Operand::Scalar(v) => *v,
            Operand::Panel(p) => p.values()[cell],
        });
        out.push(f(xs));
    }
    Ok(Value::from(reference.with_values(out)))
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> UnaryFn {
    Arc::new(move |ctx: &EvalContext<'_>, value: Value| {
        elementwise(ctx, name, [value], |[x]| f(x))
    })
}

fn binary(name: &'static str, f: fn(f64, f64) -> f64) -> BinaryFn {
    Arc::new(move |ctx: &EvalContext<'_>, lhs: Value, rhs: Value| {
        elementwise(ctx, name, [lhs, rhs], |[a, b]| f(a, b))
    })
}

fn function<const N: usize>(name: &'static str, f: fn([f64; N]) -> f64) -> FunctionFn {
    Arc::new(move |ctx: &EvalContext<'_>, args: Vec<Value>| {
        let args = take::<N>(name, args)?;
        elementwise(ctx, name, args, f)
    })
}

/// The comma operator: builds the argument list of a call.
fn append(_ctx: &EvalContext<'_>, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    Ok(match lhs {
        Value::List(mut items) => {
            items.push(rhs);
            Value::List(items)
        }
        single => Value::List(vec![single, rhs]),
    })
}

#[inline]
fn truth(x: f64) -> bool {
    x != 0.0
}

#[inline]
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn compare(a: f64, b: f64, op: fn(f64, f64) -> bool) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        flag(op(a, b))
    }
}

fn logical_and(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        flag(truth(a) && truth(b))
    }
}

fn logical_or(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        flag(truth(a) || truth(b))
    }
}

/// Floored modulo; the result takes the sign of the divisor.
fn modulo(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    a - b * (a / b).floor()
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        // 0 stays 0, NaN stays NaN
        x * 0.0
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn select([cond, a, b]: [f64; 3]) -> f64 {
    if cond.is_nan() {
        f64::NAN
    } else if truth(cond) {
        a
    } else {
        b
    }
}

fn tail([x, lower, upper, replacement]: [f64; 4]) -> f64 {
    if x < lower || x > upper {
        replacement
    } else {
        x
    }
}

fn signed_power([x, e]: [f64; 2]) -> f64 {
    sign(x) * x.abs().powf(e)
}

pub(super) fn register(tables: &mut OperatorTables) {
    tables.insert_unary("-", 5, unary("-", |x| -x));
    let named: [(&'static str, fn(f64) -> f64); 11] = [
        ("Sin", f64::sin),
        ("Cos", f64::cos),
        ("Tan", f64::tan),
        ("Sqrt", f64::sqrt),
        ("Log", f64::ln),
        ("Abs", f64::abs),
        ("Ceil", f64::ceil),
        ("Floor", f64::floor),
        ("Round", f64::round_ties_even),
        ("Sign", sign),
        ("exp", f64::exp),
    ];
    for (name, f) in named {
        tables.insert_unary(name, NAMED_UNARY_PRIORITY, unary(name, f));
    }

    tables.insert_binary("+", 2, binary("+", |a, b| a + b));
    tables.insert_binary("-", 2, binary("-", |a, b| a - b));
    tables.insert_binary("*", 3, binary("*", |a, b| a * b));
    tables.insert_binary("/", 4, binary("/", |a, b| a / b));
    tables.insert_binary("%", 4, binary("%", modulo));
    tables.insert_binary("^", 6, binary("^", f64::powf));
    tables.insert_binary("==", 1, binary("==", |a, b| compare(a, b, |x, y| x == y)));
    tables.insert_binary("!=", 1, binary("!=", |a, b| compare(a, b, |x, y| x != y)));
    tables.insert_binary(">", 1, binary(">", |a, b| compare(a, b, |x, y| x > y)));
    tables.insert_binary("<", 1, binary("<", |a, b| compare(a, b, |x, y| x < y)));
    tables.insert_binary(">=", 1, binary(">=", |a, b| compare(a, b, |x, y| x >= y)));
    tables.insert_binary("<=", 1, binary("<=", |a, b| compare(a, b, |x, y| x <= y)));
    tables.insert_binary("&&", 0, binary("&&", logical_and));
    tables.insert_binary("and", 0, binary("and", logical_and));
    tables.insert_binary("||", 0, binary("||", logical_or));
    tables.insert_binary("or", 0, binary("or", logical_or));
    tables.insert_binary(",", -1, Arc::new(append));

    tables.insert_function("If", Arity::Exact(3), function::<3>("If", select));
    tables.insert_function("Tail", Arity::Exact(4), function::<4>("Tail", tail));
    tables.insert_function(
        "SignedPower",
        Arity::Exact(2),
        function::<2>("SignedPower", signed_power),
    );
    tables.insert_function("Min", Arity::Exact(2), function::<2>("Min", |[a, b]| nan_min(a, b)));
    tables.insert_function("Max", Arity::Exact(2), function::<2>("Max", |[a, b]| nan_max(a, b)));
    tables.insert_function("Pow", Arity::Exact(2), function::<2>("Pow", |[a, b]| a.powf(b)));
}
