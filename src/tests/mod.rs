use crate::error::{CompileError, EvalError, FactorError, ShapeError};
use crate::types::{Bindings, CaseStyle, CompileOptions, FactorRequest, Panel, Value};
use crate::{FactorSet, Parser};
use chrono::NaiveDate;
use std::collections::HashMap;

mod parse;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date") + chrono::Duration::days(i64::from(day) - 1)
}

fn dates(n: u32) -> Vec<NaiveDate> {
    (1..=n).map(d).collect()
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Single-security panel over consecutive January dates.
fn series(values: &[f64]) -> Panel {
    Panel::new(dates(values.len() as u32), symbols(&["A"]), values.to_vec())
        .expect("series panel")
}

fn panel(rows: Vec<Vec<f64>>, names: &[&str]) -> Panel {
    Panel::from_rows(dates(rows.len() as u32), symbols(names), rows).expect("panel")
}

fn eval(formula: &str, bindings: &Bindings) -> Result<Value, EvalError> {
    Parser::new()
        .parse(formula)
        .expect("formula should parse")
        .evaluate(bindings)
}

fn eval_scalar(formula: &str) -> f64 {
    eval(formula, &Bindings::new())
        .expect("formula should evaluate")
        .as_scalar()
        .expect("scalar result")
}

fn eval_panel(formula: &str, bindings: &Bindings) -> Panel {
    let value = eval(formula, bindings).expect("formula should evaluate");
    value
        .as_panel()
        .cloned()
        .unwrap_or_else(|| panic!("`{formula}` should yield a panel, got {value:?}"))
}

fn approx_eq(lhs: f64, rhs: f64) -> bool {
    (lhs.is_nan() && rhs.is_nan()) || (lhs - rhs).abs() < 1e-9
}

fn assert_values(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(approx_eq(*a, *e), "cell {idx}: {a} vs {e} ({actual:?})");
    }
}

fn naive_moments(values: &[f64]) -> (f64, f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>();
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>();
    let std = (m2 / (n - 1.0)).sqrt();
    let skew = (n * m3) / ((n - 1.0) * (n - 2.0) * std.powi(3));
    let kurt = (n * (n + 1.0) * m4) / ((n - 1.0) * (n - 2.0) * (n - 3.0) * std.powi(4))
        - 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0));
    (mean, std, skew, kurt)
}

fn synthetic_series(len: usize) -> Vec<f64> {
    let mut s = 0x9E37_79B9_7F4A_7C15u64;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        s = s
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let x = ((s >> 11) as f64) * (1.0 / ((1u64 << 53) as f64));
        out.push(x * 100.0);
    }
    out
}
