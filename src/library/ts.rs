use super::args::{panel, scalar, shift, take, window};
use super::stats::{WindowBivariateMoments, WindowMoments};
use crate::align::EvalContext;
use crate::error::EvalError;
use crate::registry::{Arity, FunctionFn, OperatorTables};
use crate::types::{Panel, Value};
use std::slice::Windows;
use std::sync::Arc;

/// Trailing windows of one security's history, one item per row.
///
/// Rows before the first full window yield `None`.
pub(super) struct RollingWindows<'a> {
    warmup: usize,
    inner: Windows<'a, f64>,
}

impl<'a> RollingWindows<'a> {
    /// `len` must be positive.
    pub(super) fn new(data: &'a [f64], len: usize) -> Self {
        debug_assert!(len > 0, "rolling window requires len > 0");
        Self {
            warmup: len.saturating_sub(1).min(data.len()),
            inner: data.windows(len.max(1)),
        }
    }
}

impl<'a> Iterator for RollingWindows<'a> {
    type Item = Option<&'a [f64]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.warmup > 0 {
            self.warmup -= 1;
            return Some(None);
        }
        self.inner.next().map(Some)
    }
}

fn rolling(name: &'static str, reduce: fn(&[f64]) -> f64) -> FunctionFn {
    Arc::new(move |_ctx: &EvalContext<'_>, args: Vec<Value>| {
        let [x, n] = take::<2>(name, args)?;
        let n = window(name, &n)?;
        let x = panel(name, x)?;
        let out = x.map_columns(|column| {
            RollingWindows::new(column, n)
                .map(|w| w.map_or(f64::NAN, reduce))
                .collect()
        });
        Ok(Value::from(out))
    })
}

fn rolling_pair(name: &'static str, reduce: fn(&[f64], &[f64]) -> f64) -> FunctionFn {
    Arc::new(move |ctx: &EvalContext<'_>, args: Vec<Value>| {
        let [x, y, n] = take::<3>(name, args)?;
        let n = window(name, &n)?;
        let (x, y) = ctx.reconcile(&panel(name, x)?, &panel(name, y)?)?;
        let (rows, cols) = (x.rows(), x.cols());
        let mut out = vec![f64::NAN; rows * cols];
        for col in 0..cols {
            let (Some(xs), Some(ys)) = (x.column(col), y.column(col)) else {
                continue;
            };
            let windows = RollingWindows::new(&xs, n).zip(RollingWindows::new(&ys, n));
            for (row, pair) in windows.enumerate() {
                if let (Some(wx), Some(wy)) = pair {
                    out[row * cols + col] = reduce(wx, wy);
                }
            }
        }
        Ok(Value::from(x.with_values(out)))
    })
}

fn moments(window: &[f64], order: u8, f: fn(WindowMoments) -> f64) -> f64 {
    WindowMoments::collect(window, order).map_or(f64::NAN, f)
}

/// Missing cells poison a window; infinities pass through.
fn has_missing(window: &[f64]) -> bool {
    window.iter().any(|v| v.is_nan())
}

fn ts_min(window: &[f64]) -> f64 {
    if has_missing(window) {
        return f64::NAN;
    }
    window.iter().copied().fold(f64::INFINITY, f64::min)
}

fn ts_max(window: &[f64]) -> f64 {
    if has_missing(window) {
        return f64::NAN;
    }
    window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn product(window: &[f64]) -> f64 {
    if has_missing(window) {
        return f64::NAN;
    }
    window.iter().product()
}

fn count_nans(window: &[f64]) -> f64 {
    window.iter().filter(|v| v.is_nan()).count() as f64
}

/// Weights `1..=n`, oldest first, normalized to sum to one.
fn decay_linear(window: &[f64]) -> f64 {
    if has_missing(window) {
        return f64::NAN;
    }
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for (idx, v) in window.iter().enumerate() {
        let weight = (idx + 1) as f64;
        weighted_sum += weight * v;
        weight_sum += weight;
    }
    weighted_sum / weight_sum
}

fn decay_exp(window: &[f64], factor: f64) -> f64 {
    if has_missing(window) {
        return f64::NAN;
    }
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for (age, v) in window.iter().rev().enumerate() {
        let weight = factor.powi(age as i32);
        weighted_sum += weight * v;
        weight_sum += weight;
    }
    if weight_sum == 0.0 || !weight_sum.is_finite() {
        return f64::NAN;
    }
    weighted_sum / weight_sum
}

fn shifted(column: &[f64], n: usize, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    (0..column.len())
        .map(|row| {
            if row >= n {
                f(column[row], column[row - n])
            } else {
                f64::NAN
            }
        })
        .collect()
}

fn shift_fn(name: &'static str, f: fn(f64, f64) -> f64) -> FunctionFn {
    Arc::new(move |_ctx: &EvalContext<'_>, args: Vec<Value>| {
        let [x, n] = take::<2>(name, args)?;
        let n = shift(name, &n)?;
        let x = panel(name, x)?;
        Ok(Value::from(x.map_columns(|column| shifted(column, n, f))))
    })
}

fn call_decay_exp(_ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "Decay_exp";
    let [x, factor, n] = take::<3>(NAME, args)?;
    let n = window(NAME, &n)?;
    let factor = scalar(NAME, &factor)?;
    let x = panel(NAME, x)?;
    let out = x.map_columns(|column| {
        RollingWindows::new(column, n)
            .map(|w| w.map_or(f64::NAN, |w| decay_exp(w, factor)))
            .collect()
    });
    Ok(Value::from(out))
}

/// Per-row counter that reaches `n` on the last row.
fn call_step(_ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "Step";
    let [x, n] = take::<2>(NAME, args)?;
    let n = scalar(NAME, &n)?;
    let x = panel(NAME, x)?;
    Ok(Value::from(step(&x, n)))
}

fn step(x: &Panel, n: f64) -> Panel {
    let rows = x.rows();
    x.map_columns(|_| {
        (0..rows)
            .map(|row| n - (rows - 1 - row) as f64)
            .collect()
    })
}

pub(super) fn register(tables: &mut OperatorTables) {
    let windowed: [(&'static str, fn(&[f64]) -> f64); 10] = [
        ("Ts_Mean", |w| moments(w, 1, WindowMoments::mean)),
        ("StdDev", |w| moments(w, 2, WindowMoments::std)),
        ("Sum", |w| moments(w, 1, |m| m.sum)),
        ("Ts_Skewness", |w| moments(w, 3, WindowMoments::skew)),
        ("Ts_Kurtosis", |w| moments(w, 4, WindowMoments::kurt)),
        ("Ts_Min", ts_min),
        ("Ts_Max", ts_max),
        ("Product", product),
        ("CountNans", count_nans),
        ("Decay_linear", decay_linear),
    ];
    for (name, reduce) in windowed {
        tables.insert_function(name, Arity::Exact(2), rolling(name, reduce));
    }

    let pairs: [(&'static str, fn(&[f64], &[f64]) -> f64); 2] = [
        ("Correlation", |x, y| {
            WindowBivariateMoments::collect(x, y).map_or(f64::NAN, WindowBivariateMoments::corr)
        }),
        ("Covariance", |x, y| {
            WindowBivariateMoments::collect(x, y).map_or(f64::NAN, WindowBivariateMoments::cov)
        }),
    ];
    for (name, reduce) in pairs {
        tables.insert_function(name, Arity::Exact(3), rolling_pair(name, reduce));
    }

    tables.insert_function("Delay", Arity::Exact(2), shift_fn("Delay", |_, old| old));
    tables.insert_function("Delta", Arity::Exact(2), shift_fn("Delta", |cur, old| cur - old));
    tables.insert_function("Decay_exp", Arity::Exact(3), Arc::new(call_decay_exp));
    tables.insert_function("Step", Arity::Exact(2), Arc::new(call_step));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_windows_pad_warmup_rows() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let windows: Vec<_> = RollingWindows::new(&data, 3).collect();
        assert_eq!(windows.len(), 4);
        assert!(windows[0].is_none() && windows[1].is_none());
        assert_eq!(windows[2], Some(&data[0..3]));
        assert_eq!(windows[3], Some(&data[1..4]));
    }

    #[test]
    fn rolling_windows_longer_than_history() {
        let data = [1.0, 2.0];
        let windows: Vec<_> = RollingWindows::new(&data, 5).collect();
        assert_eq!(windows, vec![None, None]);
    }

    #[test]
    fn decay_weights() {
        // weights 1, 2, 3 oldest to newest
        assert!((decay_linear(&[3.0, 6.0, 9.0]) - 7.0).abs() < 1e-12);
        // weights 0.25, 0.5, 1 oldest to newest
        let expected = (0.25 * 4.0 + 0.5 * 2.0 + 1.0) / 1.75;
        assert!((decay_exp(&[4.0, 2.0, 1.0], 0.5) - expected).abs() < 1e-12);
    }

    #[test]
    fn shifted_keeps_length() {
        let out = shifted(&[1.0, 2.0, 4.0], 1, |cur, old| cur - old);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.0, 2.0]);
        let same = shifted(&[1.0, 2.0], 0, |_, old| old);
        assert_eq!(same, vec![1.0, 2.0]);
    }

    #[test]
    fn infinities_survive_extremes_and_products() {
        let window = [1.0, f64::INFINITY, -2.0];
        assert_eq!(ts_max(&window), f64::INFINITY);
        assert_eq!(ts_min(&window), -2.0);
        assert_eq!(product(&window), f64::NEG_INFINITY);
        assert_eq!(decay_linear(&[1.0, f64::INFINITY]), f64::INFINITY);
        assert!(ts_max(&[f64::INFINITY, f64::NAN]).is_nan());
    }

    #[test]
    fn count_nans_counts_missing() {
        assert_eq!(count_nans(&[1.0, f64::NAN, f64::NAN]), 2.0);
        assert!(product(&[1.0, f64::NAN]).is_nan());
        assert_eq!(product(&[2.0, 3.0]), 6.0);
    }
}
