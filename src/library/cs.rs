use super::args::{panel, take};
use crate::align::EvalContext;
use crate::error::EvalError;
use crate::registry::{Arity, OperatorTables};
use crate::types::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Average ranks `1..=k` over the cells selected by `include`; other cells are NaN.
fn rank_row(src: &[f64], dst: &mut [f64], include: impl Fn(usize) -> bool) {
    let mut pairs: Vec<(usize, f64)> = src
        .iter()
        .enumerate()
        .filter(|(idx, v)| !v.is_nan() && include(*idx))
        .map(|(idx, v)| (idx, *v))
        .collect();
    dst.fill(f64::NAN);
    pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    let mut i = 0usize;
    while i < pairs.len() {
        let mut j = i + 1;
        while j < pairs.len() && pairs[j].1 == pairs[i].1 {
            j += 1;
        }
        let avg_rank = ((i + 1 + j) as f64) * 0.5;
        for (idx, _) in &pairs[i..j] {
            dst[*idx] = avg_rank;
        }
        i = j;
    }
}

fn call_rank(ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "Rank";
    let [x] = take::<1>(NAME, args)?;
    let x = ctx.rebase(&panel(NAME, x)?)?;
    Ok(Value::from(x.map_rows(|src, dst| rank_row(src, dst, |_| true))))
}

/// Ranks within each distinct group value of the same row. Cells whose group
/// is missing stay NaN.
fn call_group_rank(ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "GroupRank";
    let [x, group] = take::<2>(NAME, args)?;
    let x = ctx.rebase(&panel(NAME, x)?)?;
    let group = ctx.conform(&x, &panel(NAME, group)?)?;
    let cols = x.cols();
    let mut row = 0usize;
    let out = x.map_rows(|src, dst| {
        let start = row * cols;
        let groups = &group.values()[start..start + cols];
        row += 1;
        dst.fill(f64::NAN);
        let mut scratch = vec![f64::NAN; cols];
        let mut seen: Vec<f64> = Vec::new();
        for &g in groups {
            if g.is_nan() || seen.contains(&g) {
                continue;
            }
            seen.push(g);
            rank_row(src, &mut scratch, |idx| groups[idx] == g);
            for (out, ranked) in dst.iter_mut().zip(&scratch) {
                if out.is_nan() {
                    *out = *ranked;
                }
            }
        }
    });
    Ok(Value::from(out))
}

/// Ranks only the cells where `cond` is true (non-zero and not NaN).
fn call_condition_rank(ctx: &EvalContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    const NAME: &str = "ConditionRank";
    let [x, cond] = take::<2>(NAME, args)?;
    let x = ctx.rebase(&panel(NAME, x)?)?;
    let cond = ctx.conform(&x, &panel(NAME, cond)?)?;
    let cols = x.cols();
    let mut row = 0usize;
    let out = x.map_rows(|src, dst| {
        let start = row * cols;
        let mask = &cond.values()[start..start + cols];
        row += 1;
        rank_row(src, dst, |idx| mask[idx] != 0.0 && !mask[idx].is_nan());
    });
    Ok(Value::from(out))
}

pub(super) fn register(tables: &mut OperatorTables) {
    tables.insert_function("Rank", Arity::Exact(1), Arc::new(call_rank));
    tables.insert_function("GroupRank", Arity::Exact(2), Arc::new(call_group_rank));
    tables.insert_function(
        "ConditionRank",
        Arity::Exact(2),
        Arc::new(call_condition_rank),
    );
}
