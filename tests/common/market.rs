#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use factor_formula::{Bindings, Panel};

pub const TOL: f64 = 1e-8;

/// Deterministic daily OHLCV panels for a small universe.
pub struct Market {
    pub open: Panel,
    pub high: Panel,
    pub low: Panel,
    pub close: Panel,
    pub volume: Panel,
    pub vwap: Panel,
}

impl Market {
    pub fn bindings(&self) -> Bindings {
        Bindings::new()
            .with("open", self.open.clone())
            .with("high", self.high.clone())
            .with("low", self.low.clone())
            .with("close", self.close.clone())
            .with("volume", self.volume.clone())
            .with("vwap", self.vwap.clone())
    }
}

struct Lcg(u64);

impl Lcg {
    /// Uniform in `[0, 1)`.
    fn uniform(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 11) as f64) * (1.0 / ((1u64 << 53) as f64))
    }
}

pub fn trading_dates(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| {
            start
                .checked_add_days(Days::new(i as u64))
                .expect("date in range")
        })
        .collect()
}

pub fn market(rows: usize, symbols: &[&str], seed: u64) -> Market {
    let dates = trading_dates(
        NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
        rows,
    );
    let names: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
    let cols = names.len();
    let mut rng = Lcg(seed);

    let mut open = Vec::with_capacity(rows * cols);
    let mut high = Vec::with_capacity(rows * cols);
    let mut low = Vec::with_capacity(rows * cols);
    let mut close = Vec::with_capacity(rows * cols);
    let mut volume = Vec::with_capacity(rows * cols);
    let mut vwap = Vec::with_capacity(rows * cols);
    let mut last: Vec<f64> = (0..cols).map(|c| 50.0 + 10.0 * c as f64).collect();
    for _ in 0..rows {
        for prev in last.iter_mut() {
            let o = *prev * (1.0 + (rng.uniform() - 0.5) * 0.02);
            let c = o * (1.0 + (rng.uniform() - 0.5) * 0.04);
            let h = o.max(c) + rng.uniform();
            let l = o.min(c) - rng.uniform();
            open.push(o);
            close.push(c);
            high.push(h);
            low.push(l);
            volume.push(1_000.0 + (rng.uniform() * 5_000.0).round());
            vwap.push((h + l + c) / 3.0);
            *prev = c;
        }
    }

    let build = |values: Vec<f64>| {
        Panel::new(dates.clone(), names.clone(), values).expect("market panel")
    };
    Market {
        open: build(open),
        high: build(high),
        low: build(low),
        close: build(close),
        volume: build(volume),
        vwap: build(vwap),
    }
}

/// Average ranks `1..=k` over the finite cells of one row.
pub fn naive_rank(row: &[f64]) -> Vec<f64> {
    row.iter()
        .map(|v| {
            if v.is_nan() {
                return f64::NAN;
            }
            let below = row.iter().filter(|o| !o.is_nan() && **o < *v).count() as f64;
            let equal = row.iter().filter(|o| *o == v).count() as f64;
            below + (equal + 1.0) * 0.5
        })
        .collect()
}

pub fn naive_rank_panel(panel: &Panel) -> Vec<f64> {
    (0..panel.rows())
        .flat_map(|row| naive_rank(panel.row(row).expect("row")))
        .collect()
}

pub fn naive_cov(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    xs.iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / (n - 1.0)
}

pub fn naive_corr(xs: &[f64], ys: &[f64]) -> f64 {
    naive_cov(xs, ys) / (naive_cov(xs, xs).sqrt() * naive_cov(ys, ys).sqrt())
}

/// Applies `f` to every trailing window of each column; warmup rows are NaN.
pub fn naive_rolling_pair(
    x: &[f64],
    y: &[f64],
    rows: usize,
    cols: usize,
    n: usize,
    f: fn(&[f64], &[f64]) -> f64,
) -> Vec<f64> {
    let mut out = vec![f64::NAN; rows * cols];
    for col in 0..cols {
        let xs: Vec<f64> = (0..rows).map(|r| x[r * cols + col]).collect();
        let ys: Vec<f64> = (0..rows).map(|r| y[r * cols + col]).collect();
        for row in n - 1..rows {
            let w = row + 1 - n..=row;
            let (wx, wy) = (&xs[w.clone()], &ys[w]);
            if wx.iter().chain(wy).all(|v| v.is_finite()) {
                out[row * cols + col] = f(wx, wy);
            }
        }
    }
    out
}

pub fn assert_close(actual: &[f64], expected: &[f64], label: &str) {
    assert_eq!(actual.len(), expected.len(), "{label}: length");
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        let ok = (a.is_nan() && e.is_nan()) || (a - e).abs() <= TOL * e.abs().max(1.0);
        assert!(ok, "{label}: cell {idx}: got {a}, expected {e}");
    }
}
