use crate::error::ShapeError;
use crate::registry::FunctionRef;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Date-indexed, security-columned table of `f64` cells.
///
/// A missing observation is `NaN`; it is never confused with zero and flows
/// through arithmetic instead of raising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PanelRepr", into = "PanelRepr")]
pub struct Panel {
    dates: Arc<[NaiveDate]>,
    symbols: Arc<[String]>,
    /// Row-major matrix: `values[row * symbols.len() + col]`.
    values: Vec<f64>,
}

impl Panel {
    pub fn new(
        dates: Vec<NaiveDate>,
        symbols: Vec<String>,
        values: Vec<f64>,
    ) -> Result<Self, ShapeError> {
        check_strictly_increasing(&dates)?;
        check_unique_symbols(&symbols)?;
        let expected = dates.len() * symbols.len();
        if values.len() != expected {
            return Err(ShapeError::CellCount {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            dates: dates.into(),
            symbols: symbols.into(),
            values,
        })
    }

    pub fn from_rows(
        dates: Vec<NaiveDate>,
        symbols: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, ShapeError> {
        let width = symbols.len();
        let mut values = Vec::with_capacity(rows.len() * width);
        for row in &rows {
            if row.len() != width {
                return Err(ShapeError::CellCount {
                    expected: width,
                    actual: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        if rows.len() != dates.len() {
            return Err(ShapeError::RowMismatch {
                lhs: dates.len(),
                rhs: rows.len(),
            });
        }
        Self::new(dates, symbols, values)
    }

    /// Panel with every cell set to `value`.
    pub fn full(dates: Vec<NaiveDate>, symbols: Vec<String>, value: f64) -> Result<Self, ShapeError> {
        let cells = dates.len() * symbols.len();
        Self::new(dates, symbols, vec![value; cells])
    }

    /// Builds a panel sharing an already validated index.
    pub(crate) fn from_parts(
        dates: Arc<[NaiveDate]>,
        symbols: Arc<[String]>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(values.len(), dates.len() * symbols.len());
        Self {
            dates,
            symbols,
            values,
        }
    }

    #[inline]
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    #[inline]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.dates.len()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn symbol_idx(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    #[inline]
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        Some(self.values[row * self.cols() + col])
    }

    /// Cell lookup by date and security.
    pub fn get(&self, date: NaiveDate, symbol: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        let col = self.symbol_idx(symbol)?;
        self.value_at(row, col)
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.rows() {
            return None;
        }
        let start = row * self.cols();
        Some(&self.values[start..start + self.cols()])
    }

    pub fn column(&self, col: usize) -> Option<Vec<f64>> {
        if col >= self.cols() {
            return None;
        }
        Some(
            self.values
                .iter()
                .skip(col)
                .step_by(self.cols())
                .copied()
                .collect(),
        )
    }

    pub fn column_by_symbol(&self, symbol: &str) -> Option<Vec<f64>> {
        self.column(self.symbol_idx(symbol)?)
    }

    #[inline]
    pub fn same_index(&self, other: &Panel) -> bool {
        self.dates == other.dates && self.symbols == other.symbols
    }

    /// New panel on the same index with `values` replaced.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        Self::from_parts(self.dates.clone(), self.symbols.clone(), values)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        self.with_values(self.values.iter().map(|v| f(*v)).collect())
    }

    /// Applies `f` to each security's history (oldest first) independently.
    pub(crate) fn map_columns(&self, mut f: impl FnMut(&[f64]) -> Vec<f64>) -> Self {
        let (rows, cols) = (self.rows(), self.cols());
        let mut out = vec![f64::NAN; rows * cols];
        let mut column = Vec::with_capacity(rows);
        for col in 0..cols {
            column.clear();
            column.extend(self.values.iter().skip(col).step_by(cols.max(1)).copied());
            let mapped = f(&column);
            debug_assert_eq!(mapped.len(), rows);
            for (row, value) in mapped.into_iter().enumerate().take(rows) {
                out[row * cols + col] = value;
            }
        }
        self.with_values(out)
    }

    /// Applies `f` to each date row independently.
    pub(crate) fn map_rows(&self, mut f: impl FnMut(&[f64], &mut [f64])) -> Self {
        let cols = self.cols();
        let mut out = vec![f64::NAN; self.values.len()];
        if cols > 0 {
            for (src, dst) in self.values.chunks(cols).zip(out.chunks_mut(cols)) {
                f(src, dst);
            }
        }
        self.with_values(out)
    }

    /// Reorders columns to `order`, which must be a permutation of this panel's securities.
    pub fn reorder_symbols(&self, order: &[String]) -> Result<Self, ShapeError> {
        if order.len() != self.cols() {
            let missing = order
                .iter()
                .find(|s| self.symbol_idx(s).is_none())
                .or_else(|| self.symbols.iter().find(|s| !order.contains(s)))
                .cloned()
                .unwrap_or_default();
            return Err(ShapeError::SecurityMismatch { symbol: missing });
        }
        let mut source_cols = Vec::with_capacity(order.len());
        for symbol in order {
            let col = self
                .symbol_idx(symbol)
                .ok_or_else(|| ShapeError::SecurityMismatch {
                    symbol: symbol.clone(),
                })?;
            source_cols.push(col);
        }
        let cols = self.cols();
        let mut values = Vec::with_capacity(self.values.len());
        for row in 0..self.rows() {
            let base = row * cols;
            values.extend(source_cols.iter().map(|col| self.values[base + col]));
        }
        Ok(Self::from_parts(
            self.dates.clone(),
            Arc::from(order.to_vec()),
            values,
        ))
    }

    pub(crate) fn shared_symbols(&self) -> Arc<[String]> {
        self.symbols.clone()
    }
}

/// Wire form of [`Panel`]: rows of optional cells so missing values survive JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PanelRepr {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl TryFrom<PanelRepr> for Panel {
    type Error = ShapeError;

    fn try_from(repr: PanelRepr) -> Result<Self, Self::Error> {
        let rows = repr
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect();
        Panel::from_rows(repr.dates, repr.symbols, rows)
    }
}

impl From<Panel> for PanelRepr {
    fn from(panel: Panel) -> Self {
        let cols = panel.cols();
        let rows = if cols == 0 {
            vec![Vec::new(); panel.rows()]
        } else {
            panel
                .values
                .chunks(cols)
                .map(|row| {
                    row.iter()
                        .map(|v| if v.is_nan() { None } else { Some(*v) })
                        .collect()
                })
                .collect()
        };
        Self {
            dates: panel.dates.to_vec(),
            symbols: panel.symbols.to_vec(),
            rows,
        }
    }
}

pub(crate) fn check_strictly_increasing(dates: &[NaiveDate]) -> Result<(), ShapeError> {
    match dates.windows(2).position(|pair| pair[0] >= pair[1]) {
        Some(idx) => Err(ShapeError::UnsortedDates { row: idx + 1 }),
        None => Ok(()),
    }
}

fn check_unique_symbols(symbols: &[String]) -> Result<(), ShapeError> {
    let mut seen = HashSet::with_capacity(symbols.len());
    for symbol in symbols {
        if !seen.insert(symbol.as_str()) {
            return Err(ShapeError::DuplicateSecurity {
                symbol: symbol.clone(),
            });
        }
    }
    Ok(())
}

/// Runtime value on the evaluator stack.
#[derive(Clone)]
pub enum Value {
    Scalar(f64),
    Panel(Arc<Panel>),
    /// Quoted string literal, only meaningful as an argument to a host callable.
    Text(String),
    /// Ordered argument list produced by comma chaining.
    List(Vec<Value>),
    /// Registered function passed as a first-class value.
    Function(FunctionRef),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Panel(_) => "panel",
            Self::Text(_) => "text",
            Self::List(_) => "argument list",
            Self::Function(_) => "function",
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_panel(&self) -> Option<&Panel> {
        match self {
            Self::Panel(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_panel(self) -> Option<Arc<Panel>> {
        match self {
            Self::Panel(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Panel(p) => f
                .debug_struct("Panel")
                .field("rows", &p.rows())
                .field("cols", &p.cols())
                .finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Function(func) => f.debug_tuple("Function").field(&func.name()).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Panel(a), Self::Panel(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Panel> for Value {
    fn from(p: Panel) -> Self {
        Self::Panel(Arc::new(p))
    }
}

impl From<Arc<Panel>> for Value {
    fn from(p: Arc<Panel>) -> Self {
        Self::Panel(p)
    }
}

/// Caller-supplied mapping from identifier to panel or scalar.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

/// Spelling of function and named unary operator names in the tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStyle {
    /// Names as registered, e.g. `Ts_Mean`.
    #[default]
    Upper,
    /// Names lowercased, e.g. `ts_mean`.
    Lower,
}

impl CaseStyle {
    pub fn apply(self, name: &str) -> String {
        match self {
            Self::Upper => name.to_string(),
            Self::Lower => name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub case_style: CaseStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRequest {
    pub exprs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub opts: CompileOptions,
}

impl FactorRequest {
    pub fn new(exprs: Vec<String>) -> Self {
        Self {
            exprs,
            outputs: Vec::new(),
            opts: CompileOptions::default(),
        }
    }
}
