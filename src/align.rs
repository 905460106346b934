//! Irregular-frequency alignment keyed by announcement date.
//!
//! A value never becomes visible before the date it was announced, so a
//! quarterly report filed on 2020-04-28 contributes to daily rows from
//! 2020-04-28 on and to none before.

use crate::error::ShapeError;
use crate::types::{check_strictly_increasing, Panel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Per security, per source row: the date that row's observation became knowable.
///
/// Row positions correspond one to one with the value panel being aligned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AnnouncementRepr")]
pub struct AnnouncementPanel {
    symbols: Vec<String>,
    rows: Vec<Vec<Option<NaiveDate>>>,
}

#[derive(Deserialize)]
struct AnnouncementRepr {
    symbols: Vec<String>,
    rows: Vec<Vec<Option<NaiveDate>>>,
}

impl TryFrom<AnnouncementRepr> for AnnouncementPanel {
    type Error = ShapeError;

    fn try_from(repr: AnnouncementRepr) -> Result<Self, Self::Error> {
        AnnouncementPanel::new(repr.symbols, repr.rows)
    }
}

impl AnnouncementPanel {
    pub fn new(
        symbols: Vec<String>,
        rows: Vec<Vec<Option<NaiveDate>>>,
    ) -> Result<Self, ShapeError> {
        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if !seen.insert(symbol.as_str()) {
                return Err(ShapeError::DuplicateSecurity {
                    symbol: symbol.clone(),
                });
            }
        }
        if let Some(bad) = rows.iter().find(|row| row.len() != symbols.len()) {
            return Err(ShapeError::CellCount {
                expected: symbols.len(),
                actual: bad.len(),
            });
        }
        Ok(Self { symbols, rows })
    }

    #[inline]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn announced_at(&self, row: usize, symbol: &str) -> Option<NaiveDate> {
        let col = self.symbols.iter().position(|s| s == symbol)?;
        self.rows.get(row)?.get(col).copied().flatten()
    }

    /// `(announcement date, source row)` events for one security, oldest first.
    /// Equal dates keep row order, so a later row wins when swept.
    fn events(&self, col: usize) -> Vec<(NaiveDate, usize)> {
        let mut events: Vec<(NaiveDate, usize)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(row, cells)| cells[col].map(|date| (date, row)))
            .collect();
        events.sort_unstable();
        events
    }
}

/// Announcement dates plus the canonical trading-date grid for one evaluation.
#[derive(Debug, Clone)]
pub struct AnnouncementContext {
    announcements: Arc<AnnouncementPanel>,
    trade_dates: Arc<[NaiveDate]>,
}

impl AnnouncementContext {
    pub fn new(
        announcements: AnnouncementPanel,
        trade_dates: Vec<NaiveDate>,
    ) -> Result<Self, ShapeError> {
        check_strictly_increasing(&trade_dates)?;
        Ok(Self {
            announcements: Arc::new(announcements),
            trade_dates: trade_dates.into(),
        })
    }

    #[inline]
    pub fn announcements(&self) -> &AnnouncementPanel {
        &self.announcements
    }

    #[inline]
    pub fn trade_dates(&self) -> &[NaiveDate] {
        &self.trade_dates
    }
}

/// Forward-fills `values` onto `target_dates` by announcement date.
///
/// For each target date `t` and security, the result is the value of the row
/// with the latest announcement date `<= t` (later rows win ties), or NaN if
/// nothing has been announced yet.
pub fn align(
    values: &Panel,
    announcements: &AnnouncementPanel,
    target_dates: &[NaiveDate],
) -> Result<Panel, ShapeError> {
    check_strictly_increasing(target_dates)?;
    if values.rows() != announcements.rows() {
        return Err(ShapeError::RowMismatch {
            lhs: values.rows(),
            rhs: announcements.rows(),
        });
    }
    let cols = values.cols();
    let mut out = vec![f64::NAN; target_dates.len() * cols];
    for (col, symbol) in values.symbols().iter().enumerate() {
        let ann_col = announcements
            .symbols()
            .iter()
            .position(|s| s == symbol)
            .ok_or_else(|| ShapeError::MissingAnnouncements {
                symbol: symbol.clone(),
            })?;
        let events = announcements.events(ann_col);
        let mut next = 0usize;
        let mut current: Option<usize> = None;
        for (t_idx, target) in target_dates.iter().enumerate() {
            while next < events.len() && events[next].0 <= *target {
                current = Some(events[next].1);
                next += 1;
            }
            if let Some(row) = current {
                out[t_idx * cols + col] = values.value_at(row, col).unwrap_or(f64::NAN);
            }
        }
    }
    Ok(Panel::from_parts(
        Arc::from(target_dates.to_vec()),
        values.shared_symbols(),
        out,
    ))
}

/// Per-evaluation context handed to every operator and function.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    announcements: Option<&'a AnnouncementContext>,
    force_align: bool,
}

impl<'a> EvalContext<'a> {
    pub fn new(announcements: Option<&'a AnnouncementContext>) -> Self {
        Self {
            announcements,
            force_align: false,
        }
    }

    /// Like [`EvalContext::new`], but every panel operand of an elementwise
    /// operator is re-based onto the trading dates first, even when the
    /// operands already have equal row counts.
    pub fn forced(announcements: &'a AnnouncementContext) -> Self {
        Self {
            announcements: Some(announcements),
            force_align: true,
        }
    }

    #[inline]
    pub fn announcements(&self) -> Option<&'a AnnouncementContext> {
        self.announcements
    }

    #[inline]
    pub fn force_align(&self) -> bool {
        self.force_align
    }

    /// Re-bases `panel` when alignment is forced; otherwise returns it as is.
    pub(crate) fn prepare(&self, panel: &Arc<Panel>) -> Result<Arc<Panel>, ShapeError> {
        if self.force_align {
            self.rebase(panel)
        } else {
            Ok(panel.clone())
        }
    }

    /// Brings `other` onto `reference`'s date index and security order.
    ///
    /// A panel with fewer rows is aligned by announcement date, which needs a
    /// context. Equal row counts must already share dates.
    pub(crate) fn conform(
        &self,
        reference: &Panel,
        other: &Arc<Panel>,
    ) -> Result<Arc<Panel>, ShapeError> {
        if reference.same_index(other) {
            return Ok(other.clone());
        }
        let mut conformed = other.clone();
        if other.rows() != reference.rows() {
            let Some(ctx) = self.announcements else {
                return Err(ShapeError::MissingAlignment {
                    lhs: reference.rows(),
                    rhs: other.rows(),
                });
            };
            if other.rows() > reference.rows() {
                return Err(ShapeError::RowMismatch {
                    lhs: reference.rows(),
                    rhs: other.rows(),
                });
            }
            debug!(
                from_rows = other.rows(),
                to_rows = reference.rows(),
                "aligning operand by announcement date"
            );
            conformed = Arc::new(align(other, &ctx.announcements, reference.dates())?);
        } else if let Some(row) = first_date_mismatch(reference.dates(), other.dates()) {
            return Err(ShapeError::DateMismatch { row });
        }
        if conformed.symbols() != reference.symbols() {
            conformed = Arc::new(conformed.reorder_symbols(reference.symbols())?);
        }
        Ok(conformed)
    }

    /// Orders a binary operand pair so the panel with more rows sets the index.
    pub(crate) fn reconcile(
        &self,
        lhs: &Arc<Panel>,
        rhs: &Arc<Panel>,
    ) -> Result<(Arc<Panel>, Arc<Panel>), ShapeError> {
        let (lhs, rhs) = (self.prepare(lhs)?, self.prepare(rhs)?);
        if rhs.rows() > lhs.rows() {
            let lhs = self.conform(&rhs, &lhs)?;
            Ok((lhs, rhs))
        } else {
            let rhs = self.conform(&lhs, &rhs)?;
            Ok((lhs, rhs))
        }
    }

    /// Re-bases a panel onto the canonical trading dates before a
    /// cross-sectional operation. Without a context the panel is used as is.
    pub(crate) fn rebase(&self, panel: &Arc<Panel>) -> Result<Arc<Panel>, ShapeError> {
        let Some(ctx) = self.announcements else {
            return Ok(panel.clone());
        };
        if panel.dates() == ctx.trade_dates() {
            return Ok(panel.clone());
        }
        debug!(
            from_rows = panel.rows(),
            to_rows = ctx.trade_dates().len(),
            "re-basing cross-sectional operand onto trading dates"
        );
        Ok(Arc::new(align(
            panel,
            &ctx.announcements,
            ctx.trade_dates(),
        )?))
    }
}

fn first_date_mismatch(lhs: &[NaiveDate], rhs: &[NaiveDate]) -> Option<usize> {
    lhs.iter().zip(rhs).position(|(a, b)| a != b)
}
